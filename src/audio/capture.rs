//! Microphone capture through cpal
//!
//! The engine talks to hardware through [`CaptureBackend`] and
//! [`CaptureSession`] so the control flow can be exercised without a device.
//! cpal streams are not `Send`; sessions therefore live on the engine's
//! control thread and only the [`FrameProcessor`] crosses into the callback.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, StreamConfig, SupportedBufferSize, SupportedStreamConfig};
use serde::{Deserialize, Serialize};

use super::frame::{CaptureFormat, FrameProcessor};
use crate::config::AnalysisConfig;
use crate::error::EngineError;

/// What the engine asks the hardware for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRequest {
    pub sample_rate: f64,
    pub buffer_size: usize,
}

impl From<&AnalysisConfig> for CaptureRequest {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            buffer_size: config.buffer_size,
        }
    }
}

/// Opens capture sessions
pub trait CaptureBackend: Send {
    /// Pick a device and format for `request` without starting anything
    fn configure(&mut self, request: &CaptureRequest) -> Result<Box<dyn CaptureSession>, EngineError>;
}

/// A configured capture device
pub trait CaptureSession {
    /// Format the callback will deliver
    fn format(&self) -> CaptureFormat;

    /// Install `processor` as the capture callback and start the stream
    fn install_tap(&mut self, processor: FrameProcessor) -> Result<(), EngineError>;

    /// Stop the stream and drop the callback.
    ///
    /// The tap is gone when this returns, even if an error is reported.
    fn remove_tap(&mut self) -> Result<(), EngineError>;
}

/// Capture from the default (or a named) input device
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    device_name: Option<String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture from the input device with this name
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    fn find_device(&self) -> Result<Device, EngineError> {
        let host = cpal::default_host();

        match &self.device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| EngineError::session_caused_by("Failed to enumerate input devices", e))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| EngineError::session(format!("Input device not found: {}", name))),
            None => host
                .default_input_device()
                .ok_or_else(|| EngineError::session("No input device available")),
        }
    }
}

impl CaptureBackend for CpalBackend {
    fn configure(&mut self, request: &CaptureRequest) -> Result<Box<dyn CaptureSession>, EngineError> {
        log::debug!(
            "Requesting {} Hz with {} frame buffers ({:.1} ms)",
            request.sample_rate,
            request.buffer_size,
            request.buffer_size as f64 * 1000.0 / request.sample_rate,
        );

        let device = self.find_device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = choose_config(&device, request)?;
        let sample_format = supported.sample_format();
        let mut config = supported.config();
        config.buffer_size = choose_buffer_size(supported.buffer_size(), request.buffer_size);

        log::info!(
            "Audio capture configured: {} ({} Hz, {} channels, {:?}, buffer {:?})",
            device_name,
            config.sample_rate.0,
            config.channels,
            sample_format,
            config.buffer_size,
        );

        Ok(Box::new(CpalSession {
            device,
            config,
            sample_format,
            stream: None,
        }))
    }
}

/// Input device as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDevice {
    pub name: String,
    pub is_default: bool,
}

/// List input devices of the default host, default device first
pub fn list_input_devices() -> Result<Vec<InputDevice>, EngineError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices: Vec<InputDevice> = host
        .input_devices()
        .map_err(|e| EngineError::session_caused_by("Failed to enumerate input devices", e))?
        .filter_map(|device| device.name().ok())
        .map(|name| InputDevice {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        })
        .collect();

    devices.sort_by_key(|d| !d.is_default);
    log::debug!("Found {} input device(s)", devices.len());
    Ok(devices)
}

/// Prefer an input range that contains the requested rate (f32 first),
/// otherwise fall back to the device default
fn choose_config(device: &Device, request: &CaptureRequest) -> Result<SupportedStreamConfig, EngineError> {
    let target = cpal::SampleRate(request.sample_rate.round() as u32);

    let ranges = device
        .supported_input_configs()
        .map_err(|e| EngineError::hardware_format_caused_by("Failed to query input configurations", e))?;

    let matching = ranges
        .filter(|range| range.min_sample_rate() <= target && target <= range.max_sample_rate())
        .max_by_key(|range| range.sample_format() == SampleFormat::F32);

    if let Some(range) = matching {
        return Ok(range.with_sample_rate(target));
    }

    let fallback = device
        .default_input_config()
        .map_err(|e| EngineError::hardware_format_caused_by("No usable input configuration", e))?;
    log::warn!(
        "Input device does not support {} Hz, using {} Hz",
        target.0,
        fallback.sample_rate().0
    );
    Ok(fallback)
}

fn choose_buffer_size(supported: &SupportedBufferSize, requested: usize) -> BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } => {
            let frames = requested as u32;
            if (*min..=*max).contains(&frames) {
                BufferSize::Fixed(frames)
            } else {
                log::warn!(
                    "Buffer size {} outside device range [{}, {}], using device default",
                    requested,
                    min,
                    max
                );
                BufferSize::Default
            }
        }
        SupportedBufferSize::Unknown => BufferSize::Default,
    }
}

struct CpalSession {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<cpal::Stream>,
}

impl CaptureSession for CpalSession {
    fn format(&self) -> CaptureFormat {
        CaptureFormat {
            sample_rate: self.config.sample_rate.0 as f64,
            channels: self.config.channels as usize,
        }
    }

    fn install_tap(&mut self, processor: FrameProcessor) -> Result<(), EngineError> {
        if self.stream.is_some() {
            return Err(EngineError::session("Capture tap already installed"));
        }

        let stream = match self.sample_format {
            SampleFormat::F32 => build_stream::<f32>(&self.device, &self.config, processor),
            SampleFormat::I16 => build_stream::<i16>(&self.device, &self.config, processor),
            SampleFormat::U16 => build_stream::<u16>(&self.device, &self.config, processor),
            SampleFormat::I32 => build_stream::<i32>(&self.device, &self.config, processor),
            other => {
                return Err(EngineError::hardware_format(format!(
                    "Unsupported sample format {:?}",
                    other
                )))
            }
        }
        .map_err(stream_build_error)?;

        stream
            .play()
            .map_err(|e| EngineError::session_caused_by("Failed to start input stream", e))?;

        self.stream = Some(stream);
        log::info!("Audio capture started");
        Ok(())
    }

    fn remove_tap(&mut self) -> Result<(), EngineError> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let paused = stream.pause();
        drop(stream);
        paused.map_err(|e| EngineError::session_caused_by("Failed to pause input stream", e))
    }
}

/// Format rejections are hardware format errors; everything else is a session error
fn stream_build_error(err: cpal::BuildStreamError) -> EngineError {
    match err {
        cpal::BuildStreamError::StreamConfigNotSupported | cpal::BuildStreamError::InvalidArgument => {
            EngineError::hardware_format_caused_by("Input stream format rejected", err)
        }
        _ => EngineError::session_caused_by("Failed to build input stream", err),
    }
}

/// Build an input stream that converts samples of type `T` on the fly
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut processor: FrameProcessor,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            processor.process(data);
        },
        |err| {
            log::error!("Audio stream error: {}", err);
        },
        None,
    )
}
