//! Audio engine controller
//!
//! [`AudioEngine`] is the handle callers hold. It is `Send + Sync` because it
//! owns no stream: a dedicated control thread owns the capture session and
//! serializes every lifecycle command, so starts never overlap.

use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::capture::{CaptureBackend, CaptureRequest, CaptureSession, CpalBackend};
use crate::audio::fft::SpectrumContext;
use crate::audio::frame::FrameProcessor;
use crate::bridge::EventSink;
use crate::config::{validate, AnalysisConfig, RawAnalysisConfig};
use crate::error::EngineError;
use crate::permission::{ensure_permission, PermissionOracle, StaticPermission};
use crate::state::{EngineState, SharedState};

/// Result of a successful `start()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    AlreadyStarting,
}

/// Result of a successful `stop()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

type Reply<T> = mpsc::Sender<Result<T, EngineError>>;

/// Commands sent to the control thread
enum EngineCommand {
    Start {
        config: AnalysisConfig,
        reply: Reply<StartOutcome>,
    },
    Stop {
        reply: Reply<StopOutcome>,
    },
    SetSmoothing {
        enabled: bool,
        factor: f32,
        reply: Reply<()>,
    },
    SetSpectrumConfig {
        fft_size: usize,
        downsample_bins: i64,
        reply: Reply<()>,
    },
    SetSink(Option<Arc<dyn EventSink>>),
    Shutdown,
}

/// Handle to the audio engine
pub struct AudioEngine {
    command_tx: mpsc::Sender<EngineCommand>,
    thread_handle: Option<JoinHandle<()>>,
    shared: Arc<SharedState>,
}

impl AudioEngine {
    /// Engine capturing from the default input device
    pub fn new() -> Result<Self, EngineError> {
        Self::with_backend(Box::new(CpalBackend::new()), Arc::new(StaticPermission::granted()))
    }

    pub fn with_backend(
        backend: Box<dyn CaptureBackend>,
        permission: Arc<dyn PermissionOracle>,
    ) -> Result<Self, EngineError> {
        let (command_tx, command_rx) = mpsc::channel();
        let shared = Arc::new(SharedState::default());

        let thread_shared = shared.clone();

        // Sessions are not `Send`, so the worker is built on its own thread.
        let thread_handle = thread::Builder::new()
            .name("audio-engine".to_string())
            .spawn(move || {
                let worker = EngineThread {
                    backend,
                    permission,
                    shared: thread_shared,
                    session: None,
                    sink: None,
                };
                worker.run(command_rx)
            })
            .map_err(|e| EngineError::session_caused_by("Failed to spawn audio engine thread", e))?;

        Ok(Self {
            command_tx,
            thread_handle: Some(thread_handle),
            shared,
        })
    }

    /// Validate `raw` against the current config and start capturing.
    ///
    /// An invalid config is rejected before any state is touched.
    pub fn start(&self, raw: &RawAnalysisConfig) -> Result<StartOutcome, EngineError> {
        let config = validate(raw, &self.shared.config())?;

        if self.shared.state() == EngineState::Starting {
            return Ok(StartOutcome::AlreadyStarting);
        }

        self.request(|reply| EngineCommand::Start { config, reply })
    }

    pub fn stop(&self) -> Result<StopOutcome, EngineError> {
        self.request(|reply| EngineCommand::Stop { reply })
    }

    pub fn is_analyzing(&self) -> bool {
        self.shared.state() == EngineState::Running
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn get_config(&self) -> AnalysisConfig {
        self.shared.config()
    }

    /// Change smoothing; a running session picks it up on its next frame
    pub fn set_smoothing(&self, enabled: bool, factor: f64) -> Result<(), EngineError> {
        let current = self.shared.config();
        let raw = RawAnalysisConfig {
            smoothing_enabled: Some(enabled),
            smoothing_factor: Some(factor),
            ..RawAnalysisConfig::from(&current)
        };
        let config = validate(&raw, &current)?;

        self.request(|reply| EngineCommand::SetSmoothing {
            enabled: config.smoothing_enabled,
            factor: config.smoothing_factor,
            reply,
        })
    }

    /// Store a new FFT size and bin count, used from the next `start()`
    pub fn set_spectrum_config(&self, fft_size: i64, downsample_bins: i64) -> Result<(), EngineError> {
        let current = self.shared.config();
        let raw = RawAnalysisConfig {
            fft_size: Some(fft_size as f64),
            downsample_bins: Some(downsample_bins as f64),
            ..RawAnalysisConfig::from(&current)
        };
        let config = validate(&raw, &current)?;

        self.request(|reply| EngineCommand::SetSpectrumConfig {
            fft_size: config.fft_size,
            downsample_bins: config.downsample_bins,
            reply,
        })
    }

    /// Attach or detach the event sink, used from the next `start()`
    pub fn set_event_sink(&self, sink: Option<Arc<dyn EventSink>>) {
        if self.command_tx.send(EngineCommand::SetSink(sink)).is_err() {
            log::warn!("Audio engine thread is gone, event sink not updated");
        }
    }

    /// Stop capturing and join the control thread
    pub fn shutdown(&mut self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Audio engine thread panicked");
            }
        }
    }

    fn request<T>(&self, command: impl FnOnce(Reply<T>) -> EngineCommand) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.command_tx
            .send(command(reply_tx))
            .map_err(|_| thread_gone())?;
        reply_rx.recv().map_err(|_| thread_gone())?
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn thread_gone() -> EngineError {
    EngineError::session("Audio engine thread is not running")
}

/// State owned by the control thread
struct EngineThread {
    backend: Box<dyn CaptureBackend>,
    permission: Arc<dyn PermissionOracle>,
    shared: Arc<SharedState>,
    session: Option<Box<dyn CaptureSession>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl EngineThread {
    fn run(mut self, command_rx: mpsc::Receiver<EngineCommand>) {
        log::debug!("Audio engine thread started");

        // A dropped handle disconnects the channel and ends the loop too.
        while let Ok(command) = command_rx.recv() {
            match command {
                EngineCommand::Start { config, reply } => {
                    let _ = reply.send(self.handle_start(config));
                }
                EngineCommand::Stop { reply } => {
                    let _ = reply.send(Ok(self.handle_stop()));
                }
                EngineCommand::SetSmoothing {
                    enabled,
                    factor,
                    reply,
                } => {
                    let mut config = self.shared.config();
                    config.smoothing_enabled = enabled;
                    config.smoothing_factor = factor;
                    self.shared.set_config(config);
                    let _ = reply.send(Ok(()));
                }
                EngineCommand::SetSpectrumConfig {
                    fft_size,
                    downsample_bins,
                    reply,
                } => {
                    let mut config = self.shared.config();
                    config.fft_size = fft_size;
                    config.downsample_bins = downsample_bins;
                    self.shared.set_config(config);
                    let _ = reply.send(Ok(()));
                }
                EngineCommand::SetSink(sink) => {
                    self.sink = sink;
                }
                EngineCommand::Shutdown => break,
            }
        }

        self.handle_stop();
        log::debug!("Audio engine thread exiting");
    }

    fn handle_start(&mut self, config: AnalysisConfig) -> Result<StartOutcome, EngineError> {
        match self.shared.state() {
            EngineState::Running => return Ok(StartOutcome::AlreadyRunning),
            EngineState::Starting => return Ok(StartOutcome::AlreadyStarting),
            _ => {}
        }

        self.shared.set_state(EngineState::Starting);
        let previous = self.shared.config();

        match self.open_session(config) {
            Ok(session) => {
                self.session = Some(session);
                self.shared.set_state(EngineState::Running);
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                log::error!("Failed to start audio analysis: {}", e);
                self.shared.set_config(previous);
                self.shared.set_state(EngineState::Stopped);
                Err(e)
            }
        }
    }

    fn open_session(&mut self, config: AnalysisConfig) -> Result<Box<dyn CaptureSession>, EngineError> {
        ensure_permission(self.permission.as_ref())?;

        let mut session = self.backend.configure(&CaptureRequest::from(&config))?;
        let format = session.format();

        let spectrum = if config.emit_spectrum {
            match SpectrumContext::new(config.frame_size()) {
                Ok(ctx) => Some(ctx),
                Err(e) => {
                    log::error!("{}, continuing without spectrum", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!(
            "Starting analysis: fft {} (frame {}), {} Hz, {} channel(s), {} Hz callbacks",
            config.fft_size,
            config.frame_size(),
            format.sample_rate,
            format.channels,
            config.callback_rate_hz,
        );

        let processor = FrameProcessor::new(&config, format, spectrum, self.shared.clone(), self.sink.clone());
        self.shared.set_config(config);
        session.install_tap(processor)?;

        Ok(session)
    }

    fn handle_stop(&mut self) -> StopOutcome {
        let Some(mut session) = self.session.take() else {
            return StopOutcome::AlreadyStopped;
        };

        self.shared.set_state(EngineState::Stopping);
        if let Err(e) = session.remove_tap() {
            log::warn!("Error while stopping audio capture: {}", e);
        }
        drop(session);
        self.shared.set_state(EngineState::Stopped);

        log::info!("Audio analysis stopped");
        StopOutcome::Stopped
    }
}
