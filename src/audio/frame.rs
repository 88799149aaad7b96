//! Per-buffer analysis pipeline run on the capture callback

use cpal::{FromSample, Sample};
use std::sync::Arc;

use super::fft::SpectrumContext;
use super::level::LevelMeter;
use super::rate::{RateLimiter, SessionClock};
use super::resample::resample_into;
use crate::bridge::{AnalysisEvent, EventSink};
use crate::config::AnalysisConfig;
use crate::state::SharedState;

/// Format the hardware actually delivers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureFormat {
    pub sample_rate: f64,
    pub channels: usize,
}

/// Owns everything one capture session's callback needs.
///
/// Built on the control thread before the tap is installed and moved into
/// the callback; dropping the stream drops it, together with its spectrum
/// context and meter state.
pub struct FrameProcessor {
    format: CaptureFormat,
    limiter: RateLimiter,
    meter: LevelMeter,

    /// Downmixed samples for the FFT, `n` long
    mono: Vec<f32>,

    spectrum: Option<SpectrumContext>,

    /// Downsampled bins, capacity `n / 2`
    bins: Vec<f32>,
    downsample: Option<usize>,

    shared: Arc<SharedState>,
    sink: Option<Arc<dyn EventSink>>,

    /// Whether events are currently being dropped
    dropping: bool,
    clock: SessionClock,
}

impl FrameProcessor {
    pub fn new(
        config: &AnalysisConfig,
        format: CaptureFormat,
        spectrum: Option<SpectrumContext>,
        shared: Arc<SharedState>,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Self {
        let frame_size = spectrum
            .as_ref()
            .map(|ctx| ctx.size())
            .unwrap_or_else(|| config.frame_size());

        Self {
            format,
            limiter: RateLimiter::new(config.callback_rate_hz),
            meter: LevelMeter::new(),
            mono: vec![0.0; frame_size],
            bins: Vec::with_capacity(frame_size / 2),
            downsample: config.downsample_target(),
            spectrum,
            shared,
            sink,
            dropping: false,
            clock: SessionClock::start(),
        }
    }

    pub fn has_spectrum(&self) -> bool {
        self.spectrum.is_some()
    }

    pub fn meter(&self) -> &LevelMeter {
        &self.meter
    }

    /// Process one interleaved buffer stamped with the session clock
    pub fn process<T>(&mut self, data: &[T]) -> bool
    where
        T: Sample,
        f32: FromSample<T>,
    {
        let now_ms = self.clock.now_ms();
        self.process_at(data, now_ms)
    }

    /// Process one interleaved buffer at `now_ms`.
    ///
    /// Returns false when the rate limiter skipped the buffer.
    pub fn process_at<T>(&mut self, data: &[T], now_ms: f64) -> bool
    where
        T: Sample,
        f32: FromSample<T>,
    {
        if !self.limiter.should_process(now_ms) {
            return false;
        }

        let channels = self.format.channels.max(1);
        let (smoothing_enabled, factor) = self.shared.smoothing().load();
        let (rms, peak) = self
            .meter
            .process(downmix(data, channels), smoothing_enabled, factor);

        let frequency_bins: &[f32] = match self.spectrum.as_mut() {
            Some(ctx) => {
                let used = downmix_into(data, channels, &mut self.mono);
                let magnitudes = ctx.transform(&self.mono[..used]);
                match self.downsample {
                    Some(target) => {
                        resample_into(magnitudes, target, &mut self.bins);
                        &self.bins
                    }
                    None => magnitudes,
                }
            }
            None => &[],
        };

        let event = AnalysisEvent {
            timestamp_ms: now_ms,
            rms,
            peak,
            frequency_bins,
            sample_rate: self.format.sample_rate,
            frame_length: data.len() / channels,
            channel_count: channels,
        };

        // Log transitions only, not every frame.
        match &self.sink {
            Some(sink) => match sink.emit(&event) {
                Ok(()) if self.dropping => {
                    self.dropping = false;
                    log::debug!("Event sink accepting analysis events again");
                }
                Ok(()) => {}
                Err(e) if !self.dropping => {
                    self.dropping = true;
                    log::debug!("Dropping analysis events: {}", e);
                }
                Err(_) => {}
            },
            None if !self.dropping => {
                self.dropping = true;
                log::debug!("No event sink attached, dropping analysis events");
            }
            None => {}
        }

        true
    }
}

/// Average each interleaved frame down to one sample.
///
/// Stereo becomes `(L + R) * 0.5`, mono is passed through.
pub fn downmix<T>(data: &[T], channels: usize) -> impl Iterator<Item = f32> + '_
where
    T: Sample,
    f32: FromSample<T>,
{
    let channels = channels.max(1);
    let scale = 1.0 / channels as f32;
    data.chunks_exact(channels).map(move |frame| {
        let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
        sum * scale
    })
}

/// Downmix into `out`, stopping when it is full. Returns the samples written.
pub fn downmix_into<T>(data: &[T], channels: usize, out: &mut [f32]) -> usize
where
    T: Sample,
    f32: FromSample<T>,
{
    let mut written = 0;
    for (slot, sample) in out.iter_mut().zip(downmix(data, channels)) {
        *slot = sample;
        written += 1;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{AnalysisPayload, ChannelSink};
    use crate::config::{validate, RawAnalysisConfig};
    use crate::testing::{count_allocations, RecordingSink};

    const MONO_48K: CaptureFormat = CaptureFormat {
        sample_rate: 48000.0,
        channels: 1,
    };

    fn processor(
        raw: RawAnalysisConfig,
        format: CaptureFormat,
    ) -> (FrameProcessor, Arc<RecordingSink>) {
        let config = validate(&raw, &AnalysisConfig::default()).unwrap();
        let spectrum = if config.emit_spectrum {
            Some(SpectrumContext::new(config.frame_size()).unwrap())
        } else {
            None
        };
        let sink = Arc::new(RecordingSink::default());
        let shared = Arc::new(SharedState::new(config.clone()));
        let events: Arc<dyn EventSink> = sink.clone();
        let processor = FrameProcessor::new(&config, format, spectrum, shared, Some(events));
        (processor, sink)
    }

    fn last(sink: &RecordingSink) -> AnalysisPayload {
        sink.events().last().cloned().expect("no event emitted")
    }

    #[test]
    fn stereo_downmix_averages_channels() {
        let data = [1.0f32, 0.0, 0.5, -0.5, -1.0, -0.5];
        let mono: Vec<f32> = downmix(&data, 2).collect();
        assert_eq!(mono, vec![0.5, 0.0, -0.75]);
    }

    #[test]
    fn mono_downmix_is_a_copy() {
        let data = [0.1f32, -0.2, 0.3];
        assert_eq!(downmix(&data, 1).collect::<Vec<_>>(), data.to_vec());
    }

    #[test]
    fn downmix_converts_integer_samples() {
        let data = [i16::MIN, 0i16];
        let mono: Vec<f32> = downmix(&data, 1).collect();
        assert_eq!(mono[0], -1.0);
        assert_eq!(mono[1], 0.0);
    }

    #[test]
    fn downmix_into_stops_at_capacity() {
        let data = vec![0.25f32; 600];
        let mut out = [0.0f32; 256];
        assert_eq!(downmix_into(&data, 2, &mut out), 256);
        assert!(out.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn silence_with_eight_bins_reads_zero() {
        let raw = RawAnalysisConfig {
            fft_size: Some(1024.0),
            downsample_bins: Some(8.0),
            ..Default::default()
        };
        let (mut pipeline, sink) = processor(raw, MONO_48K);

        assert!(pipeline.process_at(&[0.0f32; 1024], 0.0));

        let event = last(&sink);
        assert_eq!(event.rms, 0.0);
        assert_eq!(event.peak, 0.0);
        assert_eq!(event.frequency_bins, vec![0.0; 8]);
    }

    #[test]
    fn disabled_downsampling_emits_half_frame_size() {
        let raw = RawAnalysisConfig {
            fft_size: Some(1000.0),
            downsample_bins: Some(-1.0),
            ..Default::default()
        };
        let (mut pipeline, sink) = processor(raw, MONO_48K);

        pipeline.process_at(&vec![0.2f32; 480], 0.0);

        assert_eq!(last(&sink).frequency_bins.len(), 512);
    }

    #[test]
    fn spectrum_off_emits_levels_only() {
        let raw = RawAnalysisConfig {
            emit_spectrum: Some(false),
            ..Default::default()
        };
        let (mut pipeline, sink) = processor(raw, MONO_48K);
        assert!(!pipeline.has_spectrum());

        pipeline.process_at(&[0.5f32; 256], 0.0);

        let event = last(&sink);
        assert!(event.frequency_bins.is_empty());
        assert!(event.rms > 0.0);
    }

    #[test]
    fn event_reports_frames_channels_and_rate() {
        let stereo = CaptureFormat {
            sample_rate: 44100.0,
            channels: 2,
        };
        let (mut pipeline, sink) = processor(RawAnalysisConfig::default(), stereo);

        pipeline.process_at(&vec![0.1f32; 2 * 441], 1234.5);

        let event = last(&sink);
        assert_eq!(event.frame_length, 441);
        assert_eq!(event.channel_count, 2);
        assert_eq!(event.sample_rate, 44100.0);
        assert_eq!(event.timestamp_ms, 1234.5);
    }

    #[test]
    fn throttled_buffers_do_not_touch_the_meter() {
        let raw = RawAnalysisConfig {
            callback_rate_hz: Some(10.0),
            smoothing_enabled: Some(false),
            ..Default::default()
        };
        let (mut pipeline, sink) = processor(raw, MONO_48K);

        let processed = (0..100)
            .filter(|&i| {
                let level = if i == 0 { 0.1f32 } else { 0.9 };
                pipeline.process_at(&[level; 256], i as f64 * 0.5)
            })
            .count();

        assert_eq!(processed, 1);
        assert_eq!(sink.events().len(), 1);
        assert_eq!(pipeline.meter().smoothed().1, 0.1);
    }

    #[test]
    fn smoothing_changes_apply_to_running_processor() {
        let raw = RawAnalysisConfig {
            callback_rate_hz: Some(120.0),
            smoothing_enabled: Some(true),
            smoothing_factor: Some(0.5),
            emit_spectrum: Some(false),
            ..Default::default()
        };
        let config = validate(&raw, &AnalysisConfig::default()).unwrap();
        let shared = Arc::new(SharedState::new(config.clone()));
        let sink = Arc::new(RecordingSink::default());
        let events: Arc<dyn EventSink> = sink.clone();
        let mut pipeline = FrameProcessor::new(&config, MONO_48K, None, shared.clone(), Some(events));

        pipeline.process_at(&[0.8f32; 256], 0.0);
        assert_eq!(last(&sink).peak, 0.4);

        shared.smoothing().store(false, 0.5);
        pipeline.process_at(&[0.8f32; 256], 100.0);
        assert_eq!(last(&sink).peak, 0.8);
    }

    #[test]
    fn missing_sink_drops_events_quietly() {
        let config = AnalysisConfig::default();
        let shared = Arc::new(SharedState::new(config.clone()));
        let spectrum = SpectrumContext::new(config.frame_size()).ok();
        let mut pipeline = FrameProcessor::new(&config, MONO_48K, spectrum, shared, None);

        assert!(pipeline.process_at(&[0.3f32; 1024], 0.0));
        assert!(pipeline.process_at(&[0.3f32; 1024], 100.0));
        assert!(pipeline.dropping);
    }

    #[test]
    fn dropping_state_follows_sink_backpressure() {
        let config = AnalysisConfig {
            emit_spectrum: false,
            ..Default::default()
        };
        let shared = Arc::new(SharedState::new(config.clone()));
        let (sink, mut rx) = ChannelSink::with_bin_capacity(1, 8);
        let sink: Arc<dyn EventSink> = Arc::new(sink);
        let mut pipeline = FrameProcessor::new(&config, MONO_48K, None, shared, Some(sink));

        pipeline.process_at(&[0.1f32; 256], 0.0);
        assert!(!pipeline.dropping);

        pipeline.process_at(&[0.1f32; 256], 100.0);
        assert!(pipeline.dropping);

        drop(rx.try_recv().unwrap());
        pipeline.process_at(&[0.1f32; 256], 200.0);
        assert!(!pipeline.dropping);
    }

    #[test]
    fn steady_state_processing_does_not_allocate() {
        let stereo = CaptureFormat {
            sample_rate: 48000.0,
            channels: 2,
        };
        let raw = RawAnalysisConfig {
            fft_size: Some(1024.0),
            downsample_bins: Some(64.0),
            ..Default::default()
        };
        let config = validate(&raw, &AnalysisConfig::default()).unwrap();
        let shared = Arc::new(SharedState::new(config.clone()));
        let data: Vec<f32> = (0..2048).map(|i| 0.5 * (i as f32 * 0.01).sin()).collect();

        let (sink, mut rx) = ChannelSink::with_bin_capacity(16, config.frame_size() / 2);
        let sink: Arc<dyn EventSink> = Arc::new(sink);
        let sinks = [None, Some(sink)];

        for sink in sinks {
            let spectrum = SpectrumContext::new(config.frame_size()).ok();
            let mut pipeline = FrameProcessor::new(&config, stereo, spectrum, shared.clone(), sink);
            pipeline.process_at(&data, 0.0);

            let (processed, allocations) = count_allocations(|| {
                (1..=10)
                    .filter(|&i| pipeline.process_at(&data, i as f64 * 100.0))
                    .count()
            });

            assert_eq!(processed, 10);
            assert_eq!(allocations, 0);
        }

        let mut received = 0;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.frequency_bins.len(), 64);
            received += 1;
        }
        assert_eq!(received, 11);
    }
}
