//! Microphone analysis engine
//!
//! Captures the microphone through cpal and turns each buffer into RMS and
//! peak levels plus an optional (downsampled) magnitude spectrum, delivered
//! to an [`EventSink`] at a bounded rate.
//!
//! ```no_run
//! use mic_analysis::{AudioEngine, ChannelSink, RawAnalysisConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), mic_analysis::EngineError> {
//! mic_analysis::init_logging();
//!
//! let engine = AudioEngine::new()?;
//! let (sink, mut events) = ChannelSink::new(32);
//! engine.set_event_sink(Some(Arc::new(sink)));
//!
//! let config = RawAnalysisConfig::from_json(r#"{"fftSize": 2048, "downsampleBins": 64}"#)?;
//! engine.start(&config)?;
//! while let Some(event) = events.blocking_recv() {
//!     println!("rms {:.3} peak {:.3}", event.rms, event.peak);
//! }
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod permission;
pub mod state;

#[cfg(test)]
mod testing;

pub use bridge::{AnalysisEvent, AnalysisPayload, ChannelSink, ErrorPayload, EventSink, PooledPayload, SinkError};
pub use config::{AnalysisConfig, ConfigError, RawAnalysisConfig, WindowFunction};
pub use engine::{AudioEngine, StartOutcome, StopOutcome};
pub use error::{EngineError, ErrorCode};
pub use permission::{PermissionOracle, PermissionState, StaticPermission};
pub use state::EngineState;

/// Install the default `env_logger` backend.
///
/// Safe to call more than once; a logger installed by the host wins.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
