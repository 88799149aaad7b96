//! Payloads handed to the host bridge

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ErrorCode};

/// One processed frame, borrowed from the audio callback's buffers.
///
/// Sinks that need to keep the data past `emit` take an owned copy with
/// [`AnalysisEvent::to_payload`].
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisEvent<'a> {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: f64,
    pub rms: f32,
    pub peak: f32,
    pub frequency_bins: &'a [f32],
    /// Actual hardware sample rate
    pub sample_rate: f64,
    /// Mono frames in the captured buffer
    pub frame_length: usize,
    pub channel_count: usize,
}

impl AnalysisEvent<'_> {
    pub fn to_payload(&self) -> AnalysisPayload {
        self.to_payload_in(Vec::with_capacity(self.frequency_bins.len()))
    }

    /// Build the owned payload in a caller-provided bin buffer.
    ///
    /// Does not allocate when `bins` already has room for the spectrum.
    pub fn to_payload_in(&self, mut bins: Vec<f32>) -> AnalysisPayload {
        bins.clear();
        bins.extend_from_slice(self.frequency_bins);
        AnalysisPayload {
            timestamp_ms: self.timestamp_ms,
            rms: self.rms,
            peak: self.peak,
            frequency_bins: bins,
            sample_rate: self.sample_rate,
            frame_length: self.frame_length,
            channel_count: self.channel_count,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Owned analysis event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    pub timestamp_ms: f64,
    pub rms: f32,
    pub peak: f32,
    pub frequency_bins: Vec<f32>,
    pub sample_rate: f64,
    pub frame_length: usize,
    pub channel_count: usize,
}

/// Rejection sent back for a failed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl From<&EngineError> for ErrorPayload {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            cause: err.cause(),
        }
    }
}
