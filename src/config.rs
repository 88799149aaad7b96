//! Analysis configuration and validation
//!
//! `RawAnalysisConfig` is what the host bridge hands us. Every field is
//! optional and loosely typed so that out-of-range input reaches
//! [`validate`] and is rejected with a field-specific message instead of
//! failing somewhere in deserialization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

pub const FFT_SIZE_RANGE: RangeInclusive<i64> = 64..=16384;
pub const SAMPLE_RATE_RANGE: RangeInclusive<f64> = 8000.0..=96000.0;
pub const BUFFER_SIZE_RANGE: RangeInclusive<i64> = 256..=8192;
pub const CALLBACK_RATE_RANGE: RangeInclusive<f64> = 1.0..=120.0;
pub const SMOOTHING_FACTOR_RANGE: RangeInclusive<f64> = 0.0..=1.0;

/// Sentinel for `downsample_bins` meaning "emit the full n/2 spectrum"
pub const NO_DOWNSAMPLING: i64 = -1;

/// Smallest analysis frame the engine will size buffers for
pub const MIN_FRAME_SIZE: usize = 256;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid {field}: {value} is outside the valid range {range}")]
    OutOfRange {
        field: &'static str,
        value: String,
        range: String,
    },

    #[error("Invalid {field}: value must be a finite number")]
    NotFinite { field: &'static str },

    #[error("Invalid {field}: {value} must be a whole number")]
    NotInteger { field: &'static str, value: f64 },

    #[error("Invalid downsampleBins: {value} must be -1 or within [1, {max}] (fftSize / 2)")]
    DownsampleBins { value: i64, max: i64 },

    #[error("Malformed config: {0}")]
    Malformed(String),
}

/// Window applied before the FFT
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WindowFunction {
    #[default]
    Hann,
    /// Accepted for compatibility; analysis falls back to Hann
    Unsupported(String),
}

impl From<String> for WindowFunction {
    fn from(name: String) -> Self {
        if name.eq_ignore_ascii_case("hann") {
            Self::Hann
        } else {
            Self::Unsupported(name)
        }
    }
}

impl From<WindowFunction> for String {
    fn from(window: WindowFunction) -> Self {
        match window {
            WindowFunction::Hann => "hann".to_string(),
            WindowFunction::Unsupported(name) => name,
        }
    }
}

impl fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hann => f.write_str("hann"),
            Self::Unsupported(name) => f.write_str(name),
        }
    }
}

/// Validated analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    /// Requested FFT size; rounded up to a power of two when the context is built
    pub fft_size: usize,

    /// Requested hardware sample rate in Hz
    pub sample_rate: f64,

    /// Requested hardware buffer size in frames
    pub buffer_size: usize,

    /// Upper bound on processed frames per second
    pub callback_rate_hz: f64,

    pub emit_spectrum: bool,

    pub smoothing_enabled: bool,

    /// Weight toward the newest sample (0-1)
    pub smoothing_factor: f32,

    /// Output bin count, or -1 to emit all n/2 bins
    pub downsample_bins: i64,

    pub window_function: WindowFunction,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            sample_rate: 48000.0,
            buffer_size: 1024,
            callback_rate_hz: 30.0,
            emit_spectrum: true,
            smoothing_enabled: true,
            smoothing_factor: 0.5,
            downsample_bins: NO_DOWNSAMPLING,
            window_function: WindowFunction::Hann,
        }
    }
}

impl AnalysisConfig {
    /// Size `n` of the mono frame and the FFT for this config
    pub fn frame_size(&self) -> usize {
        let requested = if self.emit_spectrum {
            self.fft_size
        } else {
            self.buffer_size
        };
        requested.max(MIN_FRAME_SIZE).next_power_of_two()
    }

    /// Target bin count, or `None` when downsampling is disabled
    pub fn downsample_target(&self) -> Option<usize> {
        if self.downsample_bins == NO_DOWNSAMPLING {
            None
        } else {
            usize::try_from(self.downsample_bins).ok()
        }
    }
}

/// Unvalidated configuration as received from the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawAnalysisConfig {
    pub fft_size: Option<f64>,
    pub sample_rate: Option<f64>,
    pub buffer_size: Option<f64>,
    pub callback_rate_hz: Option<f64>,
    pub emit_spectrum: Option<bool>,
    pub smoothing_enabled: Option<bool>,
    pub smoothing_factor: Option<f64>,
    pub downsample_bins: Option<f64>,
    pub window_function: Option<String>,
}

impl RawAnalysisConfig {
    /// Parse a JSON object as sent by the bridge
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))
    }
}

impl From<&AnalysisConfig> for RawAnalysisConfig {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            fft_size: Some(config.fft_size as f64),
            sample_rate: Some(config.sample_rate),
            buffer_size: Some(config.buffer_size as f64),
            callback_rate_hz: Some(config.callback_rate_hz),
            emit_spectrum: Some(config.emit_spectrum),
            smoothing_enabled: Some(config.smoothing_enabled),
            smoothing_factor: Some(config.smoothing_factor as f64),
            downsample_bins: Some(config.downsample_bins as f64),
            window_function: Some(config.window_function.to_string()),
        }
    }
}

/// Validate `raw`, taking missing fields from `base`.
///
/// Either every field is accepted and a complete config is returned, or the
/// first offending field is reported and nothing is applied.
pub fn validate(raw: &RawAnalysisConfig, base: &AnalysisConfig) -> Result<AnalysisConfig, ConfigError> {
    let fft_size = check_int("fftSize", raw.fft_size.unwrap_or(base.fft_size as f64), &FFT_SIZE_RANGE)?;
    let sample_rate = check_float("sampleRate", raw.sample_rate.unwrap_or(base.sample_rate), &SAMPLE_RATE_RANGE)?;
    let buffer_size = check_int(
        "bufferSize",
        raw.buffer_size.unwrap_or(base.buffer_size as f64),
        &BUFFER_SIZE_RANGE,
    )?;
    let callback_rate_hz = check_float(
        "callbackRateHz",
        raw.callback_rate_hz.unwrap_or(base.callback_rate_hz),
        &CALLBACK_RATE_RANGE,
    )?;
    let smoothing_factor = check_float(
        "smoothingFactor",
        raw.smoothing_factor.unwrap_or(base.smoothing_factor as f64),
        &SMOOTHING_FACTOR_RANGE,
    )?;

    let downsample_bins = match raw.downsample_bins {
        Some(value) => integral("downsampleBins", value)?,
        None => base.downsample_bins,
    };
    if downsample_bins != NO_DOWNSAMPLING {
        let max = fft_size / 2;
        if downsample_bins <= 0 || downsample_bins > max {
            return Err(ConfigError::DownsampleBins {
                value: downsample_bins,
                max,
            });
        }
    }

    let window_function = match &raw.window_function {
        Some(name) => WindowFunction::from(name.clone()),
        None => base.window_function.clone(),
    };
    if let WindowFunction::Unsupported(name) = &window_function {
        log::warn!("Window function '{}' is not implemented, using hann", name);
    }

    Ok(AnalysisConfig {
        fft_size: fft_size as usize,
        sample_rate,
        buffer_size: buffer_size as usize,
        callback_rate_hz,
        emit_spectrum: raw.emit_spectrum.unwrap_or(base.emit_spectrum),
        smoothing_enabled: raw.smoothing_enabled.unwrap_or(base.smoothing_enabled),
        smoothing_factor: smoothing_factor as f32,
        downsample_bins,
        window_function,
    })
}

/// Whole-number check for fields the bridge may send as doubles
fn integral(field: &'static str, value: f64) -> Result<i64, ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NotFinite { field });
    }
    if value.fract() != 0.0 {
        return Err(ConfigError::NotInteger { field, value });
    }
    Ok(value as i64)
}

fn check_int(field: &'static str, value: f64, range: &RangeInclusive<i64>) -> Result<i64, ConfigError> {
    let int = integral(field, value)?;
    // The cast saturates, so compare back to catch values beyond i64.
    if range.contains(&int) && int as f64 == value {
        Ok(int)
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            range: format!("[{}, {}]", range.start(), range.end()),
        })
    }
}

fn check_float(field: &'static str, value: f64, range: &RangeInclusive<f64>) -> Result<f64, ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NotFinite { field });
    }
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            range: format!("[{}, {}]", range.start(), range.end()),
        })
    }
}
