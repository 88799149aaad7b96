//! Engine state shared between the control thread, callers and the audio callback

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::AnalysisConfig;

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EngineState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Smoothing parameters the audio callback reads every processed frame.
///
/// The factor is stored as raw f32 bits so `set_smoothing` can apply to a
/// running session without locking the callback.
#[derive(Debug)]
pub struct SmoothingParams {
    enabled: AtomicBool,
    factor_bits: AtomicU32,
}

impl SmoothingParams {
    pub fn new(enabled: bool, factor: f32) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            factor_bits: AtomicU32::new(factor.to_bits()),
        }
    }

    pub fn store(&self, enabled: bool, factor: f32) {
        self.factor_bits.store(factor.to_bits(), Ordering::Relaxed);
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn load(&self) -> (bool, f32) {
        let enabled = self.enabled.load(Ordering::Acquire);
        let factor = f32::from_bits(self.factor_bits.load(Ordering::Relaxed));
        (enabled, factor)
    }
}

/// State visible outside the control thread
pub struct SharedState {
    state: AtomicU8,

    /// Current configuration (last applied or stored)
    config: Mutex<AnalysisConfig>,

    /// Live smoothing parameters for the running session
    smoothing: SmoothingParams,
}

impl SharedState {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            state: AtomicU8::new(EngineState::Stopped as u8),
            smoothing: SmoothingParams::new(config.smoothing_enabled, config.smoothing_factor),
            config: Mutex::new(config),
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: EngineState) {
        log::debug!("Engine state -> {:?}", state);
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn config(&self) -> AnalysisConfig {
        self.config.lock().clone()
    }

    /// Replace the stored config and republish its smoothing parameters
    pub fn set_config(&self, config: AnalysisConfig) {
        self.smoothing
            .store(config.smoothing_enabled, config.smoothing_factor);
        *self.config.lock() = config;
    }

    pub fn smoothing(&self) -> &SmoothingParams {
        &self.smoothing
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(AnalysisConfig::default())
    }
}
