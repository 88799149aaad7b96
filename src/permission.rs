//! Microphone permission oracle
//!
//! The host owns the actual OS permission prompt. The engine only needs to
//! know whether capture is allowed and, when the answer is not known yet, to
//! ask for it once.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    Undetermined,
}

/// Source of microphone permission state
pub trait PermissionOracle: Send + Sync {
    /// Current permission state without prompting
    fn status(&self) -> PermissionState;

    /// Prompt for permission and return the user's answer
    fn request(&self) -> PermissionState;
}

/// Fixed permission answer, for platforms without a permission model
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub PermissionState);

impl StaticPermission {
    pub fn granted() -> Self {
        Self(PermissionState::Granted)
    }
}

impl PermissionOracle for StaticPermission {
    fn status(&self) -> PermissionState {
        self.0
    }

    fn request(&self) -> PermissionState {
        self.0
    }
}

/// Resolve permission before touching the capture hardware
pub fn ensure_permission(oracle: &dyn PermissionOracle) -> Result<(), EngineError> {
    match oracle.status() {
        PermissionState::Granted => Ok(()),
        PermissionState::Denied => Err(EngineError::PermissionDenied),
        PermissionState::Undetermined => {
            log::info!("Microphone permission undetermined, requesting");
            match oracle.request() {
                PermissionState::Granted => Ok(()),
                state => {
                    log::warn!("Microphone permission request answered {:?}", state);
                    Err(EngineError::PermissionDenied)
                }
            }
        }
    }
}
