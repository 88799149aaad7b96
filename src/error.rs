//! Error taxonomy reported through the start/stop result channel

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use thiserror::Error;

use crate::config::ConfigError;

type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

/// Machine-readable error code handed to the host bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidConfig,
    PermissionDenied,
    SessionError,
    HardwareFormatError,
    FftSetupFailed,
}

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Audio session error: {message}")]
    Session {
        message: String,
        #[source]
        cause: Option<BoxedCause>,
    },

    #[error("Unsupported hardware format: {message}")]
    HardwareFormat {
        message: String,
        #[source]
        cause: Option<BoxedCause>,
    },

    #[error("FFT setup failed: {0}")]
    FftSetup(String),
}

impl EngineError {
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
            cause: None,
        }
    }

    pub fn session_caused_by<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Session {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn hardware_format(message: impl Into<String>) -> Self {
        Self::HardwareFormat {
            message: message.into(),
            cause: None,
        }
    }

    pub fn hardware_format_caused_by<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::HardwareFormat {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::PermissionDenied => ErrorCode::PermissionDenied,
            Self::Session { .. } => ErrorCode::SessionError,
            Self::HardwareFormat { .. } => ErrorCode::HardwareFormatError,
            Self::FftSetup(_) => ErrorCode::FftSetupFailed,
        }
    }

    /// Underlying platform cause, if the backend reported one
    pub fn cause(&self) -> Option<String> {
        self.source().map(|e| e.to_string())
    }
}
