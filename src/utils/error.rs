//! Error types and handling
//!
//! Recording-path errors (`RecorderError`) are internal to the session
//! lifecycle and only ever logged. Control-plane callers see `AppError`,
//! converted to an `ErrorResponse`.

use crate::config::ConfigError;
use crate::media::MediaError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Failures of a single recording session
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("producer {producer_id} cannot be consumed: {reason}")]
    CapabilityMismatch { producer_id: String, reason: String },

    #[error("relay transport error: {0}")]
    RelayTransport(String),

    #[error("filesystem error at {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {program}: {reason}")]
    ProcessSpawn { program: String, reason: String },

    #[error("process error: {0}")]
    Process(String),

    #[error("post-conversion failed: {0}")]
    PostConversion(String),

    #[error("session stopped before the recorder started")]
    Cancelled,
}

impl RecorderError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn spawn(program: impl Into<String>, reason: impl ToString) -> Self {
        Self::ProcessSpawn {
            program: program.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<MediaError> for RecorderError {
    fn from(error: MediaError) -> Self {
        Self::RelayTransport(error.to_string())
    }
}

pub type RecorderResult<T> = Result<T, RecorderError>;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecorderError),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response for control-plane callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Media(MediaError::NotFound(_)) | AppError::NotFound(_) => "NOT_FOUND",
            AppError::Media(_) => "MEDIA_ERROR",
            AppError::Recording(_) => "RECORDING_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

impl From<MediaError> for ErrorResponse {
    fn from(error: MediaError) -> Self {
        AppError::from(error).into()
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
