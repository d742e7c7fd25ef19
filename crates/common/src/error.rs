//! Error types shared across liveproof crates.

use std::path::PathBuf;

/// Top-level error type for liveproof operations.
#[derive(Debug, thiserror::Error)]
pub enum LiveproofError {
    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Recording error: {message}")]
    Recording { message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error("Comparison error: {message}")]
    Comparison { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Camera or microphone permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Capture device unavailable: {message}")]
    DeviceUnavailable { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using LiveproofError.
pub type LiveproofResult<T> = Result<T, LiveproofError>;

impl LiveproofError {
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn recording(msg: impl Into<String>) -> Self {
        Self::Recording {
            message: msg.into(),
        }
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session {
            message: msg.into(),
        }
    }

    pub fn comparison(msg: impl Into<String>) -> Self {
        Self::Comparison {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: msg.into(),
        }
    }

    pub fn device_unavailable(msg: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            message: msg.into(),
        }
    }
}
