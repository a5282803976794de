//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;
use vgrab_models::WindowError;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while driving the external tools.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{tool} not found")]
    ToolNotFound { tool: String },

    #[error("{tool} failed with exit code {exit_code:?}: {message}")]
    ProcessFailed {
        tool: String,
        message: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    #[error("{tool} timed out after {secs} seconds")]
    Timeout { tool: String, secs: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Expected output missing or empty: {0}")]
    OutputMissing(PathBuf),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid trim window: {0}")]
    InvalidWindow(#[from] WindowError),

    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create a process failure error.
    pub fn process_failed(
        tool: impl Into<String>,
        message: impl Into<String>,
        exit_code: Option<i32>,
        stderr: Option<String>,
    ) -> Self {
        Self::ProcessFailed {
            tool: tool.into(),
            message: message.into(),
            exit_code,
            stderr,
        }
    }

    /// Create a missing credentials error.
    pub fn missing_credentials(message: impl Into<String>) -> Self {
        Self::MissingCredentials(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
