//! Pipeline error types.

use thiserror::Error;
use vgrab_media::MediaError;
use vgrab_models::{ErrorResponse, SourceUrlError, WindowError};
use vgrab_storage::StorageError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing credentials, tools or configuration; bad source URL
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("{message}")]
    Process {
        message: String,
        exit_code: Option<i32>,
        timeout: bool,
    },

    #[error("Output missing: {0}")]
    OutputMissing(String),

    #[error("Invalid trim window: {0}")]
    InvalidWindow(#[from] WindowError),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process {
            message: msg.into(),
            exit_code: None,
            timeout: false,
        }
    }

    /// Stable kind string reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Precondition(_) => "precondition",
            Self::Process { .. } => "process",
            Self::OutputMissing(_) => "output_missing",
            Self::InvalidWindow(_) => "invalid_window",
            Self::Upload(_) => "upload",
            Self::Cache(_) => "cache",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if error is retryable.
    ///
    /// Only transient failures restart the miss path; a structurally invalid
    /// request or a missing precondition fails immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Process { .. } | Self::OutputMissing(_) | Self::Upload(_)
        )
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error_kind: self.kind().to_string(),
            detail: self.to_string(),
        }
    }
}

impl From<MediaError> for PipelineError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::ToolNotFound { .. } | MediaError::MissingCredentials(_) => {
                Self::Precondition(err.to_string())
            }
            MediaError::ProcessFailed { exit_code, .. } => Self::Process {
                message: err.to_string(),
                exit_code,
                timeout: false,
            },
            MediaError::Timeout { .. } => Self::Process {
                message: err.to_string(),
                exit_code: None,
                timeout: true,
            },
            MediaError::Cancelled => Self::Cancelled,
            MediaError::OutputMissing(path) => Self::OutputMissing(path.display().to_string()),
            MediaError::InvalidWindow(window) => Self::InvalidWindow(window),
            MediaError::InvalidMedia(_)
            | MediaError::Io(_)
            | MediaError::JsonParse(_)
            | MediaError::Internal(_) => Self::process(err.to_string()),
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConfigError(msg) => Self::Precondition(msg),
            StorageError::UploadFailed(_) | StorageError::DeleteFailed(_) => {
                Self::Upload(err.to_string())
            }
            StorageError::Cache(_) | StorageError::Io(_) | StorageError::Json(_) => {
                Self::Cache(err.to_string())
            }
        }
    }
}

impl From<SourceUrlError> for PipelineError {
    fn from(err: SourceUrlError) -> Self {
        Self::Precondition(err.to_string())
    }
}
