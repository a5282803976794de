//! Transport-independent request/response envelopes.

use serde::{Deserialize, Serialize};

use crate::entry::CacheEntry;
use crate::window::{TrimWindow, WindowError};

/// A pipeline request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_end: Option<f64>,
}

impl PipelineRequest {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            trim_start: None,
            trim_end: None,
        }
    }

    pub fn with_trim(mut self, start: f64, end: f64) -> Self {
        self.trim_start = Some(start);
        self.trim_end = Some(end);
        self
    }

    /// Parse the optional trim bounds.
    pub fn trim_window(&self) -> Result<Option<TrimWindow>, WindowError> {
        TrimWindow::from_bounds(self.trim_start, self.trim_end)
    }
}

/// Successful pipeline response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResponse {
    pub media_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_reference: Option<String>,
}

impl From<&CacheEntry> for PipelineResponse {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            media_reference: entry.media.url.clone(),
            title: entry.title.clone(),
            cover_reference: entry.cover.as_ref().map(|c| c.url.clone()),
        }
    }
}

/// Failure response: error kind plus underlying message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_kind: String,
    pub detail: String,
}
