//! Pipeline capability set.

use serde::{Deserialize, Serialize};

/// Optional pipeline steps, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Download separate video/audio streams and merge them
    pub merge_streams: bool,
    /// Retrieve the human-readable title
    pub with_title: bool,
    /// Fail the run when the title cannot be retrieved
    pub title_fetch_required: bool,
    /// Download the source's own thumbnail as cover image
    pub with_thumbnail: bool,
    /// Accept trim windows on requests
    pub with_trim: bool,
    /// Capture a screenshot as cover image
    pub with_screenshot: bool,
    /// Pipe the downloader straight into storage when nothing else needs a local file
    pub streaming_upload: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            merge_streams: true,
            with_title: true,
            title_fetch_required: false,
            with_thumbnail: false,
            with_trim: true,
            with_screenshot: true,
            streaming_upload: false,
        }
    }
}

impl Capabilities {
    /// Whether the primary media can bypass local disk for this request.
    ///
    /// Trimming and screenshots both need the media as a local file.
    pub fn streams_directly(&self, has_window: bool) -> bool {
        self.streaming_upload && !has_window && !self.with_screenshot
    }
}
