//! Filesystem postconditions for tool outputs.

use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Verify a tool produced a non-empty file at `path`.
///
/// A zero exit status is not trusted on its own: a missing or empty file is
/// reported as [`MediaError::OutputMissing`]. Returns the file size.
pub async fn ensure_output(path: impl AsRef<Path>) -> MediaResult<u64> {
    let path = path.as_ref();

    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() && metadata.len() > 0 => {
            debug!(path = %path.display(), size = metadata.len(), "Output verified");
            Ok(metadata.len())
        }
        Ok(_) => Err(MediaError::OutputMissing(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(MediaError::OutputMissing(path.to_path_buf()))
        }
        Err(e) => Err(MediaError::from(e)),
    }
}
