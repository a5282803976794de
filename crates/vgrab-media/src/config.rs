//! External tool configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MediaError, MediaResult};

/// Locations of the external binaries and the per-invocation timeout.
#[derive(Debug, Clone)]
pub struct MediaToolsConfig {
    /// yt-dlp executable
    pub ytdlp_path: PathBuf,
    /// ffmpeg executable
    pub ffmpeg_path: PathBuf,
    /// ffprobe executable
    pub ffprobe_path: PathBuf,
    /// Kill any single tool invocation running longer than this
    pub process_timeout: Option<Duration>,
}

impl Default for MediaToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            process_timeout: Some(Duration::from_secs(1800)),
        }
    }
}

impl MediaToolsConfig {
    /// Create config from environment variables.
    ///
    /// `PROCESS_TIMEOUT_SECS=0` disables the timeout.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ytdlp_path: std::env::var("YTDLP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ytdlp_path),
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: std::env::var("FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffprobe_path),
            process_timeout: match std::env::var("PROCESS_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
            {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.process_timeout,
            },
        }
    }

    /// Check every configured tool resolves to an executable.
    pub fn check_tools(&self) -> MediaResult<()> {
        for path in [&self.ytdlp_path, &self.ffmpeg_path, &self.ffprobe_path] {
            which::which(path).map_err(|_| MediaError::ToolNotFound {
                tool: path.display().to_string(),
            })?;
        }
        Ok(())
    }
}
