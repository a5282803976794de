//! Media download using yt-dlp.
//!
//! This module provides the cookie-jar precondition checks and the
//! [`MediaFetcher`] seam with its yt-dlp implementation: separate best video
//! and audio streams, a single combined stream, title and thumbnail
//! retrieval, and a stdout stream for pipelined uploads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::{CommandSpec, MediaStream, ProcessRunner};
use crate::config::MediaToolsConfig;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_output;

/// Minimum size for a valid cookies file (bytes).
/// A real Netscape cookies file is at least ~50 bytes.
const MIN_COOKIES_FILE_SIZE: u64 = 50;

/// Best video-only representation, preferring MP4.
const VIDEO_FORMAT: &str = "bestvideo[ext=mp4]/bestvideo";

/// Best audio-only representation, preferring M4A.
const AUDIO_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio";

/// Best single file carrying both video and audio.
const COMBINED_FORMAT: &str = "b";

/// File name prefix of the per-invocation cookie jar copies.
const COOKIE_JAR_PREFIX: &str = "cookies";

/// Validate that a cookies file appears to be in Netscape format.
///
/// Netscape cookies files either start with "# Netscape HTTP Cookie File"
/// or contain tab-separated lines with domain entries.
fn is_valid_netscape_cookies(content: &str) -> bool {
    if content.starts_with("# Netscape HTTP Cookie File")
        || content.starts_with("# HTTP Cookie File")
    {
        return true;
    }

    // domain \t flag \t path \t secure \t expiry \t name [\t value]
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| line.split('\t').count() >= 6)
}

/// Check the downloader's cookie jar exists, is non-empty and is a
/// Netscape cookie file.
pub async fn validate_cookie_jar(path: impl AsRef<Path>) -> MediaResult<()> {
    let path = path.as_ref();

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MediaError::missing_credentials(format!(
                "cookies file not found at {}",
                path.display()
            )));
        }
        Err(e) => return Err(MediaError::from(e)),
    };

    if !metadata.is_file() || metadata.len() < MIN_COOKIES_FILE_SIZE {
        return Err(MediaError::missing_credentials(format!(
            "cookies file {} is empty or too small ({} bytes)",
            path.display(),
            metadata.len()
        )));
    }

    let content = tokio::fs::read_to_string(path).await?;
    if !is_valid_netscape_cookies(&content) {
        return Err(MediaError::missing_credentials(format!(
            "cookies file {} is not in Netscape format",
            path.display()
        )));
    }

    debug!(path = %path.display(), "Cookies file validated");
    Ok(())
}

/// Copy the cookie jar into a run directory as `cookies_{purpose}.txt`.
///
/// yt-dlp writes refreshed cookies back to the jar it is given when it
/// exits, so every concurrent invocation needs a copy of its own.
pub async fn prepare_cookie_jar(
    source: impl AsRef<Path>,
    run_dir: impl AsRef<Path>,
    purpose: &str,
) -> MediaResult<PathBuf> {
    let dest = run_dir
        .as_ref()
        .join(format!("{}_{}.txt", COOKIE_JAR_PREFIX, purpose));
    tokio::fs::copy(source.as_ref(), &dest).await?;
    Ok(dest)
}

/// One path per separately downloaded stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPaths {
    pub video: PathBuf,
    pub audio: PathBuf,
}

/// Downloader seam used by the pipeline.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download best video-only and audio-only streams to `dest`.
    ///
    /// The two downloads run at once, each with its own jar from `cookies`.
    async fn fetch_streams(
        &self,
        source_url: &str,
        dest: &StreamPaths,
        cookies: &StreamPaths,
    ) -> MediaResult<()>;

    /// Download the best single combined stream to `output`.
    async fn fetch_combined(
        &self,
        source_url: &str,
        output: &Path,
        cookies: &Path,
    ) -> MediaResult<()>;

    /// Retrieve the human-readable title without downloading media.
    async fn fetch_title(&self, source_url: &str, cookies: &Path) -> MediaResult<String>;

    /// Download the source's thumbnail as a JPEG to `output`.
    async fn fetch_thumbnail(
        &self,
        source_url: &str,
        output: &Path,
        cookies: &Path,
    ) -> MediaResult<()>;

    /// Start a combined download written to standard output.
    async fn open_stream(&self, source_url: &str, cookies: &Path) -> MediaResult<MediaStream>;
}

/// [`MediaFetcher`] backed by the yt-dlp binary.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    ytdlp: PathBuf,
    runner: ProcessRunner,
}

impl YtDlpFetcher {
    pub fn new(tools: &MediaToolsConfig) -> Self {
        Self {
            ytdlp: tools.ytdlp_path.clone(),
            runner: ProcessRunner::new().with_optional_timeout(tools.process_timeout),
        }
    }

    /// Flags shared by every invocation.
    fn base_command(&self, cookies: &Path) -> CommandSpec {
        CommandSpec::new(&self.ytdlp)
            .args(["--no-playlist", "--no-progress", "--force-overwrites"])
            .arg("--cookies")
            .path_arg(cookies)
    }

    async fn download_format(
        &self,
        source_url: &str,
        format: &str,
        output: &Path,
        cookies: &Path,
    ) -> MediaResult<()> {
        let spec = self
            .base_command(cookies)
            .arg("-f")
            .arg(format)
            .arg("-o")
            .path_arg(output)
            .arg("--")
            .arg(source_url);

        self.runner.run(&spec).await?;

        let size = ensure_output(output).await?;
        info!(
            output = %output.display(),
            format = format,
            size_mb = size as f64 / (1024.0 * 1024.0),
            "Downloaded stream"
        );
        Ok(())
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch_streams(
        &self,
        source_url: &str,
        dest: &StreamPaths,
        cookies: &StreamPaths,
    ) -> MediaResult<()> {
        info!(url = %source_url, "Downloading video and audio streams");

        tokio::try_join!(
            self.download_format(source_url, VIDEO_FORMAT, &dest.video, &cookies.video),
            self.download_format(source_url, AUDIO_FORMAT, &dest.audio, &cookies.audio),
        )?;

        Ok(())
    }

    async fn fetch_combined(
        &self,
        source_url: &str,
        output: &Path,
        cookies: &Path,
    ) -> MediaResult<()> {
        info!(url = %source_url, "Downloading combined stream");
        self.download_format(source_url, COMBINED_FORMAT, output, cookies)
            .await
    }

    async fn fetch_title(&self, source_url: &str, cookies: &Path) -> MediaResult<String> {
        let spec = self
            .base_command(cookies)
            .args(["--skip-download", "--print", "title"])
            .arg("--")
            .arg(source_url);

        let stdout = self.runner.run(&spec).await?;
        let title = stdout.trim();
        if title.is_empty() {
            return Err(MediaError::InvalidMedia(
                "downloader printed an empty title".to_string(),
            ));
        }
        Ok(title.to_string())
    }

    async fn fetch_thumbnail(
        &self,
        source_url: &str,
        output: &Path,
        cookies: &Path,
    ) -> MediaResult<()> {
        // yt-dlp appends the converted extension itself
        let stem = output.with_extension("");
        let spec = self
            .base_command(cookies)
            .args([
                "--skip-download",
                "--write-thumbnail",
                "--convert-thumbnails",
                "jpg",
            ])
            .arg("-o")
            .path_arg(&stem)
            .arg("--")
            .arg(source_url);

        self.runner.run(&spec).await?;
        ensure_output(output).await?;
        Ok(())
    }

    async fn open_stream(&self, source_url: &str, cookies: &Path) -> MediaResult<MediaStream> {
        let spec = self
            .base_command(cookies)
            .arg("-f")
            .arg(COMBINED_FORMAT)
            .args(["-o", "-"])
            .arg("--")
            .arg(source_url);

        self.runner.spawn_stdout(&spec)
    }
}
