//! Stream merging, trimming and frame capture with FFmpeg.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;
use vgrab_models::TrimWindow;

use crate::command::{FfmpegCommand, ProcessRunner};
use crate::config::MediaToolsConfig;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_output;
use crate::probe;

/// Audio codec for merged output; broadly playable.
const MERGE_AUDIO_CODEC: &str = "aac";

/// JPEG quality scale for screenshots (2 = near-best).
const SCREENSHOT_QUALITY: &str = "2";

/// Transcoder seam used by the pipeline.
#[async_trait]
pub trait MediaCombiner: Send + Sync {
    /// Mux a video-only and an audio-only file into one container.
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<()>;

    /// Copy `window` of `input` into `output`.
    async fn trim(&self, input: &Path, output: &Path, window: &TrimWindow) -> MediaResult<()>;

    /// Capture one frame at `timestamp` seconds as a JPEG.
    async fn screenshot(&self, input: &Path, output: &Path, timestamp: f64) -> MediaResult<()>;

    /// Container duration in seconds.
    async fn probe_duration(&self, input: &Path) -> MediaResult<f64>;
}

/// [`MediaCombiner`] backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegCombiner {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    runner: ProcessRunner,
}

impl FfmpegCombiner {
    pub fn new(tools: &MediaToolsConfig) -> Self {
        Self {
            ffmpeg: tools.ffmpeg_path.clone(),
            ffprobe: tools.ffprobe_path.clone(),
            runner: ProcessRunner::new().with_optional_timeout(tools.process_timeout),
        }
    }

    async fn run(&self, cmd: FfmpegCommand, output: &Path) -> MediaResult<u64> {
        self.runner.run(&cmd.into_spec(&self.ffmpeg)).await?;
        ensure_output(output).await
    }
}

/// FFmpeg invocation muxing separate video and audio streams.
pub fn merge_command(video: &Path, audio: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(video, output)
        .add_input(audio)
        .map("0:v:0")
        .map("1:a:0")
        .video_codec("copy")
        .audio_codec(MERGE_AUDIO_CODEC)
}

/// FFmpeg invocation copying a time range without re-encoding.
pub fn trim_command(input: &Path, output: &Path, window: &TrimWindow) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .seek(window.start())
        .duration(window.duration())
        .codec_copy()
}

/// FFmpeg invocation extracting a single JPEG frame.
pub fn screenshot_command(input: &Path, output: &Path, timestamp: f64) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .seek(timestamp)
        .single_frame()
        .output_arg("-q:v")
        .output_arg(SCREENSHOT_QUALITY)
}

#[async_trait]
impl MediaCombiner for FfmpegCombiner {
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<()> {
        let size = self
            .run(merge_command(video, audio, output), output)
            .await?;
        info!(output = %output.display(), size = size, "Merged video and audio");
        Ok(())
    }

    async fn trim(&self, input: &Path, output: &Path, window: &TrimWindow) -> MediaResult<()> {
        // Fail before spending a transcode on a window the input cannot satisfy
        let duration = self.probe_duration(input).await?;
        window.validate_against(duration)?;

        let size = self
            .run(trim_command(input, output, window), output)
            .await?;
        info!(
            output = %output.display(),
            start = window.start(),
            end = window.end(),
            size = size,
            "Trimmed clip"
        );
        Ok(())
    }

    async fn screenshot(&self, input: &Path, output: &Path, timestamp: f64) -> MediaResult<()> {
        if !timestamp.is_finite() || timestamp < 0.0 {
            return Err(MediaError::InvalidMedia(format!(
                "invalid screenshot timestamp {}",
                timestamp
            )));
        }

        self.run(screenshot_command(input, output, timestamp), output)
            .await?;
        info!(output = %output.display(), timestamp = timestamp, "Captured screenshot");
        Ok(())
    }

    async fn probe_duration(&self, input: &Path) -> MediaResult<f64> {
        probe::probe_duration(&self.runner, &self.ffprobe, input).await
    }
}
