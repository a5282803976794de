//! FFprobe duration probing.

use serde::Deserialize;
use std::path::Path;

use crate::command::{CommandSpec, ProcessRunner};
use crate::error::{MediaError, MediaResult};

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Probe a media file's container duration in seconds.
pub async fn probe_duration(
    runner: &ProcessRunner,
    ffprobe: impl AsRef<Path>,
    path: impl AsRef<Path>,
) -> MediaResult<f64> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::OutputMissing(path.to_path_buf()));
    }

    let spec = CommandSpec::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .path_arg(path);

    let stdout = runner.run(&spec).await?;
    parse_duration(&stdout)
}

/// Parse the duration out of `ffprobe -of json` output.
fn parse_duration(json: &str) -> MediaResult<f64> {
    let probe: FfprobeOutput = serde_json::from_str(json)?;

    let duration = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .ok_or_else(|| MediaError::InvalidMedia("no duration reported".to_string()))?;

    if !duration.is_finite() || duration <= 0.0 {
        return Err(MediaError::InvalidMedia(format!(
            "unusable duration {}",
            duration
        )));
    }

    Ok(duration)
}
