//! yt-dlp and FFmpeg CLI wrappers.
//!
//! This crate provides:
//! - An argument-vector process runner with stderr forwarding, timeout and cancellation
//! - Cookie-jar preconditions for the downloader
//! - Stream download, title and thumbnail retrieval via yt-dlp
//! - Merge, trim, screenshot and duration probing via FFmpeg/FFprobe
//! - Output-file postcondition checks

pub mod combine;
pub mod command;
pub mod config;
pub mod download;
pub mod error;
pub mod fs_utils;
pub mod probe;

pub use combine::{FfmpegCombiner, MediaCombiner};
pub use command::{CommandSpec, FfmpegCommand, MediaStream, ProcessRunner, StreamDeadline};
pub use config::MediaToolsConfig;
pub use download::{
    prepare_cookie_jar, validate_cookie_jar, MediaFetcher, StreamPaths, YtDlpFetcher,
};
pub use error::{MediaError, MediaResult};
pub use fs_utils::ensure_output;
pub use probe::probe_duration;
