//! Download-transcode-cache pipeline.
//!
//! This crate provides:
//! - The pipeline orchestrator and its stage machine
//! - Whole-path retry with exponential backoff
//! - Scoped temporary assets per run
//! - Per-key single-flight locking
//! - Configuration, structured logging and metrics

pub mod config;
pub mod error;
pub mod key_lock;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod temp_assets;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use key_lock::{KeyGuard, KeyLocks};
pub use logging::PipelineLogger;
pub use pipeline::{Pipeline, PipelineStage, RunId};
pub use retry::{retry_async, RetryConfig, RetryResult};
pub use temp_assets::TempAssets;
