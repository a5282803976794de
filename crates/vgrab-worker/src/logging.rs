//! Structured run logging utilities.
//!
//! Provides consistent, structured logging for pipeline runs with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use vgrab_models::ContentKey;

use crate::pipeline::PipelineStage;

/// Run logger for structured logging with consistent formatting.
///
/// Every event carries the content key and the run ID.
#[derive(Debug, Clone)]
pub struct PipelineLogger {
    key: String,
    run_id: String,
}

impl PipelineLogger {
    /// Create a new logger for one run of `key`.
    pub fn new(key: &ContentKey, run_id: &str) -> Self {
        Self {
            key: key.to_string(),
            run_id: run_id.to_string(),
        }
    }

    /// Log the start of a run.
    pub fn log_start(&self, message: &str) {
        info!(
            key = %self.key,
            run_id = %self.run_id,
            "Run started: {}", message
        );
    }

    /// Log a state transition.
    pub fn log_stage(&self, stage: PipelineStage, attempt: u32) {
        info!(
            key = %self.key,
            run_id = %self.run_id,
            stage = stage.as_str(),
            attempt = attempt,
            "Stage: {}", stage
        );
    }

    /// Log a warning during the run.
    pub fn log_warning(&self, message: &str) {
        warn!(
            key = %self.key,
            run_id = %self.run_id,
            "Run warning: {}", message
        );
    }

    /// Log an error during the run.
    pub fn log_error(&self, message: &str) {
        error!(
            key = %self.key,
            run_id = %self.run_id,
            "Run error: {}", message
        );
    }

    /// Log the completion of a run.
    pub fn log_completion(&self, message: &str) {
        info!(
            key = %self.key,
            run_id = %self.run_id,
            "Run completed: {}", message
        );
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Create a tracing span for this run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "run",
            key = %self.key,
            run_id = %self.run_id
        )
    }
}
