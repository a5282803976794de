//! Prometheus metrics for the pipeline.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "vgrab_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "vgrab_cache_misses_total";

    // Run metrics
    pub const ATTEMPTS_TOTAL: &str = "vgrab_attempts_total";
    pub const RUNS_COMPLETED_TOTAL: &str = "vgrab_runs_completed_total";
    pub const RUNS_FAILED_TOTAL: &str = "vgrab_runs_failed_total";
    pub const RUN_DURATION_SECONDS: &str = "vgrab_run_duration_seconds";

    // Stage metrics
    pub const STAGE_DURATION_SECONDS: &str = "vgrab_stage_duration_seconds";
}

/// Record a cache hit.
pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record one attempt of the miss path.
pub fn record_attempt(attempt: u32) {
    let labels = [("attempt", attempt.to_string())];
    counter!(names::ATTEMPTS_TOTAL, &labels).increment(1);
}

/// Record a completed run.
pub fn record_completed(duration_secs: f64) {
    counter!(names::RUNS_COMPLETED_TOTAL).increment(1);
    histogram!(names::RUN_DURATION_SECONDS).record(duration_secs);
}

/// Record a failed run by error kind.
pub fn record_failed(kind: &'static str) {
    let labels = [("kind", kind)];
    counter!(names::RUNS_FAILED_TOTAL, &labels).increment(1);
}

/// Record time spent in a stage.
pub fn record_stage_duration(stage: &'static str, duration_secs: f64) {
    let labels = [("stage", stage)];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}
