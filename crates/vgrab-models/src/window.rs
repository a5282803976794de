//! Trim window bounds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for structurally invalid trim windows.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowError {
    #[error("trim bounds must be finite numbers")]
    NotFinite,

    #[error("trim start {0} is negative")]
    NegativeStart(f64),

    #[error("trim start {start} must be before end {end}")]
    Empty { start: f64, end: f64 },

    #[error("trim end {end} exceeds media duration {duration}")]
    BeyondDuration { end: f64, duration: f64 },

    #[error("trimStart and trimEnd must be given together")]
    Incomplete,
}

/// A `(start, end)` pair in seconds bounding a sub-clip.
///
/// Construction guarantees `0 <= start < end`; the upper bound against the
/// source duration is checked with [`TrimWindow::validate_against`] once the
/// media has been probed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimWindow {
    start: f64,
    end: f64,
}

impl TrimWindow {
    pub fn new(start: f64, end: f64) -> Result<Self, WindowError> {
        if !start.is_finite() || !end.is_finite() {
            return Err(WindowError::NotFinite);
        }
        if start < 0.0 {
            return Err(WindowError::NegativeStart(start));
        }
        if start >= end {
            return Err(WindowError::Empty { start, end });
        }
        Ok(Self { start, end })
    }

    /// Build a window from millisecond offsets.
    pub fn from_millis(start_ms: u64, end_ms: u64) -> Result<Self, WindowError> {
        Self::new(start_ms as f64 / 1000.0, end_ms as f64 / 1000.0)
    }

    /// Build an optional window from optional bounds; both or neither.
    pub fn from_bounds(start: Option<f64>, end: Option<f64>) -> Result<Option<Self>, WindowError> {
        match (start, end) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) => Self::new(start, end).map(Some),
            _ => Err(WindowError::Incomplete),
        }
    }

    /// Check the window fits inside media of the given duration.
    pub fn validate_against(&self, duration: f64) -> Result<(), WindowError> {
        if self.end > duration {
            return Err(WindowError::BeyondDuration {
                end: self.end,
                duration,
            });
        }
        Ok(())
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Absolute timestamp halfway through the window.
    pub fn midpoint(&self) -> f64 {
        self.start + self.duration() / 2.0
    }
}
