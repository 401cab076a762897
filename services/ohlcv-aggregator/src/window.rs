//! Tumbling window assignment
//!
//! Window boundaries are aligned to the Unix epoch: a window of duration
//! `d` starts at every multiple of `d`. Assignment is a pure function of
//! `(event_time_ms, duration_ms)`.

use std::fmt;

use crate::error::ConfigError;

/// Map an event time to the start of its window (floor to a multiple of
/// `duration_ms`). `duration_ms` must be positive.
pub fn assign(event_time_ms: i64, duration_ms: i64) -> i64 {
    event_time_ms.div_euclid(duration_ms) * duration_ms
}

/// A validated, positive window duration in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowDuration(i64);

impl WindowDuration {
    /// Rejects zero and negative durations.
    pub fn from_millis(duration_ms: i64) -> Result<Self, ConfigError> {
        if duration_ms <= 0 {
            return Err(ConfigError::InvalidWindowDuration(duration_ms));
        }
        Ok(Self(duration_ms))
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Start of the window containing `event_time_ms`.
    pub fn window_start(&self, event_time_ms: i64) -> i64 {
        assign(event_time_ms, self.0)
    }

    /// Exclusive end of the window starting at `window_start_ms`.
    pub fn window_end(&self, window_start_ms: i64) -> i64 {
        window_start_ms.saturating_add(self.0)
    }
}

impl fmt::Display for WindowDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
