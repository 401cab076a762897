//! Per-instrument event-time watermark
//!
//! `watermark = max(observed event time) - allowed_lateness`. A window is
//! eligible for closure once its end is at or below the watermark. The
//! watermark never regresses: a trade older than the maximum seen so far
//! leaves it unchanged.
//!
//! Each partition owns one tracker, so instruments never hold each other
//! back.

use tracing::trace;

/// Tracks the watermark of one instrument stream.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    allowed_lateness_ms: i64,
    max_event_time: Option<i64>,
}

impl WatermarkTracker {
    /// `allowed_lateness_ms` is validated by configuration (>= 0).
    pub fn new(allowed_lateness_ms: i64) -> Self {
        Self {
            allowed_lateness_ms,
            max_event_time: None,
        }
    }

    /// Observe an event time.
    ///
    /// Returns the new watermark if it advanced, `None` otherwise.
    pub fn observe(&mut self, event_time_ms: i64) -> Option<i64> {
        match self.max_event_time {
            Some(max) if event_time_ms <= max => None,
            _ => {
                self.max_event_time = Some(event_time_ms);
                let watermark = self.current();
                trace!(event_time_ms, watermark, "Watermark advanced");
                watermark
            }
        }
    }

    /// Current watermark, `None` before the first event.
    pub fn current(&self) -> Option<i64> {
        self.max_event_time
            .map(|max| max.saturating_sub(self.allowed_lateness_ms))
    }

    /// Whether a window ending at `window_end_ms` has been passed by the
    /// watermark.
    pub fn has_passed(&self, window_end_ms: i64) -> bool {
        self.current().map_or(false, |watermark| window_end_ms <= watermark)
    }

    /// Largest event time observed so far.
    pub fn max_event_time(&self) -> Option<i64> {
        self.max_event_time
    }

    pub fn allowed_lateness_ms(&self) -> i64 {
        self.allowed_lateness_ms
    }
}
