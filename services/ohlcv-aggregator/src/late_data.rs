//! Late-data classification
//!
//! Every incoming trade lands in exactly one class:
//!
//! | class          | condition                                              | action  |
//! |----------------|--------------------------------------------------------|---------|
//! | `OnTime`       | event time ≥ max event time seen by the partition      | fold    |
//! | `LateAccepted` | behind the frontier, window end still above watermark,  | fold    |
//! |                | or window end passed but the window is still open      |         |
//! | `LateDropped`  | window end ≤ watermark and the window is not open      | drop    |
//!
//! Dropped trades never touch an emitted candle: the finalizer removes a
//! window as soon as the watermark passes its end, and the watermark never
//! regresses, so a finalized window can never be reopened.

use crate::watermark::WatermarkTracker;

/// Classification of one incoming trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeClassification {
    OnTime,
    LateAccepted,
    LateDropped,
}

impl TradeClassification {
    /// Whether the trade should be folded into its window.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, TradeClassification::LateDropped)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TradeClassification::OnTime => "on_time",
            TradeClassification::LateAccepted => "late_accepted",
            TradeClassification::LateDropped => "late_dropped",
        }
    }
}

/// Classify a trade against the partition's watermark.
///
/// Must be evaluated before the trade advances the watermark.
pub fn classify(
    event_time_ms: i64,
    window_end_ms: i64,
    window_is_open: bool,
    watermark: &WatermarkTracker,
) -> TradeClassification {
    if watermark.has_passed(window_end_ms) {
        if window_is_open {
            return TradeClassification::LateAccepted;
        }
        return TradeClassification::LateDropped;
    }

    match watermark.max_event_time() {
        Some(max) if event_time_ms < max => TradeClassification::LateAccepted,
        _ => TradeClassification::OnTime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;

    #[test]
    fn test_first_trade_is_on_time() {
        let tracker = WatermarkTracker::new(0);
        assert_eq!(classify(1_000, MINUTE, false, &tracker), TradeClassification::OnTime);
    }

    #[test]
    fn test_trade_at_frontier_is_on_time() {
        let mut tracker = WatermarkTracker::new(0);
        tracker.observe(30_000);

        assert_eq!(classify(30_000, MINUTE, true, &tracker), TradeClassification::OnTime);
        assert_eq!(classify(45_000, MINUTE, true, &tracker), TradeClassification::OnTime);
    }

    #[test]
    fn test_out_of_order_within_open_window_is_late_accepted() {
        let mut tracker = WatermarkTracker::new(0);
        tracker.observe(30_000);

        let class = classify(10_000, MINUTE, true, &tracker);
        assert_eq!(class, TradeClassification::LateAccepted);
        assert!(class.is_accepted());
    }

    #[test]
    fn test_trade_for_finalized_window_is_dropped() {
        let mut tracker = WatermarkTracker::new(0);
        tracker.observe(61_000);

        let class = classify(500, MINUTE, false, &tracker);
        assert_eq!(class, TradeClassification::LateDropped);
        assert!(!class.is_accepted());
    }

    #[test]
    fn test_lateness_tolerance_keeps_previous_window_admissible() {
        let mut tracker = WatermarkTracker::new(10_000);
        tracker.observe(65_000); // watermark 55_000

        // Window [0, 60s) has not been passed yet
        assert_eq!(
            classify(59_000, MINUTE, false, &tracker),
            TradeClassification::LateAccepted
        );

        tracker.observe(70_000); // watermark 60_000
        assert_eq!(
            classify(59_000, MINUTE, false, &tracker),
            TradeClassification::LateDropped
        );
    }

    #[test]
    fn test_passed_but_open_window_is_folded() {
        let mut tracker = WatermarkTracker::new(0);
        tracker.observe(61_000);

        assert_eq!(
            classify(59_000, MINUTE, true, &tracker),
            TradeClassification::LateAccepted
        );
    }
}
