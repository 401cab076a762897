//! Per-instrument aggregation state machine
//!
//! A `PartitionAggregator` owns every piece of mutable state for one
//! instrument: the accumulator store and the watermark. It is driven
//! strictly sequentially by a single task, so no locking is needed.
//!
//! Processing one trade:
//!
//! ```text
//! trade ─► assign window ─► classify ─┬─► drop (LateDropped)
//!                                     └─► upsert ─► advance watermark ─► finalize
//! ```
//!
//! Window lifecycle: `NotExist → Open → Finalized`, or `Open →
//! FlushedOnShutdown` via [`PartitionAggregator::flush`].

use tracing::{debug, warn};
use types::candle::Candle;
use types::ids::InstrumentId;
use types::trade::TradeEvent;

use crate::accumulator::{AccumulatorStore, Upsert};
use crate::finalizer::Finalizer;
use crate::late_data::{classify, TradeClassification};
use crate::watermark::WatermarkTracker;
use crate::window::WindowDuration;

/// Result of processing one trade.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub classification: TradeClassification,
    /// Candles closed by the watermark advance this trade caused.
    pub finalized: Vec<Candle>,
}

/// Counters for one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionStats {
    pub trades_processed: u64,
    pub on_time: u64,
    pub late_accepted: u64,
    pub late_dropped: u64,
    pub windows_opened: u64,
    pub candles_finalized: u64,
    pub candles_flushed: u64,
}

/// Aggregation state for a single instrument.
#[derive(Debug)]
pub struct PartitionAggregator {
    instrument_id: InstrumentId,
    duration: WindowDuration,
    store: AccumulatorStore,
    watermark: WatermarkTracker,
    finalizer: Finalizer,
    stats: PartitionStats,
}

impl PartitionAggregator {
    pub fn new(
        instrument_id: InstrumentId,
        duration: WindowDuration,
        allowed_lateness_ms: i64,
    ) -> Self {
        Self {
            finalizer: Finalizer::new(instrument_id.clone()),
            instrument_id,
            duration,
            store: AccumulatorStore::new(duration),
            watermark: WatermarkTracker::new(allowed_lateness_ms),
            stats: PartitionStats::default(),
        }
    }

    /// Process one trade of this partition's instrument.
    pub fn process(&mut self, trade: &TradeEvent) -> ProcessOutcome {
        debug_assert_eq!(trade.instrument_id, self.instrument_id);
        self.stats.trades_processed += 1;

        let window_start_ms = self.duration.window_start(trade.event_time_ms);
        let window_end_ms = self.duration.window_end(window_start_ms);
        let classification = classify(
            trade.event_time_ms,
            window_end_ms,
            self.store.contains(window_start_ms),
            &self.watermark,
        );

        match classification {
            TradeClassification::LateDropped => {
                self.stats.late_dropped += 1;
                warn!(
                    instrument = %self.instrument_id,
                    event_time_ms = trade.event_time_ms,
                    window_start_ms,
                    watermark = ?self.watermark.current(),
                    "Late trade dropped, window already finalized"
                );
                return ProcessOutcome {
                    classification,
                    finalized: Vec::new(),
                };
            }
            TradeClassification::LateAccepted => self.stats.late_accepted += 1,
            TradeClassification::OnTime => self.stats.on_time += 1,
        }

        if self.store.upsert(window_start_ms, trade) == Upsert::Created {
            self.stats.windows_opened += 1;
            debug!(instrument = %self.instrument_id, window_start_ms, "Window opened");
        }

        let finalized = match self.watermark.observe(trade.event_time_ms) {
            Some(watermark) => self.finalizer.finalize_up_to(&mut self.store, watermark),
            None => Vec::new(),
        };
        self.stats.candles_finalized += finalized.len() as u64;

        ProcessOutcome {
            classification,
            finalized,
        }
    }

    /// Close all open windows as shutdown candles and release state.
    pub fn flush(&mut self) -> Vec<Candle> {
        let flushed = self.finalizer.flush(&mut self.store);
        self.stats.candles_flushed += flushed.len() as u64;
        flushed
    }

    pub fn instrument_id(&self) -> &InstrumentId {
        &self.instrument_id
    }

    pub fn open_windows(&self) -> usize {
        self.store.len()
    }

    pub fn store(&self) -> &AccumulatorStore {
        &self.store
    }

    pub fn watermark(&self) -> Option<i64> {
        self.watermark.current()
    }

    pub fn stats(&self) -> &PartitionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;

    fn partition(lateness: i64) -> PartitionAggregator {
        PartitionAggregator::new(
            InstrumentId::new("X"),
            WindowDuration::from_millis(MINUTE).unwrap(),
            lateness,
        )
    }

    fn trade(ts: i64, price: f64, quantity: f64) -> TradeEvent {
        TradeEvent::new(InstrumentId::new("X"), price, quantity, ts)
    }

    #[test]
    fn test_window_closes_on_first_trade_past_boundary() {
        let mut p = partition(0);

        assert!(p.process(&trade(1_000, 100.0, 1.0)).finalized.is_empty());
        assert!(p.process(&trade(30_000, 105.0, 2.0)).finalized.is_empty());
        assert!(p.process(&trade(59_999, 102.0, 1.0)).finalized.is_empty());

        let outcome = p.process(&trade(61_000, 110.0, 1.0));
        assert_eq!(outcome.classification, TradeClassification::OnTime);
        assert_eq!(outcome.finalized.len(), 1);

        let candle = &outcome.finalized[0];
        assert_eq!(candle.window_start_ms, 0);
        assert_eq!(candle.window_end_ms, MINUTE);
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.high, 105.0);
        assert_eq!(candle.low, 100.0);
        assert_eq!(candle.close, 102.0);
        assert_eq!(candle.volume, 4.0);
        assert!(!candle.closed_by_shutdown);

        assert_eq!(p.store().open_windows(), vec![MINUTE]);
    }

    #[test]
    fn test_late_trade_after_finalization_is_dropped() {
        let mut p = partition(0);
        p.process(&trade(1_000, 100.0, 1.0));
        p.process(&trade(61_000, 110.0, 1.0));

        let outcome = p.process(&trade(500, 999.0, 5.0));
        assert_eq!(outcome.classification, TradeClassification::LateDropped);
        assert!(outcome.finalized.is_empty());
        assert!(!p.store().contains(0));
        assert_eq!(p.stats().late_dropped, 1);
    }

    #[test]
    fn test_lateness_tolerance_admits_straggler() {
        let mut p = partition(5_000);
        p.process(&trade(1_000, 100.0, 1.0));
        p.process(&trade(61_000, 110.0, 1.0)); // watermark 56_000

        let outcome = p.process(&trade(58_000, 90.0, 1.0));
        assert_eq!(outcome.classification, TradeClassification::LateAccepted);

        let outcome = p.process(&trade(66_000, 111.0, 1.0)); // watermark 61_000
        assert_eq!(outcome.finalized.len(), 1);
        let candle = &outcome.finalized[0];
        assert_eq!(candle.low, 90.0);
        assert_eq!(candle.close, 90.0);
        assert_eq!(candle.volume, 2.0);
    }

    #[test]
    fn test_gap_closes_multiple_windows_in_order() {
        let mut p = partition(0);
        p.process(&trade(1_000, 1.0, 1.0));
        p.process(&trade(61_000, 2.0, 1.0));
        // Jump over an empty window: [2m,3m) never opens
        let outcome = p.process(&trade(4 * MINUTE, 3.0, 1.0));

        let starts: Vec<i64> = outcome.finalized.iter().map(|c| c.window_start_ms).collect();
        assert_eq!(starts, vec![MINUTE]);
        assert_eq!(p.stats().candles_finalized, 2);
    }

    #[test]
    fn test_flush_on_shutdown() {
        let mut p = partition(0);
        p.process(&trade(1_000, 100.0, 3.0));

        let flushed = p.flush();
        assert_eq!(flushed.len(), 1);
        let candle = &flushed[0];
        assert!(candle.closed_by_shutdown);
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.close, 100.0);
        assert_eq!(candle.volume, 3.0);
        assert_eq!(p.open_windows(), 0);

        // Nothing left to flush
        assert!(p.flush().is_empty());
    }

    #[test]
    fn test_stats_classification_totals() {
        let mut p = partition(0);
        p.process(&trade(10_000, 1.0, 1.0));
        p.process(&trade(5_000, 1.0, 1.0));
        p.process(&trade(70_000, 1.0, 1.0));
        p.process(&trade(1_000, 1.0, 1.0));

        let stats = p.stats();
        assert_eq!(stats.trades_processed, 4);
        assert_eq!(stats.on_time, 2);
        assert_eq!(stats.late_accepted, 1);
        assert_eq!(stats.late_dropped, 1);
        assert_eq!(stats.windows_opened, 2);
    }
}
