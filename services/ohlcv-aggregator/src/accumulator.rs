//! OHLCV accumulators for open windows
//!
//! An `Accumulator` is the mutable, in-progress aggregate of one open
//! window. The `AccumulatorStore` owns every open window of a single
//! instrument partition, ordered by window start so the finalizer can
//! pop all windows below a watermark without scanning.
//!
//! Open/close follow event time, not arrival order: a trade earlier than
//! anything seen so far replaces `open`, a trade at or after the latest
//! event time replaces `close`. Equal timestamps resolve by arrival: the
//! later trade wins `close` and never wins `open`.

use std::collections::BTreeMap;

use types::candle::Candle;
use types::ids::InstrumentId;
use types::trade::TradeEvent;

use crate::window::WindowDuration;

/// In-progress OHLCV aggregate for one window.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub first_seen_event_time: i64,
    pub last_seen_event_time: i64,
    pub trade_count: u64,
}

impl Accumulator {
    /// Create an accumulator from the first trade of a window.
    pub fn new(trade: &TradeEvent) -> Self {
        Self {
            open: trade.price,
            high: trade.price,
            low: trade.price,
            close: trade.price,
            volume: trade.quantity,
            first_seen_event_time: trade.event_time_ms,
            last_seen_event_time: trade.event_time_ms,
            trade_count: 1,
        }
    }

    /// Fold another trade of the same window into the aggregate.
    pub fn update(&mut self, trade: &TradeEvent) {
        if trade.price > self.high {
            self.high = trade.price;
        }
        if trade.price < self.low {
            self.low = trade.price;
        }
        if trade.event_time_ms < self.first_seen_event_time {
            self.open = trade.price;
            self.first_seen_event_time = trade.event_time_ms;
        }
        if trade.event_time_ms >= self.last_seen_event_time {
            self.close = trade.price;
            self.last_seen_event_time = trade.event_time_ms;
        }
        self.volume += trade.quantity;
        self.trade_count += 1;
    }

    /// Freeze into an immutable candle.
    pub fn into_candle(
        self,
        instrument_id: InstrumentId,
        window_start_ms: i64,
        duration: WindowDuration,
        closed_by_shutdown: bool,
    ) -> Candle {
        Candle {
            instrument_id,
            window_start_ms,
            window_end_ms: duration.window_end(window_start_ms),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            trade_count: self.trade_count,
            closed_by_shutdown,
        }
    }
}

/// Outcome of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First trade of the window; a new accumulator was created.
    Created,
    /// Trade folded into an existing accumulator.
    Updated,
}

/// Open windows of one instrument keyed by window start.
#[derive(Debug)]
pub struct AccumulatorStore {
    duration: WindowDuration,
    /// BTreeMap keeps windows ordered by start for range draining.
    windows: BTreeMap<i64, Accumulator>,
}

impl AccumulatorStore {
    pub fn new(duration: WindowDuration) -> Self {
        Self {
            duration,
            windows: BTreeMap::new(),
        }
    }

    /// Create or update the accumulator for `window_start_ms`.
    pub fn upsert(&mut self, window_start_ms: i64, trade: &TradeEvent) -> Upsert {
        match self.windows.get_mut(&window_start_ms) {
            Some(acc) => {
                acc.update(trade);
                Upsert::Updated
            }
            None => {
                self.windows.insert(window_start_ms, Accumulator::new(trade));
                Upsert::Created
            }
        }
    }

    pub fn get(&self, window_start_ms: i64) -> Option<&Accumulator> {
        self.windows.get(&window_start_ms)
    }

    pub fn contains(&self, window_start_ms: i64) -> bool {
        self.windows.contains_key(&window_start_ms)
    }

    /// Remove and return every window whose end is at or below
    /// `threshold_ms`, in ascending window-start order.
    pub fn drain_closed(&mut self, threshold_ms: i64) -> Vec<(i64, Accumulator)> {
        // end = start + d <= threshold  <=>  start <= threshold - d
        let first_open_start = threshold_ms
            .saturating_sub(self.duration.as_millis())
            .saturating_add(1);
        let still_open = self.windows.split_off(&first_open_start);
        std::mem::replace(&mut self.windows, still_open)
            .into_iter()
            .collect()
    }

    /// Remove and return every open window in ascending order.
    pub fn drain_all(&mut self) -> Vec<(i64, Accumulator)> {
        std::mem::take(&mut self.windows).into_iter().collect()
    }

    /// Window starts currently open, ascending.
    pub fn open_windows(&self) -> Vec<i64> {
        self.windows.keys().copied().collect()
    }

    /// Earliest open window start, if any.
    pub fn oldest_window(&self) -> Option<i64> {
        self.windows.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn duration(&self) -> WindowDuration {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;

    fn trade(price: f64, quantity: f64, ts: i64) -> TradeEvent {
        TradeEvent::new(InstrumentId::new("BTC/USD"), price, quantity, ts)
    }

    fn minute() -> WindowDuration {
        WindowDuration::from_millis(MINUTE).unwrap()
    }

    #[test]
    fn test_accumulator_creation() {
        let acc = Accumulator::new(&trade(50000.0, 1.5, 10_000));

        assert_eq!(acc.open, 50000.0);
        assert_eq!(acc.high, 50000.0);
        assert_eq!(acc.low, 50000.0);
        assert_eq!(acc.close, 50000.0);
        assert_eq!(acc.volume, 1.5);
        assert_eq!(acc.first_seen_event_time, 10_000);
        assert_eq!(acc.last_seen_event_time, 10_000);
        assert_eq!(acc.trade_count, 1);
    }

    #[test]
    fn test_accumulator_update() {
        let mut acc = Accumulator::new(&trade(50000.0, 1.0, 0));

        acc.update(&trade(51000.0, 2.0, 1_000)); // New high
        acc.update(&trade(49000.0, 3.0, 2_000)); // New low
        acc.update(&trade(50500.0, 1.0, 3_000)); // Close

        assert_eq!(acc.open, 50000.0);
        assert_eq!(acc.high, 51000.0);
        assert_eq!(acc.low, 49000.0);
        assert_eq!(acc.close, 50500.0);
        assert_eq!(acc.volume, 7.0);
        assert_eq!(acc.trade_count, 4);
    }

    #[test]
    fn test_out_of_order_trade_replaces_open() {
        let mut acc = Accumulator::new(&trade(100.0, 1.0, 30_000));
        acc.update(&trade(90.0, 1.0, 10_000));

        assert_eq!(acc.open, 90.0);
        assert_eq!(acc.close, 100.0);
        assert_eq!(acc.first_seen_event_time, 10_000);
        assert_eq!(acc.last_seen_event_time, 30_000);
    }

    #[test]
    fn test_equal_timestamps_later_arrival_wins_close_only() {
        let mut acc = Accumulator::new(&trade(100.0, 1.0, 5_000));
        acc.update(&trade(101.0, 1.0, 5_000));

        assert_eq!(acc.open, 100.0);
        assert_eq!(acc.close, 101.0);
    }

    #[test]
    fn test_into_candle() {
        let mut acc = Accumulator::new(&trade(100.0, 1.0, 1_000));
        acc.update(&trade(105.0, 2.0, 30_000));

        let candle = acc.into_candle(InstrumentId::new("BTC/USD"), 0, minute(), false);
        assert_eq!(candle.window_start_ms, 0);
        assert_eq!(candle.window_end_ms, MINUTE);
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.close, 105.0);
        assert_eq!(candle.volume, 3.0);
        assert_eq!(candle.trade_count, 2);
        assert!(!candle.closed_by_shutdown);
        assert!(candle.is_valid());
    }

    #[test]
    fn test_store_upsert() {
        let mut store = AccumulatorStore::new(minute());

        assert_eq!(store.upsert(0, &trade(100.0, 1.0, 1_000)), Upsert::Created);
        assert_eq!(store.upsert(0, &trade(101.0, 1.0, 2_000)), Upsert::Updated);
        assert_eq!(store.upsert(MINUTE, &trade(102.0, 1.0, 61_000)), Upsert::Created);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(0).unwrap().trade_count, 2);
        assert!(store.contains(MINUTE));
    }

    #[test]
    fn test_store_drain_closed_is_ordered_and_bounded() {
        let mut store = AccumulatorStore::new(minute());
        for minute_idx in [3, 0, 2, 1] {
            let start = minute_idx * MINUTE;
            store.upsert(start, &trade(100.0, 1.0, start + 5));
        }

        // Windows ending at or before 3m: [0,1m), [1m,2m), [2m,3m)
        let closed = store.drain_closed(3 * MINUTE);
        let starts: Vec<i64> = closed.iter().map(|(start, _)| *start).collect();
        assert_eq!(starts, vec![0, MINUTE, 2 * MINUTE]);
        assert_eq!(store.open_windows(), vec![3 * MINUTE]);
    }

    #[test]
    fn test_store_drain_closed_excludes_window_ending_after_threshold() {
        let mut store = AccumulatorStore::new(minute());
        store.upsert(0, &trade(100.0, 1.0, 1_000));

        assert!(store.drain_closed(MINUTE - 1).is_empty());
        assert_eq!(store.drain_closed(MINUTE).len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_drain_all() {
        let mut store = AccumulatorStore::new(minute());
        store.upsert(MINUTE, &trade(100.0, 1.0, 61_000));
        store.upsert(0, &trade(100.0, 1.0, 1_000));

        assert_eq!(store.oldest_window(), Some(0));
        let all = store.drain_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, 0);
        assert!(store.is_empty());
        assert_eq!(store.oldest_window(), None);
    }
}
