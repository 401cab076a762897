//! OHLCV candle types
//!
//! A `Candle` is the immutable, finalized aggregate of every trade that
//! fell into one tumbling window of one instrument. `CandleRecord` is its
//! JSON message on the candle topic, keyed by `(product_id, timestamp_ms)`
//! where `timestamp_ms` is the window end.

use serde::{Deserialize, Serialize};

use crate::ids::InstrumentId;

/// A finalized OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument_id: InstrumentId,
    /// Inclusive window start, Unix milliseconds (multiple of the duration)
    pub window_start_ms: i64,
    /// Exclusive window end, Unix milliseconds
    pub window_end_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: u64,
    /// Set when the window was flushed by shutdown rather than closed by
    /// the watermark; such candles may be incomplete.
    pub closed_by_shutdown: bool,
}

impl Candle {
    /// Window length in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.window_end_ms - self.window_start_ms
    }

    /// Validate candle integrity (OHLCV invariants).
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= 0.0
            && self.window_end_ms > self.window_start_ms
    }

    /// Convert to the wire representation.
    pub fn to_record(&self) -> CandleRecord {
        CandleRecord {
            product_id: self.instrument_id.as_str().to_string(),
            timestamp_ms: self.window_end_ms,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            closed_by_shutdown: self.closed_by_shutdown,
        }
    }
}

/// Wire-level candle message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    pub product_id: String,
    /// Window end, Unix milliseconds
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Only present on the wire when true.
    #[serde(default, skip_serializing_if = "is_false")]
    pub closed_by_shutdown: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}
