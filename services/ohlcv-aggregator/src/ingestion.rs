//! Trade ingestion for the OHLCV aggregator
//!
//! Decodes raw JSON lines into validated [`TradeEvent`]s. Two wire shapes
//! are accepted:
//!
//! - `{"product_id", "price", "quantity", "timestamp_ms"}` (epoch millis)
//! - `{"product_id", "price", "quantity", "timestamp"}` where `timestamp`
//!   is an ISO-8601 exchange time such as `2024-05-01T12:00:00.123456Z`
//!
//! Malformed lines are rejected with a [`MalformedEventError`] and
//! counted; they never reach a partition.

use serde::Deserialize;
use tracing::{debug, info, warn};
use types::errors::MalformedEventError;
use types::trade::{iso8601_to_ms, TradeEvent, TradeRecord};

/// Loosely-typed trade line as it appears on the wire.
#[derive(Debug, Deserialize)]
struct RawTradeLine {
    product_id: String,
    price: f64,
    quantity: f64,
    #[serde(default)]
    timestamp_ms: Option<i64>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl RawTradeLine {
    fn into_record(self) -> Result<TradeRecord, MalformedEventError> {
        let timestamp_ms = match (self.timestamp_ms, self.timestamp) {
            (Some(ms), _) => ms,
            (None, Some(iso)) => iso8601_to_ms(&iso)?,
            (None, None) => {
                return Err(MalformedEventError::InvalidJson {
                    reason: "missing field `timestamp_ms`".to_string(),
                })
            }
        };
        Ok(TradeRecord::new(self.product_id, self.price, self.quantity, timestamp_ms))
    }
}

/// Decode a single JSON line into a validated trade.
pub fn decode_line(line: &str) -> Result<TradeEvent, MalformedEventError> {
    decode_bytes(line.as_bytes())
}

/// Decode raw line bytes. Bytes that are not valid UTF-8 are rejected as
/// invalid JSON, like any other undecodable line.
pub fn decode_bytes(line: &[u8]) -> Result<TradeEvent, MalformedEventError> {
    let raw: RawTradeLine =
        serde_json::from_slice(line).map_err(|e| MalformedEventError::InvalidJson {
            reason: e.to_string(),
        })?;
    raw.into_record()?.validate()
}

/// Stateful decoder that keeps acceptance counters for one source.
#[derive(Debug)]
pub struct TradeDecoder {
    source: String,
    /// Lines decoded into a valid trade.
    accepted: u64,
    /// Lines rejected as malformed.
    rejected: u64,
}

impl TradeDecoder {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        info!(source = %source, "TradeDecoder initialized");
        Self {
            source,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Decode one line, updating counters and logging rejections.
    pub fn decode(&mut self, line: &str) -> Result<TradeEvent, MalformedEventError> {
        self.decode_bytes(line.as_bytes())
    }

    /// Decode one line of raw bytes, which need not be valid UTF-8.
    pub fn decode_bytes(&mut self, line: &[u8]) -> Result<TradeEvent, MalformedEventError> {
        match decode_bytes(line) {
            Ok(trade) => {
                self.accepted += 1;
                debug!(
                    source = %self.source,
                    instrument = %trade.instrument_id,
                    event_time_ms = trade.event_time_ms,
                    "Trade decoded"
                );
                Ok(trade)
            }
            Err(err) => Err(self.reject(err)),
        }
    }

    /// Validate an already-deserialized record, counting the outcome.
    pub fn accept_record(
        &mut self,
        record: TradeRecord,
    ) -> Result<TradeEvent, MalformedEventError> {
        match record.validate() {
            Ok(trade) => {
                self.accepted += 1;
                Ok(trade)
            }
            Err(err) => Err(self.reject(err)),
        }
    }

    fn reject(&mut self, err: MalformedEventError) -> MalformedEventError {
        self.rejected += 1;
        warn!(
            source = %self.source,
            reason = err.label(),
            error = %err,
            "Malformed trade rejected"
        );
        err
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}
