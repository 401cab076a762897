//! Trade tick types
//!
//! `TradeRecord` is the JSON message produced by exchange ingestion
//! (`{product_id, price, quantity, timestamp_ms}`); `TradeEvent` is the
//! validated form consumed by the aggregation engine.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::errors::MalformedEventError;
use crate::ids::InstrumentId;

/// Wire-level trade message.
///
/// Values are unchecked; call [`TradeRecord::validate`] before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub product_id: String,
    pub price: f64,
    pub quantity: f64,
    /// Exchange event time, Unix milliseconds
    pub timestamp_ms: i64,
}

impl TradeRecord {
    pub fn new(
        product_id: impl Into<String>,
        price: f64,
        quantity: f64,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            price,
            quantity,
            timestamp_ms,
        }
    }

    /// Validate the record into an immutable `TradeEvent`.
    ///
    /// Rejects empty product ids, non-finite or non-positive prices,
    /// non-finite or negative quantities and negative timestamps.
    pub fn validate(self) -> Result<TradeEvent, MalformedEventError> {
        let instrument_id = InstrumentId::try_new(self.product_id.as_str())
            .ok_or(MalformedEventError::EmptyInstrument)?;

        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(MalformedEventError::InvalidPrice {
                product_id: self.product_id,
                price: self.price,
            });
        }
        if !self.quantity.is_finite() || self.quantity < 0.0 {
            return Err(MalformedEventError::InvalidQuantity {
                product_id: self.product_id,
                quantity: self.quantity,
            });
        }
        if self.timestamp_ms < 0 {
            return Err(MalformedEventError::InvalidTimestamp {
                product_id: self.product_id,
                timestamp_ms: self.timestamp_ms,
            });
        }

        Ok(TradeEvent {
            instrument_id,
            price: self.price,
            quantity: self.quantity,
            event_time_ms: self.timestamp_ms,
        })
    }
}

/// A validated trade tick.
///
/// Ordered only within one instrument's source stream; no ordering is
/// implied across instruments.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub instrument_id: InstrumentId,
    pub price: f64,
    pub quantity: f64,
    /// Exchange event time, Unix milliseconds
    pub event_time_ms: i64,
}

impl TradeEvent {
    pub fn new(instrument_id: InstrumentId, price: f64, quantity: f64, event_time_ms: i64) -> Self {
        Self {
            instrument_id,
            price,
            quantity,
            event_time_ms,
        }
    }

    /// Convert back to the wire representation.
    pub fn to_record(&self) -> TradeRecord {
        TradeRecord {
            product_id: self.instrument_id.as_str().to_string(),
            price: self.price,
            quantity: self.quantity,
            timestamp_ms: self.event_time_ms,
        }
    }
}

/// Convert an exchange ISO-8601 timestamp (e.g. `2024-05-01T12:00:00.123456Z`)
/// to Unix milliseconds.
pub fn iso8601_to_ms(timestamp: &str) -> Result<i64, MalformedEventError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| MalformedEventError::UnparseableTimestamp(timestamp.to_string()))
}
