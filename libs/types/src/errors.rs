//! Error types for inbound trade data
//!
//! Per-event errors are local and never fatal: the consumer logs the
//! error, counts it, and moves on to the next event.

use thiserror::Error;

/// A trade that cannot be parsed or validated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedEventError {
    #[error("invalid trade json: {reason}")]
    InvalidJson { reason: String },

    #[error("empty product_id")]
    EmptyInstrument,

    #[error("invalid price {price} for {product_id}")]
    InvalidPrice { product_id: String, price: f64 },

    #[error("invalid quantity {quantity} for {product_id}")]
    InvalidQuantity { product_id: String, quantity: f64 },

    #[error("invalid timestamp {timestamp_ms} for {product_id}")]
    InvalidTimestamp { product_id: String, timestamp_ms: i64 },

    #[error("unparseable exchange timestamp: {0}")]
    UnparseableTimestamp(String),
}

impl MalformedEventError {
    /// Short label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            MalformedEventError::InvalidJson { .. } => "invalid_json",
            MalformedEventError::EmptyInstrument => "empty_instrument",
            MalformedEventError::InvalidPrice { .. } => "invalid_price",
            MalformedEventError::InvalidQuantity { .. } => "invalid_quantity",
            MalformedEventError::InvalidTimestamp { .. } => "invalid_timestamp",
            MalformedEventError::UnparseableTimestamp(_) => "unparseable_timestamp",
        }
    }
}
