//! Identifier types for traded instruments
//!
//! The instrument identifier is also the partitioning key of the
//! aggregation engine: every trade for one instrument is processed by the
//! same partition, in arrival order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument identifier (exchange product id)
///
/// Free-form, exchange-defined (e.g., "BTC/USD" on Kraken, "BTC-USD" on
/// Coinbase). The only structural requirement is that it is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    /// Create a new InstrumentId from a string
    ///
    /// # Panics
    /// Panics if the identifier is empty or whitespace only
    pub fn new(product_id: impl Into<String>) -> Self {
        let s = product_id.into();
        assert!(!s.trim().is_empty(), "InstrumentId must not be empty");
        Self(s)
    }

    /// Try to create an InstrumentId, returning None if empty
    pub fn try_new(product_id: impl Into<String>) -> Option<Self> {
        let s = product_id.into();
        if s.trim().is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    /// Get the product id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_id_creation() {
        let id = InstrumentId::new("BTC/USD");
        assert_eq!(id.as_str(), "BTC/USD");
        assert_eq!(id.to_string(), "BTC/USD");
    }

    #[test]
    fn test_instrument_id_try_new() {
        assert!(InstrumentId::try_new("ETH-USD").is_some());
        assert!(InstrumentId::try_new("").is_none());
        assert!(InstrumentId::try_new("   ").is_none());
    }

    #[test]
    #[should_panic(expected = "InstrumentId must not be empty")]
    fn test_instrument_id_empty_panics() {
        InstrumentId::new("");
    }

    #[test]
    fn test_instrument_id_serialization() {
        let id = InstrumentId::new("ETH/USD");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"ETH/USD\"");

        let deserialized: InstrumentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_instrument_id_ordering() {
        let mut ids = vec![
            InstrumentId::new("SOL/USD"),
            InstrumentId::new("BTC/USD"),
            InstrumentId::new("ETH/USD"),
        ];
        ids.sort();
        assert_eq!(ids[0].as_str(), "BTC/USD");
        assert_eq!(ids[2].as_str(), "SOL/USD");
    }
}
