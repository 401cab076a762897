//! Types library for the OHLCV pipeline
//!
//! Shared definitions for every service that produces or consumes trade
//! ticks and OHLCV candles. Wire records mirror the JSON messages on the
//! trade and candle topics; domain types are the validated, immutable
//! forms the aggregation engine works with.
//!
//! # Modules
//! - `ids`: Instrument identifier
//! - `trade`: Trade ticks (wire record + validated event)
//! - `candle`: Finalized OHLCV candles (domain + wire record)
//! - `errors`: Error taxonomy for malformed input

// Public modules
pub mod ids;
pub mod trade;
pub mod candle;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::trade::*;
    pub use crate::candle::*;
    pub use crate::errors::*;
}
