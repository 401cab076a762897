//! OHLCV Aggregation Service
//!
//! Consumes a stream of trade ticks and produces one OHLCV candle per
//! instrument per fixed-duration tumbling window, in event time:
//! - Window assignment aligned to the Unix epoch
//! - Per-instrument watermarks with configurable allowed lateness
//! - Late-data classification and dropping for finalized windows
//! - Shutdown flush of open windows, flagged `closed_by_shutdown`
//! - Retrying, backoff-bounded candle publishing
//!
//! # Architecture
//!
//! ```text
//!        TradeSource
//!            │
//!       ┌────▼────┐
//!       │ Ingest  │  ← Decodes, validates, counts malformed events
//!       └────┬────┘
//!            │ route by instrument (bounded queues)
//!   ┌────────┼─────────┐
//!   │        │         │
//! ┌─▼──┐  ┌──▼─┐    ┌──▼─┐
//! │ P1 │  │ P2 │ …  │ Pn │  ← Assign → classify → accumulate → watermark
//! └─┬──┘  └──┬─┘    └──┬─┘
//!   │        │         │
//! ┌─▼────────▼─────────▼──┐
//! │  Finalizer → Sink     │  ← Retry with backoff, fatal on exhaustion
//! └───────────────────────┘
//! ```

pub mod accumulator;
pub mod config;
pub mod engine;
pub mod error;
pub mod finalizer;
pub mod ingestion;
pub mod late_data;
pub mod metrics;
pub mod partition;
pub mod sink;
pub mod source;
pub mod watermark;
pub mod window;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
