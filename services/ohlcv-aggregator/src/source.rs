//! Trade sources
//!
//! A [`TradeSource`] yields batches of decoded trades. Malformed events
//! are kept in the batch as errors so the engine can count them. Sources
//! are pull-based: the engine only asks for the next batch once the
//! previous one has been routed, so a slow partition throttles the read.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::info;
use types::errors::MalformedEventError;
use types::trade::{TradeEvent, TradeRecord};

use crate::error::SourceError;
use crate::ingestion::TradeDecoder;

/// One batch of decode results, in source order.
pub type TradeBatch = Vec<Result<TradeEvent, MalformedEventError>>;

/// Default upper bound on trades returned per call.
pub const DEFAULT_MAX_BATCH: usize = 256;

/// Producer of trades for the engine.
#[async_trait]
pub trait TradeSource: Send {
    /// Source name for logging.
    fn name(&self) -> &str;

    /// Next batch of trades. An empty batch is not end-of-stream; check
    /// [`TradeSource::is_done`].
    async fn get_trades(&mut self) -> Result<TradeBatch, SourceError>;

    /// True once the source has been exhausted.
    fn is_done(&self) -> bool;
}

/// Reads one JSON trade per line from an async reader (file, stdin).
///
/// Lines are read as raw bytes, so a line that is not valid UTF-8 is a
/// malformed trade rather than a read failure.
pub struct JsonLinesSource<R> {
    reader: R,
    buf: Vec<u8>,
    decoder: TradeDecoder,
    max_batch: usize,
    done: bool,
    /// Read error held back until the trades before it have been returned.
    pending_error: Option<std::io::Error>,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            decoder: TradeDecoder::new(name),
            max_batch: DEFAULT_MAX_BATCH,
            done: false,
            pending_error: None,
        }
    }

    /// Cap the batch size. A live stream (stdin) should use 1 so a trade
    /// is routed as soon as its line arrives.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    pub fn decoder(&self) -> &TradeDecoder {
        &self.decoder
    }
}

#[async_trait]
impl<R> TradeSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn name(&self) -> &str {
        self.decoder.source()
    }

    async fn get_trades(&mut self) -> Result<TradeBatch, SourceError> {
        if let Some(err) = self.pending_error.take() {
            return Err(err.into());
        }

        let mut batch = Vec::new();
        while batch.len() < self.max_batch {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf).await {
                Ok(0) => {
                    self.done = true;
                    info!(
                        source = %self.decoder.source(),
                        accepted = self.decoder.accepted(),
                        rejected = self.decoder.rejected(),
                        "Trade source reached end of input"
                    );
                    break;
                }
                Ok(_) => {
                    let line = trim_line(&self.buf);
                    if line.is_empty() {
                        continue;
                    }
                    batch.push(self.decoder.decode_bytes(line));
                }
                Err(err) if batch.is_empty() => return Err(err.into()),
                Err(err) => {
                    self.pending_error = Some(err);
                    break;
                }
            }
        }
        Ok(batch)
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(start), Some(end)) => &line[start..=end],
        _ => &[],
    }
}

/// Receives trade records from an in-process producer, such as a live
/// exchange feed adapter.
pub struct ChannelSource {
    rx: mpsc::Receiver<TradeRecord>,
    decoder: TradeDecoder,
    max_batch: usize,
    done: bool,
}

impl ChannelSource {
    pub fn new(name: impl Into<String>, rx: mpsc::Receiver<TradeRecord>) -> Self {
        Self {
            rx,
            decoder: TradeDecoder::new(name),
            max_batch: DEFAULT_MAX_BATCH,
            done: false,
        }
    }

    /// Create a bounded channel and its source. The sender side blocks
    /// when the engine falls behind.
    pub fn channel(
        name: impl Into<String>,
        capacity: usize,
    ) -> (mpsc::Sender<TradeRecord>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(name, rx))
    }
}

#[async_trait]
impl TradeSource for ChannelSource {
    fn name(&self) -> &str {
        self.decoder.source()
    }

    async fn get_trades(&mut self) -> Result<TradeBatch, SourceError> {
        let first = match self.rx.recv().await {
            Some(record) => record,
            None => {
                self.done = true;
                info!(source = %self.decoder.source(), "Trade channel closed by producer");
                return Ok(Vec::new());
            }
        };

        let mut batch = vec![self.decoder.accept_record(first)];
        while batch.len() < self.max_batch {
            match self.rx.try_recv() {
                Ok(record) => batch.push(self.decoder.accept_record(record)),
                Err(_) => break,
            }
        }
        Ok(batch)
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_json_lines_source_reads_until_eof() {
        let input = concat!(
            r#"{"product_id":"X","price":100.0,"quantity":1.0,"timestamp_ms":1000}"#,
            "\n\n",
            "not json\n",
            r#"{"product_id":"Y","price":5.0,"quantity":2.0,"timestamp_ms":2000}"#,
            "\n",
        );
        let mut source = JsonLinesSource::new("test", BufReader::new(input.as_bytes()));

        let batch = source.get_trades().await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch[0].is_ok());
        assert!(batch[1].is_err());
        assert_eq!(batch[2].as_ref().unwrap().instrument_id.as_str(), "Y");
        assert!(source.is_done());
        assert_eq!(source.decoder().rejected(), 1);
    }

    #[tokio::test]
    async fn test_json_lines_source_respects_max_batch() {
        let line = r#"{"product_id":"X","price":1.0,"quantity":1.0,"timestamp_ms":1}"#;
        let input = format!("{line}\n{line}\n{line}\n");
        let mut source =
            JsonLinesSource::new("test", BufReader::new(input.as_bytes())).with_max_batch(2);

        assert_eq!(source.get_trades().await.unwrap().len(), 2);
        assert!(!source.is_done());
        assert_eq!(source.get_trades().await.unwrap().len(), 1);
        assert!(source.is_done());
        assert_eq!(source.name(), "test");
    }

    #[tokio::test]
    async fn test_json_lines_source_skips_non_utf8_line() {
        let mut input = Vec::new();
        input.extend_from_slice(
            br#"{"product_id":"X","price":100.0,"quantity":1.0,"timestamp_ms":1000}"#,
        );
        input.push(b'\n');
        input.extend_from_slice(&[0xff, 0xfe]);
        input.push(b'\n');
        input.extend_from_slice(
            br#"{"product_id":"X","price":101.0,"quantity":1.0,"timestamp_ms":61000}"#,
        );
        input.push(b'\n');
        let mut source = JsonLinesSource::new("test", BufReader::new(input.as_slice()));

        let batch = source.get_trades().await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].as_ref().unwrap().event_time_ms, 1000);
        assert!(matches!(batch[1], Err(MalformedEventError::InvalidJson { .. })));
        assert_eq!(batch[2].as_ref().unwrap().event_time_ms, 61000);
        assert!(source.is_done());
        assert_eq!(source.decoder().accepted(), 2);
        assert_eq!(source.decoder().rejected(), 1);
    }

    #[tokio::test]
    async fn test_read_error_returned_after_collected_trades() {
        let line = br#"{"product_id":"X","price":1.0,"quantity":1.0,"timestamp_ms":1}"#;
        let reader = reader_failing_after(line);
        let mut source = JsonLinesSource::new("test", BufReader::new(reader));

        let batch = source.get_trades().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].is_ok());
        assert!(!source.is_done());

        let err = source.get_trades().await.unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }

    // One complete line, then a broken connection.
    fn reader_failing_after(line: &[u8]) -> impl tokio::io::AsyncRead + Unpin + Send {
        let mut first = line.to_vec();
        first.push(b'\n');
        tokio::io::AsyncReadExt::chain(std::io::Cursor::new(first), FailingReader)
    }

    struct FailingReader;

    impl tokio::io::AsyncRead for FailingReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )))
        }
    }

    #[tokio::test]
    async fn test_channel_source_done_when_senders_dropped() {
        let (tx, mut source) = ChannelSource::channel("live", 8);
        tx.send(TradeRecord::new("X", 1.0, 1.0, 10)).await.unwrap();
        tx.send(TradeRecord::new("X", -1.0, 1.0, 20)).await.unwrap();
        drop(tx);

        let batch = source.get_trades().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].is_ok());
        assert!(matches!(batch[1], Err(MalformedEventError::InvalidPrice { .. })));
        assert!(!source.is_done());

        assert!(source.get_trades().await.unwrap().is_empty());
        assert!(source.is_done());
    }
}
