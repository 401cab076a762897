use std::sync::Arc;

use anyhow::Context;
use ohlcv_aggregator::config::AggregatorConfig;
use ohlcv_aggregator::engine::{AggregatorEngine, RunSummary};
use ohlcv_aggregator::metrics::{AlertLevel, AlertThresholds, ServiceMetrics};
use ohlcv_aggregator::sink::JsonLinesSink;
use ohlcv_aggregator::source::{JsonLinesSource, TradeSource};
use ohlcv_aggregator::SERVICE_VERSION;
use tokio::io::BufReader;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const FILE_BATCH_SIZE: usize = 512;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Before logging so RUST_LOG may come from .env
    let dotenv_path = dotenv::dotenv().ok();
    init_logging();

    info!(version = SERVICE_VERSION, "Starting OHLCV aggregation service");
    match &dotenv_path {
        Some(path) => info!(path = %path.display(), "Loaded .env file"),
        None => debug!("No .env file found, using process environment"),
    }

    let config = AggregatorConfig::from_env().context("invalid aggregator configuration")?;
    info!(
        window = %config.window,
        allowed_lateness_ms = config.allowed_lateness_ms,
        queue_capacity = config.partition_queue_capacity,
        sink_max_retries = config.sink_max_retries,
        input = ?config.trade_input,
        "Configuration loaded"
    );

    let metrics = Arc::new(ServiceMetrics::new());
    // Candles go to stdout; logs stay on stderr
    let sink = Arc::new(JsonLinesSink::new("stdout", tokio::io::stdout()));
    let engine = AggregatorEngine::new(config.clone(), sink, metrics.clone())?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let reporter_stop = CancellationToken::new();
    let reporter = tokio::spawn(report_metrics(
        metrics.clone(),
        config.metrics_log_interval(),
        reporter_stop.clone(),
    ));

    let result = match &config.trade_input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("cannot open trade input {}", path.display()))?;
            let source = JsonLinesSource::new(path.display().to_string(), BufReader::new(file))
                .with_max_batch(FILE_BATCH_SIZE);
            run(&engine, source, cancel).await
        }
        None => {
            let source = JsonLinesSource::new("stdin", BufReader::new(tokio::io::stdin()))
                .with_max_batch(1);
            run(&engine, source, cancel).await
        }
    };

    reporter_stop.cancel();
    if let Err(err) = reporter.await {
        error!(error = %err, "Metrics reporter failed");
    }
    log_metrics(&metrics);

    let summary = result?;
    info!(
        trades_processed = summary.trades_processed,
        candles_emitted = summary.candles_emitted,
        candles_flushed = summary.candles_flushed,
        late_dropped = summary.late_dropped,
        malformed = summary.malformed,
        partitions = summary.partitions,
        "OHLCV aggregation service stopped"
    );
    Ok(())
}

async fn run<S: TradeSource>(
    engine: &AggregatorEngine,
    source: S,
    cancel: CancellationToken,
) -> Result<RunSummary, anyhow::Error> {
    engine.run(source, cancel).await.map_err(|err| {
        error!(error = %err, "Aggregation engine failed");
        anyhow::Error::new(err)
    })
}

// Logs to stderr, filtered by RUST_LOG (default INFO).
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init()
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, flushing open windows");
                cancel.cancel();
            }
            Err(err) => warn!(error = %err, "Cannot listen for shutdown signal"),
        }
    });
}

async fn report_metrics(
    metrics: Arc<ServiceMetrics>,
    period: std::time::Duration,
    stop: CancellationToken,
) {
    let thresholds = AlertThresholds::default();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                log_metrics(&metrics);
                for alert in metrics.check_thresholds(&thresholds) {
                    match alert.level {
                        AlertLevel::Critical => error!(metric = %alert.metric, "{}", alert.message),
                        AlertLevel::Warning => warn!(metric = %alert.metric, "{}", alert.message),
                    }
                }
            }
        }
    }
}

fn log_metrics(metrics: &ServiceMetrics) {
    let exported = metrics.export();
    let get = |key: &str| exported.get(key).copied().unwrap_or_default();
    info!(
        trades_received = get("trades_received"),
        trades_processed = get("trades_processed"),
        malformed = get("malformed_events"),
        late_accepted = get("late_accepted"),
        late_dropped = get("late_dropped"),
        candles_emitted = get("candles_emitted"),
        sink_retries = get("sink_retries"),
        open_windows = get("open_windows"),
        active_partitions = get("active_partitions"),
        "Metrics"
    );
}
