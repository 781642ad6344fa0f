use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, error, info};

use depthsync::config::Settings;
use depthsync::engine::types::{AnalyticsError, TopLevels};
use depthsync::market_data::adapters::binance::{BinanceFeed, BinanceSnapshotProvider};
use depthsync::market_data::sync_controller::{SyncController, SyncHandle};
use depthsync::telemetry;

#[derive(Debug, Parser)]
#[command(name = "depthsync", about = "Keep a local order book in sync with Binance futures depth")]
struct Cli {
    /// Symbol to follow, e.g. btcusdt
    #[arg(short, long)]
    symbol: Option<String>,

    /// Settings file (defaults to ./depthsync.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Levels per side used for book pressure
    #[arg(long)]
    top_n: Option<usize>,

    #[arg(long)]
    price_decimals: Option<u32>,

    #[arg(long)]
    size_decimals: Option<u32>,

    /// Port for the Prometheus exporter (metrics-exporter feature)
    #[arg(long, default_value_t = 9000)]
    metrics_port: u16,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(symbol) = &self.symbol {
            settings.symbol = symbol.to_lowercase();
        }
        if let Some(n) = self.top_n {
            settings.top_n = n;
        }
        if let Some(d) = self.price_decimals {
            settings.price_decimals = d;
        }
        if let Some(d) = self.size_decimals {
            settings.size_decimals = d;
        }
    }
}

fn describe(top: &TopLevels, price_scale: i64) -> String {
    let px = |ticks: i64| ticks as f64 / price_scale as f64;
    match (top.bids.first(), top.asks.first()) {
        (Some(b), Some(a)) => format!("BID {} x {} | ASK {} x {}", px(b.price), b.qty, px(a.price), a.qty),
        (Some(b), None) => format!("BID {} x {} | ASK: None", px(b.price), b.qty),
        (None, Some(a)) => format!("BID: None | ASK {} x {}", px(a.price), a.qty),
        (None, None) => "No data available".to_string(),
    }
}

// Log book pressure on every applied change, plus a periodic top-of-book line
async fn report(handle: SyncHandle, top_n: usize, price_scale: i64, interval: std::time::Duration) {
    let mut changes = handle.subscribe();
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            change = changes.recv() => {
                let Some(change) = change else { break };
                match handle.book_pressure(top_n) {
                    Ok(pressure) => debug!(side = %change.side, price = change.price, qty = change.qty, pressure, "Book update"),
                    Err(AnalyticsError::DivisionByZero { .. }) => debug!("Book pressure undefined on empty book"),
                    Err(e) => debug!(error = %e, "Book pressure unavailable"),
                }
            }
            _ = ticker.tick() => {
                let top = handle.top_levels(top_n);
                match handle.book_pressure(top_n) {
                    Ok(pressure) => info!(state = ?handle.state(), pressure, "{}", describe(&top, price_scale)),
                    Err(e) => info!(state = ?handle.state(), "{} ({})", describe(&top, price_scale), e),
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    telemetry::init_tracing("info");
    let cli = Cli::parse();
    telemetry::init_metrics(cli.metrics_port)?;

    let mut settings = Settings::load(cli.config.as_deref())?;
    cli.apply(&mut settings);
    settings.validate()?;

    let normaliser = settings.normaliser();
    let provider = BinanceSnapshotProvider::new(
        &settings.rest_base_url,
        settings.snapshot_limit,
        normaliser,
        settings.request_timeout(),
    )?;
    let feed = BinanceFeed::new(&settings.ws_base_url, settings.request_timeout());

    let (controller, handle) = SyncController::new(settings.controller_config(), provider, feed);
    info!(symbol = %settings.symbol, top_n = settings.top_n, "Starting depth sync");

    let mut controller_task = tokio::spawn(controller.run());
    let reporter = tokio::spawn(report(
        handle.clone(),
        settings.top_n,
        normaliser.price_scale,
        settings.report_interval(),
    ));

    let result = tokio::select! {
        res = &mut controller_task => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            handle.close();
            controller_task.await
        }
    };
    reporter.abort();

    match result? {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(error = %e, "Depth sync failed");
            Err(e.into())
        }
    }
}
