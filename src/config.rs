// Runtime settings: defaults < depthsync.toml < DEPTHSYNC_* env < CLI flags

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::market_data::adapters::binance::{depth_stream_key, DEFAULT_REST_URL, DEFAULT_WS_URL};
use crate::market_data::normaliser::{Normaliser, MAX_DECIMALS};
use crate::market_data::retry::RetryPolicy;
use crate::market_data::sync_controller::ControllerConfig;

pub const ENV_PREFIX: &str = "DEPTHSYNC";
pub const DEFAULT_CONFIG_FILE: &str = "depthsync.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 5, initial_backoff_ms: 500, max_backoff_ms: 30_000 }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub symbol: String,            // e.g. "btcusdt"
    pub rest_base_url: String,
    pub ws_base_url: String,
    pub snapshot_limit: u32,       // levels per side in the REST snapshot
    pub price_decimals: u32,
    pub size_decimals: u32,
    pub top_n: usize,              // depth used for book pressure
    pub request_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub stale_timeout_ms: u64,     // 0 disables the silent-feed resync
    pub report_interval_ms: u64,
    pub snapshot_retry: RetrySettings,
    pub connect_retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbol: "btcusdt".to_string(),
            rest_base_url: DEFAULT_REST_URL.to_string(),
            ws_base_url: DEFAULT_WS_URL.to_string(),
            snapshot_limit: 1000,
            price_decimals: 8,
            size_decimals: 8,
            top_n: 5,
            request_timeout_ms: 10_000,
            reconnect_delay_ms: 1_000,
            stale_timeout_ms: 30_000,
            report_interval_ms: 1_000,
            snapshot_retry: RetrySettings::default(),
            connect_retry: RetrySettings::default(),
        }
    }
}

impl Settings {
    /// Layer defaults, the optional config file and the environment.
    /// `path` falls back to `depthsync.toml` in the working directory.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        info!(symbol = %settings.symbol, "Settings loaded");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));
        if self.symbol.trim().is_empty() {
            return invalid("symbol must not be empty".into());
        }
        if !self.symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return invalid(format!("symbol {:?} must be alphanumeric", self.symbol));
        }
        if self.top_n == 0 {
            return invalid("top_n must be at least 1".into());
        }
        if self.snapshot_limit == 0 {
            return invalid("snapshot_limit must be at least 1".into());
        }
        if self.price_decimals > MAX_DECIMALS || self.size_decimals > MAX_DECIMALS {
            return invalid(format!("decimals must be at most {MAX_DECIMALS}"));
        }
        for (name, retry) in [("snapshot_retry", &self.snapshot_retry), ("connect_retry", &self.connect_retry)] {
            if retry.max_attempts == 0 {
                return invalid(format!("{name}.max_attempts must be at least 1"));
            }
            if retry.initial_backoff_ms > retry.max_backoff_ms {
                return invalid(format!("{name}.initial_backoff_ms exceeds max_backoff_ms"));
            }
        }
        Ok(())
    }

    pub fn normaliser(&self) -> Normaliser {
        Normaliser::new(self.price_decimals, self.size_decimals)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms.max(1))
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            symbol: self.symbol.clone(),
            stream_key: depth_stream_key(&self.symbol),
            normaliser: self.normaliser(),
            snapshot_retry: self.snapshot_retry.policy(),
            connect_retry: self.connect_retry.policy(),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            stale_timeout: Duration::from_millis(self.stale_timeout_ms),
        }
    }
}
