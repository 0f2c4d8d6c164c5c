//! Application configuration loading and validation.
//!
//! Configuration is loaded from a TOML file; API credentials come from
//! environment variables only and never appear in the file.

use std::path::Path;

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::core::exchange::kraken::Credentials;
use crate::core::exchange::ReconnectionConfig;
use crate::core::graph::GraphConfig;
use crate::core::ingress::StalenessPolicy;
use crate::core::scanner::ScannerConfig;
use crate::core::settings::TradeSettings;
use crate::error::{Error, Result};

/// Exchange endpoints and credential sources.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// REST endpoint.
    pub api_url: String,
    /// Public streaming endpoint.
    pub ws_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Environment variable holding the base64 API secret.
    pub secret_env: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_url: crate::core::exchange::kraken::DEFAULT_API_URL.to_string(),
            ws_url: crate::core::exchange::kraken::DEFAULT_WS_URL.to_string(),
            api_key_env: "KRAKEN_API_KEY".to_string(),
            secret_env: "KRAKEN_API_SECRET".to_string(),
        }
    }
}

impl ExchangeConfig {
    /// Load credentials from the configured environment variables, if set.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        let api_key = std::env::var(&self.api_key_env).ok()?;
        let secret = std::env::var(&self.secret_env).ok()?;
        Some(Credentials::new(api_key, secret))
    }

    /// Whether both credential variables are present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        std::env::var(&self.api_key_env).is_ok() && std::env::var(&self.secret_env).is_ok()
    }
}

/// Logging output configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (e.g. `info`, `trireme=debug`).
    pub level: String,
    /// Emit JSON log lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Audit cadence and retention.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Seconds between health snapshots.
    pub health_interval_secs: u64,
    /// Seconds between opportunity-history samples.
    pub sample_interval_secs: u64,
    /// Entries per opportunity sample batch.
    pub sample_limit: usize,
    /// Days of append-only history to keep.
    pub retention_days: i64,
    /// Seconds between cleanup passes.
    pub cleanup_interval_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: 300,
            sample_interval_secs: 30,
            sample_limit: 50,
            retention_days: 30,
            cleanup_interval_secs: 6 * 60 * 60,
        }
    }
}

fn default_database() -> String {
    "trireme.db".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

/// Root configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    /// SQLite database path for audit records.
    pub database: String,
    pub logging: LoggingConfig,
    /// Staleness thresholds for the ingress.
    pub staleness: StalenessPolicy,
    /// Edge validity thresholds for the graph.
    pub graph: GraphConfig,
    /// Scanner knobs.
    pub scanner: ScannerConfig,
    /// Book feed reconnection knobs.
    pub reconnection: ReconnectionConfig,
    /// Initial runtime trade settings.
    pub trading: TradeSettings,
    pub audit: AuditConfig,
    /// Book update channel capacity.
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            database: default_database(),
            logging: LoggingConfig::default(),
            staleness: StalenessPolicy::default(),
            graph: GraphConfig::default(),
            scanner: ScannerConfig::default(),
            reconnection: ReconnectionConfig::default(),
            trading: TradeSettings::default(),
            audit: AuditConfig::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file. A missing file
    /// yields the defaults, so a bare checkout can run a dry scan.
    ///
    /// # Errors
    /// Returns an error for unreadable or invalid files.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };

        config.trading.validate()?;
        if config.database.trim().is_empty() {
            return Err(Error::Config("database path is empty".to_string()));
        }
        Ok(config)
    }

    /// Install the global tracing subscriber.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.logging.level));

        if self.logging.json {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        config.trading.validate().unwrap();
        assert_eq!(config.database, "trireme.db");
        assert_eq!(config.channel_capacity, 1024);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load("/nonexistent/trireme.toml").unwrap();
        assert_eq!(config.trading.max_pairs, 300);
    }

    #[test]
    fn toml_overrides_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trireme.toml");
        std::fs::write(
            &path,
            r#"
database = "custom.db"

[trading]
trade_amount = "25"
orderbook_depth = 100

[staleness]
reject_ms = 3000
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database, "custom.db");
        assert_eq!(config.trading.trade_amount, dec!(25));
        assert_eq!(config.trading.orderbook_depth, 100);
        assert_eq!(config.staleness.reject_ms, 3000);
        // Untouched sections keep defaults
        assert_eq!(config.staleness.warn_ms, 500);
    }

    #[test]
    fn invalid_trading_section_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trireme.toml");
        std::fs::write(
            &path,
            r#"
[trading]
max_daily_loss = "5000"
"#,
        )
        .unwrap();

        assert!(Config::load(&path).is_err());
    }
}
