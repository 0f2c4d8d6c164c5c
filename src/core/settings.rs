//! Validated runtime trade settings.
//!
//! All knobs are operator-configurable; updates are validated against the
//! recognized option sets and take effect on the next scan or execution.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core::domain::Currency;
use crate::error::{Error, Result};

/// Preset trade amounts offered to the operator.
pub const TRADE_AMOUNT_PRESETS: &[&str] = &["5", "10", "15", "20", "25", "50", "75", "100"];
/// Allowed profit-threshold range in percent.
pub const MIN_PROFIT_PCT_RANGE: (Decimal, Decimal) = (Decimal::ZERO, Decimal::from_parts(9, 0, 0, false, 1));
/// Allowed loss-limit range in USD.
pub const MAX_LOSS_RANGE: (u32, u32) = (10, 200);
/// Allowed per-leg retry range.
pub const MAX_RETRIES_RANGE: (u32, u32) = (0, 5);
/// Allowed per-leg timeout range in seconds.
pub const ORDER_TIMEOUT_RANGE: (u64, u64) = (10, 120);
/// Recognized scan cadences in milliseconds.
pub const SCAN_INTERVAL_OPTIONS: &[u64] = &[100, 250, 500, 1000, 2000, 5000, 7000, 10000];
/// Recognized subscription depths.
pub const ORDERBOOK_DEPTH_OPTIONS: &[u32] = &[10, 25, 100, 500, 1000];
/// Recognized pair caps.
pub const MAX_PAIRS_OPTIONS: &[usize] = &[100, 200, 300, 400];
/// Recognized base-currency filter symbols.
pub const BASE_CURRENCY_OPTIONS: &[&str] = &["ALL", "USD", "EUR", "USDT", "BTC", "ETH", "CUSTOM"];

/// Cycle-start filter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BaseCurrencyFilter {
    /// Any start currency is permitted.
    All,
    /// Only the named symbol.
    Usd,
    Eur,
    Usdt,
    Btc,
    Eth,
    /// Only symbols in `custom_currencies`.
    Custom,
}

impl BaseCurrencyFilter {
    /// Parse the operator-facing symbol form.
    ///
    /// # Errors
    /// Returns an error naming the allowed set for unknown symbols.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "ALL" => Ok(Self::All),
            "USD" => Ok(Self::Usd),
            "EUR" => Ok(Self::Eur),
            "USDT" => Ok(Self::Usdt),
            "BTC" => Ok(Self::Btc),
            "ETH" => Ok(Self::Eth),
            "CUSTOM" => Ok(Self::Custom),
            other => Err(Error::Config(format!(
                "base_currency '{other}' not recognized; allowed: {}",
                BASE_CURRENCY_OPTIONS.join(", ")
            ))),
        }
    }

    /// Whether a cycle starting at `currency` passes this filter.
    #[must_use]
    pub fn permits(&self, currency: &Currency, custom: &[Currency]) -> bool {
        match self {
            Self::All => true,
            Self::Usd => currency.as_str() == "USD",
            Self::Eur => currency.as_str() == "EUR",
            Self::Usdt => currency.as_str() == "USDT",
            Self::Btc => currency.as_str() == "BTC",
            Self::Eth => currency.as_str() == "ETH",
            Self::Custom => custom.contains(currency),
        }
    }
}

/// The tunable knob set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradeSettings {
    /// Master switch for execution.
    pub is_enabled: bool,
    /// Per-trade notional in the start currency.
    pub trade_amount: Decimal,
    /// Minimum net profit to trigger execution, in percent.
    pub min_profit_pct: Decimal,
    /// Daily loss cap in USD; breaks the circuit when reached.
    pub max_daily_loss: Decimal,
    /// Cumulative loss cap in USD; breaks the circuit when reached.
    pub max_total_loss: Decimal,
    /// Retries after a leg failure before the leg is fatal.
    pub max_retries_per_leg: u32,
    /// Per-leg fill deadline in seconds.
    pub order_timeout_seconds: u64,
    /// Cycle-start filter.
    pub base_currency: BaseCurrencyFilter,
    /// Symbols used when `base_currency` is `CUSTOM`.
    pub custom_currencies: Vec<Currency>,
    /// Cache refresh cadence for readers, in milliseconds.
    pub scan_interval_ms: u64,
    /// Subscribed L2 depth.
    pub orderbook_depth: u32,
    /// Top-N pairs by 24h volume to subscribe.
    pub max_pairs: usize,
    /// Taker fee in percent, refreshed from the exchange at startup.
    pub taker_fee_pct: Decimal,
    /// Maker fee in percent, refreshed from the exchange at startup.
    pub maker_fee_pct: Decimal,
    /// Allow maker placement on non-final legs.
    pub maker_legs_enabled: bool,
    /// Minimum net profit before a maker leg is attempted, in percent.
    pub min_profit_for_maker_pct: Decimal,
    /// Maximum spread for a maker leg attempt, in percent.
    pub max_spread_for_maker_pct: Decimal,
    /// When execution was last enabled.
    pub enabled_at: Option<DateTime<Utc>>,
    /// When execution was last disabled.
    pub disabled_at: Option<DateTime<Utc>>,
}

impl Default for TradeSettings {
    fn default() -> Self {
        Self {
            is_enabled: false,
            trade_amount: Decimal::TEN,
            min_profit_pct: Decimal::new(5, 2), // 0.05%
            max_daily_loss: Decimal::from(30),
            max_total_loss: Decimal::from(30),
            max_retries_per_leg: 2,
            order_timeout_seconds: 15,
            base_currency: BaseCurrencyFilter::Usd,
            custom_currencies: Vec::new(),
            scan_interval_ms: 10_000,
            orderbook_depth: 25,
            max_pairs: 300,
            taker_fee_pct: Decimal::new(26, 2), // 0.26%
            maker_fee_pct: Decimal::new(16, 2), // 0.16%
            maker_legs_enabled: false,
            min_profit_for_maker_pct: Decimal::new(30, 2),
            max_spread_for_maker_pct: Decimal::new(10, 2),
            enabled_at: None,
            disabled_at: None,
        }
    }
}

impl TradeSettings {
    /// Validate every knob against its allowed set.
    ///
    /// # Errors
    /// Returns an error describing the allowed set for the first invalid
    /// value found.
    pub fn validate(&self) -> Result<()> {
        if self.trade_amount <= Decimal::ZERO {
            return Err(Error::Config(format!(
                "trade_amount must be greater than 0 (presets: {})",
                TRADE_AMOUNT_PRESETS.join(", ")
            )));
        }
        let (min_profit_lo, min_profit_hi) = MIN_PROFIT_PCT_RANGE;
        if self.min_profit_pct < min_profit_lo || self.min_profit_pct > min_profit_hi {
            return Err(Error::Config(format!(
                "min_profit_pct must be between {min_profit_lo} and {min_profit_hi} percent"
            )));
        }
        for (name, value) in [
            ("max_daily_loss", self.max_daily_loss),
            ("max_total_loss", self.max_total_loss),
        ] {
            let (lo, hi) = MAX_LOSS_RANGE;
            if value < Decimal::from(lo) || value > Decimal::from(hi) {
                return Err(Error::Config(format!(
                    "{name} must be between {lo} and {hi} USD"
                )));
            }
        }
        let (retries_lo, retries_hi) = MAX_RETRIES_RANGE;
        if self.max_retries_per_leg < retries_lo || self.max_retries_per_leg > retries_hi {
            return Err(Error::Config(format!(
                "max_retries_per_leg must be between {retries_lo} and {retries_hi}"
            )));
        }
        let (timeout_lo, timeout_hi) = ORDER_TIMEOUT_RANGE;
        if self.order_timeout_seconds < timeout_lo || self.order_timeout_seconds > timeout_hi {
            return Err(Error::Config(format!(
                "order_timeout_seconds must be between {timeout_lo} and {timeout_hi}"
            )));
        }
        if !SCAN_INTERVAL_OPTIONS.contains(&self.scan_interval_ms) {
            return Err(Error::Config(format!(
                "scan_interval_ms must be one of {SCAN_INTERVAL_OPTIONS:?}"
            )));
        }
        if !ORDERBOOK_DEPTH_OPTIONS.contains(&self.orderbook_depth) {
            return Err(Error::Config(format!(
                "orderbook_depth must be one of {ORDERBOOK_DEPTH_OPTIONS:?}"
            )));
        }
        if !MAX_PAIRS_OPTIONS.contains(&self.max_pairs) {
            return Err(Error::Config(format!(
                "max_pairs must be one of {MAX_PAIRS_OPTIONS:?}"
            )));
        }
        if self.base_currency == BaseCurrencyFilter::Custom && self.custom_currencies.is_empty() {
            return Err(Error::Config(
                "custom_currencies must be non-empty when base_currency is CUSTOM".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a cycle-start currency passes the configured filter.
    #[must_use]
    pub fn permits_start(&self, currency: &Currency) -> bool {
        self.base_currency.permits(currency, &self.custom_currencies)
    }
}

/// Shared, live view of the settings. Updates are validated before they
/// become visible; readers clone a consistent snapshot.
pub struct SettingsHandle {
    inner: RwLock<TradeSettings>,
}

impl SettingsHandle {
    /// Wrap validated settings.
    ///
    /// # Errors
    /// Returns an error if the initial settings are invalid.
    pub fn new(settings: TradeSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            inner: RwLock::new(settings),
        })
    }

    /// Snapshot the current settings.
    #[must_use]
    pub fn get(&self) -> TradeSettings {
        self.inner.read().clone()
    }

    /// Apply a validated update. The mutation is discarded if the result
    /// fails validation.
    ///
    /// # Errors
    /// Returns the validation error for a rejected update.
    pub fn update(&self, mutate: impl FnOnce(&mut TradeSettings)) -> Result<TradeSettings> {
        let mut guard = self.inner.write();
        let mut candidate = guard.clone();
        mutate(&mut candidate);
        candidate.validate()?;
        *guard = candidate.clone();
        Ok(candidate)
    }

    /// Enable execution, stamping `enabled_at`.
    pub fn enable(&self) -> TradeSettings {
        let mut guard = self.inner.write();
        guard.is_enabled = true;
        guard.enabled_at = Some(Utc::now());
        guard.disabled_at = None;
        guard.clone()
    }

    /// Disable execution, stamping `disabled_at`.
    pub fn disable(&self) -> TradeSettings {
        let mut guard = self.inner.write();
        guard.is_enabled = false;
        guard.disabled_at = Some(Utc::now());
        guard.clone()
    }

    /// Refresh the fee tier from the exchange.
    pub fn set_fees(&self, taker_pct: Decimal, maker_pct: Decimal) {
        let mut guard = self.inner.write();
        guard.taker_fee_pct = taker_pct;
        guard.maker_fee_pct = maker_pct;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_validate() {
        TradeSettings::default().validate().unwrap();
    }

    #[test]
    fn default_values_match_documented_defaults() {
        let settings = TradeSettings::default();
        assert!(!settings.is_enabled);
        assert_eq!(settings.trade_amount, dec!(10));
        assert_eq!(settings.min_profit_pct, dec!(0.05));
        assert_eq!(settings.max_daily_loss, dec!(30));
        assert_eq!(settings.max_retries_per_leg, 2);
        assert_eq!(settings.order_timeout_seconds, 15);
        assert_eq!(settings.orderbook_depth, 25);
        assert_eq!(settings.max_pairs, 300);
        assert_eq!(settings.taker_fee_pct, dec!(0.26));
        assert_eq!(settings.maker_fee_pct, dec!(0.16));
    }

    #[test]
    fn rejects_zero_trade_amount() {
        let settings = TradeSettings {
            trade_amount: Decimal::ZERO,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("trade_amount"));
    }

    #[test]
    fn rejects_profit_threshold_above_range() {
        let settings = TradeSettings {
            min_profit_pct: dec!(1.0),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn accepts_profit_threshold_at_bounds() {
        for pct in [dec!(0), dec!(0.9)] {
            let settings = TradeSettings {
                min_profit_pct: pct,
                ..Default::default()
            };
            settings.validate().unwrap();
        }
    }

    #[test]
    fn rejects_loss_limits_outside_range() {
        for value in [dec!(9.99), dec!(200.01)] {
            let settings = TradeSettings {
                max_daily_loss: value,
                ..Default::default()
            };
            let err = settings.validate().unwrap_err();
            assert!(err.to_string().contains("max_daily_loss"));
        }
    }

    #[test]
    fn rejects_unlisted_enum_values() {
        let settings = TradeSettings {
            scan_interval_ms: 750,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("scan_interval_ms"));

        let settings = TradeSettings {
            orderbook_depth: 50,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = TradeSettings {
            max_pairs: 250,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn custom_filter_requires_symbols() {
        let settings = TradeSettings {
            base_currency: BaseCurrencyFilter::Custom,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = TradeSettings {
            base_currency: BaseCurrencyFilter::Custom,
            custom_currencies: vec![Currency::new("SOL")],
            ..Default::default()
        };
        settings.validate().unwrap();
    }

    #[test]
    fn filter_permits_matching_start() {
        let usd = Currency::new("USD");
        let btc = Currency::new("BTC");

        assert!(BaseCurrencyFilter::All.permits(&btc, &[]));
        assert!(BaseCurrencyFilter::Usd.permits(&usd, &[]));
        assert!(!BaseCurrencyFilter::Usd.permits(&btc, &[]));
        assert!(BaseCurrencyFilter::Custom.permits(&btc, &[btc.clone()]));
        assert!(!BaseCurrencyFilter::Custom.permits(&usd, &[btc]));
    }

    #[test]
    fn filter_parse_names_allowed_set() {
        assert_eq!(
            BaseCurrencyFilter::parse("USDT").unwrap(),
            BaseCurrencyFilter::Usdt
        );
        let err = BaseCurrencyFilter::parse("DOGE").unwrap_err();
        assert!(err.to_string().contains("ALL"));
        assert!(err.to_string().contains("CUSTOM"));
    }

    #[test]
    fn handle_rejects_invalid_update_and_keeps_state() {
        let handle = SettingsHandle::new(TradeSettings::default()).unwrap();
        let result = handle.update(|s| s.max_daily_loss = dec!(500));
        assert!(result.is_err());
        assert_eq!(handle.get().max_daily_loss, dec!(30));
    }

    #[test]
    fn handle_applies_valid_update() {
        let handle = SettingsHandle::new(TradeSettings::default()).unwrap();
        handle.update(|s| s.trade_amount = dec!(50)).unwrap();
        assert_eq!(handle.get().trade_amount, dec!(50));
    }

    #[test]
    fn enable_disable_stamp_timestamps() {
        let handle = SettingsHandle::new(TradeSettings::default()).unwrap();
        let enabled = handle.enable();
        assert!(enabled.is_enabled);
        assert!(enabled.enabled_at.is_some());

        let disabled = handle.disable();
        assert!(!disabled.is_enabled);
        assert!(disabled.disabled_at.is_some());
    }
}
