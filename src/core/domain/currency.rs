//! Currency identifiers with exchange wire-format translation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Symbols treated as quote currencies (fiat, stables, and their
/// exchange-prefixed wire forms). Drives buy-vs-sell direction inference.
const QUOTE_CURRENCIES: &[&str] = &[
    "USD", "USDT", "EUR", "ZUSD", "ZEUR", "GBP", "ZGBP", "CAD", "ZCAD", "JPY", "ZJPY",
];

/// Canonical symbol -> exchange wire symbol.
const WIRE_ALIASES: &[(&str, &str)] = &[("BTC", "XBT"), ("DOGE", "XDG")];

/// A short symbolic currency identifier (e.g. `USD`, `BTC`).
///
/// The canonical form is used throughout the core; [`Currency::wire_symbol`]
/// and [`Currency::from_wire`] translate to and from the exchange's naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Create a currency from a canonical symbol.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().to_uppercase())
    }

    /// Get the canonical symbol.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this symbol is in the quote-currency set.
    #[must_use]
    pub fn is_quote(&self) -> bool {
        QUOTE_CURRENCIES.contains(&self.0.as_str())
    }

    /// The exchange wire symbol for this currency (e.g. `BTC` -> `XBT`).
    #[must_use]
    pub fn wire_symbol(&self) -> &str {
        WIRE_ALIASES
            .iter()
            .find(|(canonical, _)| *canonical == self.0)
            .map_or(self.0.as_str(), |(_, wire)| wire)
    }

    /// Build a canonical currency from an exchange wire symbol.
    ///
    /// Handles the alias table (`XBT` -> `BTC`) and the exchange's legacy
    /// single-letter asset-class prefixes (`XXBT`, `ZUSD`).
    #[must_use]
    pub fn from_wire(wire: &str) -> Self {
        let trimmed = match wire.len() {
            4 if wire.starts_with('X') || wire.starts_with('Z') => &wire[1..],
            _ => wire,
        };
        let canonical = WIRE_ALIASES
            .iter()
            .find(|(_, w)| *w == trimmed)
            .map_or(trimmed, |(canonical, _)| canonical);
        Self(canonical.to_string())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(symbol: &str) -> Self {
        Self::new(symbol)
    }
}

impl From<String> for Currency {
    fn from(symbol: String) -> Self {
        Self::new(symbol)
    }
}
