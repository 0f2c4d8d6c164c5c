//! Conversion cycles.

use std::fmt;

use super::currency::Currency;
use crate::error::{Error, Result};

/// An ordered sequence of 3 or 4 currencies beginning and ending at the
/// same currency.
///
/// The canonical string form (`"USD → BTC → ETH → USD"`) round-trips
/// through [`Cycle::parse`] and doubles as the deterministic cycle id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cycle {
    currencies: Vec<Currency>,
}

impl Cycle {
    /// Create a cycle from its full currency sequence (start repeated at
    /// the end).
    ///
    /// # Errors
    /// Returns an error unless the sequence has 3 or 4 hops and is closed.
    pub fn new(currencies: Vec<Currency>) -> Result<Self> {
        if currencies.len() < 4 || currencies.len() > 5 {
            return Err(Error::Parse(format!(
                "cycle must have 3 or 4 legs, got {}",
                currencies.len().saturating_sub(1)
            )));
        }
        if currencies.first() != currencies.last() {
            return Err(Error::Parse(
                "cycle must start and end at the same currency".to_string(),
            ));
        }
        Ok(Self { currencies })
    }

    /// Parse a canonical cycle string (`"USD → BTC → ETH → USD"`).
    ///
    /// # Errors
    /// Returns an error for malformed strings.
    pub fn parse(path: &str) -> Result<Self> {
        let currencies: Vec<Currency> = if path.contains('→') {
            path.split('→').map(|c| Currency::new(c.trim())).collect()
        } else {
            path.split_whitespace().map(Currency::new).collect()
        };
        Self::new(currencies)
    }

    /// Get the full currency sequence.
    #[must_use]
    pub fn currencies(&self) -> &[Currency] {
        &self.currencies
    }

    /// Get the start (and end) currency.
    #[must_use]
    pub fn start(&self) -> &Currency {
        &self.currencies[0]
    }

    /// Number of legs (conversions) in the cycle.
    #[must_use]
    pub fn legs(&self) -> usize {
        self.currencies.len() - 1
    }

    /// Iterate the `(from, to)` hops of the cycle.
    pub fn hops(&self) -> impl Iterator<Item = (&Currency, &Currency)> {
        self.currencies.windows(2).map(|w| (&w[0], &w[1]))
    }

    /// Whether the cycle traverses the given currency.
    #[must_use]
    pub fn traverses(&self, currency: &Currency) -> bool {
        self.currencies.contains(currency)
    }

    /// The canonical id of this cycle.
    #[must_use]
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: Vec<&str> = self.currencies.iter().map(Currency::as_str).collect();
        write!(f, "{}", path.join(" → "))
    }
}
