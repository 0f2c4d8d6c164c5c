//! Trading pairs and the active-pair catalog.

use std::collections::HashMap;

use rust_decimal::Decimal;

use super::currency::Currency;
use crate::core::exchange::OrderSide;

/// A tradable pair `(base, quote)` with its static exchange attributes.
#[derive(Debug, Clone)]
pub struct Pair {
    base: Currency,
    quote: Currency,
    wire_name: String,
    ws_name: String,
    price_decimals: u32,
    volume_decimals: u32,
    min_volume: Decimal,
}

impl Pair {
    /// Create a new pair.
    pub fn new(
        base: Currency,
        quote: Currency,
        wire_name: impl Into<String>,
        ws_name: impl Into<String>,
        price_decimals: u32,
        volume_decimals: u32,
        min_volume: Decimal,
    ) -> Self {
        Self {
            base,
            quote,
            wire_name: wire_name.into(),
            ws_name: ws_name.into(),
            price_decimals,
            volume_decimals,
            min_volume,
        }
    }

    /// Get the base currency.
    #[must_use]
    pub const fn base(&self) -> &Currency {
        &self.base
    }

    /// Get the quote currency.
    #[must_use]
    pub const fn quote(&self) -> &Currency {
        &self.quote
    }

    /// Get the order-placement identifier (e.g. `XBTUSD`).
    #[must_use]
    pub fn wire_name(&self) -> &str {
        &self.wire_name
    }

    /// Get the streaming channel identifier (e.g. `XBT/USD`).
    #[must_use]
    pub fn ws_name(&self) -> &str {
        &self.ws_name
    }

    /// Price precision in decimal places.
    #[must_use]
    pub const fn price_decimals(&self) -> u32 {
        self.price_decimals
    }

    /// Volume precision in decimal places.
    #[must_use]
    pub const fn volume_decimals(&self) -> u32 {
        self.volume_decimals
    }

    /// Minimum order volume in base currency.
    #[must_use]
    pub const fn min_volume(&self) -> Decimal {
        self.min_volume
    }

    /// Human-readable name (`BTC/USD`).
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// Round a volume down to this pair's volume precision.
    #[must_use]
    pub fn round_volume(&self, volume: Decimal) -> Decimal {
        volume.trunc_with_scale(self.volume_decimals)
    }
}

/// Catalog of active pairs, indexed by wire name and by currency pair.
pub struct PairCatalog {
    by_wire: HashMap<String, Pair>,
    by_ws: HashMap<String, String>,
    by_currencies: HashMap<(Currency, Currency), String>,
}

impl PairCatalog {
    /// Build a catalog from the active-pair list.
    #[must_use]
    pub fn from_pairs(pairs: Vec<Pair>) -> Self {
        let mut by_wire = HashMap::new();
        let mut by_ws = HashMap::new();
        let mut by_currencies = HashMap::new();
        for pair in pairs {
            by_currencies.insert(
                (pair.base.clone(), pair.quote.clone()),
                pair.wire_name.clone(),
            );
            by_ws.insert(pair.ws_name.clone(), pair.wire_name.clone());
            by_wire.insert(pair.wire_name.clone(), pair);
        }
        Self {
            by_wire,
            by_ws,
            by_currencies,
        }
    }

    /// Look up a pair by order-placement name.
    #[must_use]
    pub fn get(&self, wire_name: &str) -> Option<&Pair> {
        self.by_wire.get(wire_name)
    }

    /// Look up a pair by streaming channel name.
    #[must_use]
    pub fn get_by_ws(&self, ws_name: &str) -> Option<&Pair> {
        self.by_ws.get(ws_name).and_then(|wire| self.by_wire.get(wire))
    }

    /// Look up a pair by `(base, quote)` orientation.
    #[must_use]
    pub fn find(&self, base: &Currency, quote: &Currency) -> Option<&Pair> {
        self.by_currencies
            .get(&(base.clone(), quote.clone()))
            .and_then(|wire| self.by_wire.get(wire))
    }

    /// Resolve the exchange pair and side realizing the conversion
    /// `from -> to`.
    ///
    /// If `from` is a quote currency the conversion is a buy of `to/from`;
    /// otherwise it is a sell of `from/to`. When the preferred orientation
    /// is not listed, the opposite orientation of the same two currencies
    /// is used with the side flipped.
    #[must_use]
    pub fn pair_for_hop(&self, from: &Currency, to: &Currency) -> Option<(&Pair, OrderSide)> {
        let (preferred_base, preferred_quote, side) = if from.is_quote() {
            (to, from, OrderSide::Buy)
        } else {
            (from, to, OrderSide::Sell)
        };

        if let Some(pair) = self.find(preferred_base, preferred_quote) {
            return Some((pair, side));
        }
        self.find(preferred_quote, preferred_base)
            .map(|pair| (pair, side.opposite()))
    }

    /// All pairs in the catalog.
    pub fn pairs(&self) -> impl Iterator<Item = &Pair> {
        self.by_wire.values()
    }

    /// Number of pairs in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_wire.len()
    }

    /// Returns true if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_wire.is_empty()
    }
}
