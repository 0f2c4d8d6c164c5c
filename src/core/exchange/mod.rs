//! Exchange abstraction layer.
//!
//! ## Adding a New Exchange
//!
//! 1. Create a module under `exchange/<name>/`
//! 2. Implement [`ExchangeAdapter`] for the REST surface and [`BookStream`]
//!    for the public book feed
//! 3. Wire both into the engine startup
//!
//! The graph and scanner only ever see domain types, so a second adapter
//! needs no changes outside this module.

pub mod kraken;
mod reconnecting;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::domain::BookSide;
use crate::error::Result;

pub use reconnecting::{ReconnectingBookStream, ReconnectionConfig};

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Wire form expected by the exchange.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// The opposite side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order pricing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Market,
    Limit,
}

impl OrderKind {
    /// Wire form expected by the exchange.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
        }
    }
}

/// An order to be placed through the private channel.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub pair: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub volume: Decimal,
    /// Required for limit orders.
    pub price: Option<Decimal>,
}

/// Lifecycle state reported by the exchange for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Open,
    Closed,
    Canceled,
    Expired,
}

/// Status of one order as reported by the private channel.
#[derive(Debug, Clone)]
pub struct OrderStatus {
    pub state: OrderState,
    pub price: Decimal,
    pub executed_volume: Decimal,
    pub fee: Decimal,
    pub fee_currency: Option<String>,
}

/// Static attributes of one listed pair, as discovered at startup.
#[derive(Debug, Clone)]
pub struct PairInfo {
    /// REST order-placement name (e.g. `XXBTZUSD`).
    pub wire_name: String,
    /// Streaming channel name (e.g. `XBT/USD`).
    pub ws_name: String,
    pub base: String,
    pub quote: String,
    pub price_decimals: u32,
    pub volume_decimals: u32,
    pub min_volume: Decimal,
    pub volume_24h: Decimal,
}

/// Account fee tier for taker/maker, expressed in percent.
#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    pub taker_pct: Decimal,
    pub maker_pct: Decimal,
}

/// A top-of-book quote from the public ticker.
#[derive(Debug, Clone, Copy)]
pub struct TickerQuote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
}

/// Events from the public book feed.
#[derive(Debug, Clone)]
pub enum BookEvent {
    /// Full book replacement for one pair.
    Snapshot {
        pair: String,
        sequence: u64,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    },
    /// One incremental level change. `size == 0` deletes the level.
    Delta {
        pair: String,
        sequence: u64,
        side: BookSide,
        price: Decimal,
        size: Decimal,
    },
    /// Feed keepalive.
    Heartbeat,
    /// Connection lost; the reconnecting wrapper consumes this.
    Disconnected { reason: String },
}

/// The authenticated REST surface of one exchange.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange name for logging.
    fn name(&self) -> &'static str;

    /// Fetch the active-pair catalog, top `max_pairs` by 24h volume.
    async fn list_pairs(&self, max_pairs: usize) -> Result<Vec<PairInfo>>;

    /// Place an order; returns the assigned transaction id.
    async fn place_order(&self, request: &OrderRequest) -> Result<String>;

    /// Query the status of a previously placed order.
    async fn query_order(&self, txid: &str) -> Result<OrderStatus>;

    /// Cancel an open order.
    async fn cancel_order(&self, txid: &str) -> Result<()>;

    /// Fetch account balances keyed by wire asset symbol.
    async fn balance(&self) -> Result<HashMap<String, Decimal>>;

    /// Fetch the account's current taker/maker fee tier.
    async fn fees(&self) -> Result<FeeSchedule>;

    /// Fetch the public ticker for one pair.
    async fn ticker(&self, pair: &str) -> Result<TickerQuote>;

    /// Lightweight liveness probe against the exchange.
    async fn ping(&self) -> Result<()>;
}

/// The public streaming book feed of one exchange.
#[async_trait]
pub trait BookStream: Send {
    /// Establish the connection.
    async fn connect(&mut self) -> Result<()>;

    /// Subscribe to book channels for the given wire pair names.
    async fn subscribe(&mut self, pairs: &[String], depth: u32) -> Result<()>;

    /// Receive the next feed event. `None` means the stream has ended.
    async fn next_event(&mut self) -> Option<BookEvent>;

    /// Exchange name for logging.
    fn exchange_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_side_wire_form() {
        assert_eq!(OrderSide::Buy.as_str(), "buy");
        assert_eq!(OrderSide::Sell.as_str(), "sell");
    }

    #[test]
    fn order_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn order_kind_wire_form() {
        assert_eq!(OrderKind::Market.as_str(), "market");
        assert_eq!(OrderKind::Limit.as_str(), "limit");
    }
}
