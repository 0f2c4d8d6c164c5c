//! Kraken WebSocket book feed message types.

use serde::{Deserialize, Serialize};

/// Subscription request sent after connecting.
#[derive(Debug, Serialize)]
pub struct SubscribeMessage {
    pub method: &'static str,
    pub params: SubscribeParams,
}

#[derive(Debug, Serialize)]
pub struct SubscribeParams {
    pub channel: &'static str,
    pub symbol: Vec<String>,
    pub depth: u32,
}

impl SubscribeMessage {
    /// Build a book subscription for the given wire pair names.
    #[must_use]
    pub fn book(pairs: Vec<String>, depth: u32) -> Self {
        Self {
            method: "subscribe",
            params: SubscribeParams {
                channel: "book",
                symbol: pairs,
                depth,
            },
        }
    }
}

/// Messages received from the book feed.
#[derive(Debug, Deserialize)]
#[serde(tag = "channel")]
pub enum WsMessage {
    #[serde(rename = "book")]
    Book(BookMessage),

    #[serde(rename = "heartbeat")]
    Heartbeat,

    #[serde(rename = "status")]
    Status(serde_json::Value),

    #[serde(other)]
    Unknown,
}

/// A book channel payload: either a full snapshot or one update batch.
#[derive(Debug, Deserialize)]
pub struct BookMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Vec<BookData>,
}

#[derive(Debug, Deserialize)]
pub struct BookData {
    pub symbol: String,
    pub sequence: u64,
    #[serde(default)]
    pub bids: Vec<WsPriceLevel>,
    #[serde(default)]
    pub asks: Vec<WsPriceLevel>,
}

/// Price level as received from the feed (strings, not decimals).
#[derive(Debug, Clone, Deserialize)]
pub struct WsPriceLevel {
    pub price: String,
    pub qty: String,
}
