//! Kraken WebSocket book stream.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{BookData, SubscribeMessage, WsMessage, WsPriceLevel};
use crate::core::domain::BookSide;
use crate::core::exchange::{BookEvent, BookStream};
use crate::error::{Error, Result};

/// Default public WebSocket endpoint.
pub const DEFAULT_WS_URL: &str = "wss://ws.kraken.com/v2";

/// Streaming book client for the public feed.
///
/// Delta messages are flattened into one [`BookEvent::Delta`] per changed
/// level; a batch shares its sequence number, which keeps the per-pair
/// sequence monotonic for gap detection upstream.
pub struct KrakenBookStream {
    url: String,
    ws: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    pending: Vec<BookEvent>,
}

impl KrakenBookStream {
    /// Create a stream for the given WebSocket URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ws: None,
            pending: Vec::new(),
        }
    }

    fn parse_levels(levels: &[WsPriceLevel]) -> Vec<(Decimal, Decimal)> {
        levels
            .iter()
            .filter_map(|level| Some((level.price.parse().ok()?, level.qty.parse().ok()?)))
            .collect()
    }

    /// Convert one book payload into feed events, snapshot or deltas.
    fn data_to_events(kind: &str, data: BookData) -> Vec<BookEvent> {
        if kind == "snapshot" {
            return vec![BookEvent::Snapshot {
                pair: data.symbol,
                sequence: data.sequence,
                bids: Self::parse_levels(&data.bids),
                asks: Self::parse_levels(&data.asks),
            }];
        }

        let mut events = Vec::new();
        for (side, levels) in [(BookSide::Bid, &data.bids), (BookSide::Ask, &data.asks)] {
            for (price, size) in Self::parse_levels(levels) {
                events.push(BookEvent::Delta {
                    pair: data.symbol.clone(),
                    sequence: data.sequence,
                    side,
                    price,
                    size,
                });
            }
        }
        events
    }
}

#[async_trait]
impl BookStream for KrakenBookStream {
    async fn connect(&mut self) -> Result<()> {
        info!(url = %self.url, "Connecting to book feed");
        let (ws_stream, response) = connect_async(&self.url).await?;
        info!(status = %response.status(), "Book feed connected");
        self.ws = Some(ws_stream);
        self.pending.clear();
        Ok(())
    }

    async fn subscribe(&mut self, pairs: &[String], depth: u32) -> Result<()> {
        let ws = self
            .ws
            .as_mut()
            .ok_or_else(|| Error::Connection("Not connected".into()))?;

        let msg = SubscribeMessage::book(pairs.to_vec(), depth);
        let json = serde_json::to_string(&msg)?;

        info!(pairs = pairs.len(), depth, "Subscribing to book channels");
        ws.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<BookEvent> {
        if let Some(event) = self.pending.pop() {
            return Some(event);
        }

        let ws = self.ws.as_mut()?;

        loop {
            match ws.next().await? {
                Ok(Message::Text(text)) => {
                    debug!(raw = %text, "Received message");
                    match serde_json::from_str::<WsMessage>(&text) {
                        Ok(WsMessage::Book(book)) => {
                            for data in book.data {
                                self.pending
                                    .extend(Self::data_to_events(&book.kind, data));
                            }
                            // Oldest first
                            self.pending.reverse();
                            if let Some(event) = self.pending.pop() {
                                return Some(event);
                            }
                        }
                        Ok(WsMessage::Heartbeat) => return Some(BookEvent::Heartbeat),
                        Ok(WsMessage::Status(status)) => {
                            debug!(status = %status, "Feed status");
                        }
                        Ok(WsMessage::Unknown) => {}
                        Err(e) => {
                            warn!(error = %e, raw = %text, "Failed to parse message");
                        }
                    }
                }
                Ok(Message::Ping(data)) => {
                    debug!("Received ping");
                    if ws.send(Message::Pong(data)).await.is_err() {
                        return Some(BookEvent::Disconnected {
                            reason: "Failed to send pong".into(),
                        });
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!(frame = ?frame, "Book feed closed by server");
                    return Some(BookEvent::Disconnected {
                        reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "WebSocket error");
                    return Some(BookEvent::Disconnected {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn exchange_name(&self) -> &'static str {
        "Kraken"
    }
}
