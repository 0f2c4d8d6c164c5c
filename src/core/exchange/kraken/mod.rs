//! Kraken exchange adapter.
//!
//! REST client for the authenticated private channel and pair discovery,
//! plus the public WebSocket book feed.

mod auth;
mod client;
mod messages;
mod stream;

pub use auth::{Credentials, NonceGenerator};
pub use client::{KrakenClient, DEFAULT_API_URL};
pub use stream::{KrakenBookStream, DEFAULT_WS_URL};
