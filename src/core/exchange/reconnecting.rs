//! Reconnecting wrapper for BookStream.
//!
//! Provides automatic reconnection with exponential backoff and a heartbeat
//! watchdog for any BookStream implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::{BookEvent, BookStream};
use crate::error::Result;

/// Reconnection tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectionConfig {
    /// Delay before the first reconnect attempt.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on the backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Maximum silent interval before the connection is presumed dead.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

/// Wrapper that adds reconnection and heartbeat supervision to any
/// BookStream. Subscriptions are replayed after every reconnect; the
/// consumer sees a gapless stream of events (books are invalidated
/// upstream through fresh snapshots).
pub struct ReconnectingBookStream<S: BookStream> {
    inner: S,
    config: ReconnectionConfig,
    subscribed_pairs: Vec<String>,
    subscribed_depth: u32,
    consecutive_failures: u32,
    current_delay_ms: u64,
    connected: bool,
}

impl<S: BookStream> ReconnectingBookStream<S> {
    /// Create a new reconnecting wrapper.
    pub fn new(inner: S, config: ReconnectionConfig) -> Self {
        let initial_delay = config.initial_delay_ms;
        Self {
            inner,
            config,
            subscribed_pairs: Vec::new(),
            subscribed_depth: 0,
            consecutive_failures: 0,
            current_delay_ms: initial_delay,
            connected: false,
        }
    }

    fn reset_backoff(&mut self) {
        self.consecutive_failures = 0;
        self.current_delay_ms = self.config.initial_delay_ms;
    }

    fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_millis(self.current_delay_ms);
        let next = (self.current_delay_ms as f64 * self.config.backoff_multiplier) as u64;
        self.current_delay_ms = next.min(self.config.max_delay_ms);
        delay
    }

    async fn reconnect(&mut self) -> Result<()> {
        let delay = self.next_delay();
        info!(
            delay_ms = delay.as_millis(),
            attempt = self.consecutive_failures + 1,
            "Reconnecting after delay"
        );
        sleep(delay).await;

        match self.inner.connect().await {
            Ok(()) => {
                info!("Reconnected successfully");
                self.connected = true;

                if !self.subscribed_pairs.is_empty() {
                    debug!(
                        pairs = self.subscribed_pairs.len(),
                        "Resubscribing to book channels"
                    );
                    self.inner
                        .subscribe(&self.subscribed_pairs, self.subscribed_depth)
                        .await?;
                }

                self.reset_backoff();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Reconnection failed");
                self.consecutive_failures += 1;
                self.connected = false;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<S: BookStream + Send> BookStream for ReconnectingBookStream<S> {
    async fn connect(&mut self) -> Result<()> {
        let result = self.inner.connect().await;
        if result.is_ok() {
            self.connected = true;
            self.reset_backoff();
        }
        result
    }

    async fn subscribe(&mut self, pairs: &[String], depth: u32) -> Result<()> {
        // Store for resubscription after reconnect
        self.subscribed_pairs = pairs.to_vec();
        self.subscribed_depth = depth;
        self.inner.subscribe(pairs, depth).await
    }

    async fn next_event(&mut self) -> Option<BookEvent> {
        loop {
            if !self.connected {
                if let Err(e) = self.reconnect().await {
                    warn!(error = %e, "Reconnection attempt failed, will retry");
                    continue;
                }
            }

            let silent_limit = Duration::from_millis(self.config.heartbeat_timeout_ms);
            match timeout(silent_limit, self.inner.next_event()).await {
                Ok(Some(BookEvent::Disconnected { reason })) => {
                    warn!(reason = %reason, "Connection lost, will reconnect");
                    self.connected = false;
                    self.consecutive_failures += 1;
                    continue;
                }
                Ok(Some(event)) => {
                    if self.consecutive_failures > 0 {
                        debug!("Received event after reconnection, resetting failure count");
                        self.reset_backoff();
                    }
                    return Some(event);
                }
                Ok(None) => {
                    warn!("Book stream ended unexpectedly, will reconnect");
                    self.connected = false;
                    self.consecutive_failures += 1;
                    continue;
                }
                Err(_) => {
                    warn!(
                        silent_ms = self.config.heartbeat_timeout_ms,
                        "Heartbeat timeout, will reconnect"
                    );
                    self.connected = false;
                    self.consecutive_failures += 1;
                    continue;
                }
            }
        }
    }

    fn exchange_name(&self) -> &'static str {
        self.inner.exchange_name()
    }
}
