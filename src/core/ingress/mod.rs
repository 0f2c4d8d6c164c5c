//! Market-data ingress.
//!
//! Owns the per-pair L2 order books, applies feed snapshots and
//! incrementals, detects sequence gaps, and publishes one [`BookUpdate`]
//! per successful apply on a bounded channel. The scanner drains that
//! channel greedily, so a burst of updates for the same pair coalesces
//! into a single refresh of the latest state.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::core::domain::{OrderBook, PriceLevel};
use crate::core::exchange::{BookEvent, BookStream};

/// Staleness thresholds in milliseconds.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StalenessPolicy {
    /// Age at which a warning is logged.
    #[serde(default = "default_warn_ms")]
    pub warn_ms: u64,
    /// Age at which the scanner applies its conservative latency penalty.
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u64,
    /// Age at which the book is considered invalid.
    #[serde(default = "default_reject_ms")]
    pub reject_ms: u64,
}

fn default_warn_ms() -> u64 {
    500
}

fn default_buffer_ms() -> u64 {
    1000
}

fn default_reject_ms() -> u64 {
    2000
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            warn_ms: default_warn_ms(),
            buffer_ms: default_buffer_ms(),
            reject_ms: default_reject_ms(),
        }
    }
}

/// Notification sent after every book apply.
#[derive(Debug, Clone)]
pub struct BookUpdate {
    /// Streaming channel name of the pair.
    pub pair: String,
    pub sequence: u64,
    pub ts: DateTime<Utc>,
    /// False when the apply invalidated the book (gap, staleness reject).
    pub valid: bool,
}

/// Outcome of applying one feed event.
#[derive(Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The pair's book is out of sync and needs a fresh snapshot.
    GapDetected(String),
    Ignored,
}

/// Maintains a correct, fresh order book for every active pair.
pub struct MarketDataIngress {
    books: DashMap<String, OrderBook>,
    policy: StalenessPolicy,
    update_tx: mpsc::Sender<BookUpdate>,
    depth: AtomicU32,
    max_pairs: AtomicUsize,
    reconnect_requested: AtomicBool,
}

impl MarketDataIngress {
    /// Create an ingress publishing updates on the given channel.
    #[must_use]
    pub fn new(
        policy: StalenessPolicy,
        depth: u32,
        max_pairs: usize,
        update_tx: mpsc::Sender<BookUpdate>,
    ) -> Self {
        Self {
            books: DashMap::new(),
            policy,
            update_tx,
            depth: AtomicU32::new(depth),
            max_pairs: AtomicUsize::new(max_pairs),
            reconnect_requested: AtomicBool::new(false),
        }
    }

    /// The staleness thresholds in force.
    #[must_use]
    pub const fn policy(&self) -> StalenessPolicy {
        self.policy
    }

    /// Currently subscribed book depth.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::SeqCst)
    }

    /// Current max-pairs cap.
    #[must_use]
    pub fn max_pairs(&self) -> usize {
        self.max_pairs.load(Ordering::SeqCst)
    }

    /// Get the latest book for a pair; never blocks.
    #[must_use]
    pub fn get_book(&self, pair: &str) -> Option<OrderBook> {
        self.books.get(pair).map(|book| book.clone())
    }

    /// Number of pairs with a book.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.books.len()
    }

    /// Mean book age across all pairs, for health snapshots.
    #[must_use]
    pub fn avg_age_ms(&self) -> u64 {
        let count = self.books.len() as u64;
        if count == 0 {
            return 0;
        }
        let total: u64 = self.books.iter().map(|book| book.age_ms()).sum();
        total / count
    }

    /// Hot-reconfigure the subscribed depth. Requires a reconnect; returns
    /// true so downstream expects a brief invalidation window.
    pub fn set_depth(&self, depth: u32) -> bool {
        self.depth.store(depth, Ordering::SeqCst);
        self.request_reconnect();
        true
    }

    /// Hot-reconfigure the pair cap. Requires a reconnect; returns true so
    /// downstream expects a brief invalidation window.
    pub fn set_max_pairs(&self, max_pairs: usize) -> bool {
        self.max_pairs.store(max_pairs, Ordering::SeqCst);
        self.request_reconnect();
        true
    }

    /// Invalidate every book and flag the stream loop to reconnect.
    pub fn request_reconnect(&self) {
        self.invalidate_all();
        self.reconnect_requested.store(true, Ordering::SeqCst);
    }

    fn take_reconnect_request(&self) -> bool {
        self.reconnect_requested.swap(false, Ordering::SeqCst)
    }

    /// Invalidate all books (reconnect, resubscribe window).
    pub fn invalidate_all(&self) {
        for mut book in self.books.iter_mut() {
            book.invalidate();
        }
    }

    async fn publish(&self, update: BookUpdate) {
        // The scanner drains in batches; a transiently full channel just
        // means backpressure until the next drain.
        if let Err(mpsc::error::TrySendError::Full(update)) = self.update_tx.try_send(update) {
            warn!("Book update channel full, awaiting capacity");
            let _ = self.update_tx.send(update).await;
        }
    }

    /// Apply one feed event to the owned books, publishing a [`BookUpdate`]
    /// per successful apply.
    pub async fn apply_event(&self, event: BookEvent) -> ApplyOutcome {
        match event {
            BookEvent::Snapshot {
                pair,
                sequence,
                bids,
                asks,
            } => {
                let bids = bids
                    .into_iter()
                    .map(|(price, size)| PriceLevel::new(price, size))
                    .collect();
                let asks = asks
                    .into_iter()
                    .map(|(price, size)| PriceLevel::new(price, size))
                    .collect();

                self.books
                    .entry(pair.clone())
                    .or_default()
                    .apply_snapshot(bids, asks, sequence);

                self.publish(BookUpdate {
                    pair,
                    sequence,
                    ts: Utc::now(),
                    valid: true,
                })
                .await;
                ApplyOutcome::Applied
            }
            BookEvent::Delta {
                pair,
                sequence,
                side,
                price,
                size,
            } => {
                let Some(mut book) = self.books.get_mut(&pair) else {
                    debug!(pair = %pair, "Delta for unknown pair, requesting snapshot");
                    return ApplyOutcome::GapDetected(pair);
                };

                let current = book.sequence();
                if sequence < current {
                    // Duplicate delivery
                    return ApplyOutcome::Ignored;
                }

                // Batch members share a sequence number, so equality is in
                // sync; anything past current + 1 is a gap.
                if sequence > current + 1 {
                    warn!(
                        pair = %pair,
                        expected = current + 1,
                        got = sequence,
                        "Sequence gap detected, invalidating book"
                    );
                    book.invalidate();
                    drop(book);
                    self.publish(BookUpdate {
                        pair: pair.clone(),
                        sequence,
                        ts: Utc::now(),
                        valid: false,
                    })
                    .await;
                    return ApplyOutcome::GapDetected(pair);
                }

                book.apply_delta(side, price, size, sequence);
                drop(book);

                self.publish(BookUpdate {
                    pair,
                    sequence,
                    ts: Utc::now(),
                    valid: true,
                })
                .await;
                ApplyOutcome::Applied
            }
            BookEvent::Heartbeat | BookEvent::Disconnected { .. } => ApplyOutcome::Ignored,
        }
    }
}

/// Drive the ingress from a book stream until shutdown.
///
/// Handles (re)subscription, per-pair resync after sequence gaps, and
/// depth/max-pairs reconfiguration requests.
pub async fn run_ingress<S: BookStream>(
    ingress: std::sync::Arc<MarketDataIngress>,
    mut stream: S,
    pairs: Vec<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.connect().await {
        warn!(error = %e, "Initial book feed connect failed");
    }
    if let Err(e) = stream.subscribe(&pairs, ingress.depth()).await {
        warn!(error = %e, "Initial book subscription failed");
    }

    loop {
        if ingress.take_reconnect_request() {
            info!("Reconnect requested, re-establishing book feed");
            if let Err(e) = stream.connect().await {
                warn!(error = %e, "Reconnect failed, stream will retry");
            } else if let Err(e) = stream.subscribe(&pairs, ingress.depth()).await {
                warn!(error = %e, "Resubscription failed");
            }
        }

        tokio::select! {
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    info!("Ingress shutting down");
                    break;
                }
            }
            event = stream.next_event() => {
                let Some(event) = event else {
                    warn!("Book stream ended");
                    break;
                };
                if let ApplyOutcome::GapDetected(pair) = ingress.apply_event(event).await {
                    if let Err(e) = stream.subscribe(&[pair.clone()], ingress.depth()).await {
                        warn!(pair = %pair, error = %e, "Resubscription after gap failed");
                    }
                }
            }
        }
    }
}
