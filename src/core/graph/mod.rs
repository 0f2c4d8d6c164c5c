//! Incrementally-maintained conversion graph.
//!
//! Each active pair `B/Q` contributes two directed edges: `B -> Q` (sell)
//! and `Q -> B` (buy). Edges are replaced atomically in a concurrent map on
//! every book update; readers see a consistent edge or its next version and
//! the graph is never locked as a whole.

mod edge;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core::domain::{BookSide, Currency, OrderBook, Pair, PairCatalog};
use crate::core::exchange::OrderSide;

pub use edge::{Edge, InvalidReason};

/// Graph validity thresholds.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GraphConfig {
    /// Minimum book depth per side for an edge to be valid.
    #[serde(default = "default_min_depth")]
    pub min_depth: usize,
    /// Maximum top-of-book spread for an edge to be valid, in percent.
    #[serde(default = "default_max_spread_pct")]
    pub max_spread_pct: Decimal,
    /// Book age at which edges are rejected, in milliseconds.
    #[serde(default = "default_reject_ms")]
    pub reject_ms: u64,
    /// Number of top levels aggregated into the edge depth sum.
    #[serde(default = "default_depth_levels")]
    pub depth_levels: usize,
}

fn default_min_depth() -> usize {
    3
}

fn default_max_spread_pct() -> Decimal {
    Decimal::TEN
}

fn default_reject_ms() -> u64 {
    2000
}

fn default_depth_levels() -> usize {
    10
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            min_depth: default_min_depth(),
            max_spread_pct: default_max_spread_pct(),
            reject_ms: default_reject_ms(),
            depth_levels: default_depth_levels(),
        }
    }
}

/// Emitted after a pair's edges are recomputed so the scanner can
/// invalidate only paths touching these currencies.
#[derive(Debug, Clone)]
pub struct EdgeChanged {
    pub pair_ws: String,
    pub currencies: (Currency, Currency),
}

/// Cumulative edge-skip counters for health snapshots.
#[derive(Debug, Default)]
pub struct GraphHealthCounters {
    pub skipped_no_book: AtomicU64,
    pub skipped_thin_depth: AtomicU64,
    pub skipped_stale: AtomicU64,
    pub skipped_bad_spread: AtomicU64,
    pub skipped_no_price: AtomicU64,
}

/// A point-in-time health view of the graph.
#[derive(Debug, Clone)]
pub struct GraphHealth {
    pub total_edges: usize,
    pub valid_edges: usize,
    pub skipped_no_book: u64,
    pub skipped_thin_depth: u64,
    pub skipped_stale: u64,
    pub skipped_bad_spread: u64,
    pub skipped_no_price: u64,
    pub avg_spread_pct: Decimal,
    pub avg_depth: Decimal,
}

/// The conversion graph.
pub struct ConversionGraph {
    catalog: Arc<PairCatalog>,
    edges: DashMap<(Currency, Currency), Edge>,
    adjacency: HashMap<Currency, Vec<Currency>>,
    config: GraphConfig,
    taker_fee_pct: RwLock<Decimal>,
    counters: GraphHealthCounters,
    avg_spread_bps: AtomicU64,
}

impl ConversionGraph {
    /// Build the graph skeleton from the active-pair catalog. Edges start
    /// invalid until the first book refresh.
    #[must_use]
    pub fn new(catalog: Arc<PairCatalog>, config: GraphConfig, taker_fee_pct: Decimal) -> Self {
        let mut adjacency: HashMap<Currency, Vec<Currency>> = HashMap::new();
        let edges = DashMap::new();

        for pair in catalog.pairs() {
            let base = pair.base().clone();
            let quote = pair.quote().clone();

            adjacency.entry(base.clone()).or_default().push(quote.clone());
            adjacency.entry(quote.clone()).or_default().push(base.clone());

            edges.insert(
                (base.clone(), quote.clone()),
                Edge::invalid(pair.ws_name(), OrderSide::Sell, InvalidReason::NoBook, 0),
            );
            edges.insert(
                (quote, base),
                Edge::invalid(pair.ws_name(), OrderSide::Buy, InvalidReason::NoBook, 0),
            );
        }

        for targets in adjacency.values_mut() {
            targets.sort();
            targets.dedup();
        }

        Self {
            catalog,
            edges,
            adjacency,
            config,
            taker_fee_pct: RwLock::new(taker_fee_pct),
            counters: GraphHealthCounters::default(),
            avg_spread_bps: AtomicU64::new(0),
        }
    }

    /// The validity thresholds in force.
    #[must_use]
    pub const fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Update the taker fee used for the fee-adjusted display rates.
    pub fn set_taker_fee_pct(&self, fee_pct: Decimal) {
        *self.taker_fee_pct.write() = fee_pct;
    }

    /// Currencies reachable in one hop from `currency`.
    #[must_use]
    pub fn neighbors(&self, currency: &Currency) -> &[Currency] {
        self.adjacency
            .get(currency)
            .map_or(&[], Vec::as_slice)
    }

    /// All currencies present in the graph.
    pub fn currencies(&self) -> impl Iterator<Item = &Currency> {
        self.adjacency.keys()
    }

    /// Get a consistent snapshot of one edge.
    #[must_use]
    pub fn edge(&self, from: &Currency, to: &Currency) -> Option<Edge> {
        self.edges
            .get(&(from.clone(), to.clone()))
            .map(|edge| edge.clone())
    }

    /// Iterate the outgoing edges of a currency as `(target, edge)` pairs.
    #[must_use]
    pub fn edges_from(&self, currency: &Currency) -> Vec<(Currency, Edge)> {
        self.neighbors(currency)
            .iter()
            .filter_map(|target| self.edge(currency, target).map(|edge| (target.clone(), edge)))
            .collect()
    }

    /// Recompute both edges of a pair from its latest book. Returns the
    /// change notification for the scanner.
    pub fn refresh_pair(&self, ws_name: &str, book: &OrderBook) -> Option<EdgeChanged> {
        let pair = self.catalog.get_by_ws(ws_name)?;
        let base = pair.base().clone();
        let quote = pair.quote().clone();

        let sell_key = (base.clone(), quote.clone());
        let buy_key = (quote.clone(), base.clone());

        let next_version = self
            .edges
            .get(&sell_key)
            .map_or(1, |edge| edge.version() + 1);

        match self.classify(book) {
            Ok(()) => {
                let fee_pct = *self.taker_fee_pct.read();
                self.record_spread(book);

                let (sell, buy) =
                    Self::build_edges(pair, book, fee_pct, next_version, self.config.depth_levels);
                self.edges.insert(sell_key, sell);
                self.edges.insert(buy_key, buy);
            }
            Err(reason) => {
                self.count_skip(reason);
                self.edges.insert(
                    sell_key,
                    Edge::invalid(ws_name, OrderSide::Sell, reason, next_version),
                );
                self.edges.insert(
                    buy_key,
                    Edge::invalid(ws_name, OrderSide::Buy, reason, next_version),
                );
            }
        }

        Some(EdgeChanged {
            pair_ws: ws_name.to_string(),
            currencies: (base, quote),
        })
    }

    fn classify(&self, book: &OrderBook) -> Result<(), InvalidReason> {
        if book.bids().is_empty() && book.asks().is_empty() {
            return Err(InvalidReason::NoBook);
        }
        if book.best_bid().is_none() || book.best_ask().is_none() {
            return Err(InvalidReason::NoPrice);
        }
        if !book.is_well_formed(self.config.min_depth) {
            return Err(InvalidReason::ThinDepth);
        }
        if book.age_ms() >= self.config.reject_ms {
            return Err(InvalidReason::Stale);
        }
        match book.spread_pct() {
            Some(spread) if spread <= self.config.max_spread_pct => {}
            Some(_) => return Err(InvalidReason::BadSpread),
            None => return Err(InvalidReason::NoPrice),
        }
        Ok(())
    }

    fn build_edges(
        pair: &Pair,
        book: &OrderBook,
        fee_pct: Decimal,
        version: u64,
        depth_levels: usize,
    ) -> (Edge, Edge) {
        let fee = fee_pct / Decimal::ONE_HUNDRED;

        // These unwraps cannot fire: classify() established both sides
        let bid = book.best_bid().map(|level| level.price()).unwrap_or_default();
        let ask = book.best_ask().map(|level| level.price()).unwrap_or_default();

        let sell = Edge::live(
            pair.ws_name(),
            OrderSide::Sell,
            bid,
            bid * (Decimal::ONE - fee),
            book.depth_sum(BookSide::Bid, depth_levels),
            book.bids().iter().take(depth_levels).copied().collect(),
            book.sequence(),
            version,
            book.last_update(),
        );

        let buy = Edge::live(
            pair.ws_name(),
            OrderSide::Buy,
            Decimal::ONE / ask,
            Decimal::ONE / (ask * (Decimal::ONE + fee)),
            book.depth_sum(BookSide::Ask, depth_levels),
            book.asks().iter().take(depth_levels).copied().collect(),
            book.sequence(),
            version,
            book.last_update(),
        );

        (sell, buy)
    }

    fn record_spread(&self, book: &OrderBook) {
        if let Some(spread) = book.spread_pct() {
            // Running average in basis points; health snapshots only need
            // an approximation
            let bps = (spread * Decimal::ONE_HUNDRED).to_u64().unwrap_or(0);
            self.avg_spread_bps.store(
                (self.avg_spread_bps.load(Ordering::Relaxed) + bps) / 2,
                Ordering::Relaxed,
            );
        }
    }

    fn count_skip(&self, reason: InvalidReason) {
        let counter = match reason {
            InvalidReason::NoBook => &self.counters.skipped_no_book,
            InvalidReason::ThinDepth => &self.counters.skipped_thin_depth,
            InvalidReason::Stale => &self.counters.skipped_stale,
            InvalidReason::BadSpread => &self.counters.skipped_bad_spread,
            InvalidReason::NoPrice => &self.counters.skipped_no_price,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Recompute every pair from the ingress books. Used after reconnects
    /// and depth/max-pairs changes.
    pub fn full_rebuild(
        &self,
        get_book: impl Fn(&str) -> Option<OrderBook>,
    ) -> Vec<EdgeChanged> {
        let mut changes = Vec::new();
        let ws_names: Vec<String> = self
            .catalog
            .pairs()
            .map(|pair| pair.ws_name().to_string())
            .collect();

        for ws_name in ws_names {
            let book = get_book(&ws_name).unwrap_or_default();
            if let Some(change) = self.refresh_pair(&ws_name, &book) {
                changes.push(change);
            }
        }
        changes
    }

    /// Point-in-time health view.
    #[must_use]
    pub fn health(&self) -> GraphHealth {
        let total_edges = self.edges.len();
        let mut valid_edges = 0;
        let mut depth_total = Decimal::ZERO;

        for edge in self.edges.iter() {
            if edge.is_usable(self.config.reject_ms) {
                valid_edges += 1;
                depth_total += edge.depth_sum();
            }
        }

        let avg_depth = if valid_edges > 0 {
            depth_total / Decimal::from(valid_edges)
        } else {
            Decimal::ZERO
        };

        GraphHealth {
            total_edges,
            valid_edges,
            skipped_no_book: self.counters.skipped_no_book.load(Ordering::Relaxed),
            skipped_thin_depth: self.counters.skipped_thin_depth.load(Ordering::Relaxed),
            skipped_stale: self.counters.skipped_stale.load(Ordering::Relaxed),
            skipped_bad_spread: self.counters.skipped_bad_spread.load(Ordering::Relaxed),
            skipped_no_price: self.counters.skipped_no_price.load(Ordering::Relaxed),
            avg_spread_pct: Decimal::from(self.avg_spread_bps.load(Ordering::Relaxed))
                / Decimal::ONE_HUNDRED,
            avg_depth,
        }
    }
}
