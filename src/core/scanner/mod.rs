//! Event-driven path scanner.
//!
//! Cycles of length 3 and 4 rooted at the configured base currencies are
//! pre-materialized at startup so the hot path is evaluation, not search.
//! An inverted index `currency -> [cycle]` limits re-evaluation on each
//! edge change to the affected cycles; results land in a ranked,
//! size-bounded cache behind a snapshot pointer swap.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::domain::{Currency, Cycle, Opportunity};
use crate::core::graph::ConversionGraph;
use crate::core::settings::SettingsHandle;

/// Scanner tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// Base currencies cycles are rooted at.
    #[serde(default = "default_base_currencies")]
    pub base_currencies: Vec<Currency>,
    /// Upper bound on ranked cache entries.
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
    /// Penalty per leg applied when the oldest edge exceeds the buffer
    /// threshold, in percent.
    #[serde(default = "default_latency_penalty_pct")]
    pub latency_penalty_pct: Decimal,
    /// Edge age beyond which the latency penalty applies, in milliseconds.
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u64,
    /// Cache age beyond which reads are considered stale, in milliseconds.
    #[serde(default = "default_stale_cache_ms")]
    pub stale_cache_ms: u64,
}

fn default_base_currencies() -> Vec<Currency> {
    ["USD", "USDT", "EUR", "BTC", "ETH"]
        .into_iter()
        .map(Currency::new)
        .collect()
}

fn default_max_cache_entries() -> usize {
    1000
}

fn default_latency_penalty_pct() -> Decimal {
    Decimal::new(1, 1) // 0.1%
}

fn default_buffer_ms() -> u64 {
    1000
}

fn default_stale_cache_ms() -> u64 {
    5000
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            base_currencies: default_base_currencies(),
            max_cache_entries: default_max_cache_entries(),
            latency_penalty_pct: default_latency_penalty_pct(),
            buffer_ms: default_buffer_ms(),
            stale_cache_ms: default_stale_cache_ms(),
        }
    }
}

/// Scanner introspection for status queries and health snapshots.
#[derive(Debug, Clone)]
pub struct ScannerStatus {
    pub cycles_total: usize,
    pub profitable_count: usize,
    pub cached_entries: usize,
    pub rejected_opportunities: u64,
}

struct OpportunitySnapshot {
    entries: Vec<Opportunity>,
    refreshed_at: Instant,
}

/// Maintains the ranked opportunity cache and emits readiness events.
pub struct PathScanner {
    graph: Arc<ConversionGraph>,
    settings: Arc<SettingsHandle>,
    config: ScannerConfig,
    cycles: Vec<Cycle>,
    index: HashMap<Currency, Vec<usize>>,
    evaluations: Vec<Option<Opportunity>>,
    profitable: Vec<bool>,
    cache: RwLock<Arc<OpportunitySnapshot>>,
    ready_tx: mpsc::Sender<Opportunity>,
    rejected: AtomicU64,
}

impl PathScanner {
    /// Enumerate all cycles and build the inverted index.
    #[must_use]
    pub fn new(
        graph: Arc<ConversionGraph>,
        settings: Arc<SettingsHandle>,
        config: ScannerConfig,
        ready_tx: mpsc::Sender<Opportunity>,
    ) -> Self {
        let cycles = Self::enumerate_cycles(&graph, &config.base_currencies);

        let mut index: HashMap<Currency, Vec<usize>> = HashMap::new();
        for (idx, cycle) in cycles.iter().enumerate() {
            // Skip the duplicated closing currency
            for currency in &cycle.currencies()[..cycle.legs()] {
                let entry = index.entry(currency.clone()).or_default();
                if entry.last() != Some(&idx) {
                    entry.push(idx);
                }
            }
        }

        info!(cycles = cycles.len(), "Cycle catalog materialized");

        let count = cycles.len();
        Self {
            graph,
            settings,
            config,
            cycles,
            index,
            evaluations: vec![None; count],
            profitable: vec![false; count],
            cache: RwLock::new(Arc::new(OpportunitySnapshot {
                entries: Vec::new(),
                refreshed_at: Instant::now(),
            })),
            ready_tx,
            rejected: AtomicU64::new(0),
        }
    }

    /// DFS over the conversion graph for simple cycles of 3-4 legs rooted
    /// at each base currency.
    fn enumerate_cycles(graph: &ConversionGraph, bases: &[Currency]) -> Vec<Cycle> {
        let mut cycles = Vec::new();

        for base in bases {
            let mut path = vec![base.clone()];
            Self::dfs(graph, base, &mut path, &mut cycles);
        }

        cycles.sort_by_key(Cycle::id);
        cycles.dedup();
        cycles
    }

    fn dfs(graph: &ConversionGraph, base: &Currency, path: &mut Vec<Currency>, out: &mut Vec<Cycle>) {
        let current = path
            .last()
            .cloned()
            .unwrap_or_else(|| base.clone());

        for target in graph.neighbors(&current) {
            if target == base {
                if path.len() >= 3 {
                    let mut closed = path.clone();
                    closed.push(base.clone());
                    if let Ok(cycle) = Cycle::new(closed) {
                        out.push(cycle);
                    }
                }
                continue;
            }
            if path.len() >= 4 || path.contains(target) {
                continue;
            }
            path.push(target.clone());
            Self::dfs(graph, base, path, out);
            path.pop();
        }
    }

    /// The materialized cycles.
    #[must_use]
    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    /// Evaluate one cycle against the current graph edges. `None` when any
    /// edge is missing or unusable.
    #[must_use]
    pub fn evaluate_cycle(&self, cycle: &Cycle) -> Option<Opportunity> {
        let settings = self.settings.get();
        let reject_ms = self.graph.config().reject_ms;

        let mut product = Decimal::ONE;
        let mut oldest_ms: u64 = 0;

        for (from, to) in cycle.hops() {
            let edge = self.graph.edge(from, to)?;
            if !edge.is_usable(reject_ms) {
                return None;
            }
            product *= edge.rate();
            oldest_ms = oldest_ms.max(edge.age_ms());
        }

        let legs = Decimal::from(cycle.legs() as u64);
        let gross_pct = (product - Decimal::ONE) * Decimal::ONE_HUNDRED;
        let mut net_pct = gross_pct - legs * settings.taker_fee_pct;
        if oldest_ms > self.config.buffer_ms {
            net_pct -= self.config.latency_penalty_pct * legs;
        }

        Some(Opportunity::new(
            cycle.clone(),
            gross_pct,
            net_pct,
            oldest_ms,
            Utc::now(),
        ))
    }

    /// Re-evaluate the cycles touching any of the changed currencies.
    pub fn on_edges_changed(&mut self, changed: &HashSet<Currency>) {
        let mut affected: Vec<usize> = changed
            .iter()
            .filter_map(|currency| self.index.get(currency))
            .flatten()
            .copied()
            .collect();
        affected.sort_unstable();
        affected.dedup();

        debug!(
            changed = changed.len(),
            affected = affected.len(),
            "Re-evaluating affected cycles"
        );
        self.reevaluate(&affected);
    }

    /// Re-evaluate every cycle (reconnect, catalog or depth change).
    pub fn full_rescan(&mut self) {
        let all: Vec<usize> = (0..self.cycles.len()).collect();
        self.reevaluate(&all);
    }

    fn reevaluate(&mut self, indices: &[usize]) {
        let threshold = self.settings.get().min_profit_pct;

        for &idx in indices {
            let evaluation = self.evaluate_cycle(&self.cycles[idx]);
            let is_profitable = evaluation
                .as_ref()
                .is_some_and(|opp| opp.clears_threshold(threshold));

            let became_profitable = is_profitable && !self.profitable[idx];
            if became_profitable {
                if let Some(opp) = evaluation.as_ref() {
                    self.emit_ready(opp);
                }
            }

            self.profitable[idx] = is_profitable;
            self.evaluations[idx] = evaluation;
        }

        self.rebuild_cache();
    }

    /// Forward a newly-profitable cycle to the guard, provided its edges
    /// are fresh enough to act on.
    fn emit_ready(&self, opportunity: &Opportunity) {
        if opportunity.min_freshness_ms() > self.config.buffer_ms {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if self.ready_tx.try_send(opportunity.clone()).is_err() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn rebuild_cache(&self) {
        let mut entries: Vec<Opportunity> = self
            .evaluations
            .iter()
            .flatten()
            .cloned()
            .collect();
        entries.sort_by(compare_opportunities);
        entries.truncate(self.config.max_cache_entries);

        *self.cache.write() = Arc::new(OpportunitySnapshot {
            entries,
            refreshed_at: Instant::now(),
        });
    }

    /// Snapshot the ranked cache and its age in milliseconds.
    #[must_use]
    pub fn cached_opportunities(&self) -> (Vec<Opportunity>, u64) {
        let snapshot = Arc::clone(&self.cache.read());
        let age_ms =
            u64::try_from(snapshot.refreshed_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        (snapshot.entries.clone(), age_ms)
    }

    /// Whether the cache is too old to act on (the ingress has stalled).
    #[must_use]
    pub fn cache_is_stale(&self) -> bool {
        let (_, age_ms) = self.cached_opportunities();
        age_ms > self.config.stale_cache_ms
    }

    /// Introspection for status queries.
    #[must_use]
    pub fn status(&self) -> ScannerStatus {
        let profitable_count = self.profitable.iter().filter(|p| **p).count();
        ScannerStatus {
            cycles_total: self.cycles.len(),
            profitable_count,
            cached_entries: self.cache.read().entries.len(),
            rejected_opportunities: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Cache ordering: net profit descending, then fewer legs, then freshest
/// oldest-edge, then lexicographic cycle id. Fully deterministic.
pub(crate) fn compare_opportunities(a: &Opportunity, b: &Opportunity) -> CmpOrdering {
    b.net_profit_pct()
        .cmp(&a.net_profit_pct())
        .then_with(|| a.cycle().legs().cmp(&b.cycle().legs()))
        .then_with(|| a.min_freshness_ms().cmp(&b.min_freshness_ms()))
        .then_with(|| a.cycle().id().cmp(&b.cycle().id()))
}
