//! Engine wiring: init, run, graceful shutdown.
//!
//! The engine owns the process-wide collaborators and connects them with
//! bounded channels: ingress -> (BookUpdate) -> scanner -> (OpportunityReady)
//! -> guard/executor, plus an audit cadence task. Shutdown is a cooperative
//! watch channel; in-flight legs complete, new legs are refused.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::config::{AuditConfig, Config};
use crate::core::audit::{
    AuditSink, HealthSnapshot, OpportunitySample, RejectionRecord, SqliteAuditSink,
};
use crate::core::breaker::CircuitBreaker;
use crate::core::db;
use crate::core::domain::{Currency, Opportunity, Pair, PairCatalog};
use crate::core::exchange::kraken::{KrakenBookStream, KrakenClient};
use crate::core::exchange::{ExchangeAdapter, PairInfo, ReconnectingBookStream};
use crate::core::executor::CycleExecutor;
use crate::core::graph::ConversionGraph;
use crate::core::guard::{GuardDecision, TradeGuard};
use crate::core::ingress::{run_ingress, BookUpdate, MarketDataIngress};
use crate::core::scanner::PathScanner;
use crate::core::settings::SettingsHandle;
use crate::error::Result;

/// Main application engine.
pub struct Engine;

impl Engine {
    /// Run until the process is stopped.
    ///
    /// # Errors
    /// Returns startup errors; runtime errors are handled internally.
    pub async fn run(config: Config) -> Result<()> {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        Self::run_with_shutdown(config, shutdown_rx).await
    }

    /// Run until the shutdown channel flips to true.
    ///
    /// # Errors
    /// Returns startup errors; runtime errors are handled internally.
    pub async fn run_with_shutdown(
        config: Config,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Starting trireme");

        // Persistence
        let pool = db::create_pool(&config.database)?;
        db::initialize(&pool)?;
        let audit: Arc<dyn AuditSink> = Arc::new(SqliteAuditSink::new(pool));
        info!(database = %config.database, "Database initialized");

        // Live settings
        let settings = Arc::new(SettingsHandle::new(config.trading.clone())?);

        // Exchange adapter
        let credentials = config.exchange.credentials();
        if credentials.is_none() {
            warn!("No API credentials configured; execution will stay disabled");
        }
        let exchange: Arc<dyn ExchangeAdapter> = Arc::new(KrakenClient::new(
            config.exchange.api_url.clone(),
            credentials,
        ));

        // Fee tier refresh
        match exchange.fees().await {
            Ok(fees) => {
                info!(taker = %fees.taker_pct, maker = %fees.maker_pct, "Fee tier loaded");
                settings.set_fees(fees.taker_pct, fees.maker_pct);
            }
            Err(e) => warn!(error = %e, "Fee tier lookup failed, keeping configured fees"),
        }

        // Pair discovery
        let snapshot = settings.get();
        let pair_infos = exchange.list_pairs(snapshot.max_pairs).await?;
        if pair_infos.is_empty() {
            warn!("No active pairs found");
            return Ok(());
        }
        let catalog = Arc::new(build_catalog(&pair_infos));
        info!(pairs = catalog.len(), "Active pair catalog loaded");

        // Channels
        let (book_tx, book_rx) = mpsc::channel::<BookUpdate>(config.channel_capacity);
        let (ready_tx, ready_rx) = mpsc::channel::<Opportunity>(64);

        // The staleness policy is the single source for the buffer/reject
        // thresholds the graph and scanner apply
        let graph_config = crate::core::graph::GraphConfig {
            reject_ms: config.staleness.reject_ms,
            ..config.graph
        };
        let scanner_config = crate::core::scanner::ScannerConfig {
            buffer_ms: config.staleness.buffer_ms,
            ..config.scanner.clone()
        };

        // Core components
        let ingress = Arc::new(MarketDataIngress::new(
            config.staleness,
            snapshot.orderbook_depth,
            snapshot.max_pairs,
            book_tx,
        ));
        let graph = Arc::new(ConversionGraph::new(
            Arc::clone(&catalog),
            graph_config,
            settings.get().taker_fee_pct,
        ));
        let scanner = Arc::new(Mutex::new(PathScanner::new(
            Arc::clone(&graph),
            Arc::clone(&settings),
            scanner_config,
            ready_tx,
        )));
        let breaker = Arc::new(CircuitBreaker::new(Arc::clone(&settings)));
        let guard = Arc::new(TradeGuard::new(
            Arc::clone(&settings),
            Arc::clone(&breaker),
            Arc::clone(&exchange),
        ));
        let executor = Arc::new(CycleExecutor::new(
            Arc::clone(&exchange),
            Arc::clone(&ingress),
            Arc::clone(&catalog),
            Arc::clone(&settings),
            Arc::clone(&breaker),
            Arc::clone(&audit),
            shutdown.clone(),
        ));

        // Ingress task: public feed -> books
        let ws_names: Vec<String> = catalog
            .pairs()
            .map(|pair| pair.ws_name().to_string())
            .collect();
        let stream = ReconnectingBookStream::new(
            KrakenBookStream::new(config.exchange.ws_url.clone()),
            config.reconnection.clone(),
        );
        let ingress_task = tokio::spawn(run_ingress(
            Arc::clone(&ingress),
            stream,
            ws_names,
            shutdown.clone(),
        ));

        // Scanner task: book updates -> edges -> ranked cache
        let scanner_task = tokio::spawn(run_scanner(
            Arc::clone(&scanner),
            Arc::clone(&graph),
            Arc::clone(&ingress),
            Arc::clone(&settings),
            book_rx,
            shutdown.clone(),
        ));

        // Trader task: opportunities -> guard -> executor
        let trader_task = tokio::spawn(run_trader(
            Arc::clone(&guard),
            Arc::clone(&executor),
            Arc::clone(&scanner),
            Arc::clone(&settings),
            Arc::clone(&audit),
            ready_rx,
            shutdown.clone(),
        ));

        // Audit cadence task
        let audit_task = tokio::spawn(run_audit(
            Arc::clone(&audit),
            Arc::clone(&ingress),
            Arc::clone(&graph),
            Arc::clone(&scanner),
            config.audit.clone(),
            shutdown.clone(),
        ));

        info!("All subsystems running");

        let (ingress_res, scanner_res, trader_res, audit_res) =
            tokio::join!(ingress_task, scanner_task, trader_task, audit_task);
        for result in [ingress_res, scanner_res, trader_res, audit_res] {
            if let Err(e) = result {
                error!(error = %e, "Subsystem task panicked");
            }
        }

        info!("trireme stopped");
        Ok(())
    }
}

/// Build the domain pair catalog from discovered pair info.
fn build_catalog(infos: &[PairInfo]) -> PairCatalog {
    let pairs: Vec<Pair> = infos
        .iter()
        .map(|info| {
            Pair::new(
                Currency::from_wire(&info.base),
                Currency::from_wire(&info.quote),
                info.wire_name.clone(),
                info.ws_name.clone(),
                info.price_decimals,
                info.volume_decimals,
                info.min_volume,
            )
        })
        .collect();
    PairCatalog::from_pairs(pairs)
}

/// Consume book updates, refresh affected edges, re-evaluate cycles.
/// Pending updates are drained greedily so bursts for one pair coalesce
/// into a single refresh of the latest book.
async fn run_scanner(
    scanner: Arc<Mutex<PathScanner>>,
    graph: Arc<ConversionGraph>,
    ingress: Arc<MarketDataIngress>,
    settings: Arc<SettingsHandle>,
    mut book_rx: mpsc::Receiver<BookUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    let scan_interval_ms = settings.get().scan_interval_ms;
    let mut refresh = tokio::time::interval(Duration::from_millis(scan_interval_ms));
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    info!("Scanner shutting down");
                    break;
                }
            }
            _ = refresh.tick() => {
                // Periodic full pass keeps the cache fresh for readers even
                // on quiet markets
                scanner.lock().full_rescan();
            }
            update = book_rx.recv() => {
                let Some(update) = update else {
                    warn!("Book update channel closed");
                    break;
                };

                let mut dirty: Vec<String> = vec![update.pair];
                while let Ok(update) = book_rx.try_recv() {
                    dirty.push(update.pair);
                }
                dirty.sort_unstable();
                dirty.dedup();

                let warn_ms = ingress.policy().warn_ms;
                let mut changed: HashSet<Currency> = HashSet::new();
                for pair_ws in &dirty {
                    let Some(book) = ingress.get_book(pair_ws) else {
                        continue;
                    };
                    let age_ms = book.age_ms();
                    if age_ms >= warn_ms {
                        warn!(pair = %pair_ws, age_ms, "Book staleness above warning threshold");
                    }
                    if let Some(change) = graph.refresh_pair(pair_ws, &book) {
                        changed.insert(change.currencies.0);
                        changed.insert(change.currencies.1);
                    }
                }

                if !changed.is_empty() {
                    scanner.lock().on_edges_changed(&changed);
                }
            }
        }
    }
}

/// Consume readiness events, run the guard chain, execute approved cycles
/// sequentially.
async fn run_trader(
    guard: Arc<TradeGuard>,
    executor: Arc<CycleExecutor>,
    scanner: Arc<Mutex<PathScanner>>,
    settings: Arc<SettingsHandle>,
    audit: Arc<dyn AuditSink>,
    mut ready_rx: mpsc::Receiver<Opportunity>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    info!("Trader shutting down");
                    break;
                }
            }
            opportunity = ready_rx.recv() => {
                let Some(opportunity) = opportunity else {
                    warn!("Opportunity channel closed");
                    break;
                };

                // A stale cache means the ingress has stalled; nothing in it
                // is executable
                if scanner.lock().cache_is_stale() {
                    debug!("Opportunity cache stale, skipping event");
                    continue;
                }

                let trade_id = CycleExecutor::new_trade_id();
                match guard.evaluate_and_claim(&opportunity, &trade_id).await {
                    GuardDecision::Approved => {
                        let amount = settings.get().trade_amount;
                        let record = executor
                            .execute_cycle(
                                trade_id,
                                opportunity.cycle(),
                                amount,
                                Some(opportunity.net_profit_pct()),
                            )
                            .await;
                        info!(
                            trade_id = %record.trade_id,
                            status = %record.status,
                            profit_loss = ?record.profit_loss,
                            "Trade finished"
                        );
                    }
                    GuardDecision::Rejected { class, reason } => {
                        debug!(
                            cycle = %opportunity.cycle(),
                            class = class.as_str(),
                            reason = %reason,
                            "Opportunity rejected"
                        );
                        let rejection = RejectionRecord {
                            path: opportunity.cycle().id(),
                            net_profit_pct: opportunity.net_profit_pct(),
                            class: class.as_str().to_string(),
                            reason,
                            recorded_at: Utc::now(),
                        };
                        if let Err(e) = audit.record_rejection(&rejection) {
                            warn!(error = %e, "Failed to persist rejection");
                        }
                    }
                }
            }
        }
    }
}

/// Periodic health snapshots, opportunity samples, and bounded cleanup.
async fn run_audit(
    audit: Arc<dyn AuditSink>,
    ingress: Arc<MarketDataIngress>,
    graph: Arc<ConversionGraph>,
    scanner: Arc<Mutex<PathScanner>>,
    config: AuditConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut health = tokio::time::interval(Duration::from_secs(config.health_interval_secs));
    let mut sample = tokio::time::interval(Duration::from_secs(config.sample_interval_secs));
    let mut cleanup = tokio::time::interval(Duration::from_secs(config.cleanup_interval_secs));
    health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    sample.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // The first tick of every interval fires immediately; skip it so an
    // empty startup state is not recorded
    health.tick().await;
    sample.tick().await;
    cleanup.tick().await;

    loop {
        tokio::select! {
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    info!("Audit cadence shutting down");
                    break;
                }
            }
            _ = health.tick() => {
                let graph_health = graph.health();
                let status = scanner.lock().status();
                let total_pairs = ingress.pair_count();
                let valid_pairs = graph_health.valid_edges / 2;
                let snapshot = HealthSnapshot {
                    total_pairs,
                    valid_pairs,
                    valid_pct: if total_pairs > 0 {
                        valid_pairs as f32 / total_pairs as f32 * 100.0
                    } else {
                        0.0
                    },
                    skipped_no_book: graph_health.skipped_no_book,
                    skipped_thin_depth: graph_health.skipped_thin_depth,
                    skipped_stale: graph_health.skipped_stale,
                    skipped_bad_spread: graph_health.skipped_bad_spread,
                    skipped_no_price: graph_health.skipped_no_price,
                    avg_freshness_ms: ingress.avg_age_ms(),
                    avg_spread_pct: graph_health.avg_spread_pct,
                    avg_depth: graph_health.avg_depth,
                    rejected_opportunities: status.rejected_opportunities,
                    recorded_at: Utc::now(),
                };
                if let Err(e) = audit.record_health(&snapshot) {
                    warn!(error = %e, "Failed to persist health snapshot");
                }
            }
            _ = sample.tick() => {
                let (entries, age_ms) = scanner.lock().cached_opportunities();
                if entries.is_empty() || age_ms > 60_000 {
                    continue;
                }
                let samples: Vec<OpportunitySample> = entries
                    .iter()
                    .take(config.sample_limit)
                    .map(|opp| OpportunitySample {
                        path: opp.cycle().id(),
                        legs: opp.cycle().legs() as u32,
                        start_currency: opp.cycle().start().to_string(),
                        net_profit_pct: opp.net_profit_pct(),
                        is_profitable: opp.net_profit_pct() > Decimal::ZERO,
                        recorded_at: Utc::now(),
                    })
                    .collect();
                if let Err(e) = audit.record_opportunities(&samples) {
                    warn!(error = %e, "Failed to persist opportunity samples");
                }
            }
            _ = cleanup.tick() => {
                let cutoff = Utc::now() - chrono::Duration::days(config.retention_days);
                match audit.cleanup_before(cutoff) {
                    Ok(deleted) if deleted > 0 => {
                        debug!(deleted, "Cleaned up old audit records");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Audit cleanup failed"),
                }
            }
        }
    }
}

/// Operator entry point: unwind one PARTIAL trade into USD.
///
/// # Errors
/// Returns an error when the trade is missing, not PARTIAL, or the unwind
/// order fails.
pub async fn resolve_trade(config: Config, trade_id: &str) -> Result<crate::core::domain::TradeRecord> {
    let pool = db::create_pool(&config.database)?;
    db::initialize(&pool)?;
    let sink = Arc::new(SqliteAuditSink::new(pool));

    let record = sink
        .load_trade(trade_id)?
        .ok_or_else(|| crate::error::Error::Execution(format!("Unknown trade {trade_id}")))?;

    let settings = Arc::new(SettingsHandle::new(config.trading.clone())?);
    let exchange: Arc<dyn ExchangeAdapter> = Arc::new(KrakenClient::new(
        config.exchange.api_url.clone(),
        config.exchange.credentials(),
    ));

    let pair_infos = exchange.list_pairs(settings.get().max_pairs).await?;
    let catalog = Arc::new(build_catalog(&pair_infos));

    // Resolution never reads books; a detached ingress satisfies the wiring
    let (book_tx, _book_rx) = mpsc::channel(1);
    let ingress = Arc::new(MarketDataIngress::new(
        config.staleness,
        settings.get().orderbook_depth,
        settings.get().max_pairs,
        book_tx,
    ));

    let breaker = Arc::new(CircuitBreaker::new(Arc::clone(&settings)));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let executor = CycleExecutor::new(
        exchange,
        ingress,
        catalog,
        settings,
        breaker,
        Arc::clone(&sink) as Arc<dyn AuditSink>,
        shutdown_rx,
    );

    executor.resolve_partial(&record).await
}
