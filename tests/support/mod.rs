//! Shared test harness.

#![allow(dead_code)]

pub mod books;
pub mod exchange;

use std::sync::Arc;

use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch};

use trireme::core::audit::{AuditSink, MemoryAuditSink};
use trireme::core::breaker::CircuitBreaker;
use trireme::core::domain::{Currency, Pair, PairCatalog};
use trireme::core::exchange::ExchangeAdapter;
use trireme::core::executor::CycleExecutor;
use trireme::core::ingress::{BookUpdate, MarketDataIngress, StalenessPolicy};
use trireme::core::settings::{SettingsHandle, TradeSettings};

use self::exchange::ScriptedExchange;

/// The three-pair catalog used throughout the scenarios.
pub fn scenario_catalog() -> Arc<PairCatalog> {
    Arc::new(PairCatalog::from_pairs(vec![
        Pair::new(
            Currency::new("BTC"),
            Currency::new("USD"),
            "XBTUSD",
            "XBT/USD",
            1,
            8,
            dec!(0.0001),
        ),
        Pair::new(
            Currency::new("ETH"),
            Currency::new("BTC"),
            "ETHXBT",
            "ETH/XBT",
            5,
            8,
            dec!(0.01),
        ),
        Pair::new(
            Currency::new("ETH"),
            Currency::new("USD"),
            "ETHUSD",
            "ETH/USD",
            2,
            8,
            dec!(0.01),
        ),
    ]))
}

/// Everything an executor scenario needs, wired like the engine does it.
pub struct Harness {
    pub exchange: Arc<ScriptedExchange>,
    pub ingress: Arc<MarketDataIngress>,
    pub catalog: Arc<PairCatalog>,
    pub settings: Arc<SettingsHandle>,
    pub breaker: Arc<CircuitBreaker>,
    pub audit: Arc<MemoryAuditSink>,
    pub executor: CycleExecutor,
    pub shutdown_tx: watch::Sender<bool>,
    pub book_rx: mpsc::Receiver<BookUpdate>,
}

impl Harness {
    /// Build a harness with enabled trading and default settings.
    pub fn new(exchange: ScriptedExchange) -> Self {
        Self::with_settings(exchange, TradeSettings::default())
    }

    /// Build a harness with custom initial settings; trading is enabled.
    pub fn with_settings(exchange: ScriptedExchange, settings: TradeSettings) -> Self {
        let exchange = Arc::new(exchange);
        let catalog = scenario_catalog();
        let settings = Arc::new(SettingsHandle::new(settings).unwrap());
        settings.enable();

        let (book_tx, book_rx) = mpsc::channel(256);
        let ingress = Arc::new(MarketDataIngress::new(
            StalenessPolicy::default(),
            25,
            300,
            book_tx,
        ));

        let breaker = Arc::new(CircuitBreaker::new(Arc::clone(&settings)));
        let audit = Arc::new(MemoryAuditSink::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let executor = CycleExecutor::new(
            Arc::clone(&exchange) as Arc<dyn ExchangeAdapter>,
            Arc::clone(&ingress),
            Arc::clone(&catalog),
            Arc::clone(&settings),
            Arc::clone(&breaker),
            Arc::clone(&audit) as Arc<dyn AuditSink>,
            shutdown_rx,
        );

        Self {
            exchange,
            ingress,
            catalog,
            settings,
            breaker,
            audit,
            executor,
            shutdown_tx,
            book_rx,
        }
    }

    /// Seed the scenario books: XBT/USD 29990/30000, ETH/XBT 0.04996/0.05,
    /// ETH/USD 1530/1531, three levels per side.
    pub async fn seed_scenario_books(&self) {
        books::seed_book(&self.ingress, "XBT/USD", dec!(29990), dec!(30000), dec!(1)).await;
        books::seed_book(&self.ingress, "ETH/XBT", dec!(0.04996), dec!(0.05), dec!(100)).await;
        books::seed_book(&self.ingress, "ETH/USD", dec!(1530), dec!(1531), dec!(2)).await;
    }
}
