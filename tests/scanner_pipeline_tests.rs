//! Ingress -> graph -> scanner pipeline scenarios.

mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use trireme::core::domain::{BookSide, Currency, Cycle};
use trireme::core::exchange::BookEvent;
use trireme::core::graph::{ConversionGraph, GraphConfig};
use trireme::core::ingress::{MarketDataIngress, StalenessPolicy};
use trireme::core::scanner::{PathScanner, ScannerConfig};
use trireme::core::settings::{SettingsHandle, TradeSettings};

use support::{books, scenario_catalog};

struct Pipeline {
    ingress: Arc<MarketDataIngress>,
    graph: Arc<ConversionGraph>,
    scanner: PathScanner,
    ready_rx: mpsc::Receiver<trireme::core::domain::Opportunity>,
    book_rx: mpsc::Receiver<trireme::core::ingress::BookUpdate>,
}

fn pipeline(graph_config: GraphConfig) -> Pipeline {
    let catalog = scenario_catalog();
    let (book_tx, book_rx) = mpsc::channel(256);
    let ingress = Arc::new(MarketDataIngress::new(
        StalenessPolicy::default(),
        25,
        300,
        book_tx,
    ));
    let graph = Arc::new(ConversionGraph::new(catalog, graph_config, dec!(0.26)));
    let settings = Arc::new(SettingsHandle::new(TradeSettings::default()).unwrap());
    let (ready_tx, ready_rx) = mpsc::channel(64);
    let scanner = PathScanner::new(
        Arc::clone(&graph),
        settings,
        ScannerConfig {
            base_currencies: vec![Currency::new("USD")],
            ..Default::default()
        },
        ready_tx,
    );

    Pipeline {
        ingress,
        graph,
        scanner,
        ready_rx,
        book_rx,
    }
}

async fn seed_scenario(pipeline: &Pipeline) {
    books::seed_book(&pipeline.ingress, "XBT/USD", dec!(29990), dec!(30000), dec!(1)).await;
    books::seed_book(&pipeline.ingress, "ETH/XBT", dec!(0.0499), dec!(0.05), dec!(100)).await;
    books::seed_book(&pipeline.ingress, "ETH/USD", dec!(1530), dec!(1531), dec!(2)).await;
}

fn refresh_all(pipeline: &Pipeline) {
    for pair in ["XBT/USD", "ETH/XBT", "ETH/USD"] {
        if let Some(book) = pipeline.ingress.get_book(pair) {
            pipeline.graph.refresh_pair(pair, &book);
        }
    }
}

#[tokio::test]
async fn book_updates_flow_into_a_ranked_cache() {
    let mut pipeline = pipeline(GraphConfig::default());
    seed_scenario(&pipeline).await;

    // One BookUpdate per snapshot apply
    let mut updates = Vec::new();
    while let Ok(update) = pipeline.book_rx.try_recv() {
        updates.push(update);
    }
    assert_eq!(updates.len(), 3);
    assert!(updates.iter().all(|update| update.valid));

    refresh_all(&pipeline);
    pipeline.scanner.full_rescan();

    let (entries, age_ms) = pipeline.scanner.cached_opportunities();
    assert!(!entries.is_empty());
    assert!(age_ms < 5000);

    // The profitable cycle tops the ranking with the invariant numbers
    let best = &entries[0];
    assert_eq!(best.cycle().id(), "USD → BTC → ETH → USD");
    assert_eq!(best.gross_profit_pct().round_dp(10), dec!(2));
    assert_eq!(best.net_profit_pct().round_dp(10), dec!(1.22));

    // And the transition produced a readiness event
    let ready = pipeline.ready_rx.recv().await.unwrap();
    assert_eq!(ready.cycle().id(), "USD → BTC → ETH → USD");
}

#[tokio::test]
async fn stale_pair_suppresses_events_until_fresh_book_arrives() {
    // Reject almost immediately so the test can age books in real time
    let config = GraphConfig {
        reject_ms: 50,
        ..Default::default()
    };
    let mut pipeline = pipeline(config);
    seed_scenario(&pipeline).await;

    // Let the books cross the reject threshold
    tokio::time::sleep(Duration::from_millis(120)).await;
    refresh_all(&pipeline);
    pipeline.scanner.full_rescan();

    let cycle = Cycle::parse("USD → BTC → ETH → USD").unwrap();
    assert!(pipeline.scanner.evaluate_cycle(&cycle).is_none());
    assert!(pipeline.ready_rx.try_recv().is_err());

    // A fresh book recovers the cycles and evaluation proceeds
    seed_scenario(&pipeline).await;
    refresh_all(&pipeline);
    pipeline.scanner.full_rescan();

    assert!(pipeline.scanner.evaluate_cycle(&cycle).is_some());
    assert!(pipeline.ready_rx.try_recv().is_ok());
}

#[tokio::test]
async fn sequence_gap_invalidates_until_snapshot_resync() {
    let mut pipeline = pipeline(GraphConfig::default());
    seed_scenario(&pipeline).await;
    refresh_all(&pipeline);
    pipeline.scanner.full_rescan();
    assert!(pipeline.ready_rx.try_recv().is_ok());

    // A gapped delta invalidates the book and its edges
    pipeline
        .ingress
        .apply_event(BookEvent::Delta {
            pair: "XBT/USD".to_string(),
            sequence: 10,
            side: BookSide::Bid,
            price: dec!(29995),
            size: dec!(1),
        })
        .await;

    let book = pipeline.ingress.get_book("XBT/USD").unwrap();
    pipeline.graph.refresh_pair("XBT/USD", &book);
    let changed: HashSet<Currency> = [Currency::new("BTC"), Currency::new("USD")]
        .into_iter()
        .collect();
    pipeline.scanner.on_edges_changed(&changed);

    let cycle = Cycle::parse("USD → BTC → ETH → USD").unwrap();
    assert!(pipeline.scanner.evaluate_cycle(&cycle).is_none());

    // The resync snapshot restores evaluation
    books::seed_book(&pipeline.ingress, "XBT/USD", dec!(29990), dec!(30000), dec!(1)).await;
    let book = pipeline.ingress.get_book("XBT/USD").unwrap();
    pipeline.graph.refresh_pair("XBT/USD", &book);
    pipeline.scanner.on_edges_changed(&changed);

    assert!(pipeline.scanner.evaluate_cycle(&cycle).is_some());
}

#[tokio::test]
async fn depth_reconfiguration_invalidates_books() {
    let pipeline = pipeline(GraphConfig::default());
    seed_scenario(&pipeline).await;

    assert!(pipeline.ingress.set_depth(100));
    assert_eq!(pipeline.ingress.depth(), 100);

    // Every book is invalid until resubscription delivers fresh snapshots
    for pair in ["XBT/USD", "ETH/XBT", "ETH/USD"] {
        assert!(!pipeline.ingress.get_book(pair).unwrap().is_well_formed(3));
    }

    refresh_all(&pipeline);
    let cycle = Cycle::parse("USD → BTC → ETH → USD").unwrap();
    assert!(pipeline.scanner.evaluate_cycle(&cycle).is_none());
}
