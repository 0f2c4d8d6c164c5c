//! Order book builders for tests.

use rust_decimal::Decimal;

use trireme::core::exchange::BookEvent;
use trireme::core::ingress::MarketDataIngress;

/// A three-level snapshot around the given top of book.
pub fn snapshot(pair: &str, bid: Decimal, ask: Decimal, size: Decimal) -> BookEvent {
    let tick = (ask - bid) / Decimal::from(10);
    BookEvent::Snapshot {
        pair: pair.to_string(),
        sequence: 1,
        bids: vec![
            (bid, size),
            (bid - tick, size),
            (bid - tick - tick, size),
        ],
        asks: vec![
            (ask, size),
            (ask + tick, size),
            (ask + tick + tick, size),
        ],
    }
}

/// Apply a three-level snapshot to the ingress.
pub async fn seed_book(
    ingress: &MarketDataIngress,
    pair: &str,
    bid: Decimal,
    ask: Decimal,
    size: Decimal,
) {
    ingress.apply_event(snapshot(pair, bid, ask, size)).await;
}
