//! L2 order books.

use std::time::Instant;

use rust_decimal::Decimal;

/// One side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bid,
    Ask,
}

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    price: Decimal,
    size: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    #[must_use]
    pub const fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// Get the price.
    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.price
    }

    /// Get the size.
    #[must_use]
    pub const fn size(&self) -> Decimal {
        self.size
    }
}

/// An L2 order book for one pair.
///
/// Bids are kept descending by price, asks ascending. Each book carries the
/// feed's monotonic sequence number and the instant of its last update.
#[derive(Debug, Clone)]
pub struct OrderBook {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    sequence: u64,
    last_update: Instant,
    valid: bool,
}

impl OrderBook {
    /// Create an empty, invalid book.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            sequence: 0,
            last_update: Instant::now(),
            valid: false,
        }
    }

    /// Build a book directly from levels (snapshots, tests).
    #[must_use]
    pub fn with_levels(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>, sequence: u64) -> Self {
        let mut book = Self::new();
        book.apply_snapshot(bids, asks, sequence);
        book
    }

    /// Replace the book contents with a full snapshot.
    pub fn apply_snapshot(&mut self, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>, sequence: u64) {
        self.bids = bids;
        self.asks = asks;
        self.bids.sort_by(|a, b| b.price.cmp(&a.price));
        self.asks.sort_by(|a, b| a.price.cmp(&b.price));
        self.sequence = sequence;
        self.last_update = Instant::now();
        self.valid = true;
    }

    /// Apply one incremental level change: size > 0 adds or replaces the
    /// level, size = 0 deletes it.
    pub fn apply_delta(&mut self, side: BookSide, price: Decimal, size: Decimal, sequence: u64) {
        let levels = match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        };

        if size.is_zero() {
            levels.retain(|level| level.price != price);
        } else if let Some(level) = levels.iter_mut().find(|level| level.price == price) {
            level.size = size;
        } else {
            levels.push(PriceLevel::new(price, size));
            match side {
                BookSide::Bid => levels.sort_by(|a, b| b.price.cmp(&a.price)),
                BookSide::Ask => levels.sort_by(|a, b| a.price.cmp(&b.price)),
            }
        }

        self.sequence = sequence;
        self.last_update = Instant::now();
    }

    /// Mark the book invalid (sequence gap, resubscribe pending).
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Get all bids, descending by price.
    #[must_use]
    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    /// Get all asks, ascending by price.
    #[must_use]
    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    /// Get the best bid.
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    /// Get the best ask.
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    /// Get the feed sequence number of the last applied message.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Get the instant of the last applied message.
    #[must_use]
    pub const fn last_update(&self) -> Instant {
        self.last_update
    }

    /// Milliseconds since the last applied message.
    #[must_use]
    pub fn age_ms(&self) -> u64 {
        u64::try_from(self.last_update.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Spread as a percentage of the best ask.
    #[must_use]
    pub fn spread_pct(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.price();
        let ask = self.best_ask()?.price();
        if ask.is_zero() {
            return None;
        }
        Some((ask - bid) / ask * Decimal::ONE_HUNDRED)
    }

    /// Sum of level sizes across the top `n` levels of one side.
    #[must_use]
    pub fn depth_sum(&self, side: BookSide, n: usize) -> Decimal {
        let levels = match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        };
        levels.iter().take(n).map(PriceLevel::size).sum()
    }

    /// Whether the book satisfies its structural invariants: uncrossed
    /// top-of-book and at least `min_depth` levels on each side.
    #[must_use]
    pub fn is_well_formed(&self, min_depth: usize) -> bool {
        if !self.valid || self.bids.len() < min_depth || self.asks.len() < min_depth {
            return false;
        }
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price() < ask.price(),
            _ => false,
        }
    }

    /// Walk the asks spending `quote_amount`, returning the base acquired
    /// and the volume-weighted average price. `None` if the book is too
    /// thin to fill the amount.
    #[must_use]
    pub fn fill_with_quote(&self, quote_amount: Decimal) -> Option<(Decimal, Decimal)> {
        let mut remaining = quote_amount;
        let mut acquired = Decimal::ZERO;

        for level in &self.asks {
            let level_quote = level.price * level.size;
            if remaining <= level_quote {
                acquired += remaining / level.price;
                remaining = Decimal::ZERO;
                break;
            }
            acquired += level.size;
            remaining -= level_quote;
        }

        if remaining > Decimal::ZERO || acquired.is_zero() {
            return None;
        }
        Some((acquired, quote_amount / acquired))
    }

    /// Walk the bids selling `base_amount`, returning the quote received
    /// and the volume-weighted average price. `None` if the book is too
    /// thin to fill the amount.
    #[must_use]
    pub fn fill_base(&self, base_amount: Decimal) -> Option<(Decimal, Decimal)> {
        let mut remaining = base_amount;
        let mut received = Decimal::ZERO;

        for level in &self.bids {
            if remaining <= level.size {
                received += remaining * level.price;
                remaining = Decimal::ZERO;
                break;
            }
            received += level.size * level.price;
            remaining -= level.size;
        }

        if remaining > Decimal::ZERO || received.is_zero() {
            return None;
        }
        Some((received, received / base_amount))
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}
