//! Directional conversion edges.

use std::time::Instant;

use rust_decimal::Decimal;

use crate::core::domain::PriceLevel;
use crate::core::exchange::OrderSide;

/// Why an edge is currently unusable, for health accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    NoBook,
    ThinDepth,
    Stale,
    BadSpread,
    NoPrice,
}

/// A directed, fee-aware conversion view of one exchange pair.
///
/// The edge stores the fee-free unit rate (output per unit input at top of
/// book), a fee-adjusted display rate, aggregate depth, and the consumed
/// book side for effective-rate walks. Values are replaced atomically on
/// each book update; the version counter increments per replacement.
#[derive(Debug, Clone)]
pub struct Edge {
    pair_ws: String,
    side: OrderSide,
    rate: Decimal,
    fee_adjusted_rate: Decimal,
    depth_sum: Decimal,
    levels: Vec<PriceLevel>,
    sequence: u64,
    version: u64,
    valid: bool,
    invalid_reason: Option<InvalidReason>,
    book_updated_at: Instant,
}

impl Edge {
    /// Build a live edge from refreshed book values.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn live(
        pair_ws: impl Into<String>,
        side: OrderSide,
        rate: Decimal,
        fee_adjusted_rate: Decimal,
        depth_sum: Decimal,
        levels: Vec<PriceLevel>,
        sequence: u64,
        version: u64,
        book_updated_at: Instant,
    ) -> Self {
        Self {
            pair_ws: pair_ws.into(),
            side,
            rate,
            fee_adjusted_rate,
            depth_sum,
            levels,
            sequence,
            version,
            valid: true,
            invalid_reason: None,
            book_updated_at,
        }
    }

    /// Build an invalid edge placeholder.
    #[must_use]
    pub fn invalid(
        pair_ws: impl Into<String>,
        side: OrderSide,
        reason: InvalidReason,
        version: u64,
    ) -> Self {
        Self {
            pair_ws: pair_ws.into(),
            side,
            rate: Decimal::ZERO,
            fee_adjusted_rate: Decimal::ZERO,
            depth_sum: Decimal::ZERO,
            levels: Vec::new(),
            sequence: 0,
            version,
            valid: false,
            invalid_reason: Some(reason),
            book_updated_at: Instant::now(),
        }
    }

    /// Streaming pair name this edge is derived from.
    #[must_use]
    pub fn pair_ws(&self) -> &str {
        &self.pair_ws
    }

    /// Direction of the order realizing this conversion.
    #[must_use]
    pub const fn side(&self) -> OrderSide {
        self.side
    }

    /// Fee-free output per unit input at top of book.
    #[must_use]
    pub const fn rate(&self) -> Decimal {
        self.rate
    }

    /// Fee-adjusted output multiplier, for display.
    #[must_use]
    pub const fn fee_adjusted_rate(&self) -> Decimal {
        self.fee_adjusted_rate
    }

    /// Aggregate size across the stored levels.
    #[must_use]
    pub const fn depth_sum(&self) -> Decimal {
        self.depth_sum
    }

    /// Feed sequence of the underlying book at refresh time.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Replacement counter.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Milliseconds since the underlying book was last updated.
    #[must_use]
    pub fn age_ms(&self) -> u64 {
        u64::try_from(self.book_updated_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Why the edge is invalid, if it is.
    #[must_use]
    pub const fn invalid_reason(&self) -> Option<InvalidReason> {
        self.invalid_reason
    }

    /// Whether the edge can be used for evaluation right now. An edge at
    /// exactly the reject threshold is already invalid.
    #[must_use]
    pub fn is_usable(&self, reject_ms: u64) -> bool {
        self.valid && self.age_ms() < reject_ms
    }

    /// Walk the stored levels with `input_amount` of the edge's input
    /// currency, returning the realized output and effective unit rate.
    /// `None` if the stored depth cannot absorb the amount.
    #[must_use]
    pub fn effective_rate(&self, input_amount: Decimal) -> Option<(Decimal, Decimal)> {
        if !self.valid || input_amount <= Decimal::ZERO {
            return None;
        }

        let mut remaining = input_amount;
        let mut output = Decimal::ZERO;

        for level in &self.levels {
            match self.side {
                // Buying: input is quote, each level absorbs price * size
                OrderSide::Buy => {
                    let level_quote = level.price() * level.size();
                    if remaining <= level_quote {
                        output += remaining / level.price();
                        remaining = Decimal::ZERO;
                        break;
                    }
                    output += level.size();
                    remaining -= level_quote;
                }
                // Selling: input is base, each level absorbs size
                OrderSide::Sell => {
                    if remaining <= level.size() {
                        output += remaining * level.price();
                        remaining = Decimal::ZERO;
                        break;
                    }
                    output += level.size() * level.price();
                    remaining -= level.size();
                }
            }
        }

        if remaining > Decimal::ZERO || output.is_zero() {
            return None;
        }
        Some((output, output / input_amount))
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, age: std::time::Duration) {
        if let Some(past) = Instant::now().checked_sub(age) {
            self.book_updated_at = past;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn buy_edge() -> Edge {
        Edge::live(
            "XBT/USD",
            OrderSide::Buy,
            dec!(1) / dec!(30000),
            dec!(1) / (dec!(30000) * dec!(1.0026)),
            dec!(3),
            vec![
                PriceLevel::new(dec!(30000), dec!(1)),
                PriceLevel::new(dec!(30010), dec!(2)),
            ],
            1,
            1,
            Instant::now(),
        )
    }

    fn sell_edge() -> Edge {
        Edge::live(
            "ETH/USD",
            OrderSide::Sell,
            dec!(1530),
            dec!(1530) * dec!(0.9974),
            dec!(4),
            vec![
                PriceLevel::new(dec!(1530), dec!(2)),
                PriceLevel::new(dec!(1529), dec!(2)),
            ],
            1,
            1,
            Instant::now(),
        )
    }

    #[test]
    fn buy_effective_rate_walks_asks() {
        let edge = buy_edge();
        // Spend 30000: fully absorbed by the first level
        let (output, rate) = edge.effective_rate(dec!(30000)).unwrap();
        assert_eq!(output, dec!(1));
        assert_eq!(rate, dec!(1) / dec!(30000));

        // Spend 60010: one level plus half the next
        let (output, _) = edge.effective_rate(dec!(60010)).unwrap();
        assert_eq!(output, dec!(2));
    }

    #[test]
    fn sell_effective_rate_walks_bids() {
        let edge = sell_edge();
        let (output, rate) = edge.effective_rate(dec!(3)).unwrap();
        assert_eq!(output, dec!(1530) * dec!(2) + dec!(1529));
        assert_eq!(rate, output / dec!(3));
    }

    #[test]
    fn effective_rate_exceeding_depth_is_none() {
        assert!(sell_edge().effective_rate(dec!(100)).is_none());
    }

    #[test]
    fn staleness_boundary_is_exclusive() {
        let mut edge = buy_edge();
        assert!(edge.is_usable(2000));
        edge.backdate(Duration::from_millis(2000));
        // At exactly reject_ms the edge is invalid
        assert!(!edge.is_usable(2000));
    }

    #[test]
    fn invalid_edge_is_never_usable() {
        let edge = Edge::invalid("XBT/USD", OrderSide::Buy, InvalidReason::ThinDepth, 3);
        assert!(!edge.is_usable(u64::MAX));
        assert_eq!(edge.invalid_reason(), Some(InvalidReason::ThinDepth));
        assert!(edge.effective_rate(dec!(1)).is_none());
    }
}
