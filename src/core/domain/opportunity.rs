//! Cached arbitrage opportunities.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::cycle::Cycle;

/// One evaluated, profitable cycle as held in the scanner cache.
#[derive(Debug, Clone)]
pub struct Opportunity {
    cycle: Cycle,
    gross_profit_pct: Decimal,
    net_profit_pct: Decimal,
    min_freshness_ms: u64,
    computed_at: DateTime<Utc>,
}

impl Opportunity {
    /// Create a new opportunity.
    #[must_use]
    pub fn new(
        cycle: Cycle,
        gross_profit_pct: Decimal,
        net_profit_pct: Decimal,
        min_freshness_ms: u64,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cycle,
            gross_profit_pct,
            net_profit_pct,
            min_freshness_ms,
            computed_at,
        }
    }

    /// Get the cycle.
    #[must_use]
    pub const fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// Gross profit percentage before fees and penalties.
    #[must_use]
    pub const fn gross_profit_pct(&self) -> Decimal {
        self.gross_profit_pct
    }

    /// Net profit percentage after fees and latency penalty. This is the
    /// value compared against the execution threshold and written to the
    /// audit record.
    #[must_use]
    pub const fn net_profit_pct(&self) -> Decimal {
        self.net_profit_pct
    }

    /// Age of the oldest edge in the cycle at evaluation time.
    #[must_use]
    pub const fn min_freshness_ms(&self) -> u64 {
        self.min_freshness_ms
    }

    /// When this evaluation was computed.
    #[must_use]
    pub const fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    /// Whether the opportunity clears the given net-profit threshold.
    #[must_use]
    pub fn clears_threshold(&self, min_profit_pct: Decimal) -> bool {
        self.net_profit_pct >= min_profit_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn opportunity(net: Decimal) -> Opportunity {
        Opportunity::new(
            Cycle::parse("USD → BTC → ETH → USD").unwrap(),
            dec!(2.0),
            net,
            120,
            Utc::now(),
        )
    }

    #[test]
    fn threshold_is_inclusive() {
        let opp = opportunity(dec!(0.05));
        assert!(opp.clears_threshold(dec!(0.05)));
        assert!(!opp.clears_threshold(dec!(0.0501)));
    }

    #[test]
    fn accessors_return_evaluation_values() {
        let opp = opportunity(dec!(1.22));
        assert_eq!(opp.gross_profit_pct(), dec!(2.0));
        assert_eq!(opp.net_profit_pct(), dec!(1.22));
        assert_eq!(opp.min_freshness_ms(), 120);
        assert_eq!(opp.cycle().legs(), 3);
    }
}
