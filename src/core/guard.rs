//! Pre-trade safety checks.
//!
//! Decides whether an opportunity becomes a trade. Checks run in a fixed
//! order and short-circuit on the first failure; every rejection carries a
//! deterministic reason string and a classification for observability.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::core::breaker::CircuitBreaker;
use crate::core::domain::Opportunity;
use crate::core::exchange::ExchangeAdapter;
use crate::core::settings::SettingsHandle;

/// Balance cache lifetime.
const BALANCE_CACHE_TTL: Duration = Duration::from_secs(10);

/// Why a rejected opportunity was rejected.
///
/// Policy denials (disabled, broken breaker, threshold miss, busy slot)
/// are `Skipped`; environmental failures (budget, balance, liveness) are
/// `Missed`; a base-currency mismatch is `Filtered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionClass {
    Skipped,
    Missed,
    Filtered,
}

impl RejectionClass {
    /// Stable string form used in audit records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "SKIPPED",
            Self::Missed => "MISSED",
            Self::Filtered => "FILTERED",
        }
    }
}

/// Outcome of the guard check chain.
#[derive(Debug, Clone)]
pub enum GuardDecision {
    /// All checks passed and the execution slot is claimed for the caller.
    Approved,
    Rejected {
        class: RejectionClass,
        reason: String,
    },
}

impl GuardDecision {
    fn rejected(class: RejectionClass, reason: impl Into<String>) -> Self {
        Self::Rejected {
            class,
            reason: reason.into(),
        }
    }
}

/// Pre-trade safety guard.
pub struct TradeGuard {
    settings: Arc<SettingsHandle>,
    breaker: Arc<CircuitBreaker>,
    exchange: Arc<dyn ExchangeAdapter>,
    balance_cache: Mutex<Option<(Instant, HashMap<String, Decimal>)>>,
}

impl TradeGuard {
    /// Create a guard.
    #[must_use]
    pub fn new(
        settings: Arc<SettingsHandle>,
        breaker: Arc<CircuitBreaker>,
        exchange: Arc<dyn ExchangeAdapter>,
    ) -> Self {
        Self {
            settings,
            breaker,
            exchange,
            balance_cache: Mutex::new(None),
        }
    }

    /// Run the full check chain for an opportunity. On approval the
    /// breaker's execution slot is already claimed under `trade_id`; the
    /// caller must release it via the executor's terminal bookkeeping.
    pub async fn evaluate_and_claim(
        &self,
        opportunity: &Opportunity,
        trade_id: &str,
    ) -> GuardDecision {
        let settings = self.settings.get();
        let trade_amount = settings.trade_amount;

        // 1. Master switch
        if !settings.is_enabled {
            return GuardDecision::rejected(RejectionClass::Skipped, "Live trading is not enabled");
        }

        // 2. Circuit breaker
        if let Err(reason) = self.breaker.check_can_trade() {
            return GuardDecision::rejected(RejectionClass::Skipped, reason);
        }

        // 3. Remaining loss budgets
        let remaining_daily = self.breaker.remaining_daily_budget();
        if remaining_daily < trade_amount {
            return GuardDecision::rejected(
                RejectionClass::Missed,
                format!(
                    "Insufficient daily budget: ${} < ${}",
                    remaining_daily.round_dp(2),
                    trade_amount.round_dp(2)
                ),
            );
        }
        let remaining_total = self.breaker.remaining_total_budget();
        if remaining_total < trade_amount {
            return GuardDecision::rejected(
                RejectionClass::Missed,
                format!(
                    "Insufficient total budget: ${} < ${}",
                    remaining_total.round_dp(2),
                    trade_amount.round_dp(2)
                ),
            );
        }

        // 4. Exchange balance in the start currency
        let start = opportunity.cycle().start();
        match self.balance_of(start.as_str()).await {
            Ok(balance) if balance >= trade_amount => {}
            Ok(balance) => {
                return GuardDecision::rejected(
                    RejectionClass::Missed,
                    format!(
                        "Insufficient balance: ${} < ${} {start}",
                        balance.round_dp(2),
                        trade_amount.round_dp(2)
                    ),
                );
            }
            Err(e) => {
                return GuardDecision::rejected(
                    RejectionClass::Missed,
                    format!("Balance check failed: {e}"),
                );
            }
        }

        // 5. Exchange liveness
        if let Err(e) = self.exchange.ping().await {
            return GuardDecision::rejected(
                RejectionClass::Missed,
                format!("Exchange unhealthy: {e}"),
            );
        }

        // 6. Base-currency filter
        if !settings.permits_start(start) {
            return GuardDecision::rejected(
                RejectionClass::Filtered,
                format!("Start currency {start} does not match base currency filter"),
            );
        }

        // 7. Profit threshold
        if !opportunity.clears_threshold(settings.min_profit_pct) {
            return GuardDecision::rejected(
                RejectionClass::Skipped,
                format!(
                    "Profit {}% below threshold {}%",
                    opportunity.net_profit_pct().round_dp(4),
                    settings.min_profit_pct
                ),
            );
        }

        // 8. At-most-one execution
        if !self.breaker.mark_executing(trade_id) {
            return GuardDecision::rejected(RejectionClass::Skipped, "Trade already in progress");
        }

        debug!(trade_id, cycle = %opportunity.cycle(), "Guard checks passed");
        GuardDecision::Approved
    }

    /// Sum the balances of every wire variant of a currency, served from a
    /// short-lived cache.
    async fn balance_of(&self, symbol: &str) -> crate::error::Result<Decimal> {
        let balances = self.balances_cached().await?;
        let currency = crate::core::domain::Currency::new(symbol);
        let total = balances
            .iter()
            .filter(|(asset, _)| {
                crate::core::domain::Currency::from_wire(asset).as_str() == currency.as_str()
            })
            .map(|(_, amount)| *amount)
            .sum();
        Ok(total)
    }

    async fn balances_cached(&self) -> crate::error::Result<HashMap<String, Decimal>> {
        {
            let cache = self.balance_cache.lock();
            if let Some((fetched_at, balances)) = cache.as_ref() {
                if fetched_at.elapsed() < BALANCE_CACHE_TTL {
                    return Ok(balances.clone());
                }
            }
        }

        let balances = self.exchange.balance().await.map_err(|e| {
            warn!(error = %e, "Balance fetch failed");
            e
        })?;
        *self.balance_cache.lock() = Some((Instant::now(), balances.clone()));
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::Cycle;
    use crate::core::settings::{BaseCurrencyFilter, TradeSettings};
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct StubExchange {
        usd_balance: Decimal,
        healthy: bool,
        balance_err: Option<String>,
    }

    impl Default for StubExchange {
        fn default() -> Self {
            Self {
                usd_balance: dec!(1000),
                healthy: true,
                balance_err: None,
            }
        }
    }

    #[async_trait]
    impl ExchangeAdapter for StubExchange {
        fn name(&self) -> &'static str {
            "stub"
        }
        async fn list_pairs(&self, _max_pairs: usize) -> Result<Vec<crate::core::exchange::PairInfo>> {
            Ok(Vec::new())
        }
        async fn place_order(&self, _request: &crate::core::exchange::OrderRequest) -> Result<String> {
            Err(Error::Exchange("not implemented".into()))
        }
        async fn query_order(&self, _txid: &str) -> Result<crate::core::exchange::OrderStatus> {
            Err(Error::Exchange("not implemented".into()))
        }
        async fn cancel_order(&self, _txid: &str) -> Result<()> {
            Ok(())
        }
        async fn balance(&self) -> Result<HashMap<String, Decimal>> {
            if let Some(err) = &self.balance_err {
                return Err(Error::Exchange(err.clone()));
            }
            Ok(HashMap::from([("ZUSD".to_string(), self.usd_balance)]))
        }
        async fn fees(&self) -> Result<crate::core::exchange::FeeSchedule> {
            Ok(crate::core::exchange::FeeSchedule {
                taker_pct: dec!(0.26),
                maker_pct: dec!(0.16),
            })
        }
        async fn ticker(&self, _pair: &str) -> Result<crate::core::exchange::TickerQuote> {
            Err(Error::Exchange("not implemented".into()))
        }
        async fn ping(&self) -> Result<()> {
            if self.healthy {
                Ok(())
            } else {
                Err(Error::Connection("exchange down".into()))
            }
        }
    }

    fn opportunity(net_pct: Decimal) -> Opportunity {
        Opportunity::new(
            Cycle::parse("USD → BTC → ETH → USD").unwrap(),
            net_pct + dec!(0.78),
            net_pct,
            100,
            Utc::now(),
        )
    }

    fn guard_with(
        exchange: StubExchange,
        enabled: bool,
    ) -> (TradeGuard, Arc<CircuitBreaker>, Arc<SettingsHandle>) {
        let settings = Arc::new(SettingsHandle::new(TradeSettings::default()).unwrap());
        if enabled {
            settings.enable();
        }
        let breaker = Arc::new(CircuitBreaker::new(Arc::clone(&settings)));
        let guard = TradeGuard::new(
            Arc::clone(&settings),
            Arc::clone(&breaker),
            Arc::new(exchange),
        );
        (guard, breaker, settings)
    }

    fn assert_rejected(decision: &GuardDecision, class: RejectionClass, fragment: &str) {
        match decision {
            GuardDecision::Rejected {
                class: got_class,
                reason,
            } => {
                assert_eq!(*got_class, class, "unexpected class, reason: {reason}");
                assert!(
                    reason.contains(fragment),
                    "reason '{reason}' missing '{fragment}'"
                );
            }
            GuardDecision::Approved => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn approves_and_claims_slot() {
        let (guard, breaker, _settings) = guard_with(StubExchange::default(), true);
        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-1")
            .await;
        assert!(matches!(decision, GuardDecision::Approved));
        // Slot is claimed for the caller
        assert!(!breaker.mark_executing("LIVE-2"));
    }

    #[tokio::test]
    async fn disabled_trading_is_skipped() {
        let (guard, _breaker, _settings) = guard_with(StubExchange::default(), false);
        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-1")
            .await;
        assert_rejected(&decision, RejectionClass::Skipped, "not enabled");
    }

    #[tokio::test]
    async fn broken_breaker_is_skipped() {
        let (guard, breaker, settings) = guard_with(StubExchange::default(), true);
        breaker.trigger_manual("halt");
        settings.enable();
        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-1")
            .await;
        assert_rejected(&decision, RejectionClass::Skipped, "Circuit breaker");
    }

    #[tokio::test]
    async fn exhausted_budget_is_missed() {
        let (guard, breaker, settings) = guard_with(StubExchange::default(), true);
        breaker.record_completed("LIVE-0", dec!(-25), dec!(100));
        settings.enable();
        // Remaining budget $5 < $10 trade amount
        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-1")
            .await;
        assert_rejected(&decision, RejectionClass::Missed, "daily budget");
    }

    #[tokio::test]
    async fn trade_amount_equal_to_budget_is_accepted() {
        let (guard, breaker, settings) = guard_with(StubExchange::default(), true);
        breaker.record_completed("LIVE-0", dec!(-20), dec!(100));
        settings.enable();
        // Remaining budget exactly $10 == trade amount
        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-1")
            .await;
        assert!(matches!(decision, GuardDecision::Approved));
    }

    #[tokio::test]
    async fn insufficient_balance_is_missed() {
        let exchange = StubExchange {
            usd_balance: dec!(5),
            ..Default::default()
        };
        let (guard, _breaker, _settings) = guard_with(exchange, true);
        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-1")
            .await;
        assert_rejected(&decision, RejectionClass::Missed, "Insufficient balance");
    }

    #[tokio::test]
    async fn balance_error_preserves_exchange_text() {
        let exchange = StubExchange {
            balance_err: Some("EAPI:Rate limit exceeded".to_string()),
            ..Default::default()
        };
        let (guard, _breaker, _settings) = guard_with(exchange, true);
        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-1")
            .await;
        assert_rejected(&decision, RejectionClass::Missed, "Rate limit exceeded");
    }

    #[tokio::test]
    async fn unhealthy_exchange_is_missed() {
        let exchange = StubExchange {
            healthy: false,
            ..Default::default()
        };
        let (guard, _breaker, _settings) = guard_with(exchange, true);
        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-1")
            .await;
        assert_rejected(&decision, RejectionClass::Missed, "unhealthy");
    }

    #[tokio::test]
    async fn filter_mismatch_is_filtered() {
        let (guard, _breaker, settings) = guard_with(StubExchange::default(), true);
        settings
            .update(|s| s.base_currency = BaseCurrencyFilter::Btc)
            .unwrap();
        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-1")
            .await;
        assert_rejected(&decision, RejectionClass::Filtered, "base currency filter");
    }

    #[tokio::test]
    async fn threshold_miss_is_skipped_and_boundary_is_inclusive() {
        let (guard, breaker, _settings) = guard_with(StubExchange::default(), true);

        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(0.0499)), "LIVE-1")
            .await;
        assert_rejected(&decision, RejectionClass::Skipped, "below threshold");

        // Exactly at the threshold is accepted
        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(0.05)), "LIVE-2")
            .await;
        assert!(matches!(decision, GuardDecision::Approved));
        breaker.mark_execution_complete("LIVE-2");
    }

    #[tokio::test]
    async fn busy_slot_is_skipped_with_deterministic_reason() {
        let (guard, breaker, _settings) = guard_with(StubExchange::default(), true);
        assert!(breaker.mark_executing("LIVE-1"));

        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-2")
            .await;
        assert_rejected(
            &decision,
            RejectionClass::Skipped,
            "Trade already in progress",
        );

        // After the first trade terminates, the next event proceeds
        breaker.mark_execution_complete("LIVE-1");
        let decision = guard
            .evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-3")
            .await;
        assert!(matches!(decision, GuardDecision::Approved));
    }
}
