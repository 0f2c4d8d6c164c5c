//! Circuit breaker enforcing loss caps and at-most-one execution.
//!
//! All mutations happen inside a single critical section on the state
//! singleton. Completed and partial trades are tracked separately; only
//! realized P/L counts toward the loss limits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::core::settings::SettingsHandle;

/// The breaker's state singleton.
#[derive(Debug, Clone)]
pub struct BreakerState {
    pub is_broken: bool,
    pub broken_at: Option<DateTime<Utc>>,
    pub broken_reason: Option<String>,

    pub daily_profit: Decimal,
    pub daily_loss: Decimal,
    pub daily_trades: u64,
    pub daily_wins: u64,

    pub total_profit: Decimal,
    pub total_loss: Decimal,
    pub total_trades: u64,
    pub total_wins: u64,
    pub total_trade_amount: Decimal,

    pub partial_trades: u64,
    pub partial_estimated_profit: Decimal,
    pub partial_estimated_loss: Decimal,
    pub partial_trade_amount: Decimal,

    pub last_trade_at: Option<DateTime<Utc>>,
    pub last_daily_reset: DateTime<Utc>,

    pub is_executing: bool,
    pub current_trade_id: Option<String>,
}

impl BreakerState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            is_broken: false,
            broken_at: None,
            broken_reason: None,
            daily_profit: Decimal::ZERO,
            daily_loss: Decimal::ZERO,
            daily_trades: 0,
            daily_wins: 0,
            total_profit: Decimal::ZERO,
            total_loss: Decimal::ZERO,
            total_trades: 0,
            total_wins: 0,
            total_trade_amount: Decimal::ZERO,
            partial_trades: 0,
            partial_estimated_profit: Decimal::ZERO,
            partial_estimated_loss: Decimal::ZERO,
            partial_trade_amount: Decimal::ZERO,
            last_trade_at: None,
            last_daily_reset: now,
            is_executing: false,
            current_trade_id: None,
        }
    }
}

/// Safety state machine for live execution.
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    settings: Arc<SettingsHandle>,
}

impl CircuitBreaker {
    /// Create a breaker bound to the live settings (for loss limits and
    /// the forced-disable on trip).
    #[must_use]
    pub fn new(settings: Arc<SettingsHandle>) -> Self {
        Self {
            state: Mutex::new(BreakerState::new(Utc::now())),
            settings,
        }
    }

    /// Snapshot the current state, applying the daily rollover first.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut state = self.state.lock();
        self.rollover_if_needed(&mut state, Utc::now());
        state.clone()
    }

    /// Whether trading is currently allowed by the breaker.
    ///
    /// # Errors
    /// Returns the deterministic reason string when trading is blocked.
    pub fn check_can_trade(&self) -> Result<(), String> {
        let settings = self.settings.get();
        let mut state = self.state.lock();
        self.rollover_if_needed(&mut state, Utc::now());

        if state.is_broken {
            return Err(format!(
                "Circuit breaker triggered: {}",
                state.broken_reason.as_deref().unwrap_or("unknown")
            ));
        }
        if state.daily_loss >= settings.max_daily_loss {
            let reason = format!("Daily loss limit reached (${})", state.daily_loss.round_dp(2));
            self.trip(&mut state, reason.clone());
            return Err(reason);
        }
        if state.total_loss >= settings.max_total_loss {
            let reason = format!("Total loss limit reached (${})", state.total_loss.round_dp(2));
            self.trip(&mut state, reason.clone());
            return Err(reason);
        }
        Ok(())
    }

    /// Claim the single execution slot. Succeeds iff no trade is in flight.
    pub fn mark_executing(&self, trade_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.is_executing {
            return false;
        }
        state.is_executing = true;
        state.current_trade_id = Some(trade_id.to_string());
        true
    }

    /// Release the execution slot for the matching trade id.
    pub fn mark_execution_complete(&self, trade_id: &str) {
        let mut state = self.state.lock();
        if state.current_trade_id.as_deref() == Some(trade_id) {
            state.is_executing = false;
            state.current_trade_id = None;
        }
    }

    /// Record the realized result of a completed trade and re-check the
    /// loss limits.
    pub fn record_completed(&self, trade_id: &str, profit_loss: Decimal, trade_amount: Decimal) {
        let settings = self.settings.get();
        let mut state = self.state.lock();
        self.rollover_if_needed(&mut state, Utc::now());

        Self::book_realized(&mut state, profit_loss);
        state.daily_trades += 1;
        state.total_trades += 1;
        state.total_trade_amount += trade_amount;
        if profit_loss >= Decimal::ZERO {
            state.daily_wins += 1;
            state.total_wins += 1;
        }
        state.last_trade_at = Some(Utc::now());
        state.is_executing = false;
        state.current_trade_id = None;

        info!(
            trade_id,
            profit_loss = %profit_loss.round_dp(4),
            amount = %trade_amount,
            "Recorded trade result"
        );

        self.check_limits(&mut state, settings.max_daily_loss, settings.max_total_loss);
    }

    /// Record a partial trade: an unresolved held position with a snapshot
    /// estimate. Estimates never count toward the loss limits.
    pub fn record_partial(&self, trade_id: &str, trade_amount: Decimal, est_value_usd: Decimal) {
        let mut state = self.state.lock();
        self.rollover_if_needed(&mut state, Utc::now());

        let est_pl = est_value_usd - trade_amount;
        state.partial_trades += 1;
        state.partial_trade_amount += trade_amount;
        if est_pl >= Decimal::ZERO {
            state.partial_estimated_profit += est_pl;
        } else {
            state.partial_estimated_loss += -est_pl;
        }
        state.last_trade_at = Some(Utc::now());
        state.is_executing = false;
        state.current_trade_id = None;

        warn!(
            trade_id,
            amount = %trade_amount,
            est_value_usd = %est_value_usd.round_dp(2),
            "Recorded partial trade"
        );
    }

    /// Resolve a previously-recorded partial: back out the estimate and
    /// book the actual P/L exactly as a completed trade.
    pub fn resolve_partial(
        &self,
        trade_id: &str,
        original_amount: Decimal,
        est_pl: Decimal,
        actual_amount_usd: Decimal,
    ) {
        let settings = self.settings.get();
        let mut state = self.state.lock();
        self.rollover_if_needed(&mut state, Utc::now());

        if est_pl >= Decimal::ZERO {
            state.partial_estimated_profit -= est_pl;
        } else {
            state.partial_estimated_loss -= -est_pl;
        }
        state.partial_trades = state.partial_trades.saturating_sub(1);
        state.partial_trade_amount -= original_amount;

        let actual_pl = actual_amount_usd - original_amount;
        Self::book_realized(&mut state, actual_pl);
        state.daily_trades += 1;
        state.total_trades += 1;
        if actual_pl >= Decimal::ZERO {
            state.daily_wins += 1;
            state.total_wins += 1;
        }
        state.last_trade_at = Some(Utc::now());

        info!(
            trade_id,
            actual_pl = %actual_pl.round_dp(4),
            "Resolved partial trade"
        );

        self.check_limits(&mut state, settings.max_daily_loss, settings.max_total_loss);
    }

    /// Manually trigger the breaker.
    pub fn trigger_manual(&self, reason: &str) {
        let mut state = self.state.lock();
        let reason = format!("Manual: {reason}");
        self.trip(&mut state, reason);
    }

    /// Trip the breaker with a diagnostic reason (invariant violations).
    pub fn trip_with_reason(&self, reason: String) {
        let mut state = self.state.lock();
        self.trip(&mut state, reason);
    }

    /// Reset the break flag. Loss counters are untouched.
    pub fn reset(&self) -> BreakerState {
        let mut state = self.state.lock();
        state.is_broken = false;
        state.broken_at = None;
        state.broken_reason = None;
        state.is_executing = false;
        state.current_trade_id = None;
        info!("Circuit breaker reset");
        state.clone()
    }

    /// Zero the daily aggregates.
    pub fn reset_daily_stats(&self) -> BreakerState {
        let mut state = self.state.lock();
        Self::zero_daily(&mut state, Utc::now());
        info!("Daily stats manually reset");
        state.clone()
    }

    /// Zero every aggregate and clear the break.
    pub fn reset_all_stats(&self) -> BreakerState {
        let mut state = self.state.lock();
        *state = BreakerState::new(Utc::now());
        warn!("All stats manually reset");
        state.clone()
    }

    /// Remaining daily loss budget, clamped at zero.
    #[must_use]
    pub fn remaining_daily_budget(&self) -> Decimal {
        let settings = self.settings.get();
        let state = self.state();
        (settings.max_daily_loss - state.daily_loss).max(Decimal::ZERO)
    }

    /// Remaining total loss budget, clamped at zero.
    #[must_use]
    pub fn remaining_total_budget(&self) -> Decimal {
        let settings = self.settings.get();
        let state = self.state();
        (settings.max_total_loss - state.total_loss).max(Decimal::ZERO)
    }

    fn book_realized(state: &mut BreakerState, profit_loss: Decimal) {
        if profit_loss >= Decimal::ZERO {
            state.daily_profit += profit_loss;
            state.total_profit += profit_loss;
        } else {
            state.daily_loss += -profit_loss;
            state.total_loss += -profit_loss;
        }
    }

    fn check_limits(
        &self,
        state: &mut BreakerState,
        max_daily_loss: Decimal,
        max_total_loss: Decimal,
    ) {
        if state.daily_loss >= max_daily_loss {
            let reason = format!("Daily loss limit reached (${})", state.daily_loss.round_dp(2));
            self.trip(state, reason);
        } else if state.total_loss >= max_total_loss {
            let reason = format!("Total loss limit reached (${})", state.total_loss.round_dp(2));
            self.trip(state, reason);
        }
    }

    fn trip(&self, state: &mut BreakerState, reason: String) {
        if !state.is_broken {
            state.is_broken = true;
            state.broken_at = Some(Utc::now());
            state.broken_reason = Some(reason.clone());
        }
        state.is_executing = false;
        state.current_trade_id = None;

        // Execution stays off until the operator intervenes
        self.settings.disable();

        error!(reason = %reason, "CIRCUIT BREAKER TRIPPED");
    }

    fn rollover_if_needed(&self, state: &mut BreakerState, now: DateTime<Utc>) {
        if state.last_daily_reset.date_naive() >= now.date_naive() {
            return;
        }

        Self::zero_daily(state, now);

        let daily_break = state
            .broken_reason
            .as_deref()
            .is_some_and(|reason| reason.to_lowercase().contains("daily"));
        if state.is_broken && daily_break {
            state.is_broken = false;
            state.broken_at = None;
            state.broken_reason = None;
            info!("Circuit breaker auto-reset on new day");
        }

        info!("Daily stats reset");
    }

    fn zero_daily(state: &mut BreakerState, now: DateTime<Utc>) {
        state.daily_profit = Decimal::ZERO;
        state.daily_loss = Decimal::ZERO;
        state.daily_trades = 0;
        state.daily_wins = 0;
        state.last_daily_reset = now;
    }

    #[cfg(test)]
    pub(crate) fn force_last_daily_reset(&self, when: DateTime<Utc>) {
        self.state.lock().last_daily_reset = when;
    }
}
