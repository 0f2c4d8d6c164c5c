//! Cycle executor.
//!
//! Executes a cycle leg-by-leg, each leg one market order against the
//! private channel with fill verification. On a mid-cycle failure the
//! carried position is held, never auto-unwound; resolution is a separate
//! operator-initiated entry point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::audit::AuditSink;
use crate::core::breaker::CircuitBreaker;
use crate::core::domain::{Currency, Cycle, LegFill, Pair, TradeRecord, TradeStatus};
use crate::core::exchange::{
    ExchangeAdapter, OrderKind, OrderRequest, OrderSide, OrderState, OrderStatus,
};
use crate::core::ingress::MarketDataIngress;
use crate::core::settings::SettingsHandle;
use crate::error::{Error, Result};

/// Bounded interval between order-status polls.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pause before a retry after an order-placement error.
const RETRY_PAUSE: Duration = Duration::from_millis(500);

enum FillWait {
    Filled(OrderStatus),
    /// Order reached a terminal non-filled state or the deadline expired.
    NotFilled(String),
}

/// Executes cycles sequentially; the sole mutator of the trade record.
pub struct CycleExecutor {
    exchange: Arc<dyn ExchangeAdapter>,
    ingress: Arc<MarketDataIngress>,
    catalog: Arc<crate::core::domain::PairCatalog>,
    settings: Arc<SettingsHandle>,
    breaker: Arc<CircuitBreaker>,
    audit: Arc<dyn AuditSink>,
    shutdown: watch::Receiver<bool>,
}

impl CycleExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(
        exchange: Arc<dyn ExchangeAdapter>,
        ingress: Arc<MarketDataIngress>,
        catalog: Arc<crate::core::domain::PairCatalog>,
        settings: Arc<SettingsHandle>,
        breaker: Arc<CircuitBreaker>,
        audit: Arc<dyn AuditSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            exchange,
            ingress,
            catalog,
            settings,
            breaker,
            audit,
            shutdown,
        }
    }

    /// Generate an opaque trade id.
    #[must_use]
    pub fn new_trade_id() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("LIVE-{}", id[..12].to_uppercase())
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Execute a full cycle with `amount` of the start currency. Always
    /// writes a terminal status and releases the execution slot before
    /// returning.
    pub async fn execute_cycle(
        &self,
        trade_id: String,
        cycle: &Cycle,
        amount: Decimal,
        opportunity_profit_pct: Option<Decimal>,
    ) -> TradeRecord {
        let legs = cycle.legs() as u32;
        let mut record =
            TradeRecord::open(trade_id, cycle.id(), legs, amount, opportunity_profit_pct);

        // Claim the slot unless the guard already claimed it under this id
        let already_claimed = self
            .breaker
            .state()
            .current_trade_id
            .as_deref()
            == Some(record.trade_id.as_str());
        if !already_claimed && !self.breaker.mark_executing(&record.trade_id) {
            record.status = TradeStatus::Failed;
            record.error_message = Some("Trade already in progress".to_string());
            record.completed_at = Some(Utc::now());
            self.write_audit(&record);
            return record;
        }

        info!(
            trade_id = %record.trade_id,
            cycle = %cycle,
            amount = %amount,
            "Starting live trade"
        );
        let started = Instant::now();

        let mut current_amount = amount;
        let mut current_currency = cycle.start().clone();
        let mut invariant_tripped = false;

        for (i, (from, to)) in cycle.hops().enumerate() {
            let leg_number = i as u32 + 1;
            record.current_leg = leg_number;

            if i > 0 && self.shutdown_requested() {
                record.error_message =
                    Some(format!("Leg {leg_number} refused: shutdown in progress"));
                record.status = TradeStatus::Partial;
                break;
            }

            let is_final = leg_number == legs;
            let (leg, violation) = self
                .execute_leg(
                    leg_number,
                    from,
                    to,
                    current_amount,
                    is_final,
                    opportunity_profit_pct,
                )
                .await;

            if let Some(order_id) = &leg.order_id {
                record.order_ids.push(order_id.clone());
            }
            let leg_failed = !leg.succeeded();
            let leg_error = leg.error.clone();
            let leg_output = leg.output_amount;
            record.leg_fills.push(leg);

            if violation {
                invariant_tripped = true;
                record.status = TradeStatus::Failed;
                record.error_message = leg_error;
                break;
            }

            if leg_failed {
                record.status = if i == 0 {
                    TradeStatus::Failed
                } else {
                    TradeStatus::Partial
                };
                record.error_message = Some(format!(
                    "Leg {leg_number} failed: {}",
                    leg_error.unwrap_or_else(|| "unknown".to_string())
                ));
                break;
            }

            current_amount = leg_output.unwrap_or(Decimal::ZERO);
            current_currency = to.clone();
            info!(
                trade_id = %record.trade_id,
                leg = leg_number,
                output = %current_amount,
                currency = %current_currency,
                "Leg complete"
            );
        }

        if record.status == TradeStatus::Executing {
            record.status = TradeStatus::Completed;
            record.amount_out = Some(current_amount);
            let profit_loss = current_amount - amount;
            record.profit_loss = Some(profit_loss);
            record.profit_loss_pct = Some(profit_loss / amount * Decimal::ONE_HUNDRED);
        }

        if record.status == TradeStatus::Partial {
            record.held_currency = Some(current_currency.clone());
            record.held_amount = Some(current_amount);
            match self.value_in_usd(&current_currency, current_amount).await {
                Ok(value) => record.held_value_usd = Some(value),
                Err(e) => warn!(
                    trade_id = %record.trade_id,
                    error = %e,
                    "Snapshot valuation of held position failed"
                ),
            }
            warn!(
                trade_id = %record.trade_id,
                held = %current_amount,
                currency = %current_currency,
                "Holding position after partial cycle"
            );
        }

        record.completed_at = Some(Utc::now());
        record.total_execution_ms = i64::try_from(started.elapsed().as_millis()).ok();

        // Terminal bookkeeping against the breaker
        match record.status {
            TradeStatus::Completed => {
                if let Some(profit_loss) = record.profit_loss {
                    self.breaker
                        .record_completed(&record.trade_id, profit_loss, amount);
                }
            }
            TradeStatus::Partial => {
                let est_value = record.held_value_usd.unwrap_or(Decimal::ZERO);
                self.breaker
                    .record_partial(&record.trade_id, amount, est_value);
            }
            _ => self.breaker.mark_execution_complete(&record.trade_id),
        }

        if invariant_tripped {
            error!(trade_id = %record.trade_id, "Trade failed on fill invariant violation");
        }

        self.write_audit(&record);
        record
    }

    /// Execute one leg with the per-leg retry budget. The boolean is true
    /// when the leg tripped the fill-consistency invariant.
    async fn execute_leg(
        &self,
        leg_number: u32,
        from: &Currency,
        to: &Currency,
        amount: Decimal,
        is_final: bool,
        net_profit_pct: Option<Decimal>,
    ) -> (LegFill, bool) {
        let settings = self.settings.get();

        let Some((pair, side)) = self.catalog.pair_for_hop(from, to) else {
            let mut leg = LegFill::begin(leg_number, "", OrderSide::Buy, from.clone(), amount, to.clone());
            leg.error = Some(format!("No listed market for {from} -> {to}"));
            return (leg, false);
        };
        let pair = pair.clone();

        let mut leg = LegFill::begin(
            leg_number,
            pair.wire_name(),
            side,
            from.clone(),
            amount,
            to.clone(),
        );
        let started = Instant::now();

        info!(
            leg = leg_number,
            pair = pair.wire_name(),
            side = %side,
            "Executing leg"
        );

        for attempt in 0..=settings.max_retries_per_leg {
            leg.retries = attempt;

            let Some(book) = self.ingress.get_book(pair.ws_name()) else {
                leg.error = Some("No order book for pair".to_string());
                sleep(RETRY_PAUSE).await;
                continue;
            };

            let (expected, opposite) = match side {
                OrderSide::Buy => (book.best_ask(), book.best_bid()),
                OrderSide::Sell => (book.best_bid(), book.best_ask()),
            };
            let Some(expected) = expected.map(|level| level.price()) else {
                leg.error = Some("No top-of-book price".to_string());
                sleep(RETRY_PAUSE).await;
                continue;
            };
            leg.expected_price = Some(expected);

            let volume = match side {
                OrderSide::Buy => amount / expected,
                OrderSide::Sell => amount,
            };
            let volume = pair.round_volume(volume);
            if volume < pair.min_volume() {
                leg.error = Some(format!(
                    "Volume {volume} below minimum {} for {}",
                    pair.min_volume(),
                    pair.wire_name()
                ));
                continue;
            }

            // Intermediate legs may rest at the opposite best price when the
            // knob allows; an unfilled maker attempt consumes this retry and
            // falls back to market.
            let maker = attempt == 0
                && !is_final
                && settings.maker_legs_enabled
                && net_profit_pct.is_some_and(|net| net >= settings.min_profit_for_maker_pct)
                && book
                    .spread_pct()
                    .is_some_and(|spread| spread <= settings.max_spread_for_maker_pct);

            let request = if maker {
                OrderRequest {
                    pair: pair.wire_name().to_string(),
                    side,
                    kind: OrderKind::Limit,
                    volume,
                    price: opposite.map(|level| level.price()),
                }
            } else {
                OrderRequest {
                    pair: pair.wire_name().to_string(),
                    side,
                    kind: OrderKind::Market,
                    volume,
                    price: None,
                }
            };

            let order_id = match self.exchange.place_order(&request).await {
                Ok(order_id) => order_id,
                Err(e) => {
                    leg.error = Some(e.to_string());
                    warn!(leg = leg_number, attempt, error = %e, "Order placement failed");
                    sleep(RETRY_PAUSE).await;
                    continue;
                }
            };
            leg.order_id = Some(order_id.clone());

            match self
                .wait_for_fill(&order_id, settings.order_timeout_seconds)
                .await
            {
                FillWait::Filled(status) => {
                    leg.executed_price = Some(status.price);
                    leg.executed_volume = Some(status.executed_volume);
                    leg.fee = Some(status.fee);
                    leg.fee_currency = status
                        .fee_currency
                        .as_deref()
                        .map(Currency::from_wire);

                    if expected > Decimal::ZERO && status.price > Decimal::ZERO {
                        let slippage = match side {
                            OrderSide::Buy => (status.price - expected) / expected,
                            OrderSide::Sell => (expected - status.price) / expected,
                        };
                        leg.slippage_pct = Some(slippage * Decimal::ONE_HUNDRED);
                    }

                    match Self::output_after_fee(&pair, side, from, to, &status, leg.fee_currency.as_ref()) {
                        Ok(output) => {
                            leg.output_amount = Some(output);
                            leg.error = None;
                            break;
                        }
                        Err(reason) => {
                            leg.error = Some(reason.clone());
                            self.breaker.trip_with_reason(reason);
                            leg.latency_ms = i64::try_from(started.elapsed().as_millis()).ok();
                            return (leg, true);
                        }
                    }
                }
                FillWait::NotFilled(reason) => {
                    leg.error = Some(reason.clone());
                    warn!(leg = leg_number, attempt, reason = %reason, "Leg not filled");
                    if let Err(e) = self.exchange.cancel_order(&order_id).await {
                        warn!(order_id = %order_id, error = %e, "Cancel after miss failed");
                    }
                }
            }
        }

        leg.latency_ms = i64::try_from(started.elapsed().as_millis()).ok();
        (leg, false)
    }

    /// Output amount of a filled leg with the fee applied to the side it
    /// was charged on. An unattributable fee currency is an invariant
    /// violation.
    fn output_after_fee(
        pair: &Pair,
        side: OrderSide,
        from: &Currency,
        to: &Currency,
        status: &OrderStatus,
        fee_currency: Option<&Currency>,
    ) -> std::result::Result<Decimal, String> {
        if status.executed_volume <= Decimal::ZERO {
            return Err(format!(
                "Invariant violation: zero executed volume on closed order for {}",
                pair.wire_name()
            ));
        }

        let fee = status.fee;
        match side {
            OrderSide::Buy => match fee_currency {
                // Fee in the received base shrinks the output; fee in the
                // paid quote was charged out of the spend
                Some(currency) if currency == to => Ok(status.executed_volume - fee),
                Some(currency) if currency == from => Ok(status.executed_volume),
                None => Ok(status.executed_volume - fee),
                Some(other) => Err(format!(
                    "Invariant violation: fee currency {other} matches neither side of {}",
                    pair.wire_name()
                )),
            },
            OrderSide::Sell => match fee_currency {
                Some(currency) if currency == to => {
                    Ok(status.executed_volume * status.price - fee)
                }
                Some(currency) if currency == from => {
                    Ok((status.executed_volume - fee) * status.price)
                }
                None => Ok(status.executed_volume * status.price - fee),
                Some(other) => Err(format!(
                    "Invariant violation: fee currency {other} matches neither side of {}",
                    pair.wire_name()
                )),
            },
        }
    }

    /// Poll order status until filled, terminal, or deadline.
    async fn wait_for_fill(&self, order_id: &str, timeout_seconds: u64) -> FillWait {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_seconds);

        loop {
            match self.exchange.query_order(order_id).await {
                Ok(status) => match status.state {
                    OrderState::Closed => return FillWait::Filled(status),
                    OrderState::Canceled => {
                        return FillWait::NotFilled("Order canceled".to_string())
                    }
                    OrderState::Expired => {
                        return FillWait::NotFilled("Order expired".to_string())
                    }
                    OrderState::Open => {}
                },
                Err(e) => warn!(order_id, error = %e, "Order status check failed"),
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return FillWait::NotFilled(format!("Timeout after {timeout_seconds}s"));
            }
            sleep(POLL_INTERVAL.min(remaining)).await;
        }
    }

    /// Snapshot USD value of an amount via a direct or `*USD` ticker.
    pub async fn value_in_usd(&self, currency: &Currency, amount: Decimal) -> Result<Decimal> {
        if currency.as_str() == "USD" {
            return Ok(amount);
        }

        // Prefer the cataloged pair, then the common wire spellings
        let mut candidates = Vec::new();
        if let Some(pair) = self.catalog.find(currency, &Currency::new("USD")) {
            candidates.push(pair.wire_name().to_string());
        }
        let wire = currency.wire_symbol();
        candidates.push(format!("{wire}USD"));
        candidates.push(format!("{wire}ZUSD"));
        candidates.push(format!("X{wire}ZUSD"));

        for pair_name in candidates {
            match self.exchange.ticker(&pair_name).await {
                Ok(quote) if quote.last > Decimal::ZERO => {
                    return Ok(amount * quote.last);
                }
                Ok(_) => {}
                Err(e) => warn!(pair = %pair_name, error = %e, "USD valuation lookup failed"),
            }
        }

        Err(Error::Exchange(format!(
            "No USD ticker found for {currency}"
        )))
    }

    /// Operator-initiated unwind of a PARTIAL trade: one market sell of the
    /// held currency into USD. Books the realized P/L against the breaker
    /// and returns the updated, `RESOLVED` record.
    ///
    /// # Errors
    /// Returns an error when the trade is not PARTIAL, the held position is
    /// missing, or the unwind order fails.
    pub async fn resolve_partial(&self, record: &TradeRecord) -> Result<TradeRecord> {
        if record.status != TradeStatus::Partial {
            return Err(Error::Execution(format!(
                "Trade {} is {}, only PARTIAL trades can be resolved",
                record.trade_id, record.status
            )));
        }
        let (Some(held_currency), Some(held_amount)) =
            (record.held_currency.clone(), record.held_amount)
        else {
            return Err(Error::Execution(format!(
                "Trade {} has no held position",
                record.trade_id
            )));
        };

        let usd = Currency::new("USD");
        let (pair, side) = self
            .catalog
            .pair_for_hop(&held_currency, &usd)
            .ok_or_else(|| {
                Error::Execution(format!("No listed market for {held_currency} -> USD"))
            })?;
        let pair = pair.clone();

        let volume = pair.round_volume(held_amount);
        let request = OrderRequest {
            pair: pair.wire_name().to_string(),
            side,
            kind: OrderKind::Market,
            volume,
            price: None,
        };

        info!(
            trade_id = %record.trade_id,
            held = %held_amount,
            currency = %held_currency,
            "Resolving partial trade"
        );

        let order_id = self.exchange.place_order(&request).await?;
        let settings = self.settings.get();
        let status = match self
            .wait_for_fill(&order_id, settings.order_timeout_seconds)
            .await
        {
            FillWait::Filled(status) => status,
            FillWait::NotFilled(reason) => {
                let _ = self.exchange.cancel_order(&order_id).await;
                return Err(Error::Execution(format!(
                    "Resolution order not filled: {reason}"
                )));
            }
        };

        let fee_currency = status.fee_currency.as_deref().map(Currency::from_wire);
        let actual_usd = Self::output_after_fee(
            &pair,
            side,
            &held_currency,
            &usd,
            &status,
            fee_currency.as_ref(),
        )
        .map_err(Error::Execution)?;

        let est_pl = record.held_value_usd.unwrap_or(record.amount_in) - record.amount_in;
        self.breaker
            .resolve_partial(&record.trade_id, record.amount_in, est_pl, actual_usd);

        let mut resolved = record.clone();
        resolved.status = TradeStatus::Resolved;
        resolved.resolved_at = Some(Utc::now());
        resolved.resolved_amount_usd = Some(actual_usd);
        resolved.resolution_order_id = Some(order_id);

        self.write_audit(&resolved);
        Ok(resolved)
    }

    fn write_audit(&self, record: &TradeRecord) {
        if let Err(e) = self.audit.record_trade(record) {
            error!(trade_id = %record.trade_id, error = %e, "Failed to persist trade record");
        }
    }
}
