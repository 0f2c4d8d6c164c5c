//! Durable trade execution records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::currency::Currency;
use crate::core::exchange::OrderSide;

/// Terminal and in-flight states of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Executing,
    Completed,
    Partial,
    Failed,
    Resolved,
}

impl TradeStatus {
    /// Stable string form used in audit records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
            Self::Resolved => "RESOLVED",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "EXECUTING" => Some(Self::Executing),
            "COMPLETED" => Some(Self::Completed),
            "PARTIAL" => Some(Self::Partial),
            "FAILED" => Some(Self::Failed),
            "RESOLVED" => Some(Self::Resolved),
            _ => None,
        }
    }

    /// Whether this status is terminal for the execution state machine.
    /// `PARTIAL` is terminal for execution; resolution is a separate,
    /// operator-initiated step.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Executing)
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of executing a single leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegFill {
    pub leg: u32,
    pub pair: String,
    pub side: OrderSide,

    pub input_currency: Currency,
    pub input_amount: Decimal,
    pub output_currency: Currency,
    pub output_amount: Option<Decimal>,

    pub order_id: Option<String>,
    pub expected_price: Option<Decimal>,
    pub executed_price: Option<Decimal>,
    pub executed_volume: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub fee_currency: Option<Currency>,
    pub slippage_pct: Option<Decimal>,

    pub retries: u32,
    pub latency_ms: Option<i64>,
    pub error: Option<String>,
}

impl LegFill {
    /// Start a leg record before any order is placed.
    #[must_use]
    pub fn begin(
        leg: u32,
        pair: impl Into<String>,
        side: OrderSide,
        input_currency: Currency,
        input_amount: Decimal,
        output_currency: Currency,
    ) -> Self {
        Self {
            leg,
            pair: pair.into(),
            side,
            input_currency,
            input_amount,
            output_currency,
            output_amount: None,
            order_id: None,
            expected_price: None,
            executed_price: None,
            executed_volume: None,
            fee: None,
            fee_currency: None,
            slippage_pct: None,
            retries: 0,
            latency_ms: None,
            error: None,
        }
    }

    /// Whether the leg filled.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.output_amount.is_some()
    }
}

/// A durable record of one execution attempt. The executor is the sole
/// mutator and always writes a terminal status before returning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub path: String,
    pub legs: u32,

    pub amount_in: Decimal,
    pub amount_out: Option<Decimal>,
    pub profit_loss: Option<Decimal>,
    pub profit_loss_pct: Option<Decimal>,

    pub status: TradeStatus,
    pub current_leg: u32,
    pub error_message: Option<String>,

    pub held_currency: Option<Currency>,
    pub held_amount: Option<Decimal>,
    pub held_value_usd: Option<Decimal>,

    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_amount_usd: Option<Decimal>,
    pub resolution_order_id: Option<String>,

    pub leg_fills: Vec<LegFill>,
    pub order_ids: Vec<String>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_execution_ms: Option<i64>,

    pub opportunity_profit_pct: Option<Decimal>,
}

impl TradeRecord {
    /// Open a new record in the `EXECUTING` state.
    #[must_use]
    pub fn open(
        trade_id: impl Into<String>,
        path: impl Into<String>,
        legs: u32,
        amount_in: Decimal,
        opportunity_profit_pct: Option<Decimal>,
    ) -> Self {
        Self {
            trade_id: trade_id.into(),
            path: path.into(),
            legs,
            amount_in,
            amount_out: None,
            profit_loss: None,
            profit_loss_pct: None,
            status: TradeStatus::Executing,
            current_leg: 0,
            error_message: None,
            held_currency: None,
            held_amount: None,
            held_value_usd: None,
            resolved_at: None,
            resolved_amount_usd: None,
            resolution_order_id: None,
            leg_fills: Vec::new(),
            order_ids: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            total_execution_ms: None,
            opportunity_profit_pct,
        }
    }
}
