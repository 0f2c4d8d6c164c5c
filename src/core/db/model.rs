//! Row models for the audit tables.

use diesel::prelude::*;

use super::schema::{health_snapshots, opportunity_history, rejections, trades};

/// One trade record row; replaced in full on every terminal transition.
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = trades)]
pub struct TradeRow {
    pub trade_id: String,
    pub path: String,
    pub legs: i32,
    pub amount_in: String,
    pub amount_out: Option<String>,
    pub profit_loss: Option<String>,
    pub profit_loss_pct: Option<String>,
    pub status: String,
    pub current_leg: i32,
    pub error_message: Option<String>,
    pub held_currency: Option<String>,
    pub held_amount: Option<String>,
    pub held_value_usd: Option<String>,
    pub resolved_at: Option<String>,
    pub resolved_amount_usd: Option<String>,
    pub resolution_order_id: Option<String>,
    pub order_ids: String,
    pub leg_fills: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub total_execution_ms: Option<i64>,
    pub opportunity_profit_pct: Option<String>,
    pub created_at: String,
}

/// Insert form of a health snapshot (id assigned by sqlite).
#[derive(Debug, Insertable)]
#[diesel(table_name = health_snapshots)]
pub struct NewHealthSnapshotRow {
    pub total_pairs: i32,
    pub valid_pairs: i32,
    pub valid_pct: f32,
    pub skipped_no_book: i64,
    pub skipped_thin_depth: i64,
    pub skipped_stale: i64,
    pub skipped_bad_spread: i64,
    pub skipped_no_price: i64,
    pub avg_freshness_ms: i64,
    pub avg_spread_pct: String,
    pub avg_depth: String,
    pub rejected_opportunities: i64,
    pub recorded_at: String,
}

/// Insert form of an opportunity-history sample.
#[derive(Debug, Insertable)]
#[diesel(table_name = opportunity_history)]
pub struct NewOpportunityRow {
    pub path: String,
    pub legs: i32,
    pub start_currency: String,
    pub net_profit_pct: String,
    pub is_profitable: bool,
    pub recorded_at: String,
}

/// Insert form of a guard-rejection record.
#[derive(Debug, Insertable)]
#[diesel(table_name = rejections)]
pub struct NewRejectionRow {
    pub path: String,
    pub net_profit_pct: String,
    pub class: String,
    pub reason: String,
    pub recorded_at: String,
}
