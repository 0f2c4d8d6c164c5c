//! Append-only audit records.
//!
//! A write-only interface consumed by the scanner, guard, and executor.
//! Retention is the storage collaborator's concern; the core only appends
//! and does periodic bounded cleanup.

mod memory;
mod sqlite;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::core::domain::TradeRecord;
use crate::error::Result;

pub use memory::MemoryAuditSink;
pub use sqlite::SqliteAuditSink;

/// Order-book and scanner health, written on a fixed cadence.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub total_pairs: usize,
    pub valid_pairs: usize,
    pub valid_pct: f32,
    pub skipped_no_book: u64,
    pub skipped_thin_depth: u64,
    pub skipped_stale: u64,
    pub skipped_bad_spread: u64,
    pub skipped_no_price: u64,
    pub avg_freshness_ms: u64,
    pub avg_spread_pct: Decimal,
    pub avg_depth: Decimal,
    pub rejected_opportunities: u64,
    pub recorded_at: DateTime<Utc>,
}

/// One sampled scanner evaluation for later analysis.
#[derive(Debug, Clone)]
pub struct OpportunitySample {
    pub path: String,
    pub legs: u32,
    pub start_currency: String,
    pub net_profit_pct: Decimal,
    pub is_profitable: bool,
    pub recorded_at: DateTime<Utc>,
}

/// One guard rejection with its classification and reason.
#[derive(Debug, Clone)]
pub struct RejectionRecord {
    pub path: String,
    pub net_profit_pct: Decimal,
    pub class: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Write-only audit sink.
pub trait AuditSink: Send + Sync {
    /// Persist a trade record (insert or replace by trade id).
    fn record_trade(&self, record: &TradeRecord) -> Result<()>;

    /// Append a health snapshot.
    fn record_health(&self, snapshot: &HealthSnapshot) -> Result<()>;

    /// Append a batch of opportunity samples.
    fn record_opportunities(&self, samples: &[OpportunitySample]) -> Result<()>;

    /// Append a guard rejection.
    fn record_rejection(&self, rejection: &RejectionRecord) -> Result<()>;

    /// Delete append-only records older than `cutoff`. Trades are kept.
    fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
