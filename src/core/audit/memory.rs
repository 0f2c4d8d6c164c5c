//! In-memory audit sink for tests and dry runs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{AuditSink, HealthSnapshot, OpportunitySample, RejectionRecord};
use crate::core::domain::TradeRecord;
use crate::error::Result;

/// Audit sink that keeps everything in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
    trades: Mutex<Vec<TradeRecord>>,
    health: Mutex<Vec<HealthSnapshot>>,
    opportunities: Mutex<Vec<OpportunitySample>>,
    rejections: Mutex<Vec<RejectionRecord>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded trade rows, oldest first. Re-recorded trade ids
    /// replace their previous row, mirroring the sqlite sink.
    #[must_use]
    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().clone()
    }

    /// All recorded health snapshots.
    #[must_use]
    pub fn health_snapshots(&self) -> Vec<HealthSnapshot> {
        self.health.lock().clone()
    }

    /// All recorded opportunity samples.
    #[must_use]
    pub fn opportunity_samples(&self) -> Vec<OpportunitySample> {
        self.opportunities.lock().clone()
    }

    /// All recorded rejections.
    #[must_use]
    pub fn rejection_records(&self) -> Vec<RejectionRecord> {
        self.rejections.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_trade(&self, record: &TradeRecord) -> Result<()> {
        let mut trades = self.trades.lock();
        if let Some(existing) = trades
            .iter_mut()
            .find(|trade| trade.trade_id == record.trade_id)
        {
            *existing = record.clone();
        } else {
            trades.push(record.clone());
        }
        Ok(())
    }

    fn record_health(&self, snapshot: &HealthSnapshot) -> Result<()> {
        self.health.lock().push(snapshot.clone());
        Ok(())
    }

    fn record_opportunities(&self, samples: &[OpportunitySample]) -> Result<()> {
        self.opportunities.lock().extend_from_slice(samples);
        Ok(())
    }

    fn record_rejection(&self, rejection: &RejectionRecord) -> Result<()> {
        self.rejections.lock().push(rejection.clone());
        Ok(())
    }

    fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut deleted = 0;

        let mut health = self.health.lock();
        let before = health.len();
        health.retain(|snapshot| snapshot.recorded_at >= cutoff);
        deleted += before - health.len();

        let mut opportunities = self.opportunities.lock();
        let before = opportunities.len();
        opportunities.retain(|sample| sample.recorded_at >= cutoff);
        deleted += before - opportunities.len();

        let mut rejections = self.rejections.lock();
        let before = rejections.len();
        rejections.retain(|rejection| rejection.recorded_at >= cutoff);
        deleted += before - rejections.len();

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::TradeStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn trade_rewrite_replaces_by_id() {
        let sink = MemoryAuditSink::new();
        let mut record = TradeRecord::open("LIVE-1", "USD → BTC → ETH → USD", 3, dec!(100), None);
        record.status = TradeStatus::Partial;
        sink.record_trade(&record).unwrap();

        record.status = TradeStatus::Resolved;
        sink.record_trade(&record).unwrap();

        let trades = sink.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].status, TradeStatus::Resolved);
    }
}
