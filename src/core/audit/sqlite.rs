//! SQLite audit sink using Diesel.

use std::ops::DerefMut;

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::{AuditSink, HealthSnapshot, OpportunitySample, RejectionRecord};
use crate::core::db::model::{
    NewHealthSnapshotRow, NewOpportunityRow, NewRejectionRow, TradeRow,
};
use crate::core::db::schema::{health_snapshots, opportunity_history, rejections, trades};
use crate::core::db::DbPool;
use crate::core::domain::{Currency, TradeRecord, TradeStatus};
use crate::error::{Error, Result};

/// SQLite-backed audit sink.
pub struct SqliteAuditSink {
    pool: DbPool,
}

impl SqliteAuditSink {
    /// Create a sink over an initialized pool.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<impl DerefMut<Target = SqliteConnection>> {
        self.pool.get().map_err(|e| Error::Connection(e.to_string()))
    }

    fn to_row(record: &TradeRecord) -> Result<TradeRow> {
        Ok(TradeRow {
            trade_id: record.trade_id.clone(),
            path: record.path.clone(),
            legs: record.legs as i32,
            amount_in: record.amount_in.to_string(),
            amount_out: record.amount_out.map(|v| v.to_string()),
            profit_loss: record.profit_loss.map(|v| v.to_string()),
            profit_loss_pct: record.profit_loss_pct.map(|v| v.to_string()),
            status: record.status.as_str().to_string(),
            current_leg: record.current_leg as i32,
            error_message: record.error_message.clone(),
            held_currency: record.held_currency.as_ref().map(|c| c.as_str().to_string()),
            held_amount: record.held_amount.map(|v| v.to_string()),
            held_value_usd: record.held_value_usd.map(|v| v.to_string()),
            resolved_at: record.resolved_at.map(|t| t.to_rfc3339()),
            resolved_amount_usd: record.resolved_amount_usd.map(|v| v.to_string()),
            resolution_order_id: record.resolution_order_id.clone(),
            order_ids: serde_json::to_string(&record.order_ids)?,
            leg_fills: serde_json::to_string(&record.leg_fills)?,
            started_at: record.started_at.to_rfc3339(),
            completed_at: record.completed_at.map(|t| t.to_rfc3339()),
            total_execution_ms: record.total_execution_ms,
            opportunity_profit_pct: record.opportunity_profit_pct.map(|v| v.to_string()),
            created_at: Utc::now().to_rfc3339(),
        })
    }

    fn from_row(row: TradeRow) -> Result<TradeRecord> {
        let parse_decimal = |value: &str| {
            value
                .parse()
                .map_err(|e| Error::Parse(format!("bad decimal '{value}': {e}")))
        };
        let parse_opt = |value: &Option<String>| -> Result<Option<rust_decimal::Decimal>> {
            value.as_deref().map(parse_decimal).transpose()
        };
        let parse_time = |value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::Parse(format!("bad timestamp '{value}': {e}")))
        };

        Ok(TradeRecord {
            trade_id: row.trade_id,
            path: row.path,
            legs: row.legs as u32,
            amount_in: parse_decimal(&row.amount_in)?,
            amount_out: parse_opt(&row.amount_out)?,
            profit_loss: parse_opt(&row.profit_loss)?,
            profit_loss_pct: parse_opt(&row.profit_loss_pct)?,
            status: TradeStatus::from_str_opt(&row.status)
                .ok_or_else(|| Error::Parse(format!("unknown trade status '{}'", row.status)))?,
            current_leg: row.current_leg as u32,
            error_message: row.error_message,
            held_currency: row.held_currency.map(|c| Currency::new(c)),
            held_amount: parse_opt(&row.held_amount)?,
            held_value_usd: parse_opt(&row.held_value_usd)?,
            resolved_at: row.resolved_at.as_deref().map(parse_time).transpose()?,
            resolved_amount_usd: parse_opt(&row.resolved_amount_usd)?,
            resolution_order_id: row.resolution_order_id,
            order_ids: serde_json::from_str(&row.order_ids)?,
            leg_fills: serde_json::from_str(&row.leg_fills)?,
            started_at: parse_time(&row.started_at)?,
            completed_at: row.completed_at.as_deref().map(parse_time).transpose()?,
            total_execution_ms: row.total_execution_ms,
            opportunity_profit_pct: parse_opt(&row.opportunity_profit_pct)?,
        })
    }

    /// Load a trade by id (resolution entry point).
    ///
    /// # Errors
    /// Returns an error on connection or parse failures.
    pub fn load_trade(&self, trade_id: &str) -> Result<Option<TradeRecord>> {
        let mut conn = self.conn()?;
        let row: Option<TradeRow> = trades::table
            .find(trade_id)
            .first(&mut *conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(Self::from_row).transpose()
    }
}

impl AuditSink for SqliteAuditSink {
    fn record_trade(&self, record: &TradeRecord) -> Result<()> {
        let row = Self::to_row(record)?;
        let mut conn = self.conn()?;
        diesel::replace_into(trades::table)
            .values(&row)
            .execute(&mut *conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    fn record_health(&self, snapshot: &HealthSnapshot) -> Result<()> {
        let row = NewHealthSnapshotRow {
            total_pairs: snapshot.total_pairs as i32,
            valid_pairs: snapshot.valid_pairs as i32,
            valid_pct: snapshot.valid_pct,
            skipped_no_book: snapshot.skipped_no_book as i64,
            skipped_thin_depth: snapshot.skipped_thin_depth as i64,
            skipped_stale: snapshot.skipped_stale as i64,
            skipped_bad_spread: snapshot.skipped_bad_spread as i64,
            skipped_no_price: snapshot.skipped_no_price as i64,
            avg_freshness_ms: snapshot.avg_freshness_ms as i64,
            avg_spread_pct: snapshot.avg_spread_pct.to_string(),
            avg_depth: snapshot.avg_depth.to_string(),
            rejected_opportunities: snapshot.rejected_opportunities as i64,
            recorded_at: snapshot.recorded_at.to_rfc3339(),
        };
        let mut conn = self.conn()?;
        diesel::insert_into(health_snapshots::table)
            .values(&row)
            .execute(&mut *conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    fn record_opportunities(&self, samples: &[OpportunitySample]) -> Result<()> {
        let rows: Vec<NewOpportunityRow> = samples
            .iter()
            .map(|sample| NewOpportunityRow {
                path: sample.path.clone(),
                legs: sample.legs as i32,
                start_currency: sample.start_currency.clone(),
                net_profit_pct: sample.net_profit_pct.to_string(),
                is_profitable: sample.is_profitable,
                recorded_at: sample.recorded_at.to_rfc3339(),
            })
            .collect();
        let mut conn = self.conn()?;
        diesel::insert_into(opportunity_history::table)
            .values(&rows)
            .execute(&mut *conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    fn record_rejection(&self, rejection: &RejectionRecord) -> Result<()> {
        let row = NewRejectionRow {
            path: rejection.path.clone(),
            net_profit_pct: rejection.net_profit_pct.to_string(),
            class: rejection.class.clone(),
            reason: rejection.reason.clone(),
            recorded_at: rejection.recorded_at.to_rfc3339(),
        };
        let mut conn = self.conn()?;
        diesel::insert_into(rejections::table)
            .values(&row)
            .execute(&mut *conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff = cutoff.to_rfc3339();
        let mut conn = self.conn()?;
        let mut deleted = 0;

        deleted += diesel::delete(
            health_snapshots::table.filter(health_snapshots::recorded_at.lt(cutoff.clone())),
        )
        .execute(&mut *conn)
        .map_err(|e| Error::Database(e.to_string()))?;

        deleted += diesel::delete(
            opportunity_history::table.filter(opportunity_history::recorded_at.lt(cutoff.clone())),
        )
        .execute(&mut *conn)
        .map_err(|e| Error::Database(e.to_string()))?;

        deleted += diesel::delete(rejections::table.filter(rejections::recorded_at.lt(cutoff)))
            .execute(&mut *conn)
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn sink() -> SqliteAuditSink {
        let pool = db::create_pool(":memory:").unwrap();
        db::initialize(&pool).unwrap();
        SqliteAuditSink::new(pool)
    }

    fn record(trade_id: &str, status: TradeStatus) -> TradeRecord {
        let mut record =
            TradeRecord::open(trade_id, "USD → BTC → ETH → USD", 3, dec!(100), Some(dec!(1.22)));
        record.status = status;
        record.amount_out = Some(dec!(101.20));
        record.profit_loss = Some(dec!(1.20));
        record.profit_loss_pct = Some(dec!(1.20));
        record.completed_at = Some(Utc::now());
        record
    }

    #[test]
    fn trade_round_trips_through_storage() {
        let sink = sink();
        let original = record("LIVE-ROUNDTRIP", TradeStatus::Completed);
        sink.record_trade(&original).unwrap();

        let loaded = sink.load_trade("LIVE-ROUNDTRIP").unwrap().unwrap();
        assert_eq!(loaded.trade_id, original.trade_id);
        assert_eq!(loaded.path, original.path);
        assert_eq!(loaded.status, TradeStatus::Completed);
        assert_eq!(loaded.amount_in, dec!(100));
        assert_eq!(loaded.profit_loss, Some(dec!(1.20)));
    }

    #[test]
    fn terminal_rewrite_replaces_the_row() {
        let sink = sink();
        sink.record_trade(&record("LIVE-1", TradeStatus::Partial))
            .unwrap();

        let mut resolved = record("LIVE-1", TradeStatus::Resolved);
        resolved.resolved_amount_usd = Some(dec!(101.50));
        sink.record_trade(&resolved).unwrap();

        let loaded = sink.load_trade("LIVE-1").unwrap().unwrap();
        assert_eq!(loaded.status, TradeStatus::Resolved);
        assert_eq!(loaded.resolved_amount_usd, Some(dec!(101.50)));
    }

    #[test]
    fn missing_trade_loads_none() {
        let sink = sink();
        assert!(sink.load_trade("LIVE-NONE").unwrap().is_none());
    }

    #[test]
    fn cleanup_drops_old_append_only_rows_but_keeps_trades() {
        let sink = sink();
        let old = Utc::now() - Duration::days(40);

        sink.record_trade(&record("LIVE-KEEP", TradeStatus::Completed))
            .unwrap();
        sink.record_health(&HealthSnapshot {
            total_pairs: 10,
            valid_pairs: 9,
            valid_pct: 90.0,
            skipped_no_book: 1,
            skipped_thin_depth: 0,
            skipped_stale: 0,
            skipped_bad_spread: 0,
            skipped_no_price: 0,
            avg_freshness_ms: 120,
            avg_spread_pct: dec!(0.05),
            avg_depth: dec!(12),
            rejected_opportunities: 0,
            recorded_at: old,
        })
        .unwrap();
        sink.record_opportunities(&[OpportunitySample {
            path: "USD → BTC → ETH → USD".to_string(),
            legs: 3,
            start_currency: "USD".to_string(),
            net_profit_pct: dec!(1.22),
            is_profitable: true,
            recorded_at: old,
        }])
        .unwrap();
        sink.record_rejection(&RejectionRecord {
            path: "USD → BTC → ETH → USD".to_string(),
            net_profit_pct: dec!(0.01),
            class: "SKIPPED".to_string(),
            reason: "below threshold".to_string(),
            recorded_at: old,
        })
        .unwrap();

        let deleted = sink.cleanup_before(Utc::now() - Duration::days(30)).unwrap();
        assert_eq!(deleted, 3);
        assert!(sink.load_trade("LIVE-KEEP").unwrap().is_some());
    }

    #[test]
    fn leg_fills_survive_serialization() {
        use crate::core::exchange::OrderSide;

        let sink = sink();
        let mut original = record("LIVE-LEGS", TradeStatus::Completed);
        let mut fill = crate::core::domain::LegFill::begin(
            1,
            "XBTUSD",
            OrderSide::Buy,
            Currency::new("USD"),
            dec!(100),
            Currency::new("BTC"),
        );
        fill.executed_price = Some(dec!(30000));
        fill.output_amount = Some(dec!(0.0033));
        fill.slippage_pct = Some(Decimal::ZERO);
        original.leg_fills.push(fill);
        original.order_ids.push("OABC-123".to_string());

        sink.record_trade(&original).unwrap();
        let loaded = sink.load_trade("LIVE-LEGS").unwrap().unwrap();
        assert_eq!(loaded.leg_fills.len(), 1);
        assert_eq!(loaded.leg_fills[0].executed_price, Some(dec!(30000)));
        assert_eq!(loaded.order_ids, vec!["OABC-123".to_string()]);
    }
}
