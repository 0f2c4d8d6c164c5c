//! Database layer for persistence using Diesel ORM.

pub mod model;
pub mod schema;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::SqliteConnection;

use crate::error::{Error, Result};

/// Database connection pool type alias.
pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Create a connection pool for the given database URL.
///
/// # Errors
/// Returns an error if the pool cannot be created.
pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    Pool::builder()
        .max_size(5)
        .build(manager)
        .map_err(|e| Error::Connection(e.to_string()))
}

/// Create the audit tables if they do not exist yet.
///
/// # Errors
/// Returns an error if the DDL cannot be applied.
pub fn initialize(pool: &DbPool) -> Result<()> {
    let mut conn = pool.get().map_err(|e| Error::Connection(e.to_string()))?;
    conn.batch_execute(
        "CREATE TABLE IF NOT EXISTS trades (
            trade_id TEXT PRIMARY KEY NOT NULL,
            path TEXT NOT NULL,
            legs INTEGER NOT NULL,
            amount_in TEXT NOT NULL,
            amount_out TEXT,
            profit_loss TEXT,
            profit_loss_pct TEXT,
            status TEXT NOT NULL,
            current_leg INTEGER NOT NULL,
            error_message TEXT,
            held_currency TEXT,
            held_amount TEXT,
            held_value_usd TEXT,
            resolved_at TEXT,
            resolved_amount_usd TEXT,
            resolution_order_id TEXT,
            order_ids TEXT NOT NULL,
            leg_fills TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            total_execution_ms BIGINT,
            opportunity_profit_pct TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_trades_created_at ON trades (created_at);

        CREATE TABLE IF NOT EXISTS health_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            total_pairs INTEGER NOT NULL,
            valid_pairs INTEGER NOT NULL,
            valid_pct REAL NOT NULL,
            skipped_no_book BIGINT NOT NULL,
            skipped_thin_depth BIGINT NOT NULL,
            skipped_stale BIGINT NOT NULL,
            skipped_bad_spread BIGINT NOT NULL,
            skipped_no_price BIGINT NOT NULL,
            avg_freshness_ms BIGINT NOT NULL,
            avg_spread_pct TEXT NOT NULL,
            avg_depth TEXT NOT NULL,
            rejected_opportunities BIGINT NOT NULL,
            recorded_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS opportunity_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            path TEXT NOT NULL,
            legs INTEGER NOT NULL,
            start_currency TEXT NOT NULL,
            net_profit_pct TEXT NOT NULL,
            is_profitable BOOLEAN NOT NULL,
            recorded_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rejections (
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            path TEXT NOT NULL,
            net_profit_pct TEXT NOT NULL,
            class TEXT NOT NULL,
            reason TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );",
    )
    .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_pool_with_memory_db() {
        let pool = create_pool(":memory:");
        assert!(pool.is_ok());
    }

    #[test]
    fn initialize_is_idempotent() {
        let pool = create_pool(":memory:").unwrap();
        initialize(&pool).unwrap();
        initialize(&pool).unwrap();
    }
}
