//! History database schema
//!
//! Decimal figures are stored as TEXT so `rust_decimal::Decimal` values
//! round-trip exactly. Timestamps are epoch milliseconds.

/// Stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Idempotent DDL, applied in order inside one transaction
pub const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS optimization_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL UNIQUE,
        mode TEXT NOT NULL,
        seed TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        finished_at INTEGER NOT NULL,
        symbols INTEGER NOT NULL DEFAULT 0,
        optimized_symbols INTEGER NOT NULL DEFAULT 0,
        skipped_symbols INTEGER NOT NULL DEFAULT 0,
        current_daily_pnl TEXT NOT NULL DEFAULT '0',
        optimized_daily_pnl TEXT NOT NULL DEFAULT '0',
        overallocated INTEGER NOT NULL DEFAULT 0,
        cancelled INTEGER NOT NULL DEFAULT 0,
        report_json TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS symbol_recommendations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL REFERENCES optimization_runs(run_id) ON DELETE CASCADE,
        symbol TEXT NOT NULL,
        changed INTEGER NOT NULL DEFAULT 0,
        skipped_reason TEXT,
        current_daily_pnl TEXT NOT NULL DEFAULT '0',
        optimized_daily_pnl TEXT NOT NULL DEFAULT '0',
        optimized_score TEXT,
        recommendation_json TEXT NOT NULL,
        UNIQUE(run_id, symbol)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_finished ON optimization_runs(finished_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_recommendations_symbol ON symbol_recommendations(symbol)",
];
