//! Optimization run history

use std::str::FromStr;

use crate::{DbError, DbResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

/// Headline columns of a stored run plus the full report as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RunRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub mode: String,
    /// u64 seed, stored as text since SQLite integers are signed
    pub seed: String,
    /// Epoch milliseconds
    pub started_at: i64,
    pub finished_at: i64,
    pub symbols: i64,
    pub optimized_symbols: i64,
    pub skipped_symbols: i64,
    pub current_daily_pnl: String,
    pub optimized_daily_pnl: String,
    pub overallocated: bool,
    pub cancelled: bool,
    pub report_json: String,
}

impl RunRecord {
    pub fn finished_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.finished_at)
    }

    pub fn daily_improvement(&self) -> Decimal {
        parse_decimal(&self.optimized_daily_pnl) - parse_decimal(&self.current_daily_pnl)
    }

    /// Decode the stored report
    pub fn report<T: DeserializeOwned>(&self) -> DbResult<T> {
        Ok(serde_json::from_str(&self.report_json)?)
    }
}

/// One symbol's recommendation within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecommendationRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub symbol: String,
    pub changed: bool,
    pub skipped_reason: Option<String>,
    pub current_daily_pnl: String,
    pub optimized_daily_pnl: String,
    pub optimized_score: Option<String>,
    pub recommendation_json: String,
}

impl RecommendationRecord {
    pub fn recommendation<T: DeserializeOwned>(&self) -> DbResult<T> {
        Ok(serde_json::from_str(&self.recommendation_json)?)
    }
}

fn parse_decimal(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap_or(Decimal::ZERO)
}

const RUN_COLUMNS: &str = r#"
    id, run_id, mode, seed, started_at, finished_at,
    symbols, optimized_symbols, skipped_symbols,
    current_daily_pnl, optimized_daily_pnl, overallocated, cancelled, report_json
"#;

async fn insert_run(conn: &mut SqliteConnection, record: &RunRecord) -> DbResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT OR REPLACE INTO optimization_runs (
            run_id, mode, seed, started_at, finished_at,
            symbols, optimized_symbols, skipped_symbols,
            current_daily_pnl, optimized_daily_pnl, overallocated, cancelled, report_json
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.run_id)
    .bind(&record.mode)
    .bind(&record.seed)
    .bind(record.started_at)
    .bind(record.finished_at)
    .bind(record.symbols)
    .bind(record.optimized_symbols)
    .bind(record.skipped_symbols)
    .bind(&record.current_daily_pnl)
    .bind(&record.optimized_daily_pnl)
    .bind(record.overallocated)
    .bind(record.cancelled)
    .bind(&record.report_json)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn insert_recommendation(
    conn: &mut SqliteConnection,
    record: &RecommendationRecord,
) -> DbResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT OR REPLACE INTO symbol_recommendations (
            run_id, symbol, changed, skipped_reason,
            current_daily_pnl, optimized_daily_pnl, optimized_score, recommendation_json
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.run_id)
    .bind(&record.symbol)
    .bind(record.changed)
    .bind(&record.skipped_reason)
    .bind(&record.current_daily_pnl)
    .bind(&record.optimized_daily_pnl)
    .bind(&record.optimized_score)
    .bind(&record.recommendation_json)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Repository for optimization runs and their recommendations
pub struct RunRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a finished run with all of its recommendations in one
    /// transaction. A run stored earlier under the same run_id is replaced,
    /// recommendations included; on error nothing is written.
    pub async fn record_run(
        &self,
        run: &RunRecord,
        recommendations: &[RecommendationRecord],
    ) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM symbol_recommendations WHERE run_id = ?")
            .bind(&run.run_id)
            .execute(&mut *tx)
            .await?;
        let id = insert_run(&mut tx, run).await?;
        for record in recommendations {
            if record.run_id != run.run_id {
                return Err(DbError::InvalidRecord(format!(
                    "recommendation for {} belongs to run {}, not {}",
                    record.symbol, record.run_id, run.run_id
                )));
            }
            insert_recommendation(&mut tx, record).await?;
        }

        tx.commit().await?;
        debug!(run_id = %run.run_id, recommendations = recommendations.len(), "Run recorded");
        Ok(id)
    }

    /// Save a run row alone (replaces a previous run with the same run_id)
    pub async fn save_run(&self, record: &RunRecord) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        insert_run(&mut conn, record).await
    }

    /// Save one symbol's recommendation. The run must exist.
    pub async fn save_recommendation(&self, record: &RecommendationRecord) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        insert_recommendation(&mut conn, record).await
    }

    pub async fn get_run(&self, run_id: &str) -> DbResult<Option<RunRecord>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM optimization_runs WHERE run_id = ?");
        let record = sqlx::query_as::<_, RunRecord>(&sql)
            .bind(run_id)
            .fetch_optional(self.pool)
            .await?;

        Ok(record)
    }

    /// All recommendations of a run, by symbol
    pub async fn recommendations_for_run(&self, run_id: &str) -> DbResult<Vec<RecommendationRecord>> {
        let records = sqlx::query_as::<_, RecommendationRecord>(
            r#"
            SELECT id, run_id, symbol, changed, skipped_reason,
                   current_daily_pnl, optimized_daily_pnl, optimized_score, recommendation_json
            FROM symbol_recommendations
            WHERE run_id = ?
            ORDER BY symbol
            "#,
        )
        .bind(run_id)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Most recent non-skipped recommendation for a symbol
    pub async fn latest_for_symbol(&self, symbol: &str) -> DbResult<Option<RecommendationRecord>> {
        let record = sqlx::query_as::<_, RecommendationRecord>(
            r#"
            SELECT r.id, r.run_id, r.symbol, r.changed, r.skipped_reason,
                   r.current_daily_pnl, r.optimized_daily_pnl, r.optimized_score,
                   r.recommendation_json
            FROM symbol_recommendations r
            JOIN optimization_runs o ON o.run_id = r.run_id
            WHERE r.symbol = ? AND r.skipped_reason IS NULL
            ORDER BY o.finished_at DESC, r.id DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Latest runs first
    pub async fn recent_runs(&self, limit: i64) -> DbResult<Vec<RunRecord>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM optimization_runs ORDER BY finished_at DESC, id DESC LIMIT ?"
        );
        let records = sqlx::query_as::<_, RunRecord>(&sql)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use rust_decimal_macros::dec;

    fn make_run(run_id: &str, finished_at: i64) -> RunRecord {
        RunRecord {
            id: None,
            run_id: run_id.to_string(),
            mode: "quick".to_string(),
            seed: u64::MAX.to_string(),
            started_at: finished_at - 1_000,
            finished_at,
            symbols: 2,
            optimized_symbols: 1,
            skipped_symbols: 1,
            current_daily_pnl: "1.25".to_string(),
            optimized_daily_pnl: "3.75".to_string(),
            overallocated: false,
            cancelled: false,
            report_json: r#"{"runId":"x"}"#.to_string(),
        }
    }

    fn make_recommendation(run_id: &str, symbol: &str, skipped: bool) -> RecommendationRecord {
        RecommendationRecord {
            id: None,
            run_id: run_id.to_string(),
            symbol: symbol.to_string(),
            changed: !skipped,
            skipped_reason: skipped.then(|| "no liquidation history".to_string()),
            current_daily_pnl: "1.25".to_string(),
            optimized_daily_pnl: "3.75".to_string(),
            optimized_score: Some("0.4200".to_string()),
            recommendation_json: format!(r#"{{"symbol":"{symbol}"}}"#),
        }
    }

    #[tokio::test]
    async fn test_save_and_get_run() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.runs();

        repo.save_run(&make_run("run-1", 10_000)).await.unwrap();
        let run = repo.get_run("run-1").await.unwrap().unwrap();

        assert!(run.id.is_some());
        assert_eq!(run.seed, u64::MAX.to_string());
        assert_eq!(run.daily_improvement(), dec!(2.50));
        assert_eq!(run.finished_at_utc().map(|t| t.timestamp_millis()), Some(10_000));
        assert!(!run.overallocated);

        let report: serde_json::Value = run.report().unwrap();
        assert_eq!(report["runId"], "x");

        assert!(repo.get_run("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_for_symbol_skips_skipped_entries() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.runs();

        repo.save_run(&make_run("old", 1_000)).await.unwrap();
        repo.save_run(&make_run("new", 2_000)).await.unwrap();
        repo.save_recommendation(&make_recommendation("old", "BTCUSDT", false))
            .await
            .unwrap();
        repo.save_recommendation(&make_recommendation("new", "BTCUSDT", false))
            .await
            .unwrap();
        repo.save_recommendation(&make_recommendation("new", "ETHUSDT", true))
            .await
            .unwrap();
        repo.save_recommendation(&make_recommendation("old", "ETHUSDT", false))
            .await
            .unwrap();

        let btc = repo.latest_for_symbol("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(btc.run_id, "new");
        let eth = repo.latest_for_symbol("ETHUSDT").await.unwrap().unwrap();
        assert_eq!(eth.run_id, "old");
        assert!(repo.latest_for_symbol("XRPUSDT").await.unwrap().is_none());

        let for_run = repo.recommendations_for_run("new").await.unwrap();
        assert_eq!(for_run.len(), 2);
        assert_eq!(for_run[0].symbol, "BTCUSDT");
        assert_eq!(for_run[1].skipped_reason.as_deref(), Some("no liquidation history"));
    }

    #[tokio::test]
    async fn test_recent_runs_newest_first() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.runs();

        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            repo.save_run(&make_run(id, (i as i64 + 1) * 1_000)).await.unwrap();
        }

        let runs = repo.recent_runs(2).await.unwrap();
        let ids: Vec<&str> = runs.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_recommendation_requires_run() {
        let db = Database::in_memory().await.unwrap();
        let err = db
            .runs()
            .save_recommendation(&make_recommendation("ghost", "BTCUSDT", false))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Sqlx(_)));
    }

    #[tokio::test]
    async fn test_record_run_replaces_previous_recommendations() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.runs();
        let run = make_run("run-1", 5_000);

        let first = vec![
            make_recommendation("run-1", "BTCUSDT", false),
            make_recommendation("run-1", "ETHUSDT", true),
        ];
        repo.record_run(&run, &first).await.unwrap();
        assert_eq!(repo.recommendations_for_run("run-1").await.unwrap().len(), 2);

        let mut rerun = run.clone();
        rerun.cancelled = true;
        repo.record_run(&rerun, &[make_recommendation("run-1", "SOLUSDT", false)])
            .await
            .unwrap();

        let stored = repo.get_run("run-1").await.unwrap().unwrap();
        assert!(stored.cancelled);
        let recs = repo.recommendations_for_run("run-1").await.unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].symbol, "SOLUSDT");
    }

    #[tokio::test]
    async fn test_record_run_is_atomic() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.runs();
        let recs = vec![
            make_recommendation("run-2", "BTCUSDT", false),
            make_recommendation("other", "ETHUSDT", false),
        ];

        let err = repo
            .record_run(&make_run("run-2", 5_000), &recs)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidRecord(_)));
        assert!(repo.get_run("run-2").await.unwrap().is_none());
        assert!(repo.latest_for_symbol("BTCUSDT").await.unwrap().is_none());
    }

    #[test]
    fn test_bad_payload_is_serde_error() {
        let mut rec = make_recommendation("r", "BTCUSDT", false);
        rec.recommendation_json = "{not json".to_string();
        let err = rec.recommendation::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, DbError::Serde(_)));
    }
}
