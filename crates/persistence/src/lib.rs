//! Report history for the liquidation hunter tuner
//!
//! Every finished optimization run is one `optimization_runs` row holding
//! its headline figures and the full JSON report. The per-symbol
//! recommendations of that run live in `symbol_recommendations` so the
//! latest tuned parameters of a symbol can be looked up directly.

pub mod repository;
pub mod schema;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub use sqlx::sqlite::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Cannot open history database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("History database schema v{found} is newer than this build (v{supported})")]
    SchemaVersion { found: i64, supported: i64 },

    #[error("Schema statement failed: {0}")]
    Schema(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Handle to the history database
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the history file at `path`, creating it and its directory if needed
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).ok();
        }

        // Connection options apply to every pooled connection, foreign keys included
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|source| DbError::Open {
                path: path.display().to_string(),
                source,
            })?;

        let db = Self { pool };
        db.apply_schema().await?;

        info!(path = %path.display(), "History database ready");
        Ok(db)
    }

    /// Private in-memory database, used by tests
    pub async fn in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // A single connection that never expires, or the data goes with it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|source| DbError::Open {
                path: ":memory:".to_string(),
                source,
            })?;

        let db = Self { pool };
        db.apply_schema().await?;
        Ok(db)
    }

    /// Create missing tables and stamp `user_version`. A file written by a
    /// newer schema is refused rather than modified.
    async fn apply_schema(&self) -> DbResult<()> {
        let found: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        if found > schema::SCHEMA_VERSION {
            return Err(DbError::SchemaVersion {
                found,
                supported: schema::SCHEMA_VERSION,
            });
        }

        let mut tx = self.pool.begin().await?;
        for statement in schema::STATEMENTS {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::Schema(format!("{e}: {}", statement.trim())))?;
        }
        sqlx::query(&format!("PRAGMA user_version = {}", schema::SCHEMA_VERSION))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(from = found, to = schema::SCHEMA_VERSION, "History schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn runs(&self) -> repository::RunRepository<'_> {
        repository::RunRepository::new(&self.pool)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir()
            .join(format!("liq-tuner-{}-{nanos}", std::process::id()))
            .join(name)
    }

    #[tokio::test]
    async fn test_schema_is_stamped() {
        let db = Database::in_memory().await.unwrap();
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);

        let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_history_and_refuses_newer_schema() {
        let path = scratch_path("tuner.db");

        let db = Database::new(&path).await.unwrap();
        sqlx::query(
            "INSERT INTO optimization_runs (run_id, mode, seed, started_at, finished_at, report_json)
             VALUES ('r1', 'quick', '1', 0, 1, '{}')",
        )
        .execute(db.pool())
        .await
        .unwrap();
        db.close().await;

        let db = Database::new(&path).await.unwrap();
        let run = db.runs().get_run("r1").await.unwrap().unwrap();
        assert!(!run.cancelled);
        sqlx::query("PRAGMA user_version = 99")
            .execute(db.pool())
            .await
            .unwrap();
        db.close().await;

        let err = Database::new(&path).await.err().unwrap();
        assert!(matches!(
            err,
            DbError::SchemaVersion {
                found: 99,
                supported: schema::SCHEMA_VERSION
            }
        ));

        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }
}
