//! Cycle history persistence.
//! One row per cycle in SQLite (WAL), keyed by the cycle id, with the whole
//! `WorkerResult` aggregate stored as JSON next to a few indexed columns.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::worker_result::WorkerResult;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("history record encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("history directory error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Where finished cycles are persisted.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn save(&self, result: &WorkerResult) -> Result<(), HistoryError>;

    /// Most recently started cycle, if any.
    async fn load_last(&self) -> Result<Option<WorkerResult>, HistoryError>;

    /// Newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<WorkerResult>, HistoryError>;

    /// Delete cycles started more than `days` days ago; returns rows removed.
    async fn cleanup_older_than_days(&self, days: u32) -> Result<usize, HistoryError>;
}

pub struct HistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl HistoryStore {
    /// Open (or create) the history database.
    pub fn open(db_path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn)?;
        info!(path = %db_path.display(), "history store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, HistoryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS worker_results (
                id TEXT PRIMARY KEY,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                successful INTEGER NOT NULL,
                last_status TEXT NOT NULL,
                result_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_worker_results_start
                ON worker_results(start_time);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, HistoryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || op(&conn.lock())).await?
    }
}

fn decode_all(rows: Vec<String>) -> Result<Vec<WorkerResult>, HistoryError> {
    rows.iter()
        .map(|json| serde_json::from_str(json).map_err(HistoryError::from))
        .collect()
}

#[async_trait]
impl ResultSink for HistoryStore {
    async fn save(&self, result: &WorkerResult) -> Result<(), HistoryError> {
        let json = serde_json::to_string(result)?;
        let id = result.id.to_string();
        let start = result.start_time.timestamp_millis();
        let end = result.end_time.map(|t| t.timestamp_millis());
        let successful = result.successful as i32;
        let status = result.last_status.to_string();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO worker_results
                 (id, start_time, end_time, successful, last_status, result_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, start, end, successful, status, json],
            )?;
            Ok(())
        })
        .await?;
        debug!(id = %result.id, successful = result.successful, "worker result stored");
        Ok(())
    }

    async fn load_last(&self) -> Result<Option<WorkerResult>, HistoryError> {
        let json: Option<String> = self
            .with_conn(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT result_json FROM worker_results ORDER BY start_time DESC LIMIT 1",
                        [],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<WorkerResult>, HistoryError> {
        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT result_json FROM worker_results
                     ORDER BY start_time DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        decode_all(rows)
    }

    async fn cleanup_older_than_days(&self, days: u32) -> Result<usize, HistoryError> {
        let cutoff = (Utc::now() - ChronoDuration::days(days as i64)).timestamp_millis();
        let removed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM worker_results WHERE start_time <= ?1",
                    params![cutoff],
                )?)
            })
            .await?;
        if removed > 0 {
            info!(removed, days, "history cleanup");
        }
        Ok(removed)
    }
}
