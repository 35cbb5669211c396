use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use tracing::debug;

use loupe_core::error::{LoupeError, Result};
use loupe_core::models::{CombinedMetrics, RunMetricsRecord};
use loupe_core::traits::MetricsStore;

/// SQLite-backed, append-only store for run metrics records.
pub struct SqliteMetricsStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS run_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    user_id TEXT,
    persona_id INTEGER,
    session_id TEXT,
    agent_type TEXT NOT NULL,
    start_time TEXT NOT NULL,
    metrics TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_run_metrics_session
    ON run_metrics(session_id, id);";

impl SqliteMetricsStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LoupeError::Metrics(format!("failed to create db directory: {e}"))
            })?;
        }

        let conn =
            Connection::open(path).map_err(|e| LoupeError::Metrics(e.to_string()))?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| LoupeError::Metrics(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| LoupeError::Metrics(e.to_string()))?;

        debug!(path = %path.display(), "metrics store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| LoupeError::Metrics(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| LoupeError::Metrics(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &RunMetricsRecord) -> Result<()> {
        let metrics_json = serde_json::to_string(&record.metrics)?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| LoupeError::Metrics("metrics store lock poisoned".into()))?;
        conn.execute(
            "INSERT INTO run_metrics
                (run_id, user_id, persona_id, session_id, agent_type, start_time, metrics, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.run_id.to_string(),
                record.user_id.map(|id| id.to_string()),
                record.persona_id,
                record.session_id.map(|id| id.to_string()),
                record.agent_type,
                record.start_time.to_rfc3339(),
                metrics_json,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| LoupeError::Metrics(e.to_string()))?;
        Ok(())
    }

    /// Load the most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredRunMetrics>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LoupeError::Metrics("metrics store lock poisoned".into()))?;
        let mut stmt = conn
            .prepare(
                "SELECT run_id, agent_type, start_time, metrics
                 FROM run_metrics ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| LoupeError::Metrics(e.to_string()))?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| LoupeError::Metrics(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let (run_id, agent_type, start_time, metrics_json) =
                row.map_err(|e| LoupeError::Metrics(e.to_string()))?;
            records.push(StoredRunMetrics {
                run_id,
                agent_type,
                start_time: start_time
                    .parse::<DateTime<Utc>>()
                    .map_err(|e| LoupeError::Metrics(e.to_string()))?,
                metrics: serde_json::from_str(&metrics_json)?,
            });
        }
        Ok(records)
    }
}

/// A metrics row read back from the store.
#[derive(Debug, Clone)]
pub struct StoredRunMetrics {
    pub run_id: String,
    pub agent_type: String,
    pub start_time: DateTime<Utc>,
    pub metrics: CombinedMetrics,
}

impl MetricsStore for SqliteMetricsStore {
    fn log_run(&self, record: RunMetricsRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.insert(&record) })
    }
}
