mod audit;
mod ledger;
mod runs;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::runs::types::{EnrichmentRun, RequestOutcome, ReviewState, RunStatus};

/// Values written by a queue upsert. A `None` search query keeps whatever
/// the row already holds.
#[derive(Debug, Clone)]
pub struct RunUpsert {
    pub item_key: String,
    pub search_query: Option<String>,
    pub status: RunStatus,
    pub review_state: ReviewState,
    pub reviewed_by: Option<String>,
    pub last_review_decision: Option<String>,
    pub last_review_notes: Option<String>,
    pub last_modified: String,
}

/// Full-row status update. When `expected_status` is set the update only
/// applies if the row is still in that state, which is how the dispatch
/// path avoids re-arming a run that moved under it.
#[derive(Debug, Clone)]
pub struct RunStatusUpdate {
    pub item_key: String,
    pub expected_status: Option<RunStatus>,
    pub status: RunStatus,
    pub search_query: Option<String>,
    pub review_state: ReviewState,
    pub reviewed_by: Option<String>,
    pub last_review_decision: Option<String>,
    pub last_review_notes: Option<String>,
    pub retry_count: i64,
    pub next_retry_at: Option<String>,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<String>,
    pub last_modified: String,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn get(&self, item_key: &str) -> Result<Option<EnrichmentRun>>;
    async fn upsert(&self, row: &RunUpsert) -> Result<()>;
    /// Returns `false` when zero rows changed (missing row or failed
    /// expected-state assertion).
    async fn update_status(&self, update: &RunStatusUpdate) -> Result<bool>;
    /// Removal semantics live here, not in the orchestrator: the SQLite
    /// implementation deletes the row and reinserts a `NotStarted` shell.
    async fn reset(&self, item_key: &str, last_modified: &str) -> Result<bool>;
    async fn count_by_status(&self, status: RunStatus) -> Result<i64>;
    /// Oldest queued rows first.
    async fn fetch_queued(&self, limit: usize) -> Result<Vec<EnrichmentRun>>;
    /// Every `Queued` or `Running` row, oldest modification first.
    async fn fetch_resumable(&self) -> Result<Vec<EnrichmentRun>>;
    async fn latest_modified(&self) -> Result<Option<String>>;
}

#[async_trait]
pub trait RequestLedger: Send + Sync {
    async fn start(&self, request_id: &str, search_query: Option<&str>) -> Result<()>;
    async fn finish(
        &self,
        request_id: &str,
        outcome: RequestOutcome,
        error: Option<&str>,
    ) -> Result<()>;
    async fn save_snapshot(&self, request_id: &str, payload: &serde_json::Value) -> Result<()>;
    async fn mark_notify_success(&self, request_id: &str, completed_at: Option<&str>)
    -> Result<()>;
    async fn mark_notify_failure(&self, request_id: &str, error: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub actor: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub event: String,
    pub meta: serde_json::Value,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn emit(&self, event: AuditEvent) -> Result<()>;
}

/// SQLite-backed implementation of all three collaborator contracts.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        let store = Self::from_connection(conn)?;
        info!(path = %db_path.display(), "enrichment store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS enrichment_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_key TEXT NOT NULL UNIQUE,
                search_query TEXT,
                status TEXT NOT NULL,
                review_state TEXT NOT NULL DEFAULT 'not_required',
                reviewed_by TEXT,
                last_review_decision TEXT,
                last_review_notes TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                next_retry_at TEXT,
                last_error TEXT,
                last_attempt_at TEXT,
                last_modified TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS request_log (
                request_id TEXT PRIMARY KEY,
                search_query TEXT,
                status TEXT,
                error TEXT,
                payload_json TEXT,
                notified_at TEXT,
                last_notification_error TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor TEXT,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                event TEXT NOT NULL,
                meta TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_enrichment_runs_status_modified
             ON enrichment_runs(status, last_modified)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_events_entity
             ON audit_events(entity_type, entity_id, id)",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn db(&self) -> &Arc<Mutex<Connection>> {
        &self.db
    }
}
