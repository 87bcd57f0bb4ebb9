use anyhow::Result;
use async_trait::async_trait;
use rusqlite::params;

use super::types::RequestLogRecord;
use super::{RequestLedger, SqliteStore};
use crate::core::runs::types::RequestOutcome;

#[async_trait]
impl RequestLedger for SqliteStore {
    async fn start(&self, request_id: &str, search_query: Option<&str>) -> Result<()> {
        let db = self.db().lock().await;
        // A retried delivery of the same request id lands on the existing
        // row instead of erroring out of the whole operation.
        db.execute(
            "INSERT INTO request_log (request_id, search_query, status)
             VALUES (?1, ?2, 'RUNNING')
             ON CONFLICT(request_id) DO UPDATE SET
                search_query = COALESCE(excluded.search_query, request_log.search_query),
                status = 'RUNNING',
                updated_at = CURRENT_TIMESTAMP",
            params![request_id, search_query],
        )?;
        Ok(())
    }

    async fn finish(
        &self,
        request_id: &str,
        outcome: RequestOutcome,
        error: Option<&str>,
    ) -> Result<()> {
        let db = self.db().lock().await;
        db.execute(
            "UPDATE request_log
                SET status = ?1, error = ?2, updated_at = CURRENT_TIMESTAMP
              WHERE request_id = ?3",
            params![outcome.as_str(), error, request_id],
        )?;
        Ok(())
    }

    async fn save_snapshot(&self, request_id: &str, payload: &serde_json::Value) -> Result<()> {
        let db = self.db().lock().await;
        let payload_json = serde_json::to_string(payload)?;
        // The snapshot may arrive before `start` creates the row.
        db.execute(
            "INSERT INTO request_log (request_id, payload_json)
             VALUES (?1, ?2)
             ON CONFLICT(request_id) DO UPDATE SET
                payload_json = excluded.payload_json,
                updated_at = CURRENT_TIMESTAMP",
            params![request_id, payload_json],
        )?;
        Ok(())
    }

    async fn mark_notify_success(
        &self,
        request_id: &str,
        completed_at: Option<&str>,
    ) -> Result<()> {
        let db = self.db().lock().await;
        db.execute(
            "UPDATE request_log
                SET notified_at = COALESCE(?1, CURRENT_TIMESTAMP),
                    last_notification_error = NULL,
                    updated_at = CURRENT_TIMESTAMP
              WHERE request_id = ?2",
            params![completed_at, request_id],
        )?;
        Ok(())
    }

    async fn mark_notify_failure(&self, request_id: &str, error: &str) -> Result<()> {
        let db = self.db().lock().await;
        db.execute(
            "UPDATE request_log
                SET last_notification_error = ?1, updated_at = CURRENT_TIMESTAMP
              WHERE request_id = ?2",
            params![error, request_id],
        )?;
        Ok(())
    }
}

impl SqliteStore {
    /// Read a request-log row back, mostly for health tooling and tests.
    pub async fn fetch_request(&self, request_id: &str) -> Result<Option<RequestLogRecord>> {
        let db = self.db().lock().await;
        let mut stmt = db.prepare(
            "SELECT request_id, search_query, status, error, payload_json,
                    notified_at, last_notification_error, created_at, updated_at
               FROM request_log WHERE request_id = ?1 LIMIT 1",
        )?;
        let mut rows = stmt.query(params![request_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(RequestLogRecord {
                request_id: row.get(0)?,
                search_query: row.get(1)?,
                status: row.get(2)?,
                error: row.get(3)?,
                payload_json: row.get(4)?,
                notified_at: row.get(5)?,
                last_notification_error: row.get(6)?,
                created_at: row.get(7)?,
                updated_at: row.get(8)?,
            }))
        } else {
            Ok(None)
        }
    }
}
