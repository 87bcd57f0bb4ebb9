use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{Row, params};

use super::{RunStatusUpdate, RunStore, RunUpsert, SqliteStore};
use crate::core::runs::types::{EnrichmentRun, ReviewState, RunStatus};

const RUN_COLUMNS: &str = "id, item_key, search_query, status, review_state, reviewed_by,
     last_review_decision, last_review_notes, retry_count, next_retry_at,
     last_error, last_attempt_at, last_modified";

fn map_run(row: &Row<'_>) -> rusqlite::Result<EnrichmentRun> {
    let status: String = row.get(3)?;
    let review_state: String = row.get(4)?;
    Ok(EnrichmentRun {
        id: row.get(0)?,
        item_key: row.get(1)?,
        search_query: row.get(2)?,
        status: RunStatus::from_status(&status).unwrap_or(RunStatus::NotStarted),
        review_state: ReviewState::from_state(&review_state).unwrap_or(ReviewState::NotRequired),
        reviewed_by: row.get(5)?,
        last_review_decision: row.get(6)?,
        last_review_notes: row.get(7)?,
        retry_count: row.get(8)?,
        next_retry_at: row.get(9)?,
        last_error: row.get(10)?,
        last_attempt_at: row.get(11)?,
        last_modified: row.get(12)?,
    })
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn get(&self, item_key: &str) -> Result<Option<EnrichmentRun>> {
        let db = self.db().lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM enrichment_runs WHERE item_key = ?1 LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![item_key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(map_run(row)?))
        } else {
            Ok(None)
        }
    }

    async fn upsert(&self, row: &RunUpsert) -> Result<()> {
        let db = self.db().lock().await;
        db.execute(
            "INSERT INTO enrichment_runs (
                item_key, search_query, status, review_state, reviewed_by,
                last_review_decision, last_review_notes, last_modified
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(item_key) DO UPDATE SET
                search_query = COALESCE(excluded.search_query, enrichment_runs.search_query),
                status = excluded.status,
                review_state = excluded.review_state,
                reviewed_by = excluded.reviewed_by,
                last_review_decision = excluded.last_review_decision,
                last_review_notes = excluded.last_review_notes,
                last_modified = excluded.last_modified",
            params![
                row.item_key,
                row.search_query,
                row.status.as_str(),
                row.review_state.as_str(),
                row.reviewed_by,
                row.last_review_decision,
                row.last_review_notes,
                row.last_modified,
            ],
        )?;
        Ok(())
    }

    async fn update_status(&self, update: &RunStatusUpdate) -> Result<bool> {
        let db = self.db().lock().await;
        let changed = match update.expected_status {
            Some(expected) => db.execute(
                "UPDATE enrichment_runs
                    SET status = ?1,
                        search_query = COALESCE(?2, search_query),
                        review_state = ?3,
                        reviewed_by = ?4,
                        last_review_decision = ?5,
                        last_review_notes = ?6,
                        retry_count = ?7,
                        next_retry_at = ?8,
                        last_error = ?9,
                        last_attempt_at = ?10,
                        last_modified = ?11
                  WHERE item_key = ?12 AND status = ?13",
                params![
                    update.status.as_str(),
                    update.search_query,
                    update.review_state.as_str(),
                    update.reviewed_by,
                    update.last_review_decision,
                    update.last_review_notes,
                    update.retry_count,
                    update.next_retry_at,
                    update.last_error,
                    update.last_attempt_at,
                    update.last_modified,
                    update.item_key,
                    expected.as_str(),
                ],
            )?,
            None => db.execute(
                "UPDATE enrichment_runs
                    SET status = ?1,
                        search_query = COALESCE(?2, search_query),
                        review_state = ?3,
                        reviewed_by = ?4,
                        last_review_decision = ?5,
                        last_review_notes = ?6,
                        retry_count = ?7,
                        next_retry_at = ?8,
                        last_error = ?9,
                        last_attempt_at = ?10,
                        last_modified = ?11
                  WHERE item_key = ?12",
                params![
                    update.status.as_str(),
                    update.search_query,
                    update.review_state.as_str(),
                    update.reviewed_by,
                    update.last_review_decision,
                    update.last_review_notes,
                    update.retry_count,
                    update.next_retry_at,
                    update.last_error,
                    update.last_attempt_at,
                    update.last_modified,
                    update.item_key,
                ],
            )?,
        };
        Ok(changed > 0)
    }

    async fn reset(&self, item_key: &str, last_modified: &str) -> Result<bool> {
        let mut db = self.db().lock().await;
        let txn = db.transaction()?;
        let deleted = txn.execute(
            "DELETE FROM enrichment_runs WHERE item_key = ?1",
            params![item_key],
        )?;
        if deleted == 0 {
            return Ok(false);
        }
        txn.execute(
            "INSERT INTO enrichment_runs (item_key, status, review_state, last_modified)
             VALUES (?1, ?2, 'not_required', ?3)",
            params![item_key, RunStatus::NotStarted.as_str(), last_modified],
        )?;
        txn.commit()?;
        Ok(true)
    }

    async fn count_by_status(&self, status: RunStatus) -> Result<i64> {
        let db = self.db().lock().await;
        let count = db.query_row(
            "SELECT COUNT(*) FROM enrichment_runs WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn fetch_queued(&self, limit: usize) -> Result<Vec<EnrichmentRun>> {
        let db = self.db().lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM enrichment_runs
              WHERE status = 'queued'
              ORDER BY datetime(last_modified) ASC, id ASC
              LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], map_run)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn fetch_resumable(&self) -> Result<Vec<EnrichmentRun>> {
        let db = self.db().lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM enrichment_runs
              WHERE status IN ('queued', 'running')
              ORDER BY datetime(last_modified) ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], map_run)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn latest_modified(&self) -> Result<Option<String>> {
        let db = self.db().lock().await;
        let latest = db.query_row(
            "SELECT MAX(last_modified) FROM enrichment_runs",
            [],
            |row| row.get(0),
        )?;
        Ok(latest)
    }
}
