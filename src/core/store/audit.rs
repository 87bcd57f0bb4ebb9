use anyhow::Result;
use async_trait::async_trait;
use rusqlite::params;

use super::types::AuditEventRecord;
use super::{AuditEvent, AuditLog, SqliteStore};

#[async_trait]
impl AuditLog for SqliteStore {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        let db = self.db().lock().await;
        let meta = serde_json::to_string(&event.meta)?;
        db.execute(
            "INSERT INTO audit_events (actor, entity_type, entity_id, event, meta)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.actor,
                event.entity_type,
                event.entity_id,
                event.event,
                meta
            ],
        )?;
        Ok(())
    }
}

impl SqliteStore {
    pub async fn list_events_for(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEventRecord>> {
        let db = self.db().lock().await;
        let mut stmt = db.prepare(
            "SELECT id, actor, entity_type, entity_id, event, meta, created_at
               FROM audit_events
              WHERE entity_type = ?1 AND entity_id = ?2
              ORDER BY id DESC
              LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![entity_type, entity_id, limit as i64], |row| {
            Ok(AuditEventRecord {
                id: row.get(0)?,
                actor: row.get(1)?,
                entity_type: row.get(2)?,
                entity_id: row.get(3)?,
                event: row.get(4)?,
                meta: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
