use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::runs::invoker::{InvocationOutcome, InvocationRequest, Invoker};
use crate::core::runs::types::{Clock, EnrichmentRun, RequestOutcome, ReviewState, RunStatus};
use crate::core::store::{
    AuditEvent, AuditLog, RequestLedger, RunStatusUpdate, RunStore, RunUpsert,
};

pub fn fixed_clock(iso: &str) -> Clock {
    let instant: DateTime<Utc> = iso.parse().expect("valid timestamp");
    std::sync::Arc::new(move || instant)
}

pub fn make_run(item_key: &str, status: RunStatus) -> EnrichmentRun {
    EnrichmentRun {
        id: 1,
        item_key: item_key.to_string(),
        search_query: Some("stored query".to_string()),
        status,
        review_state: ReviewState::NotRequired,
        reviewed_by: None,
        last_review_decision: None,
        last_review_notes: None,
        retry_count: 0,
        next_retry_at: None,
        last_error: None,
        last_attempt_at: None,
        last_modified: "2024-01-01T00:00:00.000Z".to_string(),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub runs: StdMutex<HashMap<String, EnrichmentRun>>,
    pub queued_fetch_limits: StdMutex<Vec<usize>>,
    pub fail_resumable: AtomicBool,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn with_runs(runs: Vec<EnrichmentRun>) -> Self {
        let store = Self::default();
        {
            let mut map = store.runs.lock().unwrap();
            for run in runs {
                map.insert(run.item_key.clone(), run);
            }
        }
        store
    }

    pub fn run(&self, item_key: &str) -> Option<EnrichmentRun> {
        self.runs.lock().unwrap().get(item_key).cloned()
    }

    pub fn queued_fetch_count(&self) -> usize {
        self.queued_fetch_limits.lock().unwrap().len()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn get(&self, item_key: &str) -> Result<Option<EnrichmentRun>> {
        Ok(self.run(item_key))
    }

    async fn upsert(&self, row: &RunUpsert) -> Result<()> {
        let mut runs = self.runs.lock().unwrap();
        match runs.get_mut(&row.item_key) {
            Some(existing) => {
                if let Some(query) = &row.search_query {
                    existing.search_query = Some(query.clone());
                }
                existing.status = row.status;
                existing.review_state = row.review_state;
                existing.reviewed_by = row.reviewed_by.clone();
                existing.last_review_decision = row.last_review_decision.clone();
                existing.last_review_notes = row.last_review_notes.clone();
                existing.last_modified = row.last_modified.clone();
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                runs.insert(
                    row.item_key.clone(),
                    EnrichmentRun {
                        id,
                        item_key: row.item_key.clone(),
                        search_query: row.search_query.clone(),
                        status: row.status,
                        review_state: row.review_state,
                        reviewed_by: row.reviewed_by.clone(),
                        last_review_decision: row.last_review_decision.clone(),
                        last_review_notes: row.last_review_notes.clone(),
                        retry_count: 0,
                        next_retry_at: None,
                        last_error: None,
                        last_attempt_at: None,
                        last_modified: row.last_modified.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn update_status(&self, update: &RunStatusUpdate) -> Result<bool> {
        let mut runs = self.runs.lock().unwrap();
        let Some(existing) = runs.get_mut(&update.item_key) else {
            return Ok(false);
        };
        if let Some(expected) = update.expected_status {
            if existing.status != expected {
                return Ok(false);
            }
        }
        if let Some(query) = &update.search_query {
            existing.search_query = Some(query.clone());
        }
        existing.status = update.status;
        existing.review_state = update.review_state;
        existing.reviewed_by = update.reviewed_by.clone();
        existing.last_review_decision = update.last_review_decision.clone();
        existing.last_review_notes = update.last_review_notes.clone();
        existing.retry_count = update.retry_count;
        existing.next_retry_at = update.next_retry_at.clone();
        existing.last_error = update.last_error.clone();
        existing.last_attempt_at = update.last_attempt_at.clone();
        existing.last_modified = update.last_modified.clone();
        Ok(true)
    }

    async fn reset(&self, item_key: &str, last_modified: &str) -> Result<bool> {
        let mut runs = self.runs.lock().unwrap();
        if runs.remove(item_key).is_none() {
            return Ok(false);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        runs.insert(
            item_key.to_string(),
            EnrichmentRun {
                id,
                item_key: item_key.to_string(),
                search_query: None,
                status: RunStatus::NotStarted,
                review_state: ReviewState::NotRequired,
                reviewed_by: None,
                last_review_decision: None,
                last_review_notes: None,
                retry_count: 0,
                next_retry_at: None,
                last_error: None,
                last_attempt_at: None,
                last_modified: last_modified.to_string(),
            },
        );
        Ok(true)
    }

    async fn count_by_status(&self, status: RunStatus) -> Result<i64> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.values().filter(|run| run.status == status).count() as i64)
    }

    async fn fetch_queued(&self, limit: usize) -> Result<Vec<EnrichmentRun>> {
        self.queued_fetch_limits.lock().unwrap().push(limit);
        let runs = self.runs.lock().unwrap();
        let mut queued: Vec<EnrichmentRun> = runs
            .values()
            .filter(|run| run.status == RunStatus::Queued)
            .cloned()
            .collect();
        queued.sort_by(|a, b| a.last_modified.cmp(&b.last_modified).then(a.id.cmp(&b.id)));
        queued.truncate(limit);
        Ok(queued)
    }

    async fn fetch_resumable(&self) -> Result<Vec<EnrichmentRun>> {
        if self.fail_resumable.load(Ordering::SeqCst) {
            return Err(anyhow!("resumable query exploded"));
        }
        let runs = self.runs.lock().unwrap();
        let mut stale: Vec<EnrichmentRun> = runs
            .values()
            .filter(|run| matches!(run.status, RunStatus::Queued | RunStatus::Running))
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.last_modified.cmp(&b.last_modified).then(a.id.cmp(&b.id)));
        Ok(stale)
    }

    async fn latest_modified(&self) -> Result<Option<String>> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.values().map(|run| run.last_modified.clone()).max())
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    pub starts: StdMutex<Vec<(String, Option<String>)>>,
    pub finishes: StdMutex<Vec<(String, RequestOutcome, Option<String>)>>,
    pub snapshots: StdMutex<Vec<(String, serde_json::Value)>>,
    pub notify_successes: StdMutex<Vec<(String, Option<String>)>>,
    pub notify_failures: StdMutex<Vec<(String, String)>>,
}

impl MemoryLedger {
    pub fn last_finish(&self) -> Option<(String, RequestOutcome, Option<String>)> {
        self.finishes.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl RequestLedger for MemoryLedger {
    async fn start(&self, request_id: &str, search_query: Option<&str>) -> Result<()> {
        self.starts
            .lock()
            .unwrap()
            .push((request_id.to_string(), search_query.map(str::to_string)));
        Ok(())
    }

    async fn finish(
        &self,
        request_id: &str,
        outcome: RequestOutcome,
        error: Option<&str>,
    ) -> Result<()> {
        self.finishes.lock().unwrap().push((
            request_id.to_string(),
            outcome,
            error.map(str::to_string),
        ));
        Ok(())
    }

    async fn save_snapshot(&self, request_id: &str, payload: &serde_json::Value) -> Result<()> {
        self.snapshots
            .lock()
            .unwrap()
            .push((request_id.to_string(), payload.clone()));
        Ok(())
    }

    async fn mark_notify_success(
        &self,
        request_id: &str,
        completed_at: Option<&str>,
    ) -> Result<()> {
        self.notify_successes
            .lock()
            .unwrap()
            .push((request_id.to_string(), completed_at.map(str::to_string)));
        Ok(())
    }

    async fn mark_notify_failure(&self, request_id: &str, error: &str) -> Result<()> {
        self.notify_failures
            .lock()
            .unwrap()
            .push((request_id.to_string(), error.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAudit {
    pub events: StdMutex<Vec<AuditEvent>>,
}

impl MemoryAudit {
    pub fn event_names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.event.clone())
            .collect()
    }
}

#[async_trait]
impl AuditLog for MemoryAudit {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Scripted invoker: records every request and answers with the configured
/// behavior.
#[derive(Default)]
pub struct MockInvoker {
    pub calls: StdMutex<Vec<InvocationRequest>>,
    pub fail_with: StdMutex<Option<String>>,
    pub reject_with: StdMutex<Option<String>>,
}

impl MockInvoker {
    pub fn failing(message: &str) -> Self {
        let invoker = Self::default();
        *invoker.fail_with.lock().unwrap() = Some(message.to_string());
        invoker
    }

    pub fn rejecting(message: &str) -> Self {
        let invoker = Self::default();
        *invoker.reject_with.lock().unwrap() = Some(message.to_string());
        invoker
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Invoker for MockInvoker {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationOutcome> {
        self.calls.lock().unwrap().push(request);
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(anyhow!(message));
        }
        if let Some(message) = self.reject_with.lock().unwrap().clone() {
            return Ok(InvocationOutcome {
                ok: false,
                message: Some(message),
            });
        }
        Ok(InvocationOutcome {
            ok: true,
            message: None,
        })
    }
}
