use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{error, info, warn};

use super::invoker::{InvocationRequest, Invoker};
use super::review::review_from_run;
use super::types::{Clock, DispatchReport, EnrichmentRun, ReviewMetadata, ReviewState, RunStatus, now_iso};
use crate::core::store::{RunStatusUpdate, RunStore};

pub(crate) const DEFAULT_DISPATCH_LIMIT: usize = 5;

/// Mark a run as running (attempt bookkeeping included) and fire the
/// external call. Shared by the dispatch gate, the resume sweep, and the
/// orchestrator's direct-dispatch mode.
///
/// Returns `Ok(false)` when the conditional mark-running update touched
/// zero rows, i.e. the run moved out from under us.
pub(crate) async fn launch(
    store: &Arc<dyn RunStore>,
    invoker: &Arc<dyn Invoker>,
    clock: &Clock,
    run: &EnrichmentRun,
    review: Option<&ReviewMetadata>,
    context: Option<&str>,
    request_id: Option<&str>,
    expected: Option<RunStatus>,
) -> Result<bool> {
    let search_query = run
        .search_query
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    let attempt_at = now_iso(clock);
    let attempt_count = run.retry_count + 1;

    let changed = store
        .update_status(&RunStatusUpdate {
            item_key: run.item_key.clone(),
            expected_status: expected,
            status: RunStatus::Running,
            search_query: Some(search_query.clone()),
            review_state: ReviewState::NotRequired,
            reviewed_by: review
                .and_then(|r| r.reviewed_by.clone())
                .or_else(|| run.reviewed_by.clone()),
            last_review_decision: review.and_then(|r| r.decision.clone()),
            last_review_notes: review.and_then(|r| r.notes.clone()),
            retry_count: attempt_count,
            next_retry_at: None,
            last_error: None,
            last_attempt_at: Some(attempt_at.clone()),
            last_modified: attempt_at.clone(),
        })
        .await?;

    if !changed {
        warn!(item_key = %run.item_key, "mark-running updated zero rows, run moved");
        return Ok(false);
    }

    let outcome = invoker
        .invoke(InvocationRequest {
            item_key: run.item_key.clone(),
            search_query,
            context: context.map(str::to_string),
            review: review.cloned(),
            request_id: request_id.map(str::to_string),
        })
        .await;

    let failure = match outcome {
        Ok(result) if result.ok => {
            info!(item_key = %run.item_key, "enrichment invocation dispatched");
            return Ok(true);
        }
        Ok(result) => result
            .message
            .unwrap_or_else(|| "invocation returned failure".to_string()),
        Err(err) => err.to_string(),
    };

    error!(item_key = %run.item_key, error = %failure, "enrichment invocation failed");
    settle_failed(store, clock, run, attempt_count, Some(attempt_at), &failure).await;
    Err(anyhow!(failure))
}

async fn settle_failed(
    store: &Arc<dyn RunStore>,
    clock: &Clock,
    run: &EnrichmentRun,
    attempt_count: i64,
    attempt_at: Option<String>,
    failure: &str,
) {
    let update = RunStatusUpdate {
        item_key: run.item_key.clone(),
        expected_status: None,
        status: RunStatus::Failed,
        search_query: None,
        review_state: ReviewState::NotRequired,
        reviewed_by: run.reviewed_by.clone(),
        last_review_decision: run.last_review_decision.clone(),
        last_review_notes: run.last_review_notes.clone(),
        retry_count: attempt_count,
        next_retry_at: None,
        last_error: Some(failure.to_string()),
        last_attempt_at: attempt_at.or_else(|| run.last_attempt_at.clone()),
        last_modified: now_iso(clock),
    };
    if let Err(err) = store.update_status(&update).await {
        error!(item_key = %run.item_key, error = %err, "failed to persist run failure");
    }
}

/// Admission control for queued runs. One global in-flight slot by default:
/// a dispatch tick never arms more runs than `slots - running`, no matter
/// how large the requested batch is.
pub struct DispatchGate {
    store: Arc<dyn RunStore>,
    invoker: Arc<dyn Invoker>,
    clock: Clock,
    slots: usize,
}

impl DispatchGate {
    pub fn new(store: Arc<dyn RunStore>, invoker: Arc<dyn Invoker>, clock: Clock) -> Self {
        Self {
            store,
            invoker,
            clock,
            slots: 1,
        }
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots.max(1);
        self
    }

    pub async fn dispatch(&self, limit: usize) -> DispatchReport {
        let mut report = DispatchReport::default();
        let limit = if limit == 0 { DEFAULT_DISPATCH_LIMIT } else { limit };

        let running = match self.store.count_by_status(RunStatus::Running).await {
            Ok(count) => count.max(0) as usize,
            Err(err) => {
                error!(error = %err, "failed to count running enrichment runs");
                return report;
            }
        };

        let available = self.slots.saturating_sub(running);
        if available == 0 {
            return report;
        }

        let queued = match self.store.fetch_queued(limit.min(available)).await {
            Ok(runs) => runs,
            Err(err) => {
                error!(error = %err, limit, "failed to load queued enrichment runs");
                return report;
            }
        };

        for run in &queued {
            let query = run
                .search_query
                .as_deref()
                .map(str::trim)
                .unwrap_or_default();
            if query.is_empty() {
                report.skipped += 1;
                warn!(item_key = %run.item_key, "skipping queued run without search query");
                settle_failed(
                    &self.store,
                    &self.clock,
                    run,
                    run.retry_count,
                    None,
                    "missing-search-query",
                )
                .await;
                continue;
            }

            let review = review_from_run(run);
            match launch(
                &self.store,
                &self.invoker,
                &self.clock,
                run,
                review.as_ref(),
                None,
                None,
                Some(RunStatus::Queued),
            )
            .await
            {
                Ok(true) => report.scheduled += 1,
                Ok(false) => report.skipped += 1,
                Err(_) => report.failed += 1,
            }
        }

        report
    }
}
