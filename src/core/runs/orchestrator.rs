use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{error, info, warn};

use super::dispatch::launch;
use super::invoker::Invoker;
use super::review::{normalize_review_payload, resolve_review_metadata};
use super::types::{
    CancelRunInput, CancelRunResult, Clock, CloseDecision, CloseRunInput, CloseRunResult,
    DeclineReason, DeleteRunInput, DeleteRunResult, EnrichmentRun, HealthStatus,
    OutcomeRunResult, RecordOutcomeInput, RequestContext, RequestOutcome, RestartRunInput,
    ReviewState, RunStatus, StartRunInput, StartRunResult, now_iso,
};
use crate::core::store::{AuditEvent, AuditLog, RequestLedger, RunStatusUpdate, RunStore, RunUpsert};

const ENTITY_TYPE: &str = "CatalogEntry";

/// Owns the run state machine and coordinates the persisted store, the
/// request ledger and the audit log. With a direct invoker attached,
/// `start`/`restart` fire the external call themselves instead of leaving
/// the run for the dispatch gate.
pub struct RunOrchestrator {
    store: Arc<dyn RunStore>,
    ledger: Arc<dyn RequestLedger>,
    audit: Arc<dyn AuditLog>,
    invoker: Option<Arc<dyn Invoker>>,
    clock: Clock,
}

fn normalize_request(request: Option<RequestContext>) -> Option<RequestContext> {
    let mut request = request?;
    request.id = request.id.trim().to_string();
    if request.id.is_empty() {
        return None;
    }
    Some(request)
}

fn trimmed(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl RunOrchestrator {
    pub fn new(
        store: Arc<dyn RunStore>,
        ledger: Arc<dyn RequestLedger>,
        audit: Arc<dyn AuditLog>,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            ledger,
            audit,
            invoker: None,
            clock,
        }
    }

    /// Direct-dispatch mode: `start`/`restart` invoke synchronously after
    /// queuing. Mutually exclusive with timer-driven dispatch in one
    /// deployment.
    pub fn with_direct_invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    async fn snapshot_request(&self, request: Option<&RequestContext>) {
        let Some(request) = request else { return };
        let Some(payload) = &request.payload else {
            return;
        };
        if let Err(err) = self.ledger.save_snapshot(&request.id, payload).await {
            error!(request_id = %request.id, error = %err, "failed to persist request payload snapshot");
        }
    }

    async fn record_request_start(&self, request: Option<&RequestContext>, search: Option<&str>) {
        let Some(request) = request else { return };
        if let Err(err) = self.ledger.start(&request.id, search).await {
            error!(request_id = %request.id, error = %err, "failed to persist request log start");
        }
    }

    /// Exactly one terminal ledger status per operation attempt, plus the
    /// caller-reported notification outcome when one rode along.
    async fn finalize_request(
        &self,
        request: Option<&RequestContext>,
        outcome: RequestOutcome,
        error_text: Option<&str>,
    ) {
        let Some(request) = request else { return };
        if let Err(err) = self.ledger.finish(&request.id, outcome, error_text).await {
            error!(
                request_id = %request.id,
                status = outcome.as_str(),
                error = %err,
                "failed to persist request log completion"
            );
        }

        let Some(notification) = &request.notification else {
            return;
        };
        if let Some(notify_error) = &notification.error {
            if let Err(err) = self
                .ledger
                .mark_notify_failure(&request.id, notify_error)
                .await
            {
                error!(request_id = %request.id, error = %err, "failed to persist notification failure");
            }
            return;
        }
        if let Err(err) = self
            .ledger
            .mark_notify_success(&request.id, notification.completed_at.as_deref())
            .await
        {
            error!(request_id = %request.id, error = %err, "failed to persist notification success");
        }
    }

    /// Fire-and-forget: audit trouble is logged, never surfaced.
    async fn emit_audit(
        &self,
        actor: Option<&str>,
        entity_id: &str,
        event: &str,
        meta: serde_json::Value,
    ) {
        let result = self
            .audit
            .emit(AuditEvent {
                actor: trimmed(actor),
                entity_type: ENTITY_TYPE.to_string(),
                entity_id: entity_id.to_string(),
                event: event.to_string(),
                meta,
            })
            .await;
        if let Err(err) = result {
            warn!(item_key = %entity_id, event, error = %err, "failed to persist audit event");
        }
    }

    async fn load_run(
        &self,
        item_key: &str,
        request: Option<&RequestContext>,
    ) -> Result<Option<EnrichmentRun>> {
        match self.store.get(item_key).await {
            Ok(run) => Ok(run),
            Err(err) => {
                error!(item_key, error = %err, "failed to load enrichment run");
                self.finalize_request(request, RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                Err(err)
            }
        }
    }

    pub async fn start(&self, input: StartRunInput) -> Result<StartRunResult> {
        let request = normalize_request(input.request);
        self.snapshot_request(request.as_ref()).await;

        let item_key = input.item_key.trim().to_string();
        if item_key.is_empty() {
            warn!(context = ?input.context, "start declined without item key");
            self.finalize_request(request.as_ref(), RequestOutcome::Declined, Some(DeclineReason::MissingItemId.as_str()))
                .await;
            return Ok(StartRunResult::declined(DeclineReason::MissingItemId, None, false));
        }

        let existing = self.load_run(&item_key, request.as_ref()).await?;

        let search_query = trimmed(input.search_query.as_deref())
            .or_else(|| existing.as_ref().and_then(|run| trimmed(run.search_query.as_deref())));
        let Some(search_query) = search_query else {
            warn!(item_key, "start declined without search query");
            self.finalize_request(
                request.as_ref(),
                RequestOutcome::Declined,
                Some(DeclineReason::MissingSearchQuery.as_str()),
            )
            .await;
            if existing.is_some() {
                return Ok(StartRunResult::declined(
                    DeclineReason::MissingSearchQuery,
                    existing,
                    false,
                ));
            }
            // Leave a NotStarted shell behind so the entry shows up with a
            // run record even though nothing was admitted.
            let shell = RunUpsert {
                item_key: item_key.clone(),
                search_query: None,
                status: RunStatus::NotStarted,
                review_state: ReviewState::NotRequired,
                reviewed_by: None,
                last_review_decision: None,
                last_review_notes: None,
                last_modified: now_iso(&self.clock),
            };
            if let Err(err) = self.store.upsert(&shell).await {
                error!(item_key, error = %err, "failed to create placeholder run record");
                return Err(err);
            }
            let run = self.store.get(&item_key).await?;
            return Ok(StartRunResult::declined(DeclineReason::MissingSearchQuery, run, true));
        };

        if let Some(run) = &existing {
            if !run.status.is_startable() {
                info!(item_key, status = run.status.as_str(), "start declined, run already in flight");
                self.finalize_request(
                    request.as_ref(),
                    RequestOutcome::Declined,
                    Some(DeclineReason::RunAlreadyInProgress.as_str()),
                )
                .await;
                return Ok(StartRunResult::declined(
                    DeclineReason::RunAlreadyInProgress,
                    existing,
                    false,
                ));
            }
        }

        let review = input.review.as_ref().map(normalize_review_payload);
        let created = existing.is_none();
        self.record_request_start(request.as_ref(), Some(&search_query))
            .await;

        let queued = RunUpsert {
            item_key: item_key.clone(),
            search_query: Some(search_query.clone()),
            status: RunStatus::Queued,
            review_state: review
                .as_ref()
                .and_then(|r| r.state)
                .unwrap_or(ReviewState::NotRequired),
            reviewed_by: review.as_ref().and_then(|r| r.reviewed_by.clone()),
            last_review_decision: review.as_ref().and_then(|r| r.decision.clone()),
            last_review_notes: review.as_ref().and_then(|r| r.notes.clone()),
            last_modified: now_iso(&self.clock),
        };
        if let Err(err) = self.store.upsert(&queued).await {
            error!(item_key, error = %err, "failed to queue enrichment run");
            self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                .await;
            return Err(err);
        }

        self.emit_audit(
            input.actor.as_deref(),
            &item_key,
            if created { "RunQueued" } else { "RunRequeued" },
            serde_json::json!({
                "searchQuery": search_query,
                "context": input.context,
                "previousStatus": existing.as_ref().map(|run| run.status.as_str()),
            }),
        )
        .await;

        let mut run = self.load_run(&item_key, request.as_ref()).await?;

        if let Some(invoker) = &self.invoker {
            let Some(queued_run) = run.clone() else {
                let err = anyhow!("queued run missing immediately after upsert");
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            };
            if let Err(err) = launch(
                &self.store,
                invoker,
                &self.clock,
                &queued_run,
                review.as_ref(),
                input.context.as_deref(),
                request.as_ref().map(|r| r.id.as_str()),
                Some(RunStatus::Queued),
            )
            .await
            {
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            }
            run = self.load_run(&item_key, request.as_ref()).await?;
        }

        self.finalize_request(request.as_ref(), RequestOutcome::Success, None)
            .await;
        info!(item_key, created, "enrichment run queued");
        Ok(StartRunResult {
            queued: true,
            created,
            run,
            reason: None,
        })
    }

    pub async fn restart(&self, input: RestartRunInput) -> Result<StartRunResult> {
        let request = normalize_request(input.request);
        self.snapshot_request(request.as_ref()).await;

        let item_key = input.item_key.trim().to_string();
        if item_key.is_empty() {
            warn!(context = ?input.context, "restart declined without item key");
            self.finalize_request(request.as_ref(), RequestOutcome::Declined, Some(DeclineReason::MissingItemId.as_str()))
                .await;
            return Ok(StartRunResult::declined(DeclineReason::MissingItemId, None, false));
        }

        let existing = self.load_run(&item_key, request.as_ref()).await?;

        let search_query = trimmed(input.search_query.as_deref())
            .or_else(|| existing.as_ref().and_then(|run| trimmed(run.search_query.as_deref())));
        let Some(search_query) = search_query else {
            warn!(item_key, "restart declined without search query");
            self.finalize_request(
                request.as_ref(),
                RequestOutcome::Declined,
                Some(DeclineReason::MissingSearchQuery.as_str()),
            )
            .await;
            let created = existing.is_none();
            return Ok(StartRunResult::declined(
                DeclineReason::MissingSearchQuery,
                existing,
                created,
            ));
        };

        let supplied = input.review.as_ref().map(normalize_review_payload);
        let resolved = resolve_review_metadata(
            existing.as_ref(),
            supplied.as_ref(),
            input.replace_review_metadata,
        );
        let now = now_iso(&self.clock);
        self.record_request_start(request.as_ref(), Some(&search_query))
            .await;

        let persisted = if existing.is_some() {
            self.store
                .update_status(&RunStatusUpdate {
                    item_key: item_key.clone(),
                    expected_status: None,
                    status: RunStatus::Queued,
                    search_query: Some(search_query.clone()),
                    review_state: resolved.state,
                    reviewed_by: resolved.reviewed_by.clone(),
                    last_review_decision: resolved.decision.clone(),
                    last_review_notes: resolved.notes.clone(),
                    retry_count: 0,
                    next_retry_at: None,
                    last_error: None,
                    last_attempt_at: None,
                    last_modified: now.clone(),
                })
                .await
                .and_then(|changed| {
                    if changed {
                        Ok(())
                    } else {
                        Err(anyhow!("failed to requeue enrichment run"))
                    }
                })
        } else {
            self.store
                .upsert(&RunUpsert {
                    item_key: item_key.clone(),
                    search_query: Some(search_query.clone()),
                    status: RunStatus::Queued,
                    review_state: resolved.state,
                    reviewed_by: resolved.reviewed_by.clone(),
                    last_review_decision: resolved.decision.clone(),
                    last_review_notes: resolved.notes.clone(),
                    last_modified: now.clone(),
                })
                .await
        };
        if let Err(err) = persisted {
            error!(item_key, error = %err, "failed to restart enrichment run");
            self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                .await;
            return Err(err);
        }

        let previous_status = input
            .previous_status
            .or_else(|| existing.as_ref().map(|run| run.status));
        self.emit_audit(
            input.actor.as_deref(),
            &item_key,
            "RunRestarted",
            serde_json::json!({
                "previousStatus": previous_status.map(RunStatus::as_str),
                "searchQuery": search_query,
                "context": input.context,
                "lastReviewDecision": resolved.decision,
                "lastReviewNotes": resolved.notes,
                "lastReviewActor": resolved.reviewed_by,
            }),
        )
        .await;

        let created = existing.is_none();
        let mut run = self.load_run(&item_key, request.as_ref()).await?;

        if let Some(invoker) = &self.invoker {
            let Some(queued_run) = run.clone() else {
                let err = anyhow!("queued run missing immediately after restart");
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            };
            if let Err(err) = launch(
                &self.store,
                invoker,
                &self.clock,
                &queued_run,
                resolved.forwarded.as_ref(),
                input.context.as_deref(),
                request.as_ref().map(|r| r.id.as_str()),
                Some(RunStatus::Queued),
            )
            .await
            {
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            }
            run = self.load_run(&item_key, request.as_ref()).await?;
        }

        self.finalize_request(request.as_ref(), RequestOutcome::Success, None)
            .await;
        info!(item_key, created, "enrichment run restarted");
        Ok(StartRunResult {
            queued: true,
            created,
            run,
            reason: None,
        })
    }

    pub async fn cancel(&self, input: CancelRunInput) -> Result<CancelRunResult> {
        let request = normalize_request(input.request);
        self.snapshot_request(request.as_ref()).await;

        let item_key = input.item_key.trim().to_string();
        if item_key.is_empty() {
            warn!("cancel declined without item key");
            self.finalize_request(request.as_ref(), RequestOutcome::Declined, Some(DeclineReason::MissingItemId.as_str()))
                .await;
            return Ok(CancelRunResult {
                cancelled: false,
                run: None,
                reason: Some(DeclineReason::MissingItemId),
            });
        }

        let Some(existing) = self.load_run(&item_key, request.as_ref()).await? else {
            warn!(item_key, "cancel declined, no run on record");
            self.finalize_request(request.as_ref(), RequestOutcome::Declined, Some(DeclineReason::NotFound.as_str()))
                .await;
            return Ok(CancelRunResult {
                cancelled: false,
                run: None,
                reason: Some(DeclineReason::NotFound),
            });
        };

        let actor = trimmed(input.actor.as_deref());
        let reason = trimmed(input.reason.as_deref())
            .or_else(|| actor.as_ref().map(|actor| format!("Cancelled by {actor}")))
            .unwrap_or_else(|| "Enrichment run cancelled".to_string());
        let now = now_iso(&self.clock);

        self.record_request_start(request.as_ref(), existing.search_query.as_deref())
            .await;

        let update = RunStatusUpdate {
            item_key: item_key.clone(),
            expected_status: None,
            status: RunStatus::Cancelled,
            search_query: None,
            review_state: ReviewState::NotRequired,
            reviewed_by: existing.reviewed_by.clone(),
            last_review_decision: existing.last_review_decision.clone(),
            last_review_notes: existing.last_review_notes.clone(),
            retry_count: existing.retry_count,
            next_retry_at: None,
            last_error: Some(reason.clone()),
            last_attempt_at: existing
                .last_attempt_at
                .clone()
                .or_else(|| Some(now.clone())),
            last_modified: now.clone(),
        };
        match self.store.update_status(&update).await {
            Ok(true) => {}
            Ok(false) => {
                let err = anyhow!("failed to cancel enrichment run");
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            }
            Err(err) => {
                error!(item_key, error = %err, "failed to cancel enrichment run");
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            }
        }

        self.emit_audit(
            actor.as_deref(),
            &item_key,
            "RunCancelled",
            serde_json::json!({
                "previousStatus": existing.status.as_str(),
                "cancelledAt": now,
                "reason": reason,
            }),
        )
        .await;

        self.finalize_request(request.as_ref(), RequestOutcome::Cancelled, None)
            .await;
        info!(item_key, "enrichment run cancelled");
        let run = self.load_run(&item_key, request.as_ref()).await?;
        Ok(CancelRunResult {
            cancelled: true,
            run,
            reason: None,
        })
    }

    pub async fn delete(&self, input: DeleteRunInput) -> Result<DeleteRunResult> {
        let request = normalize_request(input.request);
        self.snapshot_request(request.as_ref()).await;

        let item_key = input.item_key.trim().to_string();
        if item_key.is_empty() {
            warn!("delete declined without item key");
            self.finalize_request(request.as_ref(), RequestOutcome::Declined, Some(DeclineReason::MissingItemId.as_str()))
                .await;
            return Ok(DeleteRunResult {
                deleted: false,
                run: None,
                reason: Some(DeclineReason::MissingItemId),
            });
        }

        let Some(existing) = self.load_run(&item_key, request.as_ref()).await? else {
            warn!(item_key, "delete declined, no run on record");
            self.finalize_request(request.as_ref(), RequestOutcome::Declined, Some(DeclineReason::NotFound.as_str()))
                .await;
            return Ok(DeleteRunResult {
                deleted: false,
                run: None,
                reason: Some(DeclineReason::NotFound),
            });
        };

        if existing.status == RunStatus::NotStarted {
            info!(item_key, "delete skipped, run never started");
            self.finalize_request(request.as_ref(), RequestOutcome::Declined, Some(DeclineReason::NotStarted.as_str()))
                .await;
            return Ok(DeleteRunResult {
                deleted: false,
                run: Some(existing),
                reason: Some(DeclineReason::NotStarted),
            });
        }

        let now = now_iso(&self.clock);
        self.record_request_start(request.as_ref(), existing.search_query.as_deref())
            .await;

        match self.store.reset(&item_key, &now).await {
            Ok(true) => {}
            Ok(false) => {
                let err = anyhow!("failed to delete enrichment run");
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            }
            Err(err) => {
                error!(item_key, error = %err, "failed to delete enrichment run");
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            }
        }

        self.emit_audit(
            input.actor.as_deref(),
            &item_key,
            "RunReset",
            serde_json::json!({
                "previousStatus": existing.status.as_str(),
                "reason": trimmed(input.reason.as_deref()),
                "resetAt": now,
            }),
        )
        .await;

        self.finalize_request(request.as_ref(), RequestOutcome::Success, None)
            .await;
        info!(item_key, "enrichment run reset");
        let run = self.load_run(&item_key, request.as_ref()).await?;
        Ok(DeleteRunResult {
            deleted: true,
            run,
            reason: None,
        })
    }

    /// Settled external call reporting back: `Running → Review` when a human
    /// has to look at it, `Running → Approved` otherwise, `Failed` when the
    /// invoker surfaced an error.
    pub async fn record_outcome(&self, input: RecordOutcomeInput) -> Result<OutcomeRunResult> {
        let request = normalize_request(input.request);
        self.snapshot_request(request.as_ref()).await;

        let item_key = input.item_key.trim().to_string();
        if item_key.is_empty() {
            warn!("outcome declined without item key");
            self.finalize_request(request.as_ref(), RequestOutcome::Declined, Some(DeclineReason::MissingItemId.as_str()))
                .await;
            return Ok(OutcomeRunResult {
                recorded: false,
                run: None,
                reason: Some(DeclineReason::MissingItemId),
            });
        }

        let Some(existing) = self.load_run(&item_key, request.as_ref()).await? else {
            warn!(item_key, "outcome declined, no run on record");
            self.finalize_request(request.as_ref(), RequestOutcome::Declined, Some(DeclineReason::NotFound.as_str()))
                .await;
            return Ok(OutcomeRunResult {
                recorded: false,
                run: None,
                reason: Some(DeclineReason::NotFound),
            });
        };

        let error_text = trimmed(input.error.as_deref());
        let review = input.review.as_ref().map(normalize_review_payload);
        let (status, review_state) = if error_text.is_some() {
            (RunStatus::Failed, ReviewState::NotRequired)
        } else if input.needs_review {
            (RunStatus::Review, ReviewState::Pending)
        } else {
            (RunStatus::Approved, ReviewState::Approved)
        };

        let search_query = trimmed(input.search_query.as_deref());
        let now = now_iso(&self.clock);
        self.record_request_start(
            request.as_ref(),
            search_query
                .as_deref()
                .or(existing.search_query.as_deref()),
        )
        .await;

        let update = RunStatusUpdate {
            item_key: item_key.clone(),
            expected_status: None,
            status,
            search_query,
            review_state,
            // A pending review belongs to no reviewer yet.
            reviewed_by: if review_state == ReviewState::Pending {
                None
            } else {
                review
                    .as_ref()
                    .and_then(|r| r.reviewed_by.clone())
                    .or_else(|| existing.reviewed_by.clone())
            },
            last_review_decision: review
                .as_ref()
                .and_then(|r| r.decision.clone())
                .or_else(|| existing.last_review_decision.clone()),
            last_review_notes: review
                .as_ref()
                .and_then(|r| r.notes.clone())
                .or_else(|| existing.last_review_notes.clone()),
            retry_count: existing.retry_count,
            next_retry_at: existing.next_retry_at.clone(),
            last_error: error_text.clone().or_else(|| existing.last_error.clone()),
            last_attempt_at: existing.last_attempt_at.clone(),
            last_modified: now,
        };
        match self.store.update_status(&update).await {
            Ok(true) => {}
            Ok(false) => {
                let err = anyhow!("failed to record enrichment run outcome");
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            }
            Err(err) => {
                error!(item_key, error = %err, "failed to record enrichment run outcome");
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            }
        }

        let event = match status {
            RunStatus::Failed => "RunResultFailed",
            RunStatus::Review => "RunReviewRequested",
            _ => "RunCompleted",
        };
        self.emit_audit(
            input.actor.as_deref(),
            &item_key,
            event,
            serde_json::json!({
                "previousStatus": existing.status.as_str(),
                "status": status.as_str(),
                "needsReview": input.needs_review,
                "error": error_text,
            }),
        )
        .await;

        let (outcome, error_for_log) = if status == RunStatus::Failed {
            (RequestOutcome::Failed, error_text)
        } else {
            (RequestOutcome::Success, None)
        };
        self.finalize_request(request.as_ref(), outcome, error_for_log.as_deref())
            .await;
        let run = self.load_run(&item_key, request.as_ref()).await?;
        Ok(OutcomeRunResult {
            recorded: true,
            run,
            reason: None,
        })
    }

    /// Review decision shortcut: any state straight to `Approved` or
    /// `Rejected`. A rejection also clears the retry bookkeeping.
    pub async fn close(&self, input: CloseRunInput) -> Result<CloseRunResult> {
        let request = normalize_request(input.request);
        self.snapshot_request(request.as_ref()).await;

        let item_key = input.item_key.trim().to_string();
        if item_key.is_empty() {
            warn!("close declined without item key");
            self.finalize_request(request.as_ref(), RequestOutcome::Declined, Some(DeclineReason::MissingItemId.as_str()))
                .await;
            return Ok(CloseRunResult {
                closed: false,
                run: None,
                reason: Some(DeclineReason::MissingItemId),
            });
        }

        let Some(existing) = self.load_run(&item_key, request.as_ref()).await? else {
            warn!(item_key, "close declined, no run on record");
            self.finalize_request(request.as_ref(), RequestOutcome::Declined, Some(DeclineReason::NotFound.as_str()))
                .await;
            return Ok(CloseRunResult {
                closed: false,
                run: None,
                reason: Some(DeclineReason::NotFound),
            });
        };

        let rejected = input.decision == CloseDecision::Rejected;
        let (status, review_state) = if rejected {
            (RunStatus::Rejected, ReviewState::Rejected)
        } else {
            (RunStatus::Approved, ReviewState::Approved)
        };
        let now = now_iso(&self.clock);
        self.record_request_start(request.as_ref(), existing.search_query.as_deref())
            .await;

        let update = RunStatusUpdate {
            item_key: item_key.clone(),
            expected_status: None,
            status,
            search_query: None,
            review_state,
            reviewed_by: trimmed(input.reviewed_by.as_deref())
                .or_else(|| existing.reviewed_by.clone()),
            last_review_decision: Some(input.decision.as_str().to_string()),
            last_review_notes: trimmed(input.notes.as_deref())
                .or_else(|| existing.last_review_notes.clone()),
            retry_count: if rejected { 0 } else { existing.retry_count },
            next_retry_at: if rejected {
                None
            } else {
                existing.next_retry_at.clone()
            },
            last_error: if rejected {
                None
            } else {
                existing.last_error.clone()
            },
            last_attempt_at: existing.last_attempt_at.clone(),
            last_modified: now.clone(),
        };
        match self.store.update_status(&update).await {
            Ok(true) => {}
            Ok(false) => {
                let err = anyhow!("failed to close enrichment run");
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            }
            Err(err) => {
                error!(item_key, error = %err, "failed to close enrichment run");
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            }
        }

        self.emit_audit(
            input.actor.as_deref(),
            &item_key,
            "RunClosed",
            serde_json::json!({
                "previousStatus": existing.status.as_str(),
                "decision": input.decision.as_str(),
                "reviewedBy": trimmed(input.reviewed_by.as_deref()),
                "closedAt": now,
            }),
        )
        .await;

        self.finalize_request(request.as_ref(), RequestOutcome::Success, None)
            .await;
        info!(item_key, decision = input.decision.as_str(), "enrichment run closed");
        let run = self.load_run(&item_key, request.as_ref()).await?;
        Ok(CloseRunResult {
            closed: true,
            run,
            reason: None,
        })
    }

    pub async fn status(&self, item_key: &str) -> Result<Option<EnrichmentRun>> {
        let trimmed_key = item_key.trim();
        if trimmed_key.is_empty() {
            warn!("status lookup without item key");
            return Ok(None);
        }
        self.store.get(trimmed_key).await
    }

    pub async fn health(&self, request: Option<RequestContext>) -> HealthStatus {
        let request = normalize_request(request);
        self.snapshot_request(request.as_ref()).await;
        self.record_request_start(request.as_ref(), None).await;

        let counts = async {
            let queued = self.store.count_by_status(RunStatus::Queued).await?;
            let running = self.store.count_by_status(RunStatus::Running).await?;
            let last_updated_at = self.store.latest_modified().await?;
            anyhow::Ok((queued, running, last_updated_at))
        }
        .await;

        match counts {
            Ok((queued_count, running_count, last_updated_at)) => {
                self.finalize_request(request.as_ref(), RequestOutcome::Success, None)
                    .await;
                HealthStatus {
                    ok: true,
                    queued_count,
                    running_count,
                    last_updated_at,
                    message: None,
                }
            }
            Err(err) => {
                error!(error = %err, "failed to compute enrichment health");
                self.finalize_request(request.as_ref(), RequestOutcome::Failed, Some(&err.to_string()))
                    .await;
                HealthStatus {
                    ok: false,
                    queued_count: 0,
                    running_count: 0,
                    last_updated_at: None,
                    message: Some(err.to_string()),
                }
            }
        }
    }
}
