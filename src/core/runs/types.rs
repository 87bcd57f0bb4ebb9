use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

/// Injected time source. Nothing in the engine reads ambient time directly,
/// so tests can pin the clock and get byte-stable timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

pub fn now_iso(clock: &Clock) -> String {
    (clock)().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Queued,
    Running,
    Review,
    Approved,
    Rejected,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Review => "review",
            RunStatus::Approved => "approved",
            RunStatus::Rejected => "rejected",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "not_started" => Some(RunStatus::NotStarted),
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "review" => Some(RunStatus::Review),
            "approved" => Some(RunStatus::Approved),
            "rejected" => Some(RunStatus::Rejected),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Approved | RunStatus::Rejected | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// States a run may be admitted (queued) from via `start`. Everything
    /// else already has work in flight.
    pub fn is_startable(self) -> bool {
        matches!(self, RunStatus::NotStarted) || self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    NotRequired,
    Pending,
    Approved,
    Rejected,
}

impl ReviewState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewState::NotRequired => "not_required",
            ReviewState::Pending => "pending",
            ReviewState::Approved => "approved",
            ReviewState::Rejected => "rejected",
        }
    }

    pub fn from_state(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "not_required" => Some(ReviewState::NotRequired),
            "pending" => Some(ReviewState::Pending),
            "approved" => Some(ReviewState::Approved),
            "rejected" => Some(ReviewState::Rejected),
            _ => None,
        }
    }
}

/// One persisted run per catalog entry key.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnrichmentRun {
    pub id: i64,
    pub item_key: String,
    pub search_query: Option<String>,
    pub status: RunStatus,
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

/// Fully-populated review snapshot after normalization. Every field is
/// present; unknown booleans stay `None` rather than collapsing to `false`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReviewMetadata {
    pub decision: Option<String>,
    pub state: Option<ReviewState>,
    pub information_present: Option<bool>,
    pub bad_format: Option<bool>,
    pub wrong_information: Option<bool>,
    pub wrong_physical_dimensions: Option<bool>,
    pub missing_spec: Vec<String>,
    pub unneeded_spec: Vec<String>,
    pub notes: Option<String>,
    pub reviewed_by: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RequestNotification {
    pub completed_at: Option<String>,
    pub error: Option<String>,
}

/// Idempotency context forwarded by the external trigger. The ledger is the
/// sole writer of the backing table; operations only hand it events.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub id: String,
    pub payload: Option<serde_json::Value>,
    pub notification: Option<RequestNotification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failed,
    Declined,
    Cancelled,
}

impl RequestOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestOutcome::Success => "SUCCESS",
            RequestOutcome::Failed => "FAILED",
            RequestOutcome::Declined => "DECLINED",
            RequestOutcome::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclineReason {
    MissingItemId,
    MissingSearchQuery,
    NotFound,
    NotStarted,
    RunAlreadyInProgress,
}

impl DeclineReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DeclineReason::MissingItemId => "missing-item-id",
            DeclineReason::MissingSearchQuery => "missing-search-query",
            DeclineReason::NotFound => "not-found",
            DeclineReason::NotStarted => "not-started",
            DeclineReason::RunAlreadyInProgress => "run-already-in-progress",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartRunInput {
    pub item_key: String,
    pub search_query: Option<String>,
    pub actor: Option<String>,
    pub context: Option<String>,
    /// Loose review bag from the external caller; normalized in one place.
    pub review: Option<serde_json::Value>,
    pub request: Option<RequestContext>,
}

#[derive(Debug, Clone, Default)]
pub struct RestartRunInput {
    pub item_key: String,
    pub search_query: Option<String>,
    pub actor: Option<String>,
    pub context: Option<String>,
    pub review: Option<serde_json::Value>,
    /// With no review payload: `true` clears stored review metadata,
    /// `false` preserves it.
    pub replace_review_metadata: bool,
    pub previous_status: Option<RunStatus>,
    pub request: Option<RequestContext>,
}

#[derive(Debug, Clone, Default)]
pub struct CancelRunInput {
    pub item_key: String,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub request: Option<RequestContext>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteRunInput {
    pub item_key: String,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub request: Option<RequestContext>,
}

/// Settled external call reporting back through the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RecordOutcomeInput {
    pub item_key: String,
    pub needs_review: bool,
    pub error: Option<String>,
    pub search_query: Option<String>,
    pub review: Option<serde_json::Value>,
    pub actor: Option<String>,
    pub request: Option<RequestContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    Approved,
    Rejected,
}

impl CloseDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseDecision::Approved => "approved",
            CloseDecision::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloseRunInput {
    pub item_key: String,
    pub decision: CloseDecision,
    pub reviewed_by: Option<String>,
    pub notes: Option<String>,
    pub actor: Option<String>,
    pub request: Option<RequestContext>,
}

#[derive(Debug, Clone)]
pub struct StartRunResult {
    pub queued: bool,
    pub created: bool,
    pub run: Option<EnrichmentRun>,
    pub reason: Option<DeclineReason>,
}

impl StartRunResult {
    pub fn declined(reason: DeclineReason, run: Option<EnrichmentRun>, created: bool) -> Self {
        Self {
            queued: false,
            created,
            run,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelRunResult {
    pub cancelled: bool,
    pub run: Option<EnrichmentRun>,
    pub reason: Option<DeclineReason>,
}

#[derive(Debug, Clone)]
pub struct DeleteRunResult {
    pub deleted: bool,
    pub run: Option<EnrichmentRun>,
    pub reason: Option<DeclineReason>,
}

#[derive(Debug, Clone)]
pub struct OutcomeRunResult {
    pub recorded: bool,
    pub run: Option<EnrichmentRun>,
    pub reason: Option<DeclineReason>,
}

#[derive(Debug, Clone)]
pub struct CloseRunResult {
    pub closed: bool,
    pub run: Option<EnrichmentRun>,
    pub reason: Option<DeclineReason>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub queued_count: i64,
    pub running_count: i64,
    pub last_updated_at: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatchReport {
    pub scheduled: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResumeReport {
    pub resumed: usize,
    pub skipped: usize,
    pub failed: usize,
}
