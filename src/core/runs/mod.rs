mod dispatch;
pub mod invoker;
mod orchestrator;
mod resume;
pub mod review;
pub mod types;

pub use dispatch::DispatchGate;
pub use invoker::{HttpInvoker, InvocationOutcome, InvocationRequest, Invoker};
pub use orchestrator::RunOrchestrator;
pub use resume::ResumeSweep;
pub use review::{normalize_review_payload, resolve_review_metadata};
pub use types::{
    CancelRunInput, CancelRunResult, Clock, CloseDecision, CloseRunInput, CloseRunResult,
    DeclineReason, DeleteRunInput, DeleteRunResult, DispatchReport, EnrichmentRun, HealthStatus,
    OutcomeRunResult, RecordOutcomeInput, RequestContext, RequestNotification, RequestOutcome,
    RestartRunInput, ResumeReport, ReviewMetadata, ReviewState, RunStatus, StartRunInput,
    StartRunResult, system_clock,
};

/// Legal status transitions. `start` admissions are covered by
/// [`RunStatus::is_startable`]; this table is the full edge set, including
/// the dispatch and review edges driven elsewhere.
pub fn can_transition(from: RunStatus, to: RunStatus) -> bool {
    if from == to {
        return true;
    }
    match to {
        // Restart re-admits from anywhere; start is narrower and checked
        // via `is_startable`.
        RunStatus::Queued => true,
        // Cancel is gated on existence, not state.
        RunStatus::Cancelled => true,
        // Review decisions, including the close shortcut from any state.
        RunStatus::Approved | RunStatus::Rejected => true,
        // Only the dispatch gate / resume sweep arm a run.
        RunStatus::Running => from == RunStatus::Queued,
        RunStatus::Review => from == RunStatus::Running,
        RunStatus::Failed => matches!(from, RunStatus::Queued | RunStatus::Running),
        // Only a delete recreates the shell.
        RunStatus::NotStarted => false,
    }
}

#[cfg(test)]
mod tests;
