use std::sync::Arc;

use super::support::{MemoryStore, MockInvoker, fixed_clock, make_run};
use crate::core::runs::DispatchGate;
use crate::core::runs::types::{DispatchReport, RunStatus};

fn gate(store: Arc<MemoryStore>, invoker: Arc<MockInvoker>) -> DispatchGate {
    DispatchGate::new(store, invoker, fixed_clock("2024-01-01T00:00:00Z"))
}

#[tokio::test]
async fn occupied_slot_short_circuits_before_the_queue() {
    let store = Arc::new(MemoryStore::with_runs(vec![
        make_run("busy", RunStatus::Running),
        make_run("waiting", RunStatus::Queued),
    ]));
    let invoker = Arc::new(MockInvoker::default());

    let report = gate(store.clone(), invoker.clone()).dispatch(5).await;

    assert_eq!(report, DispatchReport::default());
    assert_eq!(store.queued_fetch_count(), 0, "queue must not be touched");
    assert_eq!(invoker.call_count(), 0);
    assert_eq!(store.run("waiting").unwrap().status, RunStatus::Queued);
}

#[tokio::test]
async fn queued_fetch_is_capped_by_the_free_slot_not_the_limit() {
    let store = Arc::new(MemoryStore::default());
    let invoker = Arc::new(MockInvoker::default());

    gate(store.clone(), invoker).dispatch(5).await;

    let limits = store.queued_fetch_limits.lock().unwrap().clone();
    assert_eq!(limits, vec![1]);
}

#[tokio::test]
async fn wider_gates_fetch_up_to_their_slots() {
    let store = Arc::new(MemoryStore::default());
    let invoker = Arc::new(MockInvoker::default());
    let gate = DispatchGate::new(store.clone(), invoker, fixed_clock("2024-01-01T00:00:00Z"))
        .with_slots(3);

    gate.dispatch(2).await;
    gate.dispatch(8).await;

    let limits = store.queued_fetch_limits.lock().unwrap().clone();
    assert_eq!(limits, vec![2, 3]);
}

#[tokio::test]
async fn dispatch_arms_a_queued_run_and_invokes() {
    let mut queued = make_run("X", RunStatus::Queued);
    queued.retry_count = 1;
    let store = Arc::new(MemoryStore::with_runs(vec![queued]));
    let invoker = Arc::new(MockInvoker::default());

    let report = gate(store.clone(), invoker.clone()).dispatch(5).await;

    assert_eq!(report.scheduled, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(invoker.call_count(), 1);
    let call = invoker.calls.lock().unwrap()[0].clone();
    assert_eq!(call.item_key, "X");
    assert_eq!(call.search_query, "stored query");

    let run = store.run("X").unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.retry_count, 2);
    assert_eq!(run.next_retry_at, None);
    assert_eq!(run.last_error, None);
    assert!(run.last_attempt_at.is_some());
}

#[tokio::test]
async fn invocation_failure_marks_the_run_failed_and_continues_counting() {
    let store = Arc::new(MemoryStore::with_runs(vec![make_run("X", RunStatus::Queued)]));
    let invoker = Arc::new(MockInvoker::rejecting("service said no"));

    let report = gate(store.clone(), invoker).dispatch(5).await;

    assert_eq!(report.scheduled, 0);
    assert_eq!(report.failed, 1);
    let run = store.run("X").unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.last_error.as_deref(), Some("service said no"));
}

#[tokio::test]
async fn blank_query_rows_are_skipped_and_settled_failed() {
    let mut blank = make_run("X", RunStatus::Queued);
    blank.search_query = Some("   ".to_string());
    let store = Arc::new(MemoryStore::with_runs(vec![blank]));
    let invoker = Arc::new(MockInvoker::default());

    let report = gate(store.clone(), invoker.clone()).dispatch(5).await;

    assert_eq!(report.skipped, 1);
    assert_eq!(invoker.call_count(), 0);
    let run = store.run("X").unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.last_error.as_deref(), Some("missing-search-query"));
}

#[tokio::test]
async fn stored_review_metadata_rides_along_to_the_invoker() {
    let mut queued = make_run("X", RunStatus::Queued);
    queued.last_review_decision = Some("reject".to_string());
    queued.last_review_notes = Some("fix the width".to_string());
    queued.reviewed_by = Some("reviewer-1".to_string());
    let store = Arc::new(MemoryStore::with_runs(vec![queued]));
    let invoker = Arc::new(MockInvoker::default());

    gate(store.clone(), invoker.clone()).dispatch(1).await;

    let call = invoker.calls.lock().unwrap()[0].clone();
    let review = call.review.expect("review snapshot forwarded");
    assert_eq!(review.decision.as_deref(), Some("reject"));
    assert_eq!(review.notes.as_deref(), Some("fix the width"));

    // The mark-running write-site keeps the snapshot on the row.
    let run = store.run("X").unwrap();
    assert_eq!(run.last_review_decision.as_deref(), Some("reject"));
    assert_eq!(run.reviewed_by.as_deref(), Some("reviewer-1"));
}

#[tokio::test]
async fn zero_limit_falls_back_to_the_default_batch() {
    let store = Arc::new(MemoryStore::default());
    let invoker = Arc::new(MockInvoker::default());
    let gate = DispatchGate::new(store.clone(), invoker, fixed_clock("2024-01-01T00:00:00Z"))
        .with_slots(10);

    gate.dispatch(0).await;

    let limits = store.queued_fetch_limits.lock().unwrap().clone();
    assert_eq!(limits, vec![5]);
}
