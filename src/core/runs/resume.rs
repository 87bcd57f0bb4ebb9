use std::sync::Arc;

use tracing::{error, info, warn};

use super::dispatch::launch;
use super::invoker::Invoker;
use super::review::review_from_run;
use super::types::{Clock, ResumeReport};
use crate::core::store::RunStore;

/// Startup sweep: re-arm every run a previous process lifetime left in
/// `Queued` or `Running`. The sweep only schedules work; the spawned tasks
/// settle each run on their own.
pub struct ResumeSweep {
    store: Arc<dyn RunStore>,
    invoker: Arc<dyn Invoker>,
    clock: Clock,
}

impl ResumeSweep {
    pub fn new(store: Arc<dyn RunStore>, invoker: Arc<dyn Invoker>, clock: Clock) -> Self {
        Self {
            store,
            invoker,
            clock,
        }
    }

    pub async fn resume(&self) -> ResumeReport {
        let mut report = ResumeReport::default();

        let stale = match self.store.fetch_resumable().await {
            Ok(runs) => runs,
            Err(err) => {
                error!(error = %err, "failed to query stale enrichment runs for resume");
                report.failed = 1;
                return report;
            }
        };

        if stale.is_empty() {
            info!("no stale enrichment runs found at startup");
            return report;
        }

        info!(count = stale.len(), "resuming stale enrichment runs");

        for run in stale {
            let query = run
                .search_query
                .as_deref()
                .map(str::trim)
                .unwrap_or_default();
            if query.is_empty() {
                report.skipped += 1;
                warn!(
                    item_key = %run.item_key,
                    status = run.status.as_str(),
                    "skipping stale run without search query"
                );
                continue;
            }

            let store = Arc::clone(&self.store);
            let invoker = Arc::clone(&self.invoker);
            let clock = Arc::clone(&self.clock);
            let review = review_from_run(&run);
            tokio::spawn(async move {
                // Failures mark the run and are logged inside launch;
                // nothing here to propagate to.
                let _ = launch(
                    &store,
                    &invoker,
                    &clock,
                    &run,
                    review.as_ref(),
                    None,
                    None,
                    None,
                )
                .await;
            });
            report.resumed += 1;
        }

        info!(
            resumed = report.resumed,
            skipped = report.skipped,
            failed = report.failed,
            "stale enrichment run sweep complete"
        );
        report
    }
}
