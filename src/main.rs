use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use enrichd::core::config::Config;
use enrichd::core::runs::invoker::{HttpInvoker, Invoker};
use enrichd::core::runs::{DispatchGate, ResumeSweep, system_clock};
use enrichd::core::store::{RunStore, SqliteStore};

async fn run() -> Result<()> {
    enrichd::logging::init();
    let config = Config::load()?;
    info!(db = %config.db_path.display(), "starting enrichd");

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let run_store: Arc<dyn RunStore> = store.clone();
    let invoker: Arc<dyn Invoker> = Arc::new(HttpInvoker::new(config.invoker_url.as_str()));
    let clock = system_clock();

    // Re-arm whatever a previous lifetime left queued or running before the
    // dispatch cadence starts admitting new work.
    let sweep = ResumeSweep::new(run_store.clone(), invoker.clone(), clock.clone());
    let report = sweep.resume().await;
    info!(
        resumed = report.resumed,
        skipped = report.skipped,
        failed = report.failed,
        "startup resume sweep finished"
    );

    let gate = Arc::new(
        DispatchGate::new(run_store, invoker, clock).with_slots(config.dispatch_slots),
    );
    let dispatch_limit = config.dispatch_limit;

    let mut scheduler = JobScheduler::new().await?;
    let tick_gate = gate.clone();
    let dispatch_job = Job::new_async(config.dispatch_cron.as_str(), move |_id, _scheduler| {
        let gate = tick_gate.clone();
        Box::pin(async move {
            let report = gate.dispatch(dispatch_limit).await;
            if report.scheduled > 0 || report.failed > 0 {
                info!(
                    scheduled = report.scheduled,
                    skipped = report.skipped,
                    failed = report.failed,
                    "dispatch tick"
                );
            }
        })
    })?;
    scheduler.add(dispatch_job).await?;
    scheduler.start().await?;
    info!("enrichd ready");

    tokio::signal::ctrl_c().await?;
    scheduler.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("enrichd exited with error: {e:#}");
        std::process::exit(1);
    }
}
