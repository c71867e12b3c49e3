//! Built-in interval scheduler.
//!
//! Runs a due-feeds batch every poll interval, the same work the cron
//! endpoint does, for deployments without an external cron.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::pipeline::{BatchScope, CancelHandle, Orchestrator, RunSignal};

/// Spawns the scheduler loop. It runs a batch immediately, then once per
/// `period`, and exits once `shutdown` is cancelled.
pub fn spawn_scheduler(
    orchestrator: Arc<Orchestrator>,
    period: Duration,
    run_budget: Option<Duration>,
    shutdown: Arc<CancelHandle>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_scheduler(&orchestrator, period, run_budget, &shutdown).await;
    })
}

async fn run_scheduler(
    orchestrator: &Orchestrator,
    period: Duration,
    run_budget: Option<Duration>,
    shutdown: &CancelHandle,
) {
    let mut ticker = tokio::time::interval(period);
    // A batch that overruns the period should not trigger a burst of catch-up runs
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let stop = RunSignal::unbounded().cancellable_by(shutdown);

    tracing::info!(period_secs = period.as_secs(), "scheduler: started");

    while stop.guard(ticker.tick()).await.is_ok() {
        let signal = RunSignal::with_budget(run_budget).cancellable_by(shutdown);
        match orchestrator.run_batch(BatchScope::Due, &signal).await {
            Ok(batch) => tracing::info!(
                processed = batch.processed_feeds,
                total = batch.total_feeds,
                imported = batch.total_imported,
                "scheduler: batch complete"
            ),
            Err(e) => tracing::error!(kind = e.kind(), error = %e, "scheduler: batch failed"),
        }
    }

    tracing::info!("scheduler: stopped");
}
