use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pool::WorkspacePool;
use super::provision::Provisioner;
use super::PoolError;

/// How the replenishment task ended during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStop {
    /// The task was never started.
    NotRunning,
    /// The in-flight pass finished within the first budget.
    Graceful,
    /// The task had to be aborted and finished within the second budget.
    Forced,
    /// The task did not finish even after the abort.
    Abandoned,
}

/// Result of one replenishment pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome {
    /// Workspaces added to the pool.
    pub offered: usize,
    /// Workspaces deleted because the pool filled while they were created.
    pub orphaned: usize,
    /// The pass ended on a provisioning failure.
    pub failed: bool,
}

/// Background task keeping the pool topped up with default workspaces.
///
/// There is exactly one task per scheduler and passes run back to back with a
/// fixed delay in between, so two passes never overlap.
pub struct ReplenishmentScheduler {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ReplenishmentScheduler {
    pub fn spawn(
        provisioner: Arc<Provisioner>,
        pool: Arc<WorkspacePool>,
        period: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            run(provisioner, pool, period, token).await;
        });
        Self { task, cancel }
    }

    /// Ask the task to finish after its current pass without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the task in two stages.
    ///
    /// Cancellation ends the pass before its next create and cuts short any
    /// start wait (deleting that workspace), so first wait `graceful` for the
    /// pass to end. If a create call is still running, abort it and wait up
    /// to `forced` more. A workspace whose create was aborted may be left
    /// behind remotely.
    pub async fn stop(self, graceful: Duration, forced: Duration) -> SchedulerStop {
        let Self { mut task, cancel } = self;
        cancel.cancel();

        info!(
            timeout_secs = graceful.as_secs(),
            "stopping workspace replenishment, waiting for the current pass"
        );
        if let Ok(joined) = tokio::time::timeout(graceful, &mut task).await {
            if let Err(e) = joined {
                error!(error = %e, "replenishment task ended abnormally");
            }
            info!("workspace replenishment stopped");
            return SchedulerStop::Graceful;
        }

        task.abort();
        warn!(
            timeout_secs = forced.as_secs(),
            "replenishment pass did not finish in time, aborting it"
        );
        match tokio::time::timeout(forced, &mut task).await {
            Ok(_) => {
                info!("workspace replenishment aborted");
                SchedulerStop::Forced
            }
            Err(_) => {
                error!("couldn't stop workspace replenishment task");
                SchedulerStop::Abandoned
            }
        }
    }
}

async fn run(
    provisioner: Arc<Provisioner>,
    pool: Arc<WorkspacePool>,
    period: Duration,
    cancel: CancellationToken,
) {
    info!(capacity = pool.capacity(), "initializing workspace pool");
    while !cancel.is_cancelled() {
        let outcome = replenish_once(&provisioner, &pool, &cancel).await;
        if outcome != PassOutcome::default() {
            debug!(
                offered = outcome.offered,
                orphaned = outcome.orphaned,
                failed = outcome.failed,
                "replenishment pass finished"
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
    }
}

/// Provision default workspaces until the pool is full.
///
/// A failed provisioning ends the pass; the next pass tries again. A
/// workspace that no longer fits when offered is deleted here, since
/// nobody else owns it.
pub async fn replenish_once(
    provisioner: &Provisioner,
    pool: &WorkspacePool,
    cancel: &CancellationToken,
) -> PassOutcome {
    let mut outcome = PassOutcome::default();

    while !cancel.is_cancelled() && pool.remaining_capacity().await > 0 {
        let handle = match provisioner.provision_default(cancel).await {
            Ok(handle) => handle,
            Err(PoolError::ShuttingDown) => {
                debug!("replenishment cancelled while a workspace was starting");
                break;
            }
            Err(e) => {
                warn!(error = %e, "failed to provision pool workspace, retrying next pass");
                outcome.failed = true;
                break;
            }
        };

        match pool.offer(handle).await {
            Ok(()) => outcome.offered += 1,
            Err(race) => {
                let handle = race.into_inner();
                warn!(
                    name = %handle.name(),
                    "workspace can't be added into the pool and will be destroyed"
                );
                outcome.orphaned += 1;
                provisioner.metrics().record_orphan_deleted();
                if let Err(e) = provisioner.delete(handle).await {
                    provisioner.metrics().record_delete_failure();
                    error!(error = %e, "failed to delete orphaned workspace");
                }
            }
        }
    }

    outcome
}
