pub mod handle;
pub mod pool;
pub mod provision;
pub mod replenish;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub use handle::{MemorySize, WorkspaceHandle, WorkspaceStatus};
pub use pool::{CapacityRace, WorkspacePool};
pub use provision::{DefaultProfile, Provisioner, StatusPolicy};
pub use replenish::{ReplenishmentScheduler, SchedulerStop};

use crate::config::{Config, ShutdownConfig};
use crate::gateway::{GatewayError, Owner, RemoteStatus, WorkspaceGateway};
use crate::metrics::{AcquireSource, MetricsRegistry};
use crate::naming::NameGenerator;

/// Errors surfaced to callers of the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(
        "workspace {name} did not reach {expected} within {}s (last status: {actual})",
        .waited.as_secs()
    )]
    StatusTimeout {
        name: String,
        expected: RemoteStatus,
        actual: RemoteStatus,
        waited: Duration,
    },

    #[error("workspace {name} is unusable, remote status is {status}")]
    Unusable { name: String, status: RemoteStatus },

    #[error("no pooled workspace became available within {}s", .0.as_secs())]
    AcquireTimeout(Duration),

    #[error("workspace pool is shutting down")]
    ShuttingDown,
}

/// Manager lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// What a call to [`PoolManager::shutdown`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub scheduler: SchedulerStop,
    /// Drained workspaces deleted remotely.
    pub deleted: usize,
    /// Drained workspaces whose delete failed or timed out.
    pub delete_failures: usize,
}

impl Default for ShutdownReport {
    fn default() -> Self {
        Self {
            scheduler: SchedulerStop::NotRunning,
            deleted: 0,
            delete_failures: 0,
        }
    }
}

/// Entry point for acquiring workspaces.
///
/// Requests matching the default profile are served from the warm pool;
/// anything else is provisioned on demand. The manager owns the pool and the
/// replenishment task and tears both down in [`shutdown`](Self::shutdown).
///
/// Dropping a manager without calling `shutdown` only cancels replenishment:
/// workspaces still in the pool, and one a pass was creating at that moment,
/// are not deleted remotely.
pub struct PoolManager {
    provisioner: Arc<Provisioner>,
    pool: Arc<WorkspacePool>,
    scheduler: Mutex<Option<ReplenishmentScheduler>>,
    state: watch::Sender<ManagerState>,
    replenish_interval: Duration,
    acquire_timeout: Option<Duration>,
    shutdown: ShutdownConfig,
}

impl PoolManager {
    pub fn new(
        config: &Config,
        gateway: Arc<dyn WorkspaceGateway>,
        names: Arc<dyn NameGenerator>,
        metrics: MetricsRegistry,
    ) -> Self {
        let defaults = &config.defaults;
        let profile = DefaultProfile {
            owner: defaults.owner(),
            memory_gb: defaults.memory_gb,
            template: defaults.template.clone(),
            name_prefix: defaults.name_prefix.clone(),
        };
        let status_policy = StatusPolicy {
            poll_interval: config.start.poll_interval(),
            timeout: config.start.timeout(),
        };
        let (state, _) = watch::channel(ManagerState::Running);

        Self {
            provisioner: Arc::new(Provisioner::new(
                gateway,
                names,
                profile,
                status_policy,
                metrics,
            )),
            pool: Arc::new(WorkspacePool::new(config.pool.capacity())),
            scheduler: Mutex::new(None),
            state,
            replenish_interval: config.pool.replenish_interval(),
            acquire_timeout: config.pool.acquire_timeout(),
            shutdown: config.shutdown.clone(),
        }
    }

    /// Start keeping the pool warm. Calling it again while running is a no-op.
    pub async fn start(&self) -> Result<(), PoolError> {
        let mut scheduler = self.scheduler.lock().await;
        if self.state() != ManagerState::Running {
            return Err(PoolError::ShuttingDown);
        }
        if scheduler.is_none() {
            info!(
                capacity = self.pool.capacity(),
                interval_ms = self.replenish_interval.as_millis() as u64,
                "starting workspace replenishment"
            );
            *scheduler = Some(ReplenishmentScheduler::spawn(
                Arc::clone(&self.provisioner),
                Arc::clone(&self.pool),
                self.replenish_interval,
            ));
        }
        Ok(())
    }

    /// Get a running workspace.
    ///
    /// Default-profile requests wait for a pooled workspace and re-check that
    /// it is still running, starting it if needed. A pooled workspace that
    /// can't be brought back is deleted and the error returned. Other requests
    /// are provisioned directly and pay the full provisioning latency.
    ///
    /// Dropping the returned future while a pooled workspace is being
    /// confirmed deletes that workspace.
    pub async fn acquire(
        &self,
        owner: &Owner,
        memory_gb: u32,
        template: &str,
    ) -> Result<WorkspaceHandle, PoolError> {
        if self.state() != ManagerState::Running {
            return Err(PoolError::ShuttingDown);
        }
        let started = Instant::now();
        let metrics = self.provisioner.metrics();

        if !self.provisioner.profile().matches(owner, memory_gb, template) {
            debug!(
                owner = %owner.email,
                memory_gb,
                template,
                "non-default parameters, provisioning workspace directly"
            );
            let handle = self
                .provisioner
                .provision(owner.clone(), memory_gb, template.to_string())
                .await?;
            metrics.record_acquire(AcquireSource::Direct, started.elapsed());
            return Ok(handle);
        }

        let handle = self.take_pooled().await?;
        let handle = self.confirm_pooled(handle).await?;
        metrics.record_acquire(AcquireSource::Pooled, started.elapsed());
        info!(
            name = %handle.name(),
            id = %handle.id(),
            wait_ms = started.elapsed().as_millis() as u64,
            "workspace acquired from pool"
        );
        Ok(handle)
    }

    async fn take_pooled(&self) -> Result<WorkspaceHandle, PoolError> {
        match self.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, self.pool.acquire())
                .await
                .map_err(|_| PoolError::AcquireTimeout(limit))?,
            None => self.pool.acquire().await,
        }
    }

    /// Make sure a pooled workspace is running before handing it out.
    ///
    /// The check runs in its own task, which owns the handle until the caller
    /// receives it. If the caller goes away first, the task deletes the
    /// workspace instead of dropping it.
    async fn confirm_pooled(
        &self,
        mut handle: WorkspaceHandle,
    ) -> Result<WorkspaceHandle, PoolError> {
        let provisioner = Arc::clone(&self.provisioner);
        let (mut tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let confirmed = tokio::select! {
                result = provisioner.ensure_running(&mut handle) => Some(result),
                _ = tx.closed() => None,
            };
            let result = match confirmed {
                Some(Ok(())) => Ok(handle),
                Some(Err(e)) => {
                    warn!(
                        name = %handle.name(),
                        error = %e,
                        "pooled workspace is not usable, deleting it"
                    );
                    dispose(&provisioner, handle).await;
                    Err(e)
                }
                None => {
                    warn!(
                        name = %handle.name(),
                        "acquire abandoned while confirming workspace, deleting it"
                    );
                    dispose(&provisioner, handle).await;
                    return;
                }
            };
            if let Err(Ok(handle)) = tx.send(result) {
                warn!(
                    name = %handle.name(),
                    "acquire abandoned after confirming workspace, deleting it"
                );
                dispose(&provisioner, handle).await;
            }
        });

        rx.await.map_err(|_| PoolError::ShuttingDown)?
    }

    /// Delete a workspace the caller is done with.
    pub async fn release(&self, handle: WorkspaceHandle) -> Result<(), PoolError> {
        if let Err(e) = self.provisioner.delete(handle).await {
            self.provisioner.metrics().record_delete_failure();
            return Err(e.into());
        }
        Ok(())
    }

    /// Stop a workspace and wait until it reports stopped.
    pub async fn stop_workspace(&self, handle: &mut WorkspaceHandle) -> Result<(), PoolError> {
        self.provisioner.stop(handle).await
    }

    pub fn state(&self) -> ManagerState {
        *self.state.borrow()
    }

    pub async fn ready_count(&self) -> usize {
        self.pool.ready_count().await
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Stop replenishment, drain the pool and delete every drained workspace.
    ///
    /// Always ends in [`ManagerState::Stopped`], whatever the scheduler or
    /// the deletes did. Concurrent or repeated calls wait for the first one to
    /// finish and return an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let first = self.state.send_if_modified(|state| {
            if *state == ManagerState::Running {
                *state = ManagerState::Stopping;
                true
            } else {
                false
            }
        });
        if !first {
            let mut rx = self.state.subscribe();
            let _ = rx.wait_for(|state| *state == ManagerState::Stopped).await;
            return ShutdownReport::default();
        }

        info!("shutting down workspace pool");
        let mut report = ShutdownReport::default();

        let scheduler = self.scheduler.lock().await.take();
        if let Some(scheduler) = scheduler {
            report.scheduler = scheduler
                .stop(
                    self.shutdown.graceful_timeout(),
                    self.shutdown.forced_timeout(),
                )
                .await;
        }

        let drained = self.pool.drain().await;
        let delete_timeout = self.shutdown.delete_timeout();
        for handle in drained {
            let name = handle.name().to_string();
            match tokio::time::timeout(delete_timeout, self.provisioner.delete(handle)).await {
                Ok(Ok(())) => report.deleted += 1,
                Ok(Err(e)) => {
                    report.delete_failures += 1;
                    self.provisioner.metrics().record_delete_failure();
                    error!(name = %name, error = %e, "failed to delete workspace");
                }
                Err(_) => {
                    report.delete_failures += 1;
                    self.provisioner.metrics().record_delete_failure();
                    error!(
                        name = %name,
                        timeout_secs = delete_timeout.as_secs(),
                        "timed out deleting workspace"
                    );
                }
            }
        }

        self.state.send_replace(ManagerState::Stopped);
        info!(
            scheduler = ?report.scheduler,
            deleted = report.deleted,
            delete_failures = report.delete_failures,
            "workspace pool stopped"
        );
        report
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.get_mut().take() {
            warn!(
                abandoned = self.pool.try_ready_count(),
                "pool manager dropped without shutdown, cancelling replenishment; \
                 pooled workspaces are not deleted"
            );
            scheduler.cancel();
        }
    }
}

async fn dispose(provisioner: &Provisioner, handle: WorkspaceHandle) {
    if let Err(e) = provisioner.delete(handle).await {
        provisioner.metrics().record_delete_failure();
        error!(error = %e, "failed to delete unusable workspace");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{SimulatedGateway, SimulatorConfig, WorkspaceId};
    use crate::naming::RandomNames;
    use tokio_util::sync::CancellationToken;

    fn admin() -> Owner {
        Owner::new("admin", "admin@che")
    }

    fn config(threads: usize) -> Config {
        let mut config = Config::default();
        config.pool.threads = threads;
        config
    }

    fn manager(config: &Config, gw: &Arc<SimulatedGateway>) -> PoolManager {
        PoolManager::new(
            config,
            Arc::clone(gw) as Arc<dyn WorkspaceGateway>,
            Arc::new(RandomNames::default()),
            MetricsRegistry::new(),
        )
    }

    fn instant_gateway() -> Arc<SimulatedGateway> {
        Arc::new(SimulatedGateway::new(SimulatorConfig::instant()))
    }

    async fn wait_until_full(manager: &PoolManager) {
        while manager.ready_count().await < manager.capacity() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Put a provisioned workspace in the pool by hand and return its id.
    async fn seed_pool(manager: &PoolManager) -> WorkspaceId {
        let handle = manager
            .provisioner
            .provision_default(&CancellationToken::new())
            .await
            .unwrap();
        let id = handle.id().clone();
        manager.pool.offer(handle).await.unwrap();
        id
    }

    #[test]
    fn manager_state_display() {
        assert_eq!(ManagerState::Running.to_string(), "running");
        assert_eq!(ManagerState::Stopping.to_string(), "stopping");
        assert_eq!(ManagerState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn pool_error_messages() {
        let err = PoolError::StatusTimeout {
            name: "workspaceabc123".into(),
            expected: RemoteStatus::Running,
            actual: RemoteStatus::Stopped,
            waited: Duration::from_secs(600),
        };
        assert_eq!(
            err.to_string(),
            "workspace workspaceabc123 did not reach RUNNING within 600s (last status: STOPPED)"
        );
        assert_eq!(
            PoolError::AcquireTimeout(Duration::from_secs(90)).to_string(),
            "no pooled workspace became available within 90s"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn default_request_is_served_from_pool() {
        let gw = instant_gateway();
        let mut cfg = config(4);
        cfg.pool.replenish_interval_ms = 60_000;
        let m = manager(&cfg, &gw);
        m.start().await.unwrap();
        wait_until_full(&m).await;
        assert_eq!(m.capacity(), 2);
        assert_eq!(gw.calls().create, 2);

        // Same identity under another display name still matches.
        let handle = m
            .acquire(&Owner::new("Administrator", "admin@che"), 2, "default")
            .await
            .unwrap();
        assert_eq!(handle.status(), WorkspaceStatus::Running);
        assert_eq!(gw.calls().create, 2);
        assert_eq!(m.ready_count().await, 1);

        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn custom_request_bypasses_pool() {
        let gw = instant_gateway();
        let mut cfg = config(4);
        cfg.pool.replenish_interval_ms = 60_000;
        let m = manager(&cfg, &gw);
        m.start().await.unwrap();
        wait_until_full(&m).await;

        let handle = m.acquire(&admin(), 8, "custom").await.unwrap();
        assert_eq!(handle.memory_bytes(), 8 << 30);
        assert_eq!(handle.template(), "custom");
        assert_eq!(gw.calls().create, 3);
        assert_eq!(m.ready_count().await, 2);

        let other = m
            .acquire(&Owner::new("qa", "qa@che"), 2, "default")
            .await
            .unwrap();
        assert_eq!(other.owner().email, "qa@che");
        assert_eq!(gw.calls().create, 4);
        assert_eq!(m.ready_count().await, 2);

        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_pooled_workspace_is_restarted() {
        let gw = instant_gateway();
        let m = manager(&config(1), &gw);
        let id = seed_pool(&m).await;
        gw.set_status(&id, RemoteStatus::Stopped);

        let handle = m.acquire(&admin(), 2, "default").await.unwrap();
        assert_eq!(handle.id(), &id);
        assert_eq!(handle.status(), WorkspaceStatus::Running);
        assert_eq!(gw.calls().start, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pooled_workspace_that_never_starts_times_out() {
        let gw = instant_gateway();
        let m = manager(&config(1), &gw);
        let id = seed_pool(&m).await;
        gw.set_status(&id, RemoteStatus::Stopped);
        gw.stall_starts(true);

        let started = Instant::now();
        let err = m.acquire(&admin(), 2, "default").await.unwrap_err();
        assert!(matches!(err, PoolError::StatusTimeout { .. }));
        assert!(started.elapsed() <= Duration::from_secs(600));
        // The broken workspace is not leaked.
        assert!(!gw.contains(&id));
    }

    #[tokio::test]
    async fn failed_pooled_workspace_is_unusable() {
        let gw = instant_gateway();
        let m = manager(&config(1), &gw);
        let id = seed_pool(&m).await;
        gw.set_status(&id, RemoteStatus::Failed);

        let err = m.acquire(&admin(), 2, "default").await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::Unusable {
                status: RemoteStatus::Failed,
                ..
            }
        ));
        assert!(!gw.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn pooled_acquire_honours_timeout() {
        let gw = instant_gateway();
        let mut cfg = config(1);
        cfg.pool.acquire_timeout_secs = Some(5);
        let m = manager(&cfg, &gw);

        let started = Instant::now();
        let err = m.acquire(&admin(), 2, "default").await.unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout(d) if d == Duration::from_secs(5)));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn third_waiter_is_served_by_refill() {
        let gw = Arc::new(SimulatedGateway::new(SimulatorConfig {
            create_latency_ms: 1000,
            ..SimulatorConfig::instant()
        }));
        let m = Arc::new(manager(&config(3), &gw));
        m.start().await.unwrap();
        wait_until_full(&m).await;
        assert_eq!(m.capacity(), 2);

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let m = Arc::clone(&m);
                tokio::spawn(async move { m.acquire(&admin(), 2, "default").await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let finished = waiters.iter().filter(|w| w.is_finished()).count();
        assert_eq!(finished, 2);

        let mut ids = Vec::new();
        for waiter in waiters {
            ids.push(waiter.await.unwrap().unwrap().id().clone());
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids.dedup();
        assert_eq!(ids.len(), 3);

        m.shutdown().await;
    }

    #[tokio::test]
    async fn release_deletes_workspace() {
        let gw = instant_gateway();
        let m = manager(&config(1), &gw);
        let handle = m.acquire(&admin(), 4, "default").await.unwrap();
        let id = handle.id().clone();

        m.release(handle).await.unwrap();
        assert!(!gw.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_workspace_waits_for_stopped() {
        let gw = instant_gateway();
        let m = manager(&config(1), &gw);
        let mut handle = m.acquire(&admin(), 4, "default").await.unwrap();

        m.stop_workspace(&mut handle).await.unwrap();
        assert_eq!(handle.status(), WorkspaceStatus::Stopped);
        assert_eq!(gw.status(handle.id()).await.unwrap(), RemoteStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_deletes_resident_and_in_flight_workspaces() {
        let gw = Arc::new(SimulatedGateway::new(SimulatorConfig {
            create_latency_ms: 1000,
            ..SimulatorConfig::instant()
        }));
        let m = manager(&config(5), &gw);
        assert_eq!(m.capacity(), 3);
        m.start().await.unwrap();

        // Two workspaces resident, the third halfway through creation.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(m.ready_count().await, 2);

        let report = m.shutdown().await;
        assert_eq!(report.scheduler, SchedulerStop::Graceful);
        assert_eq!(report.deleted, 3);
        assert_eq!(report.delete_failures, 0);
        assert_eq!(m.state(), ManagerState::Stopped);
        assert_eq!(gw.calls().create, 3);
        assert_eq!(gw.calls().delete, 3);
        assert_eq!(gw.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_idempotent() {
        let gw = instant_gateway();
        let m = manager(&config(4), &gw);
        m.start().await.unwrap();
        wait_until_full(&m).await;

        let first = m.shutdown().await;
        assert_eq!(first.deleted, 2);
        let second = m.shutdown().await;
        assert_eq!(second, ShutdownReport::default());
        assert_eq!(m.state(), ManagerState::Stopped);
        assert_eq!(gw.calls().delete, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_shutdowns_delete_once() {
        let gw = instant_gateway();
        let m = manager(&config(4), &gw);
        m.start().await.unwrap();
        wait_until_full(&m).await;

        let (a, b) = tokio::join!(m.shutdown(), m.shutdown());
        assert_eq!(a.deleted + b.deleted, 2);
        assert_eq!(gw.calls().delete, 2);
        assert_eq!(m.state(), ManagerState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_without_start_reports_no_scheduler() {
        let gw = instant_gateway();
        let m = manager(&config(1), &gw);
        seed_pool(&m).await;

        let report = m.shutdown().await;
        assert_eq!(report.scheduler, SchedulerStop::NotRunning);
        assert_eq!(report.deleted, 1);
    }

    #[tokio::test]
    async fn acquire_after_shutdown_fails_fast() {
        let gw = instant_gateway();
        let m = manager(&config(1), &gw);
        m.shutdown().await;

        let err = m.acquire(&admin(), 2, "default").await.unwrap_err();
        assert!(matches!(err, PoolError::ShuttingDown));
        let err = m.acquire(&admin(), 8, "custom").await.unwrap_err();
        assert!(matches!(err, PoolError::ShuttingDown));
        assert_eq!(gw.calls().create, 0);
        assert!(matches!(m.start().await, Err(PoolError::ShuttingDown)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_blocked_acquirers() {
        let gw = instant_gateway();
        let m = Arc::new(manager(&config(1), &gw));

        let waiter = {
            let m = Arc::clone(&m);
            tokio::spawn(async move { m.acquire(&admin(), 2, "default").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        m.shutdown().await;
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PoolError::ShuttingDown)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_slow_start_leaves_nothing_behind() {
        let gw = Arc::new(SimulatedGateway::new(SimulatorConfig {
            start_latency_ms: 200_000,
            ..SimulatorConfig::instant()
        }));
        let m = manager(&config(1), &gw);
        m.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gw.calls().create, 1);

        let report = m.shutdown().await;
        assert_eq!(report.scheduler, SchedulerStop::Graceful);
        assert_eq!(gw.calls().delete, 1);
        assert_eq!(gw.live_count(), 0);
        assert_eq!(m.state(), ManagerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_acquire_deletes_restarting_workspace() {
        let gw = Arc::new(SimulatedGateway::new(SimulatorConfig {
            start_latency_ms: 20_000,
            ..SimulatorConfig::instant()
        }));
        let m = manager(&config(1), &gw);
        let id = seed_pool(&m).await;
        gw.set_status(&id, RemoteStatus::Stopped);

        let result =
            tokio::time::timeout(Duration::from_secs(1), m.acquire(&admin(), 2, "default")).await;
        assert!(result.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!gw.contains(&id));
        let report = m.shutdown().await;
        assert_eq!(report.deleted, 0);
        assert_eq!(gw.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_manager_stops_replenishing() {
        let gw = instant_gateway();
        let m = manager(&config(4), &gw);
        m.start().await.unwrap();
        wait_until_full(&m).await;
        let pool = Arc::clone(&m.pool);

        drop(m);
        pool.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(pool.ready_count().await, 1);
        assert_eq!(gw.calls().create, 2);
    }
}
