use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::handle::{MemorySize, WorkspaceHandle, WorkspaceStatus};
use super::PoolError;
use crate::gateway::{CreateRequest, GatewayError, Owner, RemoteStatus, WorkspaceGateway};
use crate::metrics::MetricsRegistry;
use crate::naming::NameGenerator;

/// Default parameters for pooled workspaces.
#[derive(Debug, Clone)]
pub struct DefaultProfile {
    pub owner: Owner,
    pub memory_gb: u32,
    pub template: String,
    pub name_prefix: String,
}

impl DefaultProfile {
    /// Whether a request can be served from the pool.
    pub fn matches(&self, owner: &Owner, memory_gb: u32, template: &str) -> bool {
        memory_gb == self.memory_gb && template == self.template && owner.same_identity(&self.owner)
    }
}

/// How long to wait for a workspace to settle in a status.
#[derive(Debug, Clone, Copy)]
pub struct StatusPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

/// Gateway calls shared by the scheduler and the manager: provisioning,
/// start confirmation, stop and delete.
pub struct Provisioner {
    gateway: Arc<dyn WorkspaceGateway>,
    names: Arc<dyn NameGenerator>,
    profile: DefaultProfile,
    status_policy: StatusPolicy,
    metrics: MetricsRegistry,
}

impl Provisioner {
    pub fn new(
        gateway: Arc<dyn WorkspaceGateway>,
        names: Arc<dyn NameGenerator>,
        profile: DefaultProfile,
        status_policy: StatusPolicy,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            gateway,
            names,
            profile,
            status_policy,
            metrics,
        }
    }

    pub fn profile(&self) -> &DefaultProfile {
        &self.profile
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Provision a workspace with the default profile.
    ///
    /// Once `cancel` fires, the create call in flight still completes, but
    /// the start wait is cut short and the new workspace is deleted with a
    /// [`PoolError::ShuttingDown`] result.
    pub async fn provision_default(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceHandle, PoolError> {
        let profile = &self.profile;
        self.provision_inner(
            profile.owner.clone(),
            profile.memory_gb,
            profile.template.clone(),
            Some(cancel),
        )
        .await
    }

    /// Create, start and wait for a new workspace to report RUNNING.
    ///
    /// If anything fails after `create` succeeded, the remote workspace is
    /// deleted before the error is returned.
    pub async fn provision(
        &self,
        owner: Owner,
        memory_gb: u32,
        template: String,
    ) -> Result<WorkspaceHandle, PoolError> {
        self.provision_inner(owner, memory_gb, template, None).await
    }

    async fn provision_inner(
        &self,
        owner: Owner,
        memory_gb: u32,
        template: String,
        cancel: Option<&CancellationToken>,
    ) -> Result<WorkspaceHandle, PoolError> {
        let started = Instant::now();
        let request = CreateRequest {
            name: self.names.generate(&self.profile.name_prefix),
            owner,
            memory_bytes: MemorySize::Gb(memory_gb).bytes(),
            template,
        };

        let id = match self.gateway.create(&request).await {
            Ok(id) => id,
            Err(e) => {
                self.metrics.record_provision_failure();
                return Err(e.into());
            }
        };
        let mut handle = WorkspaceHandle::new(
            id,
            request.name,
            request.owner,
            request.memory_bytes,
            request.template,
        );

        let result = async {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(PoolError::ShuttingDown);
            }
            self.gateway
                .start(handle.id(), handle.name(), handle.owner())
                .await?;
            self.wait_for_status(&handle, RemoteStatus::Running, cancel)
                .await
        }
        .await;

        match result {
            Ok(()) => {
                handle.set_status(WorkspaceStatus::Running);
                let elapsed = started.elapsed();
                self.metrics.record_provision_success(elapsed);
                info!(
                    name = %handle.name(),
                    id = %handle.id(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "workspace provisioned"
                );
                Ok(handle)
            }
            Err(e) => {
                self.metrics.record_provision_failure();
                handle.set_status(WorkspaceStatus::Failed);
                warn!(name = %handle.name(), error = %e, "workspace failed to start, deleting it");
                if let Err(e2) = self.delete(handle).await {
                    warn!(error = %e2, "failed to delete workspace after failed start");
                }
                Err(e)
            }
        }
    }

    /// Make sure a workspace taken from the pool is usable.
    ///
    /// STOPPED workspaces are started, PENDING ones are waited on, FAILED or
    /// missing ones are reported as unusable.
    #[instrument(skip(self, handle), fields(name = %handle.name()))]
    pub async fn ensure_running(&self, handle: &mut WorkspaceHandle) -> Result<(), PoolError> {
        match self.gateway.status(handle.id()).await? {
            RemoteStatus::Running => {
                handle.set_status(WorkspaceStatus::Running);
                return Ok(());
            }
            RemoteStatus::Stopped => {
                info!(id = %handle.id(), "pooled workspace is stopped, starting it");
                handle.set_status(WorkspaceStatus::Stopped);
                self.gateway
                    .start(handle.id(), handle.name(), handle.owner())
                    .await?;
            }
            RemoteStatus::Pending => {
                debug!(id = %handle.id(), "pooled workspace is pending");
            }
            status @ (RemoteStatus::Failed | RemoteStatus::NotFound) => {
                handle.set_status(WorkspaceStatus::Failed);
                return Err(PoolError::Unusable {
                    name: handle.name().to_string(),
                    status,
                });
            }
        }

        handle.set_status(WorkspaceStatus::Pending);
        match self
            .wait_for_status(handle, RemoteStatus::Running, None)
            .await
        {
            Ok(()) => {
                handle.set_status(WorkspaceStatus::Running);
                Ok(())
            }
            Err(e) => {
                handle.set_status(WorkspaceStatus::Failed);
                Err(e)
            }
        }
    }

    /// Stop a workspace and wait until it reports STOPPED.
    pub async fn stop(&self, handle: &mut WorkspaceHandle) -> Result<(), PoolError> {
        self.gateway.stop(handle.id()).await?;
        self.wait_for_status(handle, RemoteStatus::Stopped, None)
            .await?;
        handle.set_status(WorkspaceStatus::Stopped);
        info!(name = %handle.name(), id = %handle.id(), "workspace stopped");
        Ok(())
    }

    /// Delete a workspace remotely. A workspace that is already gone counts
    /// as deleted.
    pub async fn delete(&self, handle: WorkspaceHandle) -> Result<(), GatewayError> {
        match self.gateway.delete(handle.id()).await {
            Ok(()) | Err(GatewayError::NotFound(_)) => {
                info!(name = %handle.name(), id = %handle.id(), "workspace removed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Poll until the workspace reports `expected`, within the status budget.
    /// A fired `cancel` ends the wait between polls.
    async fn wait_for_status(
        &self,
        handle: &WorkspaceHandle,
        expected: RemoteStatus,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), PoolError> {
        let policy = self.status_policy;
        let deadline = Instant::now() + policy.timeout;
        loop {
            let status = self.gateway.status(handle.id()).await?;
            if status == expected {
                return Ok(());
            }
            if matches!(status, RemoteStatus::Failed | RemoteStatus::NotFound) {
                return Err(PoolError::Unusable {
                    name: handle.name().to_string(),
                    status,
                });
            }
            if Instant::now() + policy.poll_interval > deadline {
                return Err(PoolError::StatusTimeout {
                    name: handle.name().to_string(),
                    expected,
                    actual: status,
                    waited: policy.timeout,
                });
            }
            match cancel {
                Some(cancel) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PoolError::ShuttingDown),
                        _ = tokio::time::sleep(policy.poll_interval) => {}
                    }
                }
                None => tokio::time::sleep(policy.poll_interval).await,
            }
        }
    }
}
