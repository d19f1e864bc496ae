//! In-memory gateway with configurable latencies and deterministic failure
//! injection. Backs the `serve`/`bench` commands and the test suite.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use super::{CreateRequest, GatewayError, Owner, RemoteStatus, WorkspaceGateway, WorkspaceId};

/// Latency and failure settings for the simulated remote side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub create_latency_ms: u64,
    /// Time between a start request and the workspace reporting RUNNING.
    pub start_latency_ms: u64,
    pub delete_latency_ms: u64,
    /// Every Nth create attempt fails. 0 disables failure injection.
    pub fail_every: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            create_latency_ms: 1500,
            start_latency_ms: 500,
            delete_latency_ms: 100,
            fail_every: 0,
        }
    }
}

impl SimulatorConfig {
    /// No latency, no failures.
    pub fn instant() -> Self {
        Self {
            create_latency_ms: 0,
            start_latency_ms: 0,
            delete_latency_ms: 0,
            fail_every: 0,
        }
    }
}

/// Number of calls received per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub start: usize,
    pub stop: usize,
    pub status: usize,
    pub delete: usize,
}

struct SimWorkspace {
    name: String,
    status: RemoteStatus,
    /// Pending transition: the status reported once the instant has passed.
    transition: Option<(Instant, RemoteStatus)>,
}

impl SimWorkspace {
    fn settle(&mut self) {
        if let Some((at, next)) = self.transition {
            if Instant::now() >= at {
                self.status = next;
                self.transition = None;
            }
        }
    }
}

#[derive(Default)]
struct SimState {
    workspaces: HashMap<WorkspaceId, SimWorkspace>,
    next_id: u64,
    create_attempts: u64,
    fail_next_creates: u32,
    stall_starts: bool,
    calls: CallCounts,
}

pub struct SimulatedGateway {
    config: SimulatorConfig,
    state: Mutex<SimState>,
}

impl SimulatedGateway {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        // A panic while holding the lock leaves the maps consistent, so keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// Number of workspaces that exist remotely (created and not deleted).
    pub fn live_count(&self) -> usize {
        self.state().workspaces.len()
    }

    pub fn contains(&self, id: &WorkspaceId) -> bool {
        self.state().workspaces.contains_key(id)
    }

    /// Make the next `n` create calls fail.
    pub fn fail_next_creates(&self, n: u32) {
        self.state().fail_next_creates = n;
    }

    /// When set, start requests are accepted but never take effect.
    pub fn stall_starts(&self, stall: bool) {
        self.state().stall_starts = stall;
    }

    /// Force the reported status of a workspace, dropping any pending transition.
    pub fn set_status(&self, id: &WorkspaceId, status: RemoteStatus) {
        if let Some(ws) = self.state().workspaces.get_mut(id) {
            ws.status = status;
            ws.transition = None;
        }
    }

    async fn latency(ms: u64) {
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl WorkspaceGateway for SimulatedGateway {
    async fn create(&self, request: &CreateRequest) -> Result<WorkspaceId, GatewayError> {
        self.state().calls.create += 1;
        Self::latency(self.config.create_latency_ms).await;

        let mut state = self.state();
        state.create_attempts += 1;
        if state.fail_next_creates > 0 {
            state.fail_next_creates -= 1;
            return Err(GatewayError::request("create", "injected failure"));
        }
        if self.config.fail_every > 0
            && state.create_attempts % u64::from(self.config.fail_every) == 0
        {
            return Err(GatewayError::request("create", "simulated remote fault"));
        }

        state.next_id += 1;
        let id = WorkspaceId::new(format!("workspace{:08x}", state.next_id));
        state.workspaces.insert(
            id.clone(),
            SimWorkspace {
                name: request.name.clone(),
                status: RemoteStatus::Stopped,
                transition: None,
            },
        );
        debug!(id = %id, name = %request.name, "simulated workspace created");
        Ok(id)
    }

    async fn start(
        &self,
        id: &WorkspaceId,
        _name: &str,
        _owner: &Owner,
    ) -> Result<(), GatewayError> {
        let latency = Duration::from_millis(self.config.start_latency_ms);
        let mut state = self.state();
        state.calls.start += 1;
        let stalled = state.stall_starts;
        let ws = state
            .workspaces
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(id.clone()))?;
        if stalled {
            return Ok(());
        }
        if latency.is_zero() {
            ws.status = RemoteStatus::Running;
            ws.transition = None;
        } else {
            ws.status = RemoteStatus::Pending;
            ws.transition = Some((Instant::now() + latency, RemoteStatus::Running));
        }
        Ok(())
    }

    async fn stop(&self, id: &WorkspaceId) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.calls.stop += 1;
        let ws = state
            .workspaces
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(id.clone()))?;
        ws.status = RemoteStatus::Stopped;
        ws.transition = None;
        Ok(())
    }

    async fn status(&self, id: &WorkspaceId) -> Result<RemoteStatus, GatewayError> {
        let mut state = self.state();
        state.calls.status += 1;
        Ok(match state.workspaces.get_mut(id) {
            Some(ws) => {
                ws.settle();
                ws.status
            }
            None => RemoteStatus::NotFound,
        })
    }

    async fn delete(&self, id: &WorkspaceId) -> Result<(), GatewayError> {
        self.state().calls.delete += 1;
        Self::latency(self.config.delete_latency_ms).await;
        match self.state().workspaces.remove(id) {
            Some(ws) => {
                debug!(id = %id, name = %ws.name, "simulated workspace deleted");
                Ok(())
            }
            None => Err(GatewayError::NotFound(id.clone())),
        }
    }
}
