use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::{Owner, WorkspaceId};

/// Local view of a workspace's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Pending,
    Running,
    Stopped,
    Failed,
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Memory size helper. Workspaces are requested in GB and created in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySize {
    Mb(u32),
    Gb(u32),
}

impl MemorySize {
    const MB: u64 = 1 << 20;
    const GB: u64 = 1 << 30;

    pub fn bytes(self) -> u64 {
        match self {
            Self::Mb(n) => u64::from(n) * Self::MB,
            Self::Gb(n) => u64::from(n) * Self::GB,
        }
    }
}

/// One remotely provisioned workspace.
///
/// A handle only exists once the gateway has assigned an id. It is not
/// `Clone`: whoever holds the value (the pool while queued, the scheduler
/// while provisioning, the caller once acquired) is its only owner.
#[derive(Debug, Serialize)]
pub struct WorkspaceHandle {
    id: WorkspaceId,
    name: String,
    owner: Owner,
    memory_bytes: u64,
    template: String,
    status: WorkspaceStatus,
    created_at: DateTime<Utc>,
}

impl WorkspaceHandle {
    pub(crate) fn new(
        id: WorkspaceId,
        name: String,
        owner: Owner,
        memory_bytes: u64,
        template: String,
    ) -> Self {
        Self {
            id,
            name,
            owner,
            memory_bytes,
            template,
            status: WorkspaceStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn status(&self) -> WorkspaceStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn set_status(&mut self, status: WorkspaceStatus) {
        self.status = status;
    }
}
