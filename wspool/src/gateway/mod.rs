pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use simulated::{SimulatedGateway, SimulatorConfig};

/// Remote identifier assigned to a workspace by the gateway on creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity a workspace is created for. Not owned by the pool; two owners
/// are the same identity when their e-mail addresses match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub name: String,
    pub email: String,
}

impl Owner {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn same_identity(&self, other: &Owner) -> bool {
        self.email == other.email
    }
}

/// Status of a workspace as reported by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Running,
    Stopped,
    Pending,
    Failed,
    NotFound,
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Pending => write!(f, "PENDING"),
            Self::Failed => write!(f, "FAILED"),
            Self::NotFound => write!(f, "NOT_FOUND"),
        }
    }
}

/// Everything the remote side needs to create a workspace.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub owner: Owner,
    pub memory_bytes: u64,
    pub template: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("workspace {operation} request failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("workspace {0} not found")]
    NotFound(WorkspaceId),

    #[error("workspace {0} request timed out")]
    Timeout(&'static str),
}

impl GatewayError {
    pub fn request(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Request {
            operation,
            message: message.into(),
        }
    }
}

/// Remote API boundary for workspace lifecycle calls.
///
/// Every call may block on network I/O for seconds. Implementations are
/// expected to serialize their own operations per workspace; the pool never
/// issues two calls for the same workspace concurrently.
#[async_trait]
pub trait WorkspaceGateway: Send + Sync {
    /// Create a workspace and return the id the remote side assigned to it.
    async fn create(&self, request: &CreateRequest) -> Result<WorkspaceId, GatewayError>;

    /// Request a start. Completion is observed through [`status`](Self::status).
    async fn start(&self, id: &WorkspaceId, name: &str, owner: &Owner)
        -> Result<(), GatewayError>;

    /// Request a stop. Completion is observed through [`status`](Self::status).
    async fn stop(&self, id: &WorkspaceId) -> Result<(), GatewayError>;

    async fn status(&self, id: &WorkspaceId) -> Result<RemoteStatus, GatewayError>;

    /// Delete a workspace. Deleting an id that no longer exists may return
    /// either `Ok(())` or [`GatewayError::NotFound`].
    async fn delete(&self, id: &WorkspaceId) -> Result<(), GatewayError>;
}
