//! Warm pool of remotely provisioned workspaces.
//!
//! [`workspace::PoolManager`] keeps a bounded set of default-profile
//! workspaces ready through a background replenishment task, hands them out
//! to concurrent callers, provisions non-default requests on demand, and
//! deletes everything it still holds on shutdown. Remote operations go
//! through a [`gateway::WorkspaceGateway`].

pub mod config;
pub mod gateway;
pub mod metrics;
pub mod naming;
pub mod workspace;
