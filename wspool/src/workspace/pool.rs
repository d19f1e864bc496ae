use std::collections::VecDeque;

use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info};

use super::handle::WorkspaceHandle;
use super::PoolError;

/// An offer rejected because the pool was full or already drained.
///
/// Carries the handle back so the offerer keeps ownership and can delete it.
#[derive(Debug)]
pub struct CapacityRace(WorkspaceHandle);

impl CapacityRace {
    pub fn into_inner(self) -> WorkspaceHandle {
        self.0
    }
}

/// Fixed-capacity FIFO of ready workspaces.
///
/// `available` holds one permit per queued handle, so `acquire` parks on the
/// semaphore rather than polling the queue. Closing the semaphore (on drain)
/// wakes every parked caller with [`PoolError::ShuttingDown`].
pub struct WorkspacePool {
    ready: RwLock<VecDeque<WorkspaceHandle>>,
    available: Semaphore,
    capacity: usize,
}

impl WorkspacePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            ready: RwLock::new(VecDeque::with_capacity(capacity)),
            available: Semaphore::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a ready workspace without waiting.
    ///
    /// Capacity is checked under the write lock, so racing offers can never
    /// push the queue past `capacity`.
    pub async fn offer(&self, handle: WorkspaceHandle) -> Result<(), CapacityRace> {
        {
            let mut ready = self.ready.write().await;
            if self.available.is_closed() || ready.len() >= self.capacity {
                return Err(CapacityRace(handle));
            }
            info!(
                name = %handle.name(),
                id = %handle.id(),
                pool_size = ready.len() + 1,
                "workspace added to pool"
            );
            ready.push_back(handle);
        }
        self.available.add_permits(1);
        Ok(())
    }

    /// Wait for a ready workspace and take it out of the pool.
    ///
    /// Waiters are served in arrival order. Dropping the returned future
    /// before it completes leaves the queue untouched.
    pub async fn acquire(&self) -> Result<WorkspaceHandle, PoolError> {
        let permit = self
            .available
            .acquire()
            .await
            .map_err(|_| PoolError::ShuttingDown)?;
        let mut ready = self.ready.write().await;
        let handle = ready.pop_front().ok_or(PoolError::ShuttingDown)?;
        permit.forget();
        debug!(
            name = %handle.name(),
            remaining = ready.len(),
            "workspace taken from pool"
        );
        Ok(handle)
    }

    /// Free slots left, in `0..=capacity`.
    pub async fn remaining_capacity(&self) -> usize {
        let count = self.ready.read().await.len();
        self.capacity.saturating_sub(count)
    }

    pub async fn ready_count(&self) -> usize {
        self.ready.read().await.len()
    }

    /// Ready count without waiting, `None` while the queue is locked.
    pub fn try_ready_count(&self) -> Option<usize> {
        self.ready.try_read().ok().map(|ready| ready.len())
    }

    /// Remove every queued workspace for shutdown.
    ///
    /// The pool is closed first: later offers are rejected and parked
    /// `acquire` calls fail instead of waiting forever.
    pub async fn drain(&self) -> Vec<WorkspaceHandle> {
        let mut ready = self.ready.write().await;
        self.available.close();
        ready.drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.available.is_closed()
    }
}
