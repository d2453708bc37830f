//! Cluster membership view
//!
//! The grouping engine's window onto the cluster: whether the local
//! partition has stopped moving, and how far each pool is with its own
//! rebalance.

use crate::cluster::error::{ClusterError, ClusterResult};
use crate::cluster::pools::PoolId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Rebalance progress announced by a pool, keyed by the pool count it
/// applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PoolStatus {
    /// Still rescanning for this pool count
    Rebalancing { pools: u16 },
    /// Membership converged for this pool count
    Converged { pools: u16 },
}

impl PoolStatus {
    /// Whether the pool has converged for (at least) `pools` pools
    pub fn is_converged_for(&self, pools: u16) -> bool {
        matches!(self, PoolStatus::Converged { pools: p } if *p >= pools)
    }
}

/// Cluster membership collaborator
#[async_trait]
pub trait ClusterView: Send + Sync {
    /// Pool this node belongs to
    fn local_pool(&self) -> PoolId;

    /// Whether series ownership for the local pool has stopped moving
    async fn local_partition_settled(&self) -> ClusterResult<bool>;

    /// Last status announced by a pool; `None` if it has not announced yet
    async fn pool_status(&self, pool: PoolId) -> ClusterResult<Option<PoolStatus>>;

    /// Announce the local pool's status to the cluster
    async fn announce(&self, status: PoolStatus) -> ClusterResult<()>;
}

#[derive(Debug, Default)]
struct SharedState {
    statuses: RwLock<HashMap<PoolId, PoolStatus>>,
    moving: RwLock<HashSet<PoolId>>,
    unreachable: RwLock<HashSet<PoolId>>,
}

/// In-memory cluster view shared by the nodes of a simulated cluster
///
/// Every view made with [`StaticClusterView::for_pool`] sees the same
/// announcements, so nodes in one process can rebalance together.
#[derive(Debug, Clone)]
pub struct StaticClusterView {
    local_pool: PoolId,
    pool_count: Arc<AtomicU16>,
    shared: Arc<SharedState>,
}

impl StaticClusterView {
    pub fn new(local_pool: PoolId, pool_count: u16) -> Self {
        Self {
            local_pool,
            pool_count: Arc::new(AtomicU16::new(pool_count.max(1))),
            shared: Arc::new(SharedState::default()),
        }
    }

    /// View of the same cluster from another pool
    pub fn for_pool(&self, pool: PoolId) -> Self {
        Self {
            local_pool: pool,
            pool_count: Arc::clone(&self.pool_count),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn pool_count(&self) -> u16 {
        self.pool_count.load(Ordering::SeqCst)
    }

    pub fn set_pool_count(&self, pool_count: u16) {
        self.pool_count.store(pool_count.max(1), Ordering::SeqCst);
    }

    /// Mark a pool's partition as still moving (or settled again)
    pub fn set_moving(&self, pool: PoolId, moving: bool) {
        let mut set = self.shared.moving.write().unwrap_or_else(PoisonError::into_inner);
        if moving {
            set.insert(pool);
        } else {
            set.remove(&pool);
        }
    }

    /// Simulate a pool dropping off the network
    pub fn set_unreachable(&self, pool: PoolId, unreachable: bool) {
        let mut set = self
            .shared
            .unreachable
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if unreachable {
            set.insert(pool);
        } else {
            set.remove(&pool);
        }
    }

    fn check(&self, pool: PoolId) -> ClusterResult<()> {
        if pool >= self.pool_count() {
            return Err(ClusterError::Unknown(pool));
        }
        let unreachable = self
            .shared
            .unreachable
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if unreachable.contains(&pool) {
            return Err(ClusterError::Unreachable(pool));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterView for StaticClusterView {
    fn local_pool(&self) -> PoolId {
        self.local_pool
    }

    async fn local_partition_settled(&self) -> ClusterResult<bool> {
        let moving = self.shared.moving.read().unwrap_or_else(PoisonError::into_inner);
        Ok(!moving.contains(&self.local_pool))
    }

    async fn pool_status(&self, pool: PoolId) -> ClusterResult<Option<PoolStatus>> {
        self.check(pool)?;
        let statuses = self.shared.statuses.read().unwrap_or_else(PoisonError::into_inner);
        Ok(statuses.get(&pool).copied())
    }

    async fn announce(&self, status: PoolStatus) -> ClusterResult<()> {
        self.check(self.local_pool)?;
        self.shared
            .statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.local_pool, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_announcements_are_shared() {
        let pool0 = StaticClusterView::new(0, 2);
        let pool1 = pool0.for_pool(1);

        assert_eq!(pool0.pool_status(1).await.unwrap(), None);
        pool1.announce(PoolStatus::Converged { pools: 2 }).await.unwrap();
        assert_eq!(
            pool0.pool_status(1).await.unwrap(),
            Some(PoolStatus::Converged { pools: 2 })
        );
    }

    #[tokio::test]
    async fn test_unknown_and_unreachable_pools() {
        let view = StaticClusterView::new(0, 2);
        assert_eq!(view.pool_status(2).await, Err(ClusterError::Unknown(2)));

        view.set_unreachable(1, true);
        assert_eq!(view.pool_status(1).await, Err(ClusterError::Unreachable(1)));
        view.set_unreachable(1, false);
        assert!(view.pool_status(1).await.is_ok());
    }

    #[tokio::test]
    async fn test_partition_settled() {
        let view = StaticClusterView::new(0, 1);
        assert!(view.local_partition_settled().await.unwrap());
        view.set_moving(0, true);
        assert!(!view.local_partition_settled().await.unwrap());
    }

    #[test]
    fn test_converged_for_newer_count() {
        assert!(PoolStatus::Converged { pools: 3 }.is_converged_for(3));
        assert!(PoolStatus::Converged { pools: 4 }.is_converged_for(3));
        assert!(!PoolStatus::Converged { pools: 2 }.is_converged_for(3));
        assert!(!PoolStatus::Rebalancing { pools: 3 }.is_converged_for(3));
    }
}
