//! Topology Change Coordinator
//!
//! Drives membership back to a converged state after a pool joins:
//!
//! ```text
//!            pool_added(n)                     every pool converged
//! Stable ─────────────────────► Rebalancing ─────────────────────────► Stable
//!                                 │  local partition settled
//!                                 │    → rescan every group (once)
//!                                 │  no stale groups, no pending scans
//!                                 │    → announce Converged{n}
//!                                 └─ remote pools polled; unreachable → retry
//! ```
//!
//! There is no barrier: queries keep reading cached members throughout.
//! Callers poll [`TopologyCoordinator::state`] with their own timeout.

use crate::cluster::pools::PoolId;
use crate::cluster::view::{ClusterView, PoolStatus};
use crate::groups::{GroupRegistry, MembershipMaintainer};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Externally visible topology state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TopologyState {
    Stable {
        pools: u16,
    },
    Rebalancing {
        generation: u64,
        pools: u16,
        /// Pools that have not converged yet
        awaiting: Vec<PoolId>,
    },
}

impl TopologyState {
    pub fn is_stable(&self) -> bool {
        matches!(self, TopologyState::Stable { .. })
    }
}

#[derive(Debug, Clone)]
struct Rebalance {
    generation: u64,
    pools: u16,
    awaiting: BTreeSet<PoolId>,
    rescan_requested: bool,
}

#[derive(Debug)]
struct Topology {
    pools: u16,
    generation: u64,
    rebalance: Option<Rebalance>,
}

impl Topology {
    fn state(&self) -> TopologyState {
        match &self.rebalance {
            None => TopologyState::Stable { pools: self.pools },
            Some(r) => TopologyState::Rebalancing {
                generation: r.generation,
                pools: r.pools,
                awaiting: r.awaiting.iter().copied().collect(),
            },
        }
    }
}

/// Reacts to pool-count changes and tracks cluster-wide convergence
pub struct TopologyCoordinator {
    registry: Arc<GroupRegistry>,
    maintainer: Arc<MembershipMaintainer>,
    view: Arc<dyn ClusterView>,
    /// Lock order: topology, then registry, then group
    topology: RwLock<Topology>,
    poll_interval: Duration,
}

impl TopologyCoordinator {
    pub fn new(
        registry: Arc<GroupRegistry>,
        maintainer: Arc<MembershipMaintainer>,
        view: Arc<dyn ClusterView>,
        pools: u16,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            maintainer,
            view,
            topology: RwLock::new(Topology {
                pools: pools.max(1),
                generation: 0,
                rebalance: None,
            }),
            poll_interval,
        }
    }

    /// Current topology state
    pub async fn state(&self) -> TopologyState {
        self.topology.read().await.state()
    }

    pub async fn is_stable(&self) -> bool {
        self.topology.read().await.rebalance.is_none()
    }

    /// Handle a pool joining the cluster
    ///
    /// Marks every group stale and starts a new rebalance generation.
    /// Repeated notifications for a count already seen are ignored.
    pub async fn pool_added(&self, pool_count: u16) -> TopologyState {
        let mut topology = self.topology.write().await;
        if pool_count <= topology.pools {
            tracing::debug!(
                pool_count,
                current = topology.pools,
                "Ignoring pool notification for known pool count"
            );
            return topology.state();
        }

        topology.generation += 1;
        topology.pools = pool_count;
        topology.rebalance = Some(Rebalance {
            generation: topology.generation,
            pools: pool_count,
            awaiting: (0..pool_count).collect(),
            rescan_requested: false,
        });

        // under the topology lock so a concurrent convergence pass cannot
        // count groups that are about to become stale
        let groups = self.registry.mark_all_stale().await;
        let state = topology.state();
        drop(topology);

        tracing::info!(
            pool_count,
            groups,
            "Pool added, rebalancing group membership"
        );
        if let Err(e) = self
            .view
            .announce(PoolStatus::Rebalancing { pools: pool_count })
            .await
        {
            tracing::warn!(error = %e, "Cannot announce rebalance");
        }
        state
    }

    /// Run one convergence pass and return the resulting state
    pub async fn check_convergence(&self) -> TopologyState {
        let rebalance = self.topology.read().await.rebalance.clone();
        let snapshot = match rebalance {
            Some(rebalance) => rebalance,
            None => return self.state().await,
        };

        let local = self.view.local_pool();
        let mut converged = Vec::new();
        let mut request_rescan = false;

        for &pool in &snapshot.awaiting {
            if pool == local {
                match self.view.local_partition_settled().await {
                    Ok(false) => {
                        tracing::trace!(pool, "Local partition still moving");
                    }
                    Ok(true) if !snapshot.rescan_requested => request_rescan = true,
                    Ok(true) => {
                        if self.registry.stale_count().await == 0
                            && self.maintainer.pending_scans() == 0
                        {
                            // peers only learn of it through the announcement
                            match self
                                .view
                                .announce(PoolStatus::Converged { pools: snapshot.pools })
                                .await
                            {
                                Ok(()) => converged.push(pool),
                                Err(e) => {
                                    tracing::warn!(pool, error = %e, "Cannot announce convergence, retrying");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(pool, error = %e, "Cannot read local partition state, retrying");
                    }
                }
                continue;
            }

            match self.view.pool_status(pool).await {
                Ok(Some(status)) if status.is_converged_for(snapshot.pools) => converged.push(pool),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(pool, error = %e, "Pool not reachable, retrying convergence check");
                }
            }
        }

        let mut topology = self.topology.write().await;
        let current = topology.rebalance.as_ref().map(|r| r.generation);
        if current != Some(snapshot.generation) {
            // superseded by a newer pool while we were polling
            return topology.state();
        }
        let Some(rebalance) = topology.rebalance.as_mut() else {
            return topology.state();
        };

        if request_rescan {
            rebalance.rescan_requested = true;
            // scans that started while series were still moving must not count
            self.registry.mark_all_stale().await;
            let scheduled = self.maintainer.rescan_stale().await;
            tracing::info!(generation = snapshot.generation, scheduled, "Local partition settled, rescanning groups");
        }

        if converged.contains(&local) {
            tracing::debug!(pool = local, pools = snapshot.pools, "Local membership converged");
        }
        for pool in &converged {
            rebalance.awaiting.remove(pool);
        }

        let pools = rebalance.pools;
        let finished = rebalance.awaiting.is_empty();
        if finished {
            topology.rebalance = None;
            tracing::info!(pools, generation = snapshot.generation, "Cluster converged, topology stable");
        }
        topology.state()
    }

    /// Start the background convergence loop
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(coordinator.poll_interval);

            loop {
                ticker.tick().await;
                if coordinator.topology.read().await.rebalance.is_some() {
                    coordinator.check_convergence().await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::view::StaticClusterView;
    use crate::groups::{ScanQueue, ScanReceiver};
    use crate::pattern::RegexCompiler;
    use crate::series::MemoryUniverse;

    struct Fixture {
        registry: Arc<GroupRegistry>,
        maintainer: Arc<MembershipMaintainer>,
        view: StaticClusterView,
        coordinator: TopologyCoordinator,
        jobs: ScanReceiver,
    }

    async fn fixture(pools: u16) -> Fixture {
        let universe = MemoryUniverse::with_series(["a1", "a2", "b1"]);
        let (queue, mut jobs) = ScanQueue::channel();
        let registry = Arc::new(GroupRegistry::new(
            Arc::new(RegexCompiler::new()),
            queue.clone(),
            16,
        ));
        let maintainer = Arc::new(MembershipMaintainer::new(
            Arc::clone(&registry),
            Arc::new(universe),
            queue,
            1,
        ));
        registry.create("a", "/a.*/").await.unwrap();
        maintainer.drain(&mut jobs).await;

        let view = StaticClusterView::new(0, pools);
        let coordinator = TopologyCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&maintainer),
            Arc::new(view.clone()),
            pools,
            Duration::from_millis(10),
        );
        Fixture {
            registry,
            maintainer,
            view,
            coordinator,
            jobs,
        }
    }

    #[tokio::test]
    async fn test_single_pool_rebalance() {
        let mut fx = fixture(1).await;
        fx.view.set_pool_count(2);
        fx.view.set_moving(0, true);

        let state = fx.coordinator.pool_added(2).await;
        assert_eq!(
            state,
            TopologyState::Rebalancing {
                generation: 1,
                pools: 2,
                awaiting: vec![0, 1]
            }
        );
        assert_eq!(fx.registry.stale_count().await, 1);

        // partition still moving: nothing happens
        fx.coordinator.check_convergence().await;
        assert_eq!(fx.maintainer.pending_scans(), 0);

        fx.view.set_moving(0, false);
        fx.coordinator.check_convergence().await;
        assert_eq!(fx.maintainer.pending_scans(), 1);

        fx.maintainer.drain(&mut fx.jobs).await;
        let state = fx.coordinator.check_convergence().await;
        assert_eq!(
            state,
            TopologyState::Rebalancing {
                generation: 1,
                pools: 2,
                awaiting: vec![1]
            }
        );
        assert_eq!(
            fx.view.pool_status(0).await.unwrap(),
            Some(PoolStatus::Converged { pools: 2 })
        );

        fx.view
            .for_pool(1)
            .announce(PoolStatus::Converged { pools: 2 })
            .await
            .unwrap();
        assert_eq!(
            fx.coordinator.check_convergence().await,
            TopologyState::Stable { pools: 2 }
        );
    }

    #[tokio::test]
    async fn test_unreachable_pool_keeps_rebalancing() {
        let mut fx = fixture(1).await;
        fx.view.set_pool_count(2);
        fx.view.set_unreachable(1, true);
        fx.coordinator.pool_added(2).await;

        for _ in 0..3 {
            fx.coordinator.check_convergence().await;
            fx.maintainer.drain(&mut fx.jobs).await;
        }
        assert_eq!(
            fx.coordinator.state().await,
            TopologyState::Rebalancing {
                generation: 1,
                pools: 2,
                awaiting: vec![1]
            }
        );

        fx.view.set_unreachable(1, false);
        fx.view
            .for_pool(1)
            .announce(PoolStatus::Converged { pools: 2 })
            .await
            .unwrap();
        assert!(fx.coordinator.check_convergence().await.is_stable());
    }

    #[tokio::test]
    async fn test_failed_announcement_is_retried() {
        let mut fx = fixture(1).await;
        fx.view.set_pool_count(2);
        fx.view.set_unreachable(0, true);
        fx.coordinator.pool_added(2).await;

        for _ in 0..3 {
            fx.coordinator.check_convergence().await;
            fx.maintainer.drain(&mut fx.jobs).await;
        }
        match fx.coordinator.state().await {
            TopologyState::Rebalancing { awaiting, .. } => assert_eq!(awaiting, vec![0, 1]),
            other => panic!("unexpected state: {:?}", other),
        }

        fx.view.set_unreachable(0, false);
        fx.coordinator.check_convergence().await;
        assert_eq!(
            fx.view.pool_status(0).await.unwrap(),
            Some(PoolStatus::Converged { pools: 2 })
        );
    }

    #[tokio::test]
    async fn test_stale_announcement_does_not_count() {
        let mut fx = fixture(1).await;
        fx.view.set_pool_count(3);
        fx.view
            .for_pool(1)
            .announce(PoolStatus::Converged { pools: 2 })
            .await
            .unwrap();

        fx.coordinator.pool_added(2).await;
        fx.coordinator.pool_added(3).await;
        fx.coordinator.check_convergence().await;
        fx.maintainer.drain(&mut fx.jobs).await;

        match fx.coordinator.check_convergence().await {
            TopologyState::Rebalancing {
                generation,
                awaiting,
                ..
            } => {
                assert_eq!(generation, 2);
                assert_eq!(awaiting, vec![1, 2]);
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_pool_notification_ignored() {
        let fx = fixture(2).await;
        assert_eq!(
            fx.coordinator.pool_added(2).await,
            TopologyState::Stable { pools: 2 }
        );
        assert_eq!(fx.registry.stale_count().await, 0);
    }

    #[tokio::test]
    async fn test_background_loop_converges() {
        let fx = fixture(1).await;
        let coordinator = Arc::new(fx.coordinator);
        let worker = fx.maintainer.start(fx.jobs);
        let poller = coordinator.start();

        fx.view.set_pool_count(2);
        fx.view
            .for_pool(1)
            .announce(PoolStatus::Converged { pools: 2 })
            .await
            .unwrap();
        coordinator.pool_added(2).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !coordinator.is_stable().await {
            assert!(tokio::time::Instant::now() < deadline, "did not converge");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fx.registry.snapshot_members("a").await.unwrap().len(), 2);

        poller.abort();
        worker.abort();
    }
}
