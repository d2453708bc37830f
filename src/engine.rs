//! Group Engine
//!
//! Wires the registry, maintainer, command executor and topology
//! coordinator into one component per node:
//!
//! ```text
//!  insert path ─► on_series_inserted ─► MembershipMaintainer ◄── scan queue
//!  commands ────► execute ───────────► CommandExecutor ─► GroupRegistry
//!  cluster ─────► pool_added ────────► TopologyCoordinator
//!  peers ◄──────► subscribe_edits / apply_replicated
//! ```

use crate::cluster::{ClusterView, TopologyCoordinator, TopologyState};
use crate::config::Config;
use crate::groups::{
    GroupEdit, GroupRegistry, GroupSummary, MembershipMaintainer, ReplicationOutcome, ScanQueue,
    ScanReceiver,
};
use crate::pattern::{PatternCompiler, RegexCompiler};
use crate::query::{CommandExecutor, CommandResponse, QueryResult};
use crate::series::SeriesUniverse;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Interval used by [`GroupEngine::wait_converged`]
const CONVERGENCE_POLL: Duration = Duration::from_millis(10);

/// Health snapshot of group membership on this node
#[derive(Debug, Clone, Serialize)]
pub struct MembershipSummary {
    pub generated_at: DateTime<Utc>,
    pub series: usize,
    pub groups: Vec<GroupSummary>,
    pub stale_groups: usize,
    pub pending_scans: usize,
    pub topology: TopologyState,
    pub converged: bool,
}

/// Dynamic series grouping for one node
pub struct GroupEngine {
    registry: Arc<GroupRegistry>,
    maintainer: Arc<MembershipMaintainer>,
    coordinator: Arc<TopologyCoordinator>,
    executor: CommandExecutor,
    universe: Arc<dyn SeriesUniverse>,
    jobs: Mutex<Option<ScanReceiver>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GroupEngine {
    /// Build an engine using the default regex compiler
    pub fn new(
        config: &Config,
        universe: Arc<dyn SeriesUniverse>,
        view: Arc<dyn ClusterView>,
    ) -> Self {
        Self::with_compiler(config, universe, view, Arc::new(RegexCompiler::new()))
    }

    /// Build an engine with a custom pattern compiler
    pub fn with_compiler(
        config: &Config,
        universe: Arc<dyn SeriesUniverse>,
        view: Arc<dyn ClusterView>,
        compiler: Arc<dyn PatternCompiler>,
    ) -> Self {
        let (queue, jobs) = ScanQueue::channel();
        let registry = Arc::new(
            GroupRegistry::new(compiler, queue.clone(), config.groups.edit_channel_capacity)
                .with_origin(config.cluster.local_pool),
        );
        let maintainer = Arc::new(MembershipMaintainer::new(
            Arc::clone(&registry),
            Arc::clone(&universe),
            queue,
            config.groups.scan_concurrency,
        ));
        let coordinator = Arc::new(TopologyCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&maintainer),
            view,
            config.cluster.pool_count,
            Duration::from_millis(config.cluster.convergence_poll_ms),
        ));
        let executor = CommandExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&universe),
            config.groups.list_limit,
        );

        Self {
            registry,
            maintainer,
            coordinator,
            executor,
            universe,
            jobs: Mutex::new(Some(jobs)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the scan workers and the convergence loop
    ///
    /// Must be called from within a tokio runtime. Calling it twice is a
    /// no-op.
    pub fn start(&self) {
        let jobs = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(jobs) = jobs else {
            tracing::warn!("Group engine already started");
            return;
        };

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(self.maintainer.start(jobs));
        tasks.push(self.coordinator.start());
        tracing::info!("Group engine started");
    }

    /// Stop background tasks; pending scans are abandoned
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.is_empty() {
            return;
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Group engine stopped");
    }

    /// Execute a textual command
    pub async fn execute(&self, command: &str) -> QueryResult<CommandResponse> {
        self.executor.execute_str(command).await
    }

    /// Insert-path notification for a batch of newly visible series
    ///
    /// Names not present in this node's universe are skipped.
    pub async fn on_series_inserted(&self, names: &[String]) -> usize {
        let owned: Vec<String> = names
            .iter()
            .filter(|name| self.universe.contains(name))
            .cloned()
            .collect();
        self.maintainer.on_inserted(&owned).await
    }

    /// Notification for series deleted from the universe
    ///
    /// Names still present in the universe are skipped.
    pub async fn on_series_removed(&self, names: &[String]) -> usize {
        let gone: Vec<String> = names
            .iter()
            .filter(|name| !self.universe.contains(name))
            .cloned()
            .collect();
        self.maintainer.on_removed(&gone).await
    }

    /// Cluster notification that the pool count grew
    pub async fn pool_added(&self, pool_count: u16) -> TopologyState {
        self.coordinator.pool_added(pool_count).await
    }

    /// Flag every group stale and schedule a full rescan
    pub async fn mark_stale_and_rescan(&self) -> usize {
        self.registry.mark_all_stale().await;
        self.maintainer.rescan_stale().await
    }

    /// Topology state as seen by this node
    pub async fn topology(&self) -> TopologyState {
        self.coordinator.state().await
    }

    /// Stable topology, no stale groups and no pending scans
    pub async fn is_converged(&self) -> bool {
        self.coordinator.is_stable().await
            && self.maintainer.pending_scans() == 0
            && self.registry.stale_count().await == 0
    }

    /// Poll until converged or the timeout elapses
    pub async fn wait_converged(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_converged().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(CONVERGENCE_POLL).await;
        }
    }

    /// Health summary of group membership
    pub async fn membership_summary(&self) -> MembershipSummary {
        let groups = self.registry.list_all().await;
        let stale_groups = groups.iter().filter(|g| g.stale).count();
        let pending_scans = self.maintainer.pending_scans();
        let topology = self.coordinator.state().await;
        let converged = topology.is_stable() && stale_groups == 0 && pending_scans == 0;

        MembershipSummary {
            generated_at: Utc::now(),
            series: self.universe.len(),
            groups,
            stale_groups,
            pending_scans,
            topology,
            converged,
        }
    }

    /// Stream of local group edits for replication
    pub fn subscribe_edits(&self) -> broadcast::Receiver<GroupEdit> {
        self.registry.subscribe()
    }

    /// Apply a group edit received from another pool
    pub async fn apply_replicated(&self, edit: GroupEdit) -> ReplicationOutcome {
        self.registry.apply_replicated(edit).await
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<TopologyCoordinator> {
        &self.coordinator
    }
}

impl Drop for GroupEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
