//! Membership Maintainer
//!
//! Keeps every group's cached members in line with the series universe:
//!
//! - **Insert path**: new names are tested against each group's matcher,
//!   O(new series × groups), no universe scan
//! - **Full scans**: on create, expression change and rebalancing; run on a
//!   bounded worker pool fed by the scan queue
//! - **Removal**: names are dropped from every group eagerly
//!
//! # Scan lifecycle
//!
//! ```text
//! schedule(v) ──► begin: take ticket (version v) ──► match snapshot (no lock)
//!                                                          │
//!        commit: version still v and ticket ours? ◄────────┘
//!          yes → members = result + deltas recorded meanwhile
//!          no  → discard; reschedule if nothing newer is queued
//! ```

use crate::groups::error::{GroupError, GroupResult};
use crate::groups::group::{Delta, GroupHandle, GroupState, ScanTicket};
use crate::groups::registry::GroupRegistry;
use crate::pattern::Matcher;
use crate::series::SeriesUniverse;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Request to rebuild one group's membership for a given version
pub(crate) struct ScanJob {
    pub group: GroupHandle,
    pub version: u64,
}

/// Sending side of the scan queue, shared by the registry and maintainer
#[derive(Clone)]
pub struct ScanQueue {
    sender: mpsc::UnboundedSender<ScanJob>,
    /// Jobs scheduled and not yet finished
    pending: Arc<AtomicUsize>,
}

/// Receiving side of the scan queue, consumed by [`MembershipMaintainer::start`]
pub struct ScanReceiver {
    receiver: mpsc::UnboundedReceiver<ScanJob>,
}

impl ScanQueue {
    /// Create a connected queue/receiver pair
    pub fn channel() -> (Self, ScanReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                pending: Arc::new(AtomicUsize::new(0)),
            },
            ScanReceiver { receiver },
        )
    }

    pub(crate) fn schedule(&self, group: GroupHandle, version: u64) -> GroupResult<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(ScanJob { group, version }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(GroupError::MaintainerClosed);
        }
        Ok(())
    }

    fn finished(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of scans queued or running
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether the receiving side is gone
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl ScanReceiver {
    #[cfg(test)]
    pub(crate) fn try_next(&mut self) -> Option<ScanJob> {
        self.receiver.try_recv().ok()
    }
}

/// How a full scan ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Result committed as the group's membership
    Applied { members: usize },
    /// A newer edit bumped the version; the result was dropped
    Discarded { scan_version: u64, current_version: u64 },
    /// A later scan of the same version, or a rebalance, took over
    Invalidated,
    /// The group was dropped
    Cancelled,
    /// The scan task panicked
    Failed(String),
}

/// Keeps cached group membership consistent with the series universe
pub struct MembershipMaintainer {
    registry: Arc<GroupRegistry>,
    universe: Arc<dyn SeriesUniverse>,
    queue: ScanQueue,
    permits: Arc<Semaphore>,
    next_scan_id: AtomicU64,
}

impl MembershipMaintainer {
    /// Create a maintainer running at most `scan_concurrency` scans at once
    pub fn new(
        registry: Arc<GroupRegistry>,
        universe: Arc<dyn SeriesUniverse>,
        queue: ScanQueue,
        scan_concurrency: usize,
    ) -> Self {
        Self {
            registry,
            universe,
            queue,
            permits: Arc::new(Semaphore::new(scan_concurrency.max(1))),
            next_scan_id: AtomicU64::new(1),
        }
    }

    /// Start the background task draining the scan queue
    pub fn start(self: &Arc<Self>, jobs: ScanReceiver) -> tokio::task::JoinHandle<()> {
        let maintainer = Arc::clone(self);
        let mut jobs = jobs.receiver;

        tokio::spawn(async move {
            while let Some(job) = jobs.recv().await {
                let permit = match Arc::clone(&maintainer.permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let worker = Arc::clone(&maintainer);
                tokio::spawn(async move {
                    let _permit = permit;
                    worker.run_scan(job).await;
                });
            }
            tracing::debug!("Scan queue closed, maintainer stopped");
        })
    }

    /// Number of scans queued or running
    pub fn pending_scans(&self) -> usize {
        self.queue.pending()
    }

    /// Add newly inserted series to every group they match
    ///
    /// Duplicate notifications are harmless. Returns the number of
    /// memberships added.
    pub async fn on_inserted(&self, names: &[String]) -> usize {
        if names.is_empty() {
            return 0;
        }

        let mut added = 0;
        for handle in self.registry.handles().await {
            let mut state = handle.write().await;
            if !state.dropped {
                added += state.absorb(names);
            }
        }

        tracing::trace!(series = names.len(), added, "Applied inserted series");
        added
    }

    /// Remove deleted series from every group
    pub async fn on_removed(&self, names: &[String]) -> usize {
        if names.is_empty() {
            return 0;
        }

        let mut removed = 0;
        for handle in self.registry.handles().await {
            let mut state = handle.write().await;
            if !state.dropped {
                removed += state.forget(names);
            }
        }

        tracing::trace!(series = names.len(), removed, "Applied removed series");
        removed
    }

    /// Schedule a full scan for every stale group without one queued
    pub async fn rescan_stale(&self) -> usize {
        let mut scheduled = 0;

        for handle in self.registry.handles().await {
            let mut state = handle.write().await;
            if state.dropped || !state.stale || state.queued == Some(state.version) {
                continue;
            }

            let version = state.version;
            match self.queue.schedule(Arc::clone(&handle), version) {
                Ok(()) => {
                    state.queued = Some(version);
                    scheduled += 1;
                }
                Err(e) => {
                    tracing::warn!(group = %state.name, error = %e, "Cannot schedule rescan");
                }
            }
        }

        tracing::debug!(scheduled, "Scheduled rescans of stale groups");
        scheduled
    }

    /// Run one scan job to completion
    pub(crate) async fn run_scan(&self, job: ScanJob) -> ScanOutcome {
        let outcome = self.scan(&job).await;
        self.queue.finished();

        match &outcome {
            ScanOutcome::Applied { members } => {
                tracing::debug!(version = job.version, members, "Group scan applied");
            }
            ScanOutcome::Discarded {
                scan_version,
                current_version,
            } => {
                tracing::debug!(scan_version, current_version, "Discarded stale group scan");
            }
            ScanOutcome::Failed(reason) => {
                tracing::error!(version = job.version, error = %reason, "Group scan failed");
            }
            ScanOutcome::Invalidated | ScanOutcome::Cancelled => {
                tracing::trace!(version = job.version, outcome = ?outcome, "Group scan skipped");
            }
        }

        outcome
    }

    async fn scan(&self, job: &ScanJob) -> ScanOutcome {
        let scan_id = self.next_scan_id.fetch_add(1, Ordering::Relaxed);

        let matcher = match self.begin(job, scan_id).await {
            Ok(matcher) => matcher,
            Err(outcome) => return outcome,
        };

        let universe = Arc::clone(&self.universe);
        let scanned = tokio::task::spawn_blocking(move || {
            universe
                .snapshot()
                .into_iter()
                .filter(|series| matcher.matches(series))
                .collect::<BTreeSet<String>>()
        })
        .await;

        match scanned {
            Ok(members) => self.commit(job, scan_id, members).await,
            Err(e) => {
                let mut state = job.group.write().await;
                if state.scan.as_ref().map_or(false, |t| t.scan_id == scan_id) {
                    state.scan = None;
                }
                ScanOutcome::Failed(e.to_string())
            }
        }
    }

    /// Take the scan ticket for `job`, returning the matcher to scan with
    async fn begin(&self, job: &ScanJob, scan_id: u64) -> Result<Matcher, ScanOutcome> {
        let mut state = job.group.write().await;
        if state.dropped {
            return Err(ScanOutcome::Cancelled);
        }
        if state.queued == Some(job.version) {
            state.queued = None;
        }
        if state.version != job.version {
            return Err(self.supersede(&job.group, &mut state, job.version));
        }

        state.scan = Some(ScanTicket {
            scan_id,
            version: job.version,
            deltas: Vec::new(),
        });
        Ok(Arc::clone(&state.matcher))
    }

    /// Install a scan result if the ticket is still ours and the version
    /// unchanged, replaying changes recorded while it ran
    async fn commit(&self, job: &ScanJob, scan_id: u64, mut members: BTreeSet<String>) -> ScanOutcome {
        let mut state = job.group.write().await;
        let owns_ticket = state.scan.as_ref().map_or(false, |t| t.scan_id == scan_id);

        if state.dropped {
            return ScanOutcome::Cancelled;
        }
        if state.version != job.version {
            if owns_ticket {
                state.scan = None;
            }
            return self.supersede(&job.group, &mut state, job.version);
        }
        if !owns_ticket {
            return ScanOutcome::Invalidated;
        }

        if let Some(ticket) = state.scan.take() {
            for delta in ticket.deltas {
                match delta {
                    Delta::Added(name) => {
                        members.insert(name);
                    }
                    Delta::Removed(name) => {
                        members.remove(&name);
                    }
                }
            }
        }

        let count = members.len();
        state.members = Arc::new(members);
        state.stale = false;
        ScanOutcome::Applied { members: count }
    }

    /// Run every queued scan inline, including rescheduled ones
    #[cfg(test)]
    pub(crate) async fn drain(&self, jobs: &mut ScanReceiver) -> Vec<ScanOutcome> {
        let mut outcomes = Vec::new();
        while let Some(job) = jobs.try_next() {
            outcomes.push(self.run_scan(job).await);
        }
        outcomes
    }

    /// Drop a scan overtaken by a newer edit, keeping a scan for the
    /// current version on its way
    fn supersede(&self, handle: &GroupHandle, state: &mut GroupState, scan_version: u64) -> ScanOutcome {
        let current_version = state.version;
        let in_flight = state
            .scan
            .as_ref()
            .map_or(false, |t| t.version == current_version);

        if state.queued != Some(current_version) && !in_flight {
            match self.queue.schedule(Arc::clone(handle), current_version) {
                Ok(()) => state.queued = Some(current_version),
                Err(e) => {
                    tracing::warn!(group = %state.name, error = %e, "Cannot reschedule scan");
                }
            }
        }

        ScanOutcome::Discarded {
            scan_version,
            current_version,
        }
    }
}
