//! Group definitions and cached membership

use crate::cluster::PoolId;
use crate::pattern::Matcher;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Cached membership of a group
///
/// Swapped copy-on-write so readers keep a consistent snapshot while a
/// writer rebuilds it.
pub type MemberSet = Arc<BTreeSet<String>>;

/// Shared, individually locked group state
///
/// The lock is the per-group single-writer gate: incremental updates, scan
/// commits and edits of one group are serialized here, other groups are
/// unaffected.
pub type GroupHandle = Arc<RwLock<GroupState>>;

/// Membership change recorded while a full scan is in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Delta {
    Added(String),
    Removed(String),
}

/// Marks the scan currently allowed to commit
#[derive(Debug)]
pub(crate) struct ScanTicket {
    pub scan_id: u64,
    pub version: u64,
    pub deltas: Vec<Delta>,
}

/// Mutable state of one group
#[derive(Debug)]
pub struct GroupState {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) expression: String,
    pub(crate) matcher: Matcher,
    pub(crate) members: MemberSet,
    /// Bumped on create, rename and expression change
    pub(crate) version: u64,
    pub(crate) origin: PoolId,
    /// Membership may not reflect the universe yet
    pub(crate) stale: bool,
    /// Set once the group is dropped; pending scans become no-ops
    pub(crate) dropped: bool,
    /// Version of a scan job waiting in the queue, if any
    pub(crate) queued: Option<u64>,
    pub(crate) scan: Option<ScanTicket>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl GroupState {
    pub(crate) fn new(
        id: Uuid,
        name: impl Into<String>,
        expression: impl Into<String>,
        matcher: Matcher,
        version: u64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            expression: expression.into(),
            matcher,
            members: Arc::new(BTreeSet::new()),
            version,
            origin: 0,
            stale: true,
            dropped: false,
            queued: None,
            scan: None,
            updated_at: Utc::now(),
        }
    }

    /// Wrap into a shareable handle
    pub(crate) fn into_handle(self) -> GroupHandle {
        Arc::new(RwLock::new(self))
    }

    /// Add names that match this group's expression
    ///
    /// Matches are also recorded against an in-flight scan so its result
    /// does not drop them. Returns the number of names added.
    pub(crate) fn absorb(&mut self, names: &[String]) -> usize {
        let Self {
            matcher,
            members,
            scan,
            ..
        } = self;

        let mut added = 0;
        for name in names.iter().filter(|name| matcher.matches(name)) {
            if let Some(ticket) = scan.as_mut() {
                ticket.deltas.push(Delta::Added(name.clone()));
            }
            if !members.contains(name.as_str()) && Arc::make_mut(members).insert(name.clone()) {
                added += 1;
            }
        }
        added
    }

    /// Remove names from the membership, recording them against a scan
    pub(crate) fn forget(&mut self, names: &[String]) -> usize {
        let Self { members, scan, .. } = self;

        let mut removed = 0;
        for name in names {
            if let Some(ticket) = scan.as_mut() {
                ticket.deltas.push(Delta::Removed(name.clone()));
            }
            if members.contains(name) && Arc::make_mut(members).remove(name) {
                removed += 1;
            }
        }
        removed
    }

    /// Bump the version after an edit made on `origin`
    pub(crate) fn touch(&mut self, origin: PoolId) -> u64 {
        self.version += 1;
        self.origin = origin;
        self.updated_at = Utc::now();
        self.version
    }

    /// Mark dropped; queued and in-flight scans become no-ops
    pub(crate) fn retire(&mut self) {
        self.dropped = true;
        self.scan = None;
        self.queued = None;
    }

    /// Ordering key of the last edit: version, ties broken by pool
    pub(crate) fn stamp(&self) -> (u64, PoolId) {
        (self.version, self.origin)
    }

    pub(crate) fn snapshot(&self) -> Group {
        Group {
            id: self.id,
            name: self.name.clone(),
            expression: self.expression.clone(),
            members: Arc::clone(&self.members),
            version: self.version,
            origin: self.origin,
            stale: self.stale,
            updated_at: self.updated_at,
        }
    }

    pub(crate) fn summary(&self) -> GroupSummary {
        GroupSummary {
            id: self.id,
            name: self.name.clone(),
            expression: self.expression.clone(),
            series: self.members.len(),
            version: self.version,
            stale: self.stale,
        }
    }
}

/// Point-in-time view of a group
#[derive(Debug, Clone)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub expression: String,
    pub members: MemberSet,
    pub version: u64,
    /// Pool that made the last edit
    pub origin: PoolId,
    pub stale: bool,
    pub updated_at: DateTime<Utc>,
}

/// Row of a group listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub id: Uuid,
    pub name: String,
    pub expression: String,
    /// Number of cached members
    pub series: usize,
    pub version: u64,
    pub stale: bool,
}
