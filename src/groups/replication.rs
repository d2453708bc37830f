//! Group definition replication
//!
//! Every committed edit is published as a [`GroupEdit`]; peers feed them to
//! [`GroupRegistry::apply_replicated`]. Edits carry the group's stable id,
//! version and originating pool, so they may arrive late, twice, or out of
//! order and every pool still settles on the same definitions:
//!
//! ```text
//! pool 0: create/rename/set/drop ──► GroupEdit ──► broadcast ──► pool 1..n
//!                                                              apply_replicated
//! ```
//!
//! # Ordering
//!
//! - Upserts of one group are ordered by `(version, origin)`; the highest wins
//! - Drops are final: a tombstone rejects every later upsert of that id
//! - Two ids claiming one name: the lower id keeps it, the other is dropped

use crate::cluster::PoolId;
use crate::groups::error::GroupError;
use crate::groups::group::{Group, GroupState};
use crate::groups::registry::{GroupRegistry, Groups};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Replicated change to a group definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GroupEdit {
    /// Full definition after a create, rename or expression change
    Upsert {
        id: Uuid,
        version: u64,
        /// Pool that made the edit, breaks ties between equal versions
        #[serde(default)]
        origin: PoolId,
        name: String,
        expression: String,
    },
    /// Group removed
    Drop { id: Uuid, version: u64 },
}

impl GroupEdit {
    pub fn upsert(group: &Group) -> Self {
        GroupEdit::Upsert {
            id: group.id,
            version: group.version,
            origin: group.origin,
            name: group.name.clone(),
            expression: group.expression.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            GroupEdit::Upsert { id, .. } | GroupEdit::Drop { id, .. } => *id,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            GroupEdit::Upsert { version, .. } | GroupEdit::Drop { version, .. } => *version,
        }
    }
}

/// Result of applying a replicated edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationOutcome {
    Applied,
    /// Already seen, or superseded by a newer local edit
    Ignored,
    /// Conflicts with local state and was not applied
    Rejected(String),
}

impl GroupRegistry {
    /// Apply an edit received from another pool
    ///
    /// Applied edits are not re-published.
    pub async fn apply_replicated(&self, edit: GroupEdit) -> ReplicationOutcome {
        let outcome = match edit {
            GroupEdit::Upsert {
                id,
                version,
                origin,
                ref name,
                ref expression,
            } => self.apply_upsert(id, (version, origin), name, expression).await,
            GroupEdit::Drop { id, version } => self.apply_drop(id, version).await,
        };

        match &outcome {
            ReplicationOutcome::Applied => {
                tracing::debug!(id = %edit.id(), version = edit.version(), "Applied replicated group edit");
            }
            ReplicationOutcome::Ignored => {
                tracing::trace!(id = %edit.id(), version = edit.version(), "Ignored replicated group edit");
            }
            ReplicationOutcome::Rejected(reason) => {
                tracing::warn!(id = %edit.id(), version = edit.version(), reason = %reason, "Rejected replicated group edit");
            }
        }
        outcome
    }

    async fn apply_upsert(
        &self,
        id: Uuid,
        stamp: (u64, PoolId),
        name: &str,
        expression: &str,
    ) -> ReplicationOutcome {
        let (version, origin) = stamp;
        let mut groups = self.groups.write().await;
        if groups.tombstones.contains_key(&id) {
            return ReplicationOutcome::Ignored;
        }

        let Some((current_name, handle)) = groups.find_by_id(id).await else {
            let matcher = match self.compiler.compile(expression) {
                Ok(matcher) => matcher,
                Err(e) => return ReplicationOutcome::Rejected(e.to_string()),
            };
            if !claim_name(&mut groups, id, name).await {
                groups.tombstones.insert(id, version);
                return ReplicationOutcome::Rejected(GroupError::DuplicateName(name.to_string()).to_string());
            }

            let mut state = GroupState::new(id, name, expression, matcher, version);
            state.origin = origin;
            state.queued = Some(version);
            let handle = state.into_handle();
            if let Err(e) = self.scans.schedule(Arc::clone(&handle), version) {
                return ReplicationOutcome::Rejected(e.to_string());
            }
            groups.by_name.insert(name.to_string(), handle);
            return ReplicationOutcome::Applied;
        };

        let mut state = handle.write().await;
        if state.stamp() >= stamp {
            return ReplicationOutcome::Ignored;
        }

        let matcher = if state.expression != expression {
            match self.compiler.compile(expression) {
                Ok(matcher) => Some(matcher),
                Err(e) => return ReplicationOutcome::Rejected(e.to_string()),
            }
        } else {
            None
        };

        if current_name != name {
            if !claim_name(&mut groups, id, name).await {
                // lost the name to a lower id: the group goes on every pool
                state.retire();
                drop(state);
                groups.by_name.remove(&current_name);
                groups.tombstones.insert(id, version);
                return ReplicationOutcome::Rejected(GroupError::DuplicateName(name.to_string()).to_string());
            }
            groups.by_name.remove(&current_name);
            groups.by_name.insert(name.to_string(), Arc::clone(&handle));
            state.name = name.to_string();
        }

        state.version = version;
        state.origin = origin;
        state.updated_at = Utc::now();

        if let Some(matcher) = matcher {
            state.expression = expression.to_string();
            state.matcher = matcher;
            state.stale = true;
            state.queued = Some(version);
            if let Err(e) = self.scans.schedule(Arc::clone(&handle), version) {
                state.queued = None;
                tracing::warn!(group = %name, error = %e, "Cannot schedule rescan for replicated edit");
            }
        }

        ReplicationOutcome::Applied
    }

    async fn apply_drop(&self, id: Uuid, version: u64) -> ReplicationOutcome {
        let mut groups = self.groups.write().await;
        if groups.tombstones.contains_key(&id) {
            return ReplicationOutcome::Ignored;
        }

        if let Some((name, handle)) = groups.find_by_id(id).await {
            handle.write().await.retire();
            groups.by_name.remove(&name);
        }

        // also recorded for unknown ids, in case the upsert arrives later
        groups.tombstones.insert(id, version);
        ReplicationOutcome::Applied
    }
}

/// Make `name` available to group `id`
///
/// A group holding the name under a higher id is dropped and tombstoned.
/// Returns false when the holder has the lower id and keeps the name.
async fn claim_name(groups: &mut Groups, id: Uuid, name: &str) -> bool {
    let Some(holder) = groups.by_name.get(name).cloned() else {
        return true;
    };

    let mut held = holder.write().await;
    if held.id == id {
        return true;
    }
    if held.id < id {
        return false;
    }

    tracing::warn!(group = %name, kept = %id, dropped = %held.id, "Group name claimed by two ids, keeping the lower");
    held.retire();
    let (loser, version) = (held.id, held.version);
    drop(held);
    groups.by_name.remove(name);
    groups.tombstones.insert(loser, version);
    true
}
