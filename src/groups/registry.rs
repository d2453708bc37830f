//! Group Registry
//!
//! Authoritative mapping of group name → definition and cached membership.
//! Expressions are compiled before any state changes, so a failed command
//! never leaves a half-updated group behind.
//!
//! # Locking
//!
//! ```text
//! registry map (RwLock) ──► group state (RwLock per group)
//! ```
//!
//! Locks are always taken in that order. Readers clone the member `Arc`
//! and release the group lock immediately.

use crate::cluster::PoolId;
use crate::groups::error::{GroupError, GroupResult};
use crate::groups::group::{Group, GroupHandle, GroupState, GroupSummary, MemberSet};
use crate::groups::maintainer::ScanQueue;
use crate::groups::replication::GroupEdit;
use crate::pattern::PatternCompiler;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Longest accepted group name in bytes
pub const MAX_GROUP_NAME_LEN: usize = 255;

/// Registry contents guarded by a single lock
#[derive(Default)]
pub(super) struct Groups {
    /// Group name → state handle
    pub by_name: HashMap<String, GroupHandle>,
    /// Dropped group id → version of the drop; drops are final
    pub tombstones: HashMap<Uuid, u64>,
}

impl Groups {
    /// Locate a group by its stable id
    pub async fn find_by_id(&self, id: Uuid) -> Option<(String, GroupHandle)> {
        for (name, handle) in &self.by_name {
            if handle.read().await.id == id {
                return Some((name.clone(), Arc::clone(handle)));
            }
        }
        None
    }
}

/// Registry of named, pattern-defined groups
pub struct GroupRegistry {
    pub(super) groups: RwLock<Groups>,
    pub(super) compiler: Arc<dyn PatternCompiler>,
    pub(super) scans: ScanQueue,
    /// Pool stamped on local edits
    pub(super) origin: PoolId,
    edits: broadcast::Sender<GroupEdit>,
}

impl GroupRegistry {
    /// Create an empty registry
    ///
    /// `edit_capacity` bounds how many edits a slow replication subscriber
    /// may lag behind before it starts missing them.
    pub fn new(compiler: Arc<dyn PatternCompiler>, scans: ScanQueue, edit_capacity: usize) -> Self {
        let (edits, _) = broadcast::channel(edit_capacity.max(1));
        Self {
            groups: RwLock::new(Groups::default()),
            compiler,
            scans,
            origin: 0,
            edits,
        }
    }

    /// Stamp local edits with `pool`, so concurrent edits made on
    /// different pools order the same way everywhere
    pub fn with_origin(mut self, pool: PoolId) -> Self {
        self.origin = pool;
        self
    }

    pub fn origin(&self) -> PoolId {
        self.origin
    }

    /// Compiler used for group expressions
    pub fn compiler(&self) -> Arc<dyn PatternCompiler> {
        Arc::clone(&self.compiler)
    }

    /// Create a group and schedule its initial membership scan
    ///
    /// The group exists as soon as this returns; its members become accurate
    /// once the scan completes.
    pub async fn create(&self, name: &str, expression: &str) -> GroupResult<Group> {
        validate_name(name)?;
        let matcher = self.compiler.compile(expression)?;

        let mut groups = self.groups.write().await;
        if groups.by_name.contains_key(name) {
            return Err(GroupError::DuplicateName(name.to_string()));
        }

        let mut state = GroupState::new(Uuid::new_v4(), name, expression.trim(), matcher, 1);
        state.origin = self.origin;
        state.queued = Some(state.version);
        let group = state.snapshot();
        let handle = state.into_handle();

        self.scans.schedule(Arc::clone(&handle), group.version)?;
        groups.by_name.insert(name.to_string(), handle);
        drop(groups);

        tracing::info!(group = %name, expression = %group.expression, "Group created");
        self.publish(GroupEdit::upsert(&group));
        Ok(group)
    }

    /// Rename a group; membership and expression are untouched
    pub async fn rename(&self, name: &str, new_name: &str) -> GroupResult<Group> {
        validate_name(new_name)?;

        let mut groups = self.groups.write().await;
        let handle = groups
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| GroupError::NotFound(name.to_string()))?;

        if name == new_name {
            return Ok(handle.read().await.snapshot());
        }
        if groups.by_name.contains_key(new_name) {
            return Err(GroupError::DuplicateName(new_name.to_string()));
        }

        let mut state = handle.write().await;
        groups.by_name.remove(name);
        groups.by_name.insert(new_name.to_string(), Arc::clone(&handle));
        state.name = new_name.to_string();
        state.touch(self.origin);
        let group = state.snapshot();
        drop(state);
        drop(groups);

        tracing::info!(group = %name, new_name = %new_name, version = group.version, "Group renamed");
        self.publish(GroupEdit::upsert(&group));
        Ok(group)
    }

    /// Replace a group's expression and schedule a full rescan
    ///
    /// The rescan replaces the members wholesale; scans started for an older
    /// version are discarded when they finish.
    pub async fn set_expression(&self, name: &str, expression: &str) -> GroupResult<Group> {
        let matcher = self.compiler.compile(expression)?;
        if self.scans.is_closed() {
            return Err(GroupError::MaintainerClosed);
        }

        let handle = self.handle(name).await?;
        let mut state = handle.write().await;
        if state.dropped {
            return Err(GroupError::NotFound(name.to_string()));
        }

        state.expression = expression.trim().to_string();
        state.matcher = matcher;
        state.stale = true;
        let version = state.touch(self.origin);
        state.queued = Some(version);
        self.scans.schedule(Arc::clone(&handle), version)?;
        let group = state.snapshot();
        drop(state);

        tracing::info!(group = %name, expression = %group.expression, version, "Group expression changed");
        self.publish(GroupEdit::upsert(&group));
        Ok(group)
    }

    /// Remove a group and all of its cached state
    pub async fn drop_group(&self, name: &str) -> GroupResult<()> {
        let mut groups = self.groups.write().await;
        let handle = groups
            .by_name
            .remove(name)
            .ok_or_else(|| GroupError::NotFound(name.to_string()))?;

        let mut state = handle.write().await;
        state.retire();
        let (id, version) = (state.id, state.version + 1);
        drop(state);

        groups.tombstones.insert(id, version);
        drop(groups);

        tracing::info!(group = %name, "Group dropped");
        self.publish(GroupEdit::Drop { id, version });
        Ok(())
    }

    /// Point-in-time view of a group
    pub async fn get(&self, name: &str) -> GroupResult<Group> {
        let handle = self.handle(name).await?;
        let state = handle.read().await;
        Ok(state.snapshot())
    }

    /// Consistent snapshot of a group's cached members
    pub async fn snapshot_members(&self, name: &str) -> GroupResult<MemberSet> {
        let handle = self.handle(name).await?;
        let state = handle.read().await;
        Ok(Arc::clone(&state.members))
    }

    /// Summaries of every group ordered by name
    pub async fn list_all(&self) -> Vec<GroupSummary> {
        let mut summaries = Vec::new();
        for handle in self.handles().await {
            summaries.push(handle.read().await.summary());
        }
        summaries
    }

    /// Number of registered groups
    pub async fn count(&self) -> usize {
        self.groups.read().await.by_name.len()
    }

    /// Number of groups whose membership is not yet trusted
    pub async fn stale_count(&self) -> usize {
        let mut stale = 0;
        for handle in self.handles().await {
            if handle.read().await.stale {
                stale += 1;
            }
        }
        stale
    }

    /// Flag every group's membership as possibly outdated
    ///
    /// Scans already in flight lose their ticket and will not clear the flag.
    pub async fn mark_all_stale(&self) -> usize {
        let handles = self.handles().await;
        for handle in &handles {
            let mut state = handle.write().await;
            state.stale = true;
            state.scan = None;
        }
        tracing::info!(groups = handles.len(), "Marked group membership stale");
        handles.len()
    }

    /// Subscribe to committed edits, for replication to other pools
    pub fn subscribe(&self) -> broadcast::Receiver<GroupEdit> {
        self.edits.subscribe()
    }

    /// Handles of all groups ordered by name
    pub(crate) async fn handles(&self) -> Vec<GroupHandle> {
        let groups = self.groups.read().await;
        let mut entries: Vec<(&String, &GroupHandle)> = groups.by_name.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    async fn handle(&self, name: &str) -> GroupResult<GroupHandle> {
        self.groups
            .read()
            .await
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| GroupError::NotFound(name.to_string()))
    }

    fn publish(&self, edit: GroupEdit) {
        // no subscribers is fine: replication is optional
        let _ = self.edits.send(edit);
    }
}

fn validate_name(name: &str) -> GroupResult<()> {
    if name.is_empty() {
        return Err(GroupError::InvalidName("name cannot be empty".to_string()));
    }
    if name.len() > MAX_GROUP_NAME_LEN {
        return Err(GroupError::InvalidName(format!(
            "name exceeds {} bytes",
            MAX_GROUP_NAME_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::maintainer::{ScanQueue, ScanReceiver};
    use crate::pattern::RegexCompiler;

    fn registry() -> (GroupRegistry, ScanReceiver) {
        let (queue, receiver) = ScanQueue::channel();
        let registry = GroupRegistry::new(Arc::new(RegexCompiler::new()), queue, 16);
        (registry, receiver)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (registry, _jobs) = registry();
        let group = registry.create("a", "/a.*/").await.unwrap();

        assert_eq!(group.version, 1);
        assert!(group.stale);
        assert!(group.members.is_empty());
        assert_eq!(registry.get("a").await.unwrap().expression, "/a.*/");
        assert_eq!(registry.scans.pending(), 1);
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let (registry, _jobs) = registry();
        registry.create("a", "/a.*/").await.unwrap();
        let err = registry.create("a", "/b.*/").await.unwrap_err();
        assert_eq!(err, GroupError::DuplicateName("a".to_string()));
        assert_eq!(registry.get("a").await.unwrap().expression, "/a.*/");
    }

    #[tokio::test]
    async fn test_create_invalid_expression_leaves_registry_untouched() {
        let (registry, _jobs) = registry();
        let err = registry.create("invalid", "/(/").await.unwrap_err();
        assert!(matches!(err, GroupError::Compile(_)));
        assert!(err.to_string().starts_with("Cannot compile regular expression"));
        assert_eq!(registry.count().await, 0);
        assert_eq!(registry.scans.pending(), 0);
    }

    #[tokio::test]
    async fn test_invalid_names() {
        let (registry, _jobs) = registry();
        assert!(matches!(
            registry.create("", "/a/").await,
            Err(GroupError::InvalidName(_))
        ));
        let long = "x".repeat(MAX_GROUP_NAME_LEN + 1);
        assert!(matches!(
            registry.create(&long, "/a/").await,
            Err(GroupError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_rename() {
        let (registry, _jobs) = registry();
        let before = registry.create("one", "/.1/").await.unwrap();
        let after = registry.rename("one", "two").await.unwrap();

        assert_eq!(after.id, before.id);
        assert_eq!(after.name, "two");
        assert_eq!(after.expression, before.expression);
        assert_eq!(after.version, 2);
        assert!(Arc::ptr_eq(&after.members, &before.members));
        assert!(matches!(registry.get("one").await, Err(GroupError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rename_errors() {
        let (registry, _jobs) = registry();
        registry.create("a", "/a.*/").await.unwrap();
        registry.create("b", "/b.*/").await.unwrap();

        assert_eq!(
            registry.rename("missing", "c").await.unwrap_err(),
            GroupError::NotFound("missing".to_string())
        );
        assert_eq!(
            registry.rename("a", "b").await.unwrap_err(),
            GroupError::DuplicateName("b".to_string())
        );
        assert_eq!(registry.rename("a", "a").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_set_expression() {
        let (registry, _jobs) = registry();
        registry.create("g", "/.1/").await.unwrap();
        let group = registry.set_expression("g", "/.2/").await.unwrap();

        assert_eq!(group.expression, "/.2/");
        assert_eq!(group.version, 2);
        assert_eq!(registry.scans.pending(), 2);

        let err = registry.set_expression("g", "/(/").await.unwrap_err();
        assert!(matches!(err, GroupError::Compile(_)));
        assert_eq!(registry.get("g").await.unwrap().expression, "/.2/");
        assert!(matches!(
            registry.set_expression("nope", "/x/").await,
            Err(GroupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_drop() {
        let (registry, _jobs) = registry();
        registry.create("a", "/a.*/").await.unwrap();
        let handle = registry.handle("a").await.unwrap();

        registry.drop_group("a").await.unwrap();
        assert!(handle.read().await.dropped);
        assert_eq!(registry.count().await, 0);
        assert!(matches!(
            registry.drop_group("a").await,
            Err(GroupError::NotFound(_))
        ));
        // name is free again
        registry.create("a", "/a.*/").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_all_is_ordered_by_name() {
        let (registry, _jobs) = registry();
        for name in ["c", "a", "b"] {
            registry.create(name, "/x/").await.unwrap();
        }
        let names: Vec<String> = registry.list_all().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_edits_are_published() {
        let (registry, _jobs) = registry();
        let mut edits = registry.subscribe();

        let group = registry.create("a", "/a.*/").await.unwrap();
        registry.rename("a", "b").await.unwrap();
        registry.drop_group("b").await.unwrap();

        assert_eq!(edits.recv().await.unwrap(), GroupEdit::upsert(&group));
        match edits.recv().await.unwrap() {
            GroupEdit::Upsert { name, version, .. } => {
                assert_eq!(name, "b");
                assert_eq!(version, 2);
            }
            other => panic!("unexpected edit {:?}", other),
        }
        assert_eq!(
            edits.recv().await.unwrap(),
            GroupEdit::Drop {
                id: group.id,
                version: 3
            }
        );
    }

    #[tokio::test]
    async fn test_create_fails_when_maintainer_gone() {
        let (registry, jobs) = registry();
        drop(jobs);
        assert_eq!(
            registry.create("a", "/a/").await.unwrap_err(),
            GroupError::MaintainerClosed
        );
        assert_eq!(registry.count().await, 0);
    }
}
