//! In-memory backend.
//!
//! All state sits behind one `tokio::sync::RwLock`, so every trait method is
//! atomic: a write's timestamp allocation, version check and mutation happen
//! under the same guard.

use crate::{
    models::{
        epoch::Epoch,
        object::Object,
        path::ResourcePath,
        permissions::{Ace, Permissions},
    },
    storage::{Backend, StorageError, StorageResult},
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::instrument;

#[derive(Debug, Default)]
struct State {
    /// Live objects: namespace -> id -> object.
    objects: HashMap<String, BTreeMap<String, Object>>,
    /// Deletion markers, same layout as `objects`.
    tombstones: HashMap<String, BTreeMap<String, Object>>,
    /// Last write per namespace.
    mod_times: HashMap<String, Epoch>,
    /// Last timestamp issued per scope.
    clocks: HashMap<String, Epoch>,
    /// ACL per object path.
    acls: HashMap<String, Permissions>,
    /// Member principal -> group principals it belongs to.
    memberships: BTreeMap<String, BTreeSet<String>>,
}

impl State {
    fn next_timestamp(&mut self, path: &ResourcePath) -> Epoch {
        let mut ts = Epoch::now();
        if let Some(last) = self.clocks.get(path.scope()) {
            if ts <= *last {
                ts = Epoch(last.0 + 1);
            }
        }
        if let Some(last) = self.mod_times.get(path.namespace()) {
            if ts <= *last {
                ts = Epoch(last.0 + 1);
            }
        }
        self.clocks.insert(path.scope().to_string(), ts);
        self.mod_times.insert(path.namespace().to_string(), ts);
        ts
    }

    fn live(&self, path: &ResourcePath) -> Option<&Object> {
        self.objects
            .get(path.namespace())
            .and_then(|ns| ns.get(path.object_id()))
    }

    fn check_version(&self, path: &ResourcePath, expected: Epoch) -> StorageResult<()> {
        let current = self
            .live(path)
            .ok_or_else(|| StorageError::NotFound(path.clone()))?;
        if current.last_modified != expected {
            return Err(StorageError::Conflict {
                path: path.clone(),
                expected,
                found: current.last_modified,
            });
        }
        Ok(())
    }

    fn bury(&mut self, path: &ResourcePath) -> Object {
        if let Some(ns) = self.objects.get_mut(path.namespace()) {
            ns.remove(path.object_id());
        }
        let ts = self.next_timestamp(path);
        let tomb = Object::tombstone(path.object_id(), ts);
        self.tombstones
            .entry(path.namespace().to_string())
            .or_default()
            .insert(tomb.id.clone(), tomb.clone());
        tomb
    }
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn mod_time(&self, node: &ResourcePath) -> StorageResult<Epoch> {
        let state = self.state.read().await;
        Ok(state
            .mod_times
            .get(node.namespace())
            .copied()
            .unwrap_or_default())
    }

    async fn exists(&self, path: &ResourcePath) -> StorageResult<bool> {
        Ok(self.state.read().await.live(path).is_some())
    }

    async fn get(&self, path: &ResourcePath) -> StorageResult<Object> {
        self.state
            .read()
            .await
            .live(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.clone()))
    }

    async fn list(&self, node: &ResourcePath, include_deleted: bool) -> StorageResult<Vec<Object>> {
        let state = self.state.read().await;
        let mut out: Vec<Object> = state
            .objects
            .get(node.namespace())
            .map(|ns| ns.values().cloned().collect())
            .unwrap_or_default();
        if include_deleted {
            if let Some(ns) = state.tombstones.get(node.namespace()) {
                out.extend(ns.values().cloned());
            }
        }
        Ok(out)
    }

    #[instrument(skip(self, obj), fields(id = %obj.id))]
    async fn create(&self, node: &ResourcePath, mut obj: Object) -> StorageResult<Object> {
        let path = node.with_object_id(&obj.id);
        let mut state = self.state.write().await;
        if state.live(&path).is_some() {
            return Err(StorageError::AlreadyExists(path));
        }
        if let Some(ns) = state.tombstones.get_mut(path.namespace()) {
            ns.remove(&obj.id);
        }

        obj.last_modified = state.next_timestamp(&path);
        obj.deleted = false;
        state
            .objects
            .entry(path.namespace().to_string())
            .or_default()
            .insert(obj.id.clone(), obj.clone());
        Ok(obj)
    }

    #[instrument(skip(self, obj))]
    async fn update(
        &self,
        path: &ResourcePath,
        mut obj: Object,
        expected: Epoch,
    ) -> StorageResult<Object> {
        let mut state = self.state.write().await;
        state.check_version(path, expected)?;

        obj.id = path.object_id().to_string();
        obj.deleted = false;
        obj.last_modified = state.next_timestamp(path);
        state
            .objects
            .entry(path.namespace().to_string())
            .or_default()
            .insert(obj.id.clone(), obj.clone());
        Ok(obj)
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &ResourcePath, expected: Epoch) -> StorageResult<Object> {
        let mut state = self.state.write().await;
        state.check_version(path, expected)?;

        let descendants: Vec<ResourcePath> = state
            .objects
            .iter()
            .filter(|(ns, _)| path.contains(ns))
            .flat_map(|(ns, objs)| {
                objs.keys()
                    .filter_map(move |id| ResourcePath::parse(&format!("{ns}/{id}")))
            })
            .collect();
        for child in &descendants {
            state.bury(child);
        }
        let tomb = state.bury(path);

        state
            .acls
            .retain(|acl_path, _| acl_path != path.as_str() && !path.contains(acl_path));
        for groups in state.memberships.values_mut() {
            groups.retain(|group| group != path.as_str() && !path.contains(group));
        }
        state.memberships.retain(|_, groups| !groups.is_empty());

        Ok(tomb)
    }

    async fn permissions(&self, path: &ResourcePath) -> StorageResult<Permissions> {
        let state = self.state.read().await;
        Ok(state.acls.get(path.as_str()).cloned().unwrap_or_default())
    }

    async fn set_permissions(&self, path: &ResourcePath, perms: &Permissions) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if perms.is_empty() {
            state.acls.remove(path.as_str());
        } else {
            state.acls.insert(path.to_string(), perms.clone());
        }
        Ok(())
    }

    async fn ace_principals(&self, aces: &[Ace]) -> StorageResult<BTreeSet<String>> {
        let state = self.state.read().await;
        let mut out = BTreeSet::new();
        for ace in aces {
            if let Some(principals) = state
                .acls
                .get(ace.path.as_str())
                .and_then(|acl| acl.get(&ace.perm))
            {
                out.extend(principals.iter().cloned());
            }
        }
        Ok(out)
    }

    async fn accessible_ids(
        &self,
        node: &ResourcePath,
        principals: &[String],
        perms: &[&str],
    ) -> StorageResult<BTreeSet<String>> {
        let state = self.state.read().await;
        let Some(objects) = state.objects.get(node.namespace()) else {
            return Ok(BTreeSet::new());
        };

        let ids = objects
            .keys()
            .filter(|id| {
                let path = format!("{}/{}", node.namespace(), id);
                state.acls.get(&path).is_some_and(|acl| {
                    perms.iter().any(|perm| {
                        acl.get(perm)
                            .is_some_and(|granted| principals.iter().any(|p| granted.contains(p)))
                    })
                })
            })
            .cloned()
            .collect();
        Ok(ids)
    }

    async fn memberships(&self, members: &[String]) -> StorageResult<BTreeSet<String>> {
        let state = self.state.read().await;
        Ok(members
            .iter()
            .filter_map(|member| state.memberships.get(member))
            .flatten()
            .cloned()
            .collect())
    }

    async fn add_membership(&self, principal: &str, members: &[String]) -> StorageResult<()> {
        let mut state = self.state.write().await;
        for member in members {
            state
                .memberships
                .entry(member.clone())
                .or_default()
                .insert(principal.to_string());
        }
        Ok(())
    }

    async fn remove_membership(&self, principal: &str) -> StorageResult<()> {
        let mut state = self.state.write().await;
        for groups in state.memberships.values_mut() {
            groups.remove(principal);
        }
        state.memberships.retain(|_, groups| !groups.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> ResourcePath {
        ResourcePath::parse(raw).unwrap()
    }

    fn record(id: &str) -> Object {
        Object::from_data(id, json!({"title": id}).as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn timestamps_strictly_increase_within_a_bucket() {
        let backend = MemoryBackend::new();
        let node = path("/buckets/b/collections/c/records/*");
        let a = backend.create(&node, record("a")).await.unwrap();
        let b = backend.create(&node, record("b")).await.unwrap();
        assert!(b.last_modified > a.last_modified);

        let updated = backend
            .update(&node.with_object_id("a"), record("a"), a.last_modified)
            .await
            .unwrap();
        assert!(updated.last_modified > b.last_modified);
        assert_eq!(backend.mod_time(&node).await.unwrap(), updated.last_modified);
    }

    #[tokio::test]
    async fn stale_versions_conflict() {
        let backend = MemoryBackend::new();
        let node = path("/buckets/b/collections/*");
        let created = backend.create(&node, record("c")).await.unwrap();
        let target = node.with_object_id("c");
        backend
            .update(&target, record("c"), created.last_modified)
            .await
            .unwrap();
        let err = backend
            .update(&target, record("c"), created.last_modified)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
    }

    #[tokio::test]
    async fn delete_cascades_and_leaves_tombstones() {
        let backend = MemoryBackend::new();
        let bucket = backend
            .create(&path("/buckets/*"), record("b"))
            .await
            .unwrap();
        backend
            .create(&path("/buckets/b/collections/*"), record("c"))
            .await
            .unwrap();
        let mut perms = Permissions::new();
        perms.grant("write", "account:alice");
        backend
            .set_permissions(&path("/buckets/b/collections/c"), &perms)
            .await
            .unwrap();
        backend
            .add_membership("/buckets/b/groups/g", &["account:bob".to_string()])
            .await
            .unwrap();

        let tomb = backend
            .delete(&path("/buckets/b"), bucket.last_modified)
            .await
            .unwrap();
        assert!(tomb.deleted);
        assert!(!backend.exists(&path("/buckets/b/collections/c")).await.unwrap());
        assert!(
            backend
                .permissions(&path("/buckets/b/collections/c"))
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            backend
                .memberships(&["account:bob".to_string()])
                .await
                .unwrap()
                .is_empty()
        );

        let listed = backend
            .list(&path("/buckets/b/collections/*"), true)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].deleted);
    }

    #[tokio::test]
    async fn accessible_ids_follow_object_acls() {
        let backend = MemoryBackend::new();
        let node = path("/buckets/*");
        backend.create(&node, record("mine")).await.unwrap();
        backend.create(&node, record("theirs")).await.unwrap();
        let mut perms = Permissions::new();
        perms.grant("read", "account:alice");
        backend
            .set_permissions(&path("/buckets/mine"), &perms)
            .await
            .unwrap();

        let ids = backend
            .accessible_ids(&node, &["account:alice".to_string()], &["read", "write"])
            .await
            .unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["mine".to_string()]);
    }
}
