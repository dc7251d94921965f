//! Persistence interface for objects, ACLs and principal memberships.
//!
//! The resource engine only talks to [`Backend`]. Two implementations ship:
//! [`memory::MemoryBackend`] for tests and single-process use, and
//! [`sqlite::SqliteBackend`] on top of `sqlx`.
//!
//! Backends own the version clocks. Every write allocates its timestamp
//! atomically with the write itself, strictly above the last timestamp
//! issued in the same scope (bucket or account) and namespace.

pub mod memory;
pub mod sqlite;

use crate::models::{
    epoch::Epoch,
    object::Object,
    path::ResourcePath,
    permissions::{Ace, Permissions},
};
use async_trait::async_trait;
use std::{collections::BTreeSet, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(ResourcePath),
    #[error("object `{0}` already exists")]
    AlreadyExists(ResourcePath),
    #[error("object `{path}` was modified: expected version {expected}, found {found}")]
    Conflict {
        path: ResourcePath,
        expected: Epoch,
        found: Epoch,
    },
    #[error("unsupported storage url `{0}`")]
    UnsupportedUrl(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Cheap connectivity probe for heartbeats.
    async fn ping(&self) -> StorageResult<()>;

    /// Last modification time of a listing path's namespace, zero if never
    /// written. Deletions advance it too.
    async fn mod_time(&self, node: &ResourcePath) -> StorageResult<Epoch>;

    /// Whether a live object exists at `path`.
    async fn exists(&self, path: &ResourcePath) -> StorageResult<bool>;

    /// Fetch a live object.
    async fn get(&self, path: &ResourcePath) -> StorageResult<Object>;

    /// All objects in a listing path's namespace, optionally with tombstones.
    async fn list(&self, node: &ResourcePath, include_deleted: bool) -> StorageResult<Vec<Object>>;

    /// Insert a new object into the namespace of `node`, replacing a
    /// tombstone with the same id. Fails `AlreadyExists` for live objects.
    async fn create(&self, node: &ResourcePath, obj: Object) -> StorageResult<Object>;

    /// Replace an object whose current version equals `expected`.
    async fn update(&self, path: &ResourcePath, obj: Object, expected: Epoch)
    -> StorageResult<Object>;

    /// Delete an object whose current version equals `expected`, cascading
    /// to every object, ACL and membership beneath it. Returns the tombstone.
    async fn delete(&self, path: &ResourcePath, expected: Epoch) -> StorageResult<Object>;

    /// ACL of one path (empty when none stored).
    async fn permissions(&self, path: &ResourcePath) -> StorageResult<Permissions>;

    /// Replace the ACL of one path.
    async fn set_permissions(&self, path: &ResourcePath, perms: &Permissions) -> StorageResult<()>;

    /// Union of principals granted any of the given entries.
    async fn ace_principals(&self, aces: &[Ace]) -> StorageResult<BTreeSet<String>>;

    /// Ids in the namespace of `node` whose own ACL grants one of `perms`
    /// to one of `principals`.
    async fn accessible_ids(
        &self,
        node: &ResourcePath,
        principals: &[String],
        perms: &[&str],
    ) -> StorageResult<BTreeSet<String>>;

    /// Group principals that list any of `members`.
    async fn memberships(&self, members: &[String]) -> StorageResult<BTreeSet<String>>;

    /// Record that each of `members` belongs to `principal`.
    async fn add_membership(&self, principal: &str, members: &[String]) -> StorageResult<()>;

    /// Forget every membership in `principal`.
    async fn remove_membership(&self, principal: &str) -> StorageResult<()>;
}

/// Open a backend from a URL: `memory:` or `sqlite://...`.
pub async fn connect(url: &str) -> StorageResult<Arc<dyn Backend>> {
    if url == "memory:" || url == "memory://" {
        return Ok(Arc::new(memory::MemoryBackend::new()));
    }
    if url.starts_with("sqlite:") {
        let backend = sqlite::SqliteBackend::connect(url).await?;
        return Ok(Arc::new(backend));
    }
    Err(StorageError::UnsupportedUrl(url.to_string()))
}
