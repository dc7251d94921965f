//! Permission resolution.
//!
//! Access is granted when any caller principal appears among the principals
//! stored for any of the requested entries, or among the configured static
//! principals for the entry's permission kind (`bucket:create`, ...).
//! Callers pass one entry per ancestor so grants on a bucket cover
//! everything beneath it.

use crate::{
    errors::AppError,
    models::{
        path::ResourcePath,
        permissions::{Ace, traversal_aces},
    },
    services::auth_service::Caller,
    storage::{Backend, StorageResult},
};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    /// Permission kind -> principals granted it everywhere.
    static_grants: HashMap<String, Vec<String>>,
}

impl Authorizer {
    pub fn new(static_grants: HashMap<String, Vec<String>>) -> Self {
        Self { static_grants }
    }

    /// Caller principals plus `group:<id>` aliases for groups of the bucket
    /// the checked path lives in.
    fn principals_for(&self, caller: &Caller, path: &ResourcePath) -> Vec<String> {
        let mut principals = caller.principals.clone();
        if let Some(bucket) = path.bucket_id() {
            let prefix = format!("/buckets/{bucket}/groups/");
            let aliases: Vec<String> = caller
                .principals
                .iter()
                .filter_map(|p| p.strip_prefix(prefix.as_str()))
                .filter(|group| !group.contains('/'))
                .map(|group| format!("group:{group}"))
                .collect();
            principals.extend(aliases);
        }
        principals
    }

    /// Whether any entry grants access to the caller.
    pub async fn verify(
        &self,
        backend: &dyn Backend,
        caller: &Caller,
        aces: &[Ace],
    ) -> StorageResult<bool> {
        let Some(first) = aces.first() else {
            return Ok(false);
        };
        let principals = self.principals_for(caller, &first.path);

        for ace in aces {
            if let Some(allowed) = self.static_grants.get(&ace.perm) {
                if allowed.iter().any(|a| principals.contains(a)) {
                    return Ok(true);
                }
            }
        }

        let granted = backend.ace_principals(aces).await?;
        Ok(principals.iter().any(|p| granted.contains(p)))
    }

    /// Fail with 401 for anonymous callers and 403 otherwise.
    pub async fn require(
        &self,
        backend: &dyn Backend,
        caller: &Caller,
        aces: &[Ace],
    ) -> Result<(), AppError> {
        if self.verify(backend, caller, aces).await? {
            Ok(())
        } else {
            tracing::debug!(caller = %caller.id, "permission denied");
            Err(denied(caller))
        }
    }

    /// Require one of `perms` on `path` or any ancestor.
    pub async fn check(
        &self,
        backend: &dyn Backend,
        caller: &Caller,
        path: &ResourcePath,
        perms: &[&str],
    ) -> Result<(), AppError> {
        self.require(backend, caller, &traversal_aces(path, perms))
            .await
    }

    /// Whether `perms` are inherited from `path` or its ancestors.
    pub async fn inherits(
        &self,
        backend: &dyn Backend,
        caller: &Caller,
        path: &ResourcePath,
        perms: &[&str],
    ) -> StorageResult<bool> {
        self.verify(backend, caller, &traversal_aces(path, perms))
            .await
    }

    /// Ids in a listing whose own ACL grants the caller one of `perms`.
    pub async fn accessible_ids(
        &self,
        backend: &dyn Backend,
        caller: &Caller,
        node: &ResourcePath,
        perms: &[&str],
    ) -> StorageResult<BTreeSet<String>> {
        let principals = self.principals_for(caller, node);
        backend.accessible_ids(node, &principals, perms).await
    }
}

pub fn denied(caller: &Caller) -> AppError {
    if caller.is_anonymous() {
        AppError::unauthorized()
    } else {
        AppError::forbidden()
    }
}
