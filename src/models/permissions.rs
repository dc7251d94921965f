//! Access-control lists and well-known principals.

use crate::models::path::ResourcePath;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Every caller, authenticated or not.
pub const EVERYONE: &str = "system.Everyone";
/// Every caller with valid credentials.
pub const AUTHENTICATED: &str = "system.Authenticated";

pub const READ: &str = "read";
pub const WRITE: &str = "write";

/// Permission kind mapped to the principals holding it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(BTreeMap<String, BTreeSet<String>>);

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, kind: &str) -> Option<&BTreeSet<String>> {
        self.0.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn grant(&mut self, kind: &str, principal: &str) {
        self.0
            .entry(kind.to_string())
            .or_default()
            .insert(principal.to_string());
    }

    /// Overlay `other`: every kind it names replaces ours, and a kind with an
    /// empty principal list is removed. Kinds it does not name are kept.
    pub fn merge(&mut self, other: Permissions) {
        for (kind, principals) in other.0 {
            if principals.is_empty() {
                self.0.remove(&kind);
            } else {
                self.0.insert(kind, principals);
            }
        }
    }

    /// Drop empty principal strings and empty kinds.
    pub fn normalize(&mut self) {
        for principals in self.0.values_mut() {
            principals.retain(|p| !p.is_empty());
        }
        self.0.retain(|_, principals| !principals.is_empty());
    }
}

impl FromIterator<(String, BTreeSet<String>)> for Permissions {
    fn from_iter<I: IntoIterator<Item = (String, BTreeSet<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An access-control entry: a permission kind on a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ace {
    pub perm: String,
    pub path: ResourcePath,
}

impl Ace {
    pub fn new(perm: impl Into<String>, path: ResourcePath) -> Self {
        Self {
            perm: perm.into(),
            path,
        }
    }
}

/// One entry per permission for the path and each of its ancestors.
pub fn traversal_aces(path: &ResourcePath, perms: &[&str]) -> Vec<Ace> {
    path.traverse()
        .into_iter()
        .flat_map(|part| perms.iter().map(move |perm| Ace::new(*perm, part.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_replaces_named_kinds_only() {
        let mut perms: Permissions =
            serde_json::from_value(json!({"read": ["bob"], "write": ["alice", "carl"]})).unwrap();
        let patch: Permissions = serde_json::from_value(json!({"write": ["dave"], "read": []})).unwrap();
        perms.merge(patch);
        assert_eq!(serde_json::to_value(&perms).unwrap(), json!({"write": ["dave"]}));
    }

    #[test]
    fn serializes_sorted_and_deduplicated() {
        let perms: Permissions =
            serde_json::from_value(json!({"read": ["zed", "amy", "zed"]})).unwrap();
        assert_eq!(serde_json::to_value(&perms).unwrap(), json!({"read": ["amy", "zed"]}));
    }

    #[test]
    fn aces_cover_every_ancestor() {
        let path = ResourcePath::parse("/buckets/b/collections/c").unwrap();
        let aces = traversal_aces(&path, &[READ, WRITE]);
        assert_eq!(aces.len(), 4);
        assert!(aces.contains(&Ace::new(WRITE, ResourcePath::parse("/buckets/b").unwrap())));
    }
}
