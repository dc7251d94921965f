//! Hierarchical resource paths.
//!
//! A path alternates plural namespaces and object ids:
//! `/buckets/b1/collections/c1/records/r1`. Listing endpoints use the same
//! shape with `*` in place of the final id (`/buckets/b1/collections/*`).
//! The empty path is the root, the parent of every top-level namespace.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder id used by listing (node) paths.
pub const NODE_ID: &str = "*";

const MAX_ID_LEN: usize = 255;

/// The kinds of objects the service stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Bucket,
    Collection,
    Record,
    Group,
    Account,
}

impl ResourceKind {
    fn from_namespace(segment: &str) -> Option<Self> {
        match segment {
            "buckets" => Some(Self::Bucket),
            "collections" => Some(Self::Collection),
            "records" => Some(Self::Record),
            "groups" => Some(Self::Group),
            "accounts" => Some(Self::Account),
            _ => None,
        }
    }

    /// Singular name used in error details and `{name}:create` permissions.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::Collection => "collection",
            Self::Record => "record",
            Self::Group => "group",
            Self::Account => "account",
        }
    }

    /// Permission kinds that may appear in an ACL of this kind of object.
    pub fn permission_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Bucket => &["read", "write", "collection:create", "group:create"],
            Self::Collection => &["read", "write", "record:create"],
            Self::Record | Self::Group | Self::Account => &["read", "write"],
        }
    }

    /// Kind expected to own objects of this kind, `None` for top-level kinds.
    fn parent_kind(self) -> Option<Self> {
        match self {
            Self::Bucket | Self::Account => None,
            Self::Collection | Self::Group => Some(Self::Bucket),
            Self::Record => Some(Self::Collection),
        }
    }
}

/// A validated resource path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcePath(String);

impl ResourcePath {
    /// The root path, parent of `/buckets/*` and `/accounts/*`.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse a request path (without version prefix).
    ///
    /// Returns `None` when the path does not follow the namespace/id
    /// alternation or names an unknown namespace at any level. Ids are not
    /// validated here so handlers can report them with a precise error.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim_end_matches('/');
        if trimmed.is_empty() {
            return Some(Self::root());
        }
        let rest = trimmed.strip_prefix('/')?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() % 2 != 0 || segments.iter().any(|s| s.is_empty()) {
            return None;
        }

        let mut parent: Option<ResourceKind> = None;
        for pair in segments.chunks(2) {
            let kind = ResourceKind::from_namespace(pair[0])?;
            if kind.parent_kind() != parent {
                return None;
            }
            parent = Some(kind);
        }
        Some(Self(trimmed.to_string()))
    }

    /// Listing path for `namespace` beneath `self`.
    pub fn child_node(&self, namespace: &str) -> Self {
        Self(format!("{}/{}/{}", self.0, namespace, NODE_ID))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// True for listing paths (final segment `*`).
    pub fn is_node(&self) -> bool {
        self.object_id() == NODE_ID
    }

    /// Final segment of the path.
    pub fn object_id(&self) -> &str {
        match self.0.rfind('/') {
            Some(pos) => &self.0[pos + 1..],
            None => "",
        }
    }

    /// Everything before the final id: `/buckets/b1/collections`.
    pub fn namespace(&self) -> &str {
        match self.0.rfind('/') {
            Some(pos) => &self.0[..pos],
            None => "",
        }
    }

    pub fn kind(&self) -> Option<ResourceKind> {
        let ns = self.namespace();
        let segment = ns.rsplit('/').next()?;
        ResourceKind::from_namespace(segment)
    }

    /// Singular resource name (`"collection"`), empty for the root.
    pub fn resource_name(&self) -> &'static str {
        self.kind().map(ResourceKind::name).unwrap_or("")
    }

    /// Strip the last namespace/id pair.
    pub fn parent(&self) -> Self {
        match self.namespace().rfind('/') {
            Some(pos) => Self(self.0[..pos].to_string()),
            None => Self::root(),
        }
    }

    /// Same namespace, different id.
    pub fn with_object_id(&self, id: &str) -> Self {
        Self(format!("{}/{}", self.namespace(), id))
    }

    /// The listing path of this object's namespace.
    pub fn node(&self) -> Self {
        self.with_object_id(NODE_ID)
    }

    /// The path itself followed by each ancestor up to (not including) the root.
    pub fn traverse(&self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut current = self.clone();
        while !current.is_root() {
            let parent = current.parent();
            out.push(current);
            current = parent;
        }
        out
    }

    /// Bucket id for paths under `/buckets/{id}`.
    pub fn bucket_id(&self) -> Option<&str> {
        let rest = self.0.strip_prefix("/buckets/")?;
        let id = rest.split('/').next()?;
        (id != NODE_ID).then_some(id)
    }

    /// First namespace/id pair; timestamps are issued per scope.
    pub fn scope(&self) -> &str {
        let mut slashes = 0;
        for (idx, ch) in self.0.char_indices() {
            if ch == '/' {
                slashes += 1;
                if slashes == 3 {
                    return &self.0[..idx];
                }
            }
        }
        &self.0
    }

    /// True when `other` lies strictly beneath `self`.
    pub fn contains(&self, other: &str) -> bool {
        other.len() > self.0.len()
            && other.starts_with(self.0.as_str())
            && other.as_bytes()[self.0.len()] == b'/'
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Object ids: 1-255 ASCII letters, digits or `!#$%&()+-.@[]^_{|}~`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'('
                        | b')'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'@'
                        | b'['
                        | b']'
                        | b'^'
                        | b'_'
                        | b'{'
                        | b'|'
                        | b'}'
                        | b'~'
                )
        })
}
