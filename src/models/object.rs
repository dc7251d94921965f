//! Stored objects: system fields plus a schema-less attribute map.

use crate::models::epoch::Epoch;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// A bucket, collection, record, group or account as stored.
///
/// Attributes live in `data`, a key-ordered JSON map. The system fields
/// `id`, `last_modified` and `deleted` are kept out of `data` and only
/// merged back in when rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Object {
    /// Object id, unique within its namespace.
    pub id: String,

    /// Version timestamp, bumped on every mutation.
    pub last_modified: Epoch,

    /// Tombstone marker.
    pub deleted: bool,

    /// Free-form attributes.
    pub data: Map<String, Value>,
}

impl Object {
    /// Build an object from a request body, stripping system fields.
    pub fn from_data(id: impl Into<String>, mut data: Map<String, Value>) -> Self {
        data.remove("id");
        data.remove("last_modified");
        data.remove("deleted");
        Self {
            id: id.into(),
            last_modified: Epoch::default(),
            deleted: false,
            data,
        }
    }

    /// Deletion marker carrying only the id and deletion time.
    pub fn tombstone(id: impl Into<String>, at: Epoch) -> Self {
        Self {
            id: id.into(),
            last_modified: at,
            deleted: true,
            data: Map::new(),
        }
    }

    /// Look up a field by name, falling back to a dotted path into nested
    /// objects (`author.name`). `None` means the field is absent.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => return Some(Value::String(self.id.clone())),
            "last_modified" => return Some(Value::from(self.last_modified.millis())),
            "deleted" => return self.deleted.then_some(Value::Bool(true)),
            _ => {}
        }
        if let Some(value) = self.data.get(name) {
            return Some(value.clone());
        }

        let mut parts = name.split('.');
        let mut current = self.data.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current.clone())
    }

    /// Merge `patch` into the attributes: nested objects merge key by key,
    /// `null` values are skipped, everything else replaces.
    pub fn apply_patch(&mut self, mut patch: Map<String, Value>) {
        patch.remove("id");
        patch.remove("last_modified");
        patch.remove("deleted");
        merge_maps(&mut self.data, patch);
    }

    /// Render as the flat JSON object clients see.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("id".into(), Value::String(self.id.clone()));
        out.insert("last_modified".into(), Value::from(self.last_modified.millis()));
        if self.deleted {
            out.insert("deleted".into(), Value::Bool(true));
        } else {
            for (key, value) in &self.data {
                out.insert(key.clone(), value.clone());
            }
        }
        Value::Object(out)
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn merge_maps(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Null => {}
            Value::Object(nested) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => merge_maps(existing, nested),
                _ => {
                    target.insert(key, Value::Object(nested));
                }
            },
            other => {
                target.insert(key, other);
            }
        }
    }
}
