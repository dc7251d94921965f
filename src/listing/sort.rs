//! `_sort` parsing and object ordering.

use crate::{listing::filter::compare, models::object::Object};
use std::cmp::Ordering;

const TIEBREAK_FIELD: &str = "last_modified";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Parse `-num,title` into keys. Repeated fields keep their first position.
/// An absent or empty value sorts newest first. `last_modified` is appended
/// as the final tie-breaker when not already named.
pub fn parse_sort(raw: Option<&str>) -> Vec<SortKey> {
    let mut keys: Vec<SortKey> = Vec::new();
    for part in raw.unwrap_or_default().split(',').map(str::trim) {
        let key = match part.strip_prefix('-') {
            Some(field) => SortKey::desc(field),
            None => SortKey::asc(part.strip_prefix('+').unwrap_or(part)),
        };
        if key.field.is_empty() || keys.iter().any(|k| k.field == key.field) {
            continue;
        }
        keys.push(key);
    }

    if keys.is_empty() {
        keys.push(SortKey::desc(TIEBREAK_FIELD));
    } else if !keys.iter().any(|k| k.field == TIEBREAK_FIELD) {
        keys.push(SortKey::asc(TIEBREAK_FIELD));
    }
    keys
}

/// Compare two objects key by key.
pub fn compare_objects(a: &Object, b: &Object, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = compare(a.field(&key.field).as_ref(), b.field(&key.field).as_ref());
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
