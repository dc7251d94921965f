//! Listing engine: query parsing, filtering, sorting and cursor pagination.
//!
//! Filtering runs first, then the cursor condition, then the sort, then the
//! limit. A page is truncated by fetching one object past the limit; when
//! that extra object exists a continuation token is built from the sort
//! values of the last object returned.

pub mod filter;
pub mod sort;

use crate::models::object::Object;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use filter::{Filter, Operator, compare, parse_value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sort::{SortKey, compare_objects, parse_sort};
use std::cmp::Ordering;

/// A rejected query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryError {
    pub name: String,
    pub description: String,
}

impl QueryError {
    fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Token {
    last_object: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ListQuery {
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
    pub limit: usize,
    /// Sort values of the last object of the previous page.
    pub after: Option<Map<String, Value>>,
    /// Whether tombstones take part (set by `_since`).
    pub include_deleted: bool,
}

impl ListQuery {
    /// Parse decoded query pairs. The first occurrence of a reserved `_`
    /// parameter wins; every other pair becomes a filter.
    pub fn parse(pairs: &[(String, String)], max_limit: usize) -> Result<Self, QueryError> {
        let reserved = |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        let limit = match reserved("_limit") {
            None | Some("") => max_limit,
            Some(raw) => {
                let n: i64 = raw
                    .parse()
                    .map_err(|_| QueryError::new("_limit", "Invalid value for _limit"))?;
                if n <= 0 || n as u64 > max_limit as u64 {
                    max_limit
                } else {
                    n as usize
                }
            }
        };

        let after = match reserved("_token") {
            None | Some("") => None,
            Some(raw) => Some(decode_token(raw)?),
        };

        let mut filters = Vec::new();
        let mut include_deleted = false;
        if let Some(raw) = reserved("_since") {
            filters.push(Filter::new("last_modified", Operator::Gt, parse_value(raw)));
            include_deleted = true;
        }
        if let Some(raw) = reserved("_before") {
            filters.push(Filter::new("last_modified", Operator::Lt, parse_value(raw)));
        }
        for (key, value) in pairs {
            if key.starts_with('_') {
                continue;
            }
            if let Some(filter) = Filter::parse(key, value) {
                filters.push(filter);
            }
        }

        Ok(Self {
            filters,
            sort: parse_sort(reserved("_sort")),
            limit,
            after,
            include_deleted,
        })
    }

    pub fn matches(&self, obj: &Object) -> bool {
        self.filters.iter().all(|f| f.matches(obj))
    }
}

#[derive(Debug, Default)]
pub struct Page {
    pub objects: Vec<Object>,
    /// Continuation token when more objects remain.
    pub next_token: Option<String>,
}

/// Apply filters, cursor, sort and limit.
pub fn paginate(objects: Vec<Object>, query: &ListQuery) -> Page {
    let mut objects: Vec<Object> = objects
        .into_iter()
        .filter(|obj| query.matches(obj))
        .filter(|obj| match &query.after {
            Some(last) => is_after(obj, last, &query.sort),
            None => true,
        })
        .collect();
    objects.sort_by(|a, b| compare_objects(a, b, &query.sort));

    let mut next_token = None;
    if objects.len() > query.limit {
        objects.truncate(query.limit);
        next_token = objects.last().map(|last| encode_token(last, &query.sort));
    }
    Page {
        objects,
        next_token,
    }
}

/// Number of objects matching the filters, ignoring cursor and limit.
pub fn count(objects: &[Object], query: &ListQuery) -> usize {
    objects.iter().filter(|obj| query.matches(obj)).count()
}

/// `base` followed by `query` with `_limit` and `_token` replaced.
pub fn next_page_url(base: &str, query: &[(String, String)], limit: usize, token: &str) -> String {
    let limit = limit.to_string();
    let pairs: Vec<String> = query
        .iter()
        .filter(|(k, _)| k != "_limit" && k != "_token")
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain([("_limit", limit.as_str()), ("_token", token)])
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    format!("{base}?{}", pairs.join("&"))
}

fn is_after(obj: &Object, last: &Map<String, Value>, keys: &[SortKey]) -> bool {
    for key in keys {
        let ord = compare(obj.field(&key.field).as_ref(), last.get(&key.field));
        let ord = if key.descending { ord.reverse() } else { ord };
        match ord {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => {}
        }
    }
    false
}

fn encode_token(last: &Object, keys: &[SortKey]) -> String {
    let last_object = keys
        .iter()
        .map(|key| (key.field.clone(), last.field(&key.field).unwrap_or(Value::Null)))
        .collect();
    let json = serde_json::to_vec(&Token { last_object }).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

fn decode_token(raw: &str) -> Result<Map<String, Value>, QueryError> {
    let invalid = || QueryError::new("_token", "_token has invalid content");
    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim_end_matches('='))
        .map_err(|_| invalid())?;
    let token: Token = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
    Ok(token.last_object)
}
