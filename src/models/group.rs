//! Group membership lists.

use serde_json::{Map, Value};

pub const MEMBERS: &str = "members";

/// Normalize `data.members` in place: drop empty strings, sort, deduplicate.
///
/// A missing list becomes `[]`. Returns `None` if the field is not a list of
/// strings.
pub fn normalize_members(data: &mut Map<String, Value>) -> Option<Vec<String>> {
    let mut members = match data.get(MEMBERS) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?,
        Some(_) => return None,
    };
    members.retain(|m| !m.is_empty());
    members.sort();
    members.dedup();

    data.insert(
        MEMBERS.to_string(),
        Value::Array(members.iter().cloned().map(Value::String).collect()),
    );
    Some(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_member_lists() {
        let mut data = json!({"members": ["b", "", "a", "b"]}).as_object().cloned().unwrap();
        assert_eq!(normalize_members(&mut data), Some(vec!["a".into(), "b".into()]));
        assert_eq!(data["members"], json!(["a", "b"]));
    }

    #[test]
    fn defaults_and_rejects() {
        let mut empty = Map::new();
        assert_eq!(normalize_members(&mut empty), Some(vec![]));
        assert_eq!(empty["members"], json!([]));

        let mut bad = json!({"members": [1, 2]}).as_object().cloned().unwrap();
        assert_eq!(normalize_members(&mut bad), None);
        let mut bad = json!({"members": "alice"}).as_object().cloned().unwrap();
        assert_eq!(normalize_members(&mut bad), None);
    }
}
