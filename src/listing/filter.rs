//! Filter predicates parsed from query parameters.

use crate::models::object::Object;
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Not,
    Has,
    Gt,
    Min,
    Lt,
    Max,
    In,
    Exclude,
    Like,
    Contains,
    ContainsAny,
}

/// Prefix table, longest match first (`contains_any_` before `contains_`).
const PREFIXES: &[(&str, Operator)] = &[
    ("contains_any_", Operator::ContainsAny),
    ("contains_", Operator::Contains),
    ("exclude_", Operator::Exclude),
    ("like_", Operator::Like),
    ("has_", Operator::Has),
    ("min_", Operator::Min),
    ("max_", Operator::Max),
    ("not_", Operator::Not),
    ("eq_", Operator::Eq),
    ("in_", Operator::In),
    ("gt_", Operator::Gt),
    ("lt_", Operator::Lt),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: Operator,
    pub values: Vec<Value>,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            values: vec![value],
        }
    }

    /// Build a filter from a query pair such as `gt_num=30`. Returns `None`
    /// for an empty field name.
    pub fn parse(key: &str, raw: &str) -> Option<Self> {
        let (op, field) = PREFIXES
            .iter()
            .find_map(|(prefix, op)| key.strip_prefix(prefix).map(|field| (*op, field)))
            .unwrap_or((Operator::Eq, key));
        if field.is_empty() {
            return None;
        }

        let values = match op {
            Operator::In | Operator::Exclude | Operator::ContainsAny => {
                raw.split(',').map(parse_value).collect()
            }
            Operator::Contains => match parse_value(raw) {
                Value::Array(items) => items,
                other => vec![other],
            },
            Operator::Like => vec![Value::String(raw.to_string())],
            _ => vec![parse_value(raw)],
        };
        Some(Self {
            field: field.to_string(),
            op,
            values,
        })
    }

    pub fn matches(&self, obj: &Object) -> bool {
        let field = obj.field(&self.field);
        let actual = field.as_ref();
        let first = self.values.first().unwrap_or(&Value::Null);

        match self.op {
            Operator::Eq => loose_eq(actual, first),
            Operator::Not => !loose_eq(actual, first),
            Operator::Has => truthy(first) == actual.is_some(),
            Operator::Gt => compare(actual, Some(first)) == Ordering::Greater,
            Operator::Min => compare(actual, Some(first)) != Ordering::Less,
            Operator::Lt => compare(actual, Some(first)) == Ordering::Less,
            Operator::Max => compare(actual, Some(first)) != Ordering::Greater,
            Operator::In => self.values.iter().any(|v| loose_eq(actual, v)),
            Operator::Exclude => !self.values.iter().any(|v| loose_eq(actual, v)),
            Operator::Like => match (actual, first) {
                (Some(Value::String(text)), Value::String(pattern)) => like(text, pattern),
                _ => false,
            },
            Operator::Contains => match actual {
                Some(Value::Array(items)) => self
                    .values
                    .iter()
                    .all(|v| items.iter().any(|item| loose_eq(Some(item), v))),
                _ => false,
            },
            Operator::ContainsAny => match actual {
                Some(Value::Array(items)) => self
                    .values
                    .iter()
                    .any(|v| items.iter().any(|item| loose_eq(Some(item), v))),
                _ => false,
            },
        }
    }
}

/// Query values are JSON when they parse as JSON, strings otherwise.
/// The empty string stands for `null`.
pub fn parse_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Cross-type rank: strings < numbers < false < true < null/missing.
/// Arrays and objects rank first and compare by their JSON text.
fn rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 5,
        Some(Value::String(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::Bool(false)) => 3,
        Some(Value::Bool(true)) => 4,
        Some(Value::Array(_) | Value::Object(_)) => 0,
    }
}

/// Total order over optional JSON values used by filters, sort and tokens.
pub fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (rank(a), rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(x @ (Value::Array(_) | Value::Object(_))), Some(y)) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => Ordering::Equal,
    }
}

/// Equality where `null` matches a missing field and numbers compare by value.
fn loose_eq(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None | Some(Value::Null), Value::Null) => true,
        (Some(Value::Number(x)), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Some(value), expected) => value == expected,
        (None, _) => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "on"),
        Value::Null => false,
        _ => true,
    }
}

/// Case-insensitive match where `*` matches any run of characters. A pattern
/// without wildcards matches as a substring.
fn like(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    let pattern = pattern.to_lowercase();
    if !pattern.contains('*') {
        return text.contains(&pattern);
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let last = parts.len() - 1;
    let mut rest = text.as_str();
    for (idx, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if idx == 0 {
            match rest.strip_prefix(part) {
                Some(tail) => rest = tail,
                None => return false,
            }
        } else if idx == last {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Object {
        Object::from_data("x", value.as_object().cloned().unwrap())
    }

    #[test]
    fn parses_prefixes() {
        let f = Filter::parse("contains_any_tags", "a,b").unwrap();
        assert_eq!(f.op, Operator::ContainsAny);
        assert_eq!(f.field, "tags");
        assert_eq!(f.values, vec![json!("a"), json!("b")]);

        let f = Filter::parse("min_age", "18").unwrap();
        assert_eq!((f.op, f.values[0].clone()), (Operator::Min, json!(18)));

        let f = Filter::parse("title", "").unwrap();
        assert_eq!((f.op, f.values[0].clone()), (Operator::Eq, Value::Null));
        assert!(Filter::parse("gt_", "1").is_none());
    }

    #[test]
    fn relational_filters_use_native_types() {
        let high = obj(json!({"num": 33}));
        let low = obj(json!({"num": 22}));
        let gt = Filter::parse("gt_num", "30").unwrap();
        assert!(gt.matches(&high));
        assert!(!gt.matches(&low));
        let lt = Filter::parse("lt_num", "30").unwrap();
        assert!(lt.matches(&low));
        assert!(!lt.matches(&high));
        assert!(Filter::parse("max_num", "22").unwrap().matches(&low));
        assert!(Filter::parse("gt_name", "b").unwrap().matches(&obj(json!({"name": "c"}))));
    }

    #[test]
    fn missing_fields_rank_as_null() {
        let without = obj(json!({"other": 1}));
        assert!(Filter::parse("gt_num", "30").unwrap().matches(&without));
        assert!(!Filter::parse("lt_num", "30").unwrap().matches(&without));
        assert!(Filter::parse("num", "").unwrap().matches(&without));
    }

    #[test]
    fn has_and_not() {
        let with = obj(json!({"flag": false}));
        let without = obj(json!({}));
        let has = Filter::parse("has_flag", "true").unwrap();
        assert!(has.matches(&with));
        assert!(!has.matches(&without));
        assert!(Filter::parse("has_flag", "false").unwrap().matches(&without));
        assert!(Filter::parse("not_flag", "true").unwrap().matches(&with));
        assert!(Filter::parse("not_flag", "true").unwrap().matches(&without));
    }

    #[test]
    fn list_filters() {
        let r = obj(json!({"color": "red", "tags": ["a", "b"]}));
        assert!(Filter::parse("in_color", "blue,red").unwrap().matches(&r));
        assert!(!Filter::parse("exclude_color", "red").unwrap().matches(&r));
        assert!(Filter::parse("contains_tags", "[\"a\",\"b\"]").unwrap().matches(&r));
        assert!(!Filter::parse("contains_tags", "[\"a\",\"c\"]").unwrap().matches(&r));
        assert!(Filter::parse("contains_any_tags", "c,b").unwrap().matches(&r));
    }

    #[test]
    fn like_wildcards() {
        assert!(like("Hello World", "hello*"));
        assert!(like("Hello World", "*world"));
        assert!(like("Hello World", "h*o*d"));
        assert!(like("Hello World", "lo wo"));
        assert!(!like("Hello World", "*moon*"));
        assert!(!like("Hello", "h*x"));
    }

    #[test]
    fn cross_type_ordering() {
        let s = json!("z");
        let n = json!(1);
        assert_eq!(compare(Some(&s), Some(&n)), Ordering::Less);
        assert_eq!(compare(Some(&json!(true)), Some(&json!(false))), Ordering::Greater);
        assert_eq!(compare(None, Some(&json!(true))), Ordering::Greater);
        assert_eq!(compare(None, Some(&Value::Null)), Ordering::Equal);
        assert_eq!(compare(Some(&json!(2.5)), Some(&json!(10))), Ordering::Less);
    }
}
