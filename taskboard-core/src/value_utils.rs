//! Value utility functions shared across modules
//!
//! Dot-notation field access used by filters and pipeline stages, the
//! `/`-separated safe lookup used by the statistics merger, and the value
//! semantics (truthiness, type names, comparison) the aggregation
//! expressions rely on.

use chrono::DateTime;
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// Get nested value from JSON with dot notation support
///
/// Supports:
/// - Simple fields: "name"
/// - Nested objects: "execution.queue"
/// - Array indexing: "items.0.name"
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use taskboard_core::value_utils::get_nested_value;
///
/// let doc = json!({"execution": {"queue": "default"}});
/// assert_eq!(get_nested_value(&doc, "execution.queue"), Some(&json!("default")));
/// ```
pub fn get_nested_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if !path.contains('.') {
        return doc.get(path);
    }

    let mut value = doc;
    for part in path.split('.') {
        match value {
            Value::Object(map) => value = map.get(part)?,
            Value::Array(arr) => {
                let index = part.parse::<usize>().ok()?;
                value = arr.get(index)?;
            }
            _ => return None,
        }
    }
    Some(value)
}

/// Set a value at a nested path with dot notation support
///
/// Creates intermediate objects if they don't exist. Paths running into a
/// non-object value are left untouched.
pub fn set_nested_value(doc: &mut Value, path: &str, value: Value) {
    let mut parts = path.split('.').peekable();
    let mut current = doc;

    while let Some(part) = parts.next() {
        let map = match current {
            Value::Object(map) => map,
            _ => return,
        };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

/// Look up a `/`-joined path ("project/section") through nested objects.
///
/// Absence of any segment (or a non-object on the way) is `None`; the caller
/// substitutes its own default. Empty segments are skipped.
///
/// ```
/// use serde_json::json;
/// use taskboard_core::value_utils::safe_get;
///
/// let runtime = json!({"p1": {"active": 12}});
/// assert_eq!(safe_get(&runtime, "p1/active"), Some(&json!(12)));
/// assert_eq!(safe_get(&runtime, "p1/archived"), None);
/// assert_eq!(safe_get(&runtime, "p2/active"), None);
/// ```
pub fn safe_get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            _ => None,
        })
}

/// Epoch milliseconds of an RFC 3339 timestamp string
///
/// ```
/// use serde_json::json;
/// use taskboard_core::value_utils::timestamp_millis;
///
/// assert_eq!(timestamp_millis(&json!("1970-01-01T00:00:01.5Z")), Some(1500));
/// assert_eq!(timestamp_millis(&json!("yesterday")), None);
/// assert_eq!(timestamp_millis(&json!(1500)), None);
/// ```
pub fn timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

/// Date operands of arithmetic and comparison expressions: RFC 3339 text
/// becomes epoch milliseconds, anything else is returned unchanged
pub fn temporal_operand(value: Value) -> Value {
    match timestamp_millis(&value) {
        Some(ms) => Value::from(ms),
        None => value,
    }
}

/// Compare two JSON values
///
/// Returns `Some(Ordering)` for comparable types (numbers, strings, booleans),
/// `None` for incompatible types (e.g., comparing string to number).
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use std::cmp::Ordering;
/// use taskboard_core::value_utils::compare_values;
///
/// assert_eq!(compare_values(&json!(10), &json!(5)), Some(Ordering::Greater));
/// assert_eq!(compare_values(&json!("a"), &json!("b")), Some(Ordering::Less));
/// assert_eq!(compare_values(&json!("a"), &json!(1)), None);
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            let f1 = n1.as_f64()?;
            let f2 = n2.as_f64()?;
            f1.partial_cmp(&f2)
        }
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        _ => None,
    }
}

/// Rank of a value's type in the document store's cross-type sort order
/// (null < numbers < strings < objects < arrays < booleans)
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order used by aggregation comparisons (`$gt`): values of different
/// types are ordered by type, same-typed values by `compare_values`.
pub fn compare_total(a: &Value, b: &Value) -> Ordering {
    match type_rank(a).cmp(&type_rank(b)) {
        Ordering::Equal => compare_values(a, b).unwrap_or(Ordering::Equal),
        other => other,
    }
}

/// Equality with numeric normalisation (`1 == 1.0`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Expression truthiness: null, missing, `false` and zero are false,
/// everything else (including "" and []) is true.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(_) => true,
    }
}

/// Type name as reported by the `$type` aggregation expression
pub fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "missing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "bool",
        Some(Value::Number(n)) if n.is_f64() => "double",
        Some(Value::Number(_)) => "long",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

/// Convert an f64 to a JSON number, keeping integral results as integers
pub fn number_to_value(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Creates a canonical string representation of a JSON value
/// where object keys are always sorted alphabetically.
///
/// Used as the bucket key of `$group` so composite `_id` objects with
/// different key insertion order land in the same group.
///
/// ```
/// use serde_json::json;
/// use taskboard_core::value_utils::canonical_json_string;
///
/// let v1 = json!({"project": "p", "status": "created"});
/// let v2 = json!({"status": "created", "project": "p"});
/// assert_eq!(canonical_json_string(&v1), canonical_json_string(&v2));
/// ```
pub fn canonical_json_string(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));

            let inner = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", Value::String((*k).clone()), canonical_json_string(v)))
                .collect::<Vec<_>>()
                .join(",");

            format!("{{{}}}", inner)
        }
        Value::Array(arr) => {
            let inner = arr
                .iter()
                .map(canonical_json_string)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{}]", inner)
        }
        _ => value.to_string(),
    }
}
