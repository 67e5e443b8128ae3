// src/constraint.rs
//! Boolean query constraints
//!
//! A `Constraint` is an immutable predicate tree over document fields. It is
//! translated into the store's native filter document by `to_filter()` and
//! never executes anything itself. Trees compose with `&`, `|` and `!`.
//!
//! ```
//! use serde_json::json;
//! use taskboard_core::constraint::{visibility_constraint, Constraint};
//!
//! let query = Constraint::eq("_id", "p1") & visibility_constraint("c1");
//! assert_eq!(query.to_filter()["$and"][0], json!({"_id": {"$eq": "p1"}}));
//! ```

use serde_json::{json, Map, Value};
use std::ops::{BitAnd, BitOr, Not};

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Nin { field: String, values: Vec<Value> },
    Exists { field: String, exists: bool },
    Size { field: String, size: usize },
    Regex { field: String, pattern: String },
    And(Vec<Constraint>),
    Or(Vec<Constraint>),
    Not(Box<Constraint>),
}

impl Constraint {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Constraint::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Equality-in-set; duplicate members are dropped, first occurrence kept
    pub fn in_<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Constraint::In {
            field: field.into(),
            values: dedup(values),
        }
    }

    pub fn nin<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Constraint::Nin {
            field: field.into(),
            values: dedup(values),
        }
    }

    pub fn exists(field: impl Into<String>, exists: bool) -> Self {
        Constraint::Exists {
            field: field.into(),
            exists,
        }
    }

    pub fn size(field: impl Into<String>, size: usize) -> Self {
        Constraint::Size {
            field: field.into(),
            size,
        }
    }

    /// Unanchored, case-sensitive pattern match on a string field
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Constraint::Regex {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Matches everything (`{}`)
    pub fn all() -> Self {
        Constraint::And(Vec::new())
    }

    /// Translate into the store's filter document
    pub fn to_filter(&self) -> Value {
        match self {
            Constraint::Eq { field, value } => field_condition(field, "$eq", value.clone()),
            Constraint::In { field, values } => {
                field_condition(field, "$in", Value::Array(values.clone()))
            }
            Constraint::Nin { field, values } => {
                field_condition(field, "$nin", Value::Array(values.clone()))
            }
            Constraint::Exists { field, exists } => field_condition(field, "$exists", json!(exists)),
            Constraint::Size { field, size } => field_condition(field, "$size", json!(size)),
            Constraint::Regex { field, pattern } => {
                field_condition(field, "$regex", Value::String(pattern.clone()))
            }
            Constraint::And(children) if children.is_empty() => json!({}),
            Constraint::And(children) => json!({ "$and": filters(children) }),
            Constraint::Or(children) => json!({ "$or": filters(children) }),
            // top-level negation of an arbitrary tree
            Constraint::Not(inner) => json!({ "$nor": [inner.to_filter()] }),
        }
    }
}

fn dedup<I, V>(values: I) -> Vec<Value>
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    let mut out: Vec<Value> = Vec::new();
    for value in values.into_iter().map(Into::into) {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

fn field_condition(field: &str, op: &str, operand: Value) -> Value {
    let mut condition = Map::new();
    condition.insert(op.to_string(), operand);
    let mut filter = Map::new();
    filter.insert(field.to_string(), Value::Object(condition));
    Value::Object(filter)
}

fn filters(children: &[Constraint]) -> Vec<Value> {
    children.iter().map(Constraint::to_filter).collect()
}

impl BitAnd for Constraint {
    type Output = Constraint;

    fn bitand(self, rhs: Constraint) -> Constraint {
        match (self, rhs) {
            (Constraint::And(mut left), Constraint::And(right)) => {
                left.extend(right);
                Constraint::And(left)
            }
            (Constraint::And(mut left), rhs) => {
                left.push(rhs);
                Constraint::And(left)
            }
            (lhs, rhs) => Constraint::And(vec![lhs, rhs]),
        }
    }
}

impl BitOr for Constraint {
    type Output = Constraint;

    fn bitor(self, rhs: Constraint) -> Constraint {
        match (self, rhs) {
            (Constraint::Or(mut left), Constraint::Or(right)) => {
                left.extend(right);
                Constraint::Or(left)
            }
            (Constraint::Or(mut left), rhs) => {
                left.push(rhs);
                Constraint::Or(left)
            }
            (lhs, rhs) => Constraint::Or(vec![lhs, rhs]),
        }
    }
}

impl Not for Constraint {
    type Output = Constraint;

    fn not(self) -> Constraint {
        match self {
            Constraint::Not(inner) => *inner,
            other => Constraint::Not(Box::new(other)),
        }
    }
}

/// Documents visible to `company`: owned by it, or public (company null,
/// empty or never set).
pub fn visibility_constraint(company: &str) -> Constraint {
    Constraint::in_("company", [json!(company), Value::Null, json!("")])
        | Constraint::exists("company", false)
}

/// Documents where `field` is absent, equal to `empty_value` or null, or
/// (for list fields) an empty list.
///
/// Pass `Value::Null` as `empty_value` when there is no specific empty value.
pub fn field_missing_or_empty(field: &str, empty_value: Value, is_list: bool) -> Constraint {
    let query = Constraint::exists(field, false) | Constraint::in_(field, [empty_value, Value::Null]);
    if is_list {
        query | Constraint::size(field, 0)
    } else {
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::matches_filter;

    #[test]
    fn test_visibility_constraint_filter_shape() {
        assert_eq!(
            visibility_constraint("c1").to_filter(),
            json!({"$or": [
                {"company": {"$in": ["c1", null, ""]}},
                {"company": {"$exists": false}}
            ]})
        );
    }

    #[test]
    fn test_visibility_constraint_matches() {
        let filter = visibility_constraint("c1").to_filter();
        assert!(matches_filter(&json!({"company": "c1"}), &filter).unwrap());
        assert!(matches_filter(&json!({"company": null}), &filter).unwrap());
        assert!(matches_filter(&json!({"company": ""}), &filter).unwrap());
        assert!(matches_filter(&json!({"name": "legacy"}), &filter).unwrap());
        assert!(!matches_filter(&json!({"company": "c2"}), &filter).unwrap());
    }

    #[test]
    fn test_regex_leaf() {
        let query = Constraint::regex("description", "det(ect|ection)") & visibility_constraint("c1");
        let filter = query.to_filter();
        assert_eq!(filter["$and"][0], json!({"description": {"$regex": "det(ect|ection)"}}));
        assert!(matches_filter(&json!({"company": "c1", "description": "object detection"}), &filter).unwrap());
        assert!(!matches_filter(&json!({"company": "c1", "description": "segmentation"}), &filter).unwrap());
    }

    #[test]
    fn test_field_missing_or_empty_list() {
        let filter = field_missing_or_empty("tags", Value::Null, true).to_filter();
        assert!(matches_filter(&json!({"tags": []}), &filter).unwrap());
        assert!(matches_filter(&json!({"name": "t"}), &filter).unwrap());
        assert!(matches_filter(&json!({"tags": null}), &filter).unwrap());
        assert!(!matches_filter(&json!({"tags": ["x"]}), &filter).unwrap());
    }

    #[test]
    fn test_field_missing_or_empty_scalar() {
        let constraint = field_missing_or_empty("comment", json!(""), false);
        assert_eq!(
            constraint.to_filter(),
            json!({"$or": [
                {"comment": {"$exists": false}},
                {"comment": {"$in": ["", null]}}
            ]})
        );
        let filter = constraint.to_filter();
        assert!(matches_filter(&json!({"comment": ""}), &filter).unwrap());
        assert!(!matches_filter(&json!({"comment": "hi"}), &filter).unwrap());
        // without the size branch an empty list is not "empty"
        assert!(!matches_filter(&json!({"comment": []}), &filter).unwrap());
    }

    #[test]
    fn test_null_empty_value_is_not_repeated() {
        match field_missing_or_empty("parent", Value::Null, false) {
            Constraint::Or(children) => {
                assert_eq!(children[1], Constraint::In {
                    field: "parent".to_string(),
                    values: vec![Value::Null],
                });
            }
            other => panic!("unexpected constraint: {:?}", other),
        }
    }

    #[test]
    fn test_operators_flatten_and_negate() {
        let a = Constraint::eq("a", 1);
        let b = Constraint::eq("b", 2);
        let c = Constraint::eq("c", 3);
        match a.clone() & b.clone() & c.clone() {
            Constraint::And(children) => assert_eq!(children.len(), 3),
            other => panic!("unexpected constraint: {:?}", other),
        }
        assert_eq!(!!a.clone(), a);

        let filter = (!(a | b)).to_filter();
        assert!(matches_filter(&json!({"a": 5, "b": 5}), &filter).unwrap());
        assert!(!matches_filter(&json!({"a": 1}), &filter).unwrap());
    }

    #[test]
    fn test_all_matches_everything() {
        assert_eq!(Constraint::all().to_filter(), json!({}));
        let combined = Constraint::all() & Constraint::eq("x", 1);
        assert_eq!(combined.to_filter(), json!({"$and": [{"x": {"$eq": 1}}]}));
    }
}
