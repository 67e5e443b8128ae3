// src/query/operators.rs
//! Query operator trait definitions and implementations
//!
//! Each filter operator the core emits is a separate type implementing
//! `OperatorMatcher`; `matches_filter` dispatches through a registry keyed by
//! operator name.
//!
//! ```text
//! OperatorMatcher trait
//!     ↓
//! ┌────────────────┬────────────────┬────────────────┐
//! │ Comparison     │ Logical        │ Element/Array  │
//! │ ($eq,$regex...)│ ($and, $or...) │ ($exists,$size)│
//! └────────────────┴────────────────┴────────────────┘
//! ```
//!
//! Null semantics follow the document store: a missing field compares equal
//! to `null`, so `{f: {$in: [null]}}` matches documents without `f`.

use crate::error::{Result, TaskboardError};
use crate::value_utils::{get_nested_value, values_equal};
use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

const REGEX_CACHE_SIZE: usize = 100;

lazy_static! {
    /// Compiled `$regex` patterns, least recently used evicted first
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> = Mutex::new(LruCache::new(
        NonZeroUsize::new(REGEX_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN)
    ));
}

/// Compile a `$regex` pattern, reusing a cached copy when one exists
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    if let Some(regex) = REGEX_CACHE.lock().get(pattern) {
        return Ok(regex.clone());
    }

    let regex = Regex::new(pattern).map_err(|e| {
        TaskboardError::InvalidQuery(format!("Invalid regex pattern '{}': {}", pattern, e))
    })?;
    REGEX_CACHE.lock().put(pattern.to_string(), regex.clone());
    Ok(regex)
}

// ============================================================================
// TRAIT DEFINITION
// ============================================================================

/// Trait for all query operators
///
/// ```rust
/// use serde_json::json;
/// use taskboard_core::query::operators::{EqOperator, OperatorMatcher};
///
/// let matches = EqOperator.matches(Some(&json!("p1")), &json!("p1"), None).unwrap();
/// assert!(matches);
/// ```
pub trait OperatorMatcher: Send + Sync {
    /// Operator name (e.g. "$eq", "$and")
    fn name(&self) -> &'static str;

    /// - `doc_value`: value of the field (None if the field doesn't exist)
    /// - `filter_value`: operand from the filter
    /// - `document`: whole document, required by logical operators
    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Value>,
    ) -> Result<bool>;
}

fn element_equals(doc_value: Option<&Value>, expected: &Value) -> bool {
    match doc_value {
        None | Some(Value::Null) => expected.is_null(),
        Some(v) => {
            if values_equal(v, expected) {
                return true;
            }
            // array fields match when any element matches
            if let Value::Array(arr) = v {
                arr.iter().any(|elem| values_equal(elem, expected))
            } else {
                false
            }
        }
    }
}

fn operand_array<'a>(op: &str, filter_value: &'a Value) -> Result<&'a Vec<Value>> {
    filter_value
        .as_array()
        .ok_or_else(|| TaskboardError::InvalidQuery(format!("{} operator requires an array", op)))
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// $eq: `{ field: { $eq: value } }`, shorthand `{ field: value }`
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        Ok(element_equals(doc_value, filter_value))
    }
}

/// $ne: true when the field is absent
pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        Ok(!element_equals(doc_value, filter_value))
    }
}

/// $regex: `{ field: { $regex: "pattern" } }`, unanchored and case-sensitive
///
/// Array fields match when any string element matches; other types never do.
pub struct RegexOperator;

impl OperatorMatcher for RegexOperator {
    fn name(&self) -> &'static str {
        "$regex"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        let Value::String(pattern) = filter_value else {
            return Err(TaskboardError::InvalidQuery(
                "$regex operator requires a string pattern".to_string(),
            ));
        };
        let regex = compile_pattern(pattern)?;
        match doc_value {
            Some(Value::String(s)) => Ok(regex.is_match(s)),
            Some(Value::Array(arr)) => Ok(arr
                .iter()
                .any(|elem| matches!(elem, Value::String(s) if regex.is_match(s)))),
            _ => Ok(false),
        }
    }
}

// ============================================================================
// ARRAY OPERATORS
// ============================================================================

/// $in: `{ field: { $in: [v1, v2, ...] } }`
///
/// A `null` member also matches documents where the field is absent.
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        let candidates = operand_array("$in", filter_value)?;
        Ok(candidates.iter().any(|c| element_equals(doc_value, c)))
    }
}

/// $nin: true when the field is absent (unless `null` is listed)
pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        let candidates = operand_array("$nin", filter_value)?;
        Ok(!candidates.iter().any(|c| element_equals(doc_value, c)))
    }
}

/// $size: matches array fields with exactly N elements; non-arrays never match
pub struct SizeOperator;

impl OperatorMatcher for SizeOperator {
    fn name(&self) -> &'static str {
        "$size"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        let size = filter_value.as_u64().ok_or_else(|| {
            TaskboardError::InvalidQuery("$size operator requires a non-negative integer".to_string())
        })?;
        match doc_value {
            Some(Value::Array(arr)) => Ok(arr.len() as u64 == size),
            _ => Ok(false),
        }
    }
}

// ============================================================================
// ELEMENT OPERATORS
// ============================================================================

/// $exists: `{ field: { $exists: true|false } }`
pub struct ExistsOperator;

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        if let Value::Bool(should_exist) = filter_value {
            Ok(doc_value.is_some() == *should_exist)
        } else {
            Err(TaskboardError::InvalidQuery(
                "$exists operator requires a boolean".to_string(),
            ))
        }
    }
}

// ============================================================================
// LOGICAL OPERATORS
// ============================================================================

fn require_document<'a>(op: &str, document: Option<&'a Value>) -> Result<&'a Value> {
    document.ok_or_else(|| {
        TaskboardError::InvalidQuery(format!("{} operator requires document context", op))
    })
}

/// $and: `{ $and: [ {..}, {..} ] }`
pub struct AndOperator;

impl OperatorMatcher for AndOperator {
    fn name(&self) -> &'static str {
        "$and"
    }

    fn matches(&self, _: Option<&Value>, filter_value: &Value, document: Option<&Value>) -> Result<bool> {
        let doc = require_document("$and", document)?;
        for condition in operand_array("$and", filter_value)? {
            if !matches_filter(doc, condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// $or: `{ $or: [ {..}, {..} ] }`
pub struct OrOperator;

impl OperatorMatcher for OrOperator {
    fn name(&self) -> &'static str {
        "$or"
    }

    fn matches(&self, _: Option<&Value>, filter_value: &Value, document: Option<&Value>) -> Result<bool> {
        let doc = require_document("$or", document)?;
        for condition in operand_array("$or", filter_value)? {
            if matches_filter(doc, condition)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// $nor: true only if every condition is false
pub struct NorOperator;

impl OperatorMatcher for NorOperator {
    fn name(&self) -> &'static str {
        "$nor"
    }

    fn matches(&self, _: Option<&Value>, filter_value: &Value, document: Option<&Value>) -> Result<bool> {
        let doc = require_document("$nor", document)?;
        for condition in operand_array("$nor", filter_value)? {
            if matches_filter(doc, condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// $not: field-level negation, `{ field: { $not: { $size: 0 } } }`
pub struct NotOperator;

impl OperatorMatcher for NotOperator {
    fn name(&self) -> &'static str {
        "$not"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Value>,
    ) -> Result<bool> {
        if !filter_value.is_object() {
            return Err(TaskboardError::InvalidQuery(
                "$not operator requires an operator expression".to_string(),
            ));
        }
        Ok(!matches_field_condition(doc_value, filter_value, document)?)
    }
}

// ============================================================================
// OPERATOR REGISTRY
// ============================================================================

lazy_static! {
    /// Registry of all filter operators, built once and immutable afterwards.
    pub static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let operators: Vec<Box<dyn OperatorMatcher>> = vec![
            Box::new(EqOperator),
            Box::new(NeOperator),
            Box::new(RegexOperator),
            Box::new(InOperator),
            Box::new(NinOperator),
            Box::new(SizeOperator),
            Box::new(ExistsOperator),
            Box::new(AndOperator),
            Box::new(OrOperator),
            Box::new(NorOperator),
            Box::new(NotOperator),
        ];
        operators.into_iter().map(|op| (op.name(), op)).collect()
    };
}

fn lookup(op_name: &str) -> Result<&'static dyn OperatorMatcher> {
    OPERATOR_REGISTRY
        .get(op_name)
        .map(|op| op.as_ref())
        .ok_or_else(|| TaskboardError::InvalidQuery(format!("Unknown operator: {}", op_name)))
}

/// Evaluate a field condition: an operator object (`{$in: [...]}`) or a
/// literal (implicit `$eq`).
fn matches_field_condition(
    doc_value: Option<&Value>,
    condition: &Value,
    document: Option<&Value>,
) -> Result<bool> {
    match condition {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            for (op_name, op_value) in ops {
                if !lookup(op_name)?.matches(doc_value, op_value, document)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        literal => EqOperator.matches(doc_value, literal, document),
    }
}

/// Main entry point for filter matching
///
/// - `Ok(true)` if the document matches, `Ok(false)` otherwise
/// - `Err(InvalidQuery)` if the filter is malformed
pub fn matches_filter(document: &Value, filter: &Value) -> Result<bool> {
    let filter_obj = filter
        .as_object()
        .ok_or_else(|| TaskboardError::InvalidQuery("Filter must be an object".to_string()))?;

    for (key, value) in filter_obj {
        let matched = if key.starts_with('$') {
            lookup(key)?.matches(None, value, Some(document))?
        } else {
            matches_field_condition(get_nested_value(document, key), value, Some(document))?
        };
        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}
