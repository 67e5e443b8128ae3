// src/aggregation.rs
// Aggregation pipeline: typed stages, expressions and their in-memory evaluation

use crate::error::{Result, TaskboardError};
use crate::query::matches_filter;
use crate::value_utils::{
    canonical_json_string, compare_total, get_nested_value, is_truthy, number_to_value,
    set_nested_value, temporal_operand, type_name, values_equal,
};
use ahash::AHashMap;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn agg_error(message: impl Into<String>) -> TaskboardError {
    TaskboardError::AggregationError(message.into())
}

/// Single-key operator object (`{"$op": spec}`)
fn single_operator<'a>(value: &'a Value, what: &str) -> Result<(&'a String, &'a Value)> {
    let obj = value
        .as_object()
        .ok_or_else(|| agg_error(format!("{} must be an object", what)))?;
    let mut entries = obj.iter();
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Ok(entry),
        _ => Err(agg_error(format!("{} must have exactly one operator", what))),
    }
}

/// Operator arguments given as an array of exactly `n` expressions
fn fixed_args(op: &str, spec: &Value, n: usize) -> Result<Vec<Expression>> {
    let arr = spec
        .as_array()
        .ok_or_else(|| agg_error(format!("{} requires an array", op)))?;
    if arr.len() != n {
        return Err(agg_error(format!(
            "{} requires exactly {} arguments",
            op, n
        )));
    }
    arr.iter().map(Expression::from_json).collect()
}

/// Unary operator argument: either `expr` or `[expr]`
fn unary_arg(op: &str, spec: &Value) -> Result<Box<Expression>> {
    match spec {
        Value::Array(arr) if arr.len() == 1 => Ok(Box::new(Expression::from_json(&arr[0])?)),
        Value::Array(_) => Err(agg_error(format!("{} takes exactly 1 argument", op))),
        other => Ok(Box::new(Expression::from_json(other)?)),
    }
}

fn pair(mut args: Vec<Expression>) -> (Box<Expression>, Box<Expression>) {
    let right = args.pop().unwrap_or(Expression::Literal(Value::Null));
    let left = args.pop().unwrap_or(Expression::Literal(Value::Null));
    (Box::new(left), Box::new(right))
}

fn as_number(op: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        agg_error(format!(
            "{} only supports numeric types, not {}",
            op,
            type_name(Some(value))
        ))
    })
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

/// Aggregation expression
///
/// Evaluation distinguishes a missing value (`None`) from an explicit null so
/// that `$type` reports "missing" and computed objects drop absent fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    /// "$a.b" (stored without the leading `$`)
    FieldRef(String),
    /// Object whose values are expressions
    Object(Vec<(String, Expression)>),
    Cond {
        if_: Box<Expression>,
        then: Box<Expression>,
        else_: Box<Expression>,
    },
    /// Membership of the first operand in the second (array) operand
    In(Box<Expression>, Box<Expression>),
    Type(Box<Expression>),
    Ne(Box<Expression>, Box<Expression>),
    Gt(Box<Expression>, Box<Expression>),
    And(Vec<Expression>),
    Not(Box<Expression>),
    Floor(Box<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
}

impl Expression {
    pub fn field(path: impl Into<String>) -> Self {
        Expression::FieldRef(path.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn object<K: Into<String>>(fields: Vec<(K, Expression)>) -> Self {
        Expression::Object(fields.into_iter().map(|(k, e)| (k.into(), e)).collect())
    }

    pub fn cond(if_: Expression, then: Expression, else_: Expression) -> Self {
        Expression::Cond {
            if_: Box::new(if_),
            then: Box::new(then),
            else_: Box::new(else_),
        }
    }

    pub fn in_(needle: Expression, haystack: Expression) -> Self {
        Expression::In(Box::new(needle), Box::new(haystack))
    }

    pub fn type_of(expr: Expression) -> Self {
        Expression::Type(Box::new(expr))
    }

    pub fn ne(left: Expression, right: Expression) -> Self {
        Expression::Ne(Box::new(left), Box::new(right))
    }

    pub fn gt(left: Expression, right: Expression) -> Self {
        Expression::Gt(Box::new(left), Box::new(right))
    }

    pub fn not(expr: Expression) -> Self {
        Expression::Not(Box::new(expr))
    }

    pub fn floor(expr: Expression) -> Self {
        Expression::Floor(Box::new(expr))
    }

    pub fn divide(left: Expression, right: Expression) -> Self {
        Expression::Divide(Box::new(left), Box::new(right))
    }

    pub fn subtract(left: Expression, right: Expression) -> Self {
        Expression::Subtract(Box::new(left), Box::new(right))
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) if s.starts_with('$') => Ok(Expression::FieldRef(s[1..].to_string())),
            Value::Object(map) if map.len() == 1 && map.keys().all(|k| k.starts_with('$')) => {
                let (op, spec) = single_operator(value, "Expression")?;
                Self::parse_operator(op, spec)
            }
            Value::Object(map) => {
                let fields = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Expression::from_json(v)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expression::Object(fields))
            }
            other => Ok(Expression::Literal(other.clone())),
        }
    }

    fn parse_operator(op: &str, spec: &Value) -> Result<Self> {
        match op {
            "$cond" => match spec {
                Value::Array(_) => {
                    let mut args = fixed_args("$cond", spec, 3)?.into_iter();
                    match (args.next(), args.next(), args.next()) {
                        (Some(i), Some(t), Some(e)) => Ok(Expression::cond(i, t, e)),
                        _ => Err(agg_error("$cond requires exactly 3 arguments")),
                    }
                }
                Value::Object(obj) => {
                    let part = |name: &str| -> Result<Expression> {
                        let v = obj
                            .get(name)
                            .ok_or_else(|| agg_error(format!("Missing '{}' parameter to $cond", name)))?;
                        Expression::from_json(v)
                    };
                    Ok(Expression::cond(part("if")?, part("then")?, part("else")?))
                }
                _ => Err(agg_error("$cond requires an object or an array")),
            },
            "$in" => {
                let (needle, haystack) = pair(fixed_args("$in", spec, 2)?);
                Ok(Expression::In(needle, haystack))
            }
            "$type" => Ok(Expression::Type(unary_arg("$type", spec)?)),
            "$ne" => {
                let (l, r) = pair(fixed_args("$ne", spec, 2)?);
                Ok(Expression::Ne(l, r))
            }
            "$gt" => {
                let (l, r) = pair(fixed_args("$gt", spec, 2)?);
                Ok(Expression::Gt(l, r))
            }
            "$and" => {
                let arr = spec
                    .as_array()
                    .ok_or_else(|| agg_error("$and requires an array"))?;
                let items = arr.iter().map(Expression::from_json).collect::<Result<Vec<_>>>()?;
                Ok(Expression::And(items))
            }
            "$not" => Ok(Expression::Not(unary_arg("$not", spec)?)),
            "$floor" => Ok(Expression::Floor(unary_arg("$floor", spec)?)),
            "$divide" => {
                let (l, r) = pair(fixed_args("$divide", spec, 2)?);
                Ok(Expression::Divide(l, r))
            }
            "$subtract" => {
                let (l, r) = pair(fixed_args("$subtract", spec, 2)?);
                Ok(Expression::Subtract(l, r))
            }
            other => Err(agg_error(format!("Unknown expression operator: {}", other))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Expression::Literal(v) => v.clone(),
            Expression::FieldRef(path) => Value::String(format!("${}", path)),
            Expression::Object(fields) => {
                let map: Map<String, Value> =
                    fields.iter().map(|(k, e)| (k.clone(), e.to_json())).collect();
                Value::Object(map)
            }
            Expression::Cond { if_, then, else_ } => json!({
                "$cond": {"if": if_.to_json(), "then": then.to_json(), "else": else_.to_json()}
            }),
            Expression::In(a, b) => json!({"$in": [a.to_json(), b.to_json()]}),
            Expression::Type(e) => json!({"$type": e.to_json()}),
            Expression::Ne(a, b) => json!({"$ne": [a.to_json(), b.to_json()]}),
            Expression::Gt(a, b) => json!({"$gt": [a.to_json(), b.to_json()]}),
            Expression::And(items) => {
                json!({"$and": items.iter().map(Expression::to_json).collect::<Vec<_>>()})
            }
            Expression::Not(e) => json!({"$not": e.to_json()}),
            Expression::Floor(e) => json!({"$floor": e.to_json()}),
            Expression::Divide(a, b) => json!({"$divide": [a.to_json(), b.to_json()]}),
            Expression::Subtract(a, b) => json!({"$subtract": [a.to_json(), b.to_json()]}),
        }
    }

    /// Evaluate, with missing values reported as null
    pub fn eval(&self, doc: &Value) -> Result<Value> {
        Ok(self.eval_opt(doc)?.unwrap_or(Value::Null))
    }

    /// Evaluate; `None` when the expression resolves to a missing field
    pub fn eval_opt(&self, doc: &Value) -> Result<Option<Value>> {
        let value = match self {
            Expression::Literal(v) => v.clone(),
            Expression::FieldRef(path) => return Ok(get_nested_value(doc, path).cloned()),
            Expression::Object(fields) => {
                let mut map = Map::new();
                for (key, expr) in fields {
                    if let Some(v) = expr.eval_opt(doc)? {
                        map.insert(key.clone(), v);
                    }
                }
                Value::Object(map)
            }
            Expression::Cond { if_, then, else_ } => {
                return if is_truthy(if_.eval_opt(doc)?.as_ref()) {
                    then.eval_opt(doc)
                } else {
                    else_.eval_opt(doc)
                };
            }
            Expression::In(needle, haystack) => {
                let needle = needle.eval(doc)?;
                match haystack.eval_opt(doc)? {
                    Some(Value::Array(items)) => {
                        Value::Bool(items.iter().any(|item| values_equal(item, &needle)))
                    }
                    other => {
                        return Err(agg_error(format!(
                            "$in requires an array as a second argument, found: {}",
                            type_name(other.as_ref())
                        )))
                    }
                }
            }
            Expression::Type(e) => Value::String(type_name(e.eval_opt(doc)?.as_ref()).to_string()),
            Expression::Ne(a, b) => Value::Bool(!values_equal(&a.eval(doc)?, &b.eval(doc)?)),
            Expression::Gt(a, b) => {
                let (a, b) = (temporal_operand(a.eval(doc)?), temporal_operand(b.eval(doc)?));
                Value::Bool(compare_total(&a, &b) == Ordering::Greater)
            }
            Expression::And(items) => {
                let mut all = true;
                for item in items {
                    if !is_truthy(item.eval_opt(doc)?.as_ref()) {
                        all = false;
                        break;
                    }
                }
                Value::Bool(all)
            }
            Expression::Not(e) => Value::Bool(!is_truthy(e.eval_opt(doc)?.as_ref())),
            Expression::Floor(e) => match e.eval(doc)? {
                Value::Null => Value::Null,
                v => number_to_value(as_number("$floor", &v)?.floor()),
            },
            Expression::Divide(a, b) => {
                let (a, b) = (a.eval(doc)?, b.eval(doc)?);
                if a.is_null() || b.is_null() {
                    Value::Null
                } else {
                    let divisor = as_number("$divide", &b)?;
                    if divisor == 0.0 {
                        return Err(agg_error("can't $divide by zero"));
                    }
                    number_to_value(as_number("$divide", &a)? / divisor)
                }
            }
            // dates subtract as epoch milliseconds
            Expression::Subtract(a, b) => {
                let (a, b) = (temporal_operand(a.eval(doc)?), temporal_operand(b.eval(doc)?));
                if a.is_null() || b.is_null() {
                    Value::Null
                } else if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                    match x.checked_sub(y) {
                        Some(n) => Value::from(n),
                        None => number_to_value(x as f64 - y as f64),
                    }
                } else {
                    number_to_value(as_number("$subtract", &a)? - as_number("$subtract", &b)?)
                }
            }
        };
        Ok(Some(value))
    }
}

// ============================================================================
// PIPELINE & STAGES
// ============================================================================

/// Aggregation pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(MatchStage),
    Project(ProjectStage),
    AddFields(AddFieldsStage),
    Group(GroupStage),
}

/// $match stage - filter documents
#[derive(Debug, Clone, PartialEq)]
pub struct MatchStage {
    filter: Value,
}

/// $project stage - reshape documents
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectStage {
    fields: Vec<(String, ProjectField)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectField {
    Include,        // 1
    Exclude,        // 0
    Rename(String), // "$fieldName"
}

/// $addFields stage - set computed fields, keeping everything else
#[derive(Debug, Clone, PartialEq)]
pub struct AddFieldsStage {
    fields: Vec<(String, Expression)>,
}

/// $group stage - group documents and compute aggregates
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStage {
    id: GroupKey,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// null (all documents in one group)
    Null,
    /// "$field" or any other single expression
    Single(Expression),
    /// {"a": "$x", "b": {...}}
    Compound(Vec<(String, Expression)>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(Expression),
    Push(Expression),
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Pipeline { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Create pipeline from JSON array
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        if let Value::Array(stages_array) = pipeline_json {
            if stages_array.is_empty() {
                return Err(agg_error("Pipeline cannot be empty"));
            }

            let stages = stages_array
                .iter()
                .map(Stage::from_json)
                .collect::<Result<Vec<_>>>()?;

            Ok(Pipeline { stages })
        } else {
            Err(agg_error("Pipeline must be an array"))
        }
    }

    /// The store's wire form
    pub fn to_json(&self) -> Value {
        Value::Array(self.stages.iter().map(Stage::to_json).collect())
    }

    /// Execute pipeline on documents
    pub fn execute(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        for stage in &self.stages {
            docs = stage.execute(docs)?;
        }
        Ok(docs)
    }
}

impl Stage {
    pub fn match_filter(filter: Value) -> Self {
        Stage::Match(MatchStage { filter })
    }

    pub fn add_fields<K: Into<String>>(fields: Vec<(K, Expression)>) -> Self {
        Stage::AddFields(AddFieldsStage {
            fields: fields.into_iter().map(|(k, e)| (k.into(), e)).collect(),
        })
    }

    pub fn group<K: Into<String>>(id: GroupKey, accumulators: Vec<(K, Accumulator)>) -> Self {
        Stage::Group(GroupStage {
            id,
            accumulators: accumulators.into_iter().map(|(k, a)| (k.into(), a)).collect(),
        })
    }

    /// Parse stage from JSON
    pub fn from_json(stage_json: &Value) -> Result<Self> {
        let (stage_name, stage_spec) = single_operator(stage_json, "Stage")?;

        match stage_name.as_str() {
            "$match" => Ok(Stage::Match(MatchStage::from_json(stage_spec)?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(stage_spec)?)),
            "$addFields" => Ok(Stage::AddFields(AddFieldsStage::from_json(stage_spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(stage_spec)?)),
            _ => Err(agg_error(format!("Unknown pipeline stage: {}", stage_name))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Stage::Match(stage) => json!({"$match": stage.filter.clone()}),
            Stage::Project(stage) => json!({"$project": stage.to_json()}),
            Stage::AddFields(stage) => {
                let map: Map<String, Value> =
                    stage.fields.iter().map(|(k, e)| (k.clone(), e.to_json())).collect();
                json!({"$addFields": map})
            }
            Stage::Group(stage) => json!({"$group": stage.to_json()}),
        }
    }

    /// Execute this stage
    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            Stage::Match(stage) => stage.execute(docs),
            Stage::Project(stage) => stage.execute(docs),
            Stage::AddFields(stage) => stage.execute(docs),
            Stage::Group(stage) => stage.execute(docs),
        }
    }
}

impl MatchStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if !spec.is_object() {
            return Err(agg_error("$match must be an object"));
        }
        Ok(MatchStage {
            filter: spec.clone(),
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        for doc in docs {
            if matches_filter(&doc, &self.filter)? {
                results.push(doc);
            }
        }
        Ok(results)
    }
}

impl ProjectStage {
    /// Inclusion projection of the named fields (`_id` is always kept)
    pub fn include<S: AsRef<str>>(fields: &[S]) -> Self {
        ProjectStage {
            fields: fields
                .iter()
                .map(|f| (f.as_ref().to_string(), ProjectField::Include))
                .collect(),
        }
    }

    fn from_json(spec: &Value) -> Result<Self> {
        if let Value::Object(obj) = spec {
            let mut fields = Vec::new();

            for (field, value) in obj {
                let project_field = if let Some(n) = value.as_i64() {
                    match n {
                        1 => ProjectField::Include,
                        0 => ProjectField::Exclude,
                        _ => return Err(agg_error(format!("Invalid project value: {}", n))),
                    }
                } else if let Some(b) = value.as_bool() {
                    if b {
                        ProjectField::Include
                    } else {
                        ProjectField::Exclude
                    }
                } else if let Some(s) = value.as_str() {
                    if s.starts_with('$') {
                        ProjectField::Rename(s.to_string())
                    } else {
                        return Err(agg_error(format!("Invalid project expression: {}", s)));
                    }
                } else {
                    return Err(agg_error("Project field must be 0, 1, or field reference"));
                };

                fields.push((field.clone(), project_field));
            }

            Ok(ProjectStage { fields })
        } else {
            Err(agg_error("$project must be an object"))
        }
    }

    fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(field, action)| {
                let v = match action {
                    ProjectField::Include => json!(1),
                    ProjectField::Exclude => json!(0),
                    ProjectField::Rename(source) => json!(source),
                };
                (field.clone(), v)
            })
            .collect();
        Value::Object(map)
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        Ok(docs.iter().map(|doc| self.project_document(doc)).collect())
    }

    fn action(&self, field: &str) -> Option<&ProjectField> {
        self.fields.iter().find(|(f, _)| f == field).map(|(_, a)| a)
    }

    pub fn project_document(&self, doc: &Value) -> Value {
        let mut result = Map::new();

        if let Value::Object(obj) = doc {
            let has_inclusions = self
                .fields
                .iter()
                .any(|(_, f)| matches!(f, ProjectField::Include | ProjectField::Rename(_)));
            let has_non_id_exclusions = self
                .fields
                .iter()
                .any(|(field, action)| matches!(action, ProjectField::Exclude) && field != "_id");

            // excluding _id is allowed in include mode
            let include_mode = has_inclusions && !has_non_id_exclusions;

            if include_mode {
                if !matches!(self.action("_id"), Some(ProjectField::Exclude)) {
                    if let Some(id) = obj.get("_id") {
                        result.insert("_id".to_string(), id.clone());
                    }
                }
                for (field, action) in &self.fields {
                    match action {
                        ProjectField::Include => {
                            if let Some(value) = get_nested_value(doc, field) {
                                result.insert(field.clone(), value.clone());
                            }
                        }
                        ProjectField::Rename(source) => {
                            if let Some(value) = get_nested_value(doc, source.trim_start_matches('$')) {
                                result.insert(field.clone(), value.clone());
                            }
                        }
                        ProjectField::Exclude => {}
                    }
                }
            } else {
                for (field, value) in obj {
                    if !matches!(self.action(field), Some(ProjectField::Exclude | ProjectField::Rename(_))) {
                        result.insert(field.clone(), value.clone());
                    }
                }
                for (target_field, action) in &self.fields {
                    if let ProjectField::Rename(source) = action {
                        if let Some(value) = get_nested_value(doc, source.trim_start_matches('$')) {
                            result.insert(target_field.clone(), value.clone());
                        }
                    }
                }
            }
        }

        Value::Object(result)
    }
}

impl AddFieldsStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| agg_error("$addFields must be an object"))?;
        let fields = obj
            .iter()
            .map(|(k, v)| Ok((k.clone(), Expression::from_json(v)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(AddFieldsStage { fields })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(docs.len());
        for mut doc in docs {
            // evaluate against the input document, then assign
            let mut computed = Vec::with_capacity(self.fields.len());
            for (field, expr) in &self.fields {
                computed.push((field, expr.eval_opt(&doc)?));
            }
            for (field, value) in computed {
                if let Some(value) = value {
                    set_nested_value(&mut doc, field, value);
                }
            }
            results.push(doc);
        }
        Ok(results)
    }
}

impl GroupKey {
    fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(GroupKey::Null),
            Value::String(s) if s.starts_with('$') => Ok(GroupKey::Single(Expression::from_json(value)?)),
            Value::String(_) => Err(agg_error("Group _id field reference must start with $")),
            Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
                Ok(GroupKey::Single(Expression::from_json(value)?))
            }
            Value::Object(map) => {
                let parts = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Expression::from_json(v)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(GroupKey::Compound(parts))
            }
            _ => Err(agg_error("Group _id must be null, a field reference or an object")),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            GroupKey::Null => Value::Null,
            GroupKey::Single(expr) => expr.to_json(),
            GroupKey::Compound(parts) => {
                let map: Map<String, Value> =
                    parts.iter().map(|(k, e)| (k.clone(), e.to_json())).collect();
                Value::Object(map)
            }
        }
    }

    fn evaluate(&self, doc: &Value) -> Result<Value> {
        match self {
            GroupKey::Null => Ok(Value::Null),
            GroupKey::Single(expr) => expr.eval(doc),
            GroupKey::Compound(parts) => {
                let mut map = Map::new();
                for (key, expr) in parts {
                    if let Some(v) = expr.eval_opt(doc)? {
                        map.insert(key.clone(), v);
                    }
                }
                Ok(Value::Object(map))
            }
        }
    }
}

impl GroupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if let Value::Object(obj) = spec {
            let id = match obj.get("_id") {
                Some(id_value) => GroupKey::from_json(id_value)?,
                None => return Err(agg_error("Group stage must have _id field")),
            };

            let mut accumulators = Vec::new();
            for (field, value) in obj {
                if field == "_id" {
                    continue;
                }
                accumulators.push((field.clone(), Accumulator::from_json(value)?));
            }

            Ok(GroupStage { id, accumulators })
        } else {
            Err(agg_error("$group must be an object"))
        }
    }

    fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("_id".to_string(), self.id.to_json());
        for (field, acc) in &self.accumulators {
            map.insert(field.clone(), acc.to_json());
        }
        Value::Object(map)
    }

    /// Groups are emitted in first-seen order
    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut keys: Vec<Value> = Vec::new();
        let mut members: Vec<Vec<Value>> = Vec::new();
        let mut positions: AHashMap<String, usize> = AHashMap::new();

        for doc in docs {
            let key = self.id.evaluate(&doc)?;
            let bucket = canonical_json_string(&key);
            let pos = match positions.get(&bucket) {
                Some(&pos) => pos,
                None => {
                    positions.insert(bucket, keys.len());
                    keys.push(key);
                    members.push(Vec::new());
                    keys.len() - 1
                }
            };
            members[pos].push(doc);
        }

        let mut results = Vec::with_capacity(keys.len());
        for (key, group_docs) in keys.into_iter().zip(members) {
            let mut result = Map::new();
            result.insert("_id".to_string(), key);
            for (field, accumulator) in &self.accumulators {
                result.insert(field.clone(), accumulator.compute(&group_docs)?);
            }
            results.push(Value::Object(result));
        }

        Ok(results)
    }
}

impl Accumulator {
    fn from_json(spec: &Value) -> Result<Self> {
        let (op, value) = single_operator(spec, "Accumulator")?;

        match op.as_str() {
            "$sum" => Ok(Accumulator::Sum(Expression::from_json(value)?)),
            "$push" => Ok(Accumulator::Push(Expression::from_json(value)?)),
            _ => Err(agg_error(format!("Unknown accumulator: {}", op))),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Accumulator::Sum(expr) => json!({"$sum": expr.to_json()}),
            Accumulator::Push(expr) => json!({"$push": expr.to_json()}),
        }
    }

    fn compute(&self, docs: &[Value]) -> Result<Value> {
        match self {
            // non-numeric values are ignored
            Accumulator::Sum(expr) => {
                let mut sum_int: i64 = 0;
                let mut sum_float: f64 = 0.0;
                let mut has_float = false;

                for doc in docs {
                    if let Some(value) = expr.eval_opt(doc)? {
                        if let Some(n) = value.as_i64() {
                            sum_int = sum_int.saturating_add(n);
                        } else if let Some(f) = value.as_f64() {
                            sum_float += f;
                            has_float = true;
                        }
                    }
                }

                if has_float {
                    Ok(Value::from(sum_float + sum_int as f64))
                } else {
                    Ok(Value::from(sum_int))
                }
            }

            Accumulator::Push(expr) => {
                let mut items = Vec::with_capacity(docs.len());
                for doc in docs {
                    items.push(expr.eval(doc)?);
                }
                Ok(Value::Array(items))
            }
        }
    }
}
