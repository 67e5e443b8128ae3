// src/parser.rs
//! Validated parsing of untrusted call data
//!
//! `parse_from_call` keeps only fields that are both requested and declared
//! on the target entity, then checks each present value against its
//! `FieldSpec`. The first failing field aborts the parse.

use serde_json::{Map, Value};

use crate::constraint::Constraint;
use crate::error::{Result, TaskboardError, PARSING_CALL_DATA};
use crate::schema::{FieldKind, ModelSchema, ReferenceTarget, ScalarType, Validator};
use crate::store::DocumentStore;

/// Container shapes a value can be required to have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    List,
    /// JSON has no tuples; any array is accepted
    Tuple,
    Dict,
}

impl ContainerKind {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ContainerKind::List | ContainerKind::Tuple => value.is_array(),
            ContainerKind::Dict => value.is_object(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContainerKind::List => "list",
            ContainerKind::Tuple => "tuple",
            ContainerKind::Dict => "dict",
        }
    }
}

/// How one call-data field is checked
#[derive(Clone, Default)]
pub enum FieldSpec {
    #[default]
    NoCheck,
    TypeCheck(ContainerKind),
    /// The value must be the id of an existing document
    ExistenceCheck(ReferenceTarget),
    Custom(Validator),
}

impl std::fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldSpec::NoCheck => f.write_str("NoCheck"),
            FieldSpec::TypeCheck(kind) => f.debug_tuple("TypeCheck").field(kind).finish(),
            FieldSpec::ExistenceCheck(target) => f.debug_tuple("ExistenceCheck").field(target).finish(),
            FieldSpec::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl FieldSpec {
    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        FieldSpec::Custom(std::sync::Arc::new(check))
    }

    /// Check derived from a declared field: containers get a shape check,
    /// references an existence check, explicit validators win over both.
    pub fn from_descriptor(kind: &FieldKind, validator: Option<&Validator>) -> Self {
        if let Some(validator) = validator {
            return FieldSpec::Custom(validator.clone());
        }
        match kind {
            FieldKind::List(_) => FieldSpec::TypeCheck(ContainerKind::List),
            FieldKind::Scalar(ScalarType::Dict) | FieldKind::Embedded(_) => {
                FieldSpec::TypeCheck(ContainerKind::Dict)
            }
            FieldKind::Reference(target) => FieldSpec::ExistenceCheck(*target),
            FieldKind::Scalar(ScalarType::DateTime) => FieldSpec::custom(|value| {
                if ScalarType::DateTime.matches(value) {
                    Ok(())
                } else {
                    Err("expecting epoch milliseconds or RFC 3339 timestamp".to_string())
                }
            }),
            FieldKind::Scalar(_) => FieldSpec::NoCheck,
        }
    }
}

/// Requested fields with their checks, in request order
#[derive(Debug, Clone, Default)]
pub struct FieldSpecs(Vec<(String, FieldSpec)>);

impl FieldSpecs {
    /// Bare field names, none of them checked
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldSpecs(names.into_iter().map(|n| (n.into(), FieldSpec::NoCheck)).collect())
    }

    /// Checks derived from the entity's declared descriptors; names the
    /// schema does not declare are skipped.
    pub fn from_schema<S: AsRef<str>>(schema: &ModelSchema, names: &[S]) -> Self {
        FieldSpecs(
            names
                .iter()
                .filter_map(|name| {
                    let descriptor = schema.descriptor(name.as_ref())?;
                    let spec = FieldSpec::from_descriptor(&descriptor.kind, descriptor.validator.as_ref());
                    Some((descriptor.name.clone(), spec))
                })
                .collect(),
        )
    }

    pub fn with(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = spec,
            None => self.0.push((name, spec)),
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, FieldSpec)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, FieldSpec)> for FieldSpecs {
    fn from_iter<I: IntoIterator<Item = (S, FieldSpec)>>(iter: I) -> Self {
        FieldSpecs(iter.into_iter().map(|(n, s)| (n.into(), s)).collect())
    }
}

/// What to do with fields that are absent or null in the call data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonePolicy {
    /// Absent and null are both dropped
    #[default]
    Discard,
    /// Absent is dropped, an explicit null is kept
    KeepPresent,
}

/// Parse `call_data` into the subset of `fields` that `allowed` permits.
///
/// Store failures during existence checks are re-tagged as
/// "parsing call data" storage errors.
pub fn parse_from_call<S: DocumentStore + ?Sized>(
    store: &S,
    call_data: &Map<String, Value>,
    fields: &FieldSpecs,
    allowed: &[String],
    policy: NonePolicy,
) -> Result<Map<String, Value>> {
    let mut parsed = Map::new();

    for (field, spec) in fields.iter().filter(|(name, _)| allowed.contains(name)) {
        let value = match call_data.get(field) {
            None => continue,
            Some(Value::Null) => {
                if policy == NonePolicy::KeepPresent {
                    parsed.insert(field.clone(), Value::Null);
                }
                continue;
            }
            Some(value) => value,
        };

        check_value(store, field, spec, value).map_err(|e| e.in_context(PARSING_CALL_DATA))?;
        parsed.insert(field.clone(), value.clone());
    }

    crate::log_trace!("Parsed call data fields: {:?}", parsed.keys().collect::<Vec<_>>());
    Ok(parsed)
}

fn check_value<S: DocumentStore + ?Sized>(
    store: &S,
    field: &str,
    spec: &FieldSpec,
    value: &Value,
) -> Result<()> {
    match spec {
        FieldSpec::NoCheck => Ok(()),
        FieldSpec::Custom(check) => {
            check(value).map_err(|message| TaskboardError::parse_failure(field, message))
        }
        FieldSpec::TypeCheck(kind) => {
            if kind.accepts(value) {
                Ok(())
            } else {
                Err(TaskboardError::parse_failure(
                    field,
                    format!("expecting {}", kind.name()),
                ))
            }
        }
        FieldSpec::ExistenceCheck(target) => {
            let filter = Constraint::eq("_id", value.clone()).to_filter();
            if store.find_one(target.collection, &filter, Some(&["_id"]))?.is_some() {
                Ok(())
            } else {
                Err(TaskboardError::ParseFailure {
                    field: field.to_string(),
                    message: format!("expecting {} id", target.type_name),
                    id: Some(match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    }),
                })
            }
        }
    }
}
