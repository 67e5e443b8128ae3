//! Field registry: declarative model schemas and reflection over them
//!
//! A model is declared once as a `ModelDecl` (its own fields plus an optional
//! parent declaration). `ModelSchema::build` walks the ancestry base-first so
//! that a derived redeclaration replaces the base descriptor in place. Each
//! entity type memoizes its schema behind a once-guard (see `Entity`).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use serde_json::Value;

use crate::value_utils::timestamp_millis;

/// Custom value check; the error string becomes the parse failure message
pub type Validator = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// Separator used for flattened embedded-document field names
pub const EMBEDDED_SEPARATOR: &str = "__";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Dict,
}

impl ScalarType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ScalarType::String => value.is_string(),
            ScalarType::Integer => value.is_i64() || value.is_u64(),
            ScalarType::Float => value.is_number(),
            ScalarType::Boolean => value.is_boolean(),
            // epoch milliseconds or RFC 3339 text
            ScalarType::DateTime => value.is_number() || timestamp_millis(value).is_some(),
            ScalarType::Dict => value.is_object(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::Boolean => "boolean",
            ScalarType::DateTime => "datetime",
            ScalarType::Dict => "dict",
        }
    }
}

/// Entity type a reference field points at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReferenceTarget {
    pub type_name: &'static str,
    pub collection: &'static str,
}

#[derive(Clone, Debug)]
pub enum FieldKind {
    Scalar(ScalarType),
    /// List of elements described by the boxed descriptor
    List(Box<FieldDescriptor>),
    Embedded(Arc<ModelDecl>),
    Reference(ReferenceTarget),
}

/// Immutable description of one declared field
#[derive(Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub choices: Option<Vec<Value>>,
    pub attrs: BTreeMap<String, Value>,
    pub validator: Option<Validator>,
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("choices", &self.choices)
            .field("attrs", &self.attrs)
            .field("validator", &self.validator.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        FieldDescriptor {
            name: name.into(),
            kind,
            choices: None,
            attrs: BTreeMap::new(),
            validator: None,
        }
    }

    pub fn scalar(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self::new(name, FieldKind::Scalar(scalar))
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarType::String)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarType::DateTime)
    }

    pub fn list(name: impl Into<String>, element: FieldDescriptor) -> Self {
        Self::new(name, FieldKind::List(Box::new(element)))
    }

    pub fn embedded(name: impl Into<String>, document: Arc<ModelDecl>) -> Self {
        Self::new(name, FieldKind::Embedded(document))
    }

    pub fn reference(name: impl Into<String>, target: ReferenceTarget) -> Self {
        Self::new(name, FieldKind::Reference(target))
    }

    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn validator<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(check));
        self
    }

    /// Attribute lookup. `choices` is an attribute like any other; list
    /// fields report their element's choices.
    pub fn attr_value(&self, name: &str) -> Option<Value> {
        if name == "choices" {
            return self.effective_choices().map(|c| Value::Array(c.to_vec()));
        }
        self.attrs.get(name).cloned()
    }

    fn has_truthy_attr(&self, name: &str, default: bool) -> bool {
        match self.attr_value(name) {
            None => default,
            Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// Choices of the field itself, or of its element for list fields
    pub fn effective_choices(&self) -> Option<&[Value]> {
        match &self.kind {
            FieldKind::List(element) => element.choices.as_deref(),
            _ => self.choices.as_deref(),
        }
    }
}

/// A model's own declarations plus the declaration it extends
#[derive(Clone, Debug)]
pub struct ModelDecl {
    pub name: &'static str,
    pub parent: Option<Arc<ModelDecl>>,
    pub fields: Vec<FieldDescriptor>,
}

impl ModelDecl {
    pub fn new(name: &'static str) -> Self {
        ModelDecl {
            name,
            parent: None,
            fields: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: Arc<ModelDecl>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn into_arc(self) -> Arc<ModelDecl> {
        Arc::new(self)
    }

    /// Declarations from the most-base ancestor to this one
    pub fn ancestry(&self) -> Vec<&ModelDecl> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(parent) = current.parent.as_deref() {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }
}

/// Override-resolved, ordered field table of one model type
#[derive(Debug)]
pub struct ModelSchema {
    name: &'static str,
    decl: Arc<ModelDecl>,
    fields: Vec<FieldDescriptor>,
    index: AHashMap<String, usize>,
}

impl ModelSchema {
    pub fn build(decl: Arc<ModelDecl>) -> Self {
        let mut fields: Vec<FieldDescriptor> = Vec::new();
        let mut index: AHashMap<String, usize> = AHashMap::new();

        for level in decl.ancestry() {
            for field in &level.fields {
                match index.get(&field.name) {
                    // derived wins, first position kept
                    Some(&pos) => fields[pos] = field.clone(),
                    None => {
                        index.insert(field.name.clone(), fields.len());
                        fields.push(field.clone());
                    }
                }
            }
        }

        ModelSchema {
            name: decl.name,
            decl,
            fields,
            index,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn descriptor(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index.get(name).map(|&pos| &self.fields[pos])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All fields with embedded documents expanded into `outer__inner` names
    pub fn flattened(&self) -> Vec<(String, FieldDescriptor)> {
        let mut out = Vec::new();
        flatten_into(&self.fields, "", &mut out);
        out
    }
}

fn flatten_into(fields: &[FieldDescriptor], prefix: &str, out: &mut Vec<(String, FieldDescriptor)>) {
    for field in fields {
        let name = format!("{}{}", prefix, field.name);
        match &field.kind {
            FieldKind::Embedded(document) => {
                let nested = ModelSchema::build(document.clone());
                let nested_prefix = format!("{}{}", name, EMBEDDED_SEPARATOR);
                flatten_into(nested.fields(), &nested_prefix, out);
            }
            _ => out.push((name, field.clone())),
        }
    }
}

/// Declared field names, base-first, each name once
pub fn get_fields(schema: &ModelSchema) -> Vec<String> {
    schema.fields().iter().map(|f| f.name.clone()).collect()
}

/// Fields whose `attr` is truthy (`default` when undeclared), with their
/// choices.
///
/// Embedded documents recurse and yield `outer__inner` names; list fields
/// report their element's choices.
pub fn get_fields_with_attr(
    schema: &ModelSchema,
    attr: &str,
    default: bool,
) -> Vec<(String, Option<Vec<Value>>)> {
    let mut out = Vec::new();
    collect_with_attr(schema.fields(), attr, default, "", &mut out);
    out
}

fn collect_with_attr(
    fields: &[FieldDescriptor],
    attr: &str,
    default: bool,
    prefix: &str,
    out: &mut Vec<(String, Option<Vec<Value>>)>,
) {
    for field in fields {
        if !field.has_truthy_attr(attr, default) {
            continue;
        }
        let name = format!("{}{}", prefix, field.name);
        match &field.kind {
            FieldKind::Embedded(document) => {
                let nested = ModelSchema::build(document.clone());
                let nested_prefix = format!("{}{}", name, EMBEDDED_SEPARATOR);
                collect_with_attr(nested.fields(), attr, default, &nested_prefix, out);
            }
            _ => out.push((name, field.effective_choices().map(<[Value]>::to_vec))),
        }
    }
}

/// Fields declaring `attr`, mapped to its value.
///
/// Folded over the ancestry base-first: a later declaration carrying the
/// attribute overwrites the earlier value, a later declaration without it
/// leaves the inherited value in place.
pub fn get_fields_and_attr(schema: &ModelSchema, attr: &str) -> Vec<(String, Value)> {
    let mut out: Vec<(String, Value)> = Vec::new();
    let mut index: AHashMap<String, usize> = AHashMap::new();

    for level in schema.decl.ancestry() {
        for field in &level.fields {
            let Some(value) = field.attr_value(attr) else {
                continue;
            };
            match index.get(&field.name) {
                Some(&pos) => out[pos].1 = value,
                None => {
                    index.insert(field.name.clone(), out.len());
                    out.push((field.name.clone(), value));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Arc<ModelDecl> {
        ModelDecl::new("Base")
            .field(FieldDescriptor::string("id"))
            .field(FieldDescriptor::string("name").attr("required", true))
            .field(FieldDescriptor::string("comment").attr("user_set_allowed", true))
            .into_arc()
    }

    fn derived() -> Arc<ModelDecl> {
        ModelDecl::new("Derived")
            .extends(base())
            .field(FieldDescriptor::string("status").choices(["created", "failed"]))
            .field(FieldDescriptor::string("name").attr("user_set_allowed", true))
            .into_arc()
    }

    #[test]
    fn test_ancestry_is_base_first() {
        let decl = derived();
        let names: Vec<_> = decl.ancestry().iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["Base", "Derived"]);
    }

    #[test]
    fn test_override_keeps_position_and_takes_derived_descriptor() {
        let schema = ModelSchema::build(derived());
        assert_eq!(get_fields(&schema), vec!["id", "name", "comment", "status"]);

        let name = schema.descriptor("name").unwrap();
        assert_eq!(name.attr_value("user_set_allowed"), Some(json!(true)));
        assert_eq!(name.attr_value("required"), None);
    }

    #[test]
    fn test_fields_and_attr_keeps_inherited_values() {
        let schema = ModelSchema::build(derived());
        let required = get_fields_and_attr(&schema, "required");
        assert_eq!(required, vec![("name".to_string(), json!(true))]);

        let allowed = get_fields_and_attr(&schema, "user_set_allowed");
        assert_eq!(
            allowed,
            vec![
                ("name".to_string(), json!(true)),
                ("comment".to_string(), json!(true)),
            ]
        );
    }

    #[test]
    fn test_fields_with_attr_default_applies_to_undeclared() {
        let schema = ModelSchema::build(derived());
        let names: Vec<_> = get_fields_with_attr(&schema, "user_set_allowed", false)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["name", "comment"]);

        let all = get_fields_with_attr(&schema, "user_set_allowed", true);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_choices_attr_and_list_elements() {
        let decl = ModelDecl::new("Listy")
            .field(FieldDescriptor::list(
                "levels",
                FieldDescriptor::string("").choices(["debug", "info"]),
            ))
            .field(FieldDescriptor::string("plain"))
            .into_arc();
        let schema = ModelSchema::build(decl);
        let with_choices = get_fields_with_attr(&schema, "choices", false);
        assert_eq!(
            with_choices,
            vec![("levels".to_string(), Some(vec![json!("debug"), json!("info")]))]
        );
    }

    #[test]
    fn test_embedded_fields_recurse_with_dotted_names() {
        let inner = ModelDecl::new("Inner")
            .field(FieldDescriptor::string("result").choices(["success", "failure"]).attr("indexed", true))
            .field(FieldDescriptor::string("error"))
            .into_arc();
        let middle = ModelDecl::new("Middle")
            .field(FieldDescriptor::embedded("inner", inner).attr("indexed", true))
            .field(FieldDescriptor::string("uri").attr("indexed", true))
            .into_arc();
        let outer = ModelDecl::new("Outer")
            .field(FieldDescriptor::embedded("output", middle).attr("indexed", true))
            .into_arc();
        let schema = ModelSchema::build(outer);

        let indexed = get_fields_with_attr(&schema, "indexed", false);
        assert_eq!(
            indexed,
            vec![
                (
                    "output__inner__result".to_string(),
                    Some(vec![json!("success"), json!("failure")])
                ),
                ("output__uri".to_string(), None),
            ]
        );

        let flat: Vec<_> = schema.flattened().into_iter().map(|(n, _)| n).collect();
        assert_eq!(flat, vec!["output__inner__result", "output__inner__error", "output__uri"]);
    }

    #[test]
    fn test_scalar_type_matching() {
        assert!(ScalarType::Integer.matches(&json!(3)));
        assert!(!ScalarType::Integer.matches(&json!(3.5)));
        assert!(ScalarType::DateTime.matches(&json!("2024-01-01T00:00:00Z")));
        assert!(ScalarType::DateTime.matches(&json!(1_704_067_200_000i64)));
        assert!(!ScalarType::DateTime.matches(&json!("last tuesday")));
        assert!(!ScalarType::Dict.matches(&json!([])));
        assert_eq!(ScalarType::Dict.as_str(), "dict");
    }
}
