// src/projects.rs
//! Project operations: lookup, listing with statistics, create, update and
//! delete
//!
//! Call data arrives as untrusted JSON maps and is always narrowed through
//! `parse_from_call` before it reaches the store.

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::StatsConfig;
use crate::constraint::{visibility_constraint, Constraint};
use crate::error::{Result, TaskboardError};
use crate::identity::Identity;
use crate::merger::{attach_stats, StatsMerger};
use crate::models::{Entity, Project, TaskVisibility, MODELS, PROJECTS, TASKS};
use crate::parser::{parse_from_call, ContainerKind, FieldSpec, FieldSpecs, NonePolicy};
use crate::query::operators::compile_pattern;
use crate::schema::get_fields_and_attr;
use crate::store::DocumentStore;

/// Fields a caller may set on create and update
fn create_fields() -> FieldSpecs {
    FieldSpecs::names(["name", "description", "default_output_destination"])
        .with("tags", FieldSpec::TypeCheck(ContainerKind::List))
}

/// Fields matched as regular expressions by the listing operations
const PATTERN_FIELDS: [&str; 2] = ["name", "description"];

fn pattern_check() -> FieldSpec {
    FieldSpec::custom(|value| match value {
        Value::String(pattern) => compile_pattern(pattern).map(|_| ()).map_err(|e| e.to_string()),
        _ => Err("expecting pattern string".to_string()),
    })
}

/// Filters accepted by the listing operations
fn query_fields() -> FieldSpecs {
    PATTERN_FIELDS
        .iter()
        .fold(FieldSpecs::default(), |specs, name| specs.with(*name, pattern_check()))
        .with("id", FieldSpec::TypeCheck(ContainerKind::List))
        .with("tags", FieldSpec::TypeCheck(ContainerKind::List))
}

/// `include_stats` flag: absent or null is off, anything but a boolean is
/// rejected
fn include_stats(call_data: &Map<String, Value>) -> Result<bool> {
    match call_data.get("include_stats") {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(_) => Err(TaskboardError::parse_failure("include_stats", "expecting boolean")),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateResponse {
    pub updated: u64,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteResponse {
    pub deleted: u64,
    pub disassociated_tasks: u64,
}

/// Requested statistics sections. Absent means active only; null or an
/// empty string means every section.
pub fn stats_state_filter(call_data: &Map<String, Value>) -> Result<Option<TaskVisibility>> {
    match call_data.get("stats_for_state") {
        None => Ok(Some(TaskVisibility::Active)),
        Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => s.parse().map(Some),
        Some(other) => Err(TaskboardError::InvalidStateFilter(other.to_string())),
    }
}

/// Stored document to response record (`_id` becomes `id`)
fn to_record(mut doc: Value) -> Value {
    if let Value::Object(fields) = &mut doc {
        if let Some(id) = fields.remove("_id") {
            fields.insert("id".to_string(), id);
        }
    }
    doc
}

fn now() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

pub struct ProjectService<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    config: &'a StatsConfig,
}

impl<'a, S: DocumentStore + ?Sized> ProjectService<'a, S> {
    pub fn new(store: &'a S, config: &'a StatsConfig) -> Self {
        ProjectService { store, config }
    }

    /// A project visible to the caller's company
    pub fn get_by_id(&self, identity: &Identity, project_id: &str) -> Result<Value> {
        let query = Constraint::eq("_id", project_id) & visibility_constraint(&identity.company);
        self.store
            .find_one(PROJECTS, &query.to_filter(), None)?
            .map(to_record)
            .ok_or_else(|| TaskboardError::InvalidProjectReference(project_id.to_string()))
    }

    /// Projects visible to the caller's company, narrowed by the optional
    /// `name` and `description` patterns and the `id` and `tags` (any of)
    /// filters. An empty pattern matches everything.
    pub fn get_all(&self, identity: &Identity, call_data: &Map<String, Value>) -> Result<Vec<Value>> {
        let filters = parse_from_call(
            self.store,
            call_data,
            &query_fields(),
            &Project::field_names(),
            NonePolicy::Discard,
        )?;

        let mut query = visibility_constraint(&identity.company);
        for (field, value) in filters {
            let is_pattern = PATTERN_FIELDS.contains(&field.as_str());
            let condition = match value {
                Value::Array(ids) if field == "id" => Constraint::in_("_id", ids),
                Value::Array(values) => Constraint::in_(field, values),
                Value::String(pattern) if is_pattern && pattern.is_empty() => continue,
                Value::String(pattern) if is_pattern => Constraint::regex(field, pattern),
                value => Constraint::eq(field, value),
            };
            query = query & condition;
        }

        let projects: Vec<Value> = self
            .store
            .find(PROJECTS, &query.to_filter())?
            .into_iter()
            .map(to_record)
            .collect();
        crate::log_debug!("Found {} projects for company {}", projects.len(), identity.company);
        Ok(projects)
    }

    /// `get_all`, with per-section task statistics attached when
    /// `include_stats` is set
    pub fn get_all_ex(&self, identity: &Identity, call_data: &Map<String, Value>) -> Result<Vec<Value>> {
        let include_stats = include_stats(call_data)?;
        let only_state = stats_state_filter(call_data)?;

        let mut projects = self.get_all(identity, call_data)?;
        if !include_stats {
            return Ok(projects);
        }

        let ids: Vec<String> = projects
            .iter()
            .filter_map(|p| p.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();
        let stats = StatsMerger::new(self.store, self.config).collect(&ids, only_state)?;
        attach_stats(&mut projects, &stats)?;
        Ok(projects)
    }

    /// Create a project owned by the caller; returns the new id
    pub fn create(&self, identity: &Identity, call_data: &Map<String, Value>) -> Result<String> {
        let fields = parse_from_call(
            self.store,
            call_data,
            &create_fields(),
            &Project::field_names(),
            NonePolicy::Discard,
        )?;

        let settable = create_fields();
        for (name, _) in get_fields_and_attr(Project::schema(), "required") {
            let caller_sets = settable.iter().any(|(n, _)| *n == name);
            if caller_sets && !fields.contains_key(&name) {
                return Err(TaskboardError::parse_failure(name, "required field is missing"));
            }
        }

        let id = Uuid::new_v4().simple().to_string();
        let timestamp = now();
        let mut doc = fields;
        doc.insert("_id".to_string(), Value::String(id.clone()));
        doc.insert("user".to_string(), Value::String(identity.user.clone()));
        doc.insert("company".to_string(), Value::String(identity.company.clone()));
        doc.insert("created".to_string(), timestamp.clone());
        doc.insert("last_update".to_string(), timestamp);

        self.store.insert_one(PROJECTS, Value::Object(doc))?;
        crate::log_info!("Created project {} for company {}", id, identity.company);
        Ok(id)
    }

    fn ensure_writable(&self, identity: &Identity, project_id: &str) -> Result<()> {
        let query = Constraint::eq("_id", project_id) & Constraint::eq("company", identity.company.as_str());
        match self.store.find_one(PROJECTS, &query.to_filter(), Some(&["_id"]))? {
            Some(_) => Ok(()),
            None => Err(TaskboardError::InvalidProjectReference(project_id.to_string())),
        }
    }

    /// Update the caller-settable fields of `call_data["project"]`; explicit
    /// nulls clear a field
    pub fn update(&self, identity: &Identity, call_data: &Map<String, Value>) -> Result<UpdateResponse> {
        let project_id = required_project_id(call_data)?;
        self.ensure_writable(identity, project_id)?;

        let mut fields = parse_from_call(
            self.store,
            call_data,
            &create_fields(),
            &Project::field_names(),
            NonePolicy::KeepPresent,
        )?;
        fields.insert("last_update".to_string(), now());

        let updated = self
            .store
            .update_many(PROJECTS, &Constraint::eq("_id", project_id).to_filter(), &fields)?;
        Ok(UpdateResponse { updated, fields })
    }

    /// Delete a project. Live (non-archived) tasks or models block the
    /// deletion unless `force` is set, in which case every referencing task
    /// and model is detached from the project first.
    pub fn delete(&self, identity: &Identity, project_id: &str, force: bool) -> Result<DeleteResponse> {
        self.ensure_writable(identity, project_id)?;

        let live = Constraint::eq("project", project_id)
            & Constraint::nin("tags", [self.config.archived_tag.as_str()]);
        for (collection, entity) in [(TASKS, "tasks"), (MODELS, "models")] {
            let count = self.store.count(collection, &live.to_filter())?;
            if count > 0 && !force {
                return Err(TaskboardError::BlockedDeletion {
                    entity: entity.to_string(),
                    id: project_id.to_string(),
                    count,
                });
            }
        }

        let referencing = Constraint::eq("project", project_id).to_filter();
        let mut detach = Map::new();
        detach.insert("project".to_string(), Value::Null);
        let disassociated_tasks = self.store.update_many(TASKS, &referencing, &detach)?;
        let disassociated_models = self.store.update_many(MODELS, &referencing, &detach)?;

        let deleted = self
            .store
            .delete_one(PROJECTS, &Constraint::eq("_id", project_id).to_filter())?;
        crate::log_info!(
            "Deleted project {} (detached {} tasks, {} models)",
            project_id,
            disassociated_tasks,
            disassociated_models
        );
        Ok(DeleteResponse {
            deleted,
            disassociated_tasks,
        })
    }
}

fn required_project_id(call_data: &Map<String, Value>) -> Result<&str> {
    call_data
        .get("project")
        .and_then(Value::as_str)
        .ok_or_else(|| TaskboardError::parse_failure("project", "required field is missing"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_stats_state_filter() {
        assert_eq!(stats_state_filter(&data(json!({}))).unwrap(), Some(TaskVisibility::Active));
        assert_eq!(stats_state_filter(&data(json!({"stats_for_state": null}))).unwrap(), None);
        assert_eq!(stats_state_filter(&data(json!({"stats_for_state": ""}))).unwrap(), None);
        assert_eq!(
            stats_state_filter(&data(json!({"stats_for_state": "archived"}))).unwrap(),
            Some(TaskVisibility::Archived)
        );
        assert!(matches!(
            stats_state_filter(&data(json!({"stats_for_state": "deleted"}))),
            Err(TaskboardError::InvalidStateFilter(ref s)) if s == "deleted"
        ));
        assert!(matches!(
            stats_state_filter(&data(json!({"stats_for_state": 3}))),
            Err(TaskboardError::InvalidStateFilter(_))
        ));
    }

    #[test]
    fn test_include_stats_flag() {
        assert!(!include_stats(&data(json!({}))).unwrap());
        assert!(!include_stats(&data(json!({"include_stats": null}))).unwrap());
        assert!(include_stats(&data(json!({"include_stats": true}))).unwrap());
        for bad in [json!(1), json!("true"), json!([true])] {
            let err = include_stats(&data(json!({"include_stats": bad}))).unwrap_err();
            assert!(matches!(err, TaskboardError::ParseFailure { ref field, .. } if field == "include_stats"));
        }
    }

    #[test]
    fn test_query_fields_check_patterns() {
        let fields = query_fields();
        let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["name", "description", "id", "tags"]);
    }

    #[test]
    fn test_to_record_renames_id() {
        assert_eq!(to_record(json!({"_id": "p1", "name": "n"})), json!({"id": "p1", "name": "n"}));
    }
}
