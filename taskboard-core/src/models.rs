// src/models.rs
//! Entity declarations of the tracking service and their enum-like options
//!
//! The declarations here are the static schema metadata the field registry
//! reflects over. Each entity memoizes its `ModelSchema` on first use.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::error::TaskboardError;
use crate::schema::{
    get_fields, FieldDescriptor, ModelDecl, ModelSchema, ReferenceTarget, ScalarType,
};

pub const COMPANIES: &str = "companies";
pub const USERS: &str = "users";
pub const PROJECTS: &str = "projects";
pub const TASKS: &str = "tasks";
pub const MODELS: &str = "models";

/// A stored entity type with a declared schema
pub trait Entity {
    const TYPE_NAME: &'static str;
    const COLLECTION: &'static str;

    fn declaration() -> Arc<ModelDecl>;

    /// Built on first access, read-only afterwards
    fn schema() -> &'static ModelSchema;

    fn field_names() -> Vec<String> {
        get_fields(Self::schema())
    }

    fn reference() -> ReferenceTarget {
        ReferenceTarget {
            type_name: Self::TYPE_NAME,
            collection: Self::COLLECTION,
        }
    }
}

macro_rules! entity {
    ($ty:ident, $collection:expr, $decl:ident) => {
        pub struct $ty;

        impl Entity for $ty {
            const TYPE_NAME: &'static str = stringify!($ty);
            const COLLECTION: &'static str = $collection;

            fn declaration() -> Arc<ModelDecl> {
                $decl()
            }

            fn schema() -> &'static ModelSchema {
                lazy_static! {
                    static ref SCHEMA: ModelSchema = ModelSchema::build($decl());
                }
                &SCHEMA
            }
        }
    };
}

entity!(Company, COMPANIES, company_decl);
entity!(User, USERS, user_decl);
entity!(Project, PROJECTS, project_decl);
entity!(Task, TASKS, task_decl);
entity!(Model, MODELS, model_decl);

// ============================================================================
// ENUMS
// ============================================================================

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Queued,
    InProgress,
    Stopped,
    Published,
    Publishing,
    Closed,
    Failed,
    Completed,
    Unknown,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 10] = [
        TaskStatus::Created,
        TaskStatus::Queued,
        TaskStatus::InProgress,
        TaskStatus::Stopped,
        TaskStatus::Published,
        TaskStatus::Publishing,
        TaskStatus::Closed,
        TaskStatus::Failed,
        TaskStatus::Completed,
        TaskStatus::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Queued => "queued",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Published => "published",
            TaskStatus::Publishing => "publishing",
            TaskStatus::Closed => "closed",
            TaskStatus::Failed => "failed",
            TaskStatus::Completed => "completed",
            TaskStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        TaskStatus::ALL.iter().copied().find(|status| status.as_str() == s)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visibility section of a task, decided by the "archived" tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskVisibility {
    Active,
    Archived,
}

impl TaskVisibility {
    pub const ALL: [TaskVisibility; 2] = [TaskVisibility::Active, TaskVisibility::Archived];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskVisibility::Active => "active",
            TaskVisibility::Archived => "archived",
        }
    }

    pub fn from_archived_flag(archived: bool) -> Self {
        if archived {
            TaskVisibility::Archived
        } else {
            TaskVisibility::Active
        }
    }
}

impl FromStr for TaskVisibility {
    type Err = TaskboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TaskVisibility::Active),
            "archived" => Ok(TaskVisibility::Archived),
            other => Err(TaskboardError::InvalidStateFilter(other.to_string())),
        }
    }
}

impl fmt::Display for TaskVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Training,
    Testing,
    Annotation,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [TaskType::Training, TaskType::Testing, TaskType::Annotation];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Training => "training",
            TaskType::Testing => "testing",
            TaskType::Annotation => "annotation",
        }
    }
}

// ============================================================================
// DECLARATIONS
// ============================================================================

lazy_static! {
    /// Fields shared by every company-scoped entity
    static ref COMPANY_SCOPED: Arc<ModelDecl> = ModelDecl::new("CompanyScoped")
        .field(FieldDescriptor::string("id").attr("primary_key", true))
        .field(
            FieldDescriptor::reference("company", Company::reference()).attr("required", true),
        )
        .into_arc();

    /// Named, user-owned, taggable entities
    static ref ATTRIBUTED: Arc<ModelDecl> = ModelDecl::new("AttributedDocument")
        .extends(COMPANY_SCOPED.clone())
        .field(FieldDescriptor::string("name"))
        .field(FieldDescriptor::reference("user", User::reference()))
        .field(FieldDescriptor::datetime("created"))
        .field(FieldDescriptor::list("tags", FieldDescriptor::string("")).attr("user_set_allowed", true))
        .into_arc();
}

fn company_decl() -> Arc<ModelDecl> {
    ModelDecl::new("Company")
        .field(FieldDescriptor::string("id").attr("primary_key", true))
        .field(FieldDescriptor::string("name").attr("required", true))
        .into_arc()
}

fn user_decl() -> Arc<ModelDecl> {
    ModelDecl::new("User")
        .extends(COMPANY_SCOPED.clone())
        .field(FieldDescriptor::string("name").attr("required", true).attr("user_set_allowed", true))
        .field(FieldDescriptor::string("family_name").attr("user_set_allowed", true))
        .field(FieldDescriptor::string("given_name").attr("user_set_allowed", true))
        .field(FieldDescriptor::string("avatar"))
        .field(FieldDescriptor::scalar("preferences", ScalarType::Dict).attr("exclude_by_default", true))
        .into_arc()
}

fn project_decl() -> Arc<ModelDecl> {
    ModelDecl::new("Project")
        .extends(ATTRIBUTED.clone())
        .field(
            FieldDescriptor::string("name")
                .attr("required", true)
                .attr("user_set_allowed", true)
                .attr("unique_per_company", true),
        )
        .field(FieldDescriptor::string("description").attr("required", true).attr("user_set_allowed", true))
        .field(FieldDescriptor::string("default_output_destination"))
        .field(FieldDescriptor::datetime("last_update"))
        .into_arc()
}

fn execution_decl() -> Arc<ModelDecl> {
    ModelDecl::new("Execution")
        .field(FieldDescriptor::string("queue"))
        .field(FieldDescriptor::scalar("parameters", ScalarType::Dict))
        .field(FieldDescriptor::reference("model", Model::reference()))
        .field(FieldDescriptor::scalar("model_labels", ScalarType::Dict))
        .field(FieldDescriptor::scalar("test_split", ScalarType::Integer))
        .into_arc()
}

fn output_decl() -> Arc<ModelDecl> {
    ModelDecl::new("Output")
        .field(FieldDescriptor::string("destination"))
        .field(FieldDescriptor::reference("model", Model::reference()))
        .field(FieldDescriptor::string("result").choices(["success", "failure"]))
        .field(FieldDescriptor::string("error"))
        .into_arc()
}

fn script_decl() -> Arc<ModelDecl> {
    ModelDecl::new("Script")
        .field(FieldDescriptor::string("repository").attr("required", true))
        .field(FieldDescriptor::string("branch"))
        .field(FieldDescriptor::string("version_num"))
        .field(FieldDescriptor::string("entry_point").attr("required", true))
        .field(FieldDescriptor::string("working_dir"))
        .into_arc()
}

fn task_decl() -> Arc<ModelDecl> {
    let statuses = TaskStatus::ALL.iter().map(|s| s.as_str());
    let types = TaskType::ALL.iter().map(|t| t.as_str());

    ModelDecl::new("Task")
        .extends(ATTRIBUTED.clone())
        .field(FieldDescriptor::string("name").attr("required", true).attr("user_set_allowed", true))
        .field(FieldDescriptor::reference("project", Project::reference()))
        .field(FieldDescriptor::reference("parent", ReferenceTarget {
            type_name: "Task",
            collection: TASKS,
        }))
        .field(FieldDescriptor::string("type").choices(types).attr("required", true))
        .field(FieldDescriptor::string("status").choices(statuses))
        .field(FieldDescriptor::string("status_reason"))
        .field(FieldDescriptor::string("status_message"))
        .field(FieldDescriptor::datetime("status_changed"))
        .field(FieldDescriptor::string("comment").attr("user_set_allowed", true))
        .field(FieldDescriptor::datetime("started"))
        .field(FieldDescriptor::datetime("completed"))
        .field(FieldDescriptor::datetime("published"))
        .field(FieldDescriptor::datetime("last_update"))
        .field(FieldDescriptor::embedded("script", script_decl()))
        .field(FieldDescriptor::embedded("execution", execution_decl()))
        .field(FieldDescriptor::embedded("output", output_decl()))
        .into_arc()
}

fn model_decl() -> Arc<ModelDecl> {
    ModelDecl::new("Model")
        .extends(ATTRIBUTED.clone())
        .field(FieldDescriptor::string("name").attr("user_set_allowed", true))
        .field(FieldDescriptor::reference("project", Project::reference()))
        .field(FieldDescriptor::reference("task", Task::reference()))
        .field(FieldDescriptor::reference("parent", ReferenceTarget {
            type_name: "Model",
            collection: MODELS,
        }))
        .field(FieldDescriptor::string("comment").attr("user_set_allowed", true))
        .field(FieldDescriptor::string("framework").attr("user_set_allowed", true))
        .field(FieldDescriptor::scalar("design", ScalarType::Dict))
        .field(FieldDescriptor::scalar("labels", ScalarType::Dict))
        .field(FieldDescriptor::string("uri"))
        .field(FieldDescriptor::scalar("ready", ScalarType::Boolean))
        .into_arc()
}

/// Schema of an entity by its type name (case-insensitive)
pub fn schema_by_name(name: &str) -> Option<&'static ModelSchema> {
    match name.to_lowercase().as_str() {
        "company" => Some(Company::schema()),
        "user" => Some(User::schema()),
        "project" => Some(Project::schema()),
        "task" => Some(Task::schema()),
        "model" => Some(Model::schema()),
        _ => None,
    }
}
