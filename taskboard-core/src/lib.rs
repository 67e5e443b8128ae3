// taskboard-core/src/lib.rs
// Schema reflection, call parsing and project statistics for the taskboard service

pub mod aggregation;
pub mod config;
pub mod constraint;
pub mod error;
pub mod identity;
pub mod logging;
pub mod merger;
pub mod models;
pub mod parser;
pub mod planner;
pub mod projects;
pub mod query;
pub mod schema;
pub mod store;
pub mod value_utils;

// Public exports
pub use aggregation::{Accumulator, Expression, GroupKey, Pipeline, Stage};
pub use config::{CoreConfig, StatsConfig};
pub use constraint::{field_missing_or_empty, visibility_constraint, Constraint};
pub use error::{Result, TaskboardError};
pub use identity::Identity;
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use merger::{attach_stats, ProjectStats, SectionStats, StatsMerger};
pub use models::{Company, Entity, Model, Project, Task, TaskStatus, TaskType, TaskVisibility, User};
pub use parser::{parse_from_call, ContainerKind, FieldSpec, FieldSpecs, NonePolicy};
pub use planner::{plan_project_stats, StatsPipelines};
pub use projects::{DeleteResponse, ProjectService, UpdateResponse};
pub use schema::{get_fields, get_fields_and_attr, get_fields_with_attr, FieldDescriptor, ModelSchema};
pub use store::{DocumentStore, MemoryStore};
pub use value_utils::safe_get;
