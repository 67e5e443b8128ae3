// src/planner.rs
//! Statistics pipeline planning
//!
//! Two pipelines run over the tasks collection for a set of projects:
//!
//! - status count: tasks per (project, status, archived flag), regrouped into
//!   one row per project carrying a `counts` list
//! - runtime: per project, the summed whole seconds between `started` and
//!   `completed` of runtime-bearing tasks, one column per requested section

use crate::aggregation::{Accumulator, Expression, GroupKey, Pipeline, Stage};
use crate::config::StatsConfig;
use crate::constraint::Constraint;
use crate::models::TaskVisibility;

/// Field of the status-count rows and group keys that carries the archived flag
pub const ARCHIVED_KEY: &str = "archived";

#[derive(Debug, Clone, PartialEq)]
pub struct StatsPipelines {
    pub status_count: Pipeline,
    pub runtime: Pipeline,
}

/// Sections reported for a state filter (`None` means all of them)
pub fn requested_sections(only_state: Option<TaskVisibility>) -> Vec<TaskVisibility> {
    TaskVisibility::ALL
        .iter()
        .copied()
        .filter(|state| only_state.map_or(true, |only| only == *state))
        .collect()
}

pub fn plan_project_stats(
    project_ids: &[String],
    only_state: Option<TaskVisibility>,
    config: &StatsConfig,
) -> StatsPipelines {
    let pipelines = StatsPipelines {
        status_count: status_count_pipeline(project_ids, config),
        runtime: runtime_pipeline(project_ids, only_state, config),
    };
    crate::log_debug!(
        "Planned stats pipelines for {} projects: status_count={} runtime={}",
        project_ids.len(),
        pipelines.status_count.to_json(),
        pipelines.runtime.to_json()
    );
    pipelines
}

fn in_projects(project_ids: &[String]) -> Constraint {
    Constraint::in_("project", project_ids.iter().cloned())
}

fn is_archived(config: &StatsConfig) -> Expression {
    Expression::in_(
        Expression::literal(config.archived_tag.clone()),
        Expression::field("tags"),
    )
}

/// Replace a missing or non-array `tags` with `[]` so `$in` can test it
fn normalize_tags() -> Stage {
    Stage::add_fields(vec![(
        "tags",
        Expression::cond(
            Expression::ne(Expression::type_of(Expression::field("tags")), Expression::literal("array")),
            Expression::literal(serde_json::json!([])),
            Expression::field("tags"),
        ),
    )])
}

fn status_count_pipeline(project_ids: &[String], config: &StatsConfig) -> Pipeline {
    Pipeline::new(vec![
        Stage::match_filter(in_projects(project_ids).to_filter()),
        normalize_tags(),
        Stage::group(
            GroupKey::Compound(vec![
                ("project".to_string(), Expression::field("project")),
                ("status".to_string(), Expression::field("status")),
                (ARCHIVED_KEY.to_string(), is_archived(config)),
            ]),
            vec![("count", Accumulator::Sum(Expression::literal(1)))],
        ),
        Stage::group(
            GroupKey::Single(Expression::field("_id.project")),
            vec![(
                "counts",
                Accumulator::Push(Expression::object(vec![
                    ("status", Expression::field("_id.status")),
                    ("count", Expression::field("count")),
                    (ARCHIVED_KEY, Expression::field(format!("_id.{}", ARCHIVED_KEY))),
                ])),
            )],
        ),
    ])
}

/// floor((completed - started) / units) when both are set, completed is
/// later, and the task belongs to the section; 0 otherwise
fn section_runtime(section: TaskVisibility, config: &StatsConfig) -> Accumulator {
    let in_section = match section {
        TaskVisibility::Active => Expression::not(is_archived(config)),
        TaskVisibility::Archived => is_archived(config),
    };
    Accumulator::Sum(Expression::cond(
        Expression::And(vec![
            Expression::field("started"),
            Expression::field("completed"),
            Expression::gt(Expression::field("completed"), Expression::field("started")),
            in_section,
        ]),
        Expression::floor(Expression::divide(
            Expression::subtract(Expression::field("completed"), Expression::field("started")),
            Expression::literal(config.time_units_per_second),
        )),
        Expression::literal(0),
    ))
}

fn runtime_pipeline(
    project_ids: &[String],
    only_state: Option<TaskVisibility>,
    config: &StatsConfig,
) -> Pipeline {
    let task_types = Constraint::in_("type", config.runtime_task_types.iter().cloned());
    let columns: Vec<(&str, Accumulator)> = requested_sections(only_state)
        .into_iter()
        .map(|section| (section.as_str(), section_runtime(section, config)))
        .collect();

    Pipeline::new(vec![
        Stage::match_filter((task_types & in_projects(project_ids)).to_filter()),
        normalize_tags(),
        Stage::group(GroupKey::Single(Expression::field("project")), columns),
    ])
}
