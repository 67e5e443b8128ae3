// src/merger.rs
//! Merging of the statistics pipelines into per-project reports
//!
//! The pipelines only return rows for combinations that actually occur. The
//! merger first builds a complete skeleton (every project, every requested
//! section, every status at 0, runtime 0) and then overlays the rows onto it,
//! so a report never lacks a key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::StatsConfig;
use crate::error::{Result, TaskboardError};
use crate::models::{TaskStatus, TaskVisibility, TASKS};
use crate::planner::{plan_project_stats, requested_sections, StatsPipelines, ARCHIVED_KEY};
use crate::store::DocumentStore;
use crate::value_utils::safe_get;

/// Counts and runtime of one visibility section of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionStats {
    /// Whole seconds
    pub total_runtime: i64,
    pub status_count: BTreeMap<TaskStatus, u64>,
}

impl SectionStats {
    /// Runtime 0 and every status at 0
    pub fn empty() -> Self {
        SectionStats {
            total_runtime: 0,
            status_count: TaskStatus::ALL.iter().map(|s| (*s, 0)).collect(),
        }
    }
}

impl Default for SectionStats {
    fn default() -> Self {
        Self::empty()
    }
}

/// Report for one project, keyed by section name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectStats(pub BTreeMap<TaskVisibility, SectionStats>);

impl ProjectStats {
    pub fn skeleton(sections: &[TaskVisibility]) -> Self {
        ProjectStats(sections.iter().map(|s| (*s, SectionStats::empty())).collect())
    }

    pub fn section(&self, section: TaskVisibility) -> Option<&SectionStats> {
        self.0.get(&section)
    }
}

/// One `counts` element of a status-count row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCountEntry {
    pub project: String,
    pub status: TaskStatus,
    pub archived: bool,
    pub count: u64,
}

impl StatusCountEntry {
    /// Entries of a `{_id: project, counts: [{status, count, archived}]}`
    /// row. Elements with an unknown or missing status are skipped.
    pub fn from_row(row: &Value) -> Vec<StatusCountEntry> {
        let Some(project) = row.get("_id").and_then(Value::as_str) else {
            crate::log_warn!("Skipping status count row without a project id: {}", row);
            return Vec::new();
        };
        let Some(counts) = row.get("counts").and_then(Value::as_array) else {
            crate::log_warn!("Skipping status count row for {} without counts", project);
            return Vec::new();
        };

        counts
            .iter()
            .filter_map(|item| {
                let status = match item.get("status").and_then(Value::as_str).and_then(TaskStatus::parse) {
                    Some(status) => status,
                    None => {
                        crate::log_warn!(
                            "Ignoring tasks of project {} with unrecognized status {}",
                            project,
                            item.get("status").unwrap_or(&Value::Null)
                        );
                        return None;
                    }
                };
                Some(StatusCountEntry {
                    project: project.to_string(),
                    status,
                    archived: item.get(ARCHIVED_KEY).and_then(Value::as_bool).unwrap_or(false),
                    count: item.get("count").and_then(Value::as_u64).unwrap_or(0),
                })
            })
            .collect()
    }

    pub fn section(&self) -> TaskVisibility {
        TaskVisibility::from_archived_flag(self.archived)
    }
}

/// Bucket entries by section, keeping their order within a bucket
pub fn group_by_section(entries: Vec<StatusCountEntry>) -> BTreeMap<TaskVisibility, Vec<StatusCountEntry>> {
    let mut buckets: BTreeMap<TaskVisibility, Vec<StatusCountEntry>> = BTreeMap::new();
    for entry in entries {
        buckets.entry(entry.section()).or_default().push(entry);
    }
    buckets
}

/// `{project: {section: seconds}}` from runtime rows (`_id` dropped)
pub fn runtime_lookup(rows: &[Value]) -> Value {
    let mut by_project = Map::new();
    for row in rows {
        let Value::Object(fields) = row else {
            continue;
        };
        let Some(project) = fields.get("_id").and_then(Value::as_str) else {
            crate::log_warn!("Skipping runtime row without a project id: {}", row);
            continue;
        };
        let sections: Map<String, Value> = fields
            .iter()
            .filter(|(k, _)| k.as_str() != "_id")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        by_project.insert(project.to_string(), Value::Object(sections));
    }
    Value::Object(by_project)
}

/// Merge raw pipeline output into a complete report for every project in
/// `project_ids`
pub fn merge_stats(
    project_ids: &[String],
    only_state: Option<TaskVisibility>,
    status_rows: &[Value],
    runtime_rows: &[Value],
) -> BTreeMap<String, ProjectStats> {
    let sections = requested_sections(only_state);
    let mut stats: BTreeMap<String, ProjectStats> = project_ids
        .iter()
        .map(|id| (id.clone(), ProjectStats::skeleton(&sections)))
        .collect();

    for row in status_rows {
        for (section, entries) in group_by_section(StatusCountEntry::from_row(row)) {
            for entry in entries {
                let Some(target) = stats
                    .get_mut(&entry.project)
                    .and_then(|report| report.0.get_mut(&section))
                else {
                    crate::log_trace!("Dropping counts for unrequested {}/{}", entry.project, section);
                    continue;
                };
                target.status_count.insert(entry.status, entry.count);
            }
        }
    }

    let runtime = runtime_lookup(runtime_rows);
    for (project, report) in stats.iter_mut() {
        for (section, section_stats) in report.0.iter_mut() {
            section_stats.total_runtime = safe_get(&runtime, &format!("{}/{}", project, section))
                .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
                .unwrap_or(0);
        }
    }

    stats
}

/// Runs the statistics pipelines against a store and merges their output
pub struct StatsMerger<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    config: &'a StatsConfig,
}

impl<'a, S: DocumentStore + ?Sized> StatsMerger<'a, S> {
    pub fn new(store: &'a S, config: &'a StatsConfig) -> Self {
        StatsMerger { store, config }
    }

    /// Reports for `project_ids`; both pipelines run concurrently and a
    /// failure of either fails the whole request
    pub fn collect(
        &self,
        project_ids: &[String],
        only_state: Option<TaskVisibility>,
    ) -> Result<BTreeMap<String, ProjectStats>> {
        let StatsPipelines { status_count, runtime } =
            plan_project_stats(project_ids, only_state, self.config);
        let store = self.store;

        let (status_rows, runtime_rows) = crossbeam::scope(|scope| {
            let status_worker = scope.spawn(|_| store.aggregate(TASKS, &status_count));
            let runtime_worker = scope.spawn(|_| store.aggregate(TASKS, &runtime));
            (status_worker.join(), runtime_worker.join())
        })
        .map_err(|_| worker_panicked())?;

        let status_rows = status_rows.map_err(|_| worker_panicked())??;
        let runtime_rows = runtime_rows.map_err(|_| worker_panicked())??;

        crate::log_debug!(
            "Stats pipelines returned {} status rows and {} runtime rows",
            status_rows.len(),
            runtime_rows.len()
        );
        Ok(merge_stats(project_ids, only_state, &status_rows, &runtime_rows))
    }
}

fn worker_panicked() -> TaskboardError {
    TaskboardError::Storage {
        context: "computing project stats".to_string(),
        message: "pipeline worker panicked".to_string(),
    }
}

/// Set `stats` on each record whose `id` has a report
pub fn attach_stats(records: &mut [Value], stats: &BTreeMap<String, ProjectStats>) -> Result<()> {
    for record in records.iter_mut() {
        let Some(id) = record.get("id").and_then(Value::as_str) else {
            continue;
        };
        let Some(report) = stats.get(id) else {
            continue;
        };
        let report = serde_json::to_value(report)?;
        if let Value::Object(fields) = record {
            fields.insert("stats".to_string(), report);
        }
    }
    Ok(())
}
