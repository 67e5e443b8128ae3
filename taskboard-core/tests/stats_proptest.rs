// Property tests: merged statistics agree with a direct count over the tasks

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use taskboard_core::{MemoryStore, StatsConfig, StatsMerger, TaskStatus, TaskVisibility};

#[derive(Debug, Clone)]
struct TaskSpec {
    project: usize,
    status: TaskStatus,
    archived: bool,
    task_type: &'static str,
    started: Option<i64>,
    completed: Option<i64>,
}

fn arb_task() -> impl Strategy<Value = TaskSpec> {
    (
        0usize..3,
        prop::sample::select(TaskStatus::ALL.to_vec()),
        any::<bool>(),
        prop::sample::select(vec!["training", "testing", "annotation", "import"]),
        prop::option::of(0i64..100_000),
        prop::option::of(0i64..100_000),
    )
        .prop_map(|(project, status, archived, task_type, started, completed)| TaskSpec {
            project,
            status,
            archived,
            task_type,
            started,
            completed,
        })
}

fn project_id(i: usize) -> String {
    format!("p{}", i)
}

fn to_doc(i: usize, task: &TaskSpec) -> Value {
    let mut doc = json!({
        "_id": format!("t{}", i),
        "project": project_id(task.project),
        "status": task.status.as_str(),
        "type": task.task_type,
        "tags": if task.archived { json!(["archived", "x"]) } else { json!(["x"]) },
    });
    if let Some(started) = task.started {
        doc["started"] = json!(started);
    }
    if let Some(completed) = task.completed {
        doc["completed"] = json!(completed);
    }
    doc
}

fn expected_runtime(task: &TaskSpec) -> i64 {
    match (task.started, task.completed) {
        (Some(s), Some(c)) if s != 0 && c != 0 && c > s && task.task_type != "import" => (c - s) / 1000,
        _ => 0,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn merged_stats_match_direct_count(tasks in prop::collection::vec(arb_task(), 0..40)) {
        let docs: Vec<Value> = tasks.iter().enumerate().map(|(i, t)| to_doc(i, t)).collect();
        let store = MemoryStore::from_dump(&json!({ "tasks": docs })).unwrap();
        let config = StatsConfig::default();
        // p3 never has tasks
        let ids: Vec<String> = (0..4).map(project_id).collect();

        let stats = StatsMerger::new(&store, &config).collect(&ids, None).unwrap();

        let mut counts: BTreeMap<(String, TaskVisibility, TaskStatus), u64> = BTreeMap::new();
        let mut runtime: BTreeMap<(String, TaskVisibility), i64> = BTreeMap::new();
        for task in &tasks {
            let section = TaskVisibility::from_archived_flag(task.archived);
            *counts.entry((project_id(task.project), section, task.status)).or_default() += 1;
            *runtime.entry((project_id(task.project), section)).or_default() += expected_runtime(task);
        }

        prop_assert_eq!(stats.len(), ids.len());
        for id in &ids {
            let report = &stats[id];
            for section in TaskVisibility::ALL {
                let section_stats = report.section(section).unwrap();
                prop_assert_eq!(section_stats.status_count.len(), TaskStatus::ALL.len());
                for status in TaskStatus::ALL {
                    let want = counts.get(&(id.clone(), section, status)).copied().unwrap_or(0);
                    prop_assert_eq!(section_stats.status_count[&status], want);
                }
                let want = runtime.get(&(id.clone(), section)).copied().unwrap_or(0);
                prop_assert_eq!(section_stats.total_runtime, want);
            }
        }
    }

    #[test]
    fn single_state_reports_only_that_section(
        tasks in prop::collection::vec(arb_task(), 0..20),
        archived in any::<bool>(),
    ) {
        let docs: Vec<Value> = tasks.iter().enumerate().map(|(i, t)| to_doc(i, t)).collect();
        let store = MemoryStore::from_dump(&json!({ "tasks": docs })).unwrap();
        let config = StatsConfig::default();
        let only = TaskVisibility::from_archived_flag(archived);
        let ids: Vec<String> = (0..3).map(project_id).collect();

        let all = StatsMerger::new(&store, &config).collect(&ids, None).unwrap();
        let single = StatsMerger::new(&store, &config).collect(&ids, Some(only)).unwrap();

        for id in &ids {
            prop_assert_eq!(single[id].0.len(), 1);
            prop_assert_eq!(single[id].section(only), all[id].section(only));
        }
    }
}
