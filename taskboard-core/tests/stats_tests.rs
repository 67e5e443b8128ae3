// Integration tests for the project statistics pipelines and merge

use serde_json::{json, Map, Value};
use taskboard_core::{
    parse_from_call, Entity, FieldSpecs, MemoryStore, NonePolicy, ProjectStats, SectionStats,
    StatsConfig, StatsMerger, Task, TaskStatus, TaskVisibility, TaskboardError,
};

fn store_with_tasks(tasks: Value) -> MemoryStore {
    MemoryStore::from_dump(&json!({ "tasks": tasks })).unwrap()
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_status_counts_split_by_section() {
    let store = store_with_tasks(json!([
        {"_id": "t1", "project": "P", "status": "completed", "tags": []},
        {"_id": "t2", "project": "P", "status": "completed", "tags": ["archived"]},
        {"_id": "t3", "project": "P", "status": "failed", "tags": []}
    ]));
    let config = StatsConfig::default();

    let stats = StatsMerger::new(&store, &config)
        .collect(&ids(&["P"]), None)
        .unwrap();

    let p = &stats["P"];
    let active = p.section(TaskVisibility::Active).unwrap();
    assert_eq!(active.status_count[&TaskStatus::Completed], 1);
    assert_eq!(active.status_count[&TaskStatus::Failed], 1);
    for status in TaskStatus::ALL {
        if status != TaskStatus::Completed && status != TaskStatus::Failed {
            assert_eq!(active.status_count[&status], 0, "{} should be 0", status);
        }
    }

    let archived = p.section(TaskVisibility::Archived).unwrap();
    assert_eq!(archived.status_count[&TaskStatus::Completed], 1);
    assert_eq!(archived.status_count.values().sum::<u64>(), 1);
}

#[test]
fn test_runtime_floor_seconds() {
    let store = store_with_tasks(json!([
        {"_id": "t1", "project": "P", "status": "completed", "type": "training",
         "started": 1000, "completed": 4500, "tags": []}
    ]));
    let config = StatsConfig::default();

    let stats = StatsMerger::new(&store, &config)
        .collect(&ids(&["P"]), None)
        .unwrap();

    assert_eq!(stats["P"].section(TaskVisibility::Active).unwrap().total_runtime, 3);
    assert_eq!(stats["P"].section(TaskVisibility::Archived).unwrap().total_runtime, 0);
}

#[test]
fn test_non_positive_duration_contributes_nothing() {
    let store = store_with_tasks(json!([
        {"_id": "t1", "project": "P", "type": "training", "started": 5000, "completed": 5000, "tags": []},
        {"_id": "t2", "project": "P", "type": "testing", "started": 9000, "completed": 2000, "tags": ["archived"]},
        {"_id": "t3", "project": "P", "type": "training", "started": 1000, "tags": []}
    ]));
    let config = StatsConfig::default();

    let stats = StatsMerger::new(&store, &config)
        .collect(&ids(&["P"]), None)
        .unwrap();

    for section in TaskVisibility::ALL {
        assert_eq!(stats["P"].section(section).unwrap().total_runtime, 0);
    }
}

#[test]
fn test_runtime_only_counts_configured_task_types() {
    let store = store_with_tasks(json!([
        {"_id": "t1", "project": "P", "type": "training", "started": 0, "completed": 10000, "tags": []},
        {"_id": "t2", "project": "P", "type": "training", "started": 1000, "completed": 11000, "tags": []},
        {"_id": "t3", "project": "P", "type": "import", "started": 1000, "completed": 61000, "tags": []}
    ]));
    let config = StatsConfig::default();

    let stats = StatsMerger::new(&store, &config)
        .collect(&ids(&["P"]), Some(TaskVisibility::Active))
        .unwrap();

    // t1 has a falsy start time and is skipped
    assert_eq!(stats["P"].section(TaskVisibility::Active).unwrap().total_runtime, 10);
}

#[test]
fn test_malformed_tags_count_as_active() {
    let store = store_with_tasks(json!([
        {"_id": "t1", "project": "P", "status": "queued"},
        {"_id": "t2", "project": "P", "status": "queued", "tags": "archived"},
        {"_id": "t3", "project": "P", "status": "queued", "tags": null,
         "type": "annotation", "started": 1000, "completed": 3000}
    ]));
    let config = StatsConfig::default();

    let stats = StatsMerger::new(&store, &config)
        .collect(&ids(&["P"]), None)
        .unwrap();

    let active = stats["P"].section(TaskVisibility::Active).unwrap();
    assert_eq!(active.status_count[&TaskStatus::Queued], 3);
    assert_eq!(active.total_runtime, 2);
}

#[test]
fn test_projects_without_tasks_get_defaults() {
    let store = store_with_tasks(json!([
        {"_id": "t1", "project": "other", "status": "created", "tags": []}
    ]));
    let config = StatsConfig::default();

    let stats = StatsMerger::new(&store, &config)
        .collect(&ids(&["P", "Q"]), Some(TaskVisibility::Archived))
        .unwrap();

    assert_eq!(stats.len(), 2);
    for id in ["P", "Q"] {
        assert_eq!(stats[id], ProjectStats::skeleton(&[TaskVisibility::Archived]));
        assert_eq!(stats[id].section(TaskVisibility::Archived), Some(&SectionStats::empty()));
    }
}

#[test]
fn test_custom_archived_tag_and_time_unit() {
    let store = store_with_tasks(json!([
        {"_id": "t1", "project": "P", "status": "stopped", "type": "training",
         "started": 10, "completed": 70, "tags": ["hidden"]}
    ]));
    let config = StatsConfig {
        archived_tag: "hidden".to_string(),
        time_units_per_second: 1.0,
        ..StatsConfig::default()
    };

    let stats = StatsMerger::new(&store, &config)
        .collect(&ids(&["P"]), None)
        .unwrap();

    let archived = stats["P"].section(TaskVisibility::Archived).unwrap();
    assert_eq!(archived.status_count[&TaskStatus::Stopped], 1);
    assert_eq!(archived.total_runtime, 60);
}

#[test]
fn test_rfc3339_timestamps_accepted_and_aggregated() {
    let store = MemoryStore::new();
    let call: Map<String, Value> = json!({
        "started": "2024-01-01T00:00:00Z",
        "completed": "2024-01-01T00:00:05Z"
    })
    .as_object()
    .cloned()
    .unwrap();
    let fields = FieldSpecs::from_schema(Task::schema(), &["started", "completed"]);
    let parsed = parse_from_call(&store, &call, &fields, &Task::field_names(), NonePolicy::Discard).unwrap();
    assert_eq!(parsed.len(), 2);

    let store = store_with_tasks(json!([
        {"_id": "t1", "project": "P", "status": "completed", "type": "training",
         "started": "2024-01-01T00:00:00Z", "completed": "2024-01-01T00:00:05Z", "tags": []},
        {"_id": "t2", "project": "P", "status": "completed", "type": "testing",
         "started": 1000, "completed": 4500, "tags": []},
        {"_id": "t3", "project": "Q", "status": "failed", "type": "training",
         "started": "2024-01-01T00:01:00+01:00", "completed": "2024-01-01T00:00:30Z",
         "tags": ["archived"]}
    ]));
    let config = StatsConfig::default();

    let stats = StatsMerger::new(&store, &config)
        .collect(&ids(&["P", "Q"]), None)
        .unwrap();

    assert_eq!(stats["P"].section(TaskVisibility::Active).unwrap().total_runtime, 8);
    // 00:01+01:00 is 23:01Z the day before, so Q ran for 59m30s
    assert_eq!(stats["Q"].section(TaskVisibility::Archived).unwrap().total_runtime, 3570);
}

#[test]
fn test_unparseable_timestamp_rejected_by_parser() {
    let store = MemoryStore::new();
    let call: Map<String, Value> = json!({"started": "yesterday"}).as_object().cloned().unwrap();
    let fields = FieldSpecs::from_schema(Task::schema(), &["started"]);

    let err = parse_from_call(&store, &call, &fields, &Task::field_names(), NonePolicy::Discard)
        .unwrap_err();
    assert!(matches!(err, TaskboardError::ParseFailure { ref field, .. } if field == "started"));
}
