// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use qm_core::{ErrorKind, FakeClock};

fn manager() -> (TaskGraphManager, tempfile::TempDir) {
    (TaskGraphManager::new(Arc::new(FakeClock::at(42_000))), tempfile::tempdir().unwrap())
}

fn write_manifest(workspace: &Path, json: &str) {
    std::fs::write(workspace.join("tasks.json"), json).unwrap();
}

const THREE_INDEPENDENT: &str = r#"{"tasks": [
    {"id": "a", "title": "A", "status": "pending", "priority": "medium"},
    {"id": "b", "title": "B", "status": "pending", "priority": "high"},
    {"id": "c", "title": "C", "status": "pending", "priority": "low"}
]}"#;

#[test]
fn missing_manifest_is_distinct_error() {
    let (mgr, dir) = manager();
    assert!(matches!(mgr.load(dir.path()), Err(TasksError::Missing(_))));
    let report = mgr.validate(dir.path());
    assert!(!report.valid);
}

#[test]
fn validate_accepts_well_formed_manifest() {
    let (mgr, dir) = manager();
    write_manifest(
        dir.path(),
        r#"{"tasks": [
            {"id": "a", "title": "A", "status": "done"},
            {"id": "b", "title": "B", "status": "in-progress", "dependencies": ["a"],
             "subtasks": [{"id": "1", "title": "S", "status": "pending"}]}
        ]}"#,
    );
    let report = mgr.validate(dir.path());
    assert!(report.valid, "errors: {:?}", report.errors);
    assert_eq!(report.stats.total, 2);
    assert_eq!(report.stats.done, 1);
    assert_eq!(report.stats.in_progress, 1);
    assert_eq!(report.stats.subtasks, 1);
}

#[test]
fn validate_flags_structural_problems() {
    let (mgr, dir) = manager();
    write_manifest(
        dir.path(),
        r#"{"tasks": [
            {"id": "a", "title": "A", "status": "doing"},
            {"id": "a", "title": "Dup", "status": "pending"},
            {"title": "NoId", "status": "pending"},
            {"id": "b", "title": "B", "status": "pending", "dependencies": ["ghost"]}
        ]}"#,
    );
    let report = mgr.validate(dir.path());
    assert!(!report.valid);
    assert!(report.errors.iter().any(|e| e.contains("unknown status")));
    assert!(report.errors.iter().any(|e| e.contains("duplicate task id")));
    assert!(report.errors.iter().any(|e| e.contains("missing or empty id")));
    assert!(report.errors.iter().any(|e| e.contains("unknown task ghost")));
}

#[test]
fn validate_reports_cycle_path() {
    let (mgr, dir) = manager();
    write_manifest(
        dir.path(),
        r#"{"tasks": [
            {"id": "a", "title": "A", "status": "pending", "dependencies": ["c"]},
            {"id": "b", "title": "B", "status": "pending", "dependencies": ["a"]},
            {"id": "c", "title": "C", "status": "pending", "dependencies": ["b"]}
        ]}"#,
    );
    let report = mgr.validate(dir.path());
    let cycle = report.errors.iter().find(|e| e.contains("cycle")).unwrap();
    assert!(cycle.contains("->"));
}

#[test]
fn validate_warns_on_many_in_progress() {
    let (mgr, dir) = manager();
    let tasks: Vec<String> = (0..5)
        .map(|i| format!(r#"{{"id": "t{i}", "title": "T", "status": "in-progress"}}"#))
        .collect();
    write_manifest(dir.path(), &format!(r#"{{"tasks": [{}]}}"#, tasks.join(",")));
    let report = mgr.validate(dir.path());
    assert!(report.valid);
    assert!(report.warnings.iter().any(|w| w.contains("in-progress")));
}

#[test]
fn next_ready_sorts_by_priority_then_deps_then_id() {
    let (mgr, dir) = manager();
    write_manifest(
        dir.path(),
        r#"{"tasks": [
            {"id": "z", "title": "", "status": "pending", "priority": "medium"},
            {"id": "a", "title": "", "status": "pending", "priority": "medium"},
            {"id": "hot", "title": "", "status": "pending", "priority": "high"},
            {"id": "dep", "title": "", "status": "pending", "priority": "high",
             "dependencies": ["done1"]},
            {"id": "done1", "title": "", "status": "done"},
            {"id": "stuck", "title": "", "status": "pending", "dependencies": ["z"]}
        ]}"#,
    );
    let ready = mgr.next_ready(dir.path()).unwrap();
    let ids: Vec<&str> = ready.iter().map(|t| t.id.as_str()).collect();
    // hot (high, 0 deps) < dep (high, 1 dep) < a < z; stuck is blocked
    assert_eq!(ids, vec!["hot", "dep", "a", "z"]);
}

#[test]
fn failed_dependency_blocks_frontier() {
    let (mgr, dir) = manager();
    write_manifest(
        dir.path(),
        r#"{"tasks": [
            {"id": "broken", "title": "", "status": "failed"},
            {"id": "next", "title": "", "status": "pending", "dependencies": ["broken"]}
        ]}"#,
    );
    let ready = mgr.next_ready(dir.path()).unwrap();
    assert!(ready.is_empty());
}

#[test]
fn set_status_enforces_dependency_precondition() {
    let (mgr, dir) = manager();
    write_manifest(
        dir.path(),
        r#"{"tasks": [
            {"id": "a", "title": "", "status": "pending"},
            {"id": "b", "title": "", "status": "pending", "dependencies": ["a"]}
        ]}"#,
    );
    let err = mgr.set_status(dir.path(), "b", TaskStatus::InProgress, None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::PreconditionFailed);

    mgr.set_status(dir.path(), "a", TaskStatus::Done, None).unwrap();
    mgr.set_status(dir.path(), "b", TaskStatus::InProgress, None).unwrap();
    let manifest = mgr.load(dir.path()).unwrap();
    assert_eq!(manifest.task("b").unwrap().status, TaskStatus::InProgress);
    assert!(manifest.last_modified_ms.is_some());
}

#[test]
fn set_status_requires_pending_source_for_start() {
    let (mgr, dir) = manager();
    write_manifest(
        dir.path(),
        r#"{"tasks": [{"id": "a", "title": "", "status": "failed"}]}"#,
    );
    let err = mgr.set_status(dir.path(), "a", TaskStatus::InProgress, None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::PreconditionFailed);

    // Reset to pending first, then start
    mgr.set_status(dir.path(), "a", TaskStatus::Pending, None).unwrap();
    mgr.set_status(dir.path(), "a", TaskStatus::InProgress, None).unwrap();
}

#[test]
fn set_status_is_atomic_across_mixed_targets() {
    let (mgr, dir) = manager();
    write_manifest(
        dir.path(),
        r#"{"tasks": [
            {"id": "a", "title": "", "status": "pending",
             "subtasks": [{"id": "1", "title": "", "status": "pending"}]},
            {"id": "b", "title": "", "status": "pending"}
        ]}"#,
    );

    // One bad id fails the whole update; nothing is written
    let err = mgr.set_status(dir.path(), "a, ghost", TaskStatus::Done, None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    let manifest = mgr.load(dir.path()).unwrap();
    assert_eq!(manifest.task("a").unwrap().status, TaskStatus::Pending);
    assert!(manifest.last_modified_ms.is_none());

    // Mixed task and subtask targets land together
    let updated = mgr.set_status(dir.path(), "a.1, b", TaskStatus::Done, None).unwrap();
    assert_eq!(updated.len(), 2);
    let manifest = mgr.load(dir.path()).unwrap();
    assert_eq!(manifest.task("a").unwrap().subtask("1").unwrap().status, TaskStatus::Done);
    assert_eq!(manifest.task("b").unwrap().status, TaskStatus::Done);
}

#[test]
fn error_text_only_valid_with_failed() {
    let (mgr, dir) = manager();
    write_manifest(dir.path(), r#"{"tasks": [{"id": "a", "title": "", "status": "pending"}]}"#);

    let err = mgr
        .set_status(dir.path(), "a", TaskStatus::Done, Some("boom".into()))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);

    mgr.set_status(dir.path(), "a", TaskStatus::Failed, Some("boom".into())).unwrap();
    let manifest = mgr.load(dir.path()).unwrap();
    assert_eq!(manifest.task("a").unwrap().error.as_deref(), Some("boom"));
}

#[test]
fn get_task_annotates_dependencies() {
    let (mgr, dir) = manager();
    write_manifest(
        dir.path(),
        r#"{"tasks": [
            {"id": "a", "title": "", "status": "failed"},
            {"id": "b", "title": "", "status": "pending", "dependencies": ["a", "ghost"]}
        ]}"#,
    );
    let detail = mgr.get_task(dir.path(), "b").unwrap();
    assert!(detail.blocked);
    assert_eq!(detail.dependency_status.len(), 2);
    assert_eq!(detail.dependency_status[0].status, Some(TaskStatus::Failed));
    assert_eq!(detail.dependency_status[1].status, None);

    let err = mgr.get_task(dir.path(), "ghost").unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[test]
fn list_tasks_groups_into_buckets() {
    let (mgr, dir) = manager();
    write_manifest(
        dir.path(),
        r#"{"tasks": [
            {"id": "run", "title": "", "status": "in-progress"},
            {"id": "go", "title": "", "status": "pending"},
            {"id": "wait", "title": "", "status": "pending", "dependencies": ["run"]},
            {"id": "ok", "title": "", "status": "done"},
            {"id": "bad", "title": "", "status": "failed"}
        ]}"#,
    );
    let buckets = mgr.list_tasks(dir.path(), None).unwrap();
    assert_eq!(buckets.in_progress.len(), 1);
    assert_eq!(buckets.ready.len(), 1);
    assert_eq!(buckets.blocked.len(), 1);
    assert_eq!(buckets.done.len(), 1);
    assert_eq!(buckets.failed.len(), 1);

    let only_pending = mgr.list_tasks(dir.path(), Some(TaskStatus::Pending)).unwrap();
    assert_eq!(only_pending.ready.len() + only_pending.blocked.len(), 2);
    assert!(only_pending.done.is_empty());
}

#[test]
fn frontier_of_independent_tasks_returns_all() {
    let (mgr, dir) = manager();
    write_manifest(dir.path(), THREE_INDEPENDENT);
    let ready = mgr.next_ready(dir.path()).unwrap();
    assert_eq!(ready.len(), 3);
    assert_eq!(ready[0].id, "b"); // high priority first
}

#[test]
fn init_project_writes_guidance_and_manifest() {
    let (mgr, dir) = manager();
    let path = mgr.init_project(dir.path(), false).unwrap();
    assert!(path.exists());
    assert!(dir.path().join("tasks.json").exists());

    // Second run without force conflicts
    let err = mgr.init_project(dir.path(), false).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    mgr.init_project(dir.path(), true).unwrap();
}

#[test]
fn link_task_records_job_and_diff() {
    let (mgr, dir) = manager();
    write_manifest(dir.path(), r#"{"tasks": [{"id": "a", "title": "", "status": "pending"}]}"#);
    mgr.link_task(dir.path(), "a", Some("job-1"), Some("diff-1"));
    let manifest = mgr.load(dir.path()).unwrap();
    let task = manifest.task("a").unwrap();
    assert_eq!(task.job_id.as_deref(), Some("job-1"));
    assert_eq!(task.diff_id.as_deref(), Some("diff-1"));

    // Unknown ids and missing manifests are silently ignored
    mgr.link_task(dir.path(), "ghost", Some("job-2"), None);
    let other = tempfile::tempdir().unwrap();
    mgr.link_task(other.path(), "a", Some("job-2"), None);
}
