// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    pending = { "pending", TaskStatus::Pending },
    in_progress = { "in-progress", TaskStatus::InProgress },
    done = { "done", TaskStatus::Done },
    failed = { "failed", TaskStatus::Failed },
)]
fn status_round_trips(s: &str, expected: TaskStatus) {
    assert_eq!(TaskStatus::parse(s), Some(expected));
    assert_eq!(expected.as_str(), s);
}

#[test]
fn status_rejects_unknown() {
    assert_eq!(TaskStatus::parse("in_progress"), None);
    assert_eq!(TaskStatus::parse(""), None);
}

#[test]
fn priority_rank_orders_high_first() {
    assert!(TaskPriority::High.rank() < TaskPriority::Medium.rank());
    assert!(TaskPriority::Medium.rank() < TaskPriority::Low.rank());
}

#[test]
fn manifest_serde_uses_wire_field_names() {
    let json = r#"{
        "tasks": [{
            "id": "a",
            "title": "Build",
            "status": "pending",
            "priority": "high",
            "dependencies": [],
            "testStrategy": "cargo test"
        }]
    }"#;
    let manifest: TaskManifest = serde_json::from_str(json).unwrap();
    assert_eq!(manifest.tasks.len(), 1);
    assert_eq!(manifest.tasks[0].test_strategy, "cargo test");
    assert_eq!(manifest.tasks[0].priority, TaskPriority::High);

    let out = serde_json::to_value(&manifest).unwrap();
    assert_eq!(out["tasks"][0]["testStrategy"], "cargo test");
    // Absent optionals stay off the wire
    assert!(out["tasks"][0].get("jobId").is_none());
}

#[test]
fn deps_satisfied_requires_done() {
    let manifest: TaskManifest = serde_json::from_str(
        r#"{"tasks": [
            {"id": "a", "title": "", "status": "done"},
            {"id": "b", "title": "", "status": "failed"},
            {"id": "c", "title": "", "status": "pending", "dependencies": ["a"]},
            {"id": "d", "title": "", "status": "pending", "dependencies": ["a", "b"]},
            {"id": "e", "title": "", "status": "pending", "dependencies": ["missing"]}
        ]}"#,
    )
    .unwrap();
    let c = manifest.task("c").unwrap();
    let d = manifest.task("d").unwrap();
    let e = manifest.task("e").unwrap();
    assert!(manifest.deps_satisfied(c));
    assert!(!manifest.deps_satisfied(d));
    assert!(!manifest.deps_satisfied(e));
}

#[test]
fn subtask_lookup() {
    let mut task: Task = serde_json::from_str(
        r#"{"id": "a", "title": "", "status": "pending",
            "subtasks": [{"id": "1", "title": "s", "status": "pending"}]}"#,
    )
    .unwrap();
    assert!(task.subtask("1").is_some());
    assert!(task.subtask("2").is_none());
    task.subtask_mut("1").unwrap().status = TaskStatus::Done;
    assert_eq!(task.subtask("1").unwrap().status, TaskStatus::Done);
}
