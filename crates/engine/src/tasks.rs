// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The task graph manager.
//!
//! Reads, validates, and mutates `<workspace>/tasks.json` and computes the
//! ready frontier. The manifest is the system of record; every operation
//! loads it fresh and writes it back whole (temp file + rename, so a bulk
//! status update lands atomically or not at all).

use qm_core::{Clock, EngineError, Task, TaskManifest, TaskPriority, TaskStatus};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const MANIFEST_FILE: &str = "tasks.json";
const GUIDANCE_FILE: &str = "QUARTERMASTER.md";
/// More in-progress tasks than this draws a validation warning.
const IN_PROGRESS_WARN_THRESHOLD: usize = 3;

const GUIDANCE_TEXT: &str = r#"# Task workflow

This workspace is orchestrated through `tasks.json`.

- Each task carries: `id`, `title`, `description`, `details`,
  `testStrategy`, `status` (pending | in-progress | done | failed),
  `priority` (high | medium | low), and `dependencies` (ids of tasks that
  must be done first).
- Ask for the next runnable tasks with `get_next_tasks`; every returned
  task can be started in parallel with `task_worker`.
- Report progress with `set_task_status`. A task can only move to
  in-progress once all of its dependencies are done.
- Review captured changes with `review_changes`, then `apply_changes` or
  `reject_changes`. Use `request_revision` to iterate on a patch.
"#;

#[derive(Debug, Error)]
pub enum TasksError {
    #[error("no {MANIFEST_FILE} in {0}")]
    Missing(PathBuf),

    #[error("{MANIFEST_FILE} is not valid JSON: {0}")]
    Malformed(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TasksError> for EngineError {
    fn from(e: TasksError) -> Self {
        match e {
            TasksError::Missing(_) => EngineError::not_found(e.to_string()),
            TasksError::Malformed(_) => EngineError::invalid_params(e.to_string()),
            TasksError::Io(_) => EngineError::internal(e.to_string()),
        }
    }
}

/// Outcome of `validate_tasks`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: ValidationStats,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
    pub subtasks: usize,
}

/// One task with its dependency states, for `get_task`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub dependency_status: Vec<DependencyStatus>,
    pub blocked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub id: String,
    /// None when the dependency id does not resolve.
    pub status: Option<TaskStatus>,
}

/// Tasks grouped by scheduling bucket, for `get_tasks`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TaskBuckets {
    pub in_progress: Vec<Task>,
    pub ready: Vec<Task>,
    pub blocked: Vec<Task>,
    pub done: Vec<Task>,
    pub failed: Vec<Task>,
}

pub struct TaskGraphManager {
    clock: Arc<dyn Clock>,
}

impl TaskGraphManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn manifest_path(workspace: &Path) -> PathBuf {
        workspace.join(MANIFEST_FILE)
    }

    /// Load the manifest. Never cached.
    pub fn load(&self, workspace: &Path) -> Result<TaskManifest, TasksError> {
        let path = Self::manifest_path(workspace);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TasksError::Missing(workspace.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| TasksError::Malformed(e.to_string()))
    }

    /// Write the manifest atomically with a refreshed last-modified stamp.
    fn save(&self, workspace: &Path, manifest: &mut TaskManifest) -> Result<(), TasksError> {
        manifest.last_modified_ms = Some(self.clock.now_ms());
        let path = Self::manifest_path(workspace);
        let tmp = workspace.join(format!("{MANIFEST_FILE}.tmp"));
        let content = serde_json::to_string_pretty(manifest)
            .map_err(|e| TasksError::Malformed(e.to_string()))?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Structural and graph validation with errors, warnings, and counts.
    pub fn validate(&self, workspace: &Path) -> ValidationReport {
        let mut report = ValidationReport::default();

        let path = Self::manifest_path(workspace);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                report.errors.push(format!("cannot read {MANIFEST_FILE}: {e}"));
                return report;
            }
        };
        let value: serde_json::Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                report.errors.push(format!("invalid JSON: {e}"));
                return report;
            }
        };

        let Some(tasks) = value.get("tasks").and_then(|t| t.as_array()) else {
            report.errors.push("missing or non-array \"tasks\" field".to_string());
            return report;
        };

        let mut ids = Vec::new();
        for (index, task) in tasks.iter().enumerate() {
            validate_task_object(task, index, false, &mut report);
            if let Some(id) = task.get("id").and_then(|v| v.as_str()) {
                if ids.contains(&id.to_string()) {
                    report.errors.push(format!("duplicate task id: {id}"));
                }
                ids.push(id.to_string());
            }
        }

        // Dangling dependencies and cycles only make sense on well-formed rows
        for task in tasks {
            let Some(id) = task.get("id").and_then(|v| v.as_str()) else { continue };
            if let Some(deps) = task.get("dependencies").and_then(|d| d.as_array()) {
                for dep in deps {
                    if let Some(dep) = dep.as_str() {
                        if !ids.iter().any(|i| i == dep) {
                            report
                                .errors
                                .push(format!("task {id} depends on unknown task {dep}"));
                        }
                    }
                }
            }
        }

        if let Some(cycle) = find_cycle(tasks) {
            report.errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
        }

        for task in tasks {
            match task.get("status").and_then(|v| v.as_str()).and_then(TaskStatus::parse) {
                Some(TaskStatus::Pending) => report.stats.pending += 1,
                Some(TaskStatus::InProgress) => report.stats.in_progress += 1,
                Some(TaskStatus::Done) => report.stats.done += 1,
                Some(TaskStatus::Failed) => report.stats.failed += 1,
                None => {}
            }
            if let Some(subtasks) = task.get("subtasks").and_then(|s| s.as_array()) {
                report.stats.subtasks += subtasks.len();
            }
        }
        report.stats.total = tasks.len();

        if report.stats.in_progress > IN_PROGRESS_WARN_THRESHOLD {
            report.warnings.push(format!(
                "{} tasks in-progress; consider limiting concurrent work",
                report.stats.in_progress
            ));
        }

        report.valid = report.errors.is_empty();
        report
    }

    /// Bulk status update over comma-separated task and `task.subtask`
    /// ids. Validates every target first; the file write is all-or-nothing.
    pub fn set_status(
        &self,
        workspace: &Path,
        ids: &str,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<Vec<String>, EngineError> {
        if error.is_some() && status != TaskStatus::Failed {
            return Err(EngineError::invalid_params(
                "error text is only valid with status failed",
            ));
        }

        let mut manifest = self.load(workspace)?;
        let targets: Vec<&str> =
            ids.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        if targets.is_empty() {
            return Err(EngineError::invalid_params("no task ids supplied"));
        }

        // Pass 1: every target must exist and be allowed to transition
        for target in &targets {
            let (task_id, subtask_id) = split_target(target);
            let task = manifest
                .task(task_id)
                .ok_or_else(|| EngineError::not_found(format!("no such task: {task_id}")))?;
            let current = match subtask_id {
                Some(sub) => {
                    task.subtask(sub)
                        .ok_or_else(|| {
                            EngineError::not_found(format!("no such subtask: {target}"))
                        })?
                        .status
                }
                None => task.status,
            };
            if status == TaskStatus::InProgress {
                if current != TaskStatus::Pending {
                    return Err(EngineError::precondition_failed(format!(
                        "{target} is {current}, only pending tasks can start"
                    )));
                }
                if subtask_id.is_none() && !manifest.deps_satisfied(task) {
                    return Err(EngineError::precondition_failed(format!(
                        "{target} has unmet dependencies"
                    )));
                }
            }
        }

        // Pass 2: apply and write once
        for target in &targets {
            let (task_id, subtask_id) = split_target(target);
            if let Some(task) = manifest.task_mut(task_id) {
                match subtask_id {
                    Some(sub) => {
                        if let Some(subtask) = task.subtask_mut(sub) {
                            subtask.status = status;
                            subtask.error =
                                if status == TaskStatus::Failed { error.clone() } else { None };
                        }
                    }
                    None => {
                        task.status = status;
                        task.error =
                            if status == TaskStatus::Failed { error.clone() } else { None };
                    }
                }
            }
        }
        self.save(workspace, &mut manifest).map_err(EngineError::from)?;
        Ok(targets.iter().map(|t| t.to_string()).collect())
    }

    /// The ready frontier: pending tasks whose dependencies are all done,
    /// sorted by priority, then dependency count, then id. Clients launch
    /// one worker per returned task.
    pub fn next_ready(&self, workspace: &Path) -> Result<Vec<Task>, TasksError> {
        let manifest = self.load(workspace)?;
        let mut ready: Vec<Task> = manifest
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && manifest.deps_satisfied(t))
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then(a.dependencies.len().cmp(&b.dependencies.len()))
                .then(a.id.cmp(&b.id))
        });
        Ok(ready)
    }

    /// One task with dependency annotations and a blocked flag.
    pub fn get_task(&self, workspace: &Path, id: &str) -> Result<TaskDetail, EngineError> {
        let manifest = self.load(workspace)?;
        let task = manifest
            .task(id)
            .ok_or_else(|| EngineError::not_found(format!("no such task: {id}")))?;
        let dependency_status: Vec<DependencyStatus> = task
            .dependencies
            .iter()
            .map(|dep| DependencyStatus {
                id: dep.clone(),
                status: manifest.task(dep).map(|t| t.status),
            })
            .collect();
        let blocked = task.status == TaskStatus::Pending && !manifest.deps_satisfied(task);
        Ok(TaskDetail { task: task.clone(), dependency_status, blocked })
    }

    /// All tasks grouped by scheduling bucket, optionally filtered to one
    /// status.
    pub fn list_tasks(
        &self,
        workspace: &Path,
        status_filter: Option<TaskStatus>,
    ) -> Result<TaskBuckets, TasksError> {
        let manifest = self.load(workspace)?;
        let mut buckets = TaskBuckets::default();
        for task in &manifest.tasks {
            if let Some(filter) = status_filter {
                if task.status != filter {
                    continue;
                }
            }
            match task.status {
                TaskStatus::InProgress => buckets.in_progress.push(task.clone()),
                TaskStatus::Done => buckets.done.push(task.clone()),
                TaskStatus::Failed => buckets.failed.push(task.clone()),
                TaskStatus::Pending => {
                    if manifest.deps_satisfied(task) {
                        buckets.ready.push(task.clone());
                    } else {
                        buckets.blocked.push(task.clone());
                    }
                }
            }
        }
        Ok(buckets)
    }

    /// Record a job/patch linkage on a task, when the manifest has it.
    /// Missing manifests and unknown ids are fine; ad-hoc runs have no
    /// manifest row.
    pub fn link_task(
        &self,
        workspace: &Path,
        id: &str,
        job_id: Option<&str>,
        diff_id: Option<&str>,
    ) {
        let Ok(mut manifest) = self.load(workspace) else { return };
        let Some(task) = manifest.task_mut(id) else { return };
        if let Some(job) = job_id {
            task.job_id = Some(job.to_string());
        }
        if let Some(diff) = diff_id {
            task.diff_id = Some(diff.to_string());
        }
        if let Err(e) = self.save(workspace, &mut manifest) {
            tracing::warn!(task = id, error = %e, "failed to record task linkage");
        }
    }

    /// Write the guidance file and seed an empty manifest.
    pub fn init_project(&self, workspace: &Path, force: bool) -> Result<PathBuf, EngineError> {
        let guidance = workspace.join(GUIDANCE_FILE);
        if guidance.exists() && !force {
            return Err(EngineError::conflict(format!(
                "{} already exists; pass force to overwrite",
                guidance.display()
            )));
        }
        std::fs::write(&guidance, GUIDANCE_TEXT).map_err(EngineError::from)?;

        let manifest_path = Self::manifest_path(workspace);
        if !manifest_path.exists() {
            let mut manifest = TaskManifest::default();
            self.save(workspace, &mut manifest).map_err(EngineError::from)?;
        }
        Ok(guidance)
    }
}

/// Split `task.subtask` into its parts.
fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('.') {
        Some((task, sub)) => (task, Some(sub)),
        None => (target, None),
    }
}

fn validate_task_object(
    task: &serde_json::Value,
    index: usize,
    is_subtask: bool,
    report: &mut ValidationReport,
) {
    let kind = if is_subtask { "subtask" } else { "task" };
    let label = task
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{kind} #{index}"));

    if task.get("id").and_then(|v| v.as_str()).map(str::is_empty).unwrap_or(true) {
        report.errors.push(format!("{label}: missing or empty id"));
    }
    if task.get("title").and_then(|v| v.as_str()).is_none() {
        report.errors.push(format!("{label}: missing title"));
    }
    match task.get("status").and_then(|v| v.as_str()) {
        Some(status) if TaskStatus::parse(status).is_some() => {}
        Some(status) => report.errors.push(format!("{label}: unknown status {status:?}")),
        None => report.errors.push(format!("{label}: missing status")),
    }
    if let Some(priority) = task.get("priority").and_then(|v| v.as_str()) {
        if TaskPriority::parse(priority).is_none() {
            report.errors.push(format!("{label}: unknown priority {priority:?}"));
        }
    }
    if let Some(deps) = task.get("dependencies") {
        if !deps.is_array() {
            report.errors.push(format!("{label}: dependencies must be an array"));
        }
    }
    if !is_subtask {
        if let Some(subtasks) = task.get("subtasks").and_then(|s| s.as_array()) {
            let mut seen = Vec::new();
            for (sub_index, subtask) in subtasks.iter().enumerate() {
                validate_task_object(subtask, sub_index, true, report);
                if let Some(id) = subtask.get("id").and_then(|v| v.as_str()) {
                    if seen.contains(&id) {
                        report.errors.push(format!("{label}: duplicate subtask id {id}"));
                    }
                    seen.push(id);
                }
            }
        }
    }
}

/// Depth-first cycle detection over the dependency relation. Returns the
/// offending cycle as a path of ids.
fn find_cycle(tasks: &[serde_json::Value]) -> Option<Vec<String>> {
    use std::collections::HashMap;

    let deps: HashMap<&str, Vec<&str>> = tasks
        .iter()
        .filter_map(|t| {
            let id = t.get("id")?.as_str()?;
            let deps = t
                .get("dependencies")
                .and_then(|d| d.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            Some((id, deps))
        })
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        deps: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| n == &node).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        stack.push(node);
        if let Some(children) = deps.get(node) {
            for child in children {
                if deps.contains_key(child) {
                    if let Some(cycle) = visit(child, deps, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    let mut ids: Vec<&str> = deps.keys().copied().collect();
    ids.sort_unstable();
    for id in ids {
        if let Some(cycle) = visit(id, &deps, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
