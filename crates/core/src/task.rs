// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task manifest entities.
//!
//! The manifest file `<workspace>/tasks.json` is the system of record for
//! the task graph. The engine reads and rewrites it whole; nothing here is
//! cached across requests.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task or subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in-progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Ordering: high before medium before low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl TaskPriority {
    /// Sort rank, lower first.
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::High => 0,
            TaskPriority::Medium => 1,
            TaskPriority::Low => 2,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(TaskPriority::High),
            "medium" => Some(TaskPriority::Medium),
            "low" => Some(TaskPriority::Low),
            _ => None,
        }
    }
}

/// A nested unit of work within a task. Same shape as [`Task`] minus
/// further nesting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A unit of developer work in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque identifier, stable across runs, unique within the manifest.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Detailed implementation instructions handed to the agent.
    #[serde(default)]
    pub details: String,
    /// How the result should be verified.
    #[serde(default, rename = "testStrategy")]
    pub test_strategy: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Prerequisite task ids. Must resolve within the manifest, acyclic.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtasks: Option<Vec<Subtask>>,
    /// Background job currently linked to this task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "jobId")]
    pub job_id: Option<String>,
    /// Patch produced for this task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "diffId")]
    pub diff_id: Option<String>,
}

impl Task {
    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.as_ref().and_then(|s| s.iter().find(|st| st.id == id))
    }

    pub fn subtask_mut(&mut self, id: &str) -> Option<&mut Subtask> {
        self.subtasks.as_mut().and_then(|s| s.iter_mut().find(|st| st.id == id))
    }
}

/// The on-disk manifest: `<workspace>/tasks.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskManifest {
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Epoch milliseconds of the last engine write.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "lastModifiedMs")]
    pub last_modified_ms: Option<i64>,
}

impl TaskManifest {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// True when every dependency of `task` is `done`.
    pub fn deps_satisfied(&self, task: &Task) -> bool {
        task.dependencies
            .iter()
            .all(|dep| self.task(dep).map(|t| t.status == TaskStatus::Done).unwrap_or(false))
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
