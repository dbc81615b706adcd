// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed argument schemas, one struct per tool.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWorkerArgs {
    /// The prompt.
    pub task: String,
    pub work_folder: PathBuf,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_description: Option<String>,
    /// "summary" (default) or "full".
    #[serde(default)]
    pub return_mode: Option<String>,
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkStatusArgs {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub work_folder: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerArgs {
    pub task_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReviewChangesArgs {
    #[serde(default)]
    pub diff_id: Option<String>,
    #[serde(default)]
    pub show_content: bool,
    /// "text" (default) or "json".
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyChangesArgs {
    pub diff_id: String,
    pub target_workspace: PathBuf,
    #[serde(default)]
    pub backup: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectChangesArgs {
    pub diff_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRevisionArgs {
    pub diff_id: String,
    pub feedback: String,
    #[serde(default)]
    pub preserve_correct_parts: bool,
    #[serde(default)]
    pub additional_context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewLogsArgs {
    pub identifier: String,
    #[serde(default)]
    pub tail: Option<usize>,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListLogsArgs {
    #[serde(default)]
    pub limit: Option<usize>,
    /// "modified" (default) or "size".
    #[serde(default)]
    pub sort_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTasksArgs {
    pub work_folder: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTaskStatusArgs {
    /// Comma-separated task and `task.subtask` ids.
    pub ids: String,
    pub status: String,
    pub work_folder: PathBuf,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTaskArgs {
    pub work_folder: PathBuf,
    pub task_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTasksArgs {
    pub work_folder: PathBuf,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetNextTasksArgs {
    pub work_folder: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitProjectArgs {
    pub work_folder: PathBuf,
    #[serde(default)]
    pub force: bool,
}
