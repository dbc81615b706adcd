// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background job records.

use crate::id::{BoxId, JobId, SessionId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Progress note written onto jobs that were cut short by an engine restart.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Running,
    NeedsInput,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Running => "running",
            JobStatus::NeedsInput => "needs_input",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(JobStatus::Started),
            "running" => Some(JobStatus::Running),
            "needs_input" => Some(JobStatus::NeedsInput),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of the agent output a synchronous run returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMode {
    #[default]
    Summary,
    Full,
}

/// One agent invocation across its whole lifecycle, persisted from
/// registration to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundJob {
    pub id: JobId,
    /// Original client prompt.
    pub prompt: String,
    pub work_folder: PathBuf,
    /// Manifest task this job was launched for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub status: JobStatus,
    pub started_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<i64>,
    /// Sandbox the job ran in, once acquired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<BoxId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Latest human-readable progress string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Question the agent is waiting on while `needs_input`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<String>,
    #[serde(default)]
    pub return_mode: ReturnMode,
}

impl BackgroundJob {
    pub fn new(prompt: impl Into<String>, work_folder: PathBuf, started_at_ms: i64) -> Self {
        Self {
            id: JobId::new(),
            prompt: prompt.into(),
            work_folder,
            task_id: None,
            status: JobStatus::Started,
            started_at_ms,
            ended_at_ms: None,
            container_id: None,
            result: None,
            error: None,
            progress: None,
            session_id: None,
            pending_question: None,
            return_mode: ReturnMode::default(),
        }
    }
}
