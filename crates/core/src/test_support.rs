// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders and fixtures for other crates' tests.

use crate::id::{BoxId, DiffId};
use crate::job::{BackgroundJob, JobStatus};
use crate::patch::{DiffStats, FileChange, FileChangeKind, Patch, PatchStatus};
use crate::task::{Task, TaskManifest, TaskPriority, TaskStatus};
use std::path::PathBuf;

/// Start building a [`Patch`]. Defaults: empty diff, pending, no linkage.
pub fn patch() -> PatchBuilder {
    PatchBuilder::default()
}

#[derive(Default)]
pub struct PatchBuilder {
    container_id: Option<BoxId>,
    files: Vec<FileChange>,
    diff: String,
    workspace: Option<PathBuf>,
    status: Option<PatchStatus>,
    parent: Option<DiffId>,
}

impl PatchBuilder {
    pub fn container(mut self, id: impl Into<String>) -> Self {
        self.container_id = Some(BoxId::from_string(id.into()));
        self
    }

    pub fn file(mut self, path: &str, kind: FileChangeKind, additions: u32, deletions: u32) -> Self {
        self.files.push(FileChange {
            path: path.to_string(),
            kind,
            additions,
            deletions,
            previous_path: None,
        });
        self
    }

    pub fn diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = diff.into();
        self
    }

    pub fn workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace = Some(path.into());
        self
    }

    pub fn status(mut self, status: PatchStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn parent(mut self, id: impl Into<String>) -> Self {
        self.parent = Some(DiffId::from_string(id.into()));
        self
    }

    pub fn build(self) -> Patch {
        let stats = DiffStats {
            files_changed: self.files.len() as u32,
            additions: self.files.iter().map(|f| f.additions).sum(),
            deletions: self.files.iter().map(|f| f.deletions).sum(),
        };
        let is_revision = self.parent.is_some();
        Patch {
            id: DiffId::new(),
            container_id: self.container_id.unwrap_or_else(BoxId::new),
            diff: self.diff,
            summary: String::new(),
            files: self.files,
            stats,
            created_at_ms: 0,
            binary_paths: Vec::new(),
            workspace: self.workspace.unwrap_or_else(|| PathBuf::from("/tmp/w")),
            session_id: None,
            task_id: None,
            status: self.status.unwrap_or(PatchStatus::Pending),
            applied_to: None,
            is_revision,
            revision_number: if is_revision { 1 } else { 0 },
            parent_diff_id: self.parent,
            revisions: Vec::new(),
        }
    }
}

/// A minimal manifest task.
pub fn task(id: &str, status: TaskStatus, deps: &[&str]) -> Task {
    Task {
        id: id.to_string(),
        title: format!("task {id}"),
        description: String::new(),
        details: String::new(),
        test_strategy: String::new(),
        status,
        priority: TaskPriority::Medium,
        dependencies: deps.iter().map(|s| s.to_string()).collect(),
        error: None,
        subtasks: None,
        job_id: None,
        diff_id: None,
    }
}

/// A manifest from `(id, status, deps)` triples.
pub fn manifest(tasks: &[(&str, TaskStatus, &[&str])]) -> TaskManifest {
    TaskManifest {
        tasks: tasks.iter().map(|(id, status, deps)| task(id, *status, deps)).collect(),
        last_modified_ms: None,
    }
}

/// A job in the given status, with sensible defaults elsewhere.
pub fn job(status: JobStatus) -> BackgroundJob {
    let mut job = BackgroundJob::new("do the thing", PathBuf::from("/tmp/w"), 0);
    job.status = status;
    job
}
