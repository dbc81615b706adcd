// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Captured change sets.

use crate::id::{BoxId, DiffId, SessionId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-file change classification, from `git diff --name-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl FileChangeKind {
    /// Map a `--name-status` status letter. Copies are reported as adds.
    pub fn from_status_letter(letter: char) -> Option<Self> {
        match letter {
            'A' | 'C' => Some(FileChangeKind::Added),
            'M' | 'T' => Some(FileChangeKind::Modified),
            'D' => Some(FileChangeKind::Deleted),
            'R' => Some(FileChangeKind::Renamed),
            _ => None,
        }
    }
}

/// One changed file within a patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub kind: FileChangeKind,
    pub additions: u32,
    pub deletions: u32,
    /// Prior path for renames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
}

/// Aggregate statistics, from `git diff --shortstat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub files_changed: u32,
    pub additions: u32,
    pub deletions: u32,
}

/// One revision-history entry on a parent patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionEntry {
    pub at_ms: i64,
    pub feedback: String,
    /// Patch produced by this revision.
    pub successor: DiffId,
    /// 1-based revision ordinal.
    pub revision: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Pending,
    Applied,
    Rejected,
}

impl PatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchStatus::Pending => "pending",
            PatchStatus::Applied => "applied",
            PatchStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PatchStatus::Pending),
            "applied" => Some(PatchStatus::Applied),
            "rejected" => Some(PatchStatus::Rejected),
            _ => None,
        }
    }
}

/// A captured change set over a sandbox's `/workspace`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub id: DiffId,
    pub container_id: BoxId,
    /// Unified diff text.
    pub diff: String,
    /// Human-readable summary (`git diff --stat` output).
    pub summary: String,
    pub files: Vec<FileChange>,
    pub stats: DiffStats,
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binary_paths: Vec<String>,
    /// Host workspace the sandbox was seeded from.
    pub workspace: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub status: PatchStatus,
    /// Workspace the patch was applied to, once applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_to: Option<PathBuf>,
    #[serde(default)]
    pub is_revision: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_diff_id: Option<DiffId>,
    /// 0 for an original patch, 1-based for revisions.
    #[serde(default)]
    pub revision_number: u32,
    /// Revisions spawned off this patch, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revisions: Vec<RevisionEntry>,
}

impl Patch {
    pub fn has_changes(&self) -> bool {
        !self.files.is_empty()
    }
}

/// Options honored by patch extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    /// Include binary hunks and enumerate binary paths.
    pub include_binary: bool,
    /// Unified context line count; git's default when absent.
    pub context_lines: Option<u32>,
    pub ignore_whitespace: bool,
}

#[cfg(test)]
#[path = "patch_tests.rs"]
mod tests;
