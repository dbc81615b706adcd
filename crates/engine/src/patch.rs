// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-container patch extraction and host-side application.
//!
//! All version-control commands run inside the sandbox through the
//! container daemon, rooted at `/workspace`. A baseline commit tagged at
//! seed time gives later diffs a stable reference; extraction stages the
//! whole tree and diffs the index against that tag. Application happens on
//! the host against a target workspace.

use crate::daemon::{ContainerDaemon, DaemonError, ExecOptions, ExecOutput};
use crate::pool::Sandbox;
use qm_core::{
    Clock, DiffId, DiffOptions, DiffStats, FileChange, FileChangeKind, Patch, PatchStatus,
};
use qm_storage::{Store, StoreError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const GIT_EMAIL: &str = "quartermaster@localhost";
const GIT_NAME: &str = "Quartermaster";
/// Tag marking the seeded state. Created exactly once per sandbox.
const BASELINE_TAG: &str = "quartermaster-baseline";
/// git's well-known empty tree, used when no baseline exists so the diff
/// reads as "all staged files added".
const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Extensions enumerated as binary when the include-binary option is set.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "pdf", "zip", "tar", "gz", "bz2", "xz", "7z", "jar",
    "class", "so", "dylib", "dll", "exe", "bin", "woff", "woff2", "ttf", "eot", "mp3", "mp4",
    "webm", "sqlite", "db",
];

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("git: {0}")]
    Git(String),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of applying a patch to a host workspace.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub success: bool,
    pub stderr: String,
}

pub struct PatchEngine {
    daemon: Arc<dyn ContainerDaemon>,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl PatchEngine {
    pub fn new(daemon: Arc<dyn ContainerDaemon>, store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { daemon, store, clock }
    }

    async fn git(&self, sandbox: &str, args: &[&str]) -> Result<ExecOutput, PatchError> {
        let mut cmd = vec!["git"];
        cmd.extend_from_slice(args);
        Ok(self.daemon.exec(sandbox, &cmd, &ExecOptions::workspace_user()).await?)
    }

    async fn git_ok(&self, sandbox: &str, args: &[&str]) -> Result<ExecOutput, PatchError> {
        let out = self.git(sandbox, args).await?;
        if out.success() {
            Ok(out)
        } else {
            Err(PatchError::Git(format!("git {} failed: {}", args.first().unwrap_or(&""), out.stderr.trim())))
        }
    }

    /// Initialize version tracking in a freshly seeded sandbox: committer
    /// identity, trusted directory, repository, staged tree, and the
    /// baseline commit (empty-allowed). Safe to call on a workspace that
    /// already has a repository.
    pub async fn init_tracking(&self, sandbox: &Sandbox) -> Result<(), PatchError> {
        let name = sandbox.name.as_str();
        self.git_ok(name, &["config", "--global", "user.email", GIT_EMAIL]).await?;
        self.git_ok(name, &["config", "--global", "user.name", GIT_NAME]).await?;
        self.git_ok(name, &["config", "--global", "--add", "safe.directory", "/workspace"])
            .await?;

        let has_repo = self.git(name, &["rev-parse", "--git-dir"]).await?.success();
        if !has_repo {
            self.git_ok(name, &["init"]).await?;
        }
        self.git_ok(name, &["add", "-A"]).await?;

        // The baseline commit is created exactly once per sandbox.
        let has_baseline =
            self.git(name, &["rev-parse", "--verify", "--quiet", BASELINE_TAG]).await?.success();
        if !has_baseline {
            self.git_ok(name, &["commit", "--allow-empty", "-m", "workspace baseline"]).await?;
            self.git_ok(name, &["tag", BASELINE_TAG]).await?;
        }
        Ok(())
    }

    /// Stage everything and capture the change set against the baseline.
    /// A sandbox with no staged changes yields an empty patch, never an
    /// error.
    pub async fn extract(&self, sandbox: &Sandbox, opts: DiffOptions) -> Result<Patch, PatchError> {
        let name = sandbox.name.as_str();

        // Permission-related refresh failures are expected after chown
        let _ = self.git(name, &["update-index", "--refresh"]).await;
        self.git_ok(name, &["add", "-A"]).await?;

        let has_baseline =
            self.git(name, &["rev-parse", "--verify", "--quiet", BASELINE_TAG]).await?.success();
        let base = if has_baseline { BASELINE_TAG } else { EMPTY_TREE };

        let mut diff_args: Vec<String> =
            vec!["diff".into(), "--cached".into(), "-M".into(), base.into()];
        if opts.include_binary {
            diff_args.insert(1, "--binary".into());
        }
        if let Some(context) = opts.context_lines {
            diff_args.insert(1, format!("-U{context}"));
        }
        if opts.ignore_whitespace {
            diff_args.insert(1, "-w".into());
        }
        let diff_refs: Vec<&str> = diff_args.iter().map(String::as_str).collect();
        let diff = self.git_ok(name, &diff_refs).await?.stdout;

        let name_status = self
            .git_ok(name, &["diff", "--cached", "--name-status", "-M", base])
            .await?
            .stdout;
        let numstat =
            self.git_ok(name, &["diff", "--cached", "--numstat", "-M", base]).await?.stdout;
        let shortstat =
            self.git_ok(name, &["diff", "--cached", "--shortstat", base]).await?.stdout;
        let summary = self.git_ok(name, &["diff", "--cached", "--stat", base]).await?.stdout;

        let counts = parse_numstat(&numstat);
        let files = parse_name_status(&name_status, &counts);
        let stats = parse_shortstat(&shortstat);

        let binary_paths = if opts.include_binary {
            files.iter().map(|f| f.path.clone()).filter(|p| is_binary_path(p)).collect()
        } else {
            Vec::new()
        };

        Ok(Patch {
            id: DiffId::new(),
            container_id: sandbox.id.clone(),
            diff,
            summary: summary.trim_end().to_string(),
            files,
            stats,
            created_at_ms: self.clock.now_ms(),
            binary_paths,
            workspace: sandbox.workspace.clone().unwrap_or_default(),
            session_id: None,
            task_id: sandbox.task_id.clone(),
            status: PatchStatus::Pending,
            applied_to: None,
            is_revision: false,
            parent_diff_id: None,
            revision_number: 0,
            revisions: Vec::new(),
        })
    }

    /// Apply a patch to a host workspace: primary tool first, generic
    /// `patch -p1` as fallback. On success the store row moves to
    /// `applied` with the target path recorded.
    pub async fn apply(
        &self,
        patch: &Patch,
        target: &Path,
        backup: bool,
    ) -> Result<ApplyOutcome, PatchError> {
        if backup {
            self.backup_tree(target).await?;
        }

        let patch_file =
            std::env::temp_dir().join(format!("qm-patch-{}.diff", patch.id.short(8)));
        tokio::fs::write(&patch_file, &patch.diff).await?;

        let outcome = self.apply_from_file(&patch_file, target).await;
        let _ = tokio::fs::remove_file(&patch_file).await;
        let outcome = outcome?;

        if outcome.success {
            self.store.update_patch_status(patch.id.as_str(), PatchStatus::Applied, Some(target))?;
        }
        Ok(outcome)
    }

    async fn apply_from_file(
        &self,
        patch_file: &Path,
        target: &Path,
    ) -> Result<ApplyOutcome, PatchError> {
        let git = tokio::process::Command::new("git")
            .args([
                "-C",
                &target.display().to_string(),
                "apply",
                "--whitespace=nowarn",
                &patch_file.display().to_string(),
            ])
            .stdin(std::process::Stdio::null())
            .output()
            .await?;
        let git_stderr = String::from_utf8_lossy(&git.stderr).into_owned();
        if git.status.success() || stderr_is_warning_only(&git_stderr) {
            return Ok(ApplyOutcome { success: true, stderr: git_stderr });
        }

        // Fallback: generic patch utility at strip-level one, batch mode so
        // it never prompts
        let fallback = tokio::process::Command::new("patch")
            .args([
                "-p1",
                "-t",
                "-d",
                &target.display().to_string(),
                "-i",
                &patch_file.display().to_string(),
            ])
            .stdin(std::process::Stdio::null())
            .output()
            .await?;
        let fallback_stderr = String::from_utf8_lossy(&fallback.stderr).into_owned();
        if fallback.status.success() || stderr_is_warning_only(&fallback_stderr) {
            Ok(ApplyOutcome { success: true, stderr: fallback_stderr })
        } else {
            Ok(ApplyOutcome {
                success: false,
                stderr: format!("{git_stderr}\n{fallback_stderr}").trim().to_string(),
            })
        }
    }

    /// Time-stamped copy of the target tree next to it.
    async fn backup_tree(&self, target: &Path) -> Result<(), PatchError> {
        let backup = format!("{}.backup-{}", target.display(), self.clock.now_ms());
        let out = tokio::process::Command::new("cp")
            .args(["-a", &target.display().to_string(), &backup])
            .output()
            .await?;
        if !out.status.success() {
            return Err(PatchError::Git(format!(
                "backup copy failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }

    /// For tests and status reporting: expose the daemon handle.
    pub fn daemon(&self) -> Arc<dyn ContainerDaemon> {
        Arc::clone(&self.daemon)
    }
}

/// True when every non-empty stderr line is a warning.
fn stderr_is_warning_only(stderr: &str) -> bool {
    let mut lines = stderr.lines().filter(|l| !l.trim().is_empty()).peekable();
    lines.peek().is_some() && stderr.trim_start().starts_with("warning:")
}

fn is_binary_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Parse `--numstat` output into `path → (additions, deletions)`. Binary
/// files report `-` counts, which read as zero.
fn parse_numstat(output: &str) -> HashMap<String, (u32, u32)> {
    let mut counts = HashMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(3, '\t');
        let (Some(adds), Some(dels), Some(raw_path)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let additions = adds.parse().unwrap_or(0);
        let deletions = dels.parse().unwrap_or(0);
        counts.insert(numstat_path(raw_path), (additions, deletions));
    }
    counts
}

/// Normalize a numstat path, resolving rename arrows (`old => new`,
/// `dir/{old => new}/rest`) to the new path.
fn numstat_path(raw: &str) -> String {
    if let (Some(open), Some(close)) = (raw.find('{'), raw.find('}')) {
        if open < close {
            let inner = &raw[open + 1..close];
            if let Some((_, new)) = inner.split_once(" => ") {
                let mut path = format!("{}{}{}", &raw[..open], new, &raw[close + 1..]);
                path = path.replace("//", "/");
                return path;
            }
        }
    }
    if let Some((_, new)) = raw.split_once(" => ") {
        return new.to_string();
    }
    raw.to_string()
}

/// Parse `--name-status` output into file changes, joining in the
/// per-file counts from numstat.
fn parse_name_status(output: &str, counts: &HashMap<String, (u32, u32)>) -> Vec<FileChange> {
    let mut files = Vec::new();
    for line in output.lines() {
        let mut parts = line.split('\t');
        let Some(status) = parts.next() else { continue };
        let Some(kind) = status.chars().next().and_then(FileChangeKind::from_status_letter) else {
            continue;
        };
        let (path, previous_path) = if kind == FileChangeKind::Renamed {
            let old = parts.next().map(str::to_string);
            let Some(new) = parts.next() else { continue };
            (new.to_string(), old)
        } else {
            let Some(path) = parts.next() else { continue };
            (path.to_string(), None)
        };
        let (additions, deletions) = counts.get(&path).copied().unwrap_or((0, 0));
        files.push(FileChange { path, kind, additions, deletions, previous_path });
    }
    files
}

/// Parse `--shortstat`: ` 3 files changed, 10 insertions(+), 2 deletions(-)`.
fn parse_shortstat(output: &str) -> DiffStats {
    let mut stats = DiffStats::default();
    for part in output.trim().split(',') {
        let part = part.trim();
        let Some(number) = part.split_whitespace().next().and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        if part.contains("file") {
            stats.files_changed = number;
        } else if part.contains("insertion") {
            stats.additions = number;
        } else if part.contains("deletion") {
            stats.deletions = number;
        }
    }
    stats
}

#[cfg(test)]
#[path = "patch_tests.rs"]
mod tests;
