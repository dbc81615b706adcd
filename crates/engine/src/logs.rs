// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-execution log files.
//!
//! One plain-text file per agent run at
//! `<log_dir>/<sandbox-short-id>-<task-id>.log`, with timestamped lines.
//! Writing never propagates errors; logging must not break a run.

use qm_core::BoxId;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sort order for log listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogSort {
    #[default]
    Modified,
    Size,
}

impl LogSort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "modified" | "mtime" => Some(LogSort::Modified),
            "size" => Some(LogSort::Size),
            _ => None,
        }
    }
}

/// One log file as returned by `list_container_logs`.
#[derive(Debug, Clone, Serialize)]
pub struct LogFileInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at_ms: i64,
}

/// Root of the engine's execution-log directory.
#[derive(Debug, Clone)]
pub struct ExecutionLogs {
    log_dir: PathBuf,
}

impl ExecutionLogs {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    pub fn dir(&self) -> &Path {
        &self.log_dir
    }

    /// Log file path for a run.
    pub fn path_for(&self, container_id: &BoxId, task_id: &str) -> PathBuf {
        self.log_dir.join(format!("{}-{}.log", container_id.short(12), task_id))
    }

    /// Open an append-only writer for a run's log.
    pub fn writer(&self, container_id: &BoxId, task_id: &str) -> TaskLogWriter {
        TaskLogWriter { path: self.path_for(container_id, task_id) }
    }

    /// List log files, newest/largest first, up to `limit`.
    pub fn list(&self, limit: usize, sort: LogSort) -> Vec<LogFileInfo> {
        let Ok(entries) = std::fs::read_dir(&self.log_dir) else {
            return Vec::new();
        };
        let mut infos: Vec<LogFileInfo> = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let path = entry.path();
                if path.extension().map(|e| e != "log").unwrap_or(true) {
                    return None;
                }
                let meta = entry.metadata().ok()?;
                let modified_at_ms = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                Some(LogFileInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path,
                    size_bytes: meta.len(),
                    modified_at_ms,
                })
            })
            .collect();
        match sort {
            LogSort::Modified => infos.sort_by(|a, b| b.modified_at_ms.cmp(&a.modified_at_ms)),
            LogSort::Size => infos.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes)),
        }
        infos.truncate(limit);
        infos
    }

    /// Read a log by identifier: a sandbox id, task id, or file-name
    /// fragment. Returns the last `tail` lines containing `filter`.
    pub fn read(
        &self,
        identifier: &str,
        tail: Option<usize>,
        filter: Option<&str>,
    ) -> Option<String> {
        let needle = identifier.strip_prefix(BoxId::PREFIX).unwrap_or(identifier);
        let file = self
            .list(usize::MAX, LogSort::Modified)
            .into_iter()
            .find(|info| info.name.contains(needle))?;
        let content = std::fs::read_to_string(&file.path).ok()?;
        let lines: Vec<&str> = content
            .lines()
            .filter(|line| filter.map(|f| line.contains(f)).unwrap_or(true))
            .collect();
        let start = tail.map(|t| lines.len().saturating_sub(t)).unwrap_or(0);
        Some(lines[start..].join("\n"))
    }
}

/// Append-only writer for one run's log file.
#[derive(Debug, Clone)]
pub struct TaskLogWriter {
    path: PathBuf,
}

impl TaskLogWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line. Failures are logged and swallowed.
    pub fn append(&self, line: &str) {
        if let Err(e) = self.try_append(line) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write run log");
        }
    }

    /// Append each line of a block, tagged with a stream name.
    pub fn append_block(&self, stream: &str, text: &str) {
        for line in text.lines() {
            self.append(&format!("[{stream}] {line}"));
        }
    }

    fn try_append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        writeln!(file, "{stamp} {line}")
    }
}

#[cfg(test)]
#[path = "logs_tests.rs"]
mod tests;
