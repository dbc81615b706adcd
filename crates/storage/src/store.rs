// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The persistence store.
//!
//! Four tables keyed by identifier. Each row carries the full entity as a
//! JSON column plus mirrored scalar columns for the indexed fields, so the
//! entity shape can evolve without schema migrations. Writes go through a
//! single connection behind a mutex; WAL mode keeps readers cheap.

use parking_lot::Mutex;
use qm_core::{BackgroundJob, BoxId, LogId, Patch, PatchStatus, SandboxRecord};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("no such row: {0}")]
    NotFound(String),
}

/// Reference to a per-execution log file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRef {
    pub id: LogId,
    pub container_id: BoxId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub path: PathBuf,
    pub created_at_ms: i64,
}

/// What a prune pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub jobs: usize,
    pub patches: usize,
    pub containers: usize,
    pub logs: usize,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS background_tasks (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    task_id TEXT,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_background_tasks_status ON background_tasks(status);
CREATE INDEX IF NOT EXISTS idx_background_tasks_task_id ON background_tasks(task_id);

CREATE TABLE IF NOT EXISTS git_diffs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    task_id TEXT,
    container_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_git_diffs_status ON git_diffs(status);
CREATE INDEX IF NOT EXISTS idx_git_diffs_task_id ON git_diffs(task_id);

CREATE TABLE IF NOT EXISTS containers (
    id TEXT PRIMARY KEY,
    pool_status TEXT NOT NULL,
    task_id TEXT,
    created_at INTEGER NOT NULL,
    last_used_at INTEGER NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_containers_pool_status ON containers(pool_status);
CREATE INDEX IF NOT EXISTS idx_containers_task_id ON containers(task_id);

CREATE TABLE IF NOT EXISTS execution_logs (
    id TEXT PRIMARY KEY,
    container_id TEXT NOT NULL,
    task_id TEXT,
    path TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_execution_logs_task_id ON execution_logs(task_id);
"#;

/// Embedded relational store. Safe to share across tasks; every operation
/// takes the connection lock for its duration.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // journal_mode returns the resulting mode as a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Checkpoint the WAL and drop the connection.
    pub fn close(self) {
        let conn = self.conn.into_inner();
        if let Err(e) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_row| Ok(())) {
            tracing::debug!(error = %e, "wal checkpoint on close failed");
        }
    }

    // --- jobs ---

    pub fn save_job(&self, job: &BackgroundJob) -> Result<(), StoreError> {
        let data = serde_json::to_string(job)?;
        self.conn.lock().execute(
            "INSERT INTO background_tasks (id, status, task_id, started_at, ended_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
               status = excluded.status,
               task_id = excluded.task_id,
               ended_at = excluded.ended_at,
               data = excluded.data",
            params![
                job.id.as_str(),
                job.status.as_str(),
                job.task_id,
                job.started_at_ms,
                job.ended_at_ms,
                data
            ],
        )?;
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Result<Option<BackgroundJob>, StoreError> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row("SELECT data FROM background_tasks WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        data.map(|d| serde_json::from_str(&d)).transpose().map_err(Into::into)
    }

    /// Jobs in a non-terminal state, oldest first.
    pub fn list_incomplete_jobs(&self) -> Result<Vec<BackgroundJob>, StoreError> {
        self.query_jobs(
            "SELECT data FROM background_tasks
             WHERE status NOT IN ('completed', 'failed')
             ORDER BY started_at ASC",
        )
    }

    /// All jobs, newest first.
    pub fn list_jobs(&self) -> Result<Vec<BackgroundJob>, StoreError> {
        self.query_jobs("SELECT data FROM background_tasks ORDER BY started_at DESC")
    }

    fn query_jobs(&self, sql: &str) -> Result<Vec<BackgroundJob>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut jobs = Vec::new();
        for data in rows {
            jobs.push(serde_json::from_str(&data?)?);
        }
        Ok(jobs)
    }

    // --- patches ---

    pub fn save_patch(&self, patch: &Patch) -> Result<(), StoreError> {
        let data = serde_json::to_string(patch)?;
        self.conn.lock().execute(
            "INSERT INTO git_diffs (id, status, task_id, container_id, created_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
               status = excluded.status,
               task_id = excluded.task_id,
               data = excluded.data",
            params![
                patch.id.as_str(),
                patch.status.as_str(),
                patch.task_id,
                patch.container_id.as_str(),
                patch.created_at_ms,
                data
            ],
        )?;
        Ok(())
    }

    pub fn get_patch(&self, id: &str) -> Result<Option<Patch>, StoreError> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row("SELECT data FROM git_diffs WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        data.map(|d| serde_json::from_str(&d)).transpose().map_err(Into::into)
    }

    pub fn list_pending_patches(&self) -> Result<Vec<Patch>, StoreError> {
        self.query_patches(
            "SELECT data FROM git_diffs WHERE status = 'pending' ORDER BY created_at ASC",
        )
    }

    /// All patches, newest first.
    pub fn list_patches(&self) -> Result<Vec<Patch>, StoreError> {
        self.query_patches("SELECT data FROM git_diffs ORDER BY created_at DESC")
    }

    fn query_patches(&self, sql: &str) -> Result<Vec<Patch>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut patches = Vec::new();
        for data in rows {
            patches.push(serde_json::from_str(&data?)?);
        }
        Ok(patches)
    }

    /// Move a patch to `applied` or `rejected`, recording the target
    /// workspace for applies. The JSON column is rewritten so the row stays
    /// self-describing.
    pub fn update_patch_status(
        &self,
        id: &str,
        status: PatchStatus,
        applied_to: Option<&Path>,
    ) -> Result<Patch, StoreError> {
        let mut patch = self.get_patch(id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.status = status;
        if status == PatchStatus::Applied {
            patch.applied_to = applied_to.map(|p| p.to_path_buf());
        }
        self.save_patch(&patch)?;
        Ok(patch)
    }

    // --- sandbox records ---

    pub fn save_sandbox_record(&self, record: &SandboxRecord) -> Result<(), StoreError> {
        let data = serde_json::to_string(record)?;
        self.conn.lock().execute(
            "INSERT INTO containers (id, pool_status, task_id, created_at, last_used_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
               pool_status = excluded.pool_status,
               task_id = excluded.task_id,
               last_used_at = excluded.last_used_at,
               data = excluded.data",
            params![
                record.id.as_str(),
                record.pool_status.as_str(),
                record.task_id,
                record.created_at_ms,
                record.last_used_at_ms,
                data
            ],
        )?;
        Ok(())
    }

    pub fn get_sandbox_record(&self, id: &str) -> Result<Option<SandboxRecord>, StoreError> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row("SELECT data FROM containers WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        data.map(|d| serde_json::from_str(&d)).transpose().map_err(Into::into)
    }

    pub fn delete_sandbox_record(&self, id: &str) -> Result<(), StoreError> {
        self.conn.lock().execute("DELETE FROM containers WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Records whose pool status is creating, ready, or in_use.
    pub fn list_active_sandbox_records(&self) -> Result<Vec<SandboxRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT data FROM containers
             WHERE pool_status IN ('creating', 'ready', 'in_use')
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for data in rows {
            records.push(serde_json::from_str(&data?)?);
        }
        Ok(records)
    }

    // --- execution log references ---

    pub fn save_log_ref(&self, log: &LogRef) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO execution_logs (id, container_id, task_id, path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET path = excluded.path",
            params![
                log.id.as_str(),
                log.container_id.as_str(),
                log.task_id,
                log.path.display().to_string(),
                log.created_at_ms
            ],
        )?;
        Ok(())
    }

    pub fn list_log_refs(&self) -> Result<Vec<LogRef>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, container_id, task_id, path, created_at
             FROM execution_logs ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LogRef {
                id: LogId::from_string(row.get::<_, String>(0)?),
                container_id: BoxId::from_string(row.get::<_, String>(1)?),
                task_id: row.get(2)?,
                path: PathBuf::from(row.get::<_, String>(3)?),
                created_at_ms: row.get(4)?,
            })
        })?;
        let mut logs = Vec::new();
        for log in rows {
            logs.push(log?);
        }
        Ok(logs)
    }

    // --- pruning ---

    /// Remove terminal rows older than `age_ms` (measured from `now_ms`).
    /// Jobs must be completed/failed, patches applied/rejected, containers
    /// in cleanup/error. Log rows go when their creation time passes the
    /// threshold.
    pub fn prune_older_than(&self, now_ms: i64, age_ms: i64) -> Result<PruneReport, StoreError> {
        let cutoff = now_ms.saturating_sub(age_ms);
        let conn = self.conn.lock();
        let jobs = conn.execute(
            "DELETE FROM background_tasks
             WHERE status IN ('completed', 'failed')
               AND COALESCE(ended_at, started_at) < ?1",
            params![cutoff],
        )?;
        let patches = conn.execute(
            "DELETE FROM git_diffs
             WHERE status IN ('applied', 'rejected') AND created_at < ?1",
            params![cutoff],
        )?;
        let containers = conn.execute(
            "DELETE FROM containers
             WHERE pool_status IN ('cleanup', 'error') AND last_used_at < ?1",
            params![cutoff],
        )?;
        let logs =
            conn.execute("DELETE FROM execution_logs WHERE created_at < ?1", params![cutoff])?;
        Ok(PruneReport { jobs, patches, containers, logs })
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
