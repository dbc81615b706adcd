// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent execution manager.
//!
//! Drives one agent invocation from prompt to patch: acquire an extraction
//! sandbox, seed it, run the agent, harvest the change set, and surface it
//! for review. Background jobs are a task per job plus an id-keyed
//! registry; every status transition is persisted before it is announced
//! on the event hub, so the store and the stream always tell the same
//! story.

mod background;
mod interpret;
mod review;
mod revision;
mod run;
mod sweep;

pub use run::RunCompletion;

use crate::auth::AuthReader;
use crate::events::EventHub;
use crate::logs::ExecutionLogs;
use crate::patch::PatchEngine;
use crate::pool::{ContainerPool, PoolCounts, PoolError, Sandbox, SandboxOverrides};
use crate::tasks::TaskGraphManager;
use parking_lot::Mutex;
use qm_core::{
    BackgroundJob, Clock, ConversationSession, DiffId, EngineError, JobId, JobStatus, Patch,
    ReturnMode, SessionId, SessionStatus, StreamEventKind,
};
use qm_storage::Store;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything the manager needs, injected so tests can assemble an engine
/// against a fake daemon and a temp store.
pub struct ManagerDeps {
    pub pool: Arc<ContainerPool>,
    pub patches: Arc<PatchEngine>,
    pub store: Arc<Store>,
    pub auth: Arc<AuthReader>,
    pub logs: ExecutionLogs,
    pub tasks: Arc<TaskGraphManager>,
    pub hub: EventHub,
    pub clock: Arc<dyn Clock>,
}

/// Inputs for one agent run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub prompt: String,
    pub work_folder: PathBuf,
    pub task_description: Option<String>,
    pub task_id: Option<String>,
    pub overrides: SandboxOverrides,
    pub return_mode: ReturnMode,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>, work_folder: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            work_folder: work_folder.into(),
            task_description: None,
            task_id: None,
            overrides: SandboxOverrides::default(),
            return_mode: ReturnMode::default(),
        }
    }
}

/// Aggregate engine health for the `system_status` tool.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub pool: PoolCounts,
    pub jobs: JobCounts,
    pub pending_patches: usize,
    pub active_sessions: usize,
    pub auth: crate::auth::AuthStatus,
    pub uptime_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobCounts {
    pub started: usize,
    pub running: usize,
    pub needs_input: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct AgentExecutionManager {
    pool: Arc<ContainerPool>,
    patches: Arc<PatchEngine>,
    store: Arc<Store>,
    auth: Arc<AuthReader>,
    logs: ExecutionLogs,
    tasks: Arc<TaskGraphManager>,
    hub: EventHub,
    clock: Arc<dyn Clock>,
    /// Registry of jobs this process has seen; the store is authoritative.
    jobs: Mutex<HashMap<JobId, BackgroundJob>>,
    /// Pending patches by id, mirrored in the store.
    pending: Mutex<HashMap<DiffId, Patch>>,
    sessions: Mutex<HashMap<SessionId, ConversationSession>>,
    /// Live sandbox handles pinned by a session.
    session_sandboxes: Mutex<HashMap<SessionId, Sandbox>>,
    started_at_ms: i64,
}

impl AgentExecutionManager {
    pub fn new(deps: ManagerDeps) -> Self {
        let started_at_ms = deps.clock.now_ms();
        Self {
            pool: deps.pool,
            patches: deps.patches,
            store: deps.store,
            auth: deps.auth,
            logs: deps.logs,
            tasks: deps.tasks,
            hub: deps.hub,
            clock: deps.clock,
            jobs: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            session_sandboxes: Mutex::new(HashMap::new()),
            started_at_ms,
        }
    }

    pub fn pool(&self) -> &Arc<ContainerPool> {
        &self.pool
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn tasks(&self) -> &Arc<TaskGraphManager> {
        &self.tasks
    }

    pub fn logs(&self) -> &ExecutionLogs {
        &self.logs
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// A job by id: the in-memory registry first, then the store (jobs
    /// from before a restart).
    pub fn get_job(&self, id: &str) -> Option<BackgroundJob> {
        if let Some(job) = self.jobs.lock().get(id).cloned() {
            return Some(job);
        }
        self.store.get_job(id).ok().flatten()
    }

    /// All jobs known to the store, newest first.
    pub fn list_jobs(&self) -> Vec<BackgroundJob> {
        self.store.list_jobs().unwrap_or_default()
    }

    pub fn get_session(&self, id: &str) -> Option<ConversationSession> {
        self.sessions.lock().get(id).cloned()
    }

    pub async fn system_status(&self) -> SystemStatus {
        let mut counts = JobCounts::default();
        for job in self.store.list_jobs().unwrap_or_default() {
            match job.status {
                JobStatus::Started => counts.started += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::NeedsInput => counts.needs_input += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        let active_sessions = self
            .sessions
            .lock()
            .values()
            .filter(|s| s.status != SessionStatus::Terminated)
            .count();
        SystemStatus {
            pool: self.pool.counts(),
            jobs: counts,
            pending_patches: self.store.list_pending_patches().map(|p| p.len()).unwrap_or(0),
            active_sessions,
            auth: self.auth.status().await,
            uptime_ms: self.clock.now_ms().saturating_sub(self.started_at_ms),
        }
    }

    /// Persist a job and announce the transition, in that order.
    fn persist_and_emit(&self, job: &BackgroundJob) {
        if let Err(e) = self.store.save_job(job) {
            tracing::warn!(job_id = %job.id, error = %e, "failed to persist job");
        }
        self.jobs.lock().insert(job.id.clone(), job.clone());
        self.hub.emit(
            StreamEventKind::TaskProgress,
            serde_json::json!({
                "jobId": job.id.as_str(),
                "status": job.status.as_str(),
                "progress": job.progress,
                "taskId": job.task_id,
            }),
        );
    }

    /// Map lower-layer failures into semantic error kinds.
    fn convert_pool_error(e: PoolError) -> EngineError {
        match e {
            PoolError::NotInitialized => {
                EngineError::unavailable("container pool is not initialized")
            }
            PoolError::AuthTimeout => {
                EngineError::timed_out("sandbox credential configuration timed out")
            }
            PoolError::Daemon(crate::daemon::DaemonError::Unavailable(msg)) => {
                EngineError::unavailable(msg)
            }
            PoolError::Daemon(e) => EngineError::internal(e.to_string()),
            PoolError::Store(e) => EngineError::internal(e.to_string()),
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
