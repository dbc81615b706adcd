// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One agent run, from sandbox acquisition to patch registration.

use super::AgentExecutionManager;
use crate::daemon::ExecOptions;
use crate::logs::TaskLogWriter;
use crate::pool::Sandbox;
use qm_core::{
    BackgroundJob, DiffId, DiffOptions, EngineError, JobStatus, Patch, ReturnMode, SessionId,
    SessionStatus, StreamEventKind, TaskId,
};
use qm_storage::LogRef;
use std::sync::Arc;
use std::time::Duration;

/// Seconds between heartbeat lines in the run log.
const HEARTBEAT: Duration = Duration::from_secs(30);
/// Summary mode truncates the result payload to this many characters.
const SUMMARY_LIMIT: usize = 500;

/// Tool patterns the agent is always invoked with: file and search
/// operations plus a bounded set of shell commands.
const ALLOWED_TOOLS: &[&str] = &[
    "Edit",
    "MultiEdit",
    "Read",
    "Write",
    "Glob",
    "Grep",
    "LS",
    "Task",
    "Bash(git:*)",
    "Bash(npm:*)",
    "Bash(yarn:*)",
    "Bash(pnpm:*)",
    "Bash(pip:*)",
    "Bash(cargo:*)",
    "Bash(mkdir:*)",
    "Bash(ls:*)",
    "Bash(cat:*)",
];

const PROMPT_PREAMBLE: &str = "You are working inside an isolated sandbox. \
Your working directory is /workspace, which contains a copy of the \
project. Make your changes directly in /workspace with the file tools \
available to you. Do not attempt to access anything outside /workspace. \
Shell access is limited to version control and package managers.";

const NEXT_STEPS: &str = "Next steps:\n\
- review_changes to inspect the captured patch\n\
- apply_changes to apply it to the workspace\n\
- request_revision to iterate with feedback\n\
- reject_changes to discard it";

/// How a run reaches execution: fresh sandbox, or re-entry into a
/// session's pinned sandbox (answers and revisions).
#[derive(Default)]
pub(super) struct RunContext {
    pub sandbox: Option<Sandbox>,
    pub task_description: Option<String>,
    pub overrides: crate::pool::SandboxOverrides,
    pub prompt_override: Option<String>,
    /// `(parent patch, feedback)` when this run revises an earlier patch.
    pub revision_of: Option<(DiffId, String)>,
}

/// Terminal shape of one run.
pub enum RunCompletion {
    NeedsInput { question: String, session_id: SessionId },
    Finished { result: String, diff_id: Option<DiffId> },
}

impl AgentExecutionManager {
    /// Drive one run to completion inside `job`'s sandbox. The caller owns
    /// persistence of the terminal state.
    pub(super) async fn execute_run(
        self: &Arc<Self>,
        job: &mut BackgroundJob,
        ctx: RunContext,
    ) -> Result<RunCompletion, EngineError> {
        if !self.pool.is_initialized() {
            return Err(EngineError::unavailable("container pool is not initialized"));
        }

        // Acquire and seed, reusing the session's pinned sandbox when given
        let sandbox = match ctx.sandbox {
            Some(sandbox) => {
                self.ensure_running(&sandbox).await?;
                sandbox
            }
            None => {
                let task_id = job
                    .task_id
                    .clone()
                    .unwrap_or_else(|| TaskId::new().as_str().to_string());
                job.task_id = Some(task_id.clone());
                let sandbox = self
                    .pool
                    .acquire_for_extraction(&job.work_folder, ctx.overrides, Some(&task_id))
                    .await
                    .map_err(Self::convert_pool_error)?;
                self.patches
                    .init_tracking(&sandbox)
                    .await
                    .map_err(|e| EngineError::internal(e.to_string()))?;
                sandbox
            }
        };

        job.container_id = Some(sandbox.id.clone());
        job.status = JobStatus::Running;
        job.progress = Some("agent running".to_string());
        self.persist_and_emit(job);

        // Invoke the agent, logging to the per-task file
        let task_label = job.task_id.clone().unwrap_or_else(|| "adhoc".to_string());
        let writer = self.logs.writer(&sandbox.id, &task_label);
        let prompt = match &ctx.prompt_override {
            Some(prompt) => prompt.clone(),
            None => compose_prompt(&job.prompt, ctx.task_description.as_deref()),
        };
        let output = self.invoke_agent(&sandbox, &prompt, &writer).await?;
        self.record_log_ref(job, &sandbox, &writer);

        // Question mode: park the job, keep the sandbox alive
        if super::interpret::looks_like_question(&output) {
            let session_id = self.upsert_session(&sandbox, job, &prompt, None);
            return Ok(RunCompletion::NeedsInput { question: output.trim().to_string(), session_id });
        }

        // Harvest the change set
        let mut patch = self
            .patches
            .extract(&sandbox, DiffOptions::default())
            .await
            .map_err(|e| EngineError::internal(e.to_string()))?;
        patch.workspace = job.work_folder.clone();
        patch.task_id = job.task_id.clone();

        let diff_id = if patch.has_changes() {
            let session_id = self.upsert_session(&sandbox, job, &prompt, Some(patch.id.clone()));
            patch.session_id = Some(session_id);
            if let Some((parent_id, feedback)) = &ctx.revision_of {
                self.mark_revision(&mut patch, parent_id, feedback);
            }
            self.store.save_patch(&patch).map_err(|e| EngineError::internal(e.to_string()))?;
            self.pending.lock().insert(patch.id.clone(), patch.clone());
            self.hub.emit(
                StreamEventKind::DiffCreated,
                serde_json::json!({
                    "diffId": patch.id.as_str(),
                    "filesChanged": patch.stats.files_changed,
                    "taskId": patch.task_id,
                }),
            );
            if let Some(task_id) = &job.task_id {
                self.tasks.link_task(
                    &job.work_folder,
                    task_id,
                    Some(job.id.as_str()),
                    Some(patch.id.as_str()),
                );
            }
            Some(patch.id.clone())
        } else {
            None
        };

        // Stop the sandbox pending review; the session keeps the container
        // around for revisions until reviewed or reaped
        self.pool.stop_sandbox(&sandbox).await;

        let result = build_result(job.return_mode, &output, &patch);
        Ok(RunCompletion::Finished { result, diff_id })
    }

    /// Run the agent inside the sandbox, streaming a heartbeat into the
    /// log while it works.
    async fn invoke_agent(
        &self,
        sandbox: &Sandbox,
        prompt: &str,
        writer: &TaskLogWriter,
    ) -> Result<String, EngineError> {
        let tools = ALLOWED_TOOLS.join(",");
        let cmd = ["claude", "-p", prompt, "--allowedTools", &tools];
        writer.append("agent invocation starting");

        let daemon = self.pool.daemon();
        let exec_options = ExecOptions::workspace_user();
        let exec = daemon.exec(&sandbox.name, &cmd, &exec_options);
        tokio::pin!(exec);

        let mut ticker = tokio::time::interval(HEARTBEAT);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately

        let out = loop {
            tokio::select! {
                out = &mut exec => break out,
                _ = ticker.tick() => writer.append("[heartbeat] agent still running"),
            }
        }
        .map_err(|e| EngineError::unavailable(e.to_string()))?;

        writer.append_block("stdout", &out.stdout);
        writer.append_block("stderr", &out.stderr);
        if !out.success() {
            writer.append(&format!("agent exited with status {}", out.exit_code));
            return Err(EngineError::internal(format!(
                "agent exited with status {}: {}",
                out.exit_code,
                qm_core::short(out.stderr.trim(), 200)
            )));
        }
        writer.append("agent invocation finished");
        Ok(out.stdout)
    }

    /// Restart a stopped session sandbox before re-entry.
    async fn ensure_running(&self, sandbox: &Sandbox) -> Result<(), EngineError> {
        let daemon = self.pool.daemon();
        let running = daemon
            .is_running(&sandbox.name)
            .await
            .map_err(|e| EngineError::unavailable(e.to_string()))?;
        if !running {
            daemon
                .start(&sandbox.name)
                .await
                .map_err(|e| EngineError::not_found(format!("sandbox cannot be revived: {e}")))?;
        }
        Ok(())
    }

    /// Create or refresh the conversation session pinned to this sandbox.
    fn upsert_session(
        &self,
        sandbox: &Sandbox,
        job: &mut BackgroundJob,
        prompt: &str,
        diff_id: Option<DiffId>,
    ) -> SessionId {
        let now = self.clock.now_ms();
        let mut sessions = self.sessions.lock();
        let session_id = match &job.session_id {
            Some(id) if sessions.contains_key(id.as_str()) => id.clone(),
            _ => {
                let session = qm_core::ConversationSession::new(
                    sandbox.id.clone(),
                    job.work_folder.clone(),
                    prompt,
                    now,
                );
                let id = session.id.clone();
                sessions.insert(id.clone(), session);
                self.session_sandboxes.lock().insert(id.clone(), sandbox.clone());
                id
            }
        };
        if let Some(session) = sessions.get_mut(session_id.as_str()) {
            session.latest_prompt = prompt.to_string();
            session.task_id = job.task_id.clone();
            session.status =
                if diff_id.is_some() { SessionStatus::Hibernated } else { SessionStatus::Active };
            if let Some(diff) = diff_id {
                session.diff_id = Some(diff);
            }
            session.touch(now);
        }
        job.session_id = Some(session_id.clone());
        session_id
    }

    /// Tag a freshly extracted patch as a revision and append it to the
    /// parent's history.
    fn mark_revision(&self, patch: &mut Patch, parent_id: &DiffId, feedback: &str) {
        let parent = self.pending.lock().get(parent_id).cloned();
        let Some(mut parent) = parent.or_else(|| self.store.get_patch(parent_id).ok().flatten())
        else {
            tracing::warn!(parent = %parent_id, "revision parent vanished");
            return;
        };
        let revision = parent.revisions.len() as u32 + 1;
        patch.is_revision = true;
        patch.parent_diff_id = Some(parent_id.clone());
        patch.revision_number = revision;

        parent.revisions.push(qm_core::RevisionEntry {
            at_ms: self.clock.now_ms(),
            feedback: feedback.to_string(),
            successor: patch.id.clone(),
            revision,
        });
        if let Err(e) = self.store.save_patch(&parent) {
            tracing::warn!(parent = %parent_id, error = %e, "failed to record revision history");
        }
        self.pending.lock().insert(parent.id.clone(), parent);
    }

    fn record_log_ref(&self, job: &BackgroundJob, sandbox: &Sandbox, writer: &TaskLogWriter) {
        let log = LogRef {
            id: qm_core::LogId::new(),
            container_id: sandbox.id.clone(),
            task_id: job.task_id.clone(),
            path: writer.path().to_path_buf(),
            created_at_ms: self.clock.now_ms(),
        };
        if let Err(e) = self.store.save_log_ref(&log) {
            tracing::warn!(error = %e, "failed to persist log reference");
        }
    }
}

fn compose_prompt(prompt: &str, description: Option<&str>) -> String {
    let mut composed = format!("{PROMPT_PREAMBLE}\n\nTask:\n{prompt}");
    if let Some(description) = description {
        composed.push_str("\n\nAdditional context:\n");
        composed.push_str(description);
    }
    composed
}

fn build_result(mode: ReturnMode, output: &str, patch: &Patch) -> String {
    let change_summary = if patch.has_changes() {
        format!(
            "Captured patch {} ({} files, +{} -{}).",
            patch.id,
            patch.stats.files_changed,
            patch.stats.additions,
            patch.stats.deletions
        )
    } else {
        "No file changes were captured.".to_string()
    };
    match mode {
        ReturnMode::Full => format!("{output}\n\n{change_summary}\n\n{NEXT_STEPS}"),
        ReturnMode::Summary => {
            let summary = format!("{change_summary} {}", output.trim());
            let mut truncated: String = summary.chars().take(SUMMARY_LIMIT).collect();
            if summary.chars().count() > SUMMARY_LIMIT {
                truncated.push_str("...");
            }
            truncated
        }
    }
}
