// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background jobs: a spawned task per job plus the id-keyed registry.

use super::run::{RunCompletion, RunContext};
use super::{AgentExecutionManager, RunRequest};
use qm_core::{BackgroundJob, EngineError, JobId, JobStatus};
use std::sync::Arc;

impl AgentExecutionManager {
    /// Register a job and return its id immediately; the run itself
    /// proceeds on a detached task.
    pub async fn start_background(self: &Arc<Self>, request: RunRequest) -> Result<JobId, EngineError> {
        if !self.pool.is_initialized() {
            return Err(EngineError::unavailable("container pool is not initialized"));
        }

        let mut job = BackgroundJob::new(
            request.prompt.clone(),
            request.work_folder.clone(),
            self.clock.now_ms(),
        );
        job.task_id = request.task_id.clone();
        job.return_mode = request.return_mode;
        job.progress = Some("queued".to_string());
        self.persist_and_emit(&job);

        let ctx = RunContext {
            task_description: request.task_description,
            overrides: request.overrides,
            ..RunContext::default()
        };
        self.spawn_job(job.id.clone(), ctx);
        Ok(job.id)
    }

    /// Resume a job that is waiting on an answer. The same sandbox is
    /// re-entered with a follow-up prompt; the outcome is either another
    /// question or a final patch.
    pub async fn answer_question(
        self: &Arc<Self>,
        job_id: &str,
        answer: &str,
    ) -> Result<(), EngineError> {
        let mut job = self
            .get_job(job_id)
            .ok_or_else(|| EngineError::not_found(format!("no such job: {job_id}")))?;
        if job.status != JobStatus::NeedsInput {
            return Err(EngineError::precondition_failed(format!(
                "job {job_id} is {}, not waiting for input",
                job.status
            )));
        }
        let question = job.pending_question.clone().unwrap_or_default();
        let session_id = job
            .session_id
            .clone()
            .ok_or_else(|| EngineError::not_found("job has no conversation session"))?;
        let sandbox = self
            .session_sandboxes
            .lock()
            .get(session_id.as_str())
            .cloned()
            .ok_or_else(|| {
                EngineError::not_found("session expired; sandbox no longer running")
            })?;

        job.status = JobStatus::Running;
        job.pending_question = None;
        job.progress = Some("answer received, resuming".to_string());
        self.persist_and_emit(&job);

        if let Some(session) = self.sessions.lock().get_mut(session_id.as_str()) {
            session.status = qm_core::SessionStatus::Active;
            session.touch(self.clock.now_ms());
        }

        let follow_up = format!(
            "Previous question: {question}. Answer: {answer}. Now please proceed with the original task."
        );
        let ctx = RunContext {
            sandbox: Some(sandbox),
            prompt_override: Some(follow_up),
            ..RunContext::default()
        };
        self.spawn_job(job.id.clone(), ctx);
        Ok(())
    }

    /// Detach the run and funnel its outcome into the job record. The
    /// conversion layer: any raw failure becomes a semantic error on the
    /// tool path *and* a failed job record.
    pub(super) fn spawn_job(self: &Arc<Self>, job_id: JobId, ctx: RunContext) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_job(job_id, ctx).await;
        });
    }

    async fn run_job(self: Arc<Self>, job_id: JobId, ctx: RunContext) {
        let Some(mut job) = self.get_job(job_id.as_str()) else {
            tracing::warn!(job_id = %job_id, "job vanished before run started");
            return;
        };

        match self.execute_run(&mut job, ctx).await {
            Ok(RunCompletion::NeedsInput { question, session_id }) => {
                job.status = JobStatus::NeedsInput;
                job.session_id = Some(session_id);
                job.pending_question = Some(question.clone());
                job.progress = Some("waiting for input".to_string());
                self.persist_and_emit(&job);
            }
            Ok(RunCompletion::Finished { result, diff_id }) => {
                job.status = JobStatus::Completed;
                job.result = Some(result);
                job.progress = Some(match &diff_id {
                    Some(diff) => format!("completed with patch {diff}"),
                    None => "completed with no changes".to_string(),
                });
                job.ended_at_ms = Some(self.clock.now_ms());
                self.persist_and_emit(&job);
                self.hub.emit(
                    qm_core::StreamEventKind::TaskCompleted,
                    serde_json::json!({
                        "jobId": job.id.as_str(),
                        "taskId": job.task_id,
                        "diffId": diff_id.as_ref().map(|d| d.as_str().to_string()),
                    }),
                );
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "background run failed");
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
                job.progress = Some(format!("failed: {}", e.message));
                job.ended_at_ms = Some(self.clock.now_ms());
                self.persist_and_emit(&job);
            }
        }
    }
}
