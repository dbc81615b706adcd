// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Patch revisions: iterate on a pending patch with feedback, in the same
//! sandbox.

use super::run::RunContext;
use super::AgentExecutionManager;
use qm_core::{BackgroundJob, EngineError, JobId, PatchStatus};
use std::sync::Arc;

/// Revisions per patch are bounded.
pub const MAX_REVISIONS: usize = 3;

impl AgentExecutionManager {
    /// Start a revision run against the sandbox that produced `diff_id`.
    /// The new patch is tagged as a revision of the original and appended
    /// to its history.
    ///
    /// Sessions do not survive an engine restart: when the original
    /// sandbox is gone the revision is refused and the patch must be
    /// re-run from scratch.
    pub async fn request_revision(
        self: &Arc<Self>,
        diff_id: &str,
        feedback: &str,
        preserve_correct_parts: bool,
        context: Option<&str>,
    ) -> Result<JobId, EngineError> {
        if feedback.trim().is_empty() {
            return Err(EngineError::invalid_params("feedback must not be empty"));
        }

        let patch = self
            .store
            .get_patch(diff_id)
            .map_err(|e| EngineError::internal(e.to_string()))?
            .ok_or_else(|| EngineError::not_found(format!("no such patch: {diff_id}")))?;
        if patch.status != PatchStatus::Pending {
            return Err(EngineError::precondition_failed(format!(
                "patch {diff_id} is {}, only pending patches can be revised",
                patch.status.as_str()
            )));
        }
        if patch.revisions.len() >= MAX_REVISIONS {
            return Err(EngineError::precondition_failed(format!(
                "patch {diff_id} already has {MAX_REVISIONS} revisions"
            )));
        }

        let session_id = patch
            .session_id
            .clone()
            .ok_or_else(|| EngineError::not_found("patch has no conversation session"))?;
        let session = self
            .sessions
            .lock()
            .get(session_id.as_str())
            .cloned()
            .ok_or_else(|| {
                EngineError::not_found("session expired; sandbox no longer running")
            })?;
        let sandbox = self
            .session_sandboxes
            .lock()
            .get(session_id.as_str())
            .cloned()
            .ok_or_else(|| {
                EngineError::not_found("session expired; sandbox no longer running")
            })?;

        let prompt = revision_prompt(&session.original_prompt, feedback, context, preserve_correct_parts, &patch);

        let mut job = BackgroundJob::new(
            session.original_prompt.clone(),
            patch.workspace.clone(),
            self.clock.now_ms(),
        );
        job.task_id = patch.task_id.clone();
        job.session_id = Some(session_id.clone());
        job.container_id = Some(sandbox.id.clone());
        job.progress = Some(format!("revision of {diff_id} queued"));
        self.persist_and_emit(&job);

        {
            let now = self.clock.now_ms();
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get_mut(session_id.as_str()) {
                session.revision_count += 1;
                session.latest_prompt = prompt.clone();
                session.status = qm_core::SessionStatus::Active;
                session.touch(now);
            }
        }

        let ctx = RunContext {
            sandbox: Some(sandbox),
            prompt_override: Some(prompt),
            revision_of: Some((patch.id.clone(), feedback.to_string())),
            ..RunContext::default()
        };
        self.spawn_job(job.id.clone(), ctx);
        Ok(job.id)
    }
}

fn revision_prompt(
    original: &str,
    feedback: &str,
    context: Option<&str>,
    preserve_correct_parts: bool,
    patch: &qm_core::Patch,
) -> String {
    let mut prompt = format!(
        "You previously worked on this task:\n{original}\n\n\
         The reviewer asked for changes:\n{feedback}\n"
    );
    if let Some(context) = context {
        prompt.push_str("\nAdditional context:\n");
        prompt.push_str(context);
        prompt.push('\n');
    }
    if preserve_correct_parts {
        prompt.push_str("\nKeep the parts of your previous changes that were not criticized.\n");
    }
    if !patch.files.is_empty() {
        prompt.push_str("\nFiles currently modified:\n");
        for file in &patch.files {
            prompt.push_str(&format!("- {}\n", file.path));
        }
    }
    prompt.push_str("\nRevise your changes in /workspace accordingly.");
    prompt
}
