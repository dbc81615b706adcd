// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The review surface: list, inspect, apply, reject.

use super::AgentExecutionManager;
use crate::patch::ApplyOutcome;
use qm_core::{EngineError, Patch, PatchStatus, SessionStatus, StreamEventKind};
use std::path::Path;
use std::sync::Arc;

impl AgentExecutionManager {
    /// Pending patches, oldest first. Reads the store so patches created
    /// before a restart are still reviewable.
    pub fn list_pending_patches(&self) -> Vec<Patch> {
        self.store.list_pending_patches().unwrap_or_default()
    }

    /// All patches regardless of status, for dashboards.
    pub fn list_patches(&self) -> Vec<Patch> {
        self.store.list_patches().unwrap_or_default()
    }

    /// A patch by id, visible to review only while pending. Applied and
    /// rejected patches read as gone.
    pub fn review_patch(&self, diff_id: &str) -> Result<Patch, EngineError> {
        let patch = self
            .pending
            .lock()
            .get(diff_id)
            .cloned()
            .or_else(|| self.store.get_patch(diff_id).ok().flatten())
            .ok_or_else(|| EngineError::not_found(format!("no such patch: {diff_id}")))?;
        if patch.status != PatchStatus::Pending {
            return Err(EngineError::not_found(format!("no such patch: {diff_id}")));
        }
        Ok(patch)
    }

    /// Apply a pending patch to a target workspace. Not idempotent: a
    /// second application is an error, not a success.
    pub async fn apply_patch(
        self: &Arc<Self>,
        diff_id: &str,
        target: &Path,
        backup: bool,
    ) -> Result<ApplyOutcome, EngineError> {
        let patch = self
            .store
            .get_patch(diff_id)
            .map_err(|e| EngineError::internal(e.to_string()))?
            .ok_or_else(|| EngineError::not_found(format!("no such patch: {diff_id}")))?;
        match patch.status {
            PatchStatus::Pending => {}
            PatchStatus::Applied => {
                return Err(EngineError::conflict(format!("patch {diff_id} is already applied")))
            }
            PatchStatus::Rejected => {
                return Err(EngineError::not_found(format!("no such patch: {diff_id}")))
            }
        }

        let outcome = self
            .patches
            .apply(&patch, target, backup)
            .await
            .map_err(|e| EngineError::internal(e.to_string()))?;
        if !outcome.success {
            return Err(EngineError::internal(format!(
                "patch application failed: {}",
                outcome.stderr.trim()
            )));
        }

        self.pending.lock().remove(diff_id);
        // Applying is acceptance; the session and its sandbox are done
        if let Some(session_id) = &patch.session_id {
            self.terminate_session(session_id.as_str()).await;
        }
        self.hub.emit(
            StreamEventKind::RepoActivity,
            serde_json::json!({
                "action": "patch_applied",
                "diffId": diff_id,
                "workspace": target.display().to_string(),
            }),
        );
        Ok(outcome)
    }

    /// Reject a pending patch: mark it rejected, terminate its session,
    /// and tear the sandbox down.
    pub async fn reject_patch(
        self: &Arc<Self>,
        diff_id: &str,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        let patch = self
            .store
            .get_patch(diff_id)
            .map_err(|e| EngineError::internal(e.to_string()))?
            .ok_or_else(|| EngineError::not_found(format!("no such patch: {diff_id}")))?;
        match patch.status {
            PatchStatus::Pending => {}
            PatchStatus::Applied => {
                return Err(EngineError::conflict(format!("patch {diff_id} is already applied")))
            }
            PatchStatus::Rejected => {
                return Err(EngineError::not_found(format!("no such patch: {diff_id}")))
            }
        }

        self.store
            .update_patch_status(diff_id, PatchStatus::Rejected, None)
            .map_err(|e| EngineError::internal(e.to_string()))?;
        self.pending.lock().remove(diff_id);

        if let Some(session_id) = &patch.session_id {
            self.terminate_session(session_id.as_str()).await;
        }

        self.hub.emit(
            StreamEventKind::RepoActivity,
            serde_json::json!({
                "action": "patch_rejected",
                "diffId": diff_id,
                "reason": reason,
            }),
        );
        Ok(())
    }

    /// Terminate a session and destroy its pinned sandbox, best-effort.
    pub(super) async fn terminate_session(&self, session_id: &str) {
        let session = self.sessions.lock().get_mut(session_id).map(|session| {
            session.status = SessionStatus::Terminated;
            session.clone()
        });
        let sandbox = self.session_sandboxes.lock().remove(session_id);
        if let Some(sandbox) = sandbox {
            self.pool.destroy(&sandbox).await;
        }
        if session.is_some() {
            self.sessions.lock().remove(session_id);
        }
    }
}
