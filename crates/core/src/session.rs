// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conversation sessions: agent interactions that paused for input or
//! stayed alive for revisions.

use crate::id::{BoxId, DiffId, SessionId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Hibernated,
    Terminated,
}

/// A pinned sandbox plus its accumulated prompt history. In-memory only;
/// the sandbox handle stays in the pool's in-use map and is referenced by
/// id, so a session can outlive any one manager call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: SessionId,
    pub container_id: BoxId,
    pub workspace: PathBuf,
    pub original_prompt: String,
    pub latest_prompt: String,
    #[serde(default)]
    pub revision_count: u32,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_id: Option<DiffId>,
    pub last_activity_ms: i64,
}

impl ConversationSession {
    pub fn new(
        container_id: BoxId,
        workspace: PathBuf,
        prompt: impl Into<String>,
        now_ms: i64,
    ) -> Self {
        let prompt = prompt.into();
        Self {
            id: SessionId::new(),
            container_id,
            workspace,
            original_prompt: prompt.clone(),
            latest_prompt: prompt,
            revision_count: 0,
            status: SessionStatus::Active,
            task_id: None,
            diff_id: None,
            last_activity_ms: now_ms,
        }
    }

    pub fn touch(&mut self, now_ms: i64) {
        self.last_activity_ms = now_ms;
    }

    /// Idle duration against `now_ms`.
    pub fn idle_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.last_activity_ms)
    }
}
