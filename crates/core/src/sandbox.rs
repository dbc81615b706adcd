// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox container records.
//!
//! A sandbox carries two orthogonal status axes: where it sits relative to
//! the pool (`PoolStatus`) and where its captured work sits in the review
//! lifecycle (`LifecycleStatus`). The two are separate fields and are never
//! collapsed into one.

use crate::id::BoxId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Container labels the engine stamps on every sandbox it creates. The
/// recovery manager keys off these to find its own containers.
pub mod labels {
    /// Ownership marker; value is always `"1"`.
    pub const OWNER: &str = "quartermaster.owned";
    /// Manifest task the sandbox is working on.
    pub const TASK_ID: &str = "quartermaster.task-id";
    /// `"1"` when the warm pool manages the sandbox's lifecycle.
    pub const POOL_MANAGED: &str = "quartermaster.pool-managed";
    /// Host workspace path the sandbox was seeded from.
    pub const WORKSPACE: &str = "quartermaster.workspace";
}

/// Pool-membership axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Creating,
    Ready,
    InUse,
    Cleanup,
    Error,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Creating => "creating",
            PoolStatus::Ready => "ready",
            PoolStatus::InUse => "in_use",
            PoolStatus::Cleanup => "cleanup",
            PoolStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creating" => Some(PoolStatus::Creating),
            "ready" => Some(PoolStatus::Ready),
            "in_use" => Some(PoolStatus::InUse),
            "cleanup" => Some(PoolStatus::Cleanup),
            "error" => Some(PoolStatus::Error),
            _ => None,
        }
    }
}

/// Review-lifecycle axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Running,
    Stopped,
    PendingReview,
    Applied,
    Rejected,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Running => "running",
            LifecycleStatus::Stopped => "stopped",
            LifecycleStatus::PendingReview => "pending_review",
            LifecycleStatus::Applied => "applied",
            LifecycleStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(LifecycleStatus::Running),
            "stopped" => Some(LifecycleStatus::Stopped),
            "pending_review" => Some(LifecycleStatus::PendingReview),
            "applied" => Some(LifecycleStatus::Applied),
            "rejected" => Some(LifecycleStatus::Rejected),
            _ => None,
        }
    }
}

/// A tracked execution container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRecord {
    pub id: BoxId,
    /// Symbolic container name as known to the container daemon.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub pool_status: PoolStatus,
    pub lifecycle_status: LifecycleStatus,
    pub created_at_ms: i64,
    pub last_used_at_ms: i64,
    /// Host workspace has been copied in.
    #[serde(default)]
    pub workspace_ready: bool,
    /// Credential injection finished.
    #[serde(default)]
    pub auth_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
}

impl SandboxRecord {
    pub fn new(id: BoxId, name: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id,
            name: name.into(),
            task_id: None,
            pool_status: PoolStatus::Creating,
            lifecycle_status: LifecycleStatus::Running,
            created_at_ms: now_ms,
            last_used_at_ms: now_ms,
            workspace_ready: false,
            auth_ready: false,
            workspace: None,
        }
    }
}
