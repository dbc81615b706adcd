// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progress events broadcast to streaming clients.

use serde::{Deserialize, Serialize};

/// Closed set of stream message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    TaskProgress,
    ContainerStarted,
    ContainerStopped,
    ContainerLogs,
    DiffCreated,
    TaskCreated,
    TaskCompleted,
    RepoActivity,
}

/// Wire shape of one stream message: `{ type, data, timestamp }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: StreamEventKind,
    pub data: serde_json::Value,
    /// Epoch milliseconds at emission.
    pub timestamp: i64,
}

impl StreamEvent {
    pub fn new(kind: StreamEventKind, data: serde_json::Value, timestamp: i64) -> Self {
        Self { kind, data, timestamp }
    }
}
