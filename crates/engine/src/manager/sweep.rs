// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic cleanup of idle sessions and finished jobs.

use super::AgentExecutionManager;
use qm_core::{JobId, SessionStatus};
use std::sync::Arc;
use std::time::Duration;

/// Sessions idle longer than this are reaped.
pub const SESSION_IDLE_MS: i64 = 60 * 60 * 1000;
/// Sweep cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Terminal jobs older than this leave the in-memory registry (store rows
/// are pruned by recovery).
pub const JOB_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

impl AgentExecutionManager {
    /// Spawn the five-minute sweep loop.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep_once().await;
            }
        })
    }

    /// One cleanup pass. Failures are logged, never propagated.
    pub async fn sweep_once(&self) {
        let now = self.clock.now_ms();

        let idle: Vec<String> = self
            .sessions
            .lock()
            .values()
            .filter(|s| s.status != SessionStatus::Terminated && s.idle_ms(now) > SESSION_IDLE_MS)
            .map(|s| s.id.as_str().to_string())
            .collect();
        for session_id in idle {
            tracing::info!(session_id = %session_id, "reaping idle session");
            self.terminate_session(&session_id).await;
        }

        let expired: Vec<JobId> = self
            .jobs
            .lock()
            .values()
            .filter(|j| {
                j.status.is_terminal()
                    && j.ended_at_ms
                        .map(|end| now.saturating_sub(end) > JOB_RETENTION_MS)
                        .unwrap_or(false)
            })
            .map(|j| j.id.clone())
            .collect();
        if !expired.is_empty() {
            let mut jobs = self.jobs.lock();
            for id in &expired {
                jobs.remove(id);
            }
            tracing::debug!(count = expired.len(), "dropped finished jobs from registry");
        }
    }
}
