// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boot-time reconciliation of persisted state against the container
//! daemon. Runs exactly once, before the engine accepts work. Every
//! failure here is logged and swallowed; recovery must never stop the
//! engine from starting.

use crate::daemon::ContainerDaemon;
use qm_core::{
    labels, BoxId, Clock, JobStatus, LifecycleStatus, PatchStatus, PoolStatus, SandboxRecord,
    INTERRUPTED_BY_RESTART,
};
use qm_storage::Store;
use std::path::PathBuf;
use std::sync::Arc;

/// Exited unknown containers older than this are removed.
const STALE_CONTAINER_MS: i64 = 60 * 60 * 1000;
/// Terminal jobs and patches older than this are pruned.
const PRUNE_AGE_MS: i64 = 7 * 24 * 60 * 60 * 1000;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub adopted: usize,
    pub removed: usize,
    pub refreshed: usize,
    pub failed_jobs: usize,
    pub rejected_patches: usize,
    pub pruned_jobs: usize,
    pub pruned_patches: usize,
}

pub struct RecoveryManager {
    store: Arc<Store>,
    daemon: Arc<dyn ContainerDaemon>,
    clock: Arc<dyn Clock>,
}

impl RecoveryManager {
    pub fn new(store: Arc<Store>, daemon: Arc<dyn ContainerDaemon>, clock: Arc<dyn Clock>) -> Self {
        Self { store, daemon, clock }
    }

    pub async fn run(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        self.reconcile_sandboxes(&mut report).await;
        self.reconcile_jobs(&mut report).await;
        self.prune_stale(&mut report).await;
        tracing::info!(
            adopted = report.adopted,
            removed = report.removed,
            failed_jobs = report.failed_jobs,
            rejected_patches = report.rejected_patches,
            "recovery complete"
        );
        report
    }

    /// Walk every container carrying the ownership label: adopt running
    /// unknowns, remove long-exited unknowns, refresh last-used on known
    /// running ones.
    async fn reconcile_sandboxes(&self, report: &mut RecoveryReport) {
        let infos = match self.daemon.list_labeled(labels::OWNER).await {
            Ok(infos) => infos,
            Err(e) => {
                tracing::warn!(error = %e, "sandbox reconciliation skipped");
                return;
            }
        };
        let now = self.clock.now_ms();

        for info in infos {
            let id = box_id_for_container(&info.name);
            let record = match self.store.get_sandbox_record(id.as_str()) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(name = %info.name, error = %e, "record lookup failed");
                    continue;
                }
            };

            match record {
                None if info.running => {
                    // A live sandbox we know nothing about: adopt it so the
                    // pool's accounting and later sweeps can see it.
                    let mut adopted = SandboxRecord::new(id, &info.name, now);
                    adopted.pool_status = PoolStatus::InUse;
                    adopted.lifecycle_status = LifecycleStatus::Running;
                    adopted.created_at_ms =
                        if info.created_at_ms > 0 { info.created_at_ms } else { now };
                    adopted.task_id = info.labels.get(labels::TASK_ID).cloned();
                    adopted.workspace = info.labels.get(labels::WORKSPACE).map(PathBuf::from);
                    if let Err(e) = self.store.save_sandbox_record(&adopted) {
                        tracing::warn!(name = %info.name, error = %e, "adoption failed");
                    } else {
                        tracing::info!(name = %info.name, "adopted unknown running sandbox");
                        report.adopted += 1;
                    }
                }
                None => {
                    let age = now.saturating_sub(info.created_at_ms);
                    if info.created_at_ms > 0 && age > STALE_CONTAINER_MS {
                        tracing::info!(name = %info.name, "removing stale exited sandbox");
                        if let Err(e) = self.daemon.remove(&info.name).await {
                            tracing::debug!(name = %info.name, error = %e, "remove failed");
                        } else {
                            report.removed += 1;
                        }
                    }
                }
                Some(mut record) if info.running => {
                    record.last_used_at_ms = now;
                    if let Err(e) = self.store.save_sandbox_record(&record) {
                        tracing::warn!(name = %info.name, error = %e, "refresh failed");
                    } else {
                        report.refreshed += 1;
                    }
                }
                Some(_) => {}
            }
        }
    }

    /// Jobs that were in flight when the engine died cannot be resumed;
    /// mark them failed with the fixed interruption note.
    async fn reconcile_jobs(&self, report: &mut RecoveryReport) {
        let jobs = match self.store.list_incomplete_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "job reconciliation skipped");
                return;
            }
        };
        let now = self.clock.now_ms();

        for mut job in jobs {
            let alive = match &job.container_id {
                Some(id) => {
                    let name = self.container_name_for(id);
                    self.daemon.is_running(&name).await.unwrap_or(false)
                }
                None => false,
            };
            if alive {
                continue;
            }

            tracing::info!(job_id = %job.id, "failing job interrupted by restart");
            job.status = JobStatus::Failed;
            job.progress = Some(INTERRUPTED_BY_RESTART.to_string());
            job.error = Some(INTERRUPTED_BY_RESTART.to_string());
            job.ended_at_ms = Some(now);
            if let Err(e) = self.store.save_job(&job) {
                tracing::warn!(job_id = %job.id, error = %e, "failed to persist job failure");
            } else {
                report.failed_jobs += 1;
            }
        }
    }

    /// Age out terminal rows and reject pending patches whose sandbox is
    /// gone.
    async fn prune_stale(&self, report: &mut RecoveryReport) {
        let now = self.clock.now_ms();
        match self.store.prune_older_than(now, PRUNE_AGE_MS) {
            Ok(pruned) => {
                report.pruned_jobs = pruned.jobs;
                report.pruned_patches = pruned.patches;
            }
            Err(e) => tracing::warn!(error = %e, "prune skipped"),
        }

        let pending = match self.store.list_pending_patches() {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, "pending patch sweep skipped");
                return;
            }
        };
        for patch in pending {
            let name = self.container_name_for(&patch.container_id);
            let alive = self.daemon.is_running(&name).await.unwrap_or(false);
            if alive {
                continue;
            }
            tracing::info!(diff_id = %patch.id, "rejecting pending patch with vanished sandbox");
            match self.store.update_patch_status(patch.id.as_str(), PatchStatus::Rejected, None) {
                Ok(_) => report.rejected_patches += 1,
                Err(e) => tracing::warn!(diff_id = %patch.id, error = %e, "reject failed"),
            }
        }
    }

    /// Container name for a sandbox id, preferring the persisted record's
    /// symbolic name.
    fn container_name_for(&self, id: &BoxId) -> String {
        match self.store.get_sandbox_record(id.as_str()) {
            Ok(Some(record)) => record.name,
            _ => format!("qm-{}", id.short(12)),
        }
    }
}

/// Sandbox id as derived from its container name (`qm-<suffix>`).
fn box_id_for_container(name: &str) -> BoxId {
    let suffix = name.strip_prefix("qm-").unwrap_or(name);
    BoxId::from_string(format!("{}{suffix}", BoxId::PREFIX))
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
