// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::daemon::FakeDaemon;
use qm_core::test_support;
use qm_core::FakeClock;

const HOUR_MS: i64 = 60 * 60 * 1000;
const WEEK_MS: i64 = 7 * 24 * HOUR_MS;

struct Fixture {
    recovery: RecoveryManager,
    daemon: FakeDaemon,
    store: Arc<Store>,
    now: i64,
}

fn fixture() -> Fixture {
    let daemon = FakeDaemon::new();
    let store = Arc::new(qm_storage::Store::open_in_memory().unwrap());
    let now = 10 * WEEK_MS;
    let recovery =
        RecoveryManager::new(Arc::clone(&store), Arc::new(daemon.clone()), Arc::new(FakeClock::at(now)));
    Fixture { recovery, daemon, store, now }
}

fn record_named(store: &Store, name: &str, now: i64) -> qm_core::SandboxRecord {
    let id = box_id_for_container(name);
    let record = qm_core::SandboxRecord::new(id, name, now);
    store.save_sandbox_record(&record).unwrap();
    record
}

#[tokio::test]
async fn adopts_unknown_running_sandbox() {
    let fx = fixture();
    fx.daemon.insert_container(
        "qm-stray1",
        true,
        &[(qm_core::labels::OWNER, "1"), (qm_core::labels::WORKSPACE, "/w")],
        fx.now - HOUR_MS,
    );

    let report = fx.recovery.run().await;
    assert_eq!(report.adopted, 1);
    let record = fx.store.get_sandbox_record("box-stray1").unwrap().unwrap();
    assert_eq!(record.pool_status, qm_core::PoolStatus::InUse);
    assert_eq!(record.workspace.as_deref(), Some(std::path::Path::new("/w")));
}

#[tokio::test]
async fn removes_old_exited_unknown_sandbox() {
    let fx = fixture();
    fx.daemon.insert_container(
        "qm-old1",
        false,
        &[(qm_core::labels::OWNER, "1")],
        fx.now - 2 * HOUR_MS,
    );
    fx.daemon.insert_container(
        "qm-new1",
        false,
        &[(qm_core::labels::OWNER, "1")],
        fx.now - HOUR_MS / 2,
    );

    let report = fx.recovery.run().await;
    assert_eq!(report.removed, 1);
    assert!(!fx.daemon.container_exists("qm-old1"));
    // Recently exited containers are left for the next pass
    assert!(fx.daemon.container_exists("qm-new1"));
}

#[tokio::test]
async fn refreshes_known_running_sandbox() {
    let fx = fixture();
    fx.daemon.insert_container("qm-known1", true, &[(qm_core::labels::OWNER, "1")], fx.now);
    let record = record_named(&fx.store, "qm-known1", 5);

    let report = fx.recovery.run().await;
    assert_eq!(report.refreshed, 1);
    let loaded = fx.store.get_sandbox_record(record.id.as_str()).unwrap().unwrap();
    assert_eq!(loaded.last_used_at_ms, fx.now);
}

#[tokio::test]
async fn interrupted_jobs_fail_with_fixed_message() {
    let fx = fixture();

    // A running job whose sandbox is gone
    let mut dead = test_support::job(qm_core::JobStatus::Running);
    dead.started_at_ms = fx.now - 1000;
    dead.container_id = Some(qm_core::BoxId::from_string("box-vanished"));
    fx.store.save_job(&dead).unwrap();

    // A running job whose sandbox survived
    let record = record_named(&fx.store, "qm-alive1", fx.now);
    fx.daemon.insert_container("qm-alive1", true, &[(qm_core::labels::OWNER, "1")], fx.now);
    let mut alive = test_support::job(qm_core::JobStatus::Running);
    alive.started_at_ms = fx.now - 1000;
    alive.container_id = Some(record.id.clone());
    fx.store.save_job(&alive).unwrap();

    let report = fx.recovery.run().await;
    assert_eq!(report.failed_jobs, 1);

    let failed = fx.store.get_job(dead.id.as_str()).unwrap().unwrap();
    assert_eq!(failed.status, qm_core::JobStatus::Failed);
    assert_eq!(failed.progress.as_deref(), Some(INTERRUPTED_BY_RESTART));
    assert_eq!(failed.ended_at_ms, Some(fx.now));

    let survivor = fx.store.get_job(alive.id.as_str()).unwrap().unwrap();
    assert_eq!(survivor.status, qm_core::JobStatus::Running);
}

#[tokio::test]
async fn prunes_old_terminal_rows_and_orphan_patches() {
    let fx = fixture();

    let mut ancient = test_support::job(qm_core::JobStatus::Completed);
    ancient.started_at_ms = fx.now - 2 * WEEK_MS;
    ancient.ended_at_ms = Some(fx.now - 2 * WEEK_MS);
    fx.store.save_job(&ancient).unwrap();

    // Pending patch whose sandbox vanished
    let orphan = test_support::patch().container("box-gone").build();
    fx.store.save_patch(&orphan).unwrap();

    // Pending patch whose sandbox is alive
    fx.daemon.insert_container("qm-here1", true, &[(qm_core::labels::OWNER, "1")], fx.now);
    record_named(&fx.store, "qm-here1", fx.now);
    let kept = test_support::patch().container("box-here1").build();
    fx.store.save_patch(&kept).unwrap();

    let report = fx.recovery.run().await;
    assert_eq!(report.pruned_jobs, 1);
    assert_eq!(report.rejected_patches, 1);

    assert!(fx.store.get_job(ancient.id.as_str()).unwrap().is_none());
    let rejected = fx.store.get_patch(orphan.id.as_str()).unwrap().unwrap();
    assert_eq!(rejected.status, qm_core::PatchStatus::Rejected);
    let pending = fx.store.get_patch(kept.id.as_str()).unwrap().unwrap();
    assert_eq!(pending.status, qm_core::PatchStatus::Pending);
}

#[tokio::test]
async fn daemon_outage_is_non_fatal() {
    let fx = fixture();
    fx.daemon.set_unavailable(true);
    let mut job = test_support::job(qm_core::JobStatus::Running);
    job.container_id = Some(qm_core::BoxId::from_string("box-x"));
    fx.store.save_job(&job).unwrap();

    // Runs to completion; the unreachable daemon reads as "not running"
    let report = fx.recovery.run().await;
    assert_eq!(report.failed_jobs, 1);
}
