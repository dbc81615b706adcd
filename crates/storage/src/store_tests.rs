// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use qm_core::test_support;
use qm_core::{FileChangeKind, JobStatus, PoolStatus};

fn store() -> Store {
    Store::open_in_memory().unwrap()
}

#[test]
fn job_round_trip_and_upsert() {
    let store = store();
    let mut job = test_support::job(JobStatus::Started);
    store.save_job(&job).unwrap();

    let loaded = store.get_job(job.id.as_str()).unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Started);
    assert_eq!(loaded.prompt, job.prompt);

    job.status = JobStatus::Completed;
    job.ended_at_ms = Some(99);
    store.save_job(&job).unwrap();
    let loaded = store.get_job(job.id.as_str()).unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Completed);
    assert_eq!(loaded.ended_at_ms, Some(99));
}

#[test]
fn incomplete_jobs_excludes_terminal() {
    let store = store();
    for status in [
        JobStatus::Started,
        JobStatus::Running,
        JobStatus::NeedsInput,
        JobStatus::Completed,
        JobStatus::Failed,
    ] {
        store.save_job(&test_support::job(status)).unwrap();
    }
    let incomplete = store.list_incomplete_jobs().unwrap();
    assert_eq!(incomplete.len(), 3);
    assert!(incomplete.iter().all(|j| !j.status.is_terminal()));
    assert_eq!(store.list_jobs().unwrap().len(), 5);
}

#[test]
fn missing_rows_are_none() {
    let store = store();
    assert!(store.get_job("job-missing").unwrap().is_none());
    assert!(store.get_patch("diff-missing").unwrap().is_none());
    assert!(store.get_sandbox_record("box-missing").unwrap().is_none());
}

#[test]
fn patch_status_update_rewrites_row() {
    let store = store();
    let patch = test_support::patch().file("src/main.rs", FileChangeKind::Modified, 3, 1).build();
    store.save_patch(&patch).unwrap();
    assert_eq!(store.list_pending_patches().unwrap().len(), 1);

    let applied = store
        .update_patch_status(patch.id.as_str(), qm_core::PatchStatus::Applied, Some(Path::new("/w")))
        .unwrap();
    assert_eq!(applied.applied_to.as_deref(), Some(Path::new("/w")));
    assert!(store.list_pending_patches().unwrap().is_empty());

    // Status column stays in sync with the JSON blob
    let loaded = store.get_patch(patch.id.as_str()).unwrap().unwrap();
    assert_eq!(loaded.status, qm_core::PatchStatus::Applied);
}

#[test]
fn patch_status_update_missing_is_not_found() {
    let store = store();
    let err = store.update_patch_status("diff-gone", qm_core::PatchStatus::Rejected, None);
    assert!(matches!(err, Err(StoreError::NotFound(_))));
}

#[test]
fn active_sandbox_records_filter_on_pool_status() {
    let store = store();
    for (i, status) in [
        PoolStatus::Creating,
        PoolStatus::Ready,
        PoolStatus::InUse,
        PoolStatus::Cleanup,
        PoolStatus::Error,
    ]
    .into_iter()
    .enumerate()
    {
        let mut rec =
            qm_core::SandboxRecord::new(qm_core::BoxId::new(), format!("qm-{i}"), i as i64);
        rec.pool_status = status;
        store.save_sandbox_record(&rec).unwrap();
    }
    let active = store.list_active_sandbox_records().unwrap();
    assert_eq!(active.len(), 3);
}

#[test]
fn log_refs_round_trip() {
    let store = store();
    let log = LogRef {
        id: qm_core::LogId::new(),
        container_id: qm_core::BoxId::from_string("box-1"),
        task_id: Some("a".into()),
        path: PathBuf::from("/logs/abcd-a.log"),
        created_at_ms: 7,
    };
    store.save_log_ref(&log).unwrap();
    let logs = store.list_log_refs().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].path, log.path);
    assert_eq!(logs[0].task_id.as_deref(), Some("a"));
}

#[test]
fn prune_removes_only_old_terminal_rows() {
    let store = store();

    let mut old_done = test_support::job(JobStatus::Completed);
    old_done.started_at_ms = 0;
    old_done.ended_at_ms = Some(10);
    store.save_job(&old_done).unwrap();

    let mut fresh_done = test_support::job(JobStatus::Completed);
    fresh_done.started_at_ms = 900;
    fresh_done.ended_at_ms = Some(950);
    store.save_job(&fresh_done).unwrap();

    let mut old_running = test_support::job(JobStatus::Running);
    old_running.started_at_ms = 0;
    store.save_job(&old_running).unwrap();

    let old_patch = test_support::patch().status(qm_core::PatchStatus::Rejected).build();
    store.save_patch(&old_patch).unwrap();

    let report = store.prune_older_than(1000, 100).unwrap();
    assert_eq!(report.jobs, 1);
    assert_eq!(report.patches, 1);

    assert!(store.get_job(old_done.id.as_str()).unwrap().is_none());
    assert!(store.get_job(fresh_done.id.as_str()).unwrap().is_some());
    // Non-terminal rows survive regardless of age
    assert!(store.get_job(old_running.id.as_str()).unwrap().is_some());
}

#[test]
fn open_on_disk_creates_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("quartermaster.db");
    let store = Store::open(&path).unwrap();
    store.save_job(&test_support::job(JobStatus::Started)).unwrap();
    store.close();
    assert!(path.exists());

    // Reopen sees the row
    let store = Store::open(&path).unwrap();
    assert_eq!(store.list_jobs().unwrap().len(), 1);
}
