// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::daemon::{ContainerDaemon, ExecOutput, FakeDaemon};
use crate::pool::PoolConfig;
use qm_core::{FakeClock, PatchStatus};
use std::time::Duration;

const README_DIFF: &str = "diff --git a/README.md b/README.md\n\
new file mode 100644\n\
--- /dev/null\n\
+++ b/README.md\n\
@@ -0,0 +1 @@\n\
+Hello World\n";

struct Fixture {
    manager: Arc<AgentExecutionManager>,
    daemon: FakeDaemon,
    store: Arc<Store>,
    clock: FakeClock,
    workspace: tempfile::TempDir,
    _logs_dir: tempfile::TempDir,
}

/// Script the fake daemon: `claude` invocations return `agent_output`,
/// extraction reports a one-file change set when `with_changes`.
fn script_daemon(daemon: &FakeDaemon, agent_output: String, with_changes: bool) {
    daemon.on_exec(move |_, cmd| {
        let joined = cmd.join(" ");
        if cmd.first() == Some(&"claude") {
            return ExecOutput::ok(agent_output.clone());
        }
        if joined.contains("--name-status") {
            return if with_changes { ExecOutput::ok("A\tREADME.md\n") } else { ExecOutput::ok("") };
        }
        if joined.contains("--numstat") {
            return if with_changes { ExecOutput::ok("1\t0\tREADME.md\n") } else { ExecOutput::ok("") };
        }
        if joined.contains("--shortstat") {
            return if with_changes {
                ExecOutput::ok(" 1 file changed, 1 insertion(+)")
            } else {
                ExecOutput::ok("")
            };
        }
        if joined.contains("--stat") {
            return ExecOutput::ok(" README.md | 1 +");
        }
        if joined.starts_with("git diff --cached") {
            return if with_changes { ExecOutput::ok(README_DIFF) } else { ExecOutput::ok("") };
        }
        ExecOutput::ok("")
    });
}

async fn fixture(agent_output: &str, with_changes: bool) -> Fixture {
    let daemon = FakeDaemon::new();
    script_daemon(&daemon, agent_output.to_string(), with_changes);

    let store = Arc::new(Store::open_in_memory().unwrap());
    let clock = FakeClock::at(100_000);
    let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
    let auth = Arc::new(AuthReader::new(Arc::clone(&clock_arc)));
    let hub = EventHub::new(Arc::clone(&clock_arc));
    let pool = Arc::new(ContainerPool::new(
        Arc::new(daemon.clone()),
        Arc::clone(&store),
        Arc::clone(&auth),
        hub.clone(),
        Arc::clone(&clock_arc),
        PoolConfig { warm_target: 0, ..PoolConfig::default() },
    ));
    pool.init().await.unwrap();

    let patches = Arc::new(PatchEngine::new(
        Arc::new(daemon.clone()),
        Arc::clone(&store),
        Arc::clone(&clock_arc),
    ));
    let logs_dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(AgentExecutionManager::new(ManagerDeps {
        pool,
        patches,
        store: Arc::clone(&store),
        auth,
        logs: ExecutionLogs::new(logs_dir.path().to_path_buf()),
        tasks: Arc::new(TaskGraphManager::new(Arc::clone(&clock_arc))),
        hub,
        clock: clock_arc,
    }));

    Fixture {
        manager,
        daemon,
        store,
        clock,
        workspace: tempfile::tempdir().unwrap(),
        _logs_dir: logs_dir,
    }
}

async fn wait_for_status(fx: &Fixture, id: &JobId, status: JobStatus) -> BackgroundJob {
    for _ in 0..300 {
        if let Some(job) = fx.manager.get_job(id.as_str()) {
            if job.status == status {
                return job;
            }
            if job.status.is_terminal() && job.status != status {
                panic!("job reached {:?} instead: {:?}", job.status, job.error);
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for job status {status}");
}

fn request(fx: &Fixture) -> RunRequest {
    RunRequest::new("create a README", fx.workspace.path())
}

#[tokio::test]
async fn background_run_produces_pending_patch() {
    let fx = fixture("Created README.md with a short project summary.", true).await;
    let mut req = request(&fx);
    req.return_mode = ReturnMode::Full;
    req.task_id = Some("a".to_string());

    let job_id = fx.manager.start_background(req).await.unwrap();
    let job = wait_for_status(&fx, &job_id, JobStatus::Completed).await;

    assert_eq!(job.task_id.as_deref(), Some("a"));
    let result = job.result.unwrap();
    assert!(result.contains("Next steps"));
    assert!(result.contains("1 files, +1 -0"));

    let pending = fx.manager.list_pending_patches();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].stats.files_changed, 1);
    assert_eq!(pending[0].task_id.as_deref(), Some("a"));
    assert!(pending[0].session_id.is_some());

    // The sandbox is stopped pending review but kept for revisions
    let name = fx.daemon.container_names()[0].clone();
    assert!(!fx.daemon.is_running(&name).await.unwrap());
    assert!(fx.daemon.container_exists(&name));

    // A log reference was recorded
    assert_eq!(fx.store.list_log_refs().unwrap().len(), 1);
}

#[tokio::test]
async fn run_without_changes_completes_empty() {
    let fx = fixture("Nothing needed doing.", false).await;
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    let job = wait_for_status(&fx, &job_id, JobStatus::Completed).await;

    assert!(job.progress.unwrap().contains("no changes"));
    assert!(fx.manager.list_pending_patches().is_empty());
    // Summary mode truncates to 500 chars
    assert!(job.result.unwrap().chars().count() <= 503);
}

#[tokio::test]
async fn ad_hoc_run_allocates_task_id() {
    let fx = fixture("done, no changes?no".repeat(60).as_str(), false).await;
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    let job = wait_for_status(&fx, &job_id, JobStatus::Completed).await;
    let task_id = job.task_id.unwrap();
    assert!(task_id.starts_with("task-"));
}

#[tokio::test]
async fn question_and_answer_loop() {
    let fx = fixture("What database should the service use?", true).await;
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    let job = wait_for_status(&fx, &job_id, JobStatus::NeedsInput).await;

    let question = job.pending_question.clone().unwrap();
    assert!(question.contains("database"));
    let session_id = job.session_id.clone().unwrap();
    assert!(fx.manager.get_session(session_id.as_str()).is_some());

    // The session's sandbox is still running, pinned to the session
    let name = fx.daemon.container_names()[0].clone();
    assert!(fx.daemon.is_running(&name).await.unwrap());

    // Answering re-enters the same sandbox and runs to completion
    script_daemon(&fx.daemon, "Done, used Postgres.".to_string(), true);
    fx.manager.answer_question(job_id.as_str(), "Postgres").await.unwrap();
    let job = wait_for_status(&fx, &job_id, JobStatus::Completed).await;
    assert!(job.pending_question.is_none());

    let follow_up = fx
        .daemon
        .exec_calls()
        .into_iter()
        .filter(|(_, cmd)| cmd.first().map(String::as_str) == Some("claude"))
        .next_back()
        .unwrap();
    let prompt = &follow_up.1[2];
    assert!(prompt.contains("Previous question: What database"));
    assert!(prompt.contains("Answer: Postgres"));
    assert!(prompt.contains("proceed with the original task"));

    assert_eq!(fx.daemon.container_names().len(), 1);
    assert_eq!(fx.manager.list_pending_patches().len(), 1);
}

#[tokio::test]
async fn answer_requires_needs_input_state() {
    let fx = fixture("Done.", false).await;
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    wait_for_status(&fx, &job_id, JobStatus::Completed).await;

    let err = fx.manager.answer_question(job_id.as_str(), "ok").await.unwrap_err();
    assert_eq!(err.kind, qm_core::ErrorKind::PreconditionFailed);

    let err = fx.manager.answer_question("job-ghost", "ok").await.unwrap_err();
    assert_eq!(err.kind, qm_core::ErrorKind::NotFound);
}

#[tokio::test]
async fn apply_is_not_idempotent() {
    let fx = fixture("Added README.", true).await;
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    wait_for_status(&fx, &job_id, JobStatus::Completed).await;

    let patch = fx.manager.list_pending_patches().remove(0);
    let target = tempfile::tempdir().unwrap();
    let outcome = fx.manager.apply_patch(patch.id.as_str(), target.path(), false).await.unwrap();
    assert!(outcome.success);
    assert!(target.path().join("README.md").exists());

    let stored = fx.store.get_patch(patch.id.as_str()).unwrap().unwrap();
    assert_eq!(stored.status, PatchStatus::Applied);

    // Second application errors; review no longer sees the patch
    let err =
        fx.manager.apply_patch(patch.id.as_str(), target.path(), false).await.unwrap_err();
    assert_eq!(err.kind, qm_core::ErrorKind::Conflict);
    let err = fx.manager.review_patch(patch.id.as_str()).unwrap_err();
    assert_eq!(err.kind, qm_core::ErrorKind::NotFound);

    // Acceptance tears the session and its sandbox down
    let session_id = patch.session_id.unwrap();
    assert!(fx.manager.get_session(session_id.as_str()).is_none());
    assert!(fx.daemon.container_names().is_empty());
}

#[tokio::test]
async fn reject_cleans_session_and_sandbox() {
    let fx = fixture("Added README.", true).await;
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    wait_for_status(&fx, &job_id, JobStatus::Completed).await;

    let patch = fx.manager.list_pending_patches().remove(0);
    fx.manager.reject_patch(patch.id.as_str(), Some("not needed")).await.unwrap();

    assert!(fx.manager.list_pending_patches().is_empty());
    let err = fx.manager.review_patch(patch.id.as_str()).unwrap_err();
    assert_eq!(err.kind, qm_core::ErrorKind::NotFound);

    let session_id = patch.session_id.unwrap();
    assert!(fx.manager.get_session(session_id.as_str()).is_none());
    assert!(fx.daemon.container_names().is_empty());

    // Rejecting again reads as gone
    let err = fx.manager.reject_patch(patch.id.as_str(), None).await.unwrap_err();
    assert_eq!(err.kind, qm_core::ErrorKind::NotFound);
}

#[tokio::test]
async fn revision_tags_new_patch_and_parent_history() {
    let fx = fixture("Added README.", true).await;
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    wait_for_status(&fx, &job_id, JobStatus::Completed).await;
    let original = fx.manager.list_pending_patches().remove(0);

    let revision_job = fx
        .manager
        .request_revision(original.id.as_str(), "use tabs", true, Some("style guide"))
        .await
        .unwrap();
    let job = wait_for_status(&fx, &revision_job, JobStatus::Completed).await;
    assert_eq!(job.session_id, original.session_id);

    let parent = fx.store.get_patch(original.id.as_str()).unwrap().unwrap();
    assert_eq!(parent.revisions.len(), 1);
    assert_eq!(parent.revisions[0].revision, 1);
    assert_eq!(parent.revisions[0].feedback, "use tabs");

    let revised = fx.store.get_patch(parent.revisions[0].successor.as_str()).unwrap().unwrap();
    assert!(revised.is_revision);
    assert_eq!(revised.revision_number, 1);
    assert_eq!(revised.parent_diff_id.as_ref(), Some(&original.id));
    assert_eq!(revised.status, PatchStatus::Pending);

    let revision_prompt = fx
        .daemon
        .exec_calls()
        .into_iter()
        .filter(|(_, cmd)| cmd.first().map(String::as_str) == Some("claude"))
        .next_back()
        .unwrap()
        .1[2]
        .clone();
    assert!(revision_prompt.contains("use tabs"));
    assert!(revision_prompt.contains("style guide"));
    assert!(revision_prompt.contains("README.md"));
}

#[tokio::test]
async fn revision_cap_is_enforced() {
    let fx = fixture("Added README.", true).await;
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    wait_for_status(&fx, &job_id, JobStatus::Completed).await;
    let original = fx.manager.list_pending_patches().remove(0);

    let mut loaded = fx.store.get_patch(original.id.as_str()).unwrap().unwrap();
    for n in 1..=3 {
        loaded.revisions.push(qm_core::RevisionEntry {
            at_ms: 0,
            feedback: format!("round {n}"),
            successor: qm_core::DiffId::new(),
            revision: n,
        });
    }
    fx.store.save_patch(&loaded).unwrap();

    let err = fx
        .manager
        .request_revision(original.id.as_str(), "one more", false, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, qm_core::ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn revision_after_restart_reports_expired_session() {
    let fx = fixture("Added README.", true).await;
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    wait_for_status(&fx, &job_id, JobStatus::Completed).await;
    let patch = fx.manager.list_pending_patches().remove(0);

    // Simulate an engine restart: in-memory session state is gone
    fx.manager.sessions.lock().clear();
    fx.manager.session_sandboxes.lock().clear();

    let err =
        fx.manager.request_revision(patch.id.as_str(), "tweak", false, None).await.unwrap_err();
    assert_eq!(err.kind, qm_core::ErrorKind::NotFound);
    assert!(err.message.contains("session expired"));
}

#[tokio::test]
async fn sweep_reaps_idle_sessions() {
    let fx = fixture("Added README.", true).await;
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    wait_for_status(&fx, &job_id, JobStatus::Completed).await;
    let session_id = fx.manager.list_pending_patches()[0].session_id.clone().unwrap();

    // Under an hour idle: session survives
    fx.clock.advance_ms(30 * 60 * 1000);
    fx.manager.sweep_once().await;
    assert!(fx.manager.get_session(session_id.as_str()).is_some());

    // Past an hour: reaped, sandbox destroyed
    fx.clock.advance_ms(40 * 60 * 1000);
    fx.manager.sweep_once().await;
    assert!(fx.manager.get_session(session_id.as_str()).is_none());
    assert!(fx.daemon.container_names().is_empty());
}

#[tokio::test]
async fn failed_agent_marks_job_failed() {
    let fx = fixture("ignored", true).await;
    fx.daemon.on_exec(|_, cmd| {
        if cmd.first() == Some(&"claude") {
            ExecOutput::err(2, "agent crashed")
        } else {
            ExecOutput::ok("")
        }
    });
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    let job = wait_for_status(&fx, &job_id, JobStatus::Failed).await;
    assert!(job.error.unwrap().contains("agent crashed"));
    assert!(job.ended_at_ms.is_some());
}

#[tokio::test]
async fn system_status_aggregates() {
    let fx = fixture("Added README.", true).await;
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    wait_for_status(&fx, &job_id, JobStatus::Completed).await;

    fx.clock.advance_ms(5_000);
    let status = fx.manager.system_status().await;
    assert_eq!(status.jobs.completed, 1);
    assert_eq!(status.pending_patches, 1);
    assert_eq!(status.active_sessions, 1);
    assert_eq!(status.uptime_ms, 5_000);
}

#[tokio::test]
async fn events_follow_persisted_transitions() {
    let fx = fixture("Added README.", true).await;
    let mut rx = fx.manager.hub().subscribe();
    let job_id = fx.manager.start_background(request(&fx)).await.unwrap();
    wait_for_status(&fx, &job_id, JobStatus::Completed).await;

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    assert!(kinds.contains(&qm_core::StreamEventKind::TaskProgress));
    assert!(kinds.contains(&qm_core::StreamEventKind::DiffCreated));
    assert!(kinds.contains(&qm_core::StreamEventKind::TaskCompleted));
}
