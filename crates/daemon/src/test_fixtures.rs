// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared daemon-test fixture: a full engine context over the fake
//! container daemon.

use crate::env::EngineEnv;
use crate::lifecycle::DaemonCtx;
use qm_core::FakeClock;
use qm_engine::daemon::ExecOutput;
use qm_engine::{
    AgentExecutionManager, AuthReader, ContainerPool, EventHub, ExecutionLogs, FakeDaemon,
    ManagerDeps, PatchEngine, PoolConfig, TaskGraphManager,
};
use qm_storage::Store;
use std::sync::Arc;
use std::time::Instant;

pub(crate) struct Fixture {
    pub ctx: Arc<DaemonCtx>,
    pub daemon: FakeDaemon,
    pub clock: FakeClock,
    pub workspace: tempfile::TempDir,
    _engine_root: tempfile::TempDir,
    _logs_dir: tempfile::TempDir,
}

const README_DIFF: &str = "diff --git a/README.md b/README.md\n\
new file mode 100644\n\
--- /dev/null\n\
+++ b/README.md\n\
@@ -0,0 +1 @@\n\
+Hello World\n";

/// Script the fake daemon so agent runs report one added README file.
pub(crate) fn script_happy_agent(daemon: &FakeDaemon, agent_output: &str) {
    let agent_output = agent_output.to_string();
    daemon.on_exec(move |_, cmd| {
        let joined = cmd.join(" ");
        if cmd.first() == Some(&"claude") {
            return ExecOutput::ok(agent_output.clone());
        }
        if joined.contains("--name-status") {
            return ExecOutput::ok("A\tREADME.md\n");
        }
        if joined.contains("--numstat") {
            return ExecOutput::ok("1\t0\tREADME.md\n");
        }
        if joined.contains("--shortstat") {
            return ExecOutput::ok(" 1 file changed, 1 insertion(+)");
        }
        if joined.contains("--stat") {
            return ExecOutput::ok(" README.md | 1 +");
        }
        if joined.starts_with("git diff --cached") {
            return ExecOutput::ok(README_DIFF);
        }
        ExecOutput::ok("")
    });
}

pub(crate) async fn fixture() -> Fixture {
    let daemon = FakeDaemon::new();
    script_happy_agent(&daemon, "Added README.");

    let store = Arc::new(Store::open_in_memory().unwrap());
    let clock = FakeClock::at(1_000_000);
    let clock_arc: Arc<dyn qm_core::Clock> = Arc::new(clock.clone());
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
        store,
        auth,
        logs: ExecutionLogs::new(logs_dir.path().to_path_buf()),
        tasks: Arc::new(TaskGraphManager::new(Arc::clone(&clock_arc))),
        hub,
        clock: clock_arc,
    }));

    let engine_root = tempfile::tempdir().unwrap();
    let env = EngineEnv {
        debug: false,
        secure_execution: true,
        streaming_enabled: true,
        stream_port: crate::env::DEFAULT_STREAM_PORT,
        debug_no_cleanup: false,
        engine_root: engine_root.path().to_path_buf(),
    };

    Fixture {
        ctx: Arc::new(DaemonCtx { manager, env, start_time: Instant::now() }),
        daemon,
        clock,
        workspace: tempfile::tempdir().unwrap(),
        _engine_root: engine_root,
        _logs_dir: logs_dir,
    }
}

/// Poll a job until it reaches `status` (panics on a different terminal
/// state).
pub(crate) async fn wait_for_job(
    ctx: &Arc<DaemonCtx>,
    job_id: &str,
    status: qm_core::JobStatus,
) -> qm_core::BackgroundJob {
    for _ in 0..300 {
        if let Some(job) = ctx.manager.get_job(job_id) {
            if job.status == status {
                return job;
            }
            if job.status.is_terminal() && job.status != status {
                panic!("job reached {:?} instead: {:?}", job.status, job.error);
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for job status {status}");
}
