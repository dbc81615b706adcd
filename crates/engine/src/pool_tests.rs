// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::daemon::{ExecOutput, FakeDaemon};
use qm_core::FakeClock;

struct Fixture {
    pool: Arc<ContainerPool>,
    daemon: FakeDaemon,
    store: Arc<Store>,
    workspace: tempfile::TempDir,
}

async fn fixture(config: PoolConfig) -> Fixture {
    let daemon = FakeDaemon::new();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::at(1_000));
    let auth = Arc::new(AuthReader::new(Arc::clone(&clock)));
    let hub = EventHub::new(Arc::clone(&clock));
    let pool = Arc::new(ContainerPool::new(
        Arc::new(daemon.clone()),
        Arc::clone(&store),
        auth,
        hub,
        clock,
        config,
    ));
    pool.init().await.unwrap();
    Fixture { pool, daemon, store, workspace: tempfile::tempdir().unwrap() }
}

fn quiet_config() -> PoolConfig {
    // No background warm fills; tests drive the pool explicitly.
    PoolConfig { warm_target: 0, ..PoolConfig::default() }
}

#[tokio::test]
async fn acquire_from_empty_pool_creates_and_seeds() {
    let fx = fixture(quiet_config()).await;
    let sandbox = fx
        .pool
        .acquire(fx.workspace.path(), SandboxOverrides::default(), Some("a"), false)
        .await
        .unwrap();

    assert!(fx.daemon.container_exists(&sandbox.name));
    assert_eq!(fx.pool.counts().in_use, 1);
    assert_eq!(fx.pool.counts().warm, 0);

    let copies = fx.daemon.copy_calls();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].0, sandbox.name);

    let record = fx.store.get_sandbox_record(sandbox.id.as_str()).unwrap().unwrap();
    assert_eq!(record.pool_status, qm_core::PoolStatus::InUse);
    assert!(record.workspace_ready);
    assert_eq!(record.task_id.as_deref(), Some("a"));
}

#[tokio::test]
async fn release_requeues_and_next_acquire_reuses() {
    let fx = fixture(quiet_config()).await;
    let sandbox = fx
        .pool
        .acquire(fx.workspace.path(), SandboxOverrides::default(), None, false)
        .await
        .unwrap();
    let name = sandbox.name.clone();

    fx.pool.release(sandbox, false).await;
    assert_eq!(fx.pool.counts().warm, 1);
    assert!(fx.daemon.container_exists(&name));

    let again = fx
        .pool
        .acquire(fx.workspace.path(), SandboxOverrides::default(), Some("b"), false)
        .await
        .unwrap();
    assert_eq!(again.name, name);
    assert_eq!(fx.daemon.container_names().len(), 1);
}

#[tokio::test]
async fn release_with_cleanup_destroys() {
    let fx = fixture(quiet_config()).await;
    let sandbox = fx
        .pool
        .acquire(fx.workspace.path(), SandboxOverrides::default(), None, false)
        .await
        .unwrap();
    let name = sandbox.name.clone();
    let id = sandbox.id.clone();

    fx.pool.release(sandbox, true).await;
    assert!(!fx.daemon.container_exists(&name));
    assert_eq!(fx.pool.counts().warm, 0);

    let record = fx.store.get_sandbox_record(id.as_str()).unwrap().unwrap();
    assert_eq!(record.pool_status, qm_core::PoolStatus::Cleanup);
    assert_eq!(record.lifecycle_status, qm_core::LifecycleStatus::Stopped);
}

#[tokio::test]
async fn warm_pool_cap_destroys_excess_returns() {
    let fx = fixture(PoolConfig { warm_target: 0, warm_max: 1, ..PoolConfig::default() }).await;
    let first = fx
        .pool
        .acquire(fx.workspace.path(), SandboxOverrides::default(), None, false)
        .await
        .unwrap();
    let second = fx
        .pool
        .acquire(fx.workspace.path(), SandboxOverrides::default(), None, true)
        .await
        .unwrap();
    let second_name = second.name.clone();

    fx.pool.release(first, false).await;
    assert_eq!(fx.pool.counts().warm, 1);

    // Warm pool is at its cap; the second return is destroyed instead.
    fx.pool.release(second, false).await;
    assert_eq!(fx.pool.counts().warm, 1);
    assert!(!fx.daemon.container_exists(&second_name));
}

#[tokio::test]
async fn failed_reset_poisons_and_destroys() {
    let fx = fixture(quiet_config()).await;
    fx.daemon.on_exec(|_, cmd| {
        if cmd.iter().any(|c| c.contains("-delete")) {
            ExecOutput::err(1, "permission denied")
        } else {
            ExecOutput::ok("")
        }
    });
    let sandbox = fx
        .pool
        .acquire(fx.workspace.path(), SandboxOverrides::default(), None, false)
        .await
        .unwrap();
    let name = sandbox.name.clone();

    fx.pool.release(sandbox, false).await;
    assert_eq!(fx.pool.counts().warm, 0);
    assert!(!fx.daemon.container_exists(&name));
}

#[tokio::test]
async fn extraction_sandboxes_skip_pool_membership() {
    let fx = fixture(quiet_config()).await;
    let sandbox = fx
        .pool
        .acquire_for_extraction(fx.workspace.path(), SandboxOverrides::default(), Some("a"))
        .await
        .unwrap();

    assert!(fx.daemon.container_exists(&sandbox.name));
    assert!(!sandbox.pool_managed);
    let counts = fx.pool.counts();
    assert_eq!(counts.warm, 0);
    assert_eq!(counts.in_use, 0);

    // Releasing a non-pool sandbox always destroys it
    let name = sandbox.name.clone();
    fx.pool.release(sandbox, false).await;
    assert!(!fx.daemon.container_exists(&name));
}

#[tokio::test]
async fn acquire_before_init_is_rejected() {
    let daemon = FakeDaemon::new();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::at(0));
    let auth = Arc::new(AuthReader::new(Arc::clone(&clock)));
    let hub = EventHub::new(Arc::clone(&clock));
    let pool = Arc::new(ContainerPool::new(
        Arc::new(daemon),
        store,
        auth,
        hub,
        clock,
        quiet_config(),
    ));
    let ws = tempfile::tempdir().unwrap();
    let err = pool.acquire(ws.path(), SandboxOverrides::default(), None, false).await;
    assert!(matches!(err, Err(PoolError::NotInitialized)));
}

#[tokio::test]
async fn init_fails_when_daemon_down() {
    let daemon = FakeDaemon::new();
    daemon.set_unavailable(true);
    let store = Arc::new(Store::open_in_memory().unwrap());
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::at(0));
    let auth = Arc::new(AuthReader::new(Arc::clone(&clock)));
    let hub = EventHub::new(Arc::clone(&clock));
    let pool = Arc::new(ContainerPool::new(
        Arc::new(daemon),
        store,
        auth,
        hub,
        clock,
        quiet_config(),
    ));
    let err = pool.init().await;
    assert!(matches!(err, Err(PoolError::Daemon(DaemonError::Unavailable(_)))));
    assert!(!pool.is_initialized());
}

#[tokio::test]
async fn shutdown_removes_everything() {
    let fx = fixture(quiet_config()).await;
    let a = fx
        .pool
        .acquire(fx.workspace.path(), SandboxOverrides::default(), None, false)
        .await
        .unwrap();
    let b = fx
        .pool
        .acquire(fx.workspace.path(), SandboxOverrides::default(), None, true)
        .await
        .unwrap();
    fx.pool.release(a, false).await;
    assert_eq!(fx.pool.counts().warm, 1);
    assert_eq!(fx.pool.counts().in_use, 1);
    drop(b);

    fx.pool.shutdown().await;
    assert!(fx.daemon.container_names().is_empty());
    let counts = fx.pool.counts();
    assert_eq!(counts.warm + counts.in_use, 0);
}

#[tokio::test]
async fn seeding_excludes_cover_common_junk() {
    for dir in ["node_modules", ".git", "target", "__pycache__", ".cache"] {
        assert!(SEED_EXCLUDES.contains(&dir), "{dir} missing from excludes");
    }
}
