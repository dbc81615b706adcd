// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine startup and shutdown.
//!
//! Startup order: lock file first (two engines must never share a data
//! dir), then the store, then boot recovery, then the pool, and the
//! streaming hub last. Recovery runs before any work is accepted.

use crate::env::EngineEnv;
use fs2::FileExt;
use qm_core::SystemClock;
use qm_engine::{
    AgentExecutionManager, AuthReader, ContainerDaemon, ContainerPool, DockerCli, EventHub,
    ExecutionLogs, ManagerDeps, PatchEngine, PoolConfig, RecoveryManager, TaskGraphManager,
};
use qm_storage::Store;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

pub const STORE_FILE: &str = "quartermaster.db";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("another engine owns {0} (lock held)")]
    LockFailed(std::path::PathBuf),

    #[error("store: {0}")]
    Store(#[from] qm_storage::StoreError),
}

/// Shared handles every request handler gets.
pub struct DaemonCtx {
    pub manager: Arc<AgentExecutionManager>,
    pub env: EngineEnv,
    pub start_time: Instant,
}

/// A started engine, plus the resources shutdown must release.
pub struct DaemonState {
    pub ctx: Arc<DaemonCtx>,
    lock_file: std::fs::File,
    sweeper: tokio::task::JoinHandle<()>,
    stream_task: Option<tokio::task::JoinHandle<()>>,
}

/// Bring the engine up. The container daemon being down is not fatal;
/// tool calls will report `unavailable` until it returns.
pub async fn startup(env: EngineEnv) -> Result<DaemonState, LifecycleError> {
    let data_dir = env.engine_root.join("data");
    let logs_dir = env.engine_root.join("logs");
    std::fs::create_dir_all(&data_dir)?;
    std::fs::create_dir_all(&logs_dir)?;

    // Lock first; everything after assumes exclusive ownership
    let lock_path = env.engine_root.join("engine.lock");
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    lock_file.try_lock_exclusive().map_err(|_| LifecycleError::LockFailed(lock_path))?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    let store = Arc::new(Store::open(&data_dir.join(STORE_FILE))?);
    let clock: Arc<dyn qm_core::Clock> = Arc::new(SystemClock);
    let daemon: Arc<dyn ContainerDaemon> = Arc::new(DockerCli::new());
    let auth = Arc::new(AuthReader::new(Arc::clone(&clock)));
    let hub = EventHub::new(Arc::clone(&clock));

    // Reconcile persisted state with reality before accepting work
    let recovery =
        RecoveryManager::new(Arc::clone(&store), Arc::clone(&daemon), Arc::clone(&clock));
    recovery.run().await;

    let pool_config = PoolConfig { debug_no_cleanup: env.debug_no_cleanup, ..PoolConfig::default() };
    let pool = Arc::new(ContainerPool::new(
        Arc::clone(&daemon),
        Arc::clone(&store),
        Arc::clone(&auth),
        hub.clone(),
        Arc::clone(&clock),
        pool_config,
    ));
    if env.secure_execution {
        if let Err(e) = pool.init().await {
            tracing::warn!(error = %e, "container pool init failed; runs will be unavailable");
        }
    } else {
        tracing::warn!("secure execution disabled; runs will be unavailable");
    }

    let patches =
        Arc::new(PatchEngine::new(Arc::clone(&daemon), Arc::clone(&store), Arc::clone(&clock)));
    let manager = Arc::new(AgentExecutionManager::new(ManagerDeps {
        pool,
        patches,
        store: Arc::clone(&store),
        auth,
        logs: ExecutionLogs::new(logs_dir),
        tasks: Arc::new(TaskGraphManager::new(Arc::clone(&clock))),
        hub: hub.clone(),
        clock,
    }));
    let sweeper = manager.spawn_sweeper();

    let ctx = Arc::new(DaemonCtx { manager, env, start_time: Instant::now() });

    let stream_task = if ctx.env.streaming_enabled {
        match crate::stream::serve(Arc::clone(&ctx), ctx.env.stream_port).await {
            Ok(task) => Some(task),
            Err(e) => {
                tracing::warn!(error = %e, "streaming hub failed to start");
                None
            }
        }
    } else {
        None
    };

    tracing::info!(root = %ctx.env.engine_root.display(), "engine started");
    Ok(DaemonState { ctx, lock_file, sweeper, stream_task })
}

impl DaemonState {
    /// Graceful teardown: stop background loops, then the pool.
    pub async fn shutdown(self) {
        self.sweeper.abort();
        if let Some(stream) = self.stream_task {
            stream.abort();
        }
        self.ctx.manager.pool().shutdown().await;
        if let Err(e) = fs2::FileExt::unlock(&self.lock_file) {
            tracing::debug!(error = %e, "lock release failed");
        }
        tracing::info!("engine stopped");
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
