// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The container pool.
//!
//! Maintains two disjoint sets: a warm pool of authenticated idle
//! sandboxes and an in-use map. Warm hand-outs complete in milliseconds;
//! an empty pool falls back to synchronous creation bounded by the
//! credential-configuration timeout. Extraction sandboxes are created
//! fresh, never pooled, and are managed by the execution manager for
//! their whole lifecycle.

use crate::auth::{AuthReader, CredentialKind};
use crate::daemon::{ContainerDaemon, CreateOptions, DaemonError, ExecOptions};
use crate::events::EventHub;
use parking_lot::Mutex;
use qm_core::{labels, BoxId, Clock, LifecycleStatus, PoolStatus, SandboxRecord, StreamEventKind};
use qm_storage::{Store, StoreError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Paths excluded when tar-streaming a host workspace into a sandbox:
/// version-control metadata, dependency directories, build outputs, OS
/// junk, and common caches.
pub const SEED_EXCLUDES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "vendor",
    "target",
    "dist",
    "build",
    "out",
    ".venv",
    "venv",
    "__pycache__",
    ".DS_Store",
    "Thumbs.db",
    ".cache",
    ".next",
    ".turbo",
    "coverage",
];

/// Image built for sandboxes when absent from the daemon.
const SANDBOX_DOCKERFILE: &str = r#"
FROM node:20-slim
RUN apt-get update \
    && apt-get install -y --no-install-recommends git patch ca-certificates curl \
    && rm -rf /var/lib/apt/lists/* \
    && npm install -g @anthropic-ai/claude-code
RUN useradd -m agent && mkdir -p /workspace && chown agent:agent /workspace
WORKDIR /workspace
"#;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool is not initialized")]
    NotInitialized,

    /// Synchronous creation exceeded the credential-configuration window.
    #[error("credential configuration timed out")]
    AuthTimeout,

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub image: String,
    pub network: String,
    pub warm_target: usize,
    pub warm_max: usize,
    pub cpus: f64,
    pub memory_mb: u64,
    pub auth_wait: Duration,
    /// Leave sandboxes behind after runs for debugging.
    pub debug_no_cleanup: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            image: "quartermaster-sandbox:latest".to_string(),
            network: "quartermaster-net".to_string(),
            warm_target: 3,
            warm_max: 10,
            cpus: 2.0,
            memory_mb: 2048,
            auth_wait: Duration::from_secs(5),
            debug_no_cleanup: false,
        }
    }
}

/// Per-acquire resource overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxOverrides {
    pub cpus: Option<f64>,
    pub memory_mb: Option<u64>,
}

/// A handle to one sandbox. Records can be revived from the store by id;
/// this handle carries only what call sites need.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub id: BoxId,
    pub name: String,
    pub task_id: Option<String>,
    pub workspace: Option<PathBuf>,
    pub pool_managed: bool,
}

#[derive(Default)]
struct PoolInner {
    warm: Vec<Sandbox>,
    in_use: HashMap<BoxId, Sandbox>,
}

/// Warm/in-use counts for status reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolCounts {
    pub warm: usize,
    pub in_use: usize,
}

pub struct ContainerPool {
    daemon: Arc<dyn ContainerDaemon>,
    store: Arc<Store>,
    auth: Arc<AuthReader>,
    hub: EventHub,
    clock: Arc<dyn Clock>,
    config: PoolConfig,
    inner: Mutex<PoolInner>,
    replenish: Mutex<Vec<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl ContainerPool {
    pub fn new(
        daemon: Arc<dyn ContainerDaemon>,
        store: Arc<Store>,
        auth: Arc<AuthReader>,
        hub: EventHub,
        clock: Arc<dyn Clock>,
        config: PoolConfig,
    ) -> Self {
        Self {
            daemon,
            store,
            auth,
            hub,
            clock,
            config,
            inner: Mutex::new(PoolInner::default()),
            replenish: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn daemon(&self) -> Arc<dyn ContainerDaemon> {
        Arc::clone(&self.daemon)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> PoolCounts {
        let inner = self.inner.lock();
        PoolCounts { warm: inner.warm.len(), in_use: inner.in_use.len() }
    }

    /// Ping the daemon, make sure image and network exist, then fill the
    /// warm pool asynchronously.
    pub async fn init(self: &Arc<Self>) -> Result<(), PoolError> {
        self.daemon.ping().await?;
        self.daemon.ensure_network(&self.config.network).await?;
        if !self.daemon.image_exists(&self.config.image).await? {
            tracing::info!(image = %self.config.image, "building sandbox image");
            self.daemon.build_image(&self.config.image, SANDBOX_DOCKERFILE).await?;
        }
        self.initialized.store(true, Ordering::SeqCst);
        for _ in 0..self.config.warm_target {
            self.spawn_warm_fill();
        }
        Ok(())
    }

    /// Fast-path hand-out. Pops a warm sandbox when one is ready; creates
    /// synchronously otherwise, bounded by the credential wait.
    pub async fn acquire(
        self: &Arc<Self>,
        workspace: &Path,
        overrides: SandboxOverrides,
        task_id: Option<&str>,
        force_new: bool,
    ) -> Result<Sandbox, PoolError> {
        if !self.is_initialized() {
            return Err(PoolError::NotInitialized);
        }

        let warm = if force_new { None } else { self.inner.lock().warm.pop() };
        let mut sandbox = match warm {
            Some(sandbox) => sandbox,
            None => self.create_configured(overrides, task_id, true, true).await?,
        };
        sandbox.task_id = task_id.map(str::to_string);
        sandbox.workspace = Some(workspace.to_path_buf());
        self.inner.lock().in_use.insert(sandbox.id.clone(), sandbox.clone());
        self.update_record(&sandbox, PoolStatus::InUse, LifecycleStatus::Running);

        self.seed_workspace(&sandbox, workspace).await?;
        self.spawn_warm_fill_if_below_target();
        Ok(sandbox)
    }

    /// Create a fresh sandbox outside pool membership, seed it, and hand
    /// the raw handle to the caller. Used for runs that end in patch
    /// extraction; the execution manager owns the whole lifecycle.
    pub async fn acquire_for_extraction(
        self: &Arc<Self>,
        workspace: &Path,
        overrides: SandboxOverrides,
        task_id: Option<&str>,
    ) -> Result<Sandbox, PoolError> {
        if !self.is_initialized() {
            return Err(PoolError::NotInitialized);
        }
        let mut sandbox = self.create_configured(overrides, task_id, false, true).await?;
        sandbox.workspace = Some(workspace.to_path_buf());
        self.update_record(&sandbox, PoolStatus::InUse, LifecycleStatus::Running);
        self.seed_workspace(&sandbox, workspace).await?;
        Ok(sandbox)
    }

    /// Return a sandbox to the pool. Destroys it when cleanup is requested
    /// or the warm pool is at capacity; otherwise resets `/workspace` and
    /// requeues it as ready.
    pub async fn release(&self, sandbox: Sandbox, cleanup: bool) {
        self.inner.lock().in_use.remove(&sandbox.id);

        let warm_full = self.inner.lock().warm.len() >= self.config.warm_max;
        if cleanup || warm_full || !sandbox.pool_managed {
            self.destroy(&sandbox).await;
            return;
        }

        // Empty /workspace in place; a failed reset poisons the sandbox.
        let reset = self
            .daemon
            .exec(
                &sandbox.name,
                &["sh", "-c", "find /workspace -mindepth 1 -delete"],
                &ExecOptions::root(),
            )
            .await;
        match reset {
            Ok(out) if out.success() => {
                let mut requeued = sandbox;
                requeued.task_id = None;
                requeued.workspace = None;
                self.update_record(&requeued, PoolStatus::Ready, LifecycleStatus::Running);
                self.inner.lock().warm.push(requeued);
            }
            Ok(out) => {
                tracing::warn!(name = %sandbox.name, stderr = %out.stderr, "workspace reset failed");
                self.update_record(&sandbox, PoolStatus::Error, LifecycleStatus::Running);
                self.destroy(&sandbox).await;
            }
            Err(e) => {
                tracing::warn!(name = %sandbox.name, error = %e, "workspace reset failed");
                self.update_record(&sandbox, PoolStatus::Error, LifecycleStatus::Running);
                self.destroy(&sandbox).await;
            }
        }
    }

    /// Stop and remove a sandbox, best-effort. Failures are logged and
    /// swallowed; the next recovery pass collects leftovers.
    pub async fn destroy(&self, sandbox: &Sandbox) {
        if self.config.debug_no_cleanup {
            tracing::info!(name = %sandbox.name, "debug flag set, preserving sandbox");
            return;
        }
        if let Err(e) = self.daemon.stop(&sandbox.name).await {
            tracing::debug!(name = %sandbox.name, error = %e, "sandbox stop failed");
        }
        if let Err(e) = self.daemon.remove(&sandbox.name).await {
            tracing::debug!(name = %sandbox.name, error = %e, "sandbox remove failed");
        }
        self.update_record(sandbox, PoolStatus::Cleanup, LifecycleStatus::Stopped);
        self.hub.emit(
            StreamEventKind::ContainerStopped,
            serde_json::json!({ "containerId": sandbox.id.as_str(), "name": sandbox.name }),
        );
    }

    /// Stop a sandbox without removing it (question/answer sessions keep
    /// theirs alive; runs stop them pending review).
    pub async fn stop_sandbox(&self, sandbox: &Sandbox) {
        if self.config.debug_no_cleanup {
            return;
        }
        if let Err(e) = self.daemon.stop(&sandbox.name).await {
            tracing::debug!(name = %sandbox.name, error = %e, "sandbox stop failed");
        }
        self.update_record(sandbox, PoolStatus::Cleanup, LifecycleStatus::Stopped);
        self.hub.emit(
            StreamEventKind::ContainerStopped,
            serde_json::json!({ "containerId": sandbox.id.as_str(), "name": sandbox.name }),
        );
    }

    /// Await pending background creations, then stop and remove every
    /// sandbox in both sets.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.replenish.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::debug!(error = %e, "replenish task aborted");
            }
        }

        let sandboxes: Vec<Sandbox> = {
            let mut inner = self.inner.lock();
            let mut sandboxes: Vec<Sandbox> = inner.warm.drain(..).collect();
            sandboxes.extend(inner.in_use.drain().map(|(_, s)| s));
            sandboxes
        };
        for sandbox in sandboxes {
            self.destroy(&sandbox).await;
        }
    }

    // --- internals ---

    /// Create, start, and configure one sandbox. `bounded` applies the
    /// credential-configuration timeout (the synchronous-acquire path).
    async fn create_configured(
        self: &Arc<Self>,
        overrides: SandboxOverrides,
        task_id: Option<&str>,
        pool_managed: bool,
        bounded: bool,
    ) -> Result<Sandbox, PoolError> {
        let sandbox = self.create_raw(overrides, task_id, pool_managed).await?;
        let configure = self.inject_credential(&sandbox);
        if bounded {
            match tokio::time::timeout(self.config.auth_wait, configure).await {
                Ok(result) => result?,
                Err(_) => {
                    self.destroy(&sandbox).await;
                    return Err(PoolError::AuthTimeout);
                }
            }
        } else {
            configure.await?;
        }
        Ok(sandbox)
    }

    async fn create_raw(
        &self,
        overrides: SandboxOverrides,
        task_id: Option<&str>,
        pool_managed: bool,
    ) -> Result<Sandbox, PoolError> {
        let id = BoxId::new();
        let name = format!("qm-{}", id.short(12));
        let managed = if pool_managed { "1" } else { "0" };
        let mut label_pairs = vec![
            (labels::OWNER.to_string(), "1".to_string()),
            (labels::POOL_MANAGED.to_string(), managed.to_string()),
        ];
        if let Some(task) = task_id {
            label_pairs.push((labels::TASK_ID.to_string(), task.to_string()));
        }

        let opts = CreateOptions {
            name: name.clone(),
            image: self.config.image.clone(),
            labels: label_pairs,
            env: Vec::new(),
            cpus: overrides.cpus.unwrap_or(self.config.cpus),
            memory_mb: overrides.memory_mb.unwrap_or(self.config.memory_mb),
            network: Some(self.config.network.clone()),
        };
        self.daemon.create(&opts).await?;
        self.daemon.start(&name).await?;

        let now = self.clock.now_ms();
        let mut record = SandboxRecord::new(id.clone(), &name, now);
        record.task_id = task_id.map(str::to_string);
        if let Err(e) = self.store.save_sandbox_record(&record) {
            tracing::warn!(name = %name, error = %e, "failed to persist sandbox record");
        }

        self.hub.emit(
            StreamEventKind::ContainerStarted,
            serde_json::json!({ "containerId": id.as_str(), "name": name }),
        );

        Ok(Sandbox {
            id,
            name,
            task_id: task_id.map(str::to_string),
            workspace: None,
            pool_managed,
        })
    }

    /// Inject the resolved credential. API keys are exported through the
    /// agent user's shell rc; OAuth tokens are written as a JSON blob to
    /// the two paths the agent checks, owner-only.
    async fn inject_credential(&self, sandbox: &Sandbox) -> Result<(), PoolError> {
        let Some(credential) = self.auth.resolve().await else {
            tracing::warn!(name = %sandbox.name, "no credential available; agent will run unauthenticated");
            return Ok(());
        };

        match credential.kind {
            CredentialKind::ApiKey => {
                let line = format!(
                    "echo 'export ANTHROPIC_API_KEY={}' >> /home/agent/.bashrc",
                    credential.secret
                );
                let out =
                    self.daemon.exec(&sandbox.name, &["sh", "-c", &line], &ExecOptions::root()).await?;
                if !out.success() {
                    return Err(DaemonError::CommandFailed(format!(
                        "credential export failed: {}",
                        out.stderr.trim()
                    ))
                    .into());
                }
            }
            CredentialKind::OauthToken => {
                let blob = serde_json::json!({
                    "claudeAiOauth": {
                        "accessToken": credential.secret,
                        "refreshToken": credential.refresh,
                        "expiresAt": credential.expires_at_ms,
                        "scopes": credential.scopes,
                    }
                })
                .to_string();
                let script = format!(
                    "mkdir -p /home/agent/.claude /root/.claude \
                     && printf '%s' '{blob}' > /home/agent/.claude/.credentials.json \
                     && printf '%s' '{blob}' > /root/.claude/.credentials.json \
                     && chmod 600 /home/agent/.claude/.credentials.json /root/.claude/.credentials.json \
                     && chown agent:agent /home/agent/.claude/.credentials.json"
                );
                let out = self
                    .daemon
                    .exec(&sandbox.name, &["sh", "-c", &script], &ExecOptions::root())
                    .await?;
                if !out.success() {
                    return Err(DaemonError::CommandFailed(format!(
                        "credential write failed: {}",
                        out.stderr.trim()
                    ))
                    .into());
                }
            }
        }

        if let Ok(Some(mut record)) = self.store.get_sandbox_record(sandbox.id.as_str()) {
            record.auth_ready = true;
            if let Err(e) = self.store.save_sandbox_record(&record) {
                tracing::warn!(error = %e, "failed to persist auth flag");
            }
        }
        Ok(())
    }

    /// Copy the host workspace into `/workspace` and normalize ownership
    /// to the sandbox's unprivileged user.
    async fn seed_workspace(&self, sandbox: &Sandbox, workspace: &Path) -> Result<(), PoolError> {
        self.daemon.copy_workspace_in(&sandbox.name, workspace, SEED_EXCLUDES).await?;
        let chown = self
            .daemon
            .exec(&sandbox.name, &["chown", "-R", "agent:agent", "/workspace"], &ExecOptions::root())
            .await?;
        if !chown.success() {
            return Err(DaemonError::CommandFailed(format!(
                "workspace chown failed: {}",
                chown.stderr.trim()
            ))
            .into());
        }

        if let Ok(Some(mut record)) = self.store.get_sandbox_record(sandbox.id.as_str()) {
            record.workspace_ready = true;
            record.workspace = Some(workspace.to_path_buf());
            record.task_id = sandbox.task_id.clone();
            record.last_used_at_ms = self.clock.now_ms();
            if let Err(e) = self.store.save_sandbox_record(&record) {
                tracing::warn!(error = %e, "failed to persist workspace flag");
            }
        }
        Ok(())
    }

    fn update_record(&self, sandbox: &Sandbox, pool: PoolStatus, lifecycle: LifecycleStatus) {
        match self.store.get_sandbox_record(sandbox.id.as_str()) {
            Ok(Some(mut record)) => {
                record.pool_status = pool;
                record.lifecycle_status = lifecycle;
                record.task_id = sandbox.task_id.clone();
                record.last_used_at_ms = self.clock.now_ms();
                if let Err(e) = self.store.save_sandbox_record(&record) {
                    tracing::warn!(error = %e, "failed to persist sandbox record");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "failed to load sandbox record"),
        }
    }

    fn spawn_warm_fill_if_below_target(self: &Arc<Self>) {
        if self.inner.lock().warm.len() < self.config.warm_target {
            self.spawn_warm_fill();
        }
    }

    /// Create one warm sandbox on a background task. The join handle is
    /// tracked so shutdown can await it.
    fn spawn_warm_fill(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move {
            match pool.create_configured(SandboxOverrides::default(), None, true, false).await {
                Ok(sandbox) => {
                    let over_cap = {
                        let mut inner = pool.inner.lock();
                        if inner.warm.len() >= pool.config.warm_max {
                            true
                        } else {
                            inner.warm.push(sandbox.clone());
                            false
                        }
                    };
                    if over_cap {
                        pool.destroy(&sandbox).await;
                    } else {
                        pool.update_record(&sandbox, PoolStatus::Ready, LifecycleStatus::Running);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "warm sandbox creation failed"),
            }
        });
        let mut handles = self.replenish.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
