// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container daemon abstraction.
//!
//! Everything the engine wants from the container runtime goes through
//! [`ContainerDaemon`], so the pool, patch engine, and recovery manager can
//! be driven against [`FakeDaemon`] in tests. The production implementation
//! is [`DockerCli`], which shells out to the docker CLI (it honors
//! `DOCKER_HOST` from the environment).

mod docker;
#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use docker::DockerCli;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeDaemon;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    /// The daemon itself is unreachable.
    #[error("container daemon unavailable: {0}")]
    Unavailable(String),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container command failed: {0}")]
    CommandFailed(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Container creation parameters.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub name: String,
    pub image: String,
    pub labels: Vec<(String, String)>,
    pub env: Vec<(String, String)>,
    /// CPU cores granted to the sandbox.
    pub cpus: f64,
    pub memory_mb: u64,
    /// Network the container joins; the pool pre-creates a restricted one.
    pub network: Option<String>,
}

/// Exec parameters beyond the command itself.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub user: Option<String>,
    pub workdir: Option<String>,
}

impl ExecOptions {
    /// Run as the sandbox's unprivileged user inside `/workspace`.
    pub fn workspace_user() -> Self {
        Self { user: Some("agent".to_string()), workdir: Some("/workspace".to_string()) }
    }

    pub fn root() -> Self {
        Self { user: Some("root".to_string()), workdir: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { exit_code: 0, stdout: stdout.into(), stderr: String::new() }
    }

    pub fn err(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self { exit_code, stdout: String::new(), stderr: stderr.into() }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One container as reported by the daemon.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub name: String,
    pub running: bool,
    pub labels: HashMap<String, String>,
    pub created_at_ms: i64,
}

/// The engine's view of the container runtime.
#[async_trait]
pub trait ContainerDaemon: Send + Sync {
    /// Cheap liveness probe of the daemon itself.
    async fn ping(&self) -> Result<(), DaemonError>;

    async fn image_exists(&self, image: &str) -> Result<bool, DaemonError>;

    /// Build `image` from an in-memory Dockerfile.
    async fn build_image(&self, image: &str, dockerfile: &str) -> Result<(), DaemonError>;

    /// Ensure a bridge network exists (no-op when it already does).
    async fn ensure_network(&self, network: &str) -> Result<(), DaemonError>;

    /// Create a stopped container; returns nothing, the name is the handle.
    async fn create(&self, opts: &CreateOptions) -> Result<(), DaemonError>;

    async fn start(&self, name: &str) -> Result<(), DaemonError>;

    async fn stop(&self, name: &str) -> Result<(), DaemonError>;

    async fn remove(&self, name: &str) -> Result<(), DaemonError>;

    async fn is_running(&self, name: &str) -> Result<bool, DaemonError>;

    /// Containers carrying `label` (key match), running or not.
    async fn list_labeled(&self, label: &str) -> Result<Vec<ContainerInfo>, DaemonError>;

    /// Run a command inside a running container and wait for it.
    async fn exec(
        &self,
        name: &str,
        cmd: &[&str],
        opts: &ExecOptions,
    ) -> Result<ExecOutput, DaemonError>;

    /// Tar-stream `host_path` into the container's `/workspace`, honoring
    /// the exclude patterns.
    async fn copy_workspace_in(
        &self,
        name: &str,
        host_path: &Path,
        excludes: &[&str],
    ) -> Result<(), DaemonError>;
}
