// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory [`ContainerDaemon`] for tests.
//!
//! Containers are rows in a map; exec is scripted through a handler
//! closure. Every call is recorded so tests can assert on the sequence of
//! daemon operations.

use super::{ContainerDaemon, ContainerInfo, CreateOptions, DaemonError, ExecOptions, ExecOutput};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

type ExecHandler = dyn Fn(&str, &[&str]) -> ExecOutput + Send + Sync;

#[derive(Debug, Clone)]
struct FakeContainer {
    running: bool,
    labels: HashMap<String, String>,
    created_at_ms: i64,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    exec_calls: Vec<(String, Vec<String>)>,
    copy_calls: Vec<(String, String)>,
    images: Vec<String>,
    networks: Vec<String>,
    unavailable: bool,
}

/// Scriptable in-memory daemon.
#[derive(Clone, Default)]
pub struct FakeDaemon {
    state: Arc<Mutex<FakeState>>,
    exec_handler: Arc<Mutex<Option<Arc<ExecHandler>>>>,
}

impl FakeDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every daemon call fail as if the daemon were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Script exec results. The handler receives the container name and the
    /// command; unmatched commands should return `ExecOutput::ok("")`.
    pub fn on_exec(&self, handler: impl Fn(&str, &[&str]) -> ExecOutput + Send + Sync + 'static) {
        *self.exec_handler.lock() = Some(Arc::new(handler));
    }

    /// Directly insert a container (for recovery tests).
    pub fn insert_container(
        &self,
        name: &str,
        running: bool,
        labels: &[(&str, &str)],
        created_at_ms: i64,
    ) {
        self.state.lock().containers.insert(
            name.to_string(),
            FakeContainer {
                running,
                labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                created_at_ms,
            },
        );
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().containers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn container_exists(&self, name: &str) -> bool {
        self.state.lock().containers.contains_key(name)
    }

    /// Every exec call so far, as `(container, argv)`.
    pub fn exec_calls(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().exec_calls.clone()
    }

    /// Every workspace copy so far, as `(container, host_path)`.
    pub fn copy_calls(&self) -> Vec<(String, String)> {
        self.state.lock().copy_calls.clone()
    }

    fn check_available(&self) -> Result<(), DaemonError> {
        if self.state.lock().unavailable {
            Err(DaemonError::Unavailable("fake daemon down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerDaemon for FakeDaemon {
    async fn ping(&self) -> Result<(), DaemonError> {
        self.check_available()
    }

    async fn image_exists(&self, image: &str) -> Result<bool, DaemonError> {
        self.check_available()?;
        Ok(self.state.lock().images.iter().any(|i| i == image))
    }

    async fn build_image(&self, image: &str, _dockerfile: &str) -> Result<(), DaemonError> {
        self.check_available()?;
        self.state.lock().images.push(image.to_string());
        Ok(())
    }

    async fn ensure_network(&self, network: &str) -> Result<(), DaemonError> {
        self.check_available()?;
        let mut state = self.state.lock();
        if !state.networks.iter().any(|n| n == network) {
            state.networks.push(network.to_string());
        }
        Ok(())
    }

    async fn create(&self, opts: &CreateOptions) -> Result<(), DaemonError> {
        self.check_available()?;
        let mut state = self.state.lock();
        if state.containers.contains_key(&opts.name) {
            return Err(DaemonError::CommandFailed(format!("name in use: {}", opts.name)));
        }
        state.containers.insert(
            opts.name.clone(),
            FakeContainer { running: false, labels: opts.labels.iter().cloned().collect(), created_at_ms: 0 },
        );
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), DaemonError> {
        self.check_available()?;
        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| DaemonError::NotFound(name.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), DaemonError> {
        self.check_available()?;
        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| DaemonError::NotFound(name.to_string()))?;
        container.running = false;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), DaemonError> {
        self.check_available()?;
        self.state
            .lock()
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DaemonError::NotFound(name.to_string()))
    }

    async fn is_running(&self, name: &str) -> Result<bool, DaemonError> {
        self.check_available()?;
        Ok(self.state.lock().containers.get(name).map(|c| c.running).unwrap_or(false))
    }

    async fn list_labeled(&self, label: &str) -> Result<Vec<ContainerInfo>, DaemonError> {
        self.check_available()?;
        let state = self.state.lock();
        let mut infos: Vec<ContainerInfo> = state
            .containers
            .iter()
            .filter(|(_, c)| c.labels.contains_key(label))
            .map(|(name, c)| ContainerInfo {
                name: name.clone(),
                running: c.running,
                labels: c.labels.clone(),
                created_at_ms: c.created_at_ms,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn exec(
        &self,
        name: &str,
        cmd: &[&str],
        _opts: &ExecOptions,
    ) -> Result<ExecOutput, DaemonError> {
        self.check_available()?;
        {
            let mut state = self.state.lock();
            if !state.containers.contains_key(name) {
                return Err(DaemonError::NotFound(name.to_string()));
            }
            state
                .exec_calls
                .push((name.to_string(), cmd.iter().map(|s| s.to_string()).collect()));
        }
        let handler = self.exec_handler.lock().clone();
        Ok(match handler {
            Some(h) => h(name, cmd),
            None => ExecOutput::ok(""),
        })
    }

    async fn copy_workspace_in(
        &self,
        name: &str,
        host_path: &Path,
        _excludes: &[&str],
    ) -> Result<(), DaemonError> {
        self.check_available()?;
        let mut state = self.state.lock();
        if !state.containers.contains_key(name) {
            return Err(DaemonError::NotFound(name.to_string()));
        }
        state.copy_calls.push((name.to_string(), host_path.display().to_string()));
        Ok(())
    }
}
