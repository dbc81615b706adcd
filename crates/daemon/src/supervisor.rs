// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor: spawns the engine as a child, pipes standard streams
//! through untouched, and restarts it on crash with bounded exponential
//! backoff. All configuration is environment-driven (`MCP_SUPERVISOR_*`).

use crate::env::parsed;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

/// Crash history is bounded; older entries age out of the window anyway.
const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Give up after this many crashes inside the window.
    pub max_crashes: usize,
    pub crash_window: Duration,
    /// SIGTERM-to-SIGKILL grace on shutdown.
    pub grace: Duration,
    pub health_interval: Duration,
    pub max_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_crashes: 10,
            crash_window: Duration::from_secs(60),
            grace: Duration::from_secs(30),
            health_interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_crashes: parsed("MCP_SUPERVISOR_MAX_CRASHES", default.max_crashes),
            crash_window: Duration::from_millis(parsed(
                "MCP_SUPERVISOR_CRASH_WINDOW_MS",
                default.crash_window.as_millis() as u64,
            )),
            grace: Duration::from_millis(parsed(
                "MCP_SUPERVISOR_GRACE_MS",
                default.grace.as_millis() as u64,
            )),
            health_interval: Duration::from_millis(parsed(
                "MCP_SUPERVISOR_HEALTH_INTERVAL_MS",
                default.health_interval.as_millis() as u64,
            )),
            max_backoff: Duration::from_millis(parsed(
                "MCP_SUPERVISOR_MAX_BACKOFF_MS",
                default.max_backoff.as_millis() as u64,
            )),
        }
    }
}

/// One observed child exit.
#[derive(Debug, Clone, Copy)]
pub struct CrashRecord {
    pub at_ms: i64,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

/// Sliding-window crash accounting, separated from process plumbing so
/// the policy is testable.
#[derive(Debug)]
pub struct CrashWindow {
    records: VecDeque<CrashRecord>,
    window_ms: i64,
    max_crashes: usize,
}

impl CrashWindow {
    pub fn new(window: Duration, max_crashes: usize) -> Self {
        Self { records: VecDeque::new(), window_ms: window.as_millis() as i64, max_crashes }
    }

    /// Record a crash; returns false when the restart budget is exhausted.
    pub fn record(&mut self, crash: CrashRecord) -> bool {
        self.records.push_back(crash);
        if self.records.len() > MAX_HISTORY {
            self.records.pop_front();
        }
        self.in_window(crash.at_ms) <= self.max_crashes
    }

    /// Crashes inside the window ending at `now_ms`.
    pub fn in_window(&self, now_ms: i64) -> usize {
        self.records
            .iter()
            .filter(|c| now_ms.saturating_sub(c.at_ms) <= self.window_ms)
            .count()
    }

    pub fn history(&self) -> impl Iterator<Item = &CrashRecord> {
        self.records.iter()
    }
}

/// Exponential backoff: 1 s, 2 s, 4 s, 8 s, capped.
pub fn backoff_for(restart: u32, cap: Duration) -> Duration {
    let exp = restart.min(30);
    Duration::from_secs(1u64 << exp).min(cap)
}

pub struct Supervisor {
    config: SupervisorConfig,
    engine: PathBuf,
    args: Vec<String>,
    crashes: CrashWindow,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, engine: PathBuf, args: Vec<String>) -> Self {
        let crashes = CrashWindow::new(config.crash_window, config.max_crashes);
        Self { config, engine, args, crashes }
    }

    /// Supervise until the restart budget is exhausted or a termination
    /// signal arrives. Returns the process exit code.
    pub async fn run(&mut self) -> i32 {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "signal handler installation failed");
                return 1;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "signal handler installation failed");
                return 1;
            }
        };
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "signal handler installation failed");
                return 1;
            }
        };

        let mut restarts: u32 = 0;
        loop {
            let mut child = match tokio::process::Command::new(&self.engine)
                .args(&self.args)
                .spawn()
            {
                Ok(child) => child,
                Err(e) => {
                    tracing::error!(engine = %self.engine.display(), error = %e, "engine spawn failed");
                    return 1;
                }
            };
            let pid = child.id();
            tracing::info!(pid, "engine child started");

            let mut health = tokio::time::interval(self.config.health_interval);
            health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            health.tick().await;

            enum Wake {
                Exited(Option<std::process::ExitStatus>),
                Signal,
                Healthy,
                PidLost,
            }

            let status = loop {
                let wake = tokio::select! {
                    status = child.wait() => Wake::Exited(status.ok()),
                    _ = sigint.recv() => Wake::Signal,
                    _ = sigterm.recv() => Wake::Signal,
                    _ = sighup.recv() => Wake::Signal,
                    _ = health.tick() => {
                        // A missing PID is a crash even if wait() has not
                        // resolved yet
                        if pid_alive(pid) { Wake::Healthy } else { Wake::PidLost }
                    }
                };
                match wake {
                    Wake::Healthy => continue,
                    Wake::Exited(status) => break status,
                    Wake::Signal => return self.stop_child(&mut child).await,
                    Wake::PidLost => {
                        tracing::warn!("health check lost the engine PID");
                        break child.try_wait().ok().flatten();
                    }
                }
            };

            let crash = CrashRecord {
                at_ms: now_ms(),
                exit_code: status.and_then(|s| s.code()),
                signal: status.and_then(signal_of),
            };
            tracing::warn!(code = ?crash.exit_code, signal = ?crash.signal, "engine exited");

            if !self.crashes.record(crash) {
                tracing::error!(
                    max = self.config.max_crashes,
                    window_ms = self.config.crash_window.as_millis() as u64,
                    "crash budget exhausted, giving up"
                );
                return crash.exit_code.unwrap_or(1);
            }

            let delay = backoff_for(restarts, self.config.max_backoff);
            restarts = restarts.saturating_add(1);
            tracing::info!(delay_ms = delay.as_millis() as u64, "restarting engine");
            tokio::time::sleep(delay).await;
        }
    }

    /// Forward termination with the grace period, then hard-kill.
    async fn stop_child(&self, child: &mut tokio::process::Child) -> i32 {
        tracing::info!("forwarding termination to engine");
        if let Some(pid) = child.id() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
        match tokio::time::timeout(self.config.grace, child.wait()).await {
            Ok(Ok(status)) => status.code().unwrap_or(0),
            Ok(Err(_)) => 1,
            Err(_) => {
                tracing::warn!("grace period expired, killing engine");
                let _ = child.kill().await;
                1
            }
        }
    }
}

fn pid_alive(pid: Option<u32>) -> bool {
    let Some(pid) = pid else { return false };
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

fn signal_of(status: std::process::ExitStatus) -> Option<i32> {
    std::os::unix::process::ExitStatusExt::signal(&status)
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
