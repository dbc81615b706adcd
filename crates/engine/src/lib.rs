// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! qm-engine: the orchestration core.
//!
//! Owns the container pool, the in-container patch engine, the agent
//! execution manager, the task graph manager, execution logs, credential
//! resolution, and boot-time recovery. The daemon crate wires these to the
//! tool protocol and the streaming hub.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod auth;
pub mod daemon;
pub mod events;
pub mod logs;
pub mod manager;
pub mod patch;
pub mod pool;
pub mod recovery;
pub mod tasks;

pub use auth::{AuthReader, AuthStatus, Credential, CredentialKind, CredentialSource};
pub use daemon::{
    ContainerDaemon, ContainerInfo, CreateOptions, DaemonError, DockerCli, ExecOptions, ExecOutput,
};
#[cfg(any(test, feature = "test-support"))]
pub use daemon::FakeDaemon;
pub use events::EventHub;
pub use logs::{ExecutionLogs, LogFileInfo, LogSort};
pub use manager::{AgentExecutionManager, ManagerDeps, RunRequest, SystemStatus};
pub use patch::{ApplyOutcome, PatchEngine, PatchError};
pub use pool::{ContainerPool, PoolConfig, PoolError, Sandbox, SandboxOverrides};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use tasks::{TaskBuckets, TaskDetail, TaskGraphManager, TasksError, ValidationReport};
