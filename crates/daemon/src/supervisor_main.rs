// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `qmd-super`: spawns `qmd` with inherited standard streams and keeps
//! it alive across crashes.

use qm_daemon::{Supervisor, SupervisorConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// The engine binary sits next to the supervisor.
fn engine_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("qmd")))
        .unwrap_or_else(|| PathBuf::from("qmd"))
}

#[tokio::main]
async fn main() {
    // Protocol traffic owns stdout; supervisor logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut supervisor = Supervisor::new(SupervisorConfig::from_env(), engine_path(), args);
    let code = supervisor.run().await;
    std::process::exit(code);
}
