// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `qmd`: the Quartermaster engine process.

use qm_daemon::env::EngineEnv;
use qm_daemon::{lifecycle, listener};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing(env: &EngineEnv) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if env.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries the protocol; engine logs go to a file
    let log_dir = env.engine_root.join("logs");
    if std::fs::create_dir_all(&log_dir).is_err() {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        return None;
    }
    let appender = tracing_appender::rolling::daily(log_dir, "engine.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).with_ansi(false).init();
    Some(guard)
}

#[tokio::main]
async fn main() {
    let env = EngineEnv::load();
    let _log_guard = init_tracing(&env);

    let state = match lifecycle::startup(env).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "engine startup failed");
            eprintln!("engine startup failed: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            tracing::info!("termination signal received");
            shutdown.cancel();
        });
    }

    listener::run(Arc::clone(&state.ctx), shutdown).await;
    state.shutdown().await;
}
