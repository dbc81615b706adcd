// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The stdio listener.
//!
//! Reads one JSON request per line from stdin and writes one JSON
//! response per line to stdout. Each request is handled on its own task
//! so a long agent run never blocks an unrelated status poll; responses
//! are serialized through a shared writer lock.

use crate::handlers;
use crate::lifecycle::DaemonCtx;
use crate::protocol::{Request, Response};
use qm_core::EngineError;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Run until stdin closes or `shutdown` fires.
pub async fn run(ctx: Arc<DaemonCtx>, shutdown: CancellationToken) {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    serve(ctx, stdin, stdout, shutdown).await;
}

/// Generic over the streams so tests can drive the loop with buffers.
pub(crate) async fn serve<R, W>(
    ctx: Arc<DaemonCtx>,
    reader: BufReader<R>,
    writer: Arc<Mutex<W>>,
    shutdown: CancellationToken,
) where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("stdin closed, listener stopping");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let response = Response::fail(
                    serde_json::Value::Null,
                    &EngineError::invalid_params(format!("unparseable request: {e}")),
                );
                write_response(&writer, &response).await;
                continue;
            }
        };

        let ctx = Arc::clone(&ctx);
        let writer = Arc::clone(&writer);
        tokio::spawn(async move {
            let response = handlers::dispatch(&ctx, request).await;
            write_response(&writer, &response).await;
        });
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &Arc<Mutex<W>>, response: &Response) {
    let mut line = match serde_json::to_string(response) {
        Ok(line) => line,
        Err(e) => {
            tracing::error!(error = %e, "response serialization failed");
            return;
        }
    };
    line.push('\n');
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write_all(line.as_bytes()).await {
        tracing::warn!(error = %e, "stdout write failed");
    }
    let _ = writer.flush().await;
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
