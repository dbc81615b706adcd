// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine health, logs, and dashboard tools.

use crate::lifecycle::DaemonCtx;
use crate::protocol::{ListLogsArgs, Request, ToolResult, ViewLogsArgs};
use qm_core::EngineError;
use qm_engine::LogSort;
use std::sync::Arc;

pub async fn system_status(ctx: &Arc<DaemonCtx>) -> Result<ToolResult, EngineError> {
    let status = ctx.manager.system_status().await;
    let text = format!(
        "Pool: {} warm / {} in use. Jobs: {} running, {} waiting for input, \
         {} completed, {} failed. {} pending patch(es), {} active session(s). \
         Auth: {}. Streaming: {}.",
        status.pool.warm,
        status.pool.in_use,
        status.jobs.running + status.jobs.started,
        status.jobs.needs_input,
        status.jobs.completed,
        status.jobs.failed,
        status.pending_patches,
        status.active_sessions,
        if status.auth.authenticated { "ok" } else { "unavailable" },
        if ctx.env.streaming_enabled { "enabled" } else { "disabled" },
    );
    Ok(ToolResult::with_data(text, serde_json::to_value(&status).unwrap_or_default()))
}

pub fn view_container_logs(
    ctx: &Arc<DaemonCtx>,
    request: &Request,
) -> Result<ToolResult, EngineError> {
    let args: ViewLogsArgs = request.parse_args()?;
    let content = ctx
        .manager
        .logs()
        .read(&args.identifier, args.tail, args.filter.as_deref())
        .ok_or_else(|| {
            EngineError::not_found(format!("no log matching: {}", args.identifier))
        })?;
    Ok(ToolResult::text(content))
}

pub fn list_container_logs(
    ctx: &Arc<DaemonCtx>,
    request: &Request,
) -> Result<ToolResult, EngineError> {
    let args: ListLogsArgs = request.parse_args()?;
    let sort = match args.sort_by.as_deref() {
        None => LogSort::Modified,
        Some(raw) => LogSort::parse(raw)
            .ok_or_else(|| EngineError::invalid_params(format!("unknown sortBy: {raw}")))?,
    };
    let logs = ctx.manager.logs().list(args.limit.unwrap_or(20), sort);
    if logs.is_empty() {
        return Ok(ToolResult::text("No execution logs."));
    }
    let mut text = format!("{} log file(s):\n", logs.len());
    for log in &logs {
        text.push_str(&format!("- {} ({} bytes)\n", log.name, log.size_bytes));
    }
    Ok(ToolResult::with_data(text, serde_json::to_value(&logs).unwrap_or_default()))
}

pub fn dashboard_status(ctx: &Arc<DaemonCtx>) -> Result<ToolResult, EngineError> {
    let url = format!("http://localhost:{}", ctx.env.stream_port);
    if ctx.env.streaming_enabled {
        Ok(ToolResult::with_data(
            format!("Dashboard streaming at {url} ({} client(s) connected).",
                ctx.manager.hub().subscriber_count()),
            serde_json::json!({ "enabled": true, "url": url }),
        ))
    } else {
        Ok(ToolResult::with_data(
            "Streaming is disabled; set CLAUDE_PARALLEL_WORK_ENABLE_STREAMING=true.",
            serde_json::json!({ "enabled": false }),
        ))
    }
}

pub async fn open_dashboard(ctx: &Arc<DaemonCtx>) -> Result<ToolResult, EngineError> {
    if !ctx.env.streaming_enabled {
        return Err(EngineError::precondition_failed(
            "streaming is disabled; set CLAUDE_PARALLEL_WORK_ENABLE_STREAMING=true",
        ));
    }
    let url = format!("http://localhost:{}", ctx.env.stream_port);
    let opener = if cfg!(target_os = "macos") { "open" } else { "xdg-open" };
    match tokio::process::Command::new(opener).arg(&url).spawn() {
        Ok(_) => Ok(ToolResult::text(format!("Opened {url}."))),
        Err(e) => Ok(ToolResult::text(format!(
            "Could not launch a browser ({e}); open {url} manually."
        ))),
    }
}
