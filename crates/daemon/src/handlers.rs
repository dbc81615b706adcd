// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-tool request handlers, split by domain.

mod patches;
mod system;
mod taskops;
mod worker;

use crate::lifecycle::DaemonCtx;
use crate::protocol::{Request, Response, ToolResult};
use qm_core::EngineError;
use std::sync::Arc;

/// Route one request to its tool handler.
pub async fn dispatch(ctx: &Arc<DaemonCtx>, request: Request) -> Response {
    let result = route(ctx, &request).await;
    match result {
        Ok(result) => Response::ok(request.id, result),
        Err(e) => {
            tracing::debug!(tool = %request.tool, kind = ?e.kind, "tool error: {}", e.message);
            Response::fail(request.id, &e)
        }
    }
}

async fn route(ctx: &Arc<DaemonCtx>, request: &Request) -> Result<ToolResult, EngineError> {
    match request.tool.as_str() {
        "task_worker" => worker::task_worker(ctx, request).await,
        "work_status" => worker::work_status(ctx, request),
        "answer_worker_question" => worker::answer_worker_question(ctx, request).await,
        "review_changes" => patches::review_changes(ctx, request),
        "apply_changes" => patches::apply_changes(ctx, request).await,
        "reject_changes" => patches::reject_changes(ctx, request).await,
        "request_revision" => patches::request_revision(ctx, request).await,
        "system_status" => system::system_status(ctx).await,
        "view_container_logs" => system::view_container_logs(ctx, request),
        "list_container_logs" => system::list_container_logs(ctx, request),
        "open_dashboard" => system::open_dashboard(ctx).await,
        "dashboard_status" => system::dashboard_status(ctx),
        "validate_tasks" => taskops::validate_tasks(ctx, request),
        "set_task_status" => taskops::set_task_status(ctx, request),
        "get_task" => taskops::get_task(ctx, request),
        "get_tasks" => taskops::get_tasks(ctx, request),
        "get_next_tasks" => taskops::get_next_tasks(ctx, request),
        "init_project" => taskops::init_project(ctx, request),
        other => Err(EngineError::invalid_params(format!("unknown tool: {other}"))),
    }
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
