// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task-graph tools over `<workspace>/tasks.json`.

use crate::lifecycle::DaemonCtx;
use crate::protocol::{
    GetNextTasksArgs, GetTaskArgs, GetTasksArgs, InitProjectArgs, Request, SetTaskStatusArgs,
    ToolResult, ValidateTasksArgs,
};
use qm_core::{EngineError, TaskStatus};
use std::sync::Arc;

pub fn validate_tasks(ctx: &Arc<DaemonCtx>, request: &Request) -> Result<ToolResult, EngineError> {
    let args: ValidateTasksArgs = request.parse_args()?;
    let report = ctx.manager.tasks().validate(&args.work_folder);
    let mut text = if report.valid {
        format!("Manifest valid: {} tasks.", report.stats.total)
    } else {
        format!("Manifest invalid: {} error(s).", report.errors.len())
    };
    for error in &report.errors {
        text.push_str(&format!("\nerror: {error}"));
    }
    for warning in &report.warnings {
        text.push_str(&format!("\nwarning: {warning}"));
    }
    Ok(ToolResult::with_data(text, serde_json::to_value(&report).unwrap_or_default()))
}

pub fn set_task_status(ctx: &Arc<DaemonCtx>, request: &Request) -> Result<ToolResult, EngineError> {
    let args: SetTaskStatusArgs = request.parse_args()?;
    let status = TaskStatus::parse(&args.status)
        .ok_or_else(|| EngineError::invalid_params(format!("unknown status: {}", args.status)))?;
    let updated =
        ctx.manager.tasks().set_status(&args.work_folder, &args.ids, status, args.error)?;
    Ok(ToolResult::text(format!(
        "Updated {} task(s) to {}: {}",
        updated.len(),
        status,
        updated.join(", ")
    )))
}

pub fn get_task(ctx: &Arc<DaemonCtx>, request: &Request) -> Result<ToolResult, EngineError> {
    let args: GetTaskArgs = request.parse_args()?;
    let detail = ctx.manager.tasks().get_task(&args.work_folder, &args.task_id)?;
    let mut text = format!(
        "{} [{}] {} (priority {:?})",
        detail.task.id,
        detail.task.status,
        detail.task.title,
        detail.task.priority
    );
    if detail.blocked {
        text.push_str(" (blocked)");
    }
    Ok(ToolResult::with_data(text, serde_json::to_value(&detail).unwrap_or_default()))
}

pub fn get_tasks(ctx: &Arc<DaemonCtx>, request: &Request) -> Result<ToolResult, EngineError> {
    let args: GetTasksArgs = request.parse_args()?;
    let filter = match args.status.as_deref() {
        None => None,
        Some(raw) => Some(TaskStatus::parse(raw).ok_or_else(|| {
            EngineError::invalid_params(format!("unknown status filter: {raw}"))
        })?),
    };
    let buckets =
        ctx.manager.tasks().list_tasks(&args.work_folder, filter).map_err(EngineError::from)?;
    let text = format!(
        "{} in progress, {} ready, {} blocked, {} done, {} failed.",
        buckets.in_progress.len(),
        buckets.ready.len(),
        buckets.blocked.len(),
        buckets.done.len(),
        buckets.failed.len()
    );
    Ok(ToolResult::with_data(text, serde_json::to_value(&buckets).unwrap_or_default()))
}

pub fn get_next_tasks(ctx: &Arc<DaemonCtx>, request: &Request) -> Result<ToolResult, EngineError> {
    let args: GetNextTasksArgs = request.parse_args()?;
    let ready = ctx.manager.tasks().next_ready(&args.work_folder).map_err(EngineError::from)?;
    if ready.is_empty() {
        return Ok(ToolResult::with_data(
            "No tasks are ready to start.",
            serde_json::json!([]),
        ));
    }
    let mut text = format!("{} task(s) ready to run in parallel:\n", ready.len());
    for task in &ready {
        text.push_str(&format!("- {} [{:?}] {}\n", task.id, task.priority, task.title));
    }
    Ok(ToolResult::with_data(text, serde_json::to_value(&ready).unwrap_or_default()))
}

pub fn init_project(ctx: &Arc<DaemonCtx>, request: &Request) -> Result<ToolResult, EngineError> {
    let args: InitProjectArgs = request.parse_args()?;
    if !args.work_folder.is_dir() {
        return Err(EngineError::invalid_params(format!(
            "workFolder does not exist: {}",
            args.work_folder.display()
        )));
    }
    let path = ctx.manager.tasks().init_project(&args.work_folder, args.force)?;
    Ok(ToolResult::text(format!("Wrote {}.", path.display())))
}
