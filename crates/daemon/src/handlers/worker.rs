// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background-run tools: launch, poll, answer.

use crate::lifecycle::DaemonCtx;
use crate::protocol::{
    AnswerArgs, Request, TaskWorkerArgs, ToolResult, WorkStatusArgs,
};
use qm_core::{EngineError, ReturnMode};
use qm_engine::{RunRequest, SandboxOverrides};
use std::sync::Arc;

pub async fn task_worker(
    ctx: &Arc<DaemonCtx>,
    request: &Request,
) -> Result<ToolResult, EngineError> {
    let args: TaskWorkerArgs = request.parse_args()?;
    if args.task.trim().is_empty() {
        return Err(EngineError::invalid_params("task prompt must not be empty"));
    }
    if !args.work_folder.is_dir() {
        return Err(EngineError::invalid_params(format!(
            "workFolder does not exist: {}",
            args.work_folder.display()
        )));
    }

    let return_mode = match args.return_mode.as_deref() {
        None | Some("summary") => ReturnMode::Summary,
        Some("full") => ReturnMode::Full,
        Some(other) => {
            return Err(EngineError::invalid_params(format!("unknown returnMode: {other}")))
        }
    };

    let run = RunRequest {
        prompt: args.task,
        work_folder: args.work_folder,
        task_description: args.task_description,
        task_id: args.task_id,
        overrides: SandboxOverrides { cpus: args.cpus, memory_mb: args.memory_mb },
        return_mode,
    };
    let job_id = ctx.manager.start_background(run).await?;
    Ok(ToolResult::with_data(
        format!("Background worker started. Poll with work_status(taskId: \"{job_id}\")."),
        serde_json::json!({ "jobId": job_id.as_str() }),
    ))
}

pub fn work_status(ctx: &Arc<DaemonCtx>, request: &Request) -> Result<ToolResult, EngineError> {
    let args: WorkStatusArgs = request.parse_args()?;

    if let Some(job_id) = &args.task_id {
        let job = ctx
            .manager
            .get_job(job_id)
            .ok_or_else(|| EngineError::not_found(format!("no such job: {job_id}")))?;
        let mut text = format!("Job {} is {}.", job.id, job.status);
        if let Some(progress) = &job.progress {
            text.push_str(&format!(" Progress: {progress}."));
        }
        if let Some(question) = &job.pending_question {
            text.push_str(&format!(" Waiting on: {question}"));
        }
        if let Some(error) = &job.error {
            text.push_str(&format!(" Error: {error}"));
        }
        if let Some(result) = &job.result {
            text.push_str(&format!("\n\n{result}"));
        }
        let data = serde_json::to_value(&job).unwrap_or_default();
        return Ok(ToolResult::with_data(text, data));
    }

    // Plan view: the task graph for a workspace
    let work_folder = args
        .work_folder
        .or(args.plan_id.map(std::path::PathBuf::from))
        .ok_or_else(|| EngineError::invalid_params("taskId or planId/workFolder required"))?;
    let buckets = ctx.manager.tasks().list_tasks(&work_folder, None).map_err(EngineError::from)?;
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

pub async fn answer_worker_question(
    ctx: &Arc<DaemonCtx>,
    request: &Request,
) -> Result<ToolResult, EngineError> {
    let args: AnswerArgs = request.parse_args()?;
    if args.answer.trim().is_empty() {
        return Err(EngineError::invalid_params("answer must not be empty"));
    }
    ctx.manager.answer_question(&args.task_id, &args.answer).await?;
    Ok(ToolResult::text(format!(
        "Answer delivered; job {} is running again.",
        args.task_id
    )))
}
