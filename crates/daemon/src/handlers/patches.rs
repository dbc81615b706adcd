// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Patch lifecycle tools: review, apply, reject, revise.

use crate::lifecycle::DaemonCtx;
use crate::protocol::{
    ApplyChangesArgs, RejectChangesArgs, Request, RequestRevisionArgs, ReviewChangesArgs,
    ToolResult,
};
use qm_core::{EngineError, Patch};
use std::sync::Arc;

pub fn review_changes(ctx: &Arc<DaemonCtx>, request: &Request) -> Result<ToolResult, EngineError> {
    let args: ReviewChangesArgs = request.parse_args()?;
    let as_json = matches!(args.format.as_deref(), Some("json"));

    match &args.diff_id {
        Some(diff_id) => {
            let patch = ctx.manager.review_patch(diff_id)?;
            if as_json {
                let data = serde_json::to_value(&patch).unwrap_or_default();
                return Ok(ToolResult::with_data(format!("Patch {}", patch.id), data));
            }
            Ok(ToolResult::text(format_patch(&patch, args.show_content)))
        }
        None => {
            let pending = ctx.manager.list_pending_patches();
            if as_json {
                let data = serde_json::to_value(&pending).unwrap_or_default();
                return Ok(ToolResult::with_data(
                    format!("{} pending patches", pending.len()),
                    data,
                ));
            }
            if pending.is_empty() {
                return Ok(ToolResult::text("No pending patches."));
            }
            let mut text = format!("{} pending patch(es):\n", pending.len());
            for patch in &pending {
                text.push_str(&format!(
                    "- {} | {} files, +{} -{} | task {} | {}\n",
                    patch.id,
                    patch.stats.files_changed,
                    patch.stats.additions,
                    patch.stats.deletions,
                    patch.task_id.as_deref().unwrap_or("-"),
                    patch.workspace.display(),
                ));
            }
            Ok(ToolResult::text(text))
        }
    }
}

fn format_patch(patch: &Patch, show_content: bool) -> String {
    let mut text = format!(
        "Patch {} ({} files, +{} -{})\nWorkspace: {}\n",
        patch.id,
        patch.stats.files_changed,
        patch.stats.additions,
        patch.stats.deletions,
        patch.workspace.display(),
    );
    if patch.is_revision {
        if let Some(parent) = &patch.parent_diff_id {
            text.push_str(&format!("Revision {} of {parent}\n", patch.revision_number));
        }
    }
    for file in &patch.files {
        let kind = match file.kind {
            qm_core::FileChangeKind::Added => "A",
            qm_core::FileChangeKind::Modified => "M",
            qm_core::FileChangeKind::Deleted => "D",
            qm_core::FileChangeKind::Renamed => "R",
        };
        text.push_str(&format!("  {kind} {} (+{} -{})\n", file.path, file.additions, file.deletions));
    }
    if !patch.binary_paths.is_empty() {
        text.push_str(&format!("Binary files: {}\n", patch.binary_paths.join(", ")));
    }
    if show_content {
        text.push_str("\n");
        text.push_str(&patch.diff);
    }
    text
}

pub async fn apply_changes(
    ctx: &Arc<DaemonCtx>,
    request: &Request,
) -> Result<ToolResult, EngineError> {
    let args: ApplyChangesArgs = request.parse_args()?;
    if !args.target_workspace.is_dir() {
        return Err(EngineError::invalid_params(format!(
            "targetWorkspace does not exist: {}",
            args.target_workspace.display()
        )));
    }
    let outcome =
        ctx.manager.apply_patch(&args.diff_id, &args.target_workspace, args.backup).await?;
    let mut text = format!(
        "Applied {} to {}.",
        args.diff_id,
        args.target_workspace.display()
    );
    if !outcome.stderr.trim().is_empty() {
        text.push_str(&format!(" ({})", outcome.stderr.trim()));
    }
    Ok(ToolResult::text(text))
}

pub async fn reject_changes(
    ctx: &Arc<DaemonCtx>,
    request: &Request,
) -> Result<ToolResult, EngineError> {
    let args: RejectChangesArgs = request.parse_args()?;
    ctx.manager.reject_patch(&args.diff_id, args.reason.as_deref()).await?;
    Ok(ToolResult::text(format!("Rejected {}; sandbox cleaned up.", args.diff_id)))
}

pub async fn request_revision(
    ctx: &Arc<DaemonCtx>,
    request: &Request,
) -> Result<ToolResult, EngineError> {
    let args: RequestRevisionArgs = request.parse_args()?;
    let job_id = ctx
        .manager
        .request_revision(
            &args.diff_id,
            &args.feedback,
            args.preserve_correct_parts,
            args.additional_context.as_deref(),
        )
        .await?;
    Ok(ToolResult::with_data(
        format!(
            "Revision of {} started as job {job_id}. Poll with work_status.",
            args.diff_id
        ),
        serde_json::json!({ "jobId": job_id.as_str() }),
    ))
}
