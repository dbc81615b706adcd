// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The streaming hub: server-sent events plus read-only JSON views.
//!
//! Strictly additive: the engine is fully functional with this server
//! disabled. Client disconnects surface as closed streams and are
//! non-fatal.

use crate::lifecycle::DaemonCtx;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;

pub fn router(ctx: Arc<DaemonCtx>) -> Router {
    Router::new()
        .route("/stream", get(stream_handler))
        .route("/status", get(status_handler))
        .route("/api/repositories", get(repositories_handler))
        .route("/api/tasks", get(tasks_handler))
        .route("/api/containers", get(containers_handler))
        .route("/api/diffs", get(diffs_handler))
        .layer(axum::middleware::from_fn(cors))
        .with_state(ctx)
}

/// Bind and serve on a background task.
pub async fn serve(
    ctx: Arc<DaemonCtx>,
    port: u16,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!(port, "streaming hub listening");
    let app = router(ctx);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!(error = %e, "streaming hub stopped");
        }
    }))
}

/// Permissive CORS on every resource.
async fn cors(request: axum::extract::Request, next: axum::middleware::Next) -> axum::response::Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, header::HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        header::HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, header::HeaderValue::from_static("*"));
    response
}

async fn stream_handler(
    State(ctx): State<Arc<DaemonCtx>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = ctx.manager.hub().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        let event = item.ok()?;
        match Event::default().json_data(&event) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::debug!(error = %e, "stream event serialization failed");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn status_handler(State(ctx): State<Arc<DaemonCtx>>) -> impl IntoResponse {
    let status = ctx.manager.system_status().await;
    Json(serde_json::to_value(&status).unwrap_or_default())
}

/// Distinct workspaces the engine has touched, from jobs and patches.
async fn repositories_handler(State(ctx): State<Arc<DaemonCtx>>) -> impl IntoResponse {
    let mut repos: BTreeSet<String> = BTreeSet::new();
    for job in ctx.manager.list_jobs() {
        repos.insert(job.work_folder.display().to_string());
    }
    for patch in ctx.manager.list_patches() {
        repos.insert(patch.workspace.display().to_string());
    }
    Json(repos.into_iter().collect::<Vec<_>>())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TasksQuery {
    work_folder: Option<std::path::PathBuf>,
}

async fn tasks_handler(
    State(ctx): State<Arc<DaemonCtx>>,
    Query(query): Query<TasksQuery>,
) -> impl IntoResponse {
    let Some(work_folder) = query.work_folder else {
        return Json(serde_json::json!({ "error": "workFolder query parameter required" }));
    };
    match ctx.manager.tasks().list_tasks(&work_folder, None) {
        Ok(buckets) => Json(serde_json::to_value(&buckets).unwrap_or_default()),
        Err(e) => Json(serde_json::json!({ "error": e.to_string() })),
    }
}

async fn containers_handler(State(ctx): State<Arc<DaemonCtx>>) -> impl IntoResponse {
    let records = ctx.manager.store().list_active_sandbox_records().unwrap_or_default();
    Json(serde_json::to_value(&records).unwrap_or_default())
}

async fn diffs_handler(State(ctx): State<Arc<DaemonCtx>>) -> impl IntoResponse {
    let patches = ctx.manager.list_patches();
    Json(serde_json::to_value(&patches).unwrap_or_default())
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
