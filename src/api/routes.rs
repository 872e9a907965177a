//! Route handlers for the per-stage status surface.

use crate::api::AppState;
use crate::error::{ApiError, Error, ToHttpStatus};
use crate::types::{Event, Stage};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use utoipa::ToSchema;

/// Body of the batch-trigger endpoints
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct BatchRequest {
    /// Maximum tasks for this batch (default: the stage's batch size)
    pub max_tasks: Option<usize>,
}

/// Body of `POST /discover`
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DiscoverRequest {
    /// Lookback window in hours, 1–168 (default: 24)
    pub hours: Option<u32>,
}

/// Body of `POST /cleanup`
#[derive(Debug, Deserialize, ToSchema)]
pub struct CleanupRequest {
    /// Remove artifacts older than this many days, 1–365
    pub days: u32,
}

fn error_response(error: Error) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ApiError::from(error))).into_response()
}

/// GET /health - Health check for this stage's prerequisites
#[utoipa::path(
    get,
    path = "/health",
    tag = "status",
    responses(
        (status = 200, description = "Stage prerequisites are healthy"),
        (status = 503, description = "A prerequisite failed its check")
    )
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.pipeline.stage_health(state.stage).await;
    let healthy = health.healthy();

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "service": state.service_name(),
            "status": if healthy { "healthy" } else { "unhealthy" },
            "timestamp": Utc::now().to_rfc3339(),
            "details": health,
        })),
    )
}

/// GET /status - Stage statistics, worker flag, queue sizes, config snapshot
#[utoipa::path(
    get,
    path = "/status",
    tag = "status",
    responses(
        (status = 200, description = "Current stage status"),
        (status = 500, description = "Status collection failed")
    )
)]
pub async fn stage_status(State(state): State<AppState>) -> Response {
    let queue_stats = match state.pipeline.queue_stats().await {
        Ok(stats) => stats,
        Err(e) => return error_response(e),
    };

    let stats = match state.stage {
        Stage::Discovery => {
            json!(state.pipeline.discovery().totals().await)
        }
        Stage::Download => json!(state.pipeline.download().totals().await),
        Stage::Parse | Stage::Storage => json!(state.pipeline.extraction().totals().await),
    };

    let mut body = json!({
        "service": state.service_name(),
        "status": "running",
        "worker_running": state.pipeline.supervisor().is_running(state.stage),
        "stats": stats,
        "queue_stats": queue_stats,
        "config": state.pipeline.config(),
        "timestamp": Utc::now().to_rfc3339(),
    });

    // The extraction surface also reports artifact coverage on disk
    if state.stage == Stage::Parse {
        if let Ok(consistency) = state.pipeline.maintenance().check_file_consistency().await {
            body["extraction_status"] = json!({
                "html_files_count": consistency.html_count,
                "text_files_count": consistency.text_count,
                "remaining_to_process": consistency.missing_text.len(),
            });
        }
    }

    Json(body).into_response()
}

/// GET /queue-stats - Queue lengths and advisory counters
#[utoipa::path(
    get,
    path = "/queue-stats",
    tag = "status",
    responses(
        (status = 200, description = "Queue statistics", body = crate::types::QueueStats),
        (status = 503, description = "Queue substrate unavailable")
    )
)]
pub async fn queue_stats(State(state): State<AppState>) -> Response {
    match state.pipeline.queue_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /start-worker - Start this stage's worker loop (idempotent)
#[utoipa::path(
    post,
    path = "/start-worker",
    tag = "control",
    responses((status = 200, description = "Worker started or already running"))
)]
pub async fn start_worker(State(state): State<AppState>) -> impl IntoResponse {
    let started = state.pipeline.supervisor().start_worker(state.stage).await;
    Json(json!({
        "message": if started { "Worker started" } else { "Worker already running" },
        "worker_running": true,
    }))
}

/// POST /stop-worker - Stop this stage's worker loop (idempotent)
#[utoipa::path(
    post,
    path = "/stop-worker",
    tag = "control",
    responses((status = 200, description = "Worker stopped or already stopped"))
)]
pub async fn stop_worker(State(state): State<AppState>) -> impl IntoResponse {
    let stopped = state.pipeline.supervisor().stop_worker(state.stage);
    Json(json!({
        "message": if stopped { "Worker stopped" } else { "Worker not running" },
        "worker_running": false,
    }))
}

/// POST /discover - Run one discovery pass over a caller-chosen window
#[utoipa::path(
    post,
    path = "/discover",
    tag = "control",
    request_body = DiscoverRequest,
    responses(
        (status = 200, description = "Discovery report"),
        (status = 400, description = "Window out of range"),
        (status = 503, description = "A dependency is down")
    )
)]
pub async fn discover(
    State(state): State<AppState>,
    body: Option<Json<DiscoverRequest>>,
) -> Response {
    let hours = body.and_then(|b| b.0.hours).unwrap_or(24);
    if !(1..=168).contains(&hours) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::validation("hours must be between 1 and 168")),
        )
            .into_response();
    }

    match state.pipeline.discovery().force_discovery(hours).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /download-batch - Run one synchronous download batch
#[utoipa::path(
    post,
    path = "/download-batch",
    tag = "control",
    request_body = BatchRequest,
    responses(
        (status = 200, description = "Batch report", body = crate::types::BatchReport),
        (status = 503, description = "A dependency is down")
    )
)]
pub async fn download_batch(
    State(state): State<AppState>,
    body: Option<Json<BatchRequest>>,
) -> Response {
    let max = body
        .and_then(|b| b.0.max_tasks)
        .unwrap_or(state.pipeline.config().download.batch_size);

    match state.pipeline.download().run_batch(max).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /extract-batch - Run one synchronous extraction batch
#[utoipa::path(
    post,
    path = "/extract-batch",
    tag = "control",
    request_body = BatchRequest,
    responses(
        (status = 200, description = "Batch report", body = crate::types::BatchReport),
        (status = 503, description = "A dependency is down")
    )
)]
pub async fn extract_batch(
    State(state): State<AppState>,
    body: Option<Json<BatchRequest>>,
) -> Response {
    let max = body
        .and_then(|b| b.0.max_tasks)
        .unwrap_or(state.pipeline.config().extraction.batch_size);

    match state.pipeline.extraction().run_batch(max).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /cleanup - Run maintenance for this stage
///
/// Discovery runs the queue janitor; download and extraction age their
/// artifacts past the requested number of days.
#[utoipa::path(
    post,
    path = "/cleanup",
    tag = "control",
    request_body = CleanupRequest,
    responses(
        (status = 200, description = "Cleanup report"),
        (status = 400, description = "Days out of range")
    )
)]
pub async fn cleanup(State(state): State<AppState>, body: Option<Json<CleanupRequest>>) -> Response {
    let days = body.map(|b| b.0.days).unwrap_or(30);
    if !(1..=365).contains(&days) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::validation("days must be between 1 and 365")),
        )
            .into_response();
    }

    let maintenance = state.pipeline.maintenance();
    let result = match state.stage {
        Stage::Discovery => maintenance.run_cleanup().await.map(|report| {
            json!({
                "queue_removed": report.queue_removed,
                "deadletter_removed": report.deadletter_removed,
                "cleanup_date": Utc::now().to_rfc3339(),
            })
        }),
        stage => maintenance.cleanup_old_files(stage, days).await.map(|removed| {
            json!({
                "removed_files": removed,
                "cutoff_days": days,
                "cleanup_date": Utc::now().to_rfc3339(),
            })
        }),
    };

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /events - Server-sent stream of worker lifecycle events
#[utoipa::path(
    get,
    path = "/events",
    tag = "status",
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream")
    )
)]
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let receiver = state.pipeline.subscribe();
    let stream = BroadcastStream::new(receiver);

    let sse_stream = stream.filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json_data) => {
                let event_type = match &event {
                    Event::BatchStarted { .. } => "batch_started",
                    Event::TaskDone { .. } => "task_done",
                    Event::TaskFailed { .. } => "task_failed",
                    Event::BatchEnded { .. } => "batch_ended",
                    Event::Shutdown => "shutdown",
                };
                Some(Ok(SseEvent::default().event(event_type).data(json_data)))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize event to JSON");
                None
            }
        },
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped = skipped, "SSE client lagged, skipped events");
            Some(Ok(SseEvent::default().event("error").data(format!(
                r#"{{"error":"lagged","skipped":{}}}"#,
                skipped
            ))))
        }
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/openapi.json",
    tag = "status",
    responses((status = 200, description = "OpenAPI 3.1 specification in JSON format"))
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}
