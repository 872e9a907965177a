//! Per-stage status surface
//!
//! Each pipeline stage exposes the same minimal HTTP surface on its own
//! port: a health probe, a status snapshot, queue statistics, idempotent
//! worker start/stop, a synchronous batch trigger, and a maintenance hook.
//!
//! # Routes
//!
//! - `GET /health` - 200 healthy / 503 unhealthy with prerequisite details
//! - `GET /status` - stage stats, worker flag, queue sizes, config snapshot
//! - `GET /queue-stats` - queue lengths and counters
//! - `POST /start-worker`, `POST /stop-worker` - supervisor control
//! - `POST /discover` | `/download-batch` | `/extract-batch` - one batch now
//! - `POST /cleanup` - maintenance for this stage
//! - `GET /events` - server-sent stream of worker lifecycle events
//! - `GET /openapi.json` - OpenAPI specification
//! - `GET /swagger-ui` - interactive docs (if enabled in config)

use crate::error::Result;
use crate::pipeline::ContentPipeline;
use crate::types::Stage;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Build the router for one stage's status surface
pub fn stage_router(pipeline: Arc<ContentPipeline>, stage: Stage) -> Router {
    let swagger_enabled = stage_api_config(&pipeline, stage).swagger_ui;
    let state = AppState::new(pipeline, stage);

    let router = Router::new()
        .route("/health", get(routes::health_check))
        .route("/status", get(routes::stage_status))
        .route("/queue-stats", get(routes::queue_stats))
        .route("/start-worker", post(routes::start_worker))
        .route("/stop-worker", post(routes::stop_worker))
        .route("/cleanup", post(routes::cleanup))
        .route("/events", get(routes::event_stream))
        .route("/openapi.json", get(routes::openapi_spec));

    // The batch trigger differs per stage
    let router = match stage {
        Stage::Discovery => router.route("/discover", post(routes::discover)),
        Stage::Download => router.route("/download-batch", post(routes::download_batch)),
        Stage::Parse | Stage::Storage => {
            router.route("/extract-batch", post(routes::extract_batch))
        }
    };

    let router = if swagger_enabled {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve one stage's status surface on its configured bind address
///
/// Runs until the server is shut down or fails to bind.
pub async fn serve_stage(pipeline: Arc<ContentPipeline>, stage: Stage) -> Result<()> {
    let bind_address = stage_api_config(&pipeline, stage).bind_address();

    tracing::info!(stage = %stage, address = %bind_address, "Starting status server");

    let app = stage_router(pipeline, stage);
    let listener = TcpListener::bind(&bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!(stage = %stage, "Status server stopped");
    Ok(())
}

fn stage_api_config(pipeline: &ContentPipeline, stage: Stage) -> crate::config::StageApiConfig {
    match stage {
        Stage::Discovery => pipeline.config().discovery.api.clone(),
        Stage::Download => pipeline.config().download.api.clone(),
        Stage::Parse | Stage::Storage => pipeline.config().extraction.api.clone(),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
