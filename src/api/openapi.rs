//! OpenAPI documentation for the status surface.

use utoipa::OpenApi;

/// OpenAPI specification of the per-stage status surface
///
/// Every stage serves the same uniform surface; the batch-trigger route
/// differs per stage (`/discover`, `/download-batch`, `/extract-batch`).
#[derive(OpenApi)]
#[openapi(
    info(
        title = "genesis-connector status surface",
        description = "Read-only status plus worker control endpoints, one server per pipeline stage",
        license(name = "MIT OR Apache-2.0"),
    ),
    paths(
        crate::api::routes::health_check,
        crate::api::routes::stage_status,
        crate::api::routes::queue_stats,
        crate::api::routes::start_worker,
        crate::api::routes::stop_worker,
        crate::api::routes::discover,
        crate::api::routes::download_batch,
        crate::api::routes::extract_batch,
        crate::api::routes::cleanup,
        crate::api::routes::event_stream,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        crate::api::routes::BatchRequest,
        crate::api::routes::DiscoverRequest,
        crate::api::routes::CleanupRequest,
        crate::error::ApiError,
        crate::error::ErrorDetail,
        crate::types::BatchReport,
        crate::types::DiscoveryReport,
        crate::types::QueueStats,
        crate::types::WorkerTotals,
        crate::types::Stage,
        crate::types::StageStatus,
    )),
    tags(
        (name = "status", description = "Read-only stage status"),
        (name = "control", description = "Worker and maintenance control"),
    )
)]
pub struct ApiDoc;
