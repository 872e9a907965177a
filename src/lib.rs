//! # genesis-connector
//!
//! Backend library for a feed-to-text content pipeline: articles are
//! discovered from an upstream feed service, their HTML (and inline
//! images) downloaded, and clean article text extracted — three stages
//! connected by durable priority queues with per-stage workers,
//! deduplication, exponential-backoff retry, and a persistent per-article
//! lifecycle row.
//!
//! ## Design Philosophy
//!
//! genesis-connector is designed to be:
//! - **Crash-tolerant** - every artifact write is idempotent; queues and
//!   state reconcile after restarts
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//! - **Observable** - workers publish lifecycle events and each stage
//!   serves a small status surface
//!
//! ## Quick Start
//!
//! ```no_run
//! use genesis_connector::{Config, ContentPipeline, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let pipeline = ContentPipeline::new(config).await?;
//!     pipeline.start().await?;
//!
//!     // Subscribe to worker events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     // Run with automatic signal handling
//!     run_with_shutdown(pipeline).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Per-stage status surface
pub mod api;
/// Configuration types
pub mod config;
/// State store (article lifecycle, daily stats, publishers)
pub mod db;
/// Feed discovery stage
pub mod discovery;
/// HTML download stage
pub mod download;
/// Error types
pub mod error;
/// Text extraction stage
pub mod extract;
/// Upstream feed service client
pub mod feed;
/// Maintenance jobs (queue janitor, file reconciliation)
pub mod maintenance;
/// Pipeline facade
pub mod pipeline;
/// Queue substrate (priority queues, dedup set, counters)
pub mod queue;
/// Retry logic with exponential backoff
pub mod retry;
/// Worker supervision and periodic scheduling
pub mod supervisor;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use db::StateStore;
pub use error::{
    ApiError, DownloadError, Error, ErrorDetail, ExtractError, FeedError, QueueError, Result,
    RetryDisposition, StateError, ToHttpStatus,
};
pub use feed::FeedClient;
pub use pipeline::ContentPipeline;
pub use queue::{MemoryQueue, QueueSubstrate, RedisQueue};
pub use types::{
    ArticleId, BatchReport, DiscoveryReport, Event, QueueStats, Stage, StageStatus, TaskEnvelope,
};

/// Helper function to run the pipeline with graceful signal handling.
///
/// Waits for a termination signal and then calls the pipeline's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(pipeline: ContentPipeline) -> Result<()> {
    wait_for_signal().await;
    pipeline.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
