//! Error types for genesis-connector
//!
//! This module provides comprehensive error handling for the library, including:
//! - Domain-specific error types per component boundary (Queue, State, Feed, Download, Extract)
//! - Retry disposition classification (backoff vs one-retry vs fail-fast)
//! - HTTP status code mapping for the status surface
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for genesis-connector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for genesis-connector
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues. Callers pattern-match on the
/// variant (or on [`Error::disposition`]) to choose retry vs fail-fast.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "STORAGE_BASE_PATH")
        key: Option<String>,
    },

    /// Queue substrate operation failed
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// State store operation failed
    #[error("state store error: {0}")]
    State(#[from] StateError),

    /// SQLx database error
    #[error("state store error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Upstream feed service error
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Download stage error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Extraction stage error
    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),

    /// Article failed validation (missing id or url)
    #[error("invalid article: {0}")]
    InvalidArticle(String),

    /// A prerequisite dependency failed its health check
    #[error("health check degraded: {0}")]
    HealthDegraded(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Article not found
    #[error("article not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new batches
    #[error("shutdown in progress: not accepting new batches")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Queue substrate errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to the queue substrate
    #[error("failed to connect to queue substrate: {0}")]
    ConnectionFailed(String),

    /// An individual queue operation failed
    #[error("queue operation failed: {0}")]
    OperationFailed(String),

    /// A queue member could not be decoded as a task envelope
    #[error("malformed task envelope: {0}")]
    MalformedEnvelope(String),
}

/// State store errors
#[derive(Debug, Error)]
pub enum StateError {
    /// Failed to connect to the state store
    #[error("failed to connect to state store: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Upstream feed service errors
#[derive(Debug, Error)]
pub enum FeedError {
    /// The feed service could not be reached at all
    #[error("feed service unavailable: {0}")]
    Unavailable(String),

    /// The feed service answered with a non-success status
    #[error("feed endpoint returned HTTP {status}")]
    Status {
        /// HTTP status code returned by the feed service
        status: u16,
    },

    /// Feed body could not be parsed as Atom, RSS, or JSON
    #[error("failed to parse feed: {0}")]
    Parse(String),
}

/// Download stage errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Article server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// HTTP status code returned by the article server
        status: u16,
        /// URL that was being fetched
        url: String,
    },

    /// Task envelope is unusable (missing id or url)
    #[error("invalid download task: {0}")]
    InvalidTask(String),
}

/// Extraction stage errors
#[derive(Debug, Error)]
pub enum ExtractError {
    /// HTML artifact is missing at parse time
    #[error("HTML file not found: {path}")]
    HtmlMissing {
        /// Path where the HTML artifact was expected
        path: PathBuf,
    },

    /// The extractor produced no text for the article
    #[error("no text extracted for article {id}")]
    NoTextExtracted {
        /// Article id the extraction ran for
        id: String,
    },

    /// The HTML could not be processed
    #[error("failed to process HTML: {0}")]
    Parse(String),
}

/// How a failed task should be treated by the retry discipline
///
/// Derived from the error taxonomy: transient failures earn the full
/// backoff budget, permanent network failures get a single retry, and
/// everything unrecoverable goes straight to the deadletter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Retry with exponential backoff up to the stage's retry limit
    Backoff,
    /// Retry once, then deadletter
    OneRetry,
    /// Deadletter immediately, no retry
    Fatal,
}

impl Error {
    /// Classify this error for the per-task retry discipline
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            // Transient network: timeouts, connection failures, resets
            Error::Network(_) => RetryDisposition::Backoff,
            Error::Download(DownloadError::HttpStatus { status, .. }) => match status {
                408 | 429 | 500..=599 => RetryDisposition::Backoff,
                400..=499 => RetryDisposition::OneRetry,
                _ => RetryDisposition::Backoff,
            },
            Error::Feed(FeedError::Status { status }) => match status {
                408 | 429 | 500..=599 => RetryDisposition::Backoff,
                _ => RetryDisposition::OneRetry,
            },
            Error::Feed(FeedError::Unavailable(_)) => RetryDisposition::Backoff,

            // Resource exhaustion: retried on a later batch
            Error::Io(_) => RetryDisposition::Backoff,

            // Parse errors and invalid tasks fail immediately
            Error::Feed(FeedError::Parse(_)) => RetryDisposition::Fatal,
            Error::Extract(_) => RetryDisposition::Fatal,
            Error::Download(DownloadError::InvalidTask(_)) => RetryDisposition::Fatal,
            Error::InvalidArticle(_) => RetryDisposition::Fatal,
            Error::Serialization(_) => RetryDisposition::Fatal,

            // Everything else is permanent from the task's point of view
            _ => RetryDisposition::Fatal,
        }
    }

    /// Whether this error means a shared dependency is down
    ///
    /// Dependency-down errors abort the batch; the supervisor pauses and
    /// retries after its interval instead of burning the task's retries.
    pub fn is_dependency_down(&self) -> bool {
        matches!(
            self,
            Error::Queue(QueueError::ConnectionFailed(_))
                | Error::State(StateError::ConnectionFailed(_))
                | Error::HealthDegraded(_)
        )
    }
}

/// API error response format
///
/// This structure is returned by the status surface when an error occurs.
/// It follows a standard format with machine-readable error codes,
/// human-readable messages, and optional contextual details.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "Article a1 not found",
///     "details": {
///       "article_id": "a1"
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    ///
    /// Clients can use this for programmatic error handling.
    pub code: String,

    /// Human-readable error message
    ///
    /// This is suitable for displaying to end users.
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }

    /// Create a "service unavailable" error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new("service_unavailable", message)
    }
}

/// Convert errors to HTTP status codes for API responses
///
/// This trait maps domain errors to appropriate HTTP status codes.
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::InvalidArticle(_) => 422, // Unprocessable Entity

            // 404 Not Found
            Error::NotFound(_) => 404,
            Error::State(StateError::NotFound(_)) => 404,
            Error::Extract(ExtractError::HtmlMissing { .. }) => 404,

            // 422 Unprocessable Entity - Semantic errors
            Error::Download(DownloadError::InvalidTask(_)) => 422,
            Error::Extract(_) => 422,

            // 500 Internal Server Error - Server-side issues
            Error::State(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - External service errors
            Error::Feed(_) => 502,
            Error::Network(_) => 502,
            Error::Download(DownloadError::HttpStatus { .. }) => 502,

            // 503 Service Unavailable
            Error::Queue(_) => 503,
            Error::HealthDegraded(_) => 503,
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Queue(e) => match e {
                QueueError::ConnectionFailed(_) => "queue_unavailable",
                QueueError::OperationFailed(_) => "queue_error",
                QueueError::MalformedEnvelope(_) => "malformed_envelope",
            },
            Error::State(e) => match e {
                StateError::ConnectionFailed(_) => "state_unavailable",
                StateError::MigrationFailed(_) => "migration_failed",
                StateError::QueryFailed(_) => "state_error",
                StateError::NotFound(_) => "not_found",
            },
            Error::Sqlx(_) => "state_error",
            Error::Feed(e) => match e {
                FeedError::Unavailable(_) => "feed_unavailable",
                FeedError::Status { .. } => "feed_error",
                FeedError::Parse(_) => "feed_parse_error",
            },
            Error::Download(e) => match e {
                DownloadError::HttpStatus { .. } => "download_http_error",
                DownloadError::InvalidTask(_) => "invalid_task",
            },
            Error::Extract(e) => match e {
                ExtractError::HtmlMissing { .. } => "html_missing",
                ExtractError::NoTextExtracted { .. } => "no_text_extracted",
                ExtractError::Parse(_) => "extract_parse_error",
            },
            Error::InvalidArticle(_) => "invalid_article",
            Error::HealthDegraded(_) => "health_degraded",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        // Add contextual details for specific error types
        let details = match &error {
            Error::Download(DownloadError::HttpStatus { status, url }) => {
                Some(serde_json::json!({
                    "status": status,
                    "url": url,
                }))
            }
            Error::Extract(ExtractError::HtmlMissing { path }) => Some(serde_json::json!({
                "path": path,
            })),
            Error::Extract(ExtractError::NoTextExtracted { id }) => Some(serde_json::json!({
                "article_id": id,
            })),
            Error::Feed(FeedError::Status { status }) => Some(serde_json::json!({
                "status": status,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
