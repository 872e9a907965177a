//! Article row CRUD and stage-status transitions.

use crate::error::StateError;
use crate::types::{ArticleId, Stage, StageStatus};
use crate::{Error, Result};

use super::{ArticleRow, StateStore};

/// Fields for creating or refreshing an article row
///
/// Upserts are id-keyed: a second upsert for the same id refreshes the
/// descriptive fields and leaves lifecycle columns untouched.
#[derive(Debug, Clone)]
pub struct ArticleUpsert {
    /// Article id
    pub id: ArticleId,
    /// Article URL
    pub url: String,
    /// Article title (truncated to 512 chars)
    pub title: String,
    /// Publisher display name (truncated to 256 chars)
    pub mp_name: String,
    /// Publisher id
    pub mp_id: String,
    /// Publish time as Unix seconds
    pub publish_time: Option<i64>,
    /// Initial discovery status
    pub discovery_status: StageStatus,
}

/// Artifact paths and metrics recorded after a completed download
#[derive(Debug, Clone, Default)]
pub struct DownloadArtifacts {
    /// HTML artifact path
    pub html_file_path: Option<String>,
    /// Per-article image directory
    pub images_dir_path: Option<String>,
    /// Metadata manifest path
    pub metadata_file_path: Option<String>,
    /// Size of the downloaded HTML in characters
    pub content_length: Option<i64>,
    /// Number of images downloaded
    pub image_count: Option<i64>,
}

const ARTICLE_COLUMNS: &str = r#"
    id, url, title, mp_name, mp_id, publish_time,
    discovery_status, download_status, parse_status, storage_status,
    html_file_path, content_file_path, metadata_file_path, images_dir_path,
    content_length, word_count, image_count,
    error_message, error_details, retry_count, last_retry_at,
    created_at, updated_at, discovered_at, downloaded_at, parsed_at, stored_at
"#;

fn truncated(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        value.chars().take(max).collect()
    }
}

impl StateStore {
    /// Create an article row, or refresh its descriptive fields if it exists
    pub async fn upsert(&self, article: &ArticleUpsert) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO articles_status (
                id, url, title, mp_name, mp_id, publish_time,
                discovery_status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                title = excluded.title,
                mp_name = excluded.mp_name,
                mp_id = excluded.mp_id,
                publish_time = excluded.publish_time,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&article.id)
        .bind(truncated(&article.url, 1024))
        .bind(truncated(&article.title, 512))
        .bind(truncated(&article.mp_name, 256))
        .bind(truncated(&article.mp_id, 255))
        .bind(article.publish_time)
        .bind(article.discovery_status.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| {
            Error::State(StateError::QueryFailed(format!(
                "Failed to upsert article: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get an article row by id
    pub async fn get(&self, id: &ArticleId) -> Result<Option<ArticleRow>> {
        let row = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles_status WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| {
            Error::State(StateError::QueryFailed(format!(
                "Failed to get article: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Transition one stage's status for an article
    ///
    /// Completion additionally stamps the stage's timestamp column in the
    /// same statement. An error message increments `retry_count`, records
    /// the message and structured details, and stamps `last_retry_at`.
    ///
    /// Returns whether a row was updated; a missing row is not an error so
    /// filesystem-discovered tasks without a row can still be processed.
    pub async fn set_stage_status(
        &self,
        id: &ArticleId,
        stage: Stage,
        status: StageStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let status_column = stage.status_column();

        let mut sets = vec![format!("{status_column} = ?"), "updated_at = ?".to_string()];
        if status == StageStatus::Completed {
            sets.push(format!("{} = ?", stage.timestamp_column()));
        }
        if error.is_some() {
            sets.push("error_message = ?".to_string());
            sets.push("error_details = ?".to_string());
            sets.push("retry_count = retry_count + 1".to_string());
            sets.push("last_retry_at = ?".to_string());
        }

        let sql = format!("UPDATE articles_status SET {} WHERE id = ?", sets.join(", "));
        let mut query = sqlx::query(&sql).bind(status.as_str()).bind(now);
        if status == StageStatus::Completed {
            query = query.bind(now);
        }
        if let Some(message) = error {
            let details = serde_json::json!({
                "stage": stage.as_str(),
                "message": message,
            });
            query = query.bind(message).bind(details.to_string()).bind(now);
        }

        let result = query.bind(id).execute(self.pool()).await.map_err(|e| {
            Error::State(StateError::QueryFailed(format!(
                "Failed to update article status: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            tracing::warn!(article_id = %id, stage = %stage, "Article not found for status update");
            return Ok(false);
        }

        tracing::debug!(
            article_id = %id,
            stage = %stage,
            status = %status,
            "Article status updated"
        );
        Ok(true)
    }

    /// Record artifact paths and metrics after a download
    pub async fn set_paths(&self, id: &ArticleId, artifacts: &DownloadArtifacts) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE articles_status SET
                html_file_path = COALESCE(?, html_file_path),
                images_dir_path = COALESCE(?, images_dir_path),
                metadata_file_path = COALESCE(?, metadata_file_path),
                content_length = COALESCE(?, content_length),
                image_count = COALESCE(?, image_count),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&artifacts.html_file_path)
        .bind(&artifacts.images_dir_path)
        .bind(&artifacts.metadata_file_path)
        .bind(artifacts.content_length)
        .bind(artifacts.image_count)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| {
            Error::State(StateError::QueryFailed(format!(
                "Failed to update article paths: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the extracted-text artifact and its word count
    pub async fn set_extraction_result(
        &self,
        id: &ArticleId,
        content_file_path: &str,
        word_count: i64,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE articles_status SET
                content_file_path = ?,
                word_count = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(content_file_path)
        .bind(word_count)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| {
            Error::State(StateError::QueryFailed(format!(
                "Failed to record extraction result: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// List articles whose given stage is still pending
    pub async fn list_pending(&self, stage: Stage, limit: u32) -> Result<Vec<ArticleRow>> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles_status \
             WHERE {} = 'pending' ORDER BY created_at ASC LIMIT ?",
            stage.status_column()
        );

        let rows = sqlx::query_as::<_, ArticleRow>(&sql)
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(|e| {
                Error::State(StateError::QueryFailed(format!(
                    "Failed to list pending articles: {}",
                    e
                )))
            })?;

        Ok(rows)
    }

    /// Count articles per status value for one stage
    pub async fn stage_counts(&self, stage: Stage) -> Result<Vec<(String, i64)>> {
        let sql = format!(
            "SELECT {col}, COUNT(*) FROM articles_status GROUP BY {col}",
            col = stage.status_column()
        );

        let rows = sqlx::query_as::<_, (String, i64)>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| {
                Error::State(StateError::QueryFailed(format!(
                    "Failed to count stage statuses: {}",
                    e
                )))
            })?;

        Ok(rows)
    }
}
