//! Publisher registry.

use crate::error::StateError;
use crate::{Error, Result};

use super::{PublisherRecord, PublisherRow, StateStore};

impl StateStore {
    /// Create a publisher row, or refresh it and bump its article counter
    ///
    /// Every upsert counts one sighted article; `last_article_time` only
    /// moves forward.
    pub async fn upsert_publisher(&self, record: &PublisherRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO publishers (
                mp_id, mp_name, nickname, avatar_url, description,
                total_articles, last_article_time, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT(mp_id) DO UPDATE SET
                mp_name = excluded.mp_name,
                nickname = COALESCE(excluded.nickname, nickname),
                avatar_url = COALESCE(excluded.avatar_url, avatar_url),
                description = COALESCE(excluded.description, description),
                total_articles = total_articles + 1,
                last_article_time = MAX(
                    COALESCE(last_article_time, 0),
                    COALESCE(excluded.last_article_time, 0)
                ),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.mp_id)
        .bind(&record.mp_name)
        .bind(&record.nickname)
        .bind(&record.avatar_url)
        .bind(&record.description)
        .bind(record.last_article_time)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| {
            Error::State(StateError::QueryFailed(format!(
                "Failed to upsert publisher: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a publisher row by id
    pub async fn get_publisher(&self, mp_id: &str) -> Result<Option<PublisherRow>> {
        let row = sqlx::query_as::<_, PublisherRow>(
            r#"
            SELECT mp_id, mp_name, nickname, avatar_url, description,
                   total_articles, processed_articles, last_article_time,
                   is_active, priority, created_at, updated_at
            FROM publishers WHERE mp_id = ?
            "#,
        )
        .bind(mp_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| {
            Error::State(StateError::QueryFailed(format!(
                "Failed to get publisher: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Bump the processed-article counter for a publisher
    pub async fn mark_publisher_processed(&self, mp_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE publishers SET processed_articles = processed_articles + 1, updated_at = ? \
             WHERE mp_id = ?",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(mp_id)
        .execute(self.pool())
        .await
        .map_err(|e| {
            Error::State(StateError::QueryFailed(format!(
                "Failed to mark publisher processed: {}",
                e
            )))
        })?;

        Ok(())
    }
}
