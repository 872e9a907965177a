//! State store lifecycle and schema migrations.

use crate::error::StateError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::StateStore;

impl StateStore {
    /// Open the state store
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::State(StateError::ConnectionFailed(format!(
                        "Failed to create state directory: {}",
                        e
                    )))
                })?;
            }
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::State(StateError::ConnectionFailed(format!(
                    "Failed to parse state path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::State(StateError::ConnectionFailed(format!(
                "Failed to connect to state store: {}",
                e
            )))
        })?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Check that the store answers a trivial query
    pub async fn health(&self) -> bool {
        match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "State store health check failed");
                false
            }
        }
    }

    pub(super) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::State(StateError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::State(StateError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::State(StateError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: Create initial schema
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying state store migration v1");

        // Wrap migration in a transaction so partial failures don't leave the DB in a broken state
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::State(StateError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            Self::create_articles_schema(conn).await?;
            Self::create_stats_schema(conn).await?;
            Self::create_publishers_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::State(StateError::MigrationFailed(format!(
                            "Failed to commit migration v1: {}",
                            e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("State store migration v1 complete");
        Ok(())
    }

    /// Create the article lifecycle table and its indexes
    async fn create_articles_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE articles_status (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                title TEXT,
                mp_name TEXT,
                mp_id TEXT,
                publish_time INTEGER,
                discovery_status TEXT NOT NULL DEFAULT 'pending',
                download_status TEXT NOT NULL DEFAULT 'pending',
                parse_status TEXT NOT NULL DEFAULT 'pending',
                storage_status TEXT NOT NULL DEFAULT 'pending',
                html_file_path TEXT,
                content_file_path TEXT,
                metadata_file_path TEXT,
                images_dir_path TEXT,
                content_length INTEGER,
                word_count INTEGER,
                image_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                error_details TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_retry_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                discovered_at INTEGER,
                downloaded_at INTEGER,
                parsed_at INTEGER,
                stored_at INTEGER
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::State(StateError::MigrationFailed(format!(
                "Failed to create articles_status table: {}",
                e
            )))
        })?;

        for column in [
            "discovery_status",
            "download_status",
            "parse_status",
            "storage_status",
        ] {
            sqlx::query(&format!(
                "CREATE INDEX idx_articles_{column} ON articles_status ({column})"
            ))
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::State(StateError::MigrationFailed(format!(
                    "Failed to create index on {column}: {}",
                    e
                )))
            })?;
        }

        Ok(())
    }

    /// Create the daily statistics table
    async fn create_stats_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE processing_stats (
                date TEXT PRIMARY KEY,
                discovered_count INTEGER NOT NULL DEFAULT 0,
                downloaded_count INTEGER NOT NULL DEFAULT 0,
                parsed_count INTEGER NOT NULL DEFAULT 0,
                stored_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                total_content_size INTEGER NOT NULL DEFAULT 0,
                total_word_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::State(StateError::MigrationFailed(format!(
                "Failed to create processing_stats table: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Create the publisher registry table
    async fn create_publishers_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE publishers (
                mp_id TEXT PRIMARY KEY,
                mp_name TEXT NOT NULL,
                nickname TEXT,
                avatar_url TEXT,
                description TEXT,
                total_articles INTEGER NOT NULL DEFAULT 0,
                processed_articles INTEGER NOT NULL DEFAULT 0,
                last_article_time INTEGER,
                is_active INTEGER NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::State(StateError::MigrationFailed(format!(
                "Failed to create publishers table: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Record that a migration was applied
    async fn record_migration(conn: &mut SqliteConnection, version: i64) -> Result<()> {
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::State(StateError::MigrationFailed(format!(
                    "Failed to record migration v{version}: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
