//! Utility functions

use crate::error::Result;
use std::path::Path;

/// Write a file atomically: write to a `.tmp` sibling, then rename
///
/// Re-processing an article overwrites its artifacts; the rename makes the
/// overwrite all-or-nothing and never leaves a partially written artifact
/// under the final name. The temp file is removed on failure.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = path.with_extension(match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    });

    if let Err(e) = tokio::fs::write(&tmp_path, contents).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    Ok(())
}

/// Today's date as `YYYY-MM-DD` in UTC, the key of the daily stats row
pub fn today_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
