
use super::*;
use crate::types::{ArticleId, StageStatus};
use tempfile::NamedTempFile;

/// Open a fresh store on a temp file; the file guard keeps it alive
pub(super) async fn test_store() -> (StateStore, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let store = StateStore::new(temp_file.path()).await.unwrap();
    (store, temp_file)
}

pub(super) fn sample_article(id: &str) -> ArticleUpsert {
    ArticleUpsert {
        id: ArticleId::from(id),
        url: format!("http://h/{id}"),
        title: format!("Title {id}"),
        mp_name: "Daily Publisher".to_string(),
        mp_id: "mp-1".to_string(),
        publish_time: Some(1_700_000_000),
        discovery_status: StageStatus::Processing,
    }
}
