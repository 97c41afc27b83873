use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::TablesSection;
use crate::model::encoding::{
    FIELD_CONTENT_ID, FIELD_UPDATED_AT, FIELD_VERSION_GROUP_ID, INDEX_CONTENT_ID,
};
use crate::model::RawRecord;
use crate::store::{QueryRequest, RecordStore, ABSENT_SENTINEL};

use super::collect_pages;
use super::error::{ResolveResult, ResolveStage};

/// The version-group id and update time of one encoding row, read leniently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionStamp {
    pub version_group_id: String,
    pub updated_at: String,
}

impl VersionStamp {
    pub fn from_record(record: &RawRecord) -> Self {
        let text = |field: &str| match record.get(field) {
            Some(Value::String(value)) => value.clone(),
            _ => String::new(),
        };
        Self {
            version_group_id: text(FIELD_VERSION_GROUP_ID),
            updated_at: text(FIELD_UPDATED_AT),
        }
    }
}

/// Finds the version group of the most recently updated encoding of `content_id`.
pub async fn discover_version_group(
    store: &dyn RecordStore,
    tables: &TablesSection,
    content_id: i64,
    cancel: &CancellationToken,
) -> ResolveResult<Option<String>> {
    let request =
        QueryRequest::new(&tables.encodings, FIELD_CONTENT_ID, content_id).index(INDEX_CONTENT_ID);
    let records = collect_pages(store, request, cancel, ResolveStage::IdentifierResolved).await?;
    let stamps: Vec<VersionStamp> = records.iter().map(VersionStamp::from_record).collect();
    let version = latest_version_group(stamps);
    debug!(content_id, rows = records.len(), version = ?version, "version discovery finished");
    Ok(version)
}

/// Timestamps compare as strings, newest first; empty and `ABSENT` ids are skipped.
pub fn latest_version_group(mut stamps: Vec<VersionStamp>) -> Option<String> {
    stamps.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    stamps
        .into_iter()
        .map(|stamp| stamp.version_group_id)
        .find(|id| !id.is_empty() && id != ABSENT_SENTINEL)
}
