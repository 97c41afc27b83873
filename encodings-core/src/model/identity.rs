use chrono::{DateTime, Utc};
use serde::Serialize;

use super::record::{DecodeError, FieldReader, RawRecord};

pub const FIELD_CONTENT_ID: &str = "content_id";
pub const FIELD_EXTERNAL_KEY: &str = "filebase";
pub const FIELD_LINEAGE_TAG: &str = "project";
pub const FIELD_CREATED_AT: &str = "lastupdate";
pub const FIELD_ALTERNATE_ID: &str = "title_id";

pub const INDEX_EXTERNAL_KEY: &str = "filebase";
pub const INDEX_ALTERNATE_ID: &str = "titleid";

/// Maps a caller-facing key (filename stem or title id) to the canonical content id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentIdentity {
    pub content_id: i64,
    pub external_key: String,
    pub lineage_tag: Option<String>,
    pub created_at: DateTime<Utc>,
    pub alternate_id: Option<i64>,
}

impl ContentIdentity {
    pub fn from_record(table: &str, record: &RawRecord) -> Result<Self, DecodeError> {
        let mut reader = FieldReader::new(table, record);
        let content_id = reader.integer(FIELD_CONTENT_ID);
        let external_key = reader.non_empty_string(FIELD_EXTERNAL_KEY);
        let lineage_tag = reader.optional_string(FIELD_LINEAGE_TAG);
        let created_at = reader.timestamp(FIELD_CREATED_AT);
        let alternate_id = reader.optional_integer(FIELD_ALTERNATE_ID);
        reader.finish()?;

        Ok(Self {
            content_id: content_id.unwrap_or_default(),
            external_key: external_key.unwrap_or_default(),
            lineage_tag,
            created_at: created_at.unwrap_or_default(),
            alternate_id,
        })
    }
}
