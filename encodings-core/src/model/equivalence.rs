use serde::Serialize;

use super::record::{DecodeError, FieldReader, RawRecord};

pub const FIELD_ID: &str = "id";
pub const FIELD_REAL_NAME: &str = "real_name";
pub const FIELD_MIME_EQUIVALENT: &str = "mime_equivalent";

/// Two interchangeable labels for the same media type, e.g. `mp4` and `video/mp4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatEquivalence {
    pub id: Option<i64>,
    pub real_name: String,
    pub mime_equivalent: String,
}

impl FormatEquivalence {
    pub fn new(real_name: impl Into<String>, mime_equivalent: impl Into<String>) -> Self {
        Self {
            id: None,
            real_name: real_name.into(),
            mime_equivalent: mime_equivalent.into(),
        }
    }

    pub fn from_record(table: &str, record: &RawRecord) -> Result<Self, DecodeError> {
        let mut reader = FieldReader::new(table, record);
        let id = reader.optional_integer(FIELD_ID);
        let real_name = reader.string(FIELD_REAL_NAME);
        let mime_equivalent = reader.string(FIELD_MIME_EQUIVALENT);
        reader.finish()?;

        Ok(Self {
            id,
            real_name: real_name.unwrap_or_default(),
            mime_equivalent: mime_equivalent.unwrap_or_default(),
        })
    }
}
