use std::io::BufRead;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::model::RawRecord;

use super::{StoreError, StoreResult};

/// Rows written per transaction during an import.
pub const IMPORT_BATCH_SIZE: usize = 25;

/// Stored in place of an empty string in a key field that indexes cannot hold empty.
pub const ABSENT_SENTINEL: &str = "ABSENT";

pub const UID_FIELD: &str = "uid";

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub nullable_key_fields: Vec<String>,
    pub generate_uid: bool,
    pub batch_size: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            nullable_key_fields: Vec::new(),
            generate_uid: false,
            batch_size: IMPORT_BATCH_SIZE,
        }
    }
}

impl ImportOptions {
    pub(crate) fn prepare(&self, record: &RawRecord) -> RawRecord {
        let mut prepared = record.clone();
        for field in &self.nullable_key_fields {
            if let Some(Value::String(value)) = prepared.get_mut(field) {
                if value.is_empty() {
                    *value = ABSENT_SENTINEL.to_string();
                }
            }
        }
        if self.generate_uid && !prepared.contains_key(UID_FIELD) {
            prepared.insert(
                UID_FIELD.to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }
        prepared
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub rows: usize,
    pub batches: usize,
}

/// Reads one JSON object per line; blank lines are skipped.
pub fn read_records<R: BufRead>(reader: R) -> StoreResult<Vec<RawRecord>> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line)? {
            Value::Object(record) => records.push(record),
            _ => return Err(StoreError::InvalidRecord { line: index + 1 }),
        }
    }
    Ok(records)
}
