//! Paged access to keyed record tables.
//!
//! The resolver only ever issues equality queries (optionally bounded below on a range field) and
//! full scans; both return one page at a time together with a continuation cursor.

pub mod error;
pub mod import;
pub mod memory;
pub mod sqlite;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::RawRecord;

pub use error::{StoreError, StoreResult};
pub use import::{read_records, ImportOptions, ImportSummary, ABSENT_SENTINEL, IMPORT_BATCH_SIZE};
pub use memory::{MemoryRecordStore, RecordedRequest};
pub use sqlite::{SqliteRecordStore, SqliteRecordStoreBuilder};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> StoreResult<Page>;
    async fn scan(&self, request: &ScanRequest) -> StoreResult<Page>;
}

/// Opaque continuation token handed back by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue {
    Text(String),
    Integer(i64),
}

impl KeyValue {
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (KeyValue::Text(expected), Value::String(actual)) => expected == actual,
            (KeyValue::Integer(expected), Value::Number(actual)) => {
                actual.as_i64() == Some(*expected)
            }
            _ => false,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Text(value) => f.write_str(value),
            KeyValue::Integer(value) => write!(f, "{value}"),
        }
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Text(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Text(value.to_string())
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Integer(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCondition {
    pub field: String,
    pub value: KeyValue,
}

/// `field >= lower_bound`, compared as strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeCondition {
    pub field: String,
    pub lower_bound: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub table: String,
    pub index: Option<String>,
    pub key: KeyCondition,
    pub range: Option<RangeCondition>,
    pub limit: Option<usize>,
    pub start: Option<Cursor>,
}

impl QueryRequest {
    pub fn new(
        table: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<KeyValue>,
    ) -> Self {
        Self {
            table: table.into(),
            index: None,
            key: KeyCondition {
                field: field.into(),
                value: value.into(),
            },
            range: None,
            limit: None,
            start: None,
        }
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    pub fn at_least(mut self, field: impl Into<String>, lower_bound: impl Into<String>) -> Self {
        self.range = Some(RangeCondition {
            field: field.into(),
            lower_bound: lower_bound.into(),
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Does the record satisfy the key and range conditions?
    pub fn matches(&self, record: &RawRecord) -> bool {
        let key_matches = record
            .get(&self.key.field)
            .map(|value| self.key.value.matches(value))
            .unwrap_or(false);
        let range_matches = match &self.range {
            None => true,
            Some(range) => match record.get(&range.field) {
                Some(Value::String(value)) => value.as_str() >= range.lower_bound.as_str(),
                _ => false,
            },
        };
        key_matches && range_matches
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub table: String,
    pub limit: Option<usize>,
    pub start: Option<Cursor>,
}

impl ScanRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            limit: None,
            start: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<RawRecord>,
    pub next: Option<Cursor>,
}
