use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::model::RawRecord;

use super::{Cursor, KeyValue, Page, QueryRequest, RecordStore, ScanRequest};
use super::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedRequest {
    Query {
        table: String,
        index: Option<String>,
        field: String,
        value: KeyValue,
        lower_bound: Option<String>,
    },
    Scan {
        table: String,
    },
}

impl RecordedRequest {
    pub fn table(&self) -> &str {
        match self {
            RecordedRequest::Query { table, .. } | RecordedRequest::Scan { table } => table,
        }
    }
}

/// In-process record store. Items are returned in insertion order, `page_size` at a time.
///
/// Every request is recorded, and tables can be marked as failing to exercise error paths.
#[derive(Debug)]
pub struct MemoryRecordStore {
    page_size: usize,
    tables: Mutex<HashMap<String, Vec<RawRecord>>>,
    /// Requests each failing table still answers before it starts failing.
    failing: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new(100)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryRecordStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            tables: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, table: &str, record: RawRecord) {
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .push(record);
    }

    pub fn extend<I>(&self, table: &str, records: I)
    where
        I: IntoIterator<Item = RawRecord>,
    {
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .extend(records);
    }

    /// Requests against `table` fail with [`StoreError::Unavailable`] from now on.
    pub fn fail_table(&self, table: &str) {
        self.fail_table_after(table, 0);
    }

    /// Requests against `table` succeed `successes` more times, then fail.
    pub fn fail_table_after(&self, table: &str, successes: usize) {
        lock(&self.failing).insert(table.to_string(), successes);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    fn check_available(&self, table: &str) -> StoreResult<()> {
        match lock(&self.failing).get_mut(table) {
            Some(0) => Err(StoreError::Unavailable {
                table: table.to_string(),
                reason: "marked as failing".to_string(),
            }),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn page_of(
        &self,
        matching: Vec<RawRecord>,
        start: Option<&Cursor>,
        limit: Option<usize>,
    ) -> StoreResult<Page> {
        let offset = match start {
            None => 0,
            Some(cursor) => cursor
                .as_str()
                .parse::<usize>()
                .map_err(|_| StoreError::InvalidCursor(cursor.as_str().to_string()))?,
        };
        let page_len = limit
            .map(|limit| limit.min(self.page_size))
            .unwrap_or(self.page_size)
            .max(1);
        let end = offset.saturating_add(page_len).min(matching.len());
        let items = matching
            .get(offset..end)
            .map(|slice| slice.to_vec())
            .unwrap_or_default();
        let next = (end < matching.len()).then(|| Cursor::new(end.to_string()));
        Ok(Page { items, next })
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn query(&self, request: &QueryRequest) -> StoreResult<Page> {
        lock(&self.requests).push(RecordedRequest::Query {
            table: request.table.clone(),
            index: request.index.clone(),
            field: request.key.field.clone(),
            value: request.key.value.clone(),
            lower_bound: request.range.as_ref().map(|range| range.lower_bound.clone()),
        });
        self.check_available(&request.table)?;

        let matching: Vec<RawRecord> = lock(&self.tables)
            .get(&request.table)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| request.matches(item))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        self.page_of(matching, request.start.as_ref(), request.limit)
    }

    async fn scan(&self, request: &ScanRequest) -> StoreResult<Page> {
        lock(&self.requests).push(RecordedRequest::Scan {
            table: request.table.clone(),
        });
        self.check_available(&request.table)?;

        let items = lock(&self.tables)
            .get(&request.table)
            .cloned()
            .unwrap_or_default();
        self.page_of(items, request.start.as_ref(), request.limit)
    }
}
