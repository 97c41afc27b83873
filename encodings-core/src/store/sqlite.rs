use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};
use serde_json::Value;
use tokio::task;
use tracing::debug;

use crate::config::DEFAULT_STORE_PAGE_SIZE;
use crate::model::RawRecord;
use crate::sqlite::configure_connection;

use super::import::{ImportOptions, ImportSummary};
use super::{Cursor, KeyValue, Page, QueryRequest, RecordStore, ScanRequest};
use super::{StoreError, StoreResult};

const STORE_SCHEMA: &str = include_str!("../../../sql/store.sql");

#[derive(Debug, Clone)]
pub struct SqliteRecordStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
    page_size: usize,
}

impl Default for SqliteRecordStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
            page_size: DEFAULT_STORE_PAGE_SIZE,
        }
    }
}

impl SqliteRecordStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn page_size(mut self, value: usize) -> Self {
        self.page_size = value.max(1);
        self
    }

    pub fn build(self) -> StoreResult<SqliteRecordStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        Ok(SqliteRecordStore {
            path,
            flags,
            read_only: self.read_only,
            page_size: self.page_size,
        })
    }
}

/// Record store over a SQLite file. Pages are keyed on `rowid`, so cursors stay valid while rows
/// are appended.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    path: PathBuf,
    flags: OpenFlags,
    read_only: bool,
    page_size: usize,
}

impl SqliteRecordStore {
    pub fn builder() -> SqliteRecordStoreBuilder {
        SqliteRecordStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteRecordStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn, self.read_only).map_err(|source| {
            StoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(STORE_SCHEMA)?;
        Ok(())
    }

    fn page_len(&self, limit: Option<usize>) -> usize {
        limit
            .map(|limit| limit.min(self.page_size))
            .unwrap_or(self.page_size)
            .max(1)
    }

    fn query_blocking(&self, request: &QueryRequest) -> StoreResult<Page> {
        let conn = self.open()?;
        let after = parse_cursor(request.start.as_ref())?;
        let page_len = self.page_len(request.limit);

        let mut sql = format!(
            "SELECT rowid, * FROM {table} WHERE {key} = ?1 AND rowid > ?2",
            table = quote_identifier(&request.table)?,
            key = quote_identifier(&request.key.field)?,
        );
        let mut values = vec![key_to_sql(&request.key.value), SqlValue::Integer(after)];
        if let Some(range) = &request.range {
            sql.push_str(&format!(
                " AND {field} >= ?3",
                field = quote_identifier(&range.field)?
            ));
            values.push(SqlValue::Text(range.lower_bound.clone()));
        }
        sql.push_str(&format!(" ORDER BY rowid LIMIT {page_len}"));

        let page = fetch_page(&conn, &sql, &values, page_len)?;
        debug!(
            table = %request.table,
            key = %request.key.field,
            value = %request.key.value,
            items = page.items.len(),
            more = page.next.is_some(),
            "sqlite query page"
        );
        Ok(page)
    }

    fn scan_blocking(&self, request: &ScanRequest) -> StoreResult<Page> {
        let conn = self.open()?;
        let after = parse_cursor(request.start.as_ref())?;
        let page_len = self.page_len(request.limit);
        let sql = format!(
            "SELECT rowid, * FROM {table} WHERE rowid > ?1 ORDER BY rowid LIMIT {page_len}",
            table = quote_identifier(&request.table)?,
        );
        fetch_page(&conn, &sql, &[SqlValue::Integer(after)], page_len)
    }

    /// Writes `records` into `table`, one transaction per batch.
    pub fn import(
        &self,
        table: &str,
        records: &[RawRecord],
        options: &ImportOptions,
    ) -> StoreResult<ImportSummary> {
        let table = quote_identifier(table)?;
        let mut conn = self.open()?;
        let mut summary = ImportSummary::default();

        for batch in records.chunks(options.batch_size.max(1)) {
            let tx = conn.transaction()?;
            for record in batch {
                let prepared = options.prepare(record);
                if prepared.is_empty() {
                    continue;
                }
                let mut columns = Vec::with_capacity(prepared.len());
                let mut values = Vec::with_capacity(prepared.len());
                for (name, value) in &prepared {
                    columns.push(quote_identifier(name)?);
                    values.push(json_to_sql(value)?);
                }
                let placeholders = (1..=values.len())
                    .map(|idx| format!("?{idx}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "INSERT INTO {table} ({columns}) VALUES ({placeholders})",
                    columns = columns.join(", ")
                );
                tx.execute(&sql, params_from_iter(values.iter()))?;
                summary.rows += 1;
            }
            tx.commit()?;
            summary.batches += 1;
            debug!(table = %table, rows = summary.rows, "import batch committed");
        }

        Ok(summary)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn query(&self, request: &QueryRequest) -> StoreResult<Page> {
        let store = self.clone();
        let request = request.clone();
        task::spawn_blocking(move || store.query_blocking(&request)).await?
    }

    async fn scan(&self, request: &ScanRequest) -> StoreResult<Page> {
        let store = self.clone();
        let request = request.clone();
        task::spawn_blocking(move || store.scan_blocking(&request)).await?
    }
}

fn fetch_page(
    conn: &Connection,
    sql: &str,
    values: &[SqlValue],
    page_len: usize,
) -> StoreResult<Page> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut rows = stmt.query(params_from_iter(values.iter()))?;

    let mut items = Vec::new();
    let mut last_rowid = None;
    while let Some(row) = rows.next()? {
        last_rowid = Some(row.get::<_, i64>(0)?);
        items.push(row_to_record(row, &columns)?);
    }

    let next = match last_rowid {
        Some(rowid) if items.len() >= page_len => Some(Cursor::new(rowid.to_string())),
        _ => None,
    };
    Ok(Page { items, next })
}

fn row_to_record(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<RawRecord> {
    let mut record = RawRecord::new();
    // column 0 is the rowid used for paging
    for (idx, name) in columns.iter().enumerate().skip(1) {
        let value = match row.get_ref(idx)? {
            ValueRef::Null | ValueRef::Blob(_) => continue,
            ValueRef::Integer(value) => Value::from(value),
            ValueRef::Real(value) => match serde_json::Number::from_f64(value) {
                Some(number) => Value::Number(number),
                None => continue,
            },
            ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        };
        record.insert(name.clone(), value);
    }
    Ok(record)
}

fn parse_cursor(cursor: Option<&Cursor>) -> StoreResult<i64> {
    match cursor {
        None => Ok(0),
        Some(cursor) => cursor
            .as_str()
            .parse::<i64>()
            .map_err(|_| StoreError::InvalidCursor(cursor.as_str().to_string())),
    }
}

fn key_to_sql(value: &KeyValue) -> SqlValue {
    match value {
        KeyValue::Text(text) => SqlValue::Text(text.clone()),
        KeyValue::Integer(number) => SqlValue::Integer(*number),
    }
}

fn json_to_sql(value: &Value) -> StoreResult<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => SqlValue::Real(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(serde_json::to_string(value)?),
    })
}

/// Table and field names come from configuration and requests, so they are checked before being
/// spliced into SQL.
fn quote_identifier(name: &str) -> StoreResult<String> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("\"{name}\""))
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
