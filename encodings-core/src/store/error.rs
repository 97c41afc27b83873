use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("record store path not configured")]
    MissingStore,
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("invalid pagination cursor {0:?}")]
    InvalidCursor(String),
    #[error("line {line} is not a JSON object")]
    InvalidRecord { line: usize },
    #[error("table {table} is unavailable: {reason}")]
    Unavailable { table: String, reason: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
