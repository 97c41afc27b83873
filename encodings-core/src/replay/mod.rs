//! Offline regression harness: re-issues captured endpoint traffic against a deployment and
//! reports every response that differs from the recorded one.

pub mod compare;
pub mod event;
pub mod probe;
pub mod report;
pub mod runner;

use thiserror::Error;

use crate::model::DecodeError;
use crate::store::StoreError;

pub use compare::compare_response;
pub use event::CapturedEvent;
pub use probe::{target_url, EndpointProbe, HttpProbe, ObservedResponse};
pub use report::{write_report, FailureRecord};
pub use runner::{ReplayOutcome, ReplayReport, ReplayRunner, ReplaySettings, ReplaySummary};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("replay worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("original URL {0} could not be parsed")]
    UnparsableUrl(String),
    #[error("target URL {url} is invalid: {source}")]
    InvalidTarget {
        url: String,
        source: url::ParseError,
    },
    #[error("replay cancelled")]
    Cancelled,
}

pub type ReplayResult<T> = std::result::Result<T, ReplayError>;
