use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::model::DecodeError;
use crate::store::StoreError;

/// Progress of a single resolution, reported in logs and cancellation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStage {
    Start,
    IdentifierResolved,
    VersionResolved,
    VersionAbsent,
    CandidatesRetrieved,
    Filtered,
    Finished,
}

impl ResolveStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveStage::Start => "start",
            ResolveStage::IdentifierResolved => "identifier_resolved",
            ResolveStage::VersionResolved => "version_resolved",
            ResolveStage::VersionAbsent => "version_absent",
            ResolveStage::CandidatesRetrieved => "candidates_retrieved",
            ResolveStage::Filtered => "filtered",
            ResolveStage::Finished => "finished",
        }
    }
}

impl fmt::Display for ResolveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRequest {
    #[error("No search")]
    NoSearchCriteria,
    #[error("Invalid filespec")]
    InvalidFilename,
    #[error("Invalid title id")]
    InvalidNumericId,
    #[error("URL decode error in parameter {name}")]
    UndecodableParameter { name: &'static str },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] InvalidRequest),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("resolution cancelled at stage {stage}")]
    Cancelled { stage: ResolveStage },
}

impl ResolveError {
    pub fn status_code(&self) -> u16 {
        match self {
            ResolveError::InvalidRequest(_) => 400,
            ResolveError::Store(_) | ResolveError::Decode(_) | ResolveError::Cancelled { .. } => {
                500
            }
        }
    }

    /// Message safe to return to a caller; store details stay in the logs.
    pub fn detail(&self) -> String {
        match self {
            ResolveError::InvalidRequest(reason) => reason.to_string(),
            ResolveError::Store(_) | ResolveError::Decode(_) => "Database error".to_string(),
            ResolveError::Cancelled { .. } => "Request cancelled".to_string(),
        }
    }
}

pub type ResolveResult<T> = std::result::Result<T, ResolveError>;
