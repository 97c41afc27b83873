use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::TablesSection;
use crate::model::encoding::{
    FIELD_CONTENT_ID, FIELD_UPDATED_AT, FIELD_VERSION_GROUP_ID, INDEX_CONTENT_ID,
};
use crate::model::Encoding;
use crate::store::{QueryRequest, RecordStore};

use super::{collect_pages, decode_records};
use super::error::{ResolveResult, ResolveStage};

/// Where candidates come from: the discovered version group, or every encoding of the content
/// updated since the identity was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum CandidateSource {
    VersionGroup {
        version_group_id: String,
    },
    Content {
        content_id: i64,
        updated_since: Option<DateTime<Utc>>,
    },
}

impl CandidateSource {
    fn request(&self, tables: &TablesSection) -> QueryRequest {
        match self {
            CandidateSource::VersionGroup { version_group_id } => QueryRequest::new(
                &tables.encodings,
                FIELD_VERSION_GROUP_ID,
                version_group_id.as_str(),
            ),
            CandidateSource::Content {
                content_id,
                updated_since,
            } => {
                let request = QueryRequest::new(&tables.encodings, FIELD_CONTENT_ID, *content_id)
                    .index(INDEX_CONTENT_ID);
                match updated_since {
                    Some(since) => request.at_least(FIELD_UPDATED_AT, lower_bound(since)),
                    None => request,
                }
            }
        }
    }
}

/// RFC 3339 at second precision with a `Z` suffix, matching how update times are stored.
pub fn lower_bound(since: &DateTime<Utc>) -> String {
    since.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Reads and decodes every candidate for `source`, best first.
pub async fn retrieve_candidates(
    store: &dyn RecordStore,
    tables: &TablesSection,
    source: &CandidateSource,
    cancel: &CancellationToken,
) -> ResolveResult<Vec<Encoding>> {
    let stage = match source {
        CandidateSource::VersionGroup { .. } => ResolveStage::VersionResolved,
        CandidateSource::Content { .. } => ResolveStage::VersionAbsent,
    };
    let request = source.request(tables);
    let records = collect_pages(store, request.clone(), cancel, stage).await?;
    let mut candidates = decode_records(&records, &request, |item| {
        Encoding::from_record(&tables.encodings, item)
    })?;

    match source {
        CandidateSource::VersionGroup { .. } => sort_by_bitrate(&mut candidates),
        CandidateSource::Content { .. } => sort_by_bitrate_then_recency(&mut candidates),
    }
    debug!(source = ?source, candidates = candidates.len(), "candidates retrieved");
    Ok(candidates)
}

pub fn sort_by_bitrate(candidates: &mut [Encoding]) {
    candidates.sort_by(|a, b| b.bitrate.cmp(&a.bitrate));
}

pub fn sort_by_bitrate_then_recency(candidates: &mut [Encoding]) {
    candidates.sort_by(|a, b| {
        b.bitrate
            .cmp(&a.bitrate)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
}
