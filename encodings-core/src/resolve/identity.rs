use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TablesSection;
use crate::model::identity::{
    FIELD_ALTERNATE_ID, FIELD_EXTERNAL_KEY, INDEX_ALTERNATE_ID, INDEX_EXTERNAL_KEY,
};
use crate::model::ContentIdentity;
use crate::store::{QueryRequest, RecordStore};

use super::error::{ResolveResult, ResolveStage};
use super::{collect_up_to, decode_records};
use super::request::Identifier;

/// Looks up the identity record for `identifier`, reading at most `limit` matches across pages.
///
/// Several matches indicate inconsistent data; the most recently created one is used.
pub async fn lookup_identity(
    store: &dyn RecordStore,
    tables: &TablesSection,
    identifier: &Identifier,
    limit: usize,
    cancel: &CancellationToken,
) -> ResolveResult<Option<ContentIdentity>> {
    let request = match identifier {
        Identifier::Filename(name) => {
            QueryRequest::new(&tables.identities, FIELD_EXTERNAL_KEY, name.as_str())
                .index(INDEX_EXTERNAL_KEY)
        }
        Identifier::TitleId(id) => {
            QueryRequest::new(&tables.identities, FIELD_ALTERNATE_ID, *id).index(INDEX_ALTERNATE_ID)
        }
    };

    let records =
        collect_up_to(store, request.clone(), cancel, ResolveStage::Start, Some(limit)).await?;
    let identities = decode_records(&records, &request, |item| {
        ContentIdentity::from_record(&tables.identities, item)
    })?;

    debug!(identifier = ?identifier, matches = identities.len(), "identity lookup finished");
    if identities.len() > 1 {
        warn!(
            identifier = ?identifier,
            matches = identities.len(),
            "identifier maps to several content records; using the most recent"
        );
    }
    Ok(most_recent(identities))
}

/// Later entries win ties.
pub fn most_recent(identities: Vec<ContentIdentity>) -> Option<ContentIdentity> {
    identities.into_iter().reduce(|best, candidate| {
        if candidate.created_at >= best.created_at {
            candidate
        } else {
            best
        }
    })
}
