//! The resolution pipeline: identifier lookup, version discovery, candidate retrieval,
//! selection and finishing.

pub mod equivalence;
pub mod error;
pub mod finisher;
pub mod identity;
pub mod pipeline;
pub mod request;
pub mod retrieval;
pub mod selector;
pub mod version;

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::model::{DecodeError, RawRecord};
use crate::store::{QueryRequest, RecordStore, StoreResult};

pub use equivalence::{FormatEquivalenceCache, SharedEquivalences};
pub use error::{InvalidRequest, ResolveError, ResolveResult, ResolveStage};
pub use finisher::{FinishOptions, SelectedEncoding, M3U8_MEDIA_TYPE};
pub use pipeline::{ErrorBody, NotFoundReason, Resolution, Resolver};
pub use request::{Identifier, RequestedFormat, ResolveRequest};
pub use retrieval::CandidateSource;
pub use selector::{Bounds, SelectionCriteria};

/// Runs one store round trip unless `cancel` fires first.
pub(crate) async fn guarded<F, T>(
    operation: F,
    cancel: &CancellationToken,
    stage: ResolveStage,
) -> ResolveResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(ResolveError::Cancelled { stage });
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResolveError::Cancelled { stage }),
        result = operation => result.map_err(ResolveError::from),
    }
}

/// Follows continuation cursors until the query is exhausted.
pub(crate) async fn collect_pages(
    store: &dyn RecordStore,
    request: QueryRequest,
    cancel: &CancellationToken,
    stage: ResolveStage,
) -> ResolveResult<Vec<RawRecord>> {
    collect_up_to(store, request, cancel, stage, None).await
}

/// Follows continuation cursors until the query is exhausted or `cap` records have been read.
///
/// A failing page ends the read; the failure is logged with the query that caused it.
pub(crate) async fn collect_up_to(
    store: &dyn RecordStore,
    mut request: QueryRequest,
    cancel: &CancellationToken,
    stage: ResolveStage,
    cap: Option<usize>,
) -> ResolveResult<Vec<RawRecord>> {
    let mut items = Vec::new();
    loop {
        if let Some(cap) = cap {
            if items.len() >= cap {
                items.truncate(cap);
                return Ok(items);
            }
            request.limit = Some(cap - items.len());
        }
        let page = match guarded(store.query(&request), cancel, stage).await {
            Ok(page) => page,
            Err(err) => {
                if let ResolveError::Store(source) = &err {
                    error!(
                        table = %request.table,
                        index = ?request.index,
                        field = %request.key.field,
                        key = %request.key.value,
                        stage = %stage,
                        error = %source,
                        "store query failed"
                    );
                }
                return Err(err);
            }
        };
        items.extend(page.items);
        match page.next {
            Some(cursor) => request.start = Some(cursor),
            None => {
                if let Some(cap) = cap {
                    items.truncate(cap);
                }
                return Ok(items);
            }
        }
    }
}

/// Decodes every record read by `request`, logging the first undecodable one with its query.
pub(crate) fn decode_records<T, F>(
    records: &[RawRecord],
    request: &QueryRequest,
    decode: F,
) -> ResolveResult<Vec<T>>
where
    F: Fn(&RawRecord) -> Result<T, DecodeError>,
{
    records
        .iter()
        .map(|record| {
            decode(record).map_err(|err| {
                let fields: Vec<&str> = err.problems.iter().map(|(field, _)| field.as_str()).collect();
                error!(
                    table = %request.table,
                    field = %request.key.field,
                    key = %request.key.value,
                    fields = ?fields,
                    error = %err,
                    "undecodable record"
                );
                ResolveError::from(err)
            })
        })
        .collect()
}
