use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{ResolverSection, TablesSection};
use crate::store::RecordStore;

use super::equivalence::SharedEquivalences;
use super::error::{ResolveError, ResolveResult, ResolveStage};
use super::finisher::{finish, SelectedEncoding};
use super::identity::lookup_identity;
use super::request::ResolveRequest;
use super::retrieval::{retrieve_candidates, CandidateSource};
use super::selector::select_first;
use super::version::discover_version_group;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundReason {
    UnknownContent,
    NoMatchingEncoding,
    NoPoster,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundReason::UnknownContent => f.write_str("Content not found"),
            NotFoundReason::NoMatchingEncoding => {
                f.write_str("No encodings matching your request")
            }
            NotFoundReason::NoPoster => f.write_str("No poster URL found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Selected(Box<SelectedEncoding>),
    NotFound(NotFoundReason),
}

impl Resolution {
    pub fn status_code(&self) -> u16 {
        match self {
            Resolution::Selected(_) => 200,
            Resolution::NotFound(_) => 404,
        }
    }

    pub fn selected(&self) -> Option<&SelectedEncoding> {
        match self {
            Resolution::Selected(selected) => Some(selected.as_ref()),
            Resolution::NotFound(_) => None,
        }
    }
}

/// JSON body returned alongside every non-200 outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub detail: String,
}

impl ErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            status: "error",
            detail: detail.into(),
        }
    }
}

impl From<&ResolveError> for ErrorBody {
    fn from(err: &ResolveError) -> Self {
        Self::new(err.detail())
    }
}

impl From<NotFoundReason> for ErrorBody {
    fn from(reason: NotFoundReason) -> Self {
        Self::new(reason.to_string())
    }
}

/// Turns request parameters into the single best encoding.
///
/// The store, table names and equivalence cache are injected; the resolver itself keeps no
/// per-request state.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn RecordStore>,
    tables: TablesSection,
    equivalences: SharedEquivalences,
    settings: ResolverSection,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("tables", &self.tables)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Resolver {
    pub fn new(
        store: Arc<dyn RecordStore>,
        tables: TablesSection,
        equivalences: SharedEquivalences,
        settings: ResolverSection,
    ) -> Self {
        Self {
            store,
            tables,
            equivalences,
            settings,
        }
    }

    pub fn equivalences(&self) -> &SharedEquivalences {
        &self.equivalences
    }

    /// Re-reads the equivalence table and swaps the shared cache.
    pub async fn refresh_equivalences(&self) -> ResolveResult<usize> {
        self.equivalences
            .refresh(self.store.as_ref(), &self.tables.equivalents)
            .await
    }

    pub async fn resolve_params(
        &self,
        params: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> ResolveResult<Resolution> {
        let request = ResolveRequest::from_params(params)?;
        self.resolve(&request, cancel).await
    }

    /// Like [`Resolver::resolve_params`], but cancels itself once the configured request timeout
    /// elapses.
    pub async fn resolve_with_deadline(
        &self,
        params: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> ResolveResult<Resolution> {
        self.resolve_within(params, cancel, self.settings.request_timeout())
            .await
    }

    pub async fn resolve_within(
        &self,
        params: &HashMap<String, String>,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> ResolveResult<Resolution> {
        let deadline = cancel.child_token();
        let timer = {
            let deadline = deadline.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                deadline.cancel();
            })
        };
        let result = self.resolve_params(params, &deadline).await;
        timer.abort();
        result
    }

    pub async fn resolve(
        &self,
        request: &ResolveRequest,
        cancel: &CancellationToken,
    ) -> ResolveResult<Resolution> {
        let result = self.run(request, cancel).await;
        match &result {
            Ok(resolution) => info!(
                identifier = ?request.identifier,
                status = resolution.status_code(),
                "resolution finished"
            ),
            Err(err @ (ResolveError::Store(_) | ResolveError::Decode(_))) => error!(
                identifier = ?request.identifier,
                error = %err,
                "store failure during resolution"
            ),
            Err(err) => info!(
                identifier = ?request.identifier,
                error = %err,
                "resolution failed"
            ),
        }
        result
    }

    async fn run(
        &self,
        request: &ResolveRequest,
        cancel: &CancellationToken,
    ) -> ResolveResult<Resolution> {
        let store = self.store.as_ref();
        let equivalents = self.equivalences.snapshot();
        let criteria = request.criteria(&equivalents);

        let Some(identity) = lookup_identity(
            store,
            &self.tables,
            &request.identifier,
            self.settings.identity_lookup_limit,
            cancel,
        )
        .await?
        else {
            return Ok(Resolution::NotFound(NotFoundReason::UnknownContent));
        };
        let mut stage = ResolveStage::IdentifierResolved;
        info!(content_id = identity.content_id, stage = %stage, "identity resolved");

        let version =
            discover_version_group(store, &self.tables, identity.content_id, cancel).await?;
        let source = match version {
            Some(version_group_id) => {
                stage = ResolveStage::VersionResolved;
                CandidateSource::VersionGroup { version_group_id }
            }
            None => {
                stage = ResolveStage::VersionAbsent;
                CandidateSource::Content {
                    content_id: identity.content_id,
                    updated_since: (!request.allow_old).then_some(identity.created_at),
                }
            }
        };
        info!(
            content_id = identity.content_id,
            stage = %stage,
            source = ?source,
            "candidate source chosen"
        );

        let candidates = retrieve_candidates(store, &self.tables, &source, cancel).await?;
        stage = ResolveStage::CandidatesRetrieved;
        info!(candidates = candidates.len(), stage = %stage, "candidates ready for selection");

        let Some(chosen) = select_first(&candidates, &criteria) else {
            return Ok(Resolution::NotFound(NotFoundReason::NoMatchingEncoding));
        };
        stage = ResolveStage::Filtered;
        info!(encoding_id = chosen.encoding_id, stage = %stage, "encoding selected");

        let display_format = match criteria.formats.first() {
            Some(requested) => requested.clone(),
            None => equivalents
                .mime_for(&chosen.media_type)
                .unwrap_or(chosen.media_type.as_str())
                .to_string(),
        };
        let selected = finish(
            chosen.clone(),
            display_format,
            &request.finish,
            request.filename_override(),
        );
        if request.poster && selected.poster_url.is_none() {
            return Ok(Resolution::NotFound(NotFoundReason::NoPoster));
        }
        info!(
            encoding_id = selected.encoding.encoding_id,
            stage = %ResolveStage::Finished,
            "resolution complete"
        );
        Ok(Resolution::Selected(Box::new(selected)))
    }
}
