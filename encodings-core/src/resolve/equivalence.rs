use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::model::FormatEquivalence;
use crate::store::{RecordStore, ScanRequest};

use super::error::ResolveResult;

/// Bidirectional lookup between interchangeable media-type labels.
///
/// Immutable once built; a refresh builds a new cache and swaps it in through
/// [`SharedEquivalences`].
#[derive(Debug, Clone, Default)]
pub struct FormatEquivalenceCache {
    alternates: HashMap<String, String>,
    mime_by_real_name: HashMap<String, String>,
}

impl FormatEquivalenceCache {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = FormatEquivalence>,
    {
        let mut cache = Self::default();
        for entry in entries {
            cache
                .alternates
                .insert(entry.real_name.clone(), entry.mime_equivalent.clone());
            cache
                .alternates
                .insert(entry.mime_equivalent.clone(), entry.real_name.clone());
            cache
                .mime_by_real_name
                .insert(entry.real_name, entry.mime_equivalent);
        }
        cache
    }

    /// Reads every page of `table`.
    pub async fn load(store: &dyn RecordStore, table: &str) -> ResolveResult<Self> {
        let mut request = ScanRequest::new(table);
        let mut entries = Vec::new();
        loop {
            let page = store.scan(&request).await?;
            for item in &page.items {
                entries.push(FormatEquivalence::from_record(table, item)?);
            }
            debug!(table, entries = entries.len(), "equivalence page loaded");
            match page.next {
                Some(cursor) => request.start = Some(cursor),
                None => break,
            }
        }
        let cache = Self::from_entries(entries);
        info!(table, labels = cache.len(), "format equivalence cache built");
        Ok(cache)
    }

    /// `[media_type]`, or `[media_type, alternate]` when an alternate is known.
    pub fn equivalents_for(&self, media_type: &str) -> Vec<String> {
        let mut equivalents = vec![media_type.to_string()];
        if let Some(alternate) = self.alternates.get(media_type) {
            if alternate != media_type {
                equivalents.push(alternate.clone());
            }
        }
        equivalents
    }

    /// MIME label for a stored format name, when the pair lists it as the real name.
    pub fn mime_for(&self, real_name: &str) -> Option<&str> {
        self.mime_by_real_name.get(real_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.alternates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alternates.is_empty()
    }

    /// `(real_name, mime_equivalent)` pairs, sorted by real name.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .mime_by_real_name
            .iter()
            .map(|(real, mime)| (real.clone(), mime.clone()))
            .collect();
        pairs.sort();
        pairs
    }
}

/// Process-wide handle on the current cache. Readers take a snapshot; refreshes swap the pointer.
#[derive(Debug, Clone, Default)]
pub struct SharedEquivalences {
    current: Arc<RwLock<Arc<FormatEquivalenceCache>>>,
}

impl SharedEquivalences {
    pub fn new(cache: FormatEquivalenceCache) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(cache))),
        }
    }

    pub fn snapshot(&self) -> Arc<FormatEquivalenceCache> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace(&self, cache: FormatEquivalenceCache) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(cache);
    }

    /// Rebuilds from the store; the previous cache stays live until the new one is complete.
    pub async fn refresh(&self, store: &dyn RecordStore, table: &str) -> ResolveResult<usize> {
        let cache = FormatEquivalenceCache::load(store, table).await?;
        let labels = cache.len();
        self.replace(cache);
        Ok(labels)
    }
}
