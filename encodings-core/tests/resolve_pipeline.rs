use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use encodings_core::model::FormatEquivalence;
use encodings_core::resolve::{InvalidRequest, ResolveStage, M3U8_MEDIA_TYPE};
use encodings_core::store::{
    KeyValue, Page, QueryRequest, RecordedRequest, ScanRequest, StoreResult,
};
use encodings_core::{
    FormatEquivalenceCache, MemoryRecordStore, NotFoundReason, RawRecord, RecordStore,
    Resolution, ResolveError, Resolver, ResolverSection, SharedEquivalences, TablesSection,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn record(value: serde_json::Value) -> RawRecord {
    value.as_object().cloned().unwrap()
}

fn identity(content_id: i64, filebase: &str, lastupdate: &str) -> RawRecord {
    record(json!({
        "content_id": content_id,
        "filebase": filebase,
        "project": "archive",
        "lastupdate": lastupdate,
        "title_id": content_id + 10_000,
    }))
}

fn encoding(
    encoding_id: i64,
    version_id: Option<&str>,
    format: &str,
    vbitrate: i64,
    lastupdate: &str,
) -> RawRecord {
    let mut item = record(json!({
        "encoding_id": encoding_id,
        "content_id": 2222,
        "url": format!("http://cdn.example.com/media/{encoding_id}/master.{format}"),
        "format": format,
        "mobile": 0,
        "multirate": 0,
        "vcodec": "h264",
        "acodec": "aac",
        "vbitrate": vbitrate,
        "abitrate": 128,
        "frame_width": 1920,
        "frame_height": 1080,
        "duration": 120.5,
        "file_size": 1_048_576,
        "lastupdate": lastupdate,
        "aspect": "16x9",
    }));
    if let Some(version_id) = version_id {
        item.insert("version_id".into(), json!(version_id));
    }
    item
}

fn resolver(store: Arc<dyn RecordStore>, equivalences: FormatEquivalenceCache) -> Resolver {
    Resolver::new(
        store,
        TablesSection::default(),
        SharedEquivalences::new(equivalences),
        ResolverSection::default(),
    )
}

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn versioned_store() -> MemoryRecordStore {
    let store = MemoryRecordStore::default();
    store.insert(
        "idmapping",
        identity(2222, "mygreatvideo", "2016-02-03T04:05:06Z"),
    );
    store.extend(
        "encodings",
        [
            encoding(1, Some("KP-12345"), "mp4", 12345, "2019-01-01T00:00:00Z"),
            encoding(2, Some("KP-12346"), "mp4", 9000, "2018-01-01T00:00:00Z"),
            encoding(3, Some("KP-12347"), "mp4", 8000, "2017-01-01T00:00:00Z"),
        ],
    );
    store
}

#[tokio::test]
async fn resolves_through_latest_version_group() {
    let store = Arc::new(versioned_store());
    let resolver = resolver(store.clone(), FormatEquivalenceCache::default());

    let resolution = resolver
        .resolve_params(
            &params(&[("file", "mygreatvideo")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(resolution.status_code(), 200);
    let selected = resolution.selected().unwrap();
    assert_eq!(selected.encoding.content_id, 2222);
    assert_eq!(selected.encoding.bitrate, 12345);
    assert_eq!(selected.encoding.version_group_id.as_deref(), Some("KP-12345"));
    assert_eq!(selected.display_format, "mp4");
    assert_eq!(
        selected.encoding.url,
        "https://cdn.example.com/media/1/master.mp4"
    );
    assert_eq!(
        selected.poster_url.as_deref(),
        Some("https://cdn.example.com/media/1/master_poster.jpg")
    );

    let requests = store.requests();
    assert_eq!(requests.len(), 3);
    assert!(matches!(
        &requests[2],
        RecordedRequest::Query { field, value, .. }
            if field == "version_id" && *value == KeyValue::from("KP-12345")
    ));
}

#[tokio::test]
async fn falls_back_to_content_bounded_by_identity_creation() {
    let store = Arc::new(MemoryRecordStore::default());
    store.insert(
        "idmapping",
        identity(2222, "mygreatvideo", "2018-06-01T00:00:00Z"),
    );
    store.extend(
        "encodings",
        [
            encoding(1, None, "mp4", 5000, "2017-01-01T00:00:00Z"),
            encoding(2, None, "mp4", 3000, "2019-01-01T00:00:00Z"),
            encoding(3, Some("ABSENT"), "mp4", 3000, "2020-01-01T00:00:00Z"),
        ],
    );
    let resolver = resolver(store.clone(), FormatEquivalenceCache::default());

    let resolution = resolver
        .resolve_params(
            &params(&[("file", "mygreatvideo")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let selected = resolution.selected().unwrap();
    assert_eq!(selected.encoding.encoding_id, 3);

    let requests = store.requests();
    assert!(!requests.iter().any(|request| matches!(
        request,
        RecordedRequest::Query { field, .. } if field == "version_id"
    )));
    assert!(matches!(
        requests.last().unwrap(),
        RecordedRequest::Query { field, lower_bound: Some(bound), .. }
            if field == "content_id" && bound == "2018-06-01T00:00:00Z"
    ));
}

#[tokio::test]
async fn allow_old_drops_the_recency_bound() {
    let store = Arc::new(MemoryRecordStore::default());
    store.insert(
        "idmapping",
        identity(2222, "mygreatvideo", "2018-06-01T00:00:00Z"),
    );
    store.insert(
        "encodings",
        encoding(1, None, "mp4", 5000, "2017-01-01T00:00:00Z"),
    );
    let resolver = resolver(store.clone(), FormatEquivalenceCache::default());
    let cancel = CancellationToken::new();

    let bounded = resolver
        .resolve_params(&params(&[("file", "mygreatvideo")]), &cancel)
        .await
        .unwrap();
    assert_eq!(
        bounded,
        Resolution::NotFound(NotFoundReason::NoMatchingEncoding)
    );

    let unbounded = resolver
        .resolve_params(
            &params(&[("file", "mygreatvideo"), ("allow_old", "")]),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(unbounded.selected().unwrap().encoding.encoding_id, 1);
}

#[tokio::test]
async fn corrupted_m3u8_format_rewrites_url_tail() {
    let store = Arc::new(MemoryRecordStore::default());
    store.insert(
        "idmapping",
        identity(2222, "mygreatvideo", "2016-02-03T04:05:06Z"),
    );
    store.extend(
        "encodings",
        [
            encoding(1, Some("KP-12345"), "mp4", 9000, "2019-01-01T00:00:00Z"),
            encoding(2, Some("KP-12345"), "m3u8", 4000, "2019-01-01T00:00:00Z"),
        ],
    );
    let equivalences =
        FormatEquivalenceCache::from_entries([FormatEquivalence::new("m3u8", M3U8_MEDIA_TYPE)]);
    let resolver = resolver(store, equivalences);

    let resolution = resolver
        .resolve_params(
            &params(&[
                ("file", "mygreatvideo"),
                ("format", "video/somefilename.m3u8"),
            ]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let selected = resolution.selected().unwrap();
    assert_eq!(selected.encoding.encoding_id, 2);
    assert_eq!(selected.display_format, M3U8_MEDIA_TYPE);
    assert_eq!(
        selected.encoding.url,
        "https://cdn.example.com/media/2/somefilename.m3u8"
    );
    assert_eq!(
        selected.poster_url.as_deref(),
        Some("https://cdn.example.com/media/2/master_poster.jpg")
    );
}

#[tokio::test]
async fn equivalent_format_labels_match() {
    let store = Arc::new(versioned_store());
    let equivalences =
        FormatEquivalenceCache::from_entries([FormatEquivalence::new("mp4", "video/mp4")]);
    let resolver = resolver(store, equivalences);
    let cancel = CancellationToken::new();

    let requested = resolver
        .resolve_params(
            &params(&[("file", "mygreatvideo"), ("format", "video%2Fmp4")]),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(requested.selected().unwrap().display_format, "video/mp4");

    let unrequested = resolver
        .resolve_params(&params(&[("file", "mygreatvideo")]), &cancel)
        .await
        .unwrap();
    assert_eq!(unrequested.selected().unwrap().display_format, "video/mp4");
}

#[tokio::test]
async fn unknown_content_is_not_found() {
    let store = Arc::new(versioned_store());
    let resolver = resolver(store.clone(), FormatEquivalenceCache::default());

    let resolution = resolver
        .resolve_params(&params(&[("titleid", "424242")]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        resolution,
        Resolution::NotFound(NotFoundReason::UnknownContent)
    );
    assert_eq!(resolution.status_code(), 404);
    assert_eq!(store.request_count(), 1);
}

#[tokio::test]
async fn invalid_requests_never_reach_the_store() {
    let store = Arc::new(versioned_store());
    let resolver = resolver(store.clone(), FormatEquivalenceCache::default());
    let cancel = CancellationToken::new();

    let err = resolver
        .resolve_params(&params(&[("format", "mp4")]), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::InvalidRequest(InvalidRequest::NoSearchCriteria)
    ));
    assert_eq!(err.status_code(), 400);

    let err = resolver
        .resolve_params(&params(&[("file", "x'; DROP TABLE encodings")]), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::InvalidRequest(InvalidRequest::InvalidFilename)
    ));

    let err = resolver
        .resolve_params(&params(&[("titleid", "12a")]), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::InvalidRequest(InvalidRequest::InvalidNumericId)
    ));

    assert_eq!(store.request_count(), 0);
}

#[tokio::test]
async fn store_failures_are_not_reported_as_missing() {
    let store = Arc::new(versioned_store());
    store.fail_table("encodings");
    let resolver = resolver(store, FormatEquivalenceCache::default());

    let err = resolver
        .resolve_params(
            &params(&[("file", "mygreatvideo")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Store(_)));
    assert_eq!(err.status_code(), 500);
    assert_eq!(err.detail(), "Database error");
}

#[tokio::test]
async fn paging_stops_at_the_first_failing_page() {
    let store = Arc::new(MemoryRecordStore::new(1));
    store.insert(
        "idmapping",
        identity(2222, "mygreatvideo", "2016-02-03T04:05:06Z"),
    );
    store.extend(
        "encodings",
        [
            encoding(1, Some("KP-12345"), "mp4", 12345, "2019-01-01T00:00:00Z"),
            encoding(2, Some("KP-12346"), "mp4", 9000, "2018-01-01T00:00:00Z"),
            encoding(3, Some("KP-12347"), "mp4", 8000, "2017-01-01T00:00:00Z"),
        ],
    );
    store.fail_table_after("encodings", 1);
    let resolver = resolver(store.clone(), FormatEquivalenceCache::default());

    let err = resolver
        .resolve_params(
            &params(&[("file", "mygreatvideo")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Store(_)));
    assert_eq!(err.status_code(), 500);

    // identity lookup, first encodings page, failing second page; nothing after.
    let requests = store.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].table(), "encodings");
}

#[tokio::test]
async fn malformed_candidate_is_a_server_error() {
    let store = Arc::new(MemoryRecordStore::default());
    store.insert(
        "idmapping",
        identity(2222, "mygreatvideo", "2016-02-03T04:05:06Z"),
    );
    let mut broken = encoding(1, Some("KP-12345"), "mp4", 12345, "2019-01-01T00:00:00Z");
    broken.remove("url");
    broken.insert("vbitrate".into(), json!("fast"));
    store.insert("encodings", broken);
    let resolver = resolver(store, FormatEquivalenceCache::default());

    let err = resolver
        .resolve_params(
            &params(&[("file", "mygreatvideo")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    match &err {
        ResolveError::Decode(decode) => {
            assert_eq!(decode.table, "encodings");
            assert!(decode.problem("url").is_some());
        }
        other => panic!("expected a decode error, got {other:?}"),
    }
    assert_eq!(err.status_code(), 500);
    assert_eq!(err.detail(), "Database error");
}

#[tokio::test]
async fn duplicate_identities_across_pages_use_the_most_recent() {
    let store = Arc::new(MemoryRecordStore::new(1));
    store.extend(
        "idmapping",
        [
            identity(1111, "dup", "2015-01-01T00:00:00Z"),
            identity(2222, "dup", "2019-01-01T00:00:00Z"),
        ],
    );
    store.insert(
        "encodings",
        encoding(1, Some("KP-12345"), "mp4", 12345, "2019-06-01T00:00:00Z"),
    );
    let resolver = resolver(store.clone(), FormatEquivalenceCache::default());

    let resolution = resolver
        .resolve_params(&params(&[("file", "dup")]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resolution.selected().unwrap().encoding.content_id, 2222);

    let identity_reads = store
        .requests()
        .iter()
        .filter(|request| request.table() == "idmapping")
        .count();
    assert_eq!(identity_reads, 2);
}

#[tokio::test]
async fn poster_request_without_a_poster_is_not_found() {
    let store = Arc::new(MemoryRecordStore::default());
    store.insert(
        "idmapping",
        identity(2222, "mygreatvideo", "2016-02-03T04:05:06Z"),
    );
    let mut item = encoding(1, Some("KP-12345"), "mp4", 12345, "2019-01-01T00:00:00Z");
    item.insert("url".into(), json!("http://cdn.example.com/media/1/stream"));
    store.insert("encodings", item);
    let resolver = resolver(store, FormatEquivalenceCache::default());
    let cancel = CancellationToken::new();

    let plain = resolver
        .resolve_params(&params(&[("file", "mygreatvideo")]), &cancel)
        .await
        .unwrap();
    assert_eq!(plain.status_code(), 200);
    assert_eq!(plain.selected().unwrap().poster_url, None);

    let poster = resolver
        .resolve_params(&params(&[("file", "mygreatvideo"), ("poster", "")]), &cancel)
        .await
        .unwrap();
    assert_eq!(poster, Resolution::NotFound(NotFoundReason::NoPoster));
    assert_eq!(poster.status_code(), 404);
}

#[tokio::test]
async fn cancelled_request_stops_before_the_store() {
    let store = Arc::new(versioned_store());
    let resolver = resolver(store.clone(), FormatEquivalenceCache::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = resolver
        .resolve_params(&params(&[("file", "mygreatvideo")]), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Cancelled {
            stage: ResolveStage::Start
        }
    ));
    assert_eq!(store.request_count(), 0);
}

struct StalledStore;

#[async_trait]
impl RecordStore for StalledStore {
    async fn query(&self, _request: &QueryRequest) -> StoreResult<Page> {
        std::future::pending().await
    }

    async fn scan(&self, _request: &ScanRequest) -> StoreResult<Page> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn deadline_cancels_a_stalled_lookup() {
    let resolver = resolver(Arc::new(StalledStore), FormatEquivalenceCache::default());
    let err = resolver
        .resolve_within(
            &params(&[("file", "mygreatvideo")]),
            &CancellationToken::new(),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Cancelled { .. }));
    assert_eq!(err.detail(), "Request cancelled");
}

#[tokio::test]
async fn refresh_picks_up_new_equivalences() {
    let store = Arc::new(versioned_store());
    store.insert(
        "mime_equivalents",
        record(json!({"id": 1, "real_name": "mp4", "mime_equivalent": "video/mp4"})),
    );
    let resolver = resolver(store, FormatEquivalenceCache::default());
    assert!(resolver.equivalences().snapshot().is_empty());

    let labels = resolver.refresh_equivalences().await.unwrap();
    assert_eq!(labels, 2);
    assert_eq!(
        resolver.equivalences().snapshot().mime_for("mp4"),
        Some("video/mp4")
    );
}
