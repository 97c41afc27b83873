use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::{RecordStore, ScanRequest};

use super::compare::compare_response;
use super::event::CapturedEvent;
use super::probe::{target_url, EndpointProbe, ObservedResponse};
use super::report::FailureRecord;
use super::{ReplayError, ReplayResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaySettings {
    pub table: String,
    pub target: String,
    pub parallel: usize,
    pub page_size: usize,
}

/// The result of replaying one captured event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayOutcome {
    pub event: CapturedEvent,
    pub target_url: Option<String>,
    pub observed: Option<ObservedResponse>,
    pub problems: Vec<String>,
    /// Set when the request could not be made at all.
    pub error: Option<String>,
}

impl ReplayOutcome {
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.problems.is_empty()
    }

    pub fn errored(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    /// Events that decoded but carry nothing replayable.
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub summary: ReplaySummary,
    pub failures: Vec<FailureRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reader_error: Option<String>,
}

impl ReplayReport {
    fn record(&mut self, outcome: ReplayOutcome) {
        self.summary.total += 1;
        if outcome.passed() {
            self.summary.passed += 1;
        } else {
            if outcome.errored() {
                self.summary.errored += 1;
            } else {
                self.summary.failed += 1;
            }
            self.failures.push(FailureRecord::from_outcome(&outcome));
        }
        debug!(
            passed = self.summary.passed,
            total = self.summary.total,
            "running replay total"
        );
    }
}

#[derive(Debug, Default)]
struct ReaderStats {
    read: usize,
    skipped: usize,
}

/// Streams captured events out of the store and replays them against a target, at most
/// `parallel` requests in flight.
pub struct ReplayRunner {
    store: Arc<dyn RecordStore>,
    probe: Arc<dyn EndpointProbe>,
    settings: ReplaySettings,
}

impl ReplayRunner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        probe: Arc<dyn EndpointProbe>,
        settings: ReplaySettings,
    ) -> Self {
        Self {
            store,
            probe,
            settings,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> ReplayResult<ReplayReport> {
        let capacity = (self.settings.page_size * 2).max(1);
        let (sender, mut receiver) = mpsc::channel(capacity);
        let reader = tokio::spawn(read_events(
            Arc::clone(&self.store),
            self.settings.table.clone(),
            self.settings.page_size,
            sender,
            cancel.clone(),
        ));

        let semaphore = Arc::new(Semaphore::new(self.settings.parallel.max(1)));
        let mut workers = JoinSet::new();
        let mut report = ReplayReport::default();
        info!(
            table = %self.settings.table,
            target = %self.settings.target,
            parallel = self.settings.parallel,
            "replay started"
        );

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(abandon(&mut workers, &reader)),
                event = receiver.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(abandon(&mut workers, &reader)),
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|_| ReplayError::Cancelled)?
                }
            };
            let probe = Arc::clone(&self.probe);
            let target = self.settings.target.clone();
            workers.spawn(async move {
                let outcome = replay_event(probe.as_ref(), &target, event).await;
                drop(permit);
                outcome
            });
            while let Some(done) = workers.try_join_next() {
                report.record(done?);
            }
        }

        loop {
            let done = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(abandon(&mut workers, &reader)),
                done = workers.join_next() => done,
            };
            let Some(done) = done else {
                break;
            };
            report.record(done?);
        }

        match reader.await? {
            Ok(stats) => {
                report.summary.skipped = stats.skipped;
                debug!(read = stats.read, "event reader finished");
            }
            Err(err) => {
                error!(table = %self.settings.table, error = %err, "event reader stopped");
                report.reader_error = Some(err.to_string());
            }
        }

        info!(
            total = report.summary.total,
            passed = report.summary.passed,
            failed = report.summary.failed,
            errored = report.summary.errored,
            skipped = report.summary.skipped,
            "replay finished"
        );
        Ok(report)
    }
}

/// Stops every in-flight probe and the reader.
fn abandon<T: 'static, R>(workers: &mut JoinSet<T>, reader: &JoinHandle<R>) -> ReplayError {
    workers.abort_all();
    reader.abort();
    warn!("replay cancelled; in-flight requests abandoned");
    ReplayError::Cancelled
}

async fn read_events(
    store: Arc<dyn RecordStore>,
    table: String,
    page_size: usize,
    sender: mpsc::Sender<CapturedEvent>,
    cancel: CancellationToken,
) -> ReplayResult<ReaderStats> {
    let mut request = ScanRequest::new(&table).limit(page_size);
    let mut stats = ReaderStats::default();
    loop {
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReplayError::Cancelled),
            page = store.scan(&request) => page?,
        };
        debug!(table = %table, items = page.items.len(), "captured events page");
        for item in &page.items {
            let event = CapturedEvent::from_record(&table, item)?;
            stats.read += 1;
            if !event.is_valid() {
                warn!(uid = %event.uid, url = %event.access_url, "skipping unreplayable event");
                stats.skipped += 1;
                continue;
            }
            if sender.send(event).await.is_err() {
                return Ok(stats);
            }
        }
        match page.next {
            Some(cursor) => request.start = Some(cursor),
            None => return Ok(stats),
        }
    }
}

async fn replay_event(
    probe: &dyn EndpointProbe,
    target: &str,
    event: CapturedEvent,
) -> ReplayOutcome {
    let url = match target_url(target, &event.access_url) {
        Ok(url) => url,
        Err(err) => {
            warn!(uid = %event.uid, error = %err, "cannot build target url");
            return ReplayOutcome {
                event,
                target_url: None,
                observed: None,
                problems: Vec::new(),
                error: Some(err.to_string()),
            };
        }
    };

    match probe.fetch(&url).await {
        Ok(observed) => {
            let problems = compare_response(&event, &observed);
            for problem in &problems {
                info!(
                    url = %url,
                    captured_at = %event.timestamp.to_rfc3339(),
                    problem = %problem,
                    "replay mismatch"
                );
            }
            ReplayOutcome {
                event,
                target_url: Some(url),
                observed: Some(observed),
                problems,
                error: None,
            }
        }
        Err(err) => {
            error!(
                url = %event.access_url,
                captured_at = %event.timestamp.to_rfc3339(),
                error = %err,
                "could not perform replay request"
            );
            ReplayOutcome {
                event,
                target_url: Some(url),
                observed: None,
                problems: Vec::new(),
                error: Some(err.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoProbe;

    #[async_trait]
    impl EndpointProbe for EchoProbe {
        async fn fetch(&self, url: &str) -> ReplayResult<ObservedResponse> {
            if url.contains("broken") {
                return Err(ReplayError::UnparsableUrl(url.to_string()));
            }
            Ok(ObservedResponse::new(200).with_body("ok"))
        }
    }

    fn event(uid: &str, path: &str, body: &str) -> serde_json::Map<String, serde_json::Value> {
        json!({
            "uid": uid,
            "timestamp": "2019-05-01T12:00:00Z",
            "access_url": format!("https://api.example.com/{path}"),
            "output_message": body,
            "response_headers": [],
            "response_code": 200,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[tokio::test]
    async fn counts_each_kind_of_outcome() {
        let store = Arc::new(MemoryRecordStore::new(2));
        store.insert(
            "endpoint_events",
            event("6f1c3a52-3c1e-4a55-9a8e-0c8f5a1d2b31", "a", "ok"),
        );
        store.insert(
            "endpoint_events",
            event("6f1c3a52-3c1e-4a55-9a8e-0c8f5a1d2b32", "b", "different"),
        );
        store.insert(
            "endpoint_events",
            event("6f1c3a52-3c1e-4a55-9a8e-0c8f5a1d2b33", "broken", "ok"),
        );
        store.insert(
            "endpoint_events",
            event("00000000-0000-0000-0000-000000000000", "c", "ok"),
        );

        let runner = ReplayRunner::new(
            store,
            Arc::new(EchoProbe),
            ReplaySettings {
                table: "endpoint_events".into(),
                target: "staging.example.com".into(),
                parallel: 2,
                page_size: 2,
            },
        );
        let report = runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            report.summary,
            ReplaySummary {
                total: 3,
                passed: 1,
                failed: 1,
                errored: 1,
                skipped: 1,
            }
        );
        assert_eq!(report.failures.len(), 2);
        assert!(report.reader_error.is_none());
    }

    #[tokio::test]
    async fn reader_failure_is_reported() {
        let store = Arc::new(MemoryRecordStore::default());
        store.fail_table("endpoint_events");
        let runner = ReplayRunner::new(
            store,
            Arc::new(EchoProbe),
            ReplaySettings {
                table: "endpoint_events".into(),
                target: "staging.example.com".into(),
                parallel: 1,
                page_size: 10,
            },
        );
        let report = runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.summary.total, 0);
        assert!(report.reader_error.is_some());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let store = Arc::new(MemoryRecordStore::default());
        let runner = ReplayRunner::new(
            store,
            Arc::new(EchoProbe),
            ReplaySettings {
                table: "endpoint_events".into(),
                target: "staging.example.com".into(),
                parallel: 1,
                page_size: 10,
            },
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner.run(&cancel).await.unwrap_err();
        assert!(matches!(err, ReplayError::Cancelled));
    }

    struct StalledProbe;

    #[async_trait]
    impl EndpointProbe for StalledProbe {
        async fn fetch(&self, _url: &str) -> ReplayResult<ObservedResponse> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancellation_does_not_wait_for_stalled_requests() {
        let store = Arc::new(MemoryRecordStore::default());
        store.insert(
            "endpoint_events",
            event("6f1c3a52-3c1e-4a55-9a8e-0c8f5a1d2b41", "a", "ok"),
        );
        store.insert(
            "endpoint_events",
            event("6f1c3a52-3c1e-4a55-9a8e-0c8f5a1d2b42", "b", "ok"),
        );
        let runner = ReplayRunner::new(
            store,
            Arc::new(StalledProbe),
            ReplaySettings {
                table: "endpoint_events".into(),
                target: "staging.example.com".into(),
                parallel: 1,
                page_size: 10,
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), runner.run(&cancel))
            .await
            .expect("run stops once cancelled");
        assert!(matches!(result, Err(ReplayError::Cancelled)));
    }
}
