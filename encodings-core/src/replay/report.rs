use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use super::runner::{ReplayOutcome, ReplayReport};
use super::ReplayResult;

/// One entry of the failure report, in the field layout downstream tooling reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub tested_url: String,
    pub error_list: Vec<String>,
    pub expected_response: u16,
    pub actual_response: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_location: Option<String>,
}

impl FailureRecord {
    pub fn from_outcome(outcome: &ReplayOutcome) -> Self {
        let mut error_list = outcome.problems.clone();
        if let Some(error) = &outcome.error {
            error_list.push(error.clone());
        }
        let expected_location = outcome.event.expected_header("Location").map(str::to_string);
        let actual_location = expected_location.as_ref().and_then(|_| {
            outcome
                .observed
                .as_ref()
                .and_then(|observed| observed.header("Location"))
                .map(str::to_string)
        });
        Self {
            tested_url: outcome
                .target_url
                .clone()
                .unwrap_or_else(|| outcome.event.access_url.clone()),
            error_list,
            expected_response: outcome.event.expected_status,
            actual_response: outcome.observed.as_ref().map(|observed| observed.status),
            expected_location,
            actual_location,
        }
    }
}

/// Writes the report as pretty JSON, creating parent directories as needed.
pub fn write_report(path: &Path, report: &ReplayReport) -> ReplayResult<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    info!(path = %path.display(), failures = report.failures.len(), "replay report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::{CapturedEvent, ObservedResponse, ReplaySummary};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn redirect_outcome() -> ReplayOutcome {
        let mut headers = BTreeMap::new();
        headers.insert("Location".to_string(), "https://cdn.example.com/a.mp4".to_string());
        ReplayOutcome {
            event: CapturedEvent {
                uid: Uuid::new_v4(),
                timestamp: Utc::now(),
                access_url: "https://api.example.com/interactivevideo.php?file=a".into(),
                expected_body: String::new(),
                expected_headers: headers,
                expected_status: 302,
            },
            target_url: Some("https://staging.example.com/interactivevideo.php?file=a".into()),
            observed: Some(
                ObservedResponse::new(302).with_header("Location", "https://cdn.example.com/b.mp4"),
            ),
            problems: vec![
                "header Location got value http://cdn.example.com/b.mp4 expected http://cdn.example.com/a.mp4"
                    .into(),
            ],
            error: None,
        }
    }

    #[test]
    fn failure_record_carries_locations() {
        let record = FailureRecord::from_outcome(&redirect_outcome());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json["testedUrl"],
            "https://staging.example.com/interactivevideo.php?file=a"
        );
        assert_eq!(json["expectedResponse"], 302);
        assert_eq!(json["actualResponse"], 302);
        assert_eq!(json["expectedLocation"], "https://cdn.example.com/a.mp4");
        assert_eq!(json["actualLocation"], "https://cdn.example.com/b.mp4");
        assert_eq!(json["errorList"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn errored_outcome_has_no_actual_response() {
        let mut outcome = redirect_outcome();
        outcome.observed = None;
        outcome.problems.clear();
        outcome.error = Some("connection refused".into());
        outcome.event.expected_headers.clear();
        let record = FailureRecord::from_outcome(&outcome);
        assert_eq!(record.actual_response, None);
        assert_eq!(record.error_list, vec!["connection refused".to_string()]);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("expectedLocation").is_none());
    }

    #[test]
    fn report_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");
        let report = ReplayReport {
            summary: ReplaySummary {
                total: 1,
                failed: 1,
                ..ReplaySummary::default()
            },
            failures: vec![FailureRecord::from_outcome(&redirect_outcome())],
            reader_error: None,
        };
        write_report(&path, &report).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["summary"]["failed"], 1);
        assert_eq!(written["failures"][0]["expectedResponse"], 302);
    }
}
