use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::model::{DecodeError, FieldReader, RawRecord};

pub const FIELD_UID: &str = "uid";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_ACCESS_URL: &str = "access_url";
pub const FIELD_OUTPUT_MESSAGE: &str = "output_message";
pub const FIELD_RESPONSE_HEADERS: &str = "response_headers";
pub const FIELD_RESPONSE_CODE: &str = "response_code";

fn header_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([^:]+):\s*(.*)$").expect("valid regex"))
}

/// A request/response pair recorded from the production endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedEvent {
    pub uid: Uuid,
    pub timestamp: DateTime<Utc>,
    pub access_url: String,
    pub expected_body: String,
    pub expected_headers: BTreeMap<String, String>,
    pub expected_status: u16,
}

impl CapturedEvent {
    pub fn from_record(table: &str, record: &RawRecord) -> Result<Self, DecodeError> {
        let mut reader = FieldReader::new(table, record);
        let uid = reader
            .string(FIELD_UID)
            .and_then(|raw| match Uuid::parse_str(&raw) {
                Ok(uid) => Some(uid),
                Err(err) => {
                    reader.invalid(FIELD_UID, err.to_string());
                    None
                }
            });
        let timestamp = reader.timestamp(FIELD_TIMESTAMP);
        let access_url = reader.string(FIELD_ACCESS_URL);
        let expected_body = reader.optional_string(FIELD_OUTPUT_MESSAGE);
        let header_lines = reader.optional_string_list(FIELD_RESPONSE_HEADERS);
        let status = reader
            .integer(FIELD_RESPONSE_CODE)
            .and_then(|code| match u16::try_from(code) {
                Ok(status) => Some(status),
                Err(_) => {
                    reader.invalid(FIELD_RESPONSE_CODE, format!("{code} is not an HTTP status"));
                    None
                }
            });
        reader.finish()?;

        Ok(Self {
            uid: uid.unwrap_or_default(),
            timestamp: timestamp.unwrap_or_default(),
            access_url: access_url.unwrap_or_default(),
            expected_body: expected_body.unwrap_or_default(),
            expected_headers: parse_header_lines(header_lines.unwrap_or_default()),
            expected_status: status.unwrap_or_default(),
        })
    }

    /// Events without an id, URL or a real status code cannot be replayed.
    pub fn is_valid(&self) -> bool {
        !self.uid.is_nil() && !self.access_url.is_empty() && self.expected_status >= 200
    }

    pub fn expected_header(&self, name: &str) -> Option<&str> {
        self.expected_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// `Name: value` lines; lines without a colon are dropped.
pub fn parse_header_lines(lines: Vec<String>) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    for line in lines {
        match header_line().captures(&line) {
            Some(captures) => {
                headers.insert(captures[1].to_string(), captures[2].to_string());
            }
            None => debug!(line = %line, "ignoring malformed captured header"),
        }
    }
    headers
}
