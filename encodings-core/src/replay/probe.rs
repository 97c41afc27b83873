use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::redirect::Policy;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{ReplayError, ReplayResult};

fn captured_url() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(https?)://[^/]+/(.*)$").expect("valid regex"))
}

/// Rewrites a captured URL so that it points at `target`, always over HTTPS.
pub fn target_url(target: &str, access_url: &str) -> ReplayResult<String> {
    let path = captured_url()
        .captures(access_url)
        .and_then(|captures| captures.get(2))
        .ok_or_else(|| ReplayError::UnparsableUrl(access_url.to_string()))?;
    let rewritten = format!("https://{target}/{}", path.as_str());
    url::Url::parse(&rewritten).map_err(|source| ReplayError::InvalidTarget {
        url: rewritten.clone(),
        source,
    })?;
    Ok(rewritten)
}

/// What the target deployment answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObservedResponse {
    pub status: u16,
    /// Canonical `Title-Case` names; the first value of repeated headers.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl ObservedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(canonical_header_name(name), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// `content-type` becomes `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[async_trait]
pub trait EndpointProbe: Send + Sync {
    async fn fetch(&self, url: &str) -> ReplayResult<ObservedResponse>;
}

/// GETs the rewritten URL without following redirects, so `Location` headers can be compared.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> ReplayResult<Self> {
        let client = Client::builder()
            .user_agent("encodings-replay/1.0")
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EndpointProbe for HttpProbe {
    async fn fetch(&self, url: &str) -> ReplayResult<ObservedResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                debug!(url, header = %name, "skipping non-text header");
                continue;
            };
            headers
                .entry(canonical_header_name(name.as_str()))
                .or_insert_with(|| value.to_string());
        }
        let body = response.text().await?;
        Ok(ObservedResponse {
            status,
            headers,
            body,
        })
    }
}
