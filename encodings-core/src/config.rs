use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const DEFAULT_STORE_PAGE_SIZE: usize = 100;
pub const DEFAULT_IDENTITY_LOOKUP_LIMIT: usize = 20;
pub const DEFAULT_REPLAY_PAGE_SIZE: usize = 50;

/// Environment variables that override values loaded from the TOML file.
pub const ENV_DB_PATH: &str = "ENCODINGS_DB_PATH";
pub const ENV_ENCODINGS_TABLE: &str = "ENCODINGS_TABLE";
pub const ENV_ID_MAPPING_TABLE: &str = "ID_MAPPING_TABLE";
pub const ENV_EQUIVALENTS_TABLE: &str = "MIME_EQUIVALENTS_TABLE";
pub const ENV_CAPTURED_EVENTS_TABLE: &str = "CAPTURED_EVENTS_TABLE";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EncodingsConfig {
    pub store: StoreSection,
    #[serde(default)]
    pub tables: TablesSection,
    #[serde(default)]
    pub resolver: ResolverSection,
    #[serde(default)]
    pub replay: ReplaySection,
}

impl EncodingsConfig {
    /// Applies environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &'static str| -> Result<Option<String>> {
            match lookup(name) {
                Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyOverride { name }),
                Some(value) => Ok(Some(value.trim().to_string())),
                None => Ok(None),
            }
        };

        if let Some(path) = read(ENV_DB_PATH)? {
            self.store.path = path;
        }
        if let Some(table) = read(ENV_ENCODINGS_TABLE)? {
            self.tables.encodings = table;
        }
        if let Some(table) = read(ENV_ID_MAPPING_TABLE)? {
            self.tables.identities = table;
        }
        if let Some(table) = read(ENV_EQUIVALENTS_TABLE)? {
            self.tables.equivalents = table;
        }
        if let Some(table) = read(ENV_CAPTURED_EVENTS_TABLE)? {
            self.tables.captured_events = table;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.path.trim().is_empty() {
            return Err(invalid("store.path", "must not be empty"));
        }
        if self.store.page_size == 0 {
            return Err(invalid("store.page_size", "must be greater than zero"));
        }
        let tables = [
            ("tables.identities", &self.tables.identities),
            ("tables.encodings", &self.tables.encodings),
            ("tables.equivalents", &self.tables.equivalents),
            ("tables.captured_events", &self.tables.captured_events),
        ];
        for (field, name) in tables {
            if name.trim().is_empty() {
                return Err(invalid(field, "table name must not be empty"));
            }
        }
        if self.resolver.identity_lookup_limit == 0 {
            return Err(invalid(
                "resolver.identity_lookup_limit",
                "must be greater than zero",
            ));
        }
        if self.replay.parallel == 0 {
            return Err(invalid("replay.parallel", "must be greater than zero"));
        }
        if self.replay.page_size == 0 {
            return Err(invalid("replay.page_size", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.store.path)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    pub path: String,
    #[serde(default = "default_store_page_size")]
    pub page_size: usize,
    #[serde(default = "default_true")]
    pub read_only: bool,
}

/// Physical table names used by the resolver and the replay harness.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TablesSection {
    #[serde(default = "default_identities_table")]
    pub identities: String,
    #[serde(default = "default_encodings_table")]
    pub encodings: String,
    #[serde(default = "default_equivalents_table")]
    pub equivalents: String,
    #[serde(default = "default_captured_events_table")]
    pub captured_events: String,
}

impl Default for TablesSection {
    fn default() -> Self {
        Self {
            identities: default_identities_table(),
            encodings: default_encodings_table(),
            equivalents: default_equivalents_table(),
            captured_events: default_captured_events_table(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverSection {
    #[serde(default = "default_identity_lookup_limit")]
    pub identity_lookup_limit: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ResolverSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            identity_lookup_limit: default_identity_lookup_limit(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaySection {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "default_replay_parallel")]
    pub parallel: usize,
    #[serde(default = "default_replay_page_size")]
    pub page_size: usize,
    #[serde(default = "default_replay_output")]
    pub output: String,
}

impl Default for ReplaySection {
    fn default() -> Self {
        Self {
            target: None,
            parallel: default_replay_parallel(),
            page_size: default_replay_page_size(),
            output: default_replay_output(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_store_page_size() -> usize {
    DEFAULT_STORE_PAGE_SIZE
}

fn default_identities_table() -> String {
    "idmapping".to_string()
}

fn default_encodings_table() -> String {
    "encodings".to_string()
}

fn default_equivalents_table() -> String {
    "mime_equivalents".to_string()
}

fn default_captured_events_table() -> String {
    "endpoint_events".to_string()
}

fn default_identity_lookup_limit() -> usize {
    DEFAULT_IDENTITY_LOOKUP_LIMIT
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_replay_parallel() -> usize {
    8
}

fn default_replay_page_size() -> usize {
    DEFAULT_REPLAY_PAGE_SIZE
}

fn default_replay_output() -> String {
    "replay-report.json".to_string()
}

/// Loads the config file, applies process environment overrides and validates the result.
pub fn load_encodings_config<P: AsRef<Path>>(path: P) -> Result<EncodingsConfig> {
    let mut config: EncodingsConfig = load_toml(path)?;
    config.apply_env_overrides(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
