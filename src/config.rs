//! Runtime configuration
//!
//! Everything is read from `HKSFX_*` environment variables. Unset variables
//! take their defaults; set but invalid ones are rejected instead of ignored.

use crate::error::RelayError;
use crate::source::DEFAULT_QUERY_LIMIT;
use reqwest::Url;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Namespace prefixed to every persisted key
pub const DEFAULT_NAMESPACE: &str = "HKSFX";

/// Store file used when `HKSFX_STORE` is unset
pub const DEFAULT_STORE_PATH: &str = "hksfx-store.json";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub namespace: String,
    /// Preference and secret store file
    pub store_path: PathBuf,
    /// Maximum samples fetched per poll
    pub query_limit: usize,
    /// Timeout for one ingest request
    pub timeout: Duration,
    /// Ingest endpoint replacing the realm's default one
    pub ingest_url: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            query_limit: DEFAULT_QUERY_LIMIT,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ingest_url: None,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RelayError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let namespace = var("HKSFX_NAMESPACE").unwrap_or(defaults.namespace);
        let store_path = var("HKSFX_STORE")
            .map(PathBuf::from)
            .unwrap_or(defaults.store_path);
        let query_limit = match var("HKSFX_QUERY_LIMIT") {
            Some(raw) => positive("HKSFX_QUERY_LIMIT", &raw)?,
            None => defaults.query_limit,
        };
        let timeout = match var("HKSFX_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(positive("HKSFX_TIMEOUT_SECS", &raw)?),
            None => defaults.timeout,
        };
        let ingest_url = var("HKSFX_INGEST_URL")
            .map(|raw| validate_url(&raw))
            .transpose()?;

        Ok(Self {
            namespace,
            store_path,
            query_limit,
            timeout,
            ingest_url,
        })
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn with_ingest_url(mut self, url: &str) -> Result<Self, RelayError> {
        self.ingest_url = Some(validate_url(url)?);
        Ok(self)
    }
}

fn positive<T>(key: &str, raw: &str) -> Result<T, RelayError>
where
    T: FromStr + PartialOrd + Default,
{
    match raw.parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(RelayError::Config(format!(
            "{key} must be a positive integer, got {raw:?}"
        ))),
    }
}

fn validate_url(raw: &str) -> Result<String, RelayError> {
    let url = Url::parse(raw)
        .map_err(|e| RelayError::Config(format!("invalid ingest URL {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(raw.to_string()),
        other => Err(RelayError::Config(format!(
            "ingest URL must be http or https, got {other}"
        ))),
    }
}
