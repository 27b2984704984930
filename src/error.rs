//! Error types for HKSFX

use crate::types::HealthMetric;
use thiserror::Error;

/// Errors that can occur while relaying health samples.
///
/// Every variant is local to the pipeline of one metric type; none of them
/// aborts sibling pipelines. Only [`RelayError::CursorDeserialization`] is
/// considered unrecoverable.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Read authorization not granted for {0}")]
    Permission(HealthMetric),

    #[error("Health store query failed for {metric}: {message}")]
    Query { metric: HealthMetric, message: String },

    #[error("Forwarding to ingest failed: {0}")]
    Forward(String),

    #[error("Stored cursor for {metric} is unreadable: {message}")]
    CursorDeserialization { metric: HealthMetric, message: String },

    #[error("Cannot convert {metric} sample {sample_id}: {source}")]
    Conversion {
        metric: HealthMetric,
        sample_id: uuid::Uuid,
        #[source]
        source: UnitError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse samples: {0}")]
    Parse(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl RelayError {
    /// Whether this error must halt the affected pipeline for good rather than
    /// be retried on the next run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::CursorDeserialization { .. })
    }

    pub(crate) fn from_source(metric: HealthMetric, err: SourceError) -> Self {
        match err {
            SourceError::NotAuthorized(denied) => RelayError::Permission(denied),
            SourceError::Query(message) => RelayError::Query { metric, message },
            SourceError::Authorization(_) => RelayError::Permission(metric),
        }
    }
}

/// Errors reported by the external health data source
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("Not authorized to read {0}")]
    NotAuthorized(HealthMetric),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Authorization request failed: {0}")]
    Authorization(String),
}

/// Errors produced by preference and secret stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("stored value for {0} is not valid base64")]
    Encoding(String),

    #[error("stored value for {0} has the wrong kind")]
    WrongKind(String),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("store task failed: {0}")]
    Task(String),
}

/// Unit conversion failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UnitError {
    #[error("cannot express {from} as {to}")]
    Incompatible { from: String, to: String },

    #[error("unknown unit: {0}")]
    Unknown(String),
}
