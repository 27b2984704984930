//! HKSFX - Incremental relay from a device health store to SignalFx ingest
//!
//! For each of six tracked health metrics the relay polls the health store for
//! samples newer than a persisted cursor, converts them into metric data
//! points, forwards them to the datapoint ingest API, and commits the new
//! cursor only once ingest has accepted the batch.
//!
//! ## Modules
//!
//! - **Polling**: [`source`] defines the health store capability, [`poller`]
//!   runs resumable queries and [`catalogue`] maps samples to data points
//! - **Forwarding**: [`encoder`] builds ingest batches, [`forwarder`] sends them
//! - **State**: [`cursor`] and [`credentials`] persist through [`store`]
//! - **Orchestration**: [`pipeline::Relay`] runs the per-metric import jobs

pub mod catalogue;
pub mod config;
pub mod credentials;
pub mod cursor;
pub mod encoder;
pub mod error;
pub mod forwarder;
pub mod logging;
pub mod pipeline;
pub mod poller;
pub mod schema;
pub mod source;
pub mod store;
pub mod types;

pub use config::{RelayConfig, DEFAULT_NAMESPACE};
pub use credentials::{Credentials, CredentialsStore};
pub use cursor::CursorStore;
pub use error::{RelayError, SourceError, StoreError, UnitError};
pub use forwarder::MetricForwarder;
pub use logging::{LogFormat, LoggingConfig};
pub use pipeline::Relay;
pub use poller::{PollOutcome, SamplePoller};
pub use source::{AuthorizationGrant, HealthSource, QueryPage, ReplaySource};
pub use store::{FileStore, MemoryStore, PreferenceStore, SecretStore};
pub use types::{
    Cursor, DataPoint, HealthMetric, JobReport, JobStatus, MetricType, RunSummary,
};

// Schema exports
pub use schema::{Quantity, RawSample, SampleParser, Unit};

/// HKSFX version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
