//! Health data source
//!
//! The platform health store is an external collaborator. This module defines
//! the capability the relay consumes from it: a one-shot bulk authorization
//! request and a resumable, cursor-based sample query.

mod replay;

pub use replay::ReplaySource;

use crate::error::SourceError;
use crate::schema::RawSample;
use crate::types::{Cursor, HealthMetric};
use async_trait::async_trait;
use std::collections::HashSet;

/// Upper bound on samples returned by one query
pub const DEFAULT_QUERY_LIMIT: usize = 100_000;

/// Metrics the user granted read access to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationGrant {
    granted: HashSet<HealthMetric>,
}

impl AuthorizationGrant {
    pub fn new(granted: impl IntoIterator<Item = HealthMetric>) -> Self {
        Self {
            granted: granted.into_iter().collect(),
        }
    }

    /// A grant covering every tracked metric
    pub fn all() -> Self {
        Self::new(HealthMetric::ALL)
    }

    /// A grant covering nothing
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_granted(&self, metric: HealthMetric) -> bool {
        self.granted.contains(&metric)
    }

    /// Tracked metrics missing from the grant, in catalogue order
    pub fn denied(&self) -> Vec<HealthMetric> {
        HealthMetric::ALL
            .iter()
            .copied()
            .filter(|m| !self.is_granted(*m))
            .collect()
    }
}

/// One page of query results
#[derive(Debug, Clone)]
pub struct QueryPage {
    /// Samples newer than the cursor passed in, oldest first
    pub samples: Vec<RawSample>,
    /// Cursor to resume after the last sample in this page
    pub cursor: Cursor,
}

/// Resumable access to a health data store.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn HealthSource>`.
#[async_trait]
pub trait HealthSource: Send + Sync {
    /// Ask for read access to `metrics` in one request.
    async fn request_authorization(
        &self,
        metrics: &[HealthMetric],
    ) -> Result<AuthorizationGrant, SourceError>;

    /// Fetch up to `limit` samples of `metric` newer than `cursor`.
    ///
    /// `cursor = None` starts at the beginning of the history.
    async fn query(
        &self,
        metric: HealthMetric,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<QueryPage, SourceError>;
}
