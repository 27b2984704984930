//! Sample polling
//!
//! Runs one resumable query against the health source and normalizes the
//! returned samples. The poller is stateless: cursors come in and go out by
//! value, and persisting them is the caller's job.

use crate::catalogue;
use crate::error::{RelayError, SourceError};
use crate::source::{AuthorizationGrant, HealthSource, DEFAULT_QUERY_LIMIT};
use crate::types::{Cursor, DataPoint, HealthMetric};
use std::sync::Arc;
use tracing::debug;

/// Result of one poll
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Normalized data points, in source order
    pub data_points: Vec<DataPoint>,
    /// Cursor to commit once the data points are delivered
    pub cursor: Cursor,
    /// Raw samples returned by the source, including dropped ones
    pub samples_seen: usize,
}

impl PollOutcome {
    pub fn is_empty(&self) -> bool {
        self.data_points.is_empty()
    }
}

/// Polls the health source for new samples of one metric at a time
#[derive(Clone)]
pub struct SamplePoller {
    source: Arc<dyn HealthSource>,
    limit: usize,
}

impl SamplePoller {
    pub fn new(source: Arc<dyn HealthSource>) -> Self {
        Self {
            source,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }

    /// Cap the number of samples fetched per poll
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Request read access to every tracked metric in one call
    pub async fn request_authorization(&self) -> Result<AuthorizationGrant, SourceError> {
        self.source.request_authorization(&HealthMetric::ALL).await
    }

    /// Fetch and normalize samples of `metric` newer than `cursor`.
    ///
    /// On error no cursor is returned, so the caller's stored cursor stays
    /// valid for a retry.
    pub async fn poll(
        &self,
        metric: HealthMetric,
        cursor: Option<&Cursor>,
    ) -> Result<PollOutcome, RelayError> {
        let page = self
            .source
            .query(metric, cursor, self.limit)
            .await
            .map_err(|e| RelayError::from_source(metric, e))?;

        let samples_seen = page.samples.len();
        let data_points = catalogue::normalize_all(&page.samples)?;

        debug!(
            metric = %metric,
            samples = samples_seen,
            data_points = data_points.len(),
            resumed = cursor.is_some(),
            "Poll finished"
        );

        Ok(PollOutcome {
            data_points,
            cursor: page.cursor,
            samples_seen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Quantity, RawSample, Unit};
    use crate::source::{QueryPage, ReplaySource};
    use crate::types::MetricType;
    use async_trait::async_trait;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    /// Source that returns a fixed page for every query
    struct StaticSource {
        samples: Vec<RawSample>,
    }

    #[async_trait]
    impl HealthSource for StaticSource {
        async fn request_authorization(
            &self,
            metrics: &[HealthMetric],
        ) -> Result<AuthorizationGrant, SourceError> {
            Ok(AuthorizationGrant::new(metrics.iter().copied()))
        }

        async fn query(
            &self,
            _metric: HealthMetric,
            _cursor: Option<&Cursor>,
            limit: usize,
        ) -> Result<QueryPage, SourceError> {
            Ok(QueryPage {
                samples: self.samples.iter().take(limit).cloned().collect(),
                cursor: Cursor::new(b"next".to_vec()),
            })
        }
    }

    fn sample(identifier: &str, value: f64, unit: Unit) -> RawSample {
        RawSample::new(identifier, Quantity::new(value, unit), Utc::now())
    }

    #[tokio::test]
    async fn test_poll_normalizes_samples() {
        let source = Arc::new(StaticSource {
            samples: vec![sample("heartRate", 70.0, Unit::CountPerMinute)],
        });
        let poller = SamplePoller::new(source);

        let outcome = poller.poll(HealthMetric::HeartRate, None).await.unwrap();
        assert_eq!(outcome.data_points.len(), 1);
        assert_eq!(outcome.data_points[0].value, 70.0);
        assert_eq!(outcome.data_points[0].kind, MetricType::Gauge);
        assert_eq!(outcome.cursor, Cursor::new(b"next".to_vec()));
    }

    #[tokio::test]
    async fn test_unknown_identifiers_dropped_without_error() {
        let source = Arc::new(StaticSource {
            samples: vec![
                sample("HKQuantityTypeIdentifierBodyMass", 80.0, Unit::Count),
                sample("HKQuantityTypeIdentifierFlightsClimbed", 3.0, Unit::Count),
            ],
        });
        let poller = SamplePoller::new(source);

        let outcome = poller.poll(HealthMetric::StepCount, None).await.unwrap();
        assert!(outcome.is_empty());
        assert_eq!(outcome.samples_seen, 2);
    }

    #[tokio::test]
    async fn test_limit_is_passed_to_source() {
        let source = Arc::new(StaticSource {
            samples: (0..5).map(|i| sample("stepCount", i as f64, Unit::Count)).collect(),
        });
        let poller = SamplePoller::new(source).with_limit(3);

        let outcome = poller.poll(HealthMetric::StepCount, None).await.unwrap();
        assert_eq!(outcome.data_points.len(), 3);
        assert_eq!(poller.limit(), 3);
    }

    #[tokio::test]
    async fn test_unauthorized_is_permission_error() {
        let source = Arc::new(ReplaySource::new());
        let poller = SamplePoller::new(source);

        let err = poller.poll(HealthMetric::StepCount, None).await.unwrap_err();
        assert!(matches!(err, RelayError::Permission(HealthMetric::StepCount)));
    }

    #[tokio::test]
    async fn test_query_failure_is_query_error() {
        let source = Arc::new(ReplaySource::new());
        source.fail_queries(HealthMetric::HeartRate, "timeout");
        let poller = SamplePoller::new(source.clone());
        poller.request_authorization().await.unwrap();

        let err = poller.poll(HealthMetric::HeartRate, None).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Query {
                metric: HealthMetric::HeartRate,
                ..
            }
        ));
    }
}
