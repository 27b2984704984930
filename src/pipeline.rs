//! Pipeline orchestration
//!
//! This module provides the public entry point of the relay. For every tracked
//! metric it runs one import job: read the cursor, poll for newer samples,
//! forward them, and commit the new cursor only once ingest has accepted the
//! batch.
//!
//! Job stages:
//! 1. CursorStore - Read the last committed cursor
//! 2. SamplePoller - Fetch and normalize newer samples
//! 3. MetricForwarder - Send the batch, partitioned by kind
//! 4. CursorStore - Commit the cursor the poll returned
//!
//! Jobs of different metrics run concurrently and never affect each other.

use crate::cursor::CursorStore;
use crate::error::RelayError;
use crate::forwarder::MetricForwarder;
use crate::poller::SamplePoller;
use crate::source::AuthorizationGrant;
use crate::store::blocking;
use crate::types::{Cursor, DataPoint, HealthMetric, JobReport, JobStatus, RunSummary};
use futures_util::future::join_all;
use tracing::{error, info, instrument, warn};

/// Imports new samples of every tracked metric into the ingest API
#[derive(Clone)]
pub struct Relay {
    poller: SamplePoller,
    forwarder: MetricForwarder,
    cursors: CursorStore,
}

impl Relay {
    pub fn new(poller: SamplePoller, forwarder: MetricForwarder, cursors: CursorStore) -> Self {
        Self {
            poller,
            forwarder,
            cursors,
        }
    }

    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    /// Run one import job per tracked metric.
    ///
    /// Authorization is requested once for the whole set before any poll.
    /// Reports come back in catalogue order whatever order the jobs finish in.
    pub async fn run(&self) -> RunSummary {
        let grant = self.authorize().await;
        let jobs = HealthMetric::ALL
            .iter()
            .map(|metric| self.run_job(*metric, &grant));
        let summary = RunSummary {
            jobs: join_all(jobs).await,
        };

        info!(
            completed = summary.count(JobStatus::Completed),
            failed = summary.count(JobStatus::Failed),
            no_samples = summary.count(JobStatus::NoSamples),
            data_points = summary.total_data_points(),
            "Run finished"
        );
        summary
    }

    /// Run the import job of a single metric
    pub async fn run_metric(&self, metric: HealthMetric) -> JobReport {
        let grant = self.authorize().await;
        self.run_job(metric, &grant).await
    }

    /// Poll `metric` from its committed cursor without forwarding anything.
    ///
    /// The cursor is left untouched, so a later run still imports these points.
    pub async fn preview(&self, metric: HealthMetric) -> Result<Vec<DataPoint>, RelayError> {
        let grant = self.authorize().await;
        if !grant.is_granted(metric) {
            return Err(RelayError::Permission(metric));
        }

        let cursor = self.stored_cursor(metric).await?;
        let outcome = self.poller.poll(metric, cursor.as_ref()).await?;
        Ok(outcome.data_points)
    }

    async fn authorize(&self) -> AuthorizationGrant {
        match self.poller.request_authorization().await {
            Ok(grant) => {
                let denied = grant.denied();
                if !denied.is_empty() {
                    warn!(?denied, "Read access not granted for some metrics");
                }
                grant
            }
            Err(e) => {
                warn!("Authorization request failed: {e}");
                AuthorizationGrant::none()
            }
        }
    }

    #[instrument(skip(self, grant), fields(metric = %metric))]
    async fn run_job(&self, metric: HealthMetric, grant: &AuthorizationGrant) -> JobReport {
        let mut report = JobReport::pending(metric);

        let result = if grant.is_granted(metric) {
            self.import(metric, &mut report).await
        } else {
            Err(RelayError::Permission(metric))
        };

        match result {
            Ok(status) => {
                report.status = status;
                info!(
                    status = ?report.status,
                    data_points = report.data_points,
                    "{} import finished",
                    metric.friendly_name()
                );
            }
            Err(e) => {
                report.status = JobStatus::Failed;
                report.fatal = e.is_fatal();
                report.error = Some(e.to_string());
                if report.fatal {
                    error!("{} import aborted: {e}", metric.friendly_name());
                } else {
                    warn!("{} import failed: {e}", metric.friendly_name());
                }
            }
        }

        report
    }

    async fn import(
        &self,
        metric: HealthMetric,
        report: &mut JobReport,
    ) -> Result<JobStatus, RelayError> {
        let cursor = self.stored_cursor(metric).await?;
        let outcome = self.poller.poll(metric, cursor.as_ref()).await?;
        report.data_points = outcome.data_points.len();

        // A page of only untracked samples still leaves the cursor where it was
        if outcome.is_empty() {
            return Ok(JobStatus::NoSamples);
        }

        self.forwarder.send_points(outcome.data_points).await?;

        let cursors = self.cursors.clone();
        let next = outcome.cursor;
        blocking(move || cursors.set(metric, &next)).await?;

        Ok(JobStatus::Completed)
    }

    async fn stored_cursor(&self, metric: HealthMetric) -> Result<Option<Cursor>, RelayError> {
        let cursors = self.cursors.clone();
        blocking(move || cursors.get(metric)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credentials, CredentialsStore};
    use crate::schema::{Quantity, RawSample, Unit};
    use crate::source::ReplaySource;
    use crate::store::{MemoryStore, PreferenceStore};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        source: Arc<ReplaySource>,
        prefs: Arc<MemoryStore>,
        relay: Relay,
    }

    fn harness(server: &MockServer) -> Harness {
        let source = Arc::new(ReplaySource::new());
        let prefs = Arc::new(MemoryStore::new());

        let credentials = CredentialsStore::new(prefs.clone(), prefs.clone(), "HKSFX");
        credentials.save(&Credentials::new("us0", "tok")).unwrap();

        let forwarder = MetricForwarder::new(credentials)
            .unwrap()
            .with_ingest_url(format!("{}/v2/datapoint", server.uri()));
        let relay = Relay::new(
            SamplePoller::new(source.clone()),
            forwarder,
            CursorStore::new(prefs.clone(), "HKSFX"),
        );

        Harness {
            source,
            prefs,
            relay,
        }
    }

    async fn ingest_status(server: &MockServer, status: u16) {
        server.reset().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    fn sample(identifier: &str, value: f64, unit: Unit) -> RawSample {
        RawSample::new(identifier, Quantity::new(value, unit), Utc::now())
    }

    fn steps(value: f64) -> RawSample {
        sample("stepCount", value, Unit::Count)
    }

    #[tokio::test]
    async fn test_run_reports_every_metric_in_catalogue_order() {
        let server = MockServer::start().await;
        ingest_status(&server, 200).await;
        let h = harness(&server);
        h.source.push(steps(10.0));
        h.source
            .push(sample("heartRate", 64.0, Unit::CountPerMinute));

        let summary = h.relay.run().await;

        let metrics: Vec<HealthMetric> = summary.jobs.iter().map(|j| j.metric).collect();
        assert_eq!(metrics, HealthMetric::ALL.to_vec());
        assert_eq!(summary.count(JobStatus::Completed), 2);
        assert_eq!(summary.count(JobStatus::NoSamples), 4);
        assert!(summary.jobs.iter().all(|j| j.status.is_terminal()));
    }

    #[tokio::test]
    async fn test_success_commits_cursor_then_empty_window_is_no_samples() {
        let server = MockServer::start().await;
        ingest_status(&server, 200).await;
        let h = harness(&server);
        for value in [10.0, 20.0, 5.0] {
            h.source.push(steps(value));
        }

        let report = h.relay.run_metric(HealthMetric::StepCount).await;
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.data_points, 3);

        let committed = h.relay.cursors().get(HealthMetric::StepCount).unwrap();
        assert!(committed.is_some());

        let again = h.relay.run_metric(HealthMetric::StepCount).await;
        assert_eq!(again.status, JobStatus::NoSamples);
        assert_eq!(again.data_points, 0);
        assert_eq!(h.relay.cursors().get(HealthMetric::StepCount).unwrap(), committed);
    }

    #[tokio::test]
    async fn test_forward_failure_keeps_cursor_and_retries_same_points() {
        let server = MockServer::start().await;
        ingest_status(&server, 500).await;
        let h = harness(&server);
        h.source.push(steps(10.0));
        h.source.push(steps(20.0));

        let failed = h.relay.run_metric(HealthMetric::StepCount).await;
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(!failed.fatal);
        assert_eq!(h.relay.cursors().get(HealthMetric::StepCount).unwrap(), None);

        // New samples arrive before the retry; nothing from the failed run is lost
        h.source.push(steps(5.0));
        let retried = h.relay.preview(HealthMetric::StepCount).await.unwrap();
        let values: Vec<f64> = retried.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![10.0, 20.0, 5.0]);

        ingest_status(&server, 200).await;
        let ok = h.relay.run_metric(HealthMetric::StepCount).await;
        assert_eq!(ok.status, JobStatus::Completed);
        assert_eq!(ok.data_points, 3);
    }

    #[tokio::test]
    async fn test_cursor_tracks_last_successful_forward() {
        let server = MockServer::start().await;
        let h = harness(&server);

        ingest_status(&server, 200).await;
        h.source.push(steps(1.0));
        h.relay.run_metric(HealthMetric::StepCount).await;
        let first = h.relay.cursors().get(HealthMetric::StepCount).unwrap();

        ingest_status(&server, 503).await;
        h.source.push(steps(2.0));
        h.relay.run_metric(HealthMetric::StepCount).await;
        assert_eq!(h.relay.cursors().get(HealthMetric::StepCount).unwrap(), first);

        ingest_status(&server, 200).await;
        h.relay.run_metric(HealthMetric::StepCount).await;
        let last = h.relay.cursors().get(HealthMetric::StepCount).unwrap();
        assert_ne!(last, first);
        assert_eq!(last, Some(Cursor::new(2u64.to_be_bytes().to_vec())));
    }

    #[tokio::test]
    async fn test_denied_metric_fails_alone() {
        let server = MockServer::start().await;
        ingest_status(&server, 200).await;
        let h = harness(&server);
        h.source.deny(HealthMetric::HeartRate);
        h.source
            .push(sample("heartRate", 70.0, Unit::CountPerMinute));
        h.source.push(steps(3.0));

        let summary = h.relay.run().await;

        let heart = summary.report(HealthMetric::HeartRate).unwrap();
        assert_eq!(heart.status, JobStatus::Failed);
        assert!(heart.error.as_deref().unwrap().contains("heartRate"));
        assert_eq!(
            summary.report(HealthMetric::StepCount).unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_failed_authorization_request_fails_every_job() {
        let server = MockServer::start().await;
        ingest_status(&server, 200).await;
        let h = harness(&server);
        h.source.fail_authorization("prompt dismissed");
        h.source.push(steps(3.0));

        let summary = h.relay.run().await;
        assert_eq!(summary.count(JobStatus::Failed), 6);
        assert!(!summary.has_fatal());
    }

    #[tokio::test]
    async fn test_query_failure_is_isolated() {
        let server = MockServer::start().await;
        ingest_status(&server, 200).await;
        let h = harness(&server);
        h.source.fail_queries(HealthMetric::AppleStandTime, "database locked");
        h.source
            .push(sample("appleStandTime", 1.0, Unit::Hour));
        h.source.push(steps(3.0));

        let summary = h.relay.run().await;

        let stand = summary.report(HealthMetric::AppleStandTime).unwrap();
        assert_eq!(stand.status, JobStatus::Failed);
        assert_eq!(
            h.relay.cursors().get(HealthMetric::AppleStandTime).unwrap(),
            None
        );
        assert_eq!(
            summary.report(HealthMetric::StepCount).unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_corrupt_cursor_is_fatal_for_its_job_only() {
        let server = MockServer::start().await;
        ingest_status(&server, 200).await;
        let h = harness(&server);
        h.prefs
            .set_data(&h.relay.cursors().key(HealthMetric::StepCount), b"\x00\x01")
            .unwrap();
        h.source.push(steps(3.0));
        h.source
            .push(sample("heartRate", 80.0, Unit::CountPerMinute));

        let summary = h.relay.run().await;

        let step = summary.report(HealthMetric::StepCount).unwrap();
        assert_eq!(step.status, JobStatus::Failed);
        assert!(step.fatal);
        assert!(summary.has_fatal());
        assert_eq!(
            summary.report(HealthMetric::HeartRate).unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_incompatible_unit_fails_without_commit() {
        let server = MockServer::start().await;
        ingest_status(&server, 200).await;
        let h = harness(&server);
        h.source.push(sample("stepCount", 4.0, Unit::Kilocalorie));

        let report = h.relay.run_metric(HealthMetric::StepCount).await;
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(h.relay.cursors().get(HealthMetric::StepCount).unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_finite_sample_never_reaches_ingest() {
        let server = MockServer::start().await;
        ingest_status(&server, 200).await;
        let h = harness(&server);
        h.source
            .push(sample("heartRate", f64::NAN, Unit::CountPerMinute));
        h.source
            .push(sample("heartRate", 71.0, Unit::CountPerMinute));

        let report = h.relay.run_metric(HealthMetric::HeartRate).await;
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.data_points, 1);
        assert!(h.relay.cursors().get(HealthMetric::HeartRate).unwrap().is_some());

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["gauge"].as_array().unwrap().len(), 1);
        assert_eq!(body["gauge"][0]["value"], 71.0);
    }

    #[tokio::test]
    async fn test_preview_does_not_forward_or_commit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let h = harness(&server);
        h.source
            .push(sample("activeEnergyBurned", 4184.0, Unit::Joule));

        let points = h.relay.preview(HealthMetric::ActiveEnergyBurned).await.unwrap();
        assert_eq!(points.len(), 1);
        assert!((points[0].value - 1.0).abs() < 1e-9);
        assert_eq!(
            h.relay.cursors().get(HealthMetric::ActiveEnergyBurned).unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_preview_of_denied_metric_is_permission_error() {
        let server = MockServer::start().await;
        let h = harness(&server);
        h.source.deny(HealthMetric::RestingHeartRate);

        let err = h
            .relay
            .preview(HealthMetric::RestingHeartRate)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Permission(HealthMetric::RestingHeartRate)));
    }
}
