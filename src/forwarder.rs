//! Metric forwarding
//!
//! Sends one batch of data points to the datapoint ingest API. Any 2xx
//! response counts as delivered; every other status and every transport error
//! is a failure. There is no retry here: a failed send leaves the cursor where
//! it was and the next run picks the same samples up again.

use crate::credentials::{Credentials, CredentialsStore};
use crate::encoder::{partition, IngestBatch};
use crate::error::RelayError;
use crate::store::blocking;
use crate::types::DataPoint;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Header carrying the ingest access token
pub const TOKEN_HEADER: &str = "X-SF-Token";

/// Default timeout for one ingest request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts data point batches to the ingest endpoint
#[derive(Clone)]
pub struct MetricForwarder {
    client: Client,
    credentials: CredentialsStore,
    ingest_url: Option<String>,
}

impl MetricForwarder {
    pub fn new(credentials: CredentialsStore) -> Result<Self, RelayError> {
        Self::with_timeout(credentials, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        credentials: CredentialsStore,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            credentials,
            ingest_url: None,
        })
    }

    /// Send to `url` instead of the realm's ingest endpoint
    pub fn with_ingest_url(mut self, url: impl Into<String>) -> Self {
        self.ingest_url = Some(url.into());
        self
    }

    /// Endpoint the next batch will be posted to
    pub fn endpoint(&self) -> Result<String, RelayError> {
        Ok(self.endpoint_for(&self.credentials.load()?))
    }

    fn endpoint_for(&self, credentials: &Credentials) -> String {
        match &self.ingest_url {
            Some(url) => url.clone(),
            None => credentials.ingest_url(),
        }
    }

    /// Send one batch, reporting only whether ingest accepted it
    pub async fn send(
        &self,
        gauges: &[DataPoint],
        counters: &[DataPoint],
        cumulative_counters: &[DataPoint],
    ) -> bool {
        match self.try_send(gauges, counters, cumulative_counters).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Ingest batch not delivered: {e}");
                false
            }
        }
    }

    /// Partition `points` by kind and send them as one batch
    pub async fn send_points(&self, points: Vec<DataPoint>) -> Result<(), RelayError> {
        let parts = partition(points);
        self.try_send(&parts.gauges, &parts.counters, &parts.cumulative_counters)
            .await
    }

    /// Send one batch, reporting why delivery failed
    pub async fn try_send(
        &self,
        gauges: &[DataPoint],
        counters: &[DataPoint],
        cumulative_counters: &[DataPoint],
    ) -> Result<(), RelayError> {
        let store = self.credentials.clone();
        let credentials = blocking(move || store.load()).await?;
        let url = self.endpoint_for(&credentials);

        if !credentials.has_token() {
            warn!(realm = %credentials.realm, "Sending ingest batch without an access token");
        }

        let batch = IngestBatch::from_parts(gauges, counters, cumulative_counters);

        debug!(
            url = %url,
            gauges = batch.gauge.len(),
            counters = batch.counter.len(),
            cumulative_counters = batch.cumulative_counter.len(),
            "Posting ingest batch"
        );

        let response = self
            .client
            .post(&url)
            .header(TOKEN_HEADER, credentials.token.as_str())
            .json(&batch)
            .send()
            .await
            .map_err(|e| RelayError::Forward(format!("failed to send request: {e}")))?;

        let status = response.status();
        debug!("Ingest response status: {status}");

        if !status.is_success() {
            return Err(RelayError::Forward(format!("ingest returned {status}")));
        }

        info!(data_points = batch.len(), "Ingest batch accepted");
        Ok(())
    }
}
