//! Replay health source
//!
//! Serves samples loaded from a file or pushed in-process. Every sample gets a
//! monotonically increasing sequence number and the cursor encodes the last
//! delivered one, which gives the same resumable semantics as the platform's
//! anchored queries.

use super::{AuthorizationGrant, HealthSource, QueryPage};
use crate::error::{RelayError, SourceError};
use crate::schema::{RawSample, SampleParser};
use crate::types::{Cursor, HealthMetric};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct ReplayState {
    next_seq: u64,
    samples: HashMap<HealthMetric, Vec<(u64, RawSample)>>,
    granted: HashSet<HealthMetric>,
    denied: HashSet<HealthMetric>,
    failures: HashMap<HealthMetric, String>,
    authorization_failure: Option<String>,
}

/// In-process [`HealthSource`] replaying a fixed set of samples
#[derive(Debug, Default)]
pub struct ReplaySource {
    state: Mutex<ReplayState>,
}

impl ReplaySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source from samples, routing each by its identifier
    pub fn with_samples(samples: impl IntoIterator<Item = RawSample>) -> Self {
        let source = Self::new();
        for sample in samples {
            source.push(sample);
        }
        source
    }

    /// Load samples from a JSON array or NDJSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::Parse(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let samples = SampleParser::parse(&content)?;

        if let Some(invalid) = SampleParser::validate_samples(&samples).into_iter().next() {
            return Err(RelayError::Parse(format!(
                "sample {} (index {}): {}",
                invalid.sample_id, invalid.index, invalid.error
            )));
        }

        Ok(Self::with_samples(samples))
    }

    fn state(&self) -> MutexGuard<'_, ReplayState> {
        // State is plain data; a panic elsewhere cannot leave it half-updated
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a sample under the metric its identifier names.
    ///
    /// Returns `false` (and drops the sample) when the identifier is not tracked.
    pub fn push(&self, sample: RawSample) -> bool {
        match HealthMetric::from_identifier(&sample.identifier) {
            Some(metric) => {
                self.push_to(metric, sample);
                true
            }
            None => false,
        }
    }

    /// Append a sample to `metric`'s history regardless of its identifier
    pub fn push_to(&self, metric: HealthMetric, sample: RawSample) {
        let mut state = self.state();
        state.next_seq += 1;
        let seq = state.next_seq;
        state.samples.entry(metric).or_default().push((seq, sample));
    }

    /// Refuse read authorization for `metric` on the next request
    pub fn deny(&self, metric: HealthMetric) {
        let mut state = self.state();
        state.denied.insert(metric);
        state.granted.remove(&metric);
    }

    /// Make queries for `metric` fail with `message` until cleared
    pub fn fail_queries(&self, metric: HealthMetric, message: impl Into<String>) {
        self.state().failures.insert(metric, message.into());
    }

    pub fn clear_failure(&self, metric: HealthMetric) {
        self.state().failures.remove(&metric);
    }

    /// Make the next authorization requests fail outright
    pub fn fail_authorization(&self, message: impl Into<String>) {
        self.state().authorization_failure = Some(message.into());
    }

    /// Number of samples held for `metric`
    pub fn len(&self, metric: HealthMetric) -> usize {
        self.state().samples.get(&metric).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.state().samples.values().all(Vec::is_empty)
    }
}

fn decode_cursor(cursor: Option<&Cursor>) -> Result<u64, SourceError> {
    let Some(cursor) = cursor else {
        return Ok(0);
    };
    let bytes: [u8; 8] = cursor
        .as_bytes()
        .try_into()
        .map_err(|_| SourceError::Query("malformed anchor".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

fn encode_cursor(seq: u64) -> Cursor {
    Cursor::new(seq.to_be_bytes().to_vec())
}

#[async_trait]
impl HealthSource for ReplaySource {
    async fn request_authorization(
        &self,
        metrics: &[HealthMetric],
    ) -> Result<AuthorizationGrant, SourceError> {
        let mut state = self.state();
        if let Some(message) = &state.authorization_failure {
            return Err(SourceError::Authorization(message.clone()));
        }

        let granted: Vec<HealthMetric> = metrics
            .iter()
            .copied()
            .filter(|m| !state.denied.contains(m))
            .collect();
        state.granted.extend(granted.iter().copied());

        Ok(AuthorizationGrant::new(granted))
    }

    async fn query(
        &self,
        metric: HealthMetric,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<QueryPage, SourceError> {
        let state = self.state();
        if !state.granted.contains(&metric) {
            return Err(SourceError::NotAuthorized(metric));
        }
        if let Some(message) = state.failures.get(&metric) {
            return Err(SourceError::Query(message.clone()));
        }

        let after = decode_cursor(cursor)?;
        let page: Vec<&(u64, RawSample)> = state
            .samples
            .get(&metric)
            .map(|history| {
                history
                    .iter()
                    .filter(|(seq, _)| *seq > after)
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default();

        let last = page.last().map_or(after, |(seq, _)| *seq);
        debug!(
            metric = %metric,
            after,
            returned = page.len(),
            "Replay query served"
        );

        Ok(QueryPage {
            samples: page.into_iter().map(|(_, s)| s.clone()).collect(),
            cursor: encode_cursor(last),
        })
    }
}
