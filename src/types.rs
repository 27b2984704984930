//! Core types for the HKSFX relay
//!
//! This module defines the data structures that flow through each stage of the
//! relay: the tracked health metrics, normalized data points, opaque cursors,
//! and the per-job reports produced by a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Prefix the platform puts in front of every quantity type identifier
pub const IDENTIFIER_PREFIX: &str = "HKQuantityTypeIdentifier";

/// Ingest semantics of a data point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Gauge,
    Counter,
    CumulativeCounter,
}

impl MetricType {
    /// Name of the ingest batch this kind is sent in
    pub fn batch_name(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::CumulativeCounter => "cumulative_counter",
        }
    }
}

/// The fixed set of health metric types tracked by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthMetric {
    HeartRate,
    RestingHeartRate,
    ActiveEnergyBurned,
    AppleExerciseTime,
    AppleStandTime,
    StepCount,
}

impl HealthMetric {
    /// All tracked metrics, in catalogue order
    pub const ALL: [HealthMetric; 6] = [
        HealthMetric::HeartRate,
        HealthMetric::RestingHeartRate,
        HealthMetric::ActiveEnergyBurned,
        HealthMetric::AppleExerciseTime,
        HealthMetric::AppleStandTime,
        HealthMetric::StepCount,
    ];

    /// Platform raw identifier, used to key persisted cursors
    pub fn identifier(&self) -> &'static str {
        match self {
            HealthMetric::HeartRate => "HKQuantityTypeIdentifierHeartRate",
            HealthMetric::RestingHeartRate => "HKQuantityTypeIdentifierRestingHeartRate",
            HealthMetric::ActiveEnergyBurned => "HKQuantityTypeIdentifierActiveEnergyBurned",
            HealthMetric::AppleExerciseTime => "HKQuantityTypeIdentifierAppleExerciseTime",
            HealthMetric::AppleStandTime => "HKQuantityTypeIdentifierAppleStandTime",
            HealthMetric::StepCount => "HKQuantityTypeIdentifierStepCount",
        }
    }

    /// Catalogue identifier (camelCase)
    pub fn short_name(&self) -> &'static str {
        match self {
            HealthMetric::HeartRate => "heartRate",
            HealthMetric::RestingHeartRate => "restingHeartRate",
            HealthMetric::ActiveEnergyBurned => "activeEnergyBurned",
            HealthMetric::AppleExerciseTime => "appleExerciseTime",
            HealthMetric::AppleStandTime => "appleStandTime",
            HealthMetric::StepCount => "stepCount",
        }
    }

    /// Human readable name shown in job reports
    pub fn friendly_name(&self) -> &'static str {
        self.identifier()
            .strip_prefix(IDENTIFIER_PREFIX)
            .unwrap_or_else(|| self.identifier())
    }

    /// Resolve a raw identifier or a catalogue short name.
    ///
    /// Returns `None` for identifiers outside the tracked set.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.identifier() == identifier || m.short_name() == identifier)
    }
}

impl fmt::Display for HealthMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A normalized metric data point ready for ingest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Stable identifier of the source sample
    pub id: Uuid,
    /// Ingest semantics
    pub kind: MetricType,
    /// Ingest metric name, e.g. `hkit_step_count`
    pub metric_name: String,
    /// Value in the catalogue unit of the metric
    pub value: f64,
    /// Dimensions attached to the data point
    pub dimensions: HashMap<String, String>,
    /// End time of the source sample (UTC)
    pub timestamp: DateTime<Utc>,
}

/// Opaque resumption token for one metric type's sample history.
///
/// Only the health source that produced a cursor knows how to interpret it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Cursor(Vec<u8>);

impl Cursor {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({} bytes)", self.0.len())
    }
}

/// Terminal state of one metric type's import job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
    NoSamples,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// Outcome of one metric type's import job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub metric: HealthMetric,
    pub status: JobStatus,
    /// Number of data points produced by the poll
    pub data_points: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the job hit an unrecoverable fault
    #[serde(default)]
    pub fatal: bool,
}

impl JobReport {
    pub fn pending(metric: HealthMetric) -> Self {
        Self {
            metric,
            status: JobStatus::Pending,
            data_points: 0,
            error: None,
            fatal: false,
        }
    }
}

/// Reports of all jobs in one run, in catalogue order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub jobs: Vec<JobReport>,
}

impl RunSummary {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn total_data_points(&self) -> usize {
        self.jobs.iter().map(|j| j.data_points).sum()
    }

    pub fn has_fatal(&self) -> bool {
        self.jobs.iter().any(|j| j.fatal)
    }

    pub fn report(&self, metric: HealthMetric) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.metric == metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_resolution() {
        assert_eq!(
            HealthMetric::from_identifier("HKQuantityTypeIdentifierStepCount"),
            Some(HealthMetric::StepCount)
        );
        assert_eq!(
            HealthMetric::from_identifier("restingHeartRate"),
            Some(HealthMetric::RestingHeartRate)
        );
        assert_eq!(HealthMetric::from_identifier("bodyMass"), None);
    }

    #[test]
    fn test_friendly_name_strips_prefix() {
        assert_eq!(HealthMetric::AppleStandTime.friendly_name(), "AppleStandTime");
        assert_eq!(HealthMetric::HeartRate.to_string(), "heartRate");
    }

    #[test]
    fn test_cursor_debug_hides_bytes() {
        let cursor = Cursor::new(vec![1, 2, 3]);
        assert_eq!(format!("{:?}", cursor), "Cursor(3 bytes)");
    }

    #[test]
    fn test_run_summary_counts() {
        let mut done = JobReport::pending(HealthMetric::StepCount);
        done.status = JobStatus::Completed;
        done.data_points = 3;
        let mut empty = JobReport::pending(HealthMetric::HeartRate);
        empty.status = JobStatus::NoSamples;

        let summary = RunSummary {
            jobs: vec![done, empty],
        };
        assert_eq!(summary.count(JobStatus::Completed), 1);
        assert_eq!(summary.count(JobStatus::NoSamples), 1);
        assert_eq!(summary.total_data_points(), 3);
        assert!(!summary.has_fatal());
        assert!(summary.report(HealthMetric::StepCount).is_some());
    }
}
