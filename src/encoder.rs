//! Ingest encoding
//!
//! This module encodes data points into the datapoint ingest request body:
//! one object with a `gauge`, `counter` and `cumulative_counter` array, each
//! element carrying `metric`, `value`, `dimensions` and a millisecond
//! `timestamp`. All three arrays are always present, even when empty.

use crate::error::RelayError;
use crate::types::{DataPoint, MetricType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One data point as sent on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireDataPoint {
    pub metric: String,
    pub value: f64,
    pub dimensions: HashMap<String, String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl From<&DataPoint> for WireDataPoint {
    fn from(point: &DataPoint) -> Self {
        Self {
            metric: point.metric_name.clone(),
            value: point.value,
            dimensions: point.dimensions.clone(),
            timestamp: wire_timestamp(&point.timestamp),
        }
    }
}

/// Ingest timestamp for `at`.
///
/// Whole seconds times 1000: sub-second precision is dropped even though the
/// wire format carries milliseconds.
pub fn wire_timestamp(at: &DateTime<Utc>) -> i64 {
    at.timestamp() * 1000
}

/// Request body of one ingest call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestBatch {
    pub gauge: Vec<WireDataPoint>,
    pub counter: Vec<WireDataPoint>,
    pub cumulative_counter: Vec<WireDataPoint>,
}

impl IngestBatch {
    /// Build a batch from pre-partitioned data points
    pub fn from_parts(
        gauges: &[DataPoint],
        counters: &[DataPoint],
        cumulative_counters: &[DataPoint],
    ) -> Self {
        Self {
            gauge: gauges.iter().map(WireDataPoint::from).collect(),
            counter: counters.iter().map(WireDataPoint::from).collect(),
            cumulative_counter: cumulative_counters.iter().map(WireDataPoint::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.gauge.len() + self.counter.len() + self.cumulative_counter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Data points split by ingest semantics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partitioned {
    pub gauges: Vec<DataPoint>,
    pub counters: Vec<DataPoint>,
    pub cumulative_counters: Vec<DataPoint>,
}

/// Split data points by kind, keeping their relative order
pub fn partition(points: impl IntoIterator<Item = DataPoint>) -> Partitioned {
    let mut parts = Partitioned::default();
    for point in points {
        match point.kind {
            MetricType::Gauge => parts.gauges.push(point),
            MetricType::Counter => parts.counters.push(point),
            MetricType::CumulativeCounter => parts.cumulative_counters.push(point),
        }
    }
    parts
}
