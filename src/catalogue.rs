//! Fixed metric catalogue
//!
//! Maps each tracked health quantity type to its ingest semantics, metric
//! name, and the unit its values are reported in, and turns raw samples into
//! normalized [`DataPoint`]s.

use crate::error::RelayError;
use crate::schema::{RawSample, Unit};
use crate::types::{DataPoint, HealthMetric, MetricType};
use std::collections::HashMap;
use tracing::warn;

/// Dimension attached to every data point so ingest keeps full resolution
pub const HIRES_DIMENSION: (&str, &str) = ("sf_hires", "1");

/// Catalogue entry for one health metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogueEntry {
    pub metric: HealthMetric,
    pub kind: MetricType,
    pub metric_name: &'static str,
    pub unit: Unit,
}

/// The catalogue, in [`HealthMetric::ALL`] order
pub const CATALOGUE: [CatalogueEntry; 6] = [
    CatalogueEntry {
        metric: HealthMetric::HeartRate,
        kind: MetricType::Gauge,
        metric_name: "hkit_heart_rate",
        unit: Unit::CountPerMinute,
    },
    CatalogueEntry {
        metric: HealthMetric::RestingHeartRate,
        kind: MetricType::Gauge,
        metric_name: "hkit_resting_heart_rate",
        unit: Unit::CountPerMinute,
    },
    CatalogueEntry {
        metric: HealthMetric::ActiveEnergyBurned,
        kind: MetricType::Counter,
        metric_name: "hkit_active_calories_burned",
        unit: Unit::Kilocalorie,
    },
    CatalogueEntry {
        metric: HealthMetric::AppleExerciseTime,
        kind: MetricType::Counter,
        metric_name: "hkit_exercise_minutes",
        unit: Unit::Minute,
    },
    CatalogueEntry {
        metric: HealthMetric::AppleStandTime,
        kind: MetricType::Counter,
        metric_name: "hkit_stand_hours",
        unit: Unit::Hour,
    },
    CatalogueEntry {
        metric: HealthMetric::StepCount,
        kind: MetricType::Counter,
        metric_name: "hkit_step_count",
        unit: Unit::Count,
    },
];

/// Look up the catalogue entry of a tracked metric
pub fn entry(metric: HealthMetric) -> &'static CatalogueEntry {
    // CATALOGUE is indexed in HealthMetric::ALL order
    &CATALOGUE[metric as usize]
}

/// Look up the catalogue entry for a raw sample identifier
pub fn lookup(identifier: &str) -> Option<&'static CatalogueEntry> {
    HealthMetric::from_identifier(identifier).map(entry)
}

/// Convert a raw sample into a data point.
///
/// Returns `Ok(None)` for identifiers outside the catalogue. Those are dropped
/// rather than reported so new platform quantity types do not break a poll.
/// Samples that fail [`RawSample::validate`] are dropped the same way, since
/// ingest cannot represent a non-finite value.
pub fn normalize(sample: &RawSample) -> Result<Option<DataPoint>, RelayError> {
    let Some(entry) = lookup(&sample.identifier) else {
        return Ok(None);
    };

    if let Err(e) = sample.validate() {
        warn!(metric = %entry.metric, "Dropping invalid sample: {e}");
        return Ok(None);
    }

    let value = sample
        .quantity
        .value_in(entry.unit)
        .map_err(|source| RelayError::Conversion {
            metric: entry.metric,
            sample_id: sample.id,
            source,
        })?;

    Ok(Some(DataPoint {
        id: sample.id,
        kind: entry.kind,
        metric_name: entry.metric_name.to_string(),
        value,
        dimensions: default_dimensions(),
        timestamp: sample.end_date,
    }))
}

/// Convert a batch of samples, preserving order and dropping unknown identifiers
pub fn normalize_all(samples: &[RawSample]) -> Result<Vec<DataPoint>, RelayError> {
    let mut points = Vec::with_capacity(samples.len());
    for sample in samples {
        if let Some(point) = normalize(sample)? {
            points.push(point);
        }
    }
    Ok(points)
}

fn default_dimensions() -> HashMap<String, String> {
    let (key, value) = HIRES_DIMENSION;
    HashMap::from([(key.to_string(), value.to_string())])
}
