//! Raw health sample schema
//!
//! A raw sample is what the health data source hands back from a query: a
//! stable id, the platform quantity type identifier, a quantity with its unit,
//! and the time interval it covers.

use crate::error::UnitError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A quantity sample as reported by the health data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Stable sample identifier, required so reloads keep the same identity
    pub id: Uuid,
    /// Platform quantity type identifier (raw value or catalogue short name)
    pub identifier: String,
    /// Measured quantity
    pub quantity: Quantity,
    /// Start of the sampled interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    /// End of the sampled interval
    pub end_date: DateTime<Utc>,
}

impl RawSample {
    /// Create a point-in-time sample with a fresh id
    pub fn new(identifier: impl Into<String>, quantity: Quantity, end_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier: identifier.into(),
            quantity,
            start_date: None,
            end_date,
        }
    }

    /// Validate the sample's internal consistency
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.quantity.value.is_finite() {
            return Err(ValidationError::NonFiniteValue { id: self.id });
        }

        if let Some(start) = self.start_date {
            if start > self.end_date {
                return Err(ValidationError::InvertedInterval { id: self.id });
            }
        }

        Ok(())
    }
}

/// Sample validation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Sample {id} has a non-finite value")]
    NonFiniteValue { id: Uuid },

    #[error("Sample {id} ends before it starts")]
    InvertedInterval { id: Uuid },
}

/// A numeric value with its unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// Express this quantity in another unit of the same dimension
    pub fn value_in(&self, unit: Unit) -> Result<f64, UnitError> {
        if self.unit == unit {
            return Ok(self.value);
        }
        if self.unit.dimension() != unit.dimension() {
            return Err(UnitError::Incompatible {
                from: self.unit.to_string(),
                to: unit.to_string(),
            });
        }
        Ok(self.value * self.unit.factor() / unit.factor())
    }
}

/// Physical dimension of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Count,
    Frequency,
    Energy,
    Time,
}

/// Measurement units used by the tracked quantity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "count/s")]
    CountPerSecond,
    #[serde(rename = "count/min")]
    CountPerMinute,
    #[serde(rename = "count/hr")]
    CountPerHour,
    #[serde(rename = "J")]
    Joule,
    #[serde(rename = "kJ")]
    Kilojoule,
    /// Small calorie
    #[serde(rename = "cal")]
    Calorie,
    /// Large (food) calorie
    #[serde(rename = "kcal", alias = "Cal")]
    Kilocalorie,
    #[serde(rename = "ms")]
    Millisecond,
    #[serde(rename = "s")]
    Second,
    #[serde(rename = "min")]
    Minute,
    #[serde(rename = "hr")]
    Hour,
    #[serde(rename = "d")]
    Day,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Count => "count",
            Unit::CountPerSecond => "count/s",
            Unit::CountPerMinute => "count/min",
            Unit::CountPerHour => "count/hr",
            Unit::Joule => "J",
            Unit::Kilojoule => "kJ",
            Unit::Calorie => "cal",
            Unit::Kilocalorie => "kcal",
            Unit::Millisecond => "ms",
            Unit::Second => "s",
            Unit::Minute => "min",
            Unit::Hour => "hr",
            Unit::Day => "d",
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Count => Dimension::Count,
            Unit::CountPerSecond | Unit::CountPerMinute | Unit::CountPerHour => {
                Dimension::Frequency
            }
            Unit::Joule | Unit::Kilojoule | Unit::Calorie | Unit::Kilocalorie => {
                Dimension::Energy
            }
            Unit::Millisecond | Unit::Second | Unit::Minute | Unit::Hour | Unit::Day => {
                Dimension::Time
            }
        }
    }

    /// Scale factor to the dimension's base unit (count, count/s, J, s)
    fn factor(&self) -> f64 {
        match self {
            Unit::Count => 1.0,
            Unit::CountPerSecond => 1.0,
            Unit::CountPerMinute => 1.0 / 60.0,
            Unit::CountPerHour => 1.0 / 3600.0,
            Unit::Joule => 1.0,
            Unit::Kilojoule => 1000.0,
            Unit::Calorie => 4.184,
            Unit::Kilocalorie => 4184.0,
            Unit::Millisecond => 0.001,
            Unit::Second => 1.0,
            Unit::Minute => 60.0,
            Unit::Hour => 3600.0,
            Unit::Day => 86_400.0,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unit = match s {
            "count" => Unit::Count,
            "count/s" => Unit::CountPerSecond,
            "count/min" => Unit::CountPerMinute,
            "count/hr" => Unit::CountPerHour,
            "J" => Unit::Joule,
            "kJ" => Unit::Kilojoule,
            "cal" => Unit::Calorie,
            "kcal" | "Cal" => Unit::Kilocalorie,
            "ms" => Unit::Millisecond,
            "s" => Unit::Second,
            "min" => Unit::Minute,
            "hr" => Unit::Hour,
            "d" => Unit::Day,
            other => return Err(UnitError::Unknown(other.to_string())),
        };
        Ok(unit)
    }
}
