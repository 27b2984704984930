//! Parsing of raw sample documents
//!
//! Samples are exchanged either as a JSON array or as NDJSON (one sample per
//! line), the same two layouts the CLI accepts for input files.

use crate::error::RelayError;
use crate::schema::sample::{RawSample, ValidationError};

/// Parser for raw sample documents
pub struct SampleParser;

impl SampleParser {
    /// Parse a JSON string containing an array of samples
    pub fn parse_array(json: &str) -> Result<Vec<RawSample>, RelayError> {
        let samples: Vec<RawSample> = serde_json::from_str(json)?;
        Ok(samples)
    }

    /// Parse NDJSON (newline-delimited JSON) containing samples
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawSample>, RelayError> {
        let mut samples = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawSample>(trimmed) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    return Err(RelayError::Parse(format!(
                        "line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(samples)
    }

    /// Parse either layout, detecting an array by its leading bracket
    pub fn parse(input: &str) -> Result<Vec<RawSample>, RelayError> {
        if input.trim_start().starts_with('[') {
            Self::parse_array(input)
        } else {
            Self::parse_ndjson(input)
        }
    }

    /// Validate a batch of samples, returning only the failures
    pub fn validate_samples(samples: &[RawSample]) -> Vec<SampleValidation> {
        samples
            .iter()
            .enumerate()
            .filter_map(|(index, sample)| {
                sample.validate().err().map(|error| SampleValidation {
                    index,
                    sample_id: sample.id.to_string(),
                    error,
                })
            })
            .collect()
    }
}

/// A sample that failed validation
#[derive(Debug)]
pub struct SampleValidation {
    pub index: usize,
    pub sample_id: String,
    pub error: ValidationError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::sample::Unit;

    const NDJSON: &str = r#"
{"id":"6f1c2b7e-8a0e-4c8e-9d0a-1b2c3d4e5f60","identifier":"stepCount","quantity":{"value":10,"unit":"count"},"end_date":"2024-03-27T08:00:00Z"}

{"id":"6f1c2b7e-8a0e-4c8e-9d0a-1b2c3d4e5f61","identifier":"HKQuantityTypeIdentifierHeartRate","quantity":{"value":62,"unit":"count/min"},"start_date":"2024-03-27T08:00:00Z","end_date":"2024-03-27T08:00:05Z"}
"#;

    #[test]
    fn test_parse_ndjson_skips_blank_lines() {
        let samples = SampleParser::parse_ndjson(NDJSON).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].identifier, "stepCount");
        assert_eq!(samples[1].quantity.unit, Unit::CountPerMinute);
        assert!(samples[1].start_date.is_some());
    }

    #[test]
    fn test_parse_ndjson_reports_line_number() {
        let err = SampleParser::parse_ndjson("\n{not json}\n").unwrap_err();
        assert!(err.to_string().contains("line 2"), "got: {err}");
    }

    #[test]
    fn test_parse_detects_array() {
        let json = r#"[{"id":"6f1c2b7e-8a0e-4c8e-9d0a-1b2c3d4e5f60","identifier":"stepCount","quantity":{"value":5,"unit":"count"},"end_date":"2024-03-27T08:00:00Z"}]"#;
        let samples = SampleParser::parse(json).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].quantity.value, 5.0);
    }

    #[test]
    fn test_sample_without_id_rejected() {
        let line = r#"{"identifier":"stepCount","quantity":{"value":10,"unit":"count"},"end_date":"2024-03-27T08:00:00Z"}"#;

        let err = SampleParser::parse_ndjson(line).unwrap_err();
        assert!(matches!(err, RelayError::Parse(ref m) if m.contains("id")), "got: {err}");

        let err = SampleParser::parse(&format!("[{line}]")).unwrap_err();
        assert!(matches!(err, RelayError::Json(_)), "got: {err}");
    }

    #[test]
    fn test_reparse_keeps_sample_ids() {
        let first = SampleParser::parse_ndjson(NDJSON).unwrap();
        let second = SampleParser::parse_ndjson(NDJSON).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_validate_samples_reports_failures_only() {
        let mut samples = SampleParser::parse_ndjson(NDJSON).unwrap();
        samples[0].quantity.value = f64::INFINITY;

        let failures = SampleParser::validate_samples(&samples);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 0);
    }
}
