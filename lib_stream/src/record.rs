//! # Records and Line Decoding
//!
//! A provider line looks like
//!
//! ```text
//! data:{"id":"sensor-1","temperature":21.5,"humidity":40.0,"timestamp":"2024-05-01T10:00:00"}
//! ```
//!
//! `DataPrefixDecoder` strips the `data:` framing and deserializes the JSON
//! payload into an immutable `SensorRecord`. Decoding is pure: the same line
//! always yields the same result.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// The framing prefix every payload line carries.
pub const DATA_PREFIX: &str = "data:";

/// # Sensor Record
///
/// The decoded application payload. Every field other than `id` and
/// `timestamp` must be numeric and is collected into `measurements`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Stable identity of the emitting sensor.
    pub id: String,
    /// Producer timestamp, kept exactly as sent.
    pub timestamp: String,
    /// Scalar readings keyed by name (`temperature`, `humidity`, ...).
    #[serde(flatten)]
    pub measurements: BTreeMap<String, f64>,
}

impl SensorRecord {
    /// Convenience constructor, mostly used for fallback records.
    pub fn new(id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: timestamp.into(),
            measurements: BTreeMap::new(),
        }
    }

    /// Adds one measurement.
    pub fn with_measurement(mut self, name: impl Into<String>, value: f64) -> Self {
        self.measurements.insert(name.into(), value);
        self
    }

    /// Looks up one measurement by name.
    pub fn measurement(&self, name: &str) -> Option<f64> {
        self.measurements.get(name).copied()
    }

    /// Parses `timestamp` as an ISO local date-time, falling back to RFC 3339.
    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(&self.timestamp)
                    .ok()
                    .map(|dt| dt.naive_local())
            })
    }
}

/// Collaborator boundary for turning one line into a record.
pub trait RecordDecoder: Send + Sync + 'static {
    /// Decodes one framed line.
    fn decode(&self, line: &str) -> Result<SensorRecord, DecodeError>;
}

/// Decoder for `data:`-prefixed JSON lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataPrefixDecoder {
    lenient: bool,
}

impl DataPrefixDecoder {
    /// Strict decoder: an unprefixed line is a `DecodeError::MissingPrefix`.
    pub fn strict() -> Self {
        Self { lenient: false }
    }

    /// Lenient decoder: an unprefixed line is parsed as bare JSON.
    pub fn lenient() -> Self {
        Self { lenient: true }
    }
}

impl RecordDecoder for DataPrefixDecoder {
    fn decode(&self, line: &str) -> Result<SensorRecord, DecodeError> {
        let payload = match line.strip_prefix(DATA_PREFIX) {
            Some(rest) => rest.trim(),
            None if self.lenient => line.trim(),
            None => return Err(DecodeError::MissingPrefix(line.to_string())),
        };
        Ok(serde_json::from_str::<SensorRecord>(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str =
        r#"data:{"id":"s-1","temperature":21.5,"humidity":40.0,"timestamp":"2024-05-01T10:00:00"}"#;

    #[test]
    fn decodes_prefixed_line() {
        let record = DataPrefixDecoder::strict().decode(LINE).unwrap();
        assert_eq!(record.id, "s-1");
        assert_eq!(record.measurement("temperature"), Some(21.5));
        assert_eq!(record.measurement("humidity"), Some(40.0));
        assert_eq!(record.measurements.len(), 2);
    }

    #[test]
    fn whitespace_after_prefix_is_ignored() {
        let line = r#"data:   {"id":"s-2","timestamp":"t"}  "#;
        let record = DataPrefixDecoder::strict().decode(line).unwrap();
        assert_eq!(record.id, "s-2");
        assert!(record.measurements.is_empty());
    }

    #[test]
    fn unprefixed_line_is_an_error_in_strict_mode() {
        let line = r#"{"id":"s-1","timestamp":"t"}"#;
        let err = DataPrefixDecoder::strict().decode(line).unwrap_err();
        assert!(matches!(err, DecodeError::MissingPrefix(_)));
        assert!(DataPrefixDecoder::lenient().decode(line).is_ok());
    }

    #[test]
    fn malformed_payload_is_reported() {
        let err = DataPrefixDecoder::strict().decode("data:{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));

        let err = DataPrefixDecoder::strict()
            .decode(r#"data:{"id":"s","timestamp":"t","label":"hot"}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn decoding_is_deterministic() {
        let d = DataPrefixDecoder::strict();
        assert_eq!(d.decode(LINE).unwrap(), d.decode(LINE).unwrap());
    }

    #[test]
    fn timestamp_parsing() {
        let record = DataPrefixDecoder::strict().decode(LINE).unwrap();
        let ts = record.parsed_timestamp().unwrap();
        assert_eq!(ts.to_string(), "2024-05-01 10:00:00");

        let rfc = SensorRecord::new("s", "2024-05-01T10:00:00.250+02:00");
        assert!(rfc.parsed_timestamp().is_some());
        assert!(SensorRecord::new("s", "yesterday").parsed_timestamp().is_none());
    }
}
