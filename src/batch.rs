//! Reading and batch types shared by every pipeline stage.
//!
//! A batch moves through three shapes:
//! - [`RawReading`]: whatever ingestion handed over, every field nullable
//! - [`Reading`]: post-cleaner row, all five fields present
//! - [`EnrichedReading`]: normalized timestamp plus the derived columns

use std::fmt;
use std::ops::Range;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const REQUIRED_COLUMNS: [&str; 5] = [
    "sensor_id",
    "timestamp",
    "reading_type",
    "value",
    "battery_level",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingField {
    SensorId,
    Timestamp,
    ReadingType,
    Value,
    BatteryLevel,
}

impl ReadingField {
    pub const ALL: [ReadingField; 5] = [
        Self::SensorId,
        Self::Timestamp,
        Self::ReadingType,
        Self::Value,
        Self::BatteryLevel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SensorId => "sensor_id",
            Self::Timestamp => "timestamp",
            Self::ReadingType => "reading_type",
            Self::Value => "value",
            Self::BatteryLevel => "battery_level",
        }
    }
}

impl fmt::Display for ReadingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row as delivered by ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub sensor_id: Option<String>,
    pub timestamp: Option<String>,
    pub reading_type: Option<String>,
    pub value: Option<f64>,
    pub battery_level: Option<f64>,
}

impl RawReading {
    pub fn new(
        sensor_id: &str,
        timestamp: &str,
        reading_type: &str,
        value: f64,
        battery_level: f64,
    ) -> Self {
        Self {
            sensor_id: Some(sensor_id.to_string()),
            timestamp: Some(timestamp.to_string()),
            reading_type: Some(reading_type.to_string()),
            value: Some(value),
            battery_level: Some(battery_level),
        }
    }

    /// Reading type after blank-string normalization.
    pub fn reading_type_text(&self) -> Option<&str> {
        non_blank(self.reading_type.as_deref())
    }
}

impl From<Reading> for RawReading {
    fn from(row: Reading) -> Self {
        Self {
            sensor_id: Some(row.sensor_id),
            timestamp: Some(row.timestamp),
            reading_type: Some(row.reading_type),
            value: Some(row.value),
            battery_level: Some(row.battery_level),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBatch {
    pub columns: Vec<String>,
    pub rows: Vec<RawReading>,
}

impl RawBatch {
    pub fn new(columns: Vec<String>, rows: Vec<RawReading>) -> Self {
        Self { columns, rows }
    }

    /// Batch carrying the full five-column schema.
    pub fn from_rows(rows: Vec<RawReading>) -> Self {
        Self {
            columns: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn check_schema(&self) -> Result<(), EngineError> {
        let missing_columns: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|required| !self.columns.iter().any(|c| c.trim() == **required))
            .map(|c| c.to_string())
            .collect();

        if missing_columns.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Structural { missing_columns })
        }
    }
}

/// Cleaned row: all five fields present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: String,
    pub timestamp: String,
    pub reading_type: String,
    pub value: f64,
    pub battery_level: f64,
}

impl Reading {
    pub fn new(
        sensor_id: &str,
        timestamp: &str,
        reading_type: &str,
        value: f64,
        battery_level: f64,
    ) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            timestamp: timestamp.to_string(),
            reading_type: reading_type.to_string(),
            value,
            battery_level,
        }
    }
}

/// Output row handed to the loading collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedReading {
    pub sensor_id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub reading_type: String,
    pub value: f64,
    pub battery_level: f64,
    pub timestamp_iso: String,
    pub date: NaiveDate,
    pub daily_avg: f64,
    pub rolling_avg_7d: f64,
    pub anomalous_reading: bool,
}

impl EnrichedReading {
    pub fn group_key(&self) -> (&str, &str) {
        (&self.sensor_id, &self.reading_type)
    }
}

pub(crate) fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

pub(crate) fn finite(raw: Option<f64>) -> Option<f64> {
    raw.filter(|v| v.is_finite())
}

/// Index ranges of consecutive rows in the same group. Callers sort first.
pub(crate) fn run_bounds<T>(rows: &[T], same_group: impl Fn(&T, &T) -> bool) -> Vec<Range<usize>> {
    let mut bounds = Vec::new();
    let mut start = 0;
    for idx in 1..=rows.len() {
        if idx == rows.len() || !same_group(&rows[start], &rows[idx]) {
            if start < idx {
                bounds.push(start..idx);
            }
            start = idx;
        }
    }
    bounds
}
