//! Engine-level and row-level failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::ReadingField;
use crate::config::ConfigError;

/// Fatal: raised before any row is processed, no partial output.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("input batch is missing required columns: {missing_columns:?}")]
    Structural { missing_columns: Vec<String> },
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Non-fatal: the row is dropped and tallied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("required field {0} is null")]
    MissingField(ReadingField),
    #[error("reading type '{0}' is not configured")]
    UnknownReadingType(String),
    #[error("timestamp '{0}' cannot be parsed")]
    MalformedTimestamp(String),
    #[error("no battery median available for imputation")]
    NoBatteryMedian,
}

impl RowError {
    pub fn kind(&self) -> RowErrorKind {
        match self {
            Self::MissingField(_) => RowErrorKind::MissingField,
            Self::UnknownReadingType(_) => RowErrorKind::UnknownReadingType,
            Self::MalformedTimestamp(_) => RowErrorKind::MalformedTimestamp,
            Self::NoBatteryMedian => RowErrorKind::NoBatteryMedian,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    MissingField,
    UnknownReadingType,
    MalformedTimestamp,
    NoBatteryMedian,
}

impl RowErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::UnknownReadingType => "unknown_reading_type",
            Self::MalformedTimestamp => "malformed_timestamp",
            Self::NoBatteryMedian => "no_battery_median",
        }
    }
}
