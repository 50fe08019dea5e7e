//! Engine configuration: typed lookup tables, thresholds, and validation.
//!
//! Every field has a documented default so callers can supply any subset
//! through JSON. Validation runs once, before any row is touched.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::batch::ReadingField;
use crate::calibration::CalibrationTable;
use crate::temporal::parse_utc_offset;

pub const DEFAULT_TARGET_OFFSET: &str = "UTC+05:30";

/// Upper bound for any hour-valued setting: one hundred years.
pub const MAX_SPAN_HOURS: f64 = 100.0 * 366.0 * 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeRule {
    pub min: f64,
    pub max: f64,
}

impl RangeRule {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub target_offset: String,
    /// Accepted reading types; empty accepts any non-blank type.
    pub reading_types: Vec<String>,
    pub identity_key: Vec<ReadingField>,
    pub calibration: CalibrationTable,
    pub ranges: BTreeMap<String, RangeRule>,
    pub battery_range: RangeRule,
    pub z_score_threshold: f64,
    pub rolling_window_days: u32,
    pub expected_cadence_hours: f64,
    pub gap_threshold_hours: f64,
    pub pass_threshold: f64,
    pub max_missing_pct: f64,
    pub max_anomaly_pct: f64,
    pub low_battery_warning: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut ranges = BTreeMap::new();
        ranges.insert("temperature".to_string(), RangeRule::new(-10.0, 60.0));
        ranges.insert("humidity".to_string(), RangeRule::new(0.0, 100.0));

        Self {
            target_offset: DEFAULT_TARGET_OFFSET.to_string(),
            reading_types: Vec::new(),
            identity_key: ReadingField::ALL.to_vec(),
            calibration: CalibrationTable::default(),
            ranges,
            battery_range: RangeRule::new(0.0, 100.0),
            z_score_threshold: 3.0,
            rolling_window_days: 7,
            expected_cadence_hours: 1.0,
            gap_threshold_hours: 1.0,
            pass_threshold: 70.0,
            max_missing_pct: 20.0,
            max_anomaly_pct: 10.0,
            low_battery_warning: 30.0,
        }
    }
}

/// Ceilings consumed by the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringThresholds {
    pub pass_threshold: f64,
    pub max_missing_pct: f64,
    pub max_anomaly_pct: f64,
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        EngineConfig::default().scoring_thresholds()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name}: {value} ({reason})")]
    InvalidThreshold {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
    #[error("invalid UTC offset '{0}'")]
    InvalidOffset(String),
    #[error("invalid range for {reading_type}: min={min} max={max}")]
    InvalidRange {
        reading_type: String,
        min: f64,
        max: f64,
    },
    #[error("invalid calibration for sensor {sensor_id}: multiplier={multiplier} offset={offset}")]
    InvalidCalibration {
        sensor_id: String,
        multiplier: f64,
        offset: f64,
    },
    #[error("identity key must name at least one field")]
    EmptyIdentityKey,
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: EngineConfig = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.offset()?;

        positive("z_score_threshold", self.z_score_threshold)?;
        hours("expected_cadence_hours", self.expected_cadence_hours)?;
        hours("gap_threshold_hours", self.gap_threshold_hours)?;
        if self.rolling_window_days == 0 {
            return Err(ConfigError::InvalidThreshold {
                name: "rolling_window_days",
                value: 0.0,
                reason: "must be at least one day",
            });
        }
        percentage("pass_threshold", self.pass_threshold)?;
        percentage("max_missing_pct", self.max_missing_pct)?;
        percentage("max_anomaly_pct", self.max_anomaly_pct)?;
        percentage("low_battery_warning", self.low_battery_warning)?;

        if self.identity_key.is_empty() {
            return Err(ConfigError::EmptyIdentityKey);
        }

        for (reading_type, rule) in &self.ranges {
            check_range(reading_type, rule)?;
        }
        check_range("battery_level", &self.battery_range)?;

        for (sensor_id, calibration) in self.calibration.iter() {
            if !calibration.multiplier.is_finite() || !calibration.offset.is_finite() {
                return Err(ConfigError::InvalidCalibration {
                    sensor_id: sensor_id.to_string(),
                    multiplier: calibration.multiplier,
                    offset: calibration.offset,
                });
            }
        }

        Ok(())
    }

    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        parse_utc_offset(&self.target_offset)
    }

    pub fn scoring_thresholds(&self) -> ScoringThresholds {
        ScoringThresholds {
            pass_threshold: self.pass_threshold,
            max_missing_pct: self.max_missing_pct,
            max_anomaly_pct: self.max_anomaly_pct,
        }
    }

    /// Stable SHA-256 digest identifying this configuration in reports.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("target_offset:{};", self.target_offset));
        hasher.update("reading_types:");
        for reading_type in &self.reading_types {
            hasher.update(format!("{reading_type},"));
        }
        hasher.update(";identity_key:");
        for field in &self.identity_key {
            hasher.update(format!("{field},"));
        }
        hasher.update(";calibration:");
        for (sensor_id, calibration) in self.calibration.iter() {
            hasher.update(format!(
                "{sensor_id}={}x+{},",
                calibration.multiplier, calibration.offset
            ));
        }
        hasher.update(";ranges:");
        for (reading_type, rule) in &self.ranges {
            hasher.update(format!("{reading_type}=[{},{}],", rule.min, rule.max));
        }
        hasher.update(format!(
            ";battery:[{},{}];z:{};window:{};cadence:{};gap:{};pass:{};missing:{};anomaly:{};low_battery:{};",
            self.battery_range.min,
            self.battery_range.max,
            self.z_score_threshold,
            self.rolling_window_days,
            self.expected_cadence_hours,
            self.gap_threshold_hours,
            self.pass_threshold,
            self.max_missing_pct,
            self.max_anomaly_pct,
            self.low_battery_warning
        ));
        hex::encode(hasher.finalize())
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold {
            name,
            value,
            reason: "must be finite and > 0",
        })
    }
}

fn hours(name: &'static str, value: f64) -> Result<(), ConfigError> {
    positive(name, value)?;
    if value > MAX_SPAN_HOURS {
        return Err(ConfigError::InvalidThreshold {
            name,
            value,
            reason: "must not exceed one hundred years",
        });
    }
    Ok(())
}

fn percentage(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold {
            name,
            value,
            reason: "must be within [0, 100]",
        })
    }
}

fn check_range(reading_type: &str, rule: &RangeRule) -> Result<(), ConfigError> {
    if rule.min.is_finite() && rule.max.is_finite() && rule.min <= rule.max {
        Ok(())
    } else {
        Err(ConfigError::InvalidRange {
            reading_type: reading_type.to_string(),
            min: rule.min,
            max: rule.max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let cfg = EngineConfig::default();
        cfg.validate().expect("defaults must be valid");
        assert_eq!(cfg.offset().unwrap().local_minus_utc(), 5 * 3600 + 30 * 60);
        assert_eq!(cfg.identity_key.len(), 5);
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let cfg = EngineConfig::from_json_str(
            r#"{
                "z_score_threshold": 2.5,
                "calibration": {"S1": {"multiplier": 1.0, "offset": -0.5}},
                "ranges": {"soil_moisture": {"min": 0, "max": 60}}
            }"#,
        )
        .expect("valid config");

        assert_eq!(cfg.z_score_threshold, 2.5);
        assert_eq!(cfg.rolling_window_days, 7);
        assert!(cfg.calibration.resolve("S1").known);
        assert!(!cfg.ranges.contains_key("temperature"));
        assert_eq!(cfg.ranges.get("soil_moisture"), Some(&RangeRule::new(0.0, 60.0)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = EngineConfig::from_json_str(r#"{"z_score_threshold": 0}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidThreshold {
                name: "z_score_threshold",
                ..
            }
        ));

        let err = EngineConfig::from_json_str(r#"{"target_offset": "Mars/Olympus"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOffset(_)));

        let err =
            EngineConfig::from_json_str(r#"{"ranges": {"humidity": {"min": 90, "max": 10}}}"#)
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRange { .. }));

        let err = EngineConfig::from_json_str(r#"{"identity_key": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyIdentityKey));

        let err = EngineConfig::from_json_str(r#"{"rolling_window_days": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { .. }));

        let err = EngineConfig::from_json_str(r#"{"gap_threshold_hours": 1e16}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidThreshold {
                name: "gap_threshold_hours",
                ..
            }
        ));

        let err = EngineConfig::from_json_str(r#"{"expected_cadence_hours": 1e16}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidThreshold {
                name: "expected_cadence_hours",
                ..
            }
        ));

        let cfg = EngineConfig::from_json_str(&format!(
            r#"{{"expected_cadence_hours": {MAX_SPAN_HOURS}}}"#
        ))
        .expect("the longest allowed cadence is valid");
        assert_eq!(cfg.expected_cadence_hours, MAX_SPAN_HOURS);

        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_missing_pct": 5.0, "target_offset": "UTC"}}"#).unwrap();

        let cfg = EngineConfig::load(file.path()).expect("config loads");
        assert_eq!(cfg.max_missing_pct, 5.0);
        assert_eq!(cfg.offset().unwrap().local_minus_utc(), 0);

        let missing = EngineConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = EngineConfig::default();
        let b = EngineConfig::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let changed = EngineConfig {
            z_score_threshold: 2.0,
            ..EngineConfig::default()
        };
        assert_ne!(a.fingerprint(), changed.fingerprint());
    }
}
