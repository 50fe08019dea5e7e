//! Linear per-sensor correction of raw values.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::batch::Reading;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(default = "unit_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub offset: f64,
}

impl Calibration {
    pub const IDENTITY: Calibration = Calibration {
        multiplier: 1.0,
        offset: 0.0,
    };

    pub fn new(multiplier: f64, offset: f64) -> Self {
        Self { multiplier, offset }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.multiplier + self.offset
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::IDENTITY
    }
}

fn unit_multiplier() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedCalibration {
    pub calibration: Calibration,
    pub known: bool,
}

/// `sensor_id -> Calibration`; absent sensors resolve to identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationTable {
    entries: BTreeMap<String, Calibration>,
}

impl CalibrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sensor_id: &str, multiplier: f64, offset: f64) -> Self {
        self.insert(sensor_id, Calibration::new(multiplier, offset));
        self
    }

    pub fn insert(&mut self, sensor_id: &str, calibration: Calibration) {
        self.entries.insert(sensor_id.to_string(), calibration);
    }

    pub fn resolve(&self, sensor_id: &str) -> ResolvedCalibration {
        match self.entries.get(sensor_id) {
            Some(calibration) => ResolvedCalibration {
                calibration: *calibration,
                known: true,
            },
            None => ResolvedCalibration {
                calibration: Calibration::IDENTITY,
                known: false,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Calibration)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationStats {
    pub records_calibrated: u64,
    pub unknown_sensor_rows: u64,
    pub uncalibrated_sensors: BTreeSet<String>,
}

pub fn calibrate(rows: Vec<Reading>, table: &CalibrationTable) -> (Vec<Reading>, CalibrationStats) {
    let mut stats = CalibrationStats::default();

    let calibrated: Vec<Reading> = rows
        .into_iter()
        .map(|mut row| {
            let resolved = table.resolve(&row.sensor_id);
            if resolved.known {
                stats.records_calibrated += 1;
            } else {
                stats.unknown_sensor_rows += 1;
                if !stats.uncalibrated_sensors.contains(&row.sensor_id) {
                    stats.uncalibrated_sensors.insert(row.sensor_id.clone());
                }
            }
            row.value = resolved.calibration.apply(row.value);
            row
        })
        .collect();

    if stats.unknown_sensor_rows > 0 {
        warn!(
            component = "calibration",
            event = "calibration.identity_fallback",
            unknown_sensor_rows = stats.unknown_sensor_rows,
            sensors = ?stats.uncalibrated_sensors
        );
    }

    info!(
        component = "calibration",
        event = "calibration.finish",
        records_calibrated = stats.records_calibrated,
        unknown_sensor_rows = stats.unknown_sensor_rows
    );

    (calibrated, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(sensor_id: &str, value: f64) -> Reading {
        Reading::new(sensor_id, "2024-03-01T00:00:00Z", "temperature", value, 80.0)
    }

    #[test]
    fn offset_only_calibration_is_exact() {
        let table = CalibrationTable::new().with("S1", 1.0, -0.5);
        let (rows, stats) = calibrate(vec![reading("S1", 20.5)], &table);

        assert_eq!(rows[0].value, 20.0);
        assert_eq!(stats.records_calibrated, 1);
        assert_eq!(stats.unknown_sensor_rows, 0);
    }

    #[test]
    fn unknown_sensor_keeps_raw_value_and_is_counted() {
        let table = CalibrationTable::new().with("S1", 2.0, 1.0);
        let input = vec![reading("S1", 3.0), reading("S9", 3.0), reading("S9", 4.0)];
        let (rows, stats) = calibrate(input, &table);

        assert_eq!(rows[0].value, 7.0);
        assert_eq!(rows[1].value, 3.0);
        assert_eq!(rows[2].value, 4.0);
        assert_eq!(stats.unknown_sensor_rows, 2);
        assert_eq!(
            stats.uncalibrated_sensors.iter().collect::<Vec<_>>(),
            vec!["S9"]
        );
    }

    #[test]
    fn calibration_is_independent_of_row_order() {
        let table = CalibrationTable::new()
            .with("S1", 1.1, 0.2)
            .with("S2", 0.9, -1.0);
        let forward = vec![reading("S1", 10.0), reading("S2", 12.0)];
        let backward: Vec<Reading> = forward.iter().rev().cloned().collect();

        let (a, _) = calibrate(forward, &table);
        let (mut b, _) = calibrate(backward, &table);
        b.reverse();
        assert_eq!(a, b);
    }

    #[test]
    fn table_deserializes_with_partial_entries() {
        let table: CalibrationTable =
            serde_json::from_str(r#"{"S1": {"offset": -0.5}, "S2": {"multiplier": 2.0}}"#)
                .unwrap();
        assert_eq!(table.resolve("S1").calibration, Calibration::new(1.0, -0.5));
        assert_eq!(table.resolve("S2").calibration, Calibration::new(2.0, 0.0));
        assert!(!table.resolve("S3").known);
    }
}
