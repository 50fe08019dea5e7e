//! Descriptive statistics over the enriched batch. Read-only.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::anomaly::AnomalyStats;
use crate::batch::EnrichedReading;
use crate::cleaner::CleaningStats;
use crate::temporal::TemporalStats;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeMetrics {
    /// Rows of this type handed to the cleaner.
    pub input_records: u64,
    /// Rows of this type in the enriched batch.
    pub total_records: u64,
    /// Dropped or imputed rows, against `input_records`.
    pub missing_count: u64,
    pub missing_pct: f64,
    pub anomalous_count: u64,
    pub anomaly_pct: f64,
    pub statistical_pct: f64,
    pub range_pct: f64,
    /// Share of the batch's sensors reporting this type.
    pub coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorCoverage {
    pub reading_types: u64,
    pub total_readings: u64,
    pub avg_battery: f64,
    pub first_reading: DateTime<FixedOffset>,
    pub last_reading: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallStats {
    pub input_records: u64,
    pub total_records: u64,
    pub unique_sensors: u64,
    pub unique_reading_types: u64,
    pub missing_pct: f64,
    pub anomaly_pct: f64,
    pub avg_value: Option<f64>,
    pub avg_battery: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub metrics: BTreeMap<String, TypeMetrics>,
    pub sensor_coverage: BTreeMap<String, SensorCoverage>,
    pub overall: OverallStats,
}

/// `part / whole` in percent, clamped to [0, 100]; zero when `whole` is zero.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 100.0).clamp(0.0, 100.0)
}

struct SensorAccumulator {
    reading_types: BTreeSet<String>,
    total_readings: u64,
    battery_sum: f64,
    first_reading: DateTime<FixedOffset>,
    last_reading: DateTime<FixedOffset>,
}

pub fn profile(
    rows: &[EnrichedReading],
    cleaning: &CleaningStats,
    temporal: &TemporalStats,
    anomalies: &AnomalyStats,
) -> QualityProfile {
    let mut sensors: BTreeMap<&str, SensorAccumulator> = BTreeMap::new();
    let mut type_rows: BTreeMap<&str, u64> = BTreeMap::new();
    let mut type_sensors: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut value_sum = 0.0;
    let mut battery_sum = 0.0;

    for row in rows {
        value_sum += row.value;
        battery_sum += row.battery_level;
        *type_rows.entry(row.reading_type.as_str()).or_insert(0) += 1;
        type_sensors
            .entry(row.reading_type.as_str())
            .or_default()
            .insert(row.sensor_id.as_str());

        let acc = sensors
            .entry(row.sensor_id.as_str())
            .or_insert_with(|| SensorAccumulator {
                reading_types: BTreeSet::new(),
                total_readings: 0,
                battery_sum: 0.0,
                first_reading: row.timestamp,
                last_reading: row.timestamp,
            });
        if !acc.reading_types.contains(&row.reading_type) {
            acc.reading_types.insert(row.reading_type.clone());
        }
        acc.total_readings += 1;
        acc.battery_sum += row.battery_level;
        acc.first_reading = acc.first_reading.min(row.timestamp);
        acc.last_reading = acc.last_reading.max(row.timestamp);
    }

    let unique_sensors = sensors.len() as u64;

    let mut reading_types: BTreeSet<&str> = cleaning.per_type.keys().map(String::as_str).collect();
    reading_types.extend(type_rows.keys().copied());

    let mut metrics = BTreeMap::new();
    for reading_type in reading_types {
        let cleaned = cleaning.per_type.get(reading_type).cloned().unwrap_or_default();
        let flagged = anomalies.per_type.get(reading_type).cloned().unwrap_or_default();
        let malformed = temporal.dropped_by_type.get(reading_type).copied().unwrap_or(0);
        let total_records = type_rows.get(reading_type).copied().unwrap_or(0);
        let missing_count = cleaned.dropped + cleaned.imputed + malformed;
        let reporting_sensors = type_sensors.get(reading_type).map_or(0, |s| s.len() as u64);

        metrics.insert(
            reading_type.to_string(),
            TypeMetrics {
                input_records: cleaned.input_rows,
                total_records,
                missing_count,
                missing_pct: percentage(missing_count, cleaned.input_rows),
                anomalous_count: flagged.anomalous,
                anomaly_pct: percentage(flagged.anomalous, total_records),
                statistical_pct: percentage(flagged.statistical, total_records),
                range_pct: percentage(flagged.range, total_records),
                coverage: percentage(reporting_sensors, unique_sensors),
            },
        );
    }

    let sensor_coverage = sensors
        .into_iter()
        .map(|(sensor_id, acc)| {
            (
                sensor_id.to_string(),
                SensorCoverage {
                    reading_types: acc.reading_types.len() as u64,
                    total_readings: acc.total_readings,
                    avg_battery: acc.battery_sum / acc.total_readings as f64,
                    first_reading: acc.first_reading,
                    last_reading: acc.last_reading,
                },
            )
        })
        .collect();

    let total_records = rows.len() as u64;
    let overall_missing =
        cleaning.rows_dropped_missing + cleaning.values_imputed + temporal.malformed_timestamps;
    let overall = OverallStats {
        input_records: cleaning.input_rows,
        total_records,
        unique_sensors,
        unique_reading_types: type_rows.len() as u64,
        missing_pct: percentage(overall_missing, cleaning.input_rows),
        anomaly_pct: percentage(anomalies.anomalous_rows, total_records),
        avg_value: (total_records > 0).then(|| value_sum / total_records as f64),
        avg_battery: (total_records > 0).then(|| battery_sum / total_records as f64),
    };

    info!(
        component = "profiler",
        event = "profiler.finish",
        total_records = overall.total_records,
        unique_sensors = overall.unique_sensors,
        reading_types = metrics.len(),
        missing_pct = overall.missing_pct,
        anomaly_pct = overall.anomaly_pct
    );

    QualityProfile {
        metrics,
        sensor_coverage,
        overall,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::TypeAnomalies;
    use crate::batch::Reading;
    use crate::cleaner::TypeCleaning;
    use crate::temporal::{enrich, parse_utc_offset};

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "actual={actual} expected={expected}"
        );
    }

    fn rows() -> Vec<EnrichedReading> {
        let input = vec![
            Reading::new("S1", "2024-03-01T00:00:00Z", "temperature", 20.0, 90.0),
            Reading::new("S1", "2024-03-01T01:00:00Z", "temperature", 22.0, 80.0),
            Reading::new("S1", "2024-03-01T00:00:00Z", "humidity", 40.0, 90.0),
            Reading::new("S2", "2024-03-01T03:00:00Z", "temperature", 30.0, 20.0),
        ];
        let (rows, _) = enrich(input, parse_utc_offset("UTC").unwrap(), 7);
        rows
    }

    #[test]
    fn percentage_handles_empty_denominator() {
        assert_eq!(percentage(3, 0), 0.0);
        assert_close(percentage(1, 4), 25.0);
        assert_eq!(percentage(9, 4), 100.0);
    }

    #[test]
    fn missing_counts_use_pre_cleaner_denominator() {
        let mut cleaning = CleaningStats {
            input_rows: 6,
            rows_dropped_missing: 1,
            values_imputed: 1,
            ..CleaningStats::default()
        };
        cleaning.per_type.insert(
            "temperature".to_string(),
            TypeCleaning {
                input_rows: 4,
                dropped: 1,
                imputed: 1,
            },
        );
        cleaning.per_type.insert(
            "humidity".to_string(),
            TypeCleaning {
                input_rows: 2,
                dropped: 0,
                imputed: 0,
            },
        );
        let temporal = TemporalStats {
            malformed_timestamps: 1,
            dropped_by_type: BTreeMap::from([("humidity".to_string(), 1)]),
            ..TemporalStats::default()
        };

        let profile = profile(&rows(), &cleaning, &temporal, &AnomalyStats::default());

        let temperature = &profile.metrics["temperature"];
        assert_eq!(temperature.input_records, 4);
        assert_eq!(temperature.total_records, 3);
        assert_eq!(temperature.missing_count, 2);
        assert_close(temperature.missing_pct, 50.0);
        assert_close(temperature.coverage, 100.0);

        let humidity = &profile.metrics["humidity"];
        assert_eq!(humidity.missing_count, 1);
        assert_close(humidity.missing_pct, 50.0);
        assert_close(humidity.coverage, 50.0);

        assert_close(profile.overall.missing_pct, 50.0);
        assert_eq!(profile.overall.unique_sensors, 2);
        assert_eq!(profile.overall.unique_reading_types, 2);
    }

    #[test]
    fn anomaly_rates_are_reported_per_method_and_merged() {
        let mut anomalies = AnomalyStats {
            statistical_flags: 1,
            range_flags: 1,
            both_flags: 1,
            anomalous_rows: 1,
            ..AnomalyStats::default()
        };
        anomalies.per_type.insert(
            "temperature".to_string(),
            TypeAnomalies {
                rows: 3,
                statistical: 1,
                range: 1,
                both: 1,
                anomalous: 1,
            },
        );

        let profile = profile(
            &rows(),
            &CleaningStats::default(),
            &TemporalStats::default(),
            &anomalies,
        );
        let temperature = &profile.metrics["temperature"];
        assert_close(temperature.anomaly_pct, 100.0 / 3.0);
        assert_close(temperature.statistical_pct, 100.0 / 3.0);
        assert_close(temperature.range_pct, 100.0 / 3.0);
        assert_close(profile.overall.anomaly_pct, 25.0);
    }

    #[test]
    fn sensor_coverage_tracks_span_and_battery() {
        let profile = profile(
            &rows(),
            &CleaningStats::default(),
            &TemporalStats::default(),
            &AnomalyStats::default(),
        );

        let s1 = &profile.sensor_coverage["S1"];
        assert_eq!(s1.reading_types, 2);
        assert_eq!(s1.total_readings, 3);
        assert_close(s1.avg_battery, 260.0 / 3.0);
        assert_eq!(s1.first_reading.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert_eq!(s1.last_reading.to_rfc3339(), "2024-03-01T01:00:00+00:00");

        let s2 = &profile.sensor_coverage["S2"];
        assert_close(s2.avg_battery, 20.0);
        assert_close(profile.overall.avg_value.unwrap(), 28.0);
    }

    #[test]
    fn empty_batch_profiles_to_zeroes() {
        let profile = profile(
            &[],
            &CleaningStats::default(),
            &TemporalStats::default(),
            &AnomalyStats::default(),
        );
        assert!(profile.metrics.is_empty());
        assert_eq!(profile.overall.total_records, 0);
        assert_eq!(profile.overall.missing_pct, 0.0);
        assert_eq!(profile.overall.avg_battery, None);
    }
}
