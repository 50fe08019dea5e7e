//! Statistical and range anomaly flags merged into `anomalous_reading`.
//!
//! Battery readings outside `battery_range` are counted but never flag a
//! row.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::batch::EnrichedReading;
use crate::config::{EngineConfig, RangeRule};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAnomalies {
    pub rows: u64,
    pub statistical: u64,
    pub range: u64,
    pub both: u64,
    pub anomalous: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyStats {
    pub statistical_flags: u64,
    pub range_flags: u64,
    pub both_flags: u64,
    pub anomalous_rows: u64,
    pub battery_out_of_range: u64,
    pub per_type: BTreeMap<String, TypeAnomalies>,
}

impl AnomalyStats {
    fn record(&mut self, reading_type: &str, statistical: bool, range: bool) {
        let entry = self.per_type.entry(reading_type.to_string()).or_default();
        entry.rows += 1;
        if statistical {
            self.statistical_flags += 1;
            entry.statistical += 1;
        }
        if range {
            self.range_flags += 1;
            entry.range += 1;
        }
        if statistical && range {
            self.both_flags += 1;
            entry.both += 1;
        }
        if statistical || range {
            self.anomalous_rows += 1;
            entry.anomalous += 1;
        }
    }
}

/// Mean and sample standard deviation of one (sensor, reading_type) group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupStats {
    pub mean: f64,
    pub std_dev: f64,
}

impl GroupStats {
    /// `None` when the group cannot support a z-score: fewer than two
    /// distinct values, or a degenerate deviation.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let first = *values.first()?;
        if values.iter().all(|v| *v == first) {
            return None;
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std_dev = variance.sqrt();
        if !std_dev.is_finite() || std_dev <= 0.0 {
            return None;
        }
        Some(Self { mean, std_dev })
    }

    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.mean).abs() / self.std_dev
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    z_score_threshold: f64,
    ranges: BTreeMap<String, RangeRule>,
    battery_range: RangeRule,
}

impl AnomalyDetector {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            z_score_threshold: cfg.z_score_threshold,
            ranges: cfg.ranges.clone(),
            battery_range: cfg.battery_range,
        }
    }

    pub fn is_range_violation(&self, reading_type: &str, value: f64) -> bool {
        self.ranges
            .get(reading_type)
            .map(|rule| !rule.contains(value))
            .unwrap_or(false)
    }

    /// Sets `anomalous_reading` on every row. Row order is preserved;
    /// groups are located by key, not position.
    pub fn detect(&self, mut rows: Vec<EnrichedReading>) -> (Vec<EnrichedReading>, AnomalyStats) {
        let mut groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
        for (idx, row) in rows.iter().enumerate() {
            groups
                .entry((row.sensor_id.clone(), row.reading_type.clone()))
                .or_default()
                .push(idx);
        }

        let mut statistical = vec![false; rows.len()];
        for ((sensor_id, reading_type), members) in &groups {
            let values: Vec<f64> = members.iter().map(|idx| rows[*idx].value).collect();
            let Some(group_stats) = GroupStats::from_values(&values) else {
                debug!(
                    component = "anomaly",
                    event = "anomaly.zscore_skipped",
                    sensor_id = %sensor_id,
                    reading_type = %reading_type,
                    rows = members.len()
                );
                continue;
            };
            for idx in members {
                statistical[*idx] = group_stats.z_score(rows[*idx].value) > self.z_score_threshold;
            }
        }

        let mut stats = AnomalyStats::default();
        for (idx, row) in rows.iter_mut().enumerate() {
            let range = self.is_range_violation(&row.reading_type, row.value);
            stats.record(&row.reading_type, statistical[idx], range);
            row.anomalous_reading = statistical[idx] || range;

            if !self.battery_range.contains(row.battery_level) {
                stats.battery_out_of_range += 1;
            }
        }

        if stats.battery_out_of_range > 0 {
            warn!(
                component = "anomaly",
                event = "anomaly.battery_out_of_range",
                rows = stats.battery_out_of_range,
                min = self.battery_range.min,
                max = self.battery_range.max
            );
        }

        info!(
            component = "anomaly",
            event = "anomaly.finish",
            rows = rows.len(),
            groups = groups.len(),
            statistical_flags = stats.statistical_flags,
            range_flags = stats.range_flags,
            both_flags = stats.both_flags,
            anomalous_rows = stats.anomalous_rows
        );

        (rows, stats)
    }
}
