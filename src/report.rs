//! Quality report assembly and flat CSV rendering.

use std::collections::BTreeMap;
use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::engine::TransformationSummary;
use crate::error::RowErrorKind;
use crate::gaps::GapAnalysis;
use crate::profiler::{percentage, OverallStats, QualityProfile, SensorCoverage, TypeMetrics};
use crate::scorer::{BreachMetric, QualityScore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DuplicatesRemoved,
    RowsDropped,
    BatteryImputed,
    UncalibratedSensors,
    RangeViolations,
    StatisticalOutliers,
    BatteryOutOfRange,
    MissingThresholdExceeded,
    AnomalyThresholdExceeded,
    SignificantGap,
    LowBattery,
}

impl IssueKind {
    pub fn severity(self) -> Severity {
        match self {
            Self::DuplicatesRemoved | Self::RowsDropped | Self::BatteryImputed => Severity::Info,
            Self::MissingThresholdExceeded | Self::AnomalyThresholdExceeded => Severity::Fail,
            _ => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Fail,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub reading_type: Option<String>,
    pub sensor_id: Option<String>,
    pub count: u64,
    pub percentage: Option<f64>,
    pub message: String,
}

impl Issue {
    fn new(kind: IssueKind, count: u64, percentage: Option<f64>, message: String) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            reading_type: None,
            sensor_id: None,
            count,
            percentage,
            message,
        }
    }

    fn for_type(mut self, reading_type: &str) -> Self {
        self.reading_type = Some(reading_type.to_string());
        self
    }

    fn for_sensor(mut self, sensor_id: &str) -> Self {
        self.sensor_id = Some(sensor_id.to_string());
        self
    }
}

/// Limits the report was judged against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportThresholds {
    pub pass_threshold: f64,
    pub max_missing_pct: f64,
    pub max_anomaly_pct: f64,
    pub gap_threshold_hours: f64,
    pub low_battery_warning: f64,
}

impl ReportThresholds {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            pass_threshold: cfg.pass_threshold,
            max_missing_pct: cfg.max_missing_pct,
            max_anomaly_pct: cfg.max_anomaly_pct,
            gap_threshold_hours: cfg.gap_threshold_hours,
            low_battery_warning: cfg.low_battery_warning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub validation_timestamp: DateTime<Utc>,
    pub config_fingerprint: String,
    pub total_records: u64,
    pub issues: Vec<Issue>,
    pub quality_score: f64,
    pub passed: bool,
    pub score_breakdown: QualityScore,
    pub thresholds: ReportThresholds,
    pub metrics: BTreeMap<String, TypeMetrics>,
    pub sensor_coverage: BTreeMap<String, SensorCoverage>,
    pub overall: OverallStats,
    pub gaps: GapAnalysis,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QualityReport {
    pub fn to_json_pretty(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |issue| issue.kind == kind)
    }
}

pub fn build_report(
    validation_timestamp: DateTime<Utc>,
    cfg: &EngineConfig,
    config_fingerprint: &str,
    summary: &TransformationSummary,
    profile: QualityProfile,
    gaps: GapAnalysis,
    score: QualityScore,
) -> QualityReport {
    let issues = collect_issues(cfg, summary, &profile, &gaps, &score);
    QualityReport {
        validation_timestamp,
        config_fingerprint: config_fingerprint.to_string(),
        total_records: profile.overall.total_records,
        issues,
        quality_score: score.score,
        passed: score.passed,
        score_breakdown: score,
        thresholds: ReportThresholds::from_config(cfg),
        metrics: profile.metrics,
        sensor_coverage: profile.sensor_coverage,
        overall: profile.overall,
        gaps,
    }
}

fn collect_issues(
    cfg: &EngineConfig,
    summary: &TransformationSummary,
    profile: &QualityProfile,
    gaps: &GapAnalysis,
    score: &QualityScore,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    let cleaning = &summary.cleaning;
    let input_rows = cleaning.input_rows;

    if cleaning.duplicates_removed > 0 {
        issues.push(Issue::new(
            IssueKind::DuplicatesRemoved,
            cleaning.duplicates_removed,
            Some(percentage(cleaning.duplicates_removed, input_rows)),
            format!("{} duplicate rows removed", cleaning.duplicates_removed),
        ));
    }

    let mut drops = cleaning.drops_by_kind.clone();
    if summary.temporal.malformed_timestamps > 0 {
        *drops.entry(RowErrorKind::MalformedTimestamp).or_insert(0) +=
            summary.temporal.malformed_timestamps;
    }
    for (kind, count) in drops {
        issues.push(Issue::new(
            IssueKind::RowsDropped,
            count,
            Some(percentage(count, input_rows)),
            format!("{count} rows dropped: {}", kind.as_str()),
        ));
    }

    if cleaning.values_imputed > 0 {
        issues.push(Issue::new(
            IssueKind::BatteryImputed,
            cleaning.values_imputed,
            Some(percentage(cleaning.values_imputed, input_rows)),
            format!("{} battery levels imputed from medians", cleaning.values_imputed),
        ));
    }

    let calibration = &summary.calibration;
    if calibration.unknown_sensor_rows > 0 {
        let sensors: Vec<&str> = calibration
            .uncalibrated_sensors
            .iter()
            .map(String::as_str)
            .collect();
        issues.push(Issue::new(
            IssueKind::UncalibratedSensors,
            calibration.unknown_sensor_rows,
            Some(percentage(
                calibration.unknown_sensor_rows,
                calibration.unknown_sensor_rows + calibration.records_calibrated,
            )),
            format!(
                "{} rows used identity calibration (sensors: {})",
                calibration.unknown_sensor_rows,
                sensors.join(", ")
            ),
        ));
    }

    let anomalies = &summary.anomalies;
    for (reading_type, counts) in &anomalies.per_type {
        if counts.range > 0 {
            issues.push(
                Issue::new(
                    IssueKind::RangeViolations,
                    counts.range,
                    Some(percentage(counts.range, counts.rows)),
                    format!("{} {reading_type} readings outside the configured range", counts.range),
                )
                .for_type(reading_type),
            );
        }
    }
    for (reading_type, counts) in &anomalies.per_type {
        if counts.statistical > 0 {
            issues.push(
                Issue::new(
                    IssueKind::StatisticalOutliers,
                    counts.statistical,
                    Some(percentage(counts.statistical, counts.rows)),
                    format!(
                        "{} {reading_type} readings beyond z-score {}",
                        counts.statistical, cfg.z_score_threshold
                    ),
                )
                .for_type(reading_type),
            );
        }
    }

    if anomalies.battery_out_of_range > 0 {
        issues.push(Issue::new(
            IssueKind::BatteryOutOfRange,
            anomalies.battery_out_of_range,
            Some(percentage(
                anomalies.battery_out_of_range,
                profile.overall.total_records,
            )),
            format!(
                "{} battery levels outside [{}, {}]",
                anomalies.battery_out_of_range, cfg.battery_range.min, cfg.battery_range.max
            ),
        ));
    }

    for metric in [BreachMetric::MissingPct, BreachMetric::AnomalyPct] {
        for breach in score.breaches.iter().filter(|b| b.metric == metric) {
            let (kind, label) = match metric {
                BreachMetric::MissingPct => (IssueKind::MissingThresholdExceeded, "missing values"),
                BreachMetric::AnomalyPct => (IssueKind::AnomalyThresholdExceeded, "anomalies"),
            };
            let scope = breach.reading_type.as_deref().unwrap_or("overall");
            let count = match (metric, breach.reading_type.as_deref()) {
                (BreachMetric::MissingPct, Some(t)) => {
                    profile.metrics.get(t).map_or(0, |m| m.missing_count)
                }
                (BreachMetric::AnomalyPct, Some(t)) => {
                    profile.metrics.get(t).map_or(0, |m| m.anomalous_count)
                }
                (BreachMetric::MissingPct, None) => {
                    cleaning.rows_dropped_missing
                        + cleaning.values_imputed
                        + summary.temporal.malformed_timestamps
                }
                (BreachMetric::AnomalyPct, None) => anomalies.anomalous_rows,
            };
            let mut issue = Issue::new(
                kind,
                count,
                Some(breach.value),
                format!(
                    "Quality threshold exceeded: {scope} has {:.2}% {label} (threshold: {}%)",
                    breach.value, breach.ceiling
                ),
            );
            issue.reading_type = breach.reading_type.clone();
            issues.push(issue);
        }
    }

    for group in gaps.groups.iter().filter(|g| g.significant_runs > 0) {
        let span = match (group.largest_gap_start, group.largest_gap_end) {
            (Some(start), Some(end)) => format!(
                "; largest {}h from {} to {}",
                group.largest_gap_hours,
                start.to_rfc3339(),
                end.to_rfc3339()
            ),
            _ => String::new(),
        };
        issues.push(
            Issue::new(
                IssueKind::SignificantGap,
                group.significant_runs,
                Some(percentage(group.missing_slots, group.expected_slots)),
                format!(
                    "{} gaps over {}h for {}/{}{span}",
                    group.significant_runs,
                    cfg.gap_threshold_hours,
                    group.sensor_id,
                    group.reading_type
                ),
            )
            .for_sensor(&group.sensor_id)
            .for_type(&group.reading_type),
        );
    }

    for (sensor_id, coverage) in &profile.sensor_coverage {
        if coverage.avg_battery < cfg.low_battery_warning {
            issues.push(
                Issue::new(
                    IssueKind::LowBattery,
                    coverage.total_readings,
                    Some(coverage.avg_battery),
                    format!(
                        "Sensor {sensor_id} average battery {:.1}% below {}%",
                        coverage.avg_battery, cfg.low_battery_warning
                    ),
                )
                .for_sensor(sensor_id),
            );
        }
    }

    issues
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    category: &'a str,
    metric: String,
    value: Option<f64>,
    threshold: Option<f64>,
    status: &'a str,
    details: String,
}

fn pass_fail(ok: bool) -> &'static str {
    if ok {
        "pass"
    } else {
        "fail"
    }
}

/// Writes the flat `category,metric,value,threshold,status,details` table.
pub fn write_report_csv<W: io::Write>(report: &QualityReport, out: W) -> Result<(), ReportError> {
    let thresholds = &report.thresholds;
    let mut writer = csv::Writer::from_writer(out);

    writer.serialize(CsvRow {
        category: "overall",
        metric: "total_records".to_string(),
        value: Some(report.total_records as f64),
        threshold: None,
        status: "info",
        details: format!(
            "{} of {} input records retained",
            report.overall.total_records, report.overall.input_records
        ),
    })?;
    writer.serialize(CsvRow {
        category: "overall",
        metric: "unique_sensors".to_string(),
        value: Some(report.overall.unique_sensors as f64),
        threshold: None,
        status: "info",
        details: format!("Unique sensors: {}", report.overall.unique_sensors),
    })?;
    writer.serialize(CsvRow {
        category: "overall",
        metric: "quality_score".to_string(),
        value: Some(report.quality_score),
        threshold: Some(thresholds.pass_threshold),
        status: pass_fail(report.passed),
        details: format!(
            "penalties: missing {:.2}, anomaly {:.2}, gaps {:.2}",
            report.score_breakdown.missing_penalty,
            report.score_breakdown.anomaly_penalty,
            report.score_breakdown.gap_penalty
        ),
    })?;

    for (reading_type, metrics) in &report.metrics {
        writer.serialize(CsvRow {
            category: "missing_values",
            metric: format!("{reading_type}_missing_percentage"),
            value: Some(metrics.missing_pct),
            threshold: Some(thresholds.max_missing_pct),
            status: pass_fail(metrics.missing_pct <= thresholds.max_missing_pct),
            details: format!(
                "{} out of {} records",
                metrics.missing_count, metrics.input_records
            ),
        })?;
    }

    for (reading_type, metrics) in &report.metrics {
        writer.serialize(CsvRow {
            category: "anomalies",
            metric: format!("{reading_type}_anomaly_percentage"),
            value: Some(metrics.anomaly_pct),
            threshold: Some(thresholds.max_anomaly_pct),
            status: pass_fail(metrics.anomaly_pct <= thresholds.max_anomaly_pct),
            details: format!(
                "{} out of {} records (statistical {:.2}%, range {:.2}%)",
                metrics.anomalous_count,
                metrics.total_records,
                metrics.statistical_pct,
                metrics.range_pct
            ),
        })?;
    }

    let missing_hours = report
        .gaps
        .groups
        .iter()
        .fold(0.0, |acc, group| acc + group.missing_hours);
    writer.serialize(CsvRow {
        category: "time_gaps",
        metric: "total_missing_hours".to_string(),
        value: Some(missing_hours),
        threshold: Some(thresholds.gap_threshold_hours),
        status: if report.gaps.significant_gap_count > 0 {
            "warning"
        } else {
            "pass"
        },
        details: format!(
            "{} missing slots, {} significant gaps",
            report.gaps.total_missing_slots, report.gaps.significant_gap_count
        ),
    })?;

    for (sensor_id, coverage) in &report.sensor_coverage {
        writer.serialize(CsvRow {
            category: "sensor_coverage",
            metric: format!("{sensor_id}_battery_level"),
            value: Some(coverage.avg_battery),
            threshold: Some(thresholds.low_battery_warning),
            status: if coverage.avg_battery < thresholds.low_battery_warning {
                "warning"
            } else {
                "pass"
            },
            details: format!(
                "Average battery: {:.1}%, {} readings",
                coverage.avg_battery, coverage.total_readings
            ),
        })?;
    }

    for (idx, issue) in report.issues.iter().enumerate() {
        writer.serialize(CsvRow {
            category: "issues",
            metric: format!("issue_{}", idx + 1),
            value: Some(issue.count as f64),
            threshold: None,
            status: issue.severity.as_str(),
            details: issue.message.clone(),
        })?;
    }

    writer.flush()?;
    Ok(())
}
