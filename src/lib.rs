//! Sensor data quality and enrichment engine.
//!
//! Takes one extract of periodic sensor readings through:
//! - cleaning: dedupe, drop unusable rows, impute battery levels
//! - per-sensor linear calibration
//! - timestamp normalization with daily and trailing rolling averages
//! - statistical and range anomaly flags
//!
//! and produces a quality report with per-type metrics, sensor coverage,
//! time-gap analysis and a pass/fail score.

mod anomaly;
mod batch;
mod calibration;
mod cleaner;
mod config;
mod engine;
mod error;
mod gaps;
mod observability;
mod profiler;
mod report;
mod scorer;
mod temporal;

pub use anomaly::{AnomalyDetector, AnomalyStats, GroupStats, TypeAnomalies};
pub use batch::{
    EnrichedReading, RawBatch, RawReading, Reading, ReadingField, REQUIRED_COLUMNS,
};
pub use calibration::{
    calibrate, Calibration, CalibrationStats, CalibrationTable, ResolvedCalibration,
};
pub use cleaner::{clean, CleaningStats, TypeCleaning};
pub use config::{
    ConfigError, EngineConfig, RangeRule, ScoringThresholds, DEFAULT_TARGET_OFFSET, MAX_SPAN_HOURS,
};
pub use engine::{Engine, EngineOutput, TransformationSummary};
pub use error::{EngineError, RowError, RowErrorKind};
pub use gaps::{detect_gaps, GapAnalysis, GapRun, GroupGaps};
pub use observability::{
    init_logging, log_engine_finish, log_engine_start, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use profiler::{percentage, profile, OverallStats, QualityProfile, SensorCoverage, TypeMetrics};
pub use report::{
    build_report, write_report_csv, Issue, IssueKind, QualityReport, ReportError,
    ReportThresholds, Severity,
};
pub use scorer::{
    breaches, penalties, penalty_score, score, BreachMetric, Penalties, QualityScore,
    ThresholdBreach,
};
pub use temporal::{enrich, parse_timestamp, parse_utc_offset, TemporalStats};
