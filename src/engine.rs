//! End-to-end run: clean, calibrate, enrich, flag, then profile and score.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::anomaly::{AnomalyDetector, AnomalyStats};
use crate::batch::{EnrichedReading, RawBatch};
use crate::calibration::{calibrate, CalibrationStats};
use crate::cleaner::{clean, CleaningStats};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::gaps::detect_gaps;
use crate::observability::{log_engine_finish, log_engine_start};
use crate::profiler::profile;
use crate::report::{build_report, QualityReport};
use crate::scorer::score;
use crate::temporal::{enrich, TemporalStats};

/// Per-stage counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformationSummary {
    pub cleaning: CleaningStats,
    pub calibration: CalibrationStats,
    pub temporal: TemporalStats,
    pub anomalies: AnomalyStats,
}

impl TransformationSummary {
    pub fn input_rows(&self) -> u64 {
        self.cleaning.input_rows
    }

    pub fn output_rows(&self) -> u64 {
        self.temporal.output_rows
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    pub batch: Vec<EnrichedReading>,
    pub report: QualityReport,
    pub summary: TransformationSummary,
}

#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    offset: FixedOffset,
    fingerprint: String,
    detector: AnomalyDetector,
}

impl Engine {
    /// Validates `config` up front; a bad config never reaches a row.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let offset = config.offset()?;
        let fingerprint = config.fingerprint();
        let detector = AnomalyDetector::new(&config);
        Ok(Self {
            config,
            offset,
            fingerprint,
            detector,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn run(&self, batch: RawBatch) -> Result<EngineOutput, EngineError> {
        self.run_at(batch, Utc::now())
    }

    /// Like [`Engine::run`], stamping the report with `validated_at`.
    pub fn run_at(
        &self,
        batch: RawBatch,
        validated_at: DateTime<Utc>,
    ) -> Result<EngineOutput, EngineError> {
        if let Err(err) = batch.check_schema() {
            warn!(
                component = "engine",
                event = "engine.structural_error",
                details = %err
            );
            return Err(err);
        }

        let cfg = &self.config;
        log_engine_start(cfg, &self.fingerprint, batch.len());

        let (cleaned, cleaning) = clean(batch.rows, cfg);
        let (calibrated, calibration) = calibrate(cleaned, &cfg.calibration);
        let (enriched, temporal) = enrich(calibrated, self.offset, cfg.rolling_window_days);
        let (flagged, anomalies) = self.detector.detect(enriched);

        let summary = TransformationSummary {
            cleaning,
            calibration,
            temporal,
            anomalies,
        };

        let quality_profile = profile(
            &flagged,
            &summary.cleaning,
            &summary.temporal,
            &summary.anomalies,
        );
        let gaps = detect_gaps(
            &flagged,
            cfg.expected_cadence_hours,
            cfg.gap_threshold_hours,
        );
        let quality_score = score(&quality_profile, &gaps, &cfg.scoring_thresholds());
        let report = build_report(
            validated_at,
            cfg,
            &self.fingerprint,
            &summary,
            quality_profile,
            gaps,
            quality_score,
        );

        log_engine_finish(&report);

        Ok(EngineOutput {
            batch: flagged,
            report,
            summary,
        })
    }
}
