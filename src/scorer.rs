//! Pure quality score and pass/fail verdict.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ScoringThresholds;
use crate::gaps::GapAnalysis;
use crate::profiler::QualityProfile;

const MAX_MISSING_PENALTY: f64 = 30.0;
const MISSING_PENALTY_PER_PCT: f64 = 0.5;
const MAX_ANOMALY_PENALTY: f64 = 20.0;
const ANOMALY_PENALTY_PER_PCT: f64 = 0.3;
const MAX_GAP_PENALTY: f64 = 50.0;
const GAP_PENALTY_PER_GAP: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachMetric {
    MissingPct,
    AnomalyPct,
}

impl BreachMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingPct => "missing_pct",
            Self::AnomalyPct => "anomaly_pct",
        }
    }
}

/// A metric above its hard-fail ceiling. `reading_type` is `None` for the
/// batch-wide figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBreach {
    pub metric: BreachMetric,
    pub reading_type: Option<String>,
    pub value: f64,
    pub ceiling: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Penalties {
    pub missing: f64,
    pub anomaly: f64,
    pub gap: f64,
}

impl Penalties {
    pub fn total(&self) -> f64 {
        self.missing + self.anomaly + self.gap
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub score: f64,
    pub passed: bool,
    pub missing_penalty: f64,
    pub anomaly_penalty: f64,
    pub gap_penalty: f64,
    pub breaches: Vec<ThresholdBreach>,
}

/// Each penalty is capped on its own; the total can still reach 100.
pub fn penalties(missing_pct: f64, anomaly_pct: f64, significant_gaps: u64) -> Penalties {
    Penalties {
        missing: (missing_pct.max(0.0) * MISSING_PENALTY_PER_PCT).min(MAX_MISSING_PENALTY),
        anomaly: (anomaly_pct.max(0.0) * ANOMALY_PENALTY_PER_PCT).min(MAX_ANOMALY_PENALTY),
        gap: (significant_gaps as f64 * GAP_PENALTY_PER_GAP).min(MAX_GAP_PENALTY),
    }
}

pub fn penalty_score(missing_pct: f64, anomaly_pct: f64, significant_gaps: u64) -> f64 {
    let total = penalties(missing_pct, anomaly_pct, significant_gaps).total();
    (100.0 - total).clamp(0.0, 100.0)
}

/// Ceilings are checked per reading type and batch-wide; a value equal
/// to its ceiling passes.
pub fn breaches(profile: &QualityProfile, thresholds: &ScoringThresholds) -> Vec<ThresholdBreach> {
    let mut out = Vec::new();
    let mut check = |metric, reading_type: Option<&str>, value: f64, ceiling: f64| {
        if value > ceiling {
            out.push(ThresholdBreach {
                metric,
                reading_type: reading_type.map(str::to_string),
                value,
                ceiling,
            });
        }
    };

    for (reading_type, metrics) in &profile.metrics {
        check(
            BreachMetric::MissingPct,
            Some(reading_type.as_str()),
            metrics.missing_pct,
            thresholds.max_missing_pct,
        );
    }
    check(
        BreachMetric::MissingPct,
        None,
        profile.overall.missing_pct,
        thresholds.max_missing_pct,
    );
    for (reading_type, metrics) in &profile.metrics {
        check(
            BreachMetric::AnomalyPct,
            Some(reading_type.as_str()),
            metrics.anomaly_pct,
            thresholds.max_anomaly_pct,
        );
    }
    check(
        BreachMetric::AnomalyPct,
        None,
        profile.overall.anomaly_pct,
        thresholds.max_anomaly_pct,
    );

    out
}

pub fn score(
    profile: &QualityProfile,
    gaps: &GapAnalysis,
    thresholds: &ScoringThresholds,
) -> QualityScore {
    let penalties = penalties(
        profile.overall.missing_pct,
        profile.overall.anomaly_pct,
        gaps.significant_gap_count,
    );
    let score = (100.0 - penalties.total()).clamp(0.0, 100.0);
    let breaches = breaches(profile, thresholds);
    let passed = score >= thresholds.pass_threshold && breaches.is_empty();

    for breach in &breaches {
        warn!(
            component = "scorer",
            event = "scorer.threshold_exceeded",
            metric = breach.metric.as_str(),
            reading_type = breach.reading_type.as_deref().unwrap_or("overall"),
            value = breach.value,
            ceiling = breach.ceiling
        );
    }

    info!(
        component = "scorer",
        event = "scorer.finish",
        score = score,
        passed = passed,
        missing_penalty = penalties.missing,
        anomaly_penalty = penalties.anomaly,
        gap_penalty = penalties.gap,
        breaches = breaches.len()
    );

    QualityScore {
        score,
        passed,
        missing_penalty: penalties.missing,
        anomaly_penalty: penalties.anomaly,
        gap_penalty: penalties.gap,
        breaches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::{OverallStats, TypeMetrics};

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "actual={actual} expected={expected}"
        );
    }

    fn profile(missing_pct: f64, anomaly_pct: f64) -> QualityProfile {
        QualityProfile {
            overall: OverallStats {
                missing_pct,
                anomaly_pct,
                ..OverallStats::default()
            },
            ..QualityProfile::default()
        }
    }

    fn gaps(significant_gap_count: u64) -> GapAnalysis {
        GapAnalysis {
            significant_gap_count,
            ..GapAnalysis::default()
        }
    }

    #[test]
    fn clean_batch_scores_full_marks() {
        let result = score(&profile(0.0, 0.0), &gaps(0), &ScoringThresholds::default());
        assert_eq!(result.score, 100.0);
        assert!(result.passed);
        assert!(result.breaches.is_empty());
    }

    #[test]
    fn penalties_follow_their_rates_and_caps() {
        let p = penalties(10.0, 10.0, 3);
        assert_close(p.missing, 5.0);
        assert_close(p.anomaly, 3.0);
        assert_close(p.gap, 6.0);

        let capped = penalties(100.0, 100.0, 1_000);
        assert_close(capped.missing, 30.0);
        assert_close(capped.anomaly, 20.0);
        assert_close(capped.gap, 50.0);
        assert_eq!(penalty_score(100.0, 100.0, 1_000), 0.0);
    }

    #[test]
    fn score_is_monotone_in_each_input() {
        let steps = [0.0, 1.0, 5.0, 20.0, 59.0, 60.0, 80.0, 100.0];
        for pair in steps.windows(2) {
            assert!(penalty_score(pair[1], 4.0, 2) <= penalty_score(pair[0], 4.0, 2));
            assert!(penalty_score(4.0, pair[1], 2) <= penalty_score(4.0, pair[0], 2));
        }
        for gaps in 0..40u64 {
            let current = penalty_score(4.0, 4.0, gaps + 1);
            assert!(current <= penalty_score(4.0, 4.0, gaps));
            assert!((0.0..=100.0).contains(&current));
        }
    }

    #[test]
    fn low_score_fails_without_any_breach() {
        let thresholds = ScoringThresholds {
            pass_threshold: 70.0,
            max_missing_pct: 100.0,
            max_anomaly_pct: 100.0,
        };
        let result = score(&profile(40.0, 40.0), &gaps(10), &thresholds);
        assert_close(result.score, 100.0 - 20.0 - 12.0 - 20.0);
        assert!(!result.passed);
        assert!(result.breaches.is_empty());
    }

    #[test]
    fn per_type_breach_fails_a_high_score() {
        let mut profile = profile(1.0, 1.0);
        profile.metrics.insert(
            "humidity".to_string(),
            TypeMetrics {
                missing_pct: 25.0,
                ..TypeMetrics::default()
            },
        );
        let result = score(&profile, &gaps(0), &ScoringThresholds::default());

        assert!(result.score >= 99.0);
        assert!(!result.passed);
        assert_eq!(result.breaches.len(), 1);
        assert_eq!(result.breaches[0].metric, BreachMetric::MissingPct);
        assert_eq!(result.breaches[0].reading_type.as_deref(), Some("humidity"));
    }

    #[test]
    fn value_at_ceiling_is_not_a_breach() {
        let result = score(&profile(20.0, 10.0), &gaps(0), &ScoringThresholds::default());
        assert!(result.breaches.is_empty());
        assert!(result.passed);
    }

    #[test]
    fn identical_inputs_give_identical_verdicts() {
        let a = score(&profile(12.5, 3.3), &gaps(4), &ScoringThresholds::default());
        let b = score(&profile(12.5, 3.3), &gaps(4), &ScoringThresholds::default());
        assert_eq!(a, b);
    }
}
