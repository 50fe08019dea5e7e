//! Missing-slot detection against a regular expected cadence.
//!
//! Each (sensor_id, reading_type) group gets a grid anchored at its first
//! observation. A slot is observed when some reading lies strictly within
//! `threshold_hours` of it. Missing slots between two consecutive
//! observations form one run; a run is significant when its duration
//! (`missing slots * cadence`) exceeds `threshold_hours`.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::batch::EnrichedReading;

const MS_PER_HOUR: f64 = 3_600_000.0;
const MAX_REPORTED_GAP_RUNS: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapRun {
    /// First missing slot.
    pub start: DateTime<FixedOffset>,
    /// Last missing slot.
    pub end: DateTime<FixedOffset>,
    pub missing_slots: u64,
    pub hours: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupGaps {
    pub sensor_id: String,
    pub reading_type: String,
    pub observations: u64,
    pub expected_slots: u64,
    pub missing_slots: u64,
    pub missing_hours: f64,
    pub largest_gap_start: Option<DateTime<FixedOffset>>,
    pub largest_gap_end: Option<DateTime<FixedOffset>>,
    pub largest_gap_hours: f64,
    pub significant_runs: u64,
    pub total_runs: u64,
    pub runs: Vec<GapRun>,
}

impl GroupGaps {
    fn empty(sensor_id: &str, reading_type: &str, observations: u64) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            reading_type: reading_type.to_string(),
            observations,
            expected_slots: 0,
            missing_slots: 0,
            missing_hours: 0.0,
            largest_gap_start: None,
            largest_gap_end: None,
            largest_gap_hours: 0.0,
            significant_runs: 0,
            total_runs: 0,
            runs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysis {
    pub groups: Vec<GroupGaps>,
    pub total_missing_slots: u64,
    pub significant_gap_count: u64,
}

fn hours_to_ms(hours: f64) -> i64 {
    ((hours * MS_PER_HOUR).round() as i64).max(1)
}

/// Groups are reported in (sensor_id, reading_type) order; input order
/// does not matter.
pub fn detect_gaps(
    rows: &[EnrichedReading],
    cadence_hours: f64,
    threshold_hours: f64,
) -> GapAnalysis {
    let mut groups: BTreeMap<(&str, &str), Vec<DateTime<FixedOffset>>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.sensor_id.as_str(), row.reading_type.as_str()))
            .or_default()
            .push(row.timestamp);
    }

    let cadence_ms = hours_to_ms(cadence_hours);
    let tolerance_ms = hours_to_ms(threshold_hours);

    let mut analysis = GapAnalysis::default();
    for ((sensor_id, reading_type), mut timestamps) in groups {
        timestamps.sort();
        let group = group_gaps(
            sensor_id,
            reading_type,
            &timestamps,
            cadence_ms,
            tolerance_ms,
            cadence_hours,
            threshold_hours,
        );
        analysis.total_missing_slots += group.missing_slots;
        analysis.significant_gap_count += group.significant_runs;
        analysis.groups.push(group);
    }

    if analysis.significant_gap_count > 0 {
        warn!(
            component = "gaps",
            event = "gaps.significant_gaps",
            significant_gap_count = analysis.significant_gap_count,
            total_missing_slots = analysis.total_missing_slots,
            threshold_hours = threshold_hours
        );
    }

    info!(
        component = "gaps",
        event = "gaps.finish",
        groups = analysis.groups.len(),
        total_missing_slots = analysis.total_missing_slots,
        significant_gap_count = analysis.significant_gap_count,
        cadence_hours = cadence_hours
    );

    analysis
}

fn group_gaps(
    sensor_id: &str,
    reading_type: &str,
    timestamps: &[DateTime<FixedOffset>],
    cadence_ms: i64,
    tolerance_ms: i64,
    cadence_hours: f64,
    threshold_hours: f64,
) -> GroupGaps {
    let mut group = GroupGaps::empty(sensor_id, reading_type, timestamps.len() as u64);
    let (Some(first), Some(last)) = (timestamps.first(), timestamps.last()) else {
        return group;
    };
    if timestamps.len() < 2 {
        return group;
    }

    let origin = first.timestamp_millis();
    group.expected_slots = ((last.timestamp_millis() - origin) / cadence_ms) as u64 + 1;

    let mut largest: Option<(u64, i64, i64)> = None;
    for pair in timestamps.windows(2) {
        let (prev, next) = (pair[0].timestamp_millis(), pair[1].timestamp_millis());
        // Slot k is missing when prev + tol <= origin + k*cadence <= next - tol.
        let lo = prev
            .saturating_add(tolerance_ms)
            .saturating_sub(origin)
            .saturating_add(cadence_ms - 1)
            .div_euclid(cadence_ms);
        let hi = next
            .saturating_sub(tolerance_ms)
            .saturating_sub(origin)
            .div_euclid(cadence_ms);
        if hi < lo {
            continue;
        }

        let missing = (hi - lo + 1) as u64;
        let hours = missing as f64 * cadence_hours;
        let significant = hours > threshold_hours;
        group.missing_slots += missing;
        group.total_runs += 1;
        if significant {
            group.significant_runs += 1;
        }
        if largest.map_or(true, |(slots, _, _)| missing > slots) {
            largest = Some((missing, lo, hi));
        }
        if group.runs.len() < MAX_REPORTED_GAP_RUNS {
            group.runs.push(GapRun {
                start: slot_time(first, lo, cadence_ms),
                end: slot_time(first, hi, cadence_ms),
                missing_slots: missing,
                hours,
                significant,
            });
        }
    }

    group.missing_hours = group.missing_slots as f64 * cadence_hours;
    if let Some((slots, lo, hi)) = largest {
        group.largest_gap_start = Some(slot_time(first, lo, cadence_ms));
        group.largest_gap_end = Some(slot_time(first, hi, cadence_ms));
        group.largest_gap_hours = slots as f64 * cadence_hours;
    }

    group
}

fn slot_time(origin: &DateTime<FixedOffset>, slot: i64, cadence_ms: i64) -> DateTime<FixedOffset> {
    *origin + Duration::milliseconds(slot * cadence_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Reading;
    use crate::config::MAX_SPAN_HOURS;
    use crate::temporal::{enrich, parse_utc_offset};

    fn rows(sensor: &str, timestamps: &[&str]) -> Vec<EnrichedReading> {
        let input = timestamps
            .iter()
            .map(|ts| Reading::new(sensor, ts, "temperature", 21.0, 80.0))
            .collect();
        let (rows, _) = enrich(input, parse_utc_offset("UTC").unwrap(), 7);
        rows
    }

    #[test]
    fn three_hour_hole_reports_two_missing_slots() {
        let rows = rows(
            "S1",
            &["2024-03-01T00:00:00Z", "2024-03-01T03:00:00Z", "2024-03-01T04:00:00Z"],
        );
        let analysis = detect_gaps(&rows, 1.0, 1.0);

        let group = &analysis.groups[0];
        assert_eq!(group.expected_slots, 5);
        assert_eq!(group.missing_slots, 2);
        assert!(group.missing_hours >= 2.0);
        assert_eq!(
            group.largest_gap_start.unwrap().to_rfc3339(),
            "2024-03-01T01:00:00+00:00"
        );
        assert_eq!(
            group.largest_gap_end.unwrap().to_rfc3339(),
            "2024-03-01T02:00:00+00:00"
        );
        assert_eq!(group.significant_runs, 1);
        assert_eq!(analysis.significant_gap_count, 1);
    }

    #[test]
    fn regular_series_has_no_gaps() {
        let rows = rows(
            "S1",
            &["2024-03-01T00:00:00Z", "2024-03-01T01:00:00Z", "2024-03-01T02:00:00Z"],
        );
        let analysis = detect_gaps(&rows, 1.0, 1.0);
        assert_eq!(analysis.total_missing_slots, 0);
        assert_eq!(analysis.groups[0].total_runs, 0);
        assert_eq!(analysis.groups[0].largest_gap_start, None);
    }

    #[test]
    fn single_slot_hole_is_missing_but_not_significant() {
        let rows = rows("S1", &["2024-03-01T00:00:00Z", "2024-03-01T02:00:00Z"]);
        let analysis = detect_gaps(&rows, 1.0, 1.0);
        assert_eq!(analysis.total_missing_slots, 1);
        assert_eq!(analysis.significant_gap_count, 0);
    }

    #[test]
    fn jittered_readings_still_cover_their_slots() {
        let rows = rows(
            "S1",
            &["2024-03-01T00:00:00Z", "2024-03-01T01:20:00Z", "2024-03-01T02:05:00Z"],
        );
        let analysis = detect_gaps(&rows, 1.0, 1.0);
        assert_eq!(analysis.total_missing_slots, 0);
    }

    #[test]
    fn single_observation_group_reports_zero_gaps() {
        let mut input = rows("S1", &["2024-03-01T00:00:00Z"]);
        input.extend(rows("S2", &["2024-03-01T00:00:00Z", "2024-03-01T05:00:00Z"]));
        let analysis = detect_gaps(&input, 1.0, 1.0);

        assert_eq!(analysis.groups.len(), 2);
        assert_eq!(analysis.groups[0].sensor_id, "S1");
        assert_eq!(analysis.groups[0].missing_slots, 0);
        assert_eq!(analysis.groups[0].expected_slots, 0);
        assert_eq!(analysis.groups[1].missing_slots, 4);
        assert_eq!(analysis.total_missing_slots, 4);
    }

    #[test]
    fn oversized_cadence_or_tolerance_reports_no_gaps() {
        let rows = rows("S1", &["2024-03-01T00:00:00Z", "2024-03-01T05:00:00Z"]);

        let wide_cadence = detect_gaps(&rows, 1.0e16, 1.0);
        assert_eq!(wide_cadence.groups[0].expected_slots, 1);
        assert_eq!(wide_cadence.total_missing_slots, 0);

        let wide_tolerance = detect_gaps(&rows, 1.0, 1.0e16);
        assert_eq!(wide_tolerance.groups[0].expected_slots, 6);
        assert_eq!(wide_tolerance.total_missing_slots, 0);

        let longest_allowed = detect_gaps(&rows, MAX_SPAN_HOURS, MAX_SPAN_HOURS);
        assert_eq!(longest_allowed.total_missing_slots, 0);
    }

    #[test]
    fn input_order_does_not_change_the_result() {
        let forward = rows(
            "S1",
            &["2024-03-01T00:00:00Z", "2024-03-01T06:00:00Z", "2024-03-01T07:00:00Z"],
        );
        let backward: Vec<EnrichedReading> = forward.iter().rev().cloned().collect();
        assert_eq!(detect_gaps(&forward, 1.0, 1.0), detect_gaps(&backward, 1.0, 1.0));
    }
}
