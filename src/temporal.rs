//! Timestamp normalization and per-day / trailing-window aggregates.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::batch::{run_bounds, EnrichedReading, Reading};
use crate::config::ConfigError;
use crate::error::RowError;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalStats {
    pub input_rows: u64,
    pub output_rows: u64,
    pub malformed_timestamps: u64,
    pub dropped_by_type: BTreeMap<String, u64>,
}

/// Parses `UTC+05:30`, `UTC-3`, `+0530`, `UTC` and friends.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || ConfigError::InvalidOffset(raw.to_string());
    let trimmed = raw.trim();
    let body = match trimmed.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("utc") || prefix.eq_ignore_ascii_case("gmt") => {
            &trimmed[3..]
        }
        _ => trimmed,
    };
    if body.is_empty() {
        if trimmed.is_empty() {
            return Err(invalid());
        }
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, digits) = match body.as_bytes()[0] {
        b'+' => (1, &body[1..]),
        b'-' => (-1, &body[1..]),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None => (digits, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// RFC 3339 is converted using its own offset; naive timestamps are UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RowError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(RowError::MalformedTimestamp(raw.to_string()))
}

/// Normalizes timestamps to `offset` and attaches `daily_avg` and the
/// trailing `window_days` rolling mean.
///
/// Output is sorted by (sensor_id, reading_type, timestamp) so both
/// aggregates are independent of input order. `anomalous_reading` is
/// left `false` for the anomaly stage.
pub fn enrich(
    rows: Vec<Reading>,
    offset: FixedOffset,
    window_days: u32,
) -> (Vec<EnrichedReading>, TemporalStats) {
    let mut stats = TemporalStats {
        input_rows: rows.len() as u64,
        ..TemporalStats::default()
    };

    let mut enriched = Vec::with_capacity(rows.len());
    for row in rows {
        let instant = match parse_timestamp(&row.timestamp) {
            Ok(instant) => instant,
            Err(err) => {
                stats.malformed_timestamps += 1;
                *stats
                    .dropped_by_type
                    .entry(row.reading_type.clone())
                    .or_insert(0) += 1;
                warn!(
                    component = "temporal",
                    event = "temporal.row_dropped",
                    sensor_id = %row.sensor_id,
                    reading_type = %row.reading_type,
                    details = %err
                );
                continue;
            }
        };

        let local = instant.with_timezone(&offset);
        enriched.push(EnrichedReading {
            sensor_id: row.sensor_id,
            timestamp: local,
            reading_type: row.reading_type,
            value: row.value,
            battery_level: row.battery_level,
            timestamp_iso: local.to_rfc3339_opts(SecondsFormat::Secs, false),
            date: local.date_naive(),
            daily_avg: 0.0,
            rolling_avg_7d: 0.0,
            anomalous_reading: false,
        });
    }

    enriched.sort_by(|a, b| {
        a.sensor_id
            .cmp(&b.sensor_id)
            .then_with(|| a.reading_type.cmp(&b.reading_type))
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.value.total_cmp(&b.value))
    });

    for group in run_bounds(&enriched, |a, b| a.group_key() == b.group_key()) {
        apply_day_aggregates(&mut enriched[group], window_days);
    }

    stats.output_rows = enriched.len() as u64;

    info!(
        component = "temporal",
        event = "temporal.finish",
        input_rows = stats.input_rows,
        output_rows = stats.output_rows,
        malformed_timestamps = stats.malformed_timestamps,
        offset = %offset,
        window_days = window_days
    );

    (enriched, stats)
}

#[derive(Debug, Clone, Copy)]
struct DayBucket {
    date: NaiveDate,
    sum: f64,
    count: u64,
}

/// `group` is one (sensor, reading_type) run, already in time order.
fn apply_day_aggregates(group: &mut [EnrichedReading], window_days: u32) {
    let mut days: Vec<DayBucket> = Vec::new();
    for row in group.iter() {
        match days.last_mut() {
            Some(bucket) if bucket.date == row.date => {
                bucket.sum += row.value;
                bucket.count += 1;
            }
            _ => days.push(DayBucket {
                date: row.date,
                sum: row.value,
                count: 1,
            }),
        }
    }

    let window = i64::from(window_days.max(1));
    let mut rolling = Vec::with_capacity(days.len());
    let mut window_start = 0;
    let mut window_sum = 0.0;
    let mut window_count = 0u64;
    for day in &days {
        window_sum += day.sum;
        window_count += day.count;
        while (day.date - days[window_start].date).num_days() >= window {
            window_sum -= days[window_start].sum;
            window_count -= days[window_start].count;
            window_start += 1;
        }
        rolling.push(window_sum / window_count as f64);
    }

    let mut day_idx = 0;
    for row in group.iter_mut() {
        while days[day_idx].date != row.date {
            day_idx += 1;
        }
        let bucket = days[day_idx];
        row.daily_avg = bucket.sum / bucket.count as f64;
        row.rolling_avg_7d = rolling[day_idx];
    }
}
