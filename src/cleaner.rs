//! Deduplication and missing-value handling. Runs first.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::batch::{finite, non_blank, RawReading, Reading, ReadingField};
use crate::config::EngineConfig;
use crate::error::{RowError, RowErrorKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCleaning {
    pub input_rows: u64,
    pub dropped: u64,
    pub imputed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningStats {
    pub input_rows: u64,
    pub output_rows: u64,
    pub duplicates_removed: u64,
    pub rows_dropped_missing: u64,
    pub values_imputed: u64,
    pub drops_by_kind: BTreeMap<RowErrorKind, u64>,
    pub per_type: BTreeMap<String, TypeCleaning>,
}

impl CleaningStats {
    fn record_drop(&mut self, reading_type: Option<&str>, err: &RowError) {
        debug!(
            component = "cleaner",
            event = "cleaner.row_dropped",
            reason = err.kind().as_str(),
            details = %err
        );
        self.rows_dropped_missing += 1;
        *self.drops_by_kind.entry(err.kind()).or_insert(0) += 1;
        if let Some(reading_type) = reading_type {
            self.per_type
                .entry(reading_type.to_string())
                .or_default()
                .dropped += 1;
        }
    }
}

/// Row that passed the required-field check; battery may still be null.
#[derive(Debug, Clone)]
struct Candidate {
    sensor_id: String,
    timestamp: String,
    reading_type: String,
    value: f64,
    battery_level: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Text(String),
    Float(Option<u64>),
}

trait IdentityKey {
    fn key_part(&self, field: ReadingField) -> KeyPart;

    fn identity(&self, fields: &[ReadingField]) -> Vec<KeyPart> {
        fields.iter().map(|field| self.key_part(*field)).collect()
    }
}

impl IdentityKey for Candidate {
    fn key_part(&self, field: ReadingField) -> KeyPart {
        match field {
            ReadingField::SensorId => KeyPart::Text(self.sensor_id.clone()),
            ReadingField::Timestamp => KeyPart::Text(self.timestamp.clone()),
            ReadingField::ReadingType => KeyPart::Text(self.reading_type.clone()),
            ReadingField::Value => float_key(Some(self.value)),
            ReadingField::BatteryLevel => float_key(self.battery_level),
        }
    }
}

impl IdentityKey for Reading {
    fn key_part(&self, field: ReadingField) -> KeyPart {
        match field {
            ReadingField::SensorId => KeyPart::Text(self.sensor_id.clone()),
            ReadingField::Timestamp => KeyPart::Text(self.timestamp.clone()),
            ReadingField::ReadingType => KeyPart::Text(self.reading_type.clone()),
            ReadingField::Value => float_key(Some(self.value)),
            ReadingField::BatteryLevel => float_key(Some(self.battery_level)),
        }
    }
}

fn float_key(value: Option<f64>) -> KeyPart {
    // -0.0 and 0.0 compare equal, so they must hash equal.
    KeyPart::Float(value.map(|v| if v == 0.0 { 0.0_f64.to_bits() } else { v.to_bits() }))
}

/// Drop unusable rows, dedupe, impute battery levels.
///
/// Battery nulls take the sensor's median, then the batch median; rows
/// with neither are dropped. A final dedupe catches duplicates created
/// by imputation so a second pass is a no-op.
pub fn clean(rows: Vec<RawReading>, cfg: &EngineConfig) -> (Vec<Reading>, CleaningStats) {
    let mut stats = CleaningStats {
        input_rows: rows.len() as u64,
        ..CleaningStats::default()
    };

    info!(
        component = "cleaner",
        event = "cleaner.start",
        input_rows = stats.input_rows
    );

    let mut usable = Vec::with_capacity(rows.len());
    for row in rows {
        // Rejected reading types only count toward the batch-wide figures.
        let reading_type = row
            .reading_type_text()
            .filter(|t| accepts_type(&cfg.reading_types, t))
            .map(str::to_string);
        if let Some(reading_type) = &reading_type {
            stats
                .per_type
                .entry(reading_type.clone())
                .or_default()
                .input_rows += 1;
        }
        match check_required(row, &cfg.reading_types) {
            Ok(candidate) => usable.push(candidate),
            Err(err) => stats.record_drop(reading_type.as_deref(), &err),
        }
    }

    let (deduped, removed) = dedupe(usable, &cfg.identity_key);
    stats.duplicates_removed += removed;

    let global_median = median(deduped.iter().filter_map(|c| c.battery_level).collect());
    let sensor_medians = sensor_battery_medians(&deduped);

    let mut imputed = Vec::with_capacity(deduped.len());
    for candidate in deduped {
        let battery_level = match candidate.battery_level {
            Some(level) => level,
            None => match sensor_medians
                .get(&candidate.sensor_id)
                .copied()
                .or(global_median)
            {
                Some(level) => {
                    stats.values_imputed += 1;
                    stats
                        .per_type
                        .entry(candidate.reading_type.clone())
                        .or_default()
                        .imputed += 1;
                    level
                }
                None => {
                    stats.record_drop(
                        Some(candidate.reading_type.as_str()),
                        &RowError::NoBatteryMedian,
                    );
                    continue;
                }
            },
        };

        imputed.push(Reading {
            sensor_id: candidate.sensor_id,
            timestamp: candidate.timestamp,
            reading_type: candidate.reading_type,
            value: candidate.value,
            battery_level,
        });
    }

    let (cleaned, removed) = dedupe(imputed, &cfg.identity_key);
    stats.duplicates_removed += removed;
    stats.output_rows = cleaned.len() as u64;

    info!(
        component = "cleaner",
        event = "cleaner.finish",
        input_rows = stats.input_rows,
        output_rows = stats.output_rows,
        duplicates_removed = stats.duplicates_removed,
        rows_dropped_missing = stats.rows_dropped_missing,
        values_imputed = stats.values_imputed
    );

    (cleaned, stats)
}

/// An empty enumeration accepts every non-blank reading type.
fn accepts_type(reading_types: &[String], reading_type: &str) -> bool {
    reading_types.is_empty() || reading_types.iter().any(|t| t == reading_type)
}

fn check_required(row: RawReading, reading_types: &[String]) -> Result<Candidate, RowError> {
    let sensor_id = non_blank(row.sensor_id.as_deref())
        .ok_or(RowError::MissingField(ReadingField::SensorId))?;
    let timestamp = non_blank(row.timestamp.as_deref())
        .ok_or(RowError::MissingField(ReadingField::Timestamp))?;
    let reading_type = row
        .reading_type_text()
        .ok_or(RowError::MissingField(ReadingField::ReadingType))?;
    let value = finite(row.value).ok_or(RowError::MissingField(ReadingField::Value))?;

    if !accepts_type(reading_types, reading_type) {
        return Err(RowError::UnknownReadingType(reading_type.to_string()));
    }

    Ok(Candidate {
        sensor_id: sensor_id.to_string(),
        timestamp: timestamp.to_string(),
        reading_type: reading_type.to_string(),
        value,
        battery_level: finite(row.battery_level),
    })
}

/// Keeps the first occurrence of each identity key.
fn dedupe<T: IdentityKey>(rows: Vec<T>, fields: &[ReadingField]) -> (Vec<T>, u64) {
    let mut seen = HashSet::with_capacity(rows.len());
    let mut kept = Vec::with_capacity(rows.len());
    let mut removed = 0u64;

    for row in rows {
        if seen.insert(row.identity(fields)) {
            kept.push(row);
        } else {
            removed += 1;
        }
    }

    (kept, removed)
}

fn sensor_battery_medians(rows: &[Candidate]) -> BTreeMap<String, f64> {
    let mut by_sensor: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for row in rows {
        if let Some(level) = row.battery_level {
            by_sensor
                .entry(row.sensor_id.as_str())
                .or_default()
                .push(level);
        }
    }

    by_sensor
        .into_iter()
        .filter_map(|(sensor_id, levels)| median(levels).map(|m| (sensor_id.to_string(), m)))
        .collect()
}

pub(crate) fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
