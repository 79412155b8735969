//! Telemetry source and normalizer.
//!
//! Raw sensor rows carry vitals and activity counters in a free-form JSON
//! metrics bag whose keys and value types vary by device firmware. This
//! module fetches the rows for a window and coerces them into the uniform
//! [`Reading`] schema. Values that are missing or not numeric become `None`,
//! never zero. Rows that cannot be attributed to a known entity, or whose
//! payload is unusable as a whole, are rejected and counted.

use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::catalog::EntityCatalog;
use crate::{RawReading, Reading, Window};

// ---

const HEART_RATE_KEYS: &[&str] = &["heart_rate", "hr"];
const TEMPERATURE_KEYS: &[&str] = &["temperature", "temperature_c", "temp"];
const TEMPERATURE_F_KEYS: &[&str] = &["temperature_f"];
const ACTIVITY_KEYS: &[&str] = &["activity_level", "activity"];
const STEP_KEYS: &[&str] = &["step_count", "steps"];
const LYING_KEYS: &[&str] = &["lying_time"];
const EATING_KEYS: &[&str] = &["eating_time"];
const RUMINATION_KEYS: &[&str] = &["rumination_time"];

/// Why a raw row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// `entity_ref` matches no catalog entry.
    UnknownEntity,
    /// The metrics bag is not a JSON object.
    MalformedMetrics,
    /// `data_quality_score` lies outside [0, 1].
    QualityOutOfRange,
}

/// Normalization counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub accepted: usize,
    pub unknown_entity: usize,
    pub malformed_metrics: usize,
    pub quality_out_of_range: usize,
}

impl NormalizeStats {
    pub fn rejected(&self) -> usize {
        self.unknown_entity + self.malformed_metrics + self.quality_out_of_range
    }

    fn record(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::UnknownEntity => self.unknown_entity += 1,
            RejectReason::MalformedMetrics => self.malformed_metrics += 1,
            RejectReason::QualityOutOfRange => self.quality_out_of_range += 1,
        }
    }
}

/// Fetch raw sensor rows whose timestamp falls inside the window.
pub async fn fetch_raw_readings(
    pool: &PgPool,
    window: &Window,
) -> Result<Vec<RawReading>, sqlx::Error> {
    // ---
    let rows: Vec<RawReading> = sqlx::query_as(
        r#"
        SELECT entity_ref, timestamp, metrics::text AS metrics,
               battery_level, signal_strength, latitude, longitude,
               data_quality_score, is_anomaly
        FROM sensor_readings
        WHERE timestamp >= $1 AND timestamp < $2
        "#,
    )
    .bind(window.start_utc())
    .bind(window.end_utc_exclusive())
    .fetch_all(pool)
    .await?;

    debug!(
        count = rows.len(),
        start = %window.start,
        end = %window.end,
        "Fetched raw sensor readings"
    );
    Ok(rows)
}

impl RawReading {
    /// Coerce this row into a [`Reading`] attributed to a catalog entity.
    pub fn normalize(&self, catalog: &EntityCatalog) -> Result<Reading, RejectReason> {
        // ---
        let entity = catalog
            .resolve(&self.entity_ref)
            .ok_or(RejectReason::UnknownEntity)?;

        let empty = Map::new();
        let parsed;
        let bag = match self.metrics.as_deref().map(str::trim) {
            None | Some("") | Some("null") => &empty,
            Some(text) => {
                parsed = serde_json::from_str::<Value>(text)
                    .map_err(|_| RejectReason::MalformedMetrics)?;
                parsed.as_object().ok_or(RejectReason::MalformedMetrics)?
            }
        };

        let data_quality_score = finite(self.data_quality_score);
        if let Some(q) = data_quality_score {
            if !(0.0..=1.0).contains(&q) {
                return Err(RejectReason::QualityOutOfRange);
            }
        }

        let temperature = metric(bag, TEMPERATURE_KEYS)
            .or_else(|| metric(bag, TEMPERATURE_F_KEYS).map(fahrenheit_to_celsius));

        Ok(Reading {
            entity_id: entity.entity_id.clone(),
            timestamp: self.timestamp,
            heart_rate: metric(bag, HEART_RATE_KEYS),
            temperature,
            activity_level: metric(bag, ACTIVITY_KEYS),
            step_count: metric(bag, STEP_KEYS),
            lying_time: metric(bag, LYING_KEYS),
            eating_time: metric(bag, EATING_KEYS),
            rumination_time: metric(bag, RUMINATION_KEYS),
            battery_level: finite(self.battery_level),
            signal_strength: finite(self.signal_strength),
            latitude: finite(self.latitude),
            longitude: finite(self.longitude),
            data_quality_score,
            is_anomaly: self.is_anomaly.unwrap_or(false),
        })
    }
}

/// Normalize a batch, dropping and counting rejected rows.
pub fn normalize_all(raw: &[RawReading], catalog: &EntityCatalog) -> (Vec<Reading>, NormalizeStats) {
    // ---
    let mut stats = NormalizeStats::default();
    let mut readings = Vec::with_capacity(raw.len());

    for row in raw {
        match row.normalize(catalog) {
            Ok(reading) => {
                stats.accepted += 1;
                readings.push(reading);
            }
            Err(reason) => {
                debug!(
                    entity_ref = %row.entity_ref,
                    timestamp = %row.timestamp,
                    ?reason,
                    "Rejected raw reading"
                );
                stats.record(reason);
            }
        }
    }

    info!(
        accepted = stats.accepted,
        unknown_entity = stats.unknown_entity,
        malformed_metrics = stats.malformed_metrics,
        quality_out_of_range = stats.quality_out_of_range,
        "Normalized raw readings"
    );
    (readings, stats)
}

// ---

/// First key of `keys` present in the bag with a usable numeric value.
fn metric(bag: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| bag.get(*k).and_then(coerce_number))
}

/// Numbers and numeric strings coerce; everything else is `None`.
fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    finite(n)
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}
