//! Daily aggregator.
//!
//! Readings are first partitioned by (entity, calendar day) and each
//! partition is then folded into a [`DailyAggregate`]. The two steps are kept
//! apart so partitions can be handed to workers independently.
//!
//! Vitals get mean/min/max/population standard deviation, cumulative
//! counters are summed, quality and diagnostics are averaged. A field that is
//! null in every reading of a partition stays null.
//!
//! Every derived statistic is rounded to `STAT_DECIMALS` places. The
//! scorer compares these values against inclusive band edges, and an
//! unrounded mean of three 0.7 readings is 0.6999999999999998.

use std::collections::BTreeMap;

use crate::scoring::round_to;
use crate::{DailyAggregate, PartitionKey, Reading, Window};

const STAT_DECIMALS: i32 = 6;

// ---

/// All readings of one entity on one calendar day (UTC).
#[derive(Debug, Clone)]
pub struct Partition {
    pub key: PartitionKey,
    pub readings: Vec<Reading>,
}

/// Group readings inside the window by (entity, day), ordered by key.
/// Days without readings do not produce a partition.
pub fn partition(readings: Vec<Reading>, window: &Window) -> Vec<Partition> {
    // ---
    let mut groups: BTreeMap<PartitionKey, Vec<Reading>> = BTreeMap::new();
    for reading in readings.into_iter().filter(|r| window.contains(&r.timestamp)) {
        let key = PartitionKey {
            entity_id: reading.entity_id.clone(),
            date: reading.timestamp.date_naive(),
        };
        groups.entry(key).or_default().push(reading);
    }

    groups
        .into_iter()
        .map(|(key, readings)| Partition { key, readings })
        .collect()
}

/// Fold a partition into its daily aggregate. Returns `None` for an empty
/// partition so a zero-reading day can never reach the scorer.
pub fn aggregate(partition: &Partition) -> Option<DailyAggregate> {
    // ---
    let readings = &partition.readings;
    let first_reading_at = readings.iter().map(|r| r.timestamp).min()?;
    let last_reading_at = readings.iter().map(|r| r.timestamp).max()?;

    let heart_rate = Summary::of(readings.iter().map(|r| r.heart_rate));
    let temperature = Summary::of(readings.iter().map(|r| r.temperature));
    let battery = Summary::of(readings.iter().map(|r| r.battery_level));

    Some(DailyAggregate {
        entity_id: partition.key.entity_id.clone(),
        date: partition.key.date,

        avg_heart_rate: heart_rate.map(|s| s.mean),
        min_heart_rate: heart_rate.map(|s| s.min),
        max_heart_rate: heart_rate.map(|s| s.max),
        stddev_heart_rate: heart_rate.map(|s| s.stddev),

        avg_temperature: temperature.map(|s| s.mean),
        min_temperature: temperature.map(|s| s.min),
        max_temperature: temperature.map(|s| s.max),
        stddev_temperature: temperature.map(|s| s.stddev),

        avg_activity_level: mean(readings.iter().map(|r| r.activity_level)),
        total_step_count: total(readings.iter().map(|r| r.step_count)),
        total_lying_time: total(readings.iter().map(|r| r.lying_time)),
        total_eating_time: total(readings.iter().map(|r| r.eating_time)),
        total_rumination_time: total(readings.iter().map(|r| r.rumination_time)),

        avg_data_quality: mean(readings.iter().map(|r| r.data_quality_score)),
        total_readings: readings.len() as i64,
        anomaly_count: readings.iter().filter(|r| r.is_anomaly).count() as i64,

        avg_battery_level: battery.map(|s| s.mean),
        min_battery_level: battery.map(|s| s.min),
        avg_signal_strength: mean(readings.iter().map(|r| r.signal_strength)),

        first_reading_at,
        last_reading_at,
    })
}

// ---

#[derive(Debug, Clone, Copy, PartialEq)]
struct Summary {
    mean: f64,
    min: f64,
    max: f64,
    /// Population standard deviation.
    stddev: f64,
}

impl Summary {
    fn of(values: impl Iterator<Item = Option<f64>>) -> Option<Self> {
        let values: Vec<f64> = values.flatten().collect();
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            mean: round_to(mean, STAT_DECIMALS),
            min,
            max,
            stddev: round_to(variance.sqrt(), STAT_DECIMALS),
        })
    }
}

fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| round_to(sum / count as f64, STAT_DECIMALS))
}

fn total(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values
        .flatten()
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
        .map(|sum| round_to(sum, STAT_DECIMALS))
}
