//! Data models for the telemetry-to-score pipeline.
//!
//! Types flow strictly downstream: [`RawReading`] rows are normalized into
//! [`Reading`]s, folded into one [`DailyAggregate`] per (entity, day) and
//! scored into a [`HealthScoreRecord`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// A monitored animal or enclosure, as held by the entity catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Entity {
    // ---
    pub entity_id: String,
    pub external_id: Option<String>,
    /// Lower-case species name, `None` when the catalog has none.
    pub species: Option<String>,
    pub breed: Option<String>,
    pub age_months: Option<f64>,
}

/// Raw sensor row as ingested upstream.
///
/// `entity_ref` is either the internal `entity_id` or the source-system
/// `external_id`. `metrics` is the free-form JSON key/value bag the device
/// reported.
#[derive(Debug, Clone, Deserialize, sqlx::FromRow)]
pub struct RawReading {
    // ---
    pub entity_ref: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: Option<String>,
    pub battery_level: Option<f64>,
    pub signal_strength: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub data_quality_score: Option<f64>,
    pub is_anomaly: Option<bool>,
}

/// One normalized sensor sample. Missing or malformed values are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reading {
    // ---
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub heart_rate: Option<f64>,
    /// Degrees Celsius.
    pub temperature: Option<f64>,
    pub activity_level: Option<f64>,
    pub step_count: Option<f64>,
    /// Minutes.
    pub lying_time: Option<f64>,
    pub eating_time: Option<f64>,
    pub rumination_time: Option<f64>,
    pub battery_level: Option<f64>,
    pub signal_strength: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub data_quality_score: Option<f64>,
    pub is_anomaly: bool,
}

/// Group key of the aggregator, the scorer and the score sink.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub entity_id: String,
    pub date: NaiveDate,
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.entity_id, self.date)
    }
}

/// Trailing window of calendar days (UTC), both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    /// Window ending on `as_of` and reaching back `days` days. The start
    /// saturates at the earliest representable date.
    pub fn trailing(as_of: NaiveDate, days: u32) -> Self {
        Self {
            start: as_of
                .checked_sub_days(Days::new(u64::from(days)))
                .unwrap_or(NaiveDate::MIN),
            end: as_of,
        }
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        let day = timestamp.date_naive();
        day >= self.start && day <= self.end
    }

    /// First instant of the window.
    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.and_time(NaiveTime::MIN).and_utc()
    }

    /// First instant after the window.
    pub fn end_utc_exclusive(&self) -> DateTime<Utc> {
        self.end
            .succ_opt()
            .map_or(DateTime::<Utc>::MAX_UTC, |next| next.and_time(NaiveTime::MIN).and_utc())
    }
}

/// Statistical summary of one entity's readings for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyAggregate {
    // ---
    pub entity_id: String,
    pub date: NaiveDate,

    pub avg_heart_rate: Option<f64>,
    pub min_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub stddev_heart_rate: Option<f64>,

    pub avg_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub stddev_temperature: Option<f64>,

    pub avg_activity_level: Option<f64>,
    pub total_step_count: Option<f64>,
    pub total_lying_time: Option<f64>,
    pub total_eating_time: Option<f64>,
    pub total_rumination_time: Option<f64>,

    pub avg_data_quality: Option<f64>,
    pub total_readings: i64,
    pub anomaly_count: i64,

    pub avg_battery_level: Option<f64>,
    pub min_battery_level: Option<f64>,
    pub avg_signal_strength: Option<f64>,

    pub first_reading_at: DateTime<Utc>,
    pub last_reading_at: DateTime<Utc>,
}

impl DailyAggregate {
    pub fn key(&self) -> PartitionKey {
        PartitionKey {
            entity_id: self.entity_id.clone(),
            date: self.date,
        }
    }
}

/// Final classification of a health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Monitoring,
    Concern,
    Alert,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Monitoring => "monitoring",
            Self::Concern => "concern",
            Self::Alert => "alert",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown health status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for HealthStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "healthy" => Ok(Self::Healthy),
            "monitoring" => Ok(Self::Monitoring),
            "concern" => Ok(Self::Concern),
            "alert" => Ok(Self::Alert),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Lets `sqlx` decode the `health_status` text column.
impl TryFrom<String> for HealthStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Scored output row, one per (entity, day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HealthScoreRecord {
    // ---
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub aggregate: DailyAggregate,

    pub heart_rate_score: f64,
    pub temperature_score: f64,
    pub activity_score: f64,
    pub rumination_score: f64,
    pub data_quality_factor: f64,
    pub anomaly_factor: f64,

    pub health_score: f64,
    #[sqlx(try_from = "String")]
    pub health_status: HealthStatus,
    /// `None` when the day had no readings.
    pub anomaly_percentage: Option<f64>,
    pub calculated_at: DateTime<Utc>,
}

impl HealthScoreRecord {
    pub fn key(&self) -> PartitionKey {
        self.aggregate.key()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn trailing_window_bounds() {
        // ---
        let as_of = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let window = Window::trailing(as_of, 90);

        assert_eq!(window.start, NaiveDate::from_ymd_opt(2025, 4, 1).unwrap());
        assert_eq!(window.end, as_of);
        assert_eq!(
            window.start_utc(),
            Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            window.end_utc_exclusive(),
            Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn window_membership_is_by_calendar_day() {
        // ---
        let window = Window::trailing(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(), 1);

        let inside = [
            Utc.with_ymd_and_hms(2025, 6, 29, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 59).unwrap(),
        ];
        let outside = [
            Utc.with_ymd_and_hms(2025, 6, 28, 23, 59, 59).unwrap(),
            Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap(),
        ];
        assert!(inside.iter().all(|ts| window.contains(ts)));
        assert!(!outside.iter().any(|ts| window.contains(ts)));
    }

    #[test]
    fn oversized_window_saturates_instead_of_overflowing() {
        // ---
        let as_of = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let window = Window::trailing(as_of, u32::MAX);

        assert_eq!(window.start, NaiveDate::MIN);
        assert_eq!(window.end, as_of);

        let last = Window::trailing(NaiveDate::MAX, 1);
        assert_eq!(last.end_utc_exclusive(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn health_status_text_round_trip() {
        // ---
        for status in [
            HealthStatus::Healthy,
            HealthStatus::Monitoring,
            HealthStatus::Concern,
            HealthStatus::Alert,
        ] {
            assert_eq!(status.as_str().parse::<HealthStatus>().unwrap(), status);
        }
        assert_eq!(" ALERT ".parse::<HealthStatus>().unwrap(), HealthStatus::Alert);
        assert!("critical".parse::<HealthStatus>().is_err());
    }

    #[test]
    fn partition_key_display() {
        // ---
        let key = PartitionKey {
            entity_id: "cow-17".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, 26).unwrap(),
        };
        assert_eq!(key.to_string(), "cow-17@2025-03-26");
    }
}
