//! Health scoring engine.
//!
//! Turns one [`DailyAggregate`] plus its [`Entity`] into a
//! [`HealthScoreRecord`]:
//!
//! 1. Four dimension scores (heart rate, temperature, activity, rumination),
//!    each banded against the species policy with a neutral fallback for
//!    missing data or unknown species.
//! 2. A weighted composite of the dimension scores plus the fixed baseline.
//! 3. Multiplicative data-quality and anomaly discounts.
//! 4. One status classification of the final score.
//!
//! Scoring never fails. Every missing input has a defined neutral value, and
//! the only division (the anomaly rate) is guarded by the reading count
//! before it is computed.

use chrono::{DateTime, Utc};

use crate::thresholds::{ScoringConfig, SpeciesPolicy, StatusThresholds, Weights};
use crate::{DailyAggregate, Entity, HealthScoreRecord, HealthStatus};

// ---

/// Scores are rounded to this many decimals so that binary floating-point
/// error in the weighted sum cannot move a value across a band edge.
const SCORE_DECIMALS: i32 = 6;

/// The four per-dimension sub-scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionScores {
    pub heart_rate: f64,
    pub temperature: f64,
    pub activity: f64,
    pub rumination: f64,
}

pub fn heart_rate_score(
    avg_heart_rate: Option<f64>,
    policy: Option<&SpeciesPolicy>,
    cfg: &ScoringConfig,
) -> f64 {
    match (avg_heart_rate, policy.and_then(|p| p.heart_rate.as_ref())) {
        (Some(value), Some(bands)) => bands.score(value, &cfg.band_scores),
        _ => cfg.neutral_score,
    }
}

pub fn temperature_score(
    avg_temperature: Option<f64>,
    policy: Option<&SpeciesPolicy>,
    cfg: &ScoringConfig,
) -> f64 {
    match (avg_temperature, policy.and_then(|p| p.temperature.as_ref())) {
        (Some(value), Some(bands)) => bands.score(value, &cfg.band_scores),
        _ => cfg.neutral_score,
    }
}

/// Species-independent.
pub fn activity_score(avg_activity_level: Option<f64>, cfg: &ScoringConfig) -> f64 {
    avg_activity_level.map_or(cfg.neutral_score, |value| {
        cfg.activity.score(value, &cfg.band_scores)
    })
}

/// Non-ruminants (and species missing from the table) are not applicable
/// and score full marks.
pub fn rumination_score(
    total_rumination_time: Option<f64>,
    policy: Option<&SpeciesPolicy>,
    cfg: &ScoringConfig,
) -> f64 {
    let Some(policy) = policy.filter(|p| p.ruminant) else {
        return cfg.band_scores.tight;
    };
    match (total_rumination_time, policy.rumination.as_ref()) {
        (Some(minutes), Some(bands)) => bands.score(minutes, &cfg.band_scores),
        _ => cfg.neutral_score,
    }
}

/// Weighted sum of the dimension scores plus the baseline weight.
pub fn composite(scores: &DimensionScores, weights: &Weights) -> f64 {
    let sum = scores.heart_rate * weights.heart_rate
        + scores.temperature * weights.temperature
        + scores.activity * weights.activity
        + scores.rumination * weights.rumination
        + weights.baseline;
    round_to(sum, SCORE_DECIMALS)
}

/// Anomaly share of the day in percent, two decimals. `None` without readings.
pub fn anomaly_percentage(anomaly_count: i64, total_readings: i64) -> Option<f64> {
    if total_readings <= 0 {
        return None;
    }
    Some(round_to(
        anomaly_count as f64 / total_readings as f64 * 100.0,
        2,
    ))
}

/// Map a final health score to its status. Lower bounds are inclusive.
pub fn classify(health_score: f64, thresholds: &StatusThresholds) -> HealthStatus {
    if health_score >= thresholds.healthy {
        HealthStatus::Healthy
    } else if health_score >= thresholds.monitoring {
        HealthStatus::Monitoring
    } else if health_score >= thresholds.concern {
        HealthStatus::Concern
    } else {
        HealthStatus::Alert
    }
}

/// Score one daily aggregate.
///
/// `entity` is `None` when the aggregate's entity is no longer in the
/// catalog; it is then scored with the neutral policy like an unknown
/// species. The result depends only on the inputs, apart from
/// `calculated_at`.
pub fn score_aggregate(
    aggregate: DailyAggregate,
    entity: Option<&Entity>,
    cfg: &ScoringConfig,
    calculated_at: DateTime<Utc>,
) -> HealthScoreRecord {
    // ---
    let policy = cfg.policy(entity.and_then(|e| e.species.as_deref()));

    let dimensions = DimensionScores {
        heart_rate: heart_rate_score(aggregate.avg_heart_rate, policy, cfg),
        temperature: temperature_score(aggregate.avg_temperature, policy, cfg),
        activity: activity_score(aggregate.avg_activity_level, cfg),
        rumination: rumination_score(aggregate.total_rumination_time, policy, cfg),
    };

    let subtotal = composite(&dimensions, &cfg.weights);
    let data_quality_factor = cfg.data_quality.factor(aggregate.avg_data_quality);
    let anomaly_factor = cfg
        .anomaly
        .factor(aggregate.anomaly_count, aggregate.total_readings);

    // Computed once; the status is derived from this exact value.
    let health_score = round_to(
        (subtotal * data_quality_factor * anomaly_factor).clamp(0.0, 1.0),
        SCORE_DECIMALS,
    );
    let health_status = classify(health_score, &cfg.status);
    let anomaly_percentage =
        anomaly_percentage(aggregate.anomaly_count, aggregate.total_readings);

    HealthScoreRecord {
        aggregate,
        heart_rate_score: dimensions.heart_rate,
        temperature_score: dimensions.temperature,
        activity_score: dimensions.activity,
        rumination_score: dimensions.rumination,
        data_quality_factor,
        anomaly_factor,
        health_score,
        health_status,
        anomaly_percentage,
        calculated_at,
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn entity(species: Option<&str>) -> Entity {
        Entity {
            entity_id: "e-1".to_string(),
            external_id: None,
            species: species.map(String::from),
            breed: None,
            age_months: Some(30.0),
        }
    }

    fn healthy_cattle_day() -> DailyAggregate {
        let ts = Utc.with_ymd_and_hms(2025, 3, 26, 0, 0, 0).unwrap();
        DailyAggregate {
            entity_id: "e-1".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, 26).unwrap(),
            avg_heart_rate: Some(65.0),
            min_heart_rate: Some(58.0),
            max_heart_rate: Some(71.0),
            stddev_heart_rate: Some(3.2),
            avg_temperature: Some(38.5),
            min_temperature: Some(38.1),
            max_temperature: Some(38.9),
            stddev_temperature: Some(0.2),
            avg_activity_level: Some(0.5),
            total_step_count: Some(4200.0),
            total_lying_time: Some(700.0),
            total_eating_time: Some(240.0),
            total_rumination_time: Some(400.0),
            avg_data_quality: Some(0.95),
            total_readings: 20,
            anomaly_count: 0,
            avg_battery_level: Some(88.0),
            min_battery_level: Some(85.0),
            avg_signal_strength: Some(-70.0),
            first_reading_at: ts,
            last_reading_at: ts,
        }
    }

    fn empty_day() -> DailyAggregate {
        DailyAggregate {
            avg_heart_rate: None,
            min_heart_rate: None,
            max_heart_rate: None,
            stddev_heart_rate: None,
            avg_temperature: None,
            min_temperature: None,
            max_temperature: None,
            stddev_temperature: None,
            avg_activity_level: None,
            total_step_count: None,
            total_lying_time: None,
            total_eating_time: None,
            total_rumination_time: None,
            avg_battery_level: None,
            min_battery_level: None,
            avg_signal_strength: None,
            ..healthy_cattle_day()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 27, 2, 0, 0).unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn healthy_cattle_scores_one() {
        // ---
        let cfg = ScoringConfig::default();
        let rec = score_aggregate(healthy_cattle_day(), Some(&entity(Some("cattle"))), &cfg, now());

        assert_eq!(rec.heart_rate_score, 1.0);
        assert_eq!(rec.temperature_score, 1.0);
        assert_eq!(rec.activity_score, 1.0);
        assert_eq!(rec.rumination_score, 1.0);
        assert_eq!(rec.data_quality_factor, 1.0);
        assert_eq!(rec.anomaly_factor, 1.0);
        assert!(approx(rec.health_score, 1.0));
        assert_eq!(rec.health_status, HealthStatus::Healthy);
        assert_eq!(rec.anomaly_percentage, Some(0.0));
    }

    #[test]
    fn tachycardic_cattle_is_monitoring() {
        // ---
        let cfg = ScoringConfig::default();
        let day = DailyAggregate {
            avg_heart_rate: Some(100.0),
            ..healthy_cattle_day()
        };
        let rec = score_aggregate(day, Some(&entity(Some("cattle"))), &cfg, now());

        assert_eq!(rec.heart_rate_score, 0.3);
        assert!(approx(rec.health_score, 0.775), "{}", rec.health_score);
        assert_eq!(rec.health_status, HealthStatus::Monitoring);
    }

    #[test]
    fn unknown_species_without_vitals_is_concern() {
        // ---
        let cfg = ScoringConfig::default();
        let rec = score_aggregate(empty_day(), Some(&entity(Some("other"))), &cfg, now());

        assert_eq!(rec.heart_rate_score, 0.5);
        assert_eq!(rec.temperature_score, 0.5);
        assert_eq!(rec.activity_score, 0.5);
        assert_eq!(rec.rumination_score, 1.0);
        assert!(approx(rec.health_score, 0.65), "{}", rec.health_score);
        assert_eq!(rec.health_status, HealthStatus::Concern);
    }

    #[test]
    fn species_bands_table() {
        // ---
        let cfg = ScoringConfig::default();
        let cattle = cfg.policy(Some("cattle"));
        let sheep = cfg.policy(Some("sheep"));
        let goat = cfg.policy(Some("goat"));

        let heart = [
            (cattle, 48.0, 1.0),
            (cattle, 90.0, 0.7),
            (cattle, 39.0, 0.3),
            (sheep, 100.0, 1.0),
            (sheep, 65.0, 0.7),
            (sheep, 150.0, 0.3),
            (goat, 100.0, 0.5),
            (None, 100.0, 0.5),
        ];
        for (policy, value, expected) in heart {
            assert_eq!(heart_rate_score(Some(value), policy, &cfg), expected, "hr {}", value);
        }

        let temperature = [
            (cattle, 39.5, 1.0),
            (cattle, 40.0, 0.7),
            (cattle, 41.0, 0.3),
            (sheep, 38.5, 1.0),
            (sheep, 41.0, 0.7),
            (sheep, 37.0, 0.3),
            (goat, 39.0, 0.5),
        ];
        for (policy, value, expected) in temperature {
            assert_eq!(
                temperature_score(Some(value), policy, &cfg),
                expected,
                "temp {}",
                value
            );
        }

        let rumination = [
            (cattle, 300.0, 1.0),
            (cattle, 700.0, 0.7),
            (cattle, 100.0, 0.3),
            (sheep, 480.0, 1.0),
            (sheep, 130.0, 0.7),
            (goat, 250.0, 1.0),
            (goat, 601.0, 0.3),
        ];
        for (policy, value, expected) in rumination {
            assert_eq!(
                rumination_score(Some(value), policy, &cfg),
                expected,
                "rumination {}",
                value
            );
        }
    }

    #[test]
    fn missing_vitals_are_neutral() {
        // ---
        let cfg = ScoringConfig::default();
        let cattle = cfg.policy(Some("cattle"));

        assert_eq!(heart_rate_score(None, cattle, &cfg), 0.5);
        assert_eq!(temperature_score(None, cattle, &cfg), 0.5);
        assert_eq!(activity_score(None, &cfg), 0.5);
        assert_eq!(rumination_score(None, cattle, &cfg), 0.5);
    }

    #[test]
    fn activity_bands() {
        // ---
        let cfg = ScoringConfig::default();
        let table = [
            (0.3, 1.0),
            (0.9, 1.0),
            (0.1, 0.7),
            (1.0, 0.7),
            (0.05, 0.3),
            (1.2, 0.3),
        ];
        for (value, expected) in table {
            assert_eq!(activity_score(Some(value), &cfg), expected, "activity {}", value);
        }
    }

    #[test]
    fn non_ruminants_never_penalized_on_rumination() {
        // ---
        let cfg = ScoringConfig::default();
        for species in [Some("other"), Some("pig"), None] {
            let policy = cfg.policy(species);
            for minutes in [None, Some(0.0), Some(50.0), Some(5000.0)] {
                assert_eq!(rumination_score(minutes, policy, &cfg), 1.0);
            }
        }
    }

    #[test]
    fn missing_entity_uses_neutral_policy() {
        // ---
        let cfg = ScoringConfig::default();
        let rec = score_aggregate(healthy_cattle_day(), None, &cfg, now());

        assert_eq!(rec.heart_rate_score, 0.5);
        assert_eq!(rec.temperature_score, 0.5);
        assert_eq!(rec.rumination_score, 1.0);
    }

    #[test]
    fn discounts_multiply_the_composite() {
        // ---
        let cfg = ScoringConfig::default();
        let day = DailyAggregate {
            avg_data_quality: Some(0.75),
            anomaly_count: 2,
            total_readings: 20,
            ..healthy_cattle_day()
        };
        let rec = score_aggregate(day, Some(&entity(Some("cattle"))), &cfg, now());

        assert_eq!(rec.data_quality_factor, 0.9);
        assert_eq!(rec.anomaly_factor, 0.8);
        assert!(approx(rec.health_score, 0.72), "{}", rec.health_score);
        assert_eq!(rec.health_status, HealthStatus::Monitoring);
        assert_eq!(rec.anomaly_percentage, Some(10.0));
    }

    #[test]
    fn zero_readings_hit_guard_not_division() {
        // ---
        let cfg = ScoringConfig::default();
        let day = DailyAggregate {
            total_readings: 0,
            anomaly_count: 0,
            ..healthy_cattle_day()
        };
        let rec = score_aggregate(day, Some(&entity(Some("cattle"))), &cfg, now());

        assert_eq!(rec.anomaly_factor, 0.5);
        assert_eq!(rec.anomaly_percentage, None);
        assert!(rec.health_score.is_finite());
    }

    #[test]
    fn anomaly_percentage_rounds_to_two_decimals() {
        // ---
        assert_eq!(anomaly_percentage(1, 3), Some(33.33));
        assert_eq!(anomaly_percentage(2, 3), Some(66.67));
        assert_eq!(anomaly_percentage(0, 0), None);
    }

    #[test]
    fn classification_edges_are_inclusive() {
        // ---
        let t = StatusThresholds::default();
        let table = [
            (1.0, HealthStatus::Healthy),
            (0.9, HealthStatus::Healthy),
            (0.899999, HealthStatus::Monitoring),
            (0.7, HealthStatus::Monitoring),
            (0.5, HealthStatus::Concern),
            (0.499999, HealthStatus::Alert),
            (0.0, HealthStatus::Alert),
        ];
        for (score, expected) in table {
            assert_eq!(classify(score, &t), expected, "score {}", score);
        }
    }

    #[test]
    fn score_stays_in_unit_interval_and_status_matches() {
        // ---
        let cfg = ScoringConfig::default();
        let species = [Some("cattle"), Some("sheep"), Some("goat"), Some("other"), None];
        let hearts = [None, Some(30.0), Some(60.0), Some(90.0), Some(130.0)];
        let temps = [None, Some(36.0), Some(38.0), Some(40.2), Some(42.0)];
        let qualities = [None, Some(0.2), Some(0.6), Some(0.8), Some(1.0)];
        let anomalies = [0, 1, 3, 6, 20];

        for s in species {
            let e = entity(s);
            for hr in hearts {
                for t in temps {
                    for q in qualities {
                        for a in anomalies {
                            let day = DailyAggregate {
                                avg_heart_rate: hr,
                                avg_temperature: t,
                                avg_data_quality: q,
                                anomaly_count: a,
                                ..healthy_cattle_day()
                            };
                            let rec = score_aggregate(day, Some(&e), &cfg, now());
                            assert!((0.0..=1.0).contains(&rec.health_score));
                            assert_eq!(rec.health_status, classify(rec.health_score, &cfg.status));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn scoring_is_deterministic_apart_from_timestamp() {
        // ---
        let cfg = ScoringConfig::default();
        let e = entity(Some("sheep"));
        let first = score_aggregate(healthy_cattle_day(), Some(&e), &cfg, now());
        let later = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        let second = score_aggregate(healthy_cattle_day(), Some(&e), &cfg, later);

        assert_eq!(
            HealthScoreRecord {
                calculated_at: later,
                ..first
            },
            second
        );
    }
}
