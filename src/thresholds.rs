//! Scoring policy for the health engine, expressed as data.
//!
//! Every number the scoring engine compares against lives here: the
//! per-species vital-sign bands, the activity bands, the composite weight
//! vector, the data-quality and anomaly discount ladders and the status
//! ladder. The built-in [`ScoringConfig::default`] is the production policy;
//! a JSON document (see `config/scoring.json`) can override any part of it
//! without recompiling. Missing JSON fields fall back to the built-in values,
//! and species entries are merged into the built-in species table.
//!
//! The policy is validated once at load time. A config that would let the
//! composite weights drift away from 1.0, or whose ladders are out of order,
//! is rejected before the service starts.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

// ---

/// Closed numeric interval `[lo, hi]`, serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range(pub f64, pub f64);

impl Range {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.0 && value <= self.1
    }

    fn is_within(&self, outer: &Range) -> bool {
        self.0 >= outer.0 && self.1 <= outer.1
    }
}

/// Scores awarded for landing in the tight band, the wide band, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandScores {
    pub tight: f64,
    pub wide: f64,
    pub outside: f64,
}

impl Default for BandScores {
    fn default() -> Self {
        Self {
            tight: 1.0,
            wide: 0.7,
            outside: 0.3,
        }
    }
}

/// A tight physiological band nested inside a wider tolerable band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bands {
    pub tight: Range,
    pub wide: Range,
}

impl Bands {
    pub const fn new(tight: (f64, f64), wide: (f64, f64)) -> Self {
        Self {
            tight: Range(tight.0, tight.1),
            wide: Range(wide.0, wide.1),
        }
    }

    /// Score a value against the bands. Tight wins over wide.
    pub fn score(&self, value: f64, scores: &BandScores) -> f64 {
        if self.tight.contains(value) {
            scores.tight
        } else if self.wide.contains(value) {
            scores.wide
        } else {
            scores.outside
        }
    }
}

/// Per-species scoring table entry.
///
/// A vital with no bands scores neutral for that species. Non-ruminants are
/// never scored on rumination.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeciesPolicy {
    pub ruminant: bool,
    pub heart_rate: Option<Bands>,
    pub temperature: Option<Bands>,
    pub rumination: Option<Bands>,
}

/// Weight vector of the composite score. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub heart_rate: f64,
    pub temperature: f64,
    pub activity: f64,
    pub rumination: f64,
    pub baseline: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            heart_rate: 0.25,
            temperature: 0.25,
            activity: 0.20,
            rumination: 0.20,
            baseline: 0.10,
        }
    }
}

impl Weights {
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("heart_rate", self.heart_rate),
            ("temperature", self.temperature),
            ("activity", self.activity),
            ("rumination", self.rumination),
            ("baseline", self.baseline),
        ]
    }

    pub fn sum(&self) -> f64 {
        self.entries().iter().map(|(_, w)| w).sum()
    }
}

/// One rung of a discount ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub threshold: f64,
    pub factor: f64,
}

const fn step(threshold: f64, factor: f64) -> Step {
    Step { threshold, factor }
}

/// Data-quality discount: the first step whose threshold the day's average
/// quality reaches (`>=`) wins, else `otherwise`. A null average gets
/// `otherwise`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityLadder {
    pub steps: Vec<Step>,
    pub otherwise: f64,
}

impl Default for QualityLadder {
    fn default() -> Self {
        Self {
            steps: vec![step(0.9, 1.0), step(0.7, 0.9), step(0.5, 0.7)],
            otherwise: 0.5,
        }
    }
}

impl QualityLadder {
    pub fn factor(&self, avg_quality: Option<f64>) -> f64 {
        let Some(quality) = avg_quality else {
            return self.otherwise;
        };
        self.steps
            .iter()
            .find(|s| quality >= s.threshold)
            .map_or(self.otherwise, |s| s.factor)
    }
}

/// Anomaly discount: the first step whose threshold the anomaly rate does
/// not exceed (`<=`) wins, else `otherwise`. Days without readings get
/// `no_readings` and never compute a rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyLadder {
    pub steps: Vec<Step>,
    pub otherwise: f64,
    pub no_readings: f64,
}

impl Default for AnomalyLadder {
    fn default() -> Self {
        Self {
            steps: vec![step(0.05, 1.0), step(0.15, 0.8), step(0.30, 0.6)],
            otherwise: 0.4,
            no_readings: 0.5,
        }
    }
}

impl AnomalyLadder {
    pub fn factor(&self, anomaly_count: i64, total_readings: i64) -> f64 {
        if total_readings <= 0 {
            return self.no_readings;
        }
        let rate = anomaly_count as f64 / total_readings as f64;
        self.steps
            .iter()
            .find(|s| rate <= s.threshold)
            .map_or(self.otherwise, |s| s.factor)
    }
}

/// Lower bounds (inclusive) of the status bands. Anything below `concern`
/// is an alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusThresholds {
    pub healthy: f64,
    pub monitoring: f64,
    pub concern: f64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            healthy: 0.9,
            monitoring: 0.7,
            concern: 0.5,
        }
    }
}

/// Complete scoring policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Score used when a dimension has no data or no applicable bands.
    pub neutral_score: f64,
    pub band_scores: BandScores,
    /// Species-independent bands for the average activity level.
    pub activity: Bands,
    /// Species table, keyed by lower-case species name.
    pub species: BTreeMap<String, SpeciesPolicy>,
    pub weights: Weights,
    pub data_quality: QualityLadder,
    pub anomaly: AnomalyLadder,
    pub status: StatusThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let mut species = BTreeMap::new();
        species.insert(
            "cattle".to_string(),
            SpeciesPolicy {
                ruminant: true,
                heart_rate: Some(Bands::new((48.0, 84.0), (40.0, 96.0))),
                temperature: Some(Bands::new((37.5, 39.5), (36.5, 40.5))),
                rumination: Some(Bands::new((300.0, 600.0), (180.0, 720.0))),
            },
        );
        species.insert(
            "sheep".to_string(),
            SpeciesPolicy {
                ruminant: true,
                heart_rate: Some(Bands::new((70.0, 120.0), (60.0, 140.0))),
                temperature: Some(Bands::new((38.5, 40.0), (37.5, 41.0))),
                rumination: Some(Bands::new((240.0, 480.0), (120.0, 600.0))),
            },
        );
        species.insert(
            "goat".to_string(),
            SpeciesPolicy {
                ruminant: true,
                heart_rate: None,
                temperature: None,
                rumination: Some(Bands::new((240.0, 480.0), (120.0, 600.0))),
            },
        );

        Self {
            neutral_score: 0.5,
            band_scores: BandScores::default(),
            activity: Bands::new((0.3, 0.9), (0.1, 1.0)),
            species,
            weights: Weights::default(),
            data_quality: QualityLadder::default(),
            anomaly: AnomalyLadder::default(),
            status: StatusThresholds::default(),
        }
    }
}

impl ScoringConfig {
    /// Load the policy from an optional JSON file, falling back to the
    /// built-in policy when no path is configured. The result is validated.
    pub fn load(path: Option<&str>) -> Result<Self> {
        // ---
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(Path::new(path))
                    .with_context(|| format!("Failed to read scoring config '{}'", path))?;
                Self::from_json(&text)
                    .with_context(|| format!("Invalid scoring config '{}'", path))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON policy document. Species keys are normalized to lower case.
    ///
    /// Species entries are merged over the built-in table: a listed species
    /// replaces the built-in entry of the same name, unlisted built-in
    /// species are kept.
    pub fn from_json(text: &str) -> Result<Self> {
        // ---
        let mut config: Self = serde_json::from_str(text)?;
        let mut species = Self::default().species;
        species.extend(
            std::mem::take(&mut config.species)
                .into_iter()
                .map(|(name, policy)| (name.trim().to_lowercase(), policy)),
        );
        config.species = species;
        Ok(config)
    }

    /// Policy for a species, if the species is in the table.
    pub fn policy(&self, species: Option<&str>) -> Option<&SpeciesPolicy> {
        species.and_then(|s| self.species.get(s))
    }

    /// Reject configurations that break the scoring invariants.
    pub fn validate(&self) -> Result<()> {
        // ---
        for (name, weight) in self.weights.entries() {
            if !weight.is_finite() || weight < 0.0 {
                bail!("weight '{}' must be a non-negative number, got {}", name, weight);
            }
        }
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            bail!("composite weights must sum to 1.0, got {}", sum);
        }

        check_unit("neutral_score", self.neutral_score)?;
        check_unit("band_scores.tight", self.band_scores.tight)?;
        check_unit("band_scores.wide", self.band_scores.wide)?;
        check_unit("band_scores.outside", self.band_scores.outside)?;

        check_bands("activity", &self.activity)?;
        for (name, policy) in &self.species {
            if name.is_empty() {
                bail!("species table contains an empty species name");
            }
            for (dimension, bands) in [
                ("heart_rate", &policy.heart_rate),
                ("temperature", &policy.temperature),
                ("rumination", &policy.rumination),
            ] {
                if let Some(bands) = bands {
                    check_bands(&format!("{}.{}", name, dimension), bands)?;
                }
            }
        }

        check_ladder("data_quality", &self.data_quality.steps, Order::Descending)?;
        check_unit("data_quality.otherwise", self.data_quality.otherwise)?;
        check_ladder("anomaly", &self.anomaly.steps, Order::Ascending)?;
        check_unit("anomaly.otherwise", self.anomaly.otherwise)?;
        check_unit("anomaly.no_readings", self.anomaly.no_readings)?;

        let s = &self.status;
        if !(s.healthy > s.monitoring && s.monitoring > s.concern) {
            bail!(
                "status thresholds must be strictly descending (healthy > monitoring > concern), got {} / {} / {}",
                s.healthy,
                s.monitoring,
                s.concern
            );
        }
        check_unit("status.healthy", s.healthy)?;
        check_unit("status.concern", s.concern)?;

        Ok(())
    }
}

// ---

enum Order {
    Ascending,
    Descending,
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(anyhow!("{} must be within [0, 1], got {}", name, value))
    }
}

fn check_bands(name: &str, bands: &Bands) -> Result<()> {
    for range in [&bands.tight, &bands.wide] {
        if !(range.0.is_finite() && range.1.is_finite()) || range.0 > range.1 {
            bail!("{}: invalid range [{}, {}]", name, range.0, range.1);
        }
    }
    if !bands.tight.is_within(&bands.wide) {
        bail!("{}: tight band must lie inside the wide band", name);
    }
    Ok(())
}

fn check_ladder(name: &str, steps: &[Step], order: Order) -> Result<()> {
    for (i, s) in steps.iter().enumerate() {
        check_unit(&format!("{}.steps[{}].factor", name, i), s.factor)?;
        if !s.threshold.is_finite() {
            bail!("{}.steps[{}]: threshold must be finite", name, i);
        }
    }
    let ordered = steps.windows(2).all(|w| match order {
        Order::Ascending => w[0].threshold < w[1].threshold,
        Order::Descending => w[0].threshold > w[1].threshold,
    });
    if !ordered {
        bail!("{}: step thresholds are out of order", name);
    }
    Ok(())
}
