//! Explain-on-read scoring against a loaded bundle.
//!
//! Scoring is a pure function of (bundle, features): no I/O, nothing persisted, and
//! feature values never reach the logs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::bundle::{ArtifactBundle, BundleMetadata};
use crate::errors::InferenceError;
use crate::metrics::{domain_attrs, INFERENCE_METRICS};

pub const DEFAULT_TOP_K: usize = 5;

const LOW_BAND: f64 = 0.1;
const HIGH_BAND: f64 = 0.3;
// absorbs float noise such as |0.6 - 0.5| = 0.09999999999999998
const BAND_EPSILON: f64 = 1e-9;

/// Caller-supplied feature values keyed by feature name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(BTreeMap<String, f64>);

impl FeatureVector {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self { self.insert(name, value); self }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> { self.0.insert(name.into(), value) }

    pub fn get(&self, name: &str) -> Option<f64> { self.0.get(name).copied() }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn names(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }
}

impl<K: Into<String>> FromIterator<(K, f64)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreOptions {
    pub top_k: usize,
}

impl Default for ScoreOptions {
    fn default() -> Self { Self { top_k: DEFAULT_TOP_K } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel { Low, Medium, High }

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "LOW",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction { Increases, Decreases, Neutral }

impl Direction {
    pub fn of(contribution: f64) -> Self {
        if contribution > 0.0 { Direction::Increases } else if contribution < 0.0 { Direction::Decreases } else { Direction::Neutral }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature_name: String,
    pub display_name: String,
    pub value: f64,
    pub contribution: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub domain: String,
    pub model_version: String,
    pub prediction: u8,
    pub probability: f64,
    pub confidence_level: ConfidenceLevel,
    pub top_factors: Vec<FeatureContribution>,
}

/// Band of the distance from the decision midpoint. Both boundaries are inclusive.
pub fn confidence_level(probability: f64) -> ConfidenceLevel {
    let d = (probability - 0.5).abs();
    if d <= LOW_BAND + BAND_EPSILON {
        ConfidenceLevel::Low
    } else if d >= HIGH_BAND - BAND_EPSILON {
        ConfidenceLevel::High
    } else {
        ConfidenceLevel::Medium
    }
}

/// Checks `features` against the declared schema and returns the row in
/// declaration order.
pub fn validate(metadata: &BundleMetadata, features: &FeatureVector) -> Result<Vec<f64>, InferenceError> {
    let missing: Vec<String> = metadata.feature_names().filter(|n| features.get(n).is_none()).map(str::to_string).collect();
    let unexpected: Vec<String> = features
        .names()
        .filter(|n| !metadata.features.iter().any(|f| f.name == *n))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(InferenceError::SchemaMismatch { missing, unexpected });
    }
    let mut row = Vec::with_capacity(metadata.features.len());
    for spec in &metadata.features {
        let value = features.get(&spec.name).unwrap_or_default();
        let min = spec.min.unwrap_or(f64::NEG_INFINITY);
        let max = spec.max.unwrap_or(f64::INFINITY);
        if !value.is_finite() || value < min || value > max {
            return Err(InferenceError::RangeViolation { feature: spec.name.clone(), value, min, max });
        }
        row.push(value);
    }
    Ok(row)
}

pub fn score(bundle: &ArtifactBundle, features: &FeatureVector) -> Result<PredictionResult, InferenceError> {
    score_with(bundle, features, &ScoreOptions::default())
}

pub fn score_with(bundle: &ArtifactBundle, features: &FeatureVector, opts: &ScoreOptions) -> Result<PredictionResult, InferenceError> {
    let started = Instant::now();
    let md = bundle.metadata();
    let attrs = domain_attrs(&md.domain, &md.version);
    let row = match validate(md, features) {
        Ok(row) => row,
        Err(error) => {
            INFERENCE_METRICS.rejected_inputs_total.add(1, &attrs);
            debug!(domain = %md.domain, version = %md.version, %error, "input rejected");
            return Err(error);
        }
    };

    let raw = bundle.scorer().probability(&row);
    if !raw.is_finite() {
        INFERENCE_METRICS.rejected_inputs_total.add(1, &attrs);
        warn!(domain = %md.domain, version = %md.version, "scorer returned a non-finite probability");
        return Err(InferenceError::NonFiniteScore { domain: md.domain.clone(), version: md.version.clone() });
    }
    let probability = raw.clamp(0.0, 1.0);
    let prediction = u8::from(probability >= bundle.threshold());
    let confidence = confidence_level(probability);

    let contributions = bundle.explainer().contributions(&row);
    let mut factors: Vec<FeatureContribution> = md
        .features
        .iter()
        .zip(&row)
        .enumerate()
        .map(|(i, (spec, value))| {
            let contribution = contributions.get(i).copied().filter(|c| c.is_finite()).unwrap_or(0.0);
            FeatureContribution {
                feature_name: spec.name.clone(),
                display_name: spec.display_name(),
                value: *value,
                contribution,
                direction: Direction::of(contribution),
            }
        })
        .collect();
    // stable: equal magnitudes keep declaration order
    factors.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
    factors.truncate(opts.top_k);

    INFERENCE_METRICS.predictions_total.add(1, &attrs);
    INFERENCE_METRICS.scoring_latency_ms.record(started.elapsed().as_secs_f64() * 1000.0, &attrs);
    info!(domain = %md.domain, version = %md.version, prediction, probability, confidence = confidence.as_str(), "prediction");

    Ok(PredictionResult {
        domain: md.domain.clone(),
        model_version: md.version.clone(),
        prediction,
        probability,
        confidence_level: confidence,
        top_factors: factors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleMetadata, FeatureSpec};
    use crate::models::{Explainer, Scorer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scorer that returns a fixed probability and counts calls.
    struct Fixed {
        p: f64,
        contributions: Vec<f64>,
        calls: AtomicUsize,
    }

    impl Scorer for Fixed {
        fn probability(&self, _row: &[f64]) -> f64 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.p
        }
    }

    impl Explainer for Fixed {
        fn contributions(&self, _row: &[f64]) -> Vec<f64> { self.contributions.clone() }
    }

    fn fixed_bundle(features: Vec<FeatureSpec>, p: f64, contributions: Vec<f64>) -> (ArtifactBundle, Arc<Fixed>) {
        let fixed = Arc::new(Fixed { p, contributions, calls: AtomicUsize::new(0) });
        let md = BundleMetadata::new("test", "1", features);
        let bundle = ArtifactBundle::new(md, fixed.clone(), fixed.clone()).unwrap();
        (bundle, fixed)
    }

    fn ab() -> Vec<FeatureSpec> { vec![FeatureSpec::new("a"), FeatureSpec::new("b")] }

    #[test]
    fn scores_fixed_probability() {
        let (bundle, _) = fixed_bundle(ab(), 0.82, vec![0.4, -0.1]);
        let out = score(&bundle, &FeatureVector::new().with("a", 1.0).with("b", 2.0)).unwrap();
        assert_eq!(out.prediction, 1);
        assert_eq!(out.confidence_level, ConfidenceLevel::High);
        assert_eq!(out.probability, 0.82);
        assert_eq!(out.model_version, "1");
        assert_eq!(out.top_factors[0].feature_name, "a");
        assert_eq!(out.top_factors[0].direction, Direction::Increases);
        assert_eq!(out.top_factors[1].direction, Direction::Decreases);
    }

    #[test]
    fn confidence_boundaries_are_inclusive() {
        assert_eq!(confidence_level(0.4), ConfidenceLevel::Low);
        assert_eq!(confidence_level(0.6), ConfidenceLevel::Low);
        assert_eq!(confidence_level(0.5), ConfidenceLevel::Low);
        assert_eq!(confidence_level(0.2), ConfidenceLevel::High);
        assert_eq!(confidence_level(0.8), ConfidenceLevel::High);
        assert_eq!(confidence_level(0.0), ConfidenceLevel::High);
        assert_eq!(confidence_level(0.7), ConfidenceLevel::Medium);
        assert_eq!(confidence_level(0.35), ConfidenceLevel::Medium);
    }

    #[test]
    fn missing_feature_never_reaches_scorer() {
        let (bundle, fixed) = fixed_bundle(ab(), 0.82, vec![0.0, 0.0]);
        let err = score(&bundle, &FeatureVector::new().with("a", 1.0).with("c", 3.0)).unwrap_err();
        assert_eq!(err, InferenceError::SchemaMismatch { missing: vec!["b".into()], unexpected: vec!["c".into()] });
        assert_eq!(fixed.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn out_of_range_and_non_finite_are_rejected() {
        let features = vec![FeatureSpec::bounded("age", 1.0, 120.0), FeatureSpec::new("b")];
        let (bundle, fixed) = fixed_bundle(features, 0.5, vec![0.0, 0.0]);
        let err = score(&bundle, &FeatureVector::new().with("age", 130.0).with("b", 0.0)).unwrap_err();
        assert!(matches!(err, InferenceError::RangeViolation { ref feature, .. } if feature == "age"));
        let err = score(&bundle, &FeatureVector::new().with("age", 40.0).with("b", f64::NAN)).unwrap_err();
        assert!(matches!(err, InferenceError::RangeViolation { ref feature, .. } if feature == "b"));
        assert_eq!(fixed.calls.load(Ordering::SeqCst), 0);
        // bounds are inclusive
        assert!(score(&bundle, &FeatureVector::new().with("age", 120.0).with("b", -5.0)).is_ok());
    }

    #[test]
    fn scoring_is_idempotent() {
        let (bundle, _) = fixed_bundle(ab(), 0.37, vec![0.2, 0.3]);
        let x = FeatureVector::new().with("a", 0.5).with("b", 9.0);
        let first = score(&bundle, &x).unwrap();
        let second = score(&bundle, &x).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.probability.to_bits(), second.probability.to_bits());
    }

    #[test]
    fn top_k_is_stable_on_ties() {
        let features = vec![FeatureSpec::new("w"), FeatureSpec::new("x"), FeatureSpec::new("y"), FeatureSpec::new("z")];
        let (bundle, _) = fixed_bundle(features, 0.1, vec![0.2, -0.5, -0.2, 0.5]);
        let x: FeatureVector = [("w", 0.0), ("x", 0.0), ("y", 0.0), ("z", 0.0)].into_iter().collect();
        let out = score_with(&bundle, &x, &ScoreOptions { top_k: 3 }).unwrap();
        let order: Vec<&str> = out.top_factors.iter().map(|f| f.feature_name.as_str()).collect();
        assert_eq!(order, ["x", "z", "w"]);
        assert_eq!(out.prediction, 0);
    }

    #[test]
    fn short_explainer_output_counts_as_zero() {
        let (bundle, _) = fixed_bundle(ab(), 0.9, vec![0.3]);
        let out = score(&bundle, &FeatureVector::new().with("a", 1.0).with("b", 1.0)).unwrap();
        assert_eq!(out.top_factors[1].contribution, 0.0);
        assert_eq!(out.top_factors[1].direction, Direction::Neutral);
    }

    #[test]
    fn probability_is_clamped_and_threshold_is_honoured() {
        let (bundle, _) = fixed_bundle(ab(), 1.7, vec![0.0, 0.0]);
        let out = score(&bundle, &FeatureVector::new().with("a", 0.0).with("b", 0.0)).unwrap();
        assert_eq!(out.probability, 1.0);

        let fixed = Arc::new(Fixed { p: 0.45, contributions: vec![], calls: AtomicUsize::new(0) });
        let mut md = BundleMetadata::new("test", "1", ab());
        md.threshold = 0.4;
        let bundle = ArtifactBundle::new(md, fixed.clone(), fixed).unwrap();
        let out = score(&bundle, &FeatureVector::new().with("a", 0.0).with("b", 0.0)).unwrap();
        assert_eq!(out.prediction, 1);
    }

    #[test]
    fn overflowing_margin_is_an_error_not_a_prediction() {
        let model = Arc::new(crate::models::LogisticModel {
            intercept: 0.0,
            weights: vec![2.0, -2.0],
            means: vec![0.0, 0.0],
            scales: vec![1.0, 1.0],
            calibration: None,
        });
        let bundle = ArtifactBundle::new(BundleMetadata::new("heart", "1", ab()), model.clone(), model).unwrap();
        let err = score(&bundle, &FeatureVector::new().with("a", 1e308).with("b", 1e308)).unwrap_err();
        assert_eq!(err, InferenceError::NonFiniteScore { domain: "heart".into(), version: "1".into() });

        let (bundle, _) = fixed_bundle(ab(), f64::NAN, vec![0.0, 0.0]);
        assert!(matches!(
            score(&bundle, &FeatureVector::new().with("a", 0.0).with("b", 0.0)),
            Err(InferenceError::NonFiniteScore { .. })
        ));
    }

    #[test]
    fn result_serializes_with_uppercase_enums() {
        let (bundle, _) = fixed_bundle(ab(), 0.82, vec![0.4, 0.0]);
        let out = score(&bundle, &FeatureVector::new().with("a", 1.0).with("b", 2.0)).unwrap();
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["confidence_level"], "HIGH");
        assert_eq!(v["top_factors"][0]["direction"], "INCREASES");
        assert_eq!(v["top_factors"][1]["direction"], "NEUTRAL");
    }
}
