//! What-if comparison of two feature vectors against one bundle.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bundle::ArtifactBundle;
use crate::errors::ComparisonError;
use crate::inference::{score_with, validate, FeatureVector, PredictionResult, ScoreOptions};
use crate::metrics::{domain_attrs, INFERENCE_METRICS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub original_prediction: PredictionResult,
    pub modified_prediction: PredictionResult,
    /// `modified.probability - original.probability`.
    pub probability_change: f64,
    /// `"<feature>: <old> → <new>"` per differing feature, declaration order.
    pub key_changes: Vec<String>,
}

pub fn compare(bundle: &ArtifactBundle, original: &FeatureVector, modified: &FeatureVector) -> Result<ComparisonResult, ComparisonError> {
    compare_with(bundle, original, modified, &ScoreOptions::default())
}

pub fn compare_with(
    bundle: &ArtifactBundle,
    original: &FeatureVector,
    modified: &FeatureVector,
    opts: &ScoreOptions,
) -> Result<ComparisonResult, ComparisonError> {
    let md = bundle.metadata();
    let before = validate(md, original)?;
    let after = validate(md, modified)?;

    let key_changes: Vec<String> = md
        .features
        .iter()
        .zip(before.iter().zip(&after))
        .filter(|(_, (old, new))| old != new)
        .map(|(spec, (old, new))| format!("{}: {old} → {new}", spec.name))
        .collect();
    if key_changes.is_empty() {
        return Err(ComparisonError::NoChange);
    }

    let original_prediction = score_with(bundle, original, opts)?;
    let modified_prediction = score_with(bundle, modified, opts)?;
    let probability_change = modified_prediction.probability - original_prediction.probability;

    INFERENCE_METRICS.comparisons_total.add(1, &domain_attrs(&md.domain, &md.version));
    debug!(domain = %md.domain, version = %md.version, changed = key_changes.len(), probability_change, "comparison");

    Ok(ComparisonResult { original_prediction, modified_prediction, probability_change, key_changes })
}
