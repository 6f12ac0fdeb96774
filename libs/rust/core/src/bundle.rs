//! Versioned artifact bundles: scorer + explainer + metadata for one domain.
//!
//! On disk a bundle is a single JSON document (`BundleDocument`). Decoding checks
//! every structural invariant up front so a bundle that reaches the registry is
//! always consistent with the feature schema inference validates against.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::models::{Calibration, Explainer, LogisticModel, Scorer, Stump, StumpEnsemble};

pub const DEFAULT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleKey {
    pub domain: String,
    pub version: String,
}

impl BundleKey {
    pub fn new(domain: impl Into<String>, version: impl Into<String>) -> Self {
        Self { domain: domain.into(), version: version.into() }
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}@{}", self.domain, self.version) }
}

/// Advisory clinical threshold on one feature. Matches when the value is at
/// least `at_least` and below `below` (each optional, at least one set).
/// `{label}` and `{value}` in the message are filled in when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_least: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub below: Option<f64>,
    pub message: String,
}

impl WarningRule {
    pub fn at_least(threshold: f64, message: impl Into<String>) -> Self {
        Self { at_least: Some(threshold), below: None, message: message.into() }
    }

    pub fn below(threshold: f64, message: impl Into<String>) -> Self {
        Self { at_least: None, below: Some(threshold), message: message.into() }
    }

    pub fn matches(&self, value: f64) -> bool {
        self.at_least.map_or(true, |t| value >= t) && self.below.map_or(true, |t| value < t)
    }

    pub fn render(&self, label: &str, value: f64) -> String {
        self.message.replace("{label}", label).replace("{value}", &value.to_string())
    }
}

/// Declared input feature with an optional inclusive numeric bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Checked in order; the first matching rule is reported.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<WarningRule>,
}

impl FeatureSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), label: None, min: None, max: None, warnings: Vec::new() }
    }

    pub fn bounded(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self { min: Some(min), max: Some(max), ..Self::new(name) }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self { self.label = Some(label.into()); self }

    pub fn with_warning(mut self, rule: WarningRule) -> Self { self.warnings.push(rule); self }

    /// Human label, falling back to the title-cased feature name.
    pub fn display_name(&self) -> String {
        if let Some(label) = &self.label { return label.clone(); }
        self.name
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleMetadata {
    pub domain: String,
    pub version: String,
    pub model_name: String,
    pub trained_at: Option<String>,
    pub features: Vec<FeatureSpec>,
    pub metrics: BTreeMap<String, f64>,
    pub training_samples: u64,
    pub calibrated: bool,
    pub threshold: f64,
}

impl BundleMetadata {
    /// Minimal metadata for programmatic bundles.
    pub fn new(domain: impl Into<String>, version: impl Into<String>, features: Vec<FeatureSpec>) -> Self {
        Self {
            domain: domain.into(),
            version: version.into(),
            model_name: "custom".into(),
            trained_at: None,
            features,
            metrics: BTreeMap::new(),
            training_samples: 0,
            calibrated: false,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn key(&self) -> BundleKey { BundleKey::new(&self.domain, &self.version) }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> { self.features.iter().map(|f| f.name.as_str()) }

    fn validate(&self) -> Result<(), BundleError> {
        if self.domain.is_empty() || self.version.is_empty() {
            return Err(BundleError::Invalid("domain and version must be non-empty".into()));
        }
        if self.features.is_empty() {
            return Err(BundleError::Invalid("bundle declares no features".into()));
        }
        let mut seen = HashSet::new();
        for f in &self.features {
            if f.name.is_empty() { return Err(BundleError::Invalid("empty feature name".into())); }
            if !seen.insert(f.name.as_str()) {
                return Err(BundleError::Invalid(format!("duplicate feature {}", f.name)));
            }
            for bound in [f.min, f.max].into_iter().flatten() {
                if !bound.is_finite() { return Err(BundleError::Invalid(format!("non-finite bound on {}", f.name))); }
            }
            if let (Some(min), Some(max)) = (f.min, f.max) {
                if min > max { return Err(BundleError::Invalid(format!("min > max on {}", f.name))); }
            }
            for rule in &f.warnings {
                let bounds = [rule.at_least, rule.below];
                if bounds.iter().all(Option::is_none) || bounds.iter().flatten().any(|b| !b.is_finite()) {
                    return Err(BundleError::Invalid(format!("warning rule on {} needs finite bounds", f.name)));
                }
                if rule.message.trim().is_empty() {
                    return Err(BundleError::Invalid(format!("warning rule on {} has no message", f.name)));
                }
            }
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(BundleError::Invalid(format!("threshold {} outside (0, 1)", self.threshold)));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("malformed bundle document: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid bundle: {0}")]
    Invalid(String),
}

/// Immutable package of scorer, explainer and metadata.
#[derive(Clone)]
pub struct ArtifactBundle {
    metadata: BundleMetadata,
    scorer: Arc<dyn Scorer>,
    explainer: Arc<dyn Explainer>,
}

impl fmt::Debug for ArtifactBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactBundle").field("metadata", &self.metadata).finish_non_exhaustive()
    }
}

impl ArtifactBundle {
    pub fn new(metadata: BundleMetadata, scorer: Arc<dyn Scorer>, explainer: Arc<dyn Explainer>) -> Result<Self, BundleError> {
        metadata.validate()?;
        Ok(Self { metadata, scorer, explainer })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BundleError> {
        let doc: BundleDocument = serde_json::from_slice(bytes)?;
        doc.into_bundle()
    }

    pub fn metadata(&self) -> &BundleMetadata { &self.metadata }
    pub fn key(&self) -> BundleKey { self.metadata.key() }
    pub fn threshold(&self) -> f64 { self.metadata.threshold }
    pub fn scorer(&self) -> &dyn Scorer { self.scorer.as_ref() }
    pub fn explainer(&self) -> &dyn Explainer { self.explainer.as_ref() }
}

/// Serialized form of a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleDocument {
    pub domain: String,
    pub version: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub trained_at: Option<String>,
    pub features: Vec<FeatureSpec>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub training_samples: u64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    pub model: ModelSpec,
    #[serde(default)]
    pub calibration: Option<Calibration>,
}

fn default_model_name() -> String { "unknown".into() }
fn default_threshold() -> f64 { DEFAULT_THRESHOLD }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    Logistic {
        intercept: f64,
        coefficients: Vec<f64>,
        #[serde(default)]
        means: Option<Vec<f64>>,
        #[serde(default)]
        scales: Option<Vec<f64>>,
    },
    StumpEnsemble {
        base_score: f64,
        stumps: Vec<StumpSpec>,
    },
}

/// A stump as written by the training pipeline: features are referenced by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StumpSpec {
    pub feature: String,
    pub threshold: f64,
    pub left: f64,
    pub right: f64,
    pub left_fraction: f64,
}

fn all_finite(values: &[f64]) -> bool { values.iter().all(|v| v.is_finite()) }

impl BundleDocument {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BundleError> { Ok(serde_json::to_vec_pretty(self)?) }

    pub fn into_bundle(self) -> Result<ArtifactBundle, BundleError> {
        let n = self.features.len();
        let calibration = self.calibration;
        if let Some(c) = &calibration {
            if !all_finite(&[c.a, c.b]) { return Err(BundleError::Invalid("non-finite calibration".into())); }
        }
        let (scorer, explainer): (Arc<dyn Scorer>, Arc<dyn Explainer>) = match &self.model {
            ModelSpec::Logistic { intercept, coefficients, means, scales } => {
                let means = means.clone().unwrap_or_else(|| vec![0.0; n]);
                let scales = scales.clone().unwrap_or_else(|| vec![1.0; n]);
                if coefficients.len() != n || means.len() != n || scales.len() != n {
                    return Err(BundleError::Invalid(format!(
                        "logistic model expects {n} coefficients/means/scales, got {}/{}/{}",
                        coefficients.len(), means.len(), scales.len()
                    )));
                }
                if !intercept.is_finite() || !all_finite(coefficients) || !all_finite(&means) || !all_finite(&scales) {
                    return Err(BundleError::Invalid("non-finite logistic parameter".into()));
                }
                let m = Arc::new(LogisticModel { intercept: *intercept, weights: coefficients.clone(), means, scales, calibration });
                (m.clone() as Arc<dyn Scorer>, m as Arc<dyn Explainer>)
            }
            ModelSpec::StumpEnsemble { base_score, stumps } => {
                if !base_score.is_finite() { return Err(BundleError::Invalid("non-finite base score".into())); }
                let mut resolved = Vec::with_capacity(stumps.len());
                for s in stumps {
                    let feature = self.features.iter().position(|f| f.name == s.feature)
                        .ok_or_else(|| BundleError::Invalid(format!("stump references undeclared feature {}", s.feature)))?;
                    if !all_finite(&[s.threshold, s.left, s.right]) || !(0.0..=1.0).contains(&s.left_fraction) {
                        return Err(BundleError::Invalid(format!("invalid stump on {}", s.feature)));
                    }
                    resolved.push(Stump { feature, threshold: s.threshold, left: s.left, right: s.right, left_fraction: s.left_fraction });
                }
                let m = Arc::new(StumpEnsemble { base_score: *base_score, stumps: resolved, n_features: n, calibration });
                (m.clone() as Arc<dyn Scorer>, m as Arc<dyn Explainer>)
            }
        };
        let metadata = BundleMetadata {
            domain: self.domain,
            version: self.version,
            model_name: self.model_name,
            trained_at: self.trained_at,
            features: self.features,
            metrics: self.metrics,
            training_samples: self.training_samples,
            calibrated: calibration.is_some(),
            threshold: self.threshold,
        };
        ArtifactBundle::new(metadata, scorer, explainer)
    }
}
