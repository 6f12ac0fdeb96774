//! Scorer/explainer seams and the model kinds a bundle can carry.
//!
//! Both kinds produce exact additive attributions in margin (log-odds) space:
//! `margin = base_value + sum(contributions)`.

use serde::{Deserialize, Serialize};

/// Maps an ordered feature row to a probability of the positive class.
pub trait Scorer: Send + Sync {
    fn probability(&self, row: &[f64]) -> f64;
}

/// Maps an ordered feature row to one signed contribution per declared feature,
/// in declaration order.
pub trait Explainer: Send + Sync {
    fn contributions(&self, row: &[f64]) -> Vec<f64>;
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 { 1.0 / (1.0 + (-z).exp()) } else { let e = z.exp(); e / (1.0 + e) }
}

/// Platt scaling applied to the raw margin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub a: f64,
    pub b: f64,
}

impl Calibration {
    fn apply(&self, margin: f64) -> f64 { sigmoid(self.a * margin + self.b) }
}

fn to_probability(margin: f64, calibration: Option<&Calibration>) -> f64 {
    match calibration {
        Some(c) => c.apply(margin),
        None => sigmoid(margin),
    }
}

/// Standardized logistic regression.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticModel {
    pub intercept: f64,
    pub weights: Vec<f64>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub calibration: Option<Calibration>,
}

impl LogisticModel {
    fn standardized(&self, i: usize, x: f64) -> f64 {
        let scale = self.scales[i];
        (x - self.means[i]) / if scale == 0.0 { 1.0 } else { scale }
    }

    pub fn margin(&self, row: &[f64]) -> f64 {
        self.intercept + self.contributions(row).iter().sum::<f64>()
    }
}

impl Scorer for LogisticModel {
    fn probability(&self, row: &[f64]) -> f64 { to_probability(self.margin(row), self.calibration.as_ref()) }
}

impl Explainer for LogisticModel {
    fn contributions(&self, row: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .enumerate()
            .map(|(i, w)| w * self.standardized(i, row.get(i).copied().unwrap_or(self.means[i])))
            .collect()
    }
}

/// Depth-1 regression tree over a single feature. Rows with
/// `x <= threshold` take the left leaf.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    pub left: f64,
    pub right: f64,
    /// Share of training rows that reached the left leaf.
    pub left_fraction: f64,
}

impl Stump {
    fn leaf(&self, x: f64) -> f64 { if x <= self.threshold { self.left } else { self.right } }
    fn expected(&self) -> f64 { self.left_fraction * self.left + (1.0 - self.left_fraction) * self.right }
}

/// Additive ensemble of stumps (boosted trees of depth one).
#[derive(Debug, Clone, PartialEq)]
pub struct StumpEnsemble {
    pub base_score: f64,
    pub stumps: Vec<Stump>,
    pub n_features: usize,
    pub calibration: Option<Calibration>,
}

impl StumpEnsemble {
    pub fn margin(&self, row: &[f64]) -> f64 {
        self.base_score + self.stumps.iter().map(|s| s.leaf(row.get(s.feature).copied().unwrap_or(0.0))).sum::<f64>()
    }

    /// Margin of the average training row; attributions are measured against it.
    pub fn base_value(&self) -> f64 {
        self.base_score + self.stumps.iter().map(Stump::expected).sum::<f64>()
    }
}

impl Scorer for StumpEnsemble {
    fn probability(&self, row: &[f64]) -> f64 { to_probability(self.margin(row), self.calibration.as_ref()) }
}

impl Explainer for StumpEnsemble {
    fn contributions(&self, row: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.n_features];
        for s in &self.stumps {
            let x = row.get(s.feature).copied().unwrap_or(0.0);
            if let Some(slot) = out.get_mut(s.feature) { *slot += s.leaf(x) - s.expected(); }
        }
        out
    }
}
