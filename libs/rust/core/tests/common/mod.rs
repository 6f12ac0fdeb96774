#![allow(dead_code)]

use async_trait::async_trait;
use medscreen_core::{ArtifactStore, MemoryArtifactStore, StoreError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Diabetes-style logistic bundle over glucose, bmi and age.
pub fn diabetes_bundle(version: &str) -> Vec<u8> {
    json!({
        "domain": "diabetes",
        "version": version,
        "model_name": "LogisticRegression",
        "trained_at": "2024-11-02T10:00:00Z",
        "training_samples": 768,
        "metrics": {"roc_auc": 0.83, "accuracy": 0.77},
        "features": [
            {"name": "glucose", "label": "Glucose (mg/dL)", "min": 0, "max": 300},
            {"name": "bmi", "label": "BMI", "min": 10, "max": 70},
            {"name": "age", "min": 1, "max": 120}
        ],
        "model": {
            "kind": "logistic",
            "intercept": -0.9,
            "coefficients": [1.1, 0.7, 0.4],
            "means": [120.0, 32.0, 33.0],
            "scales": [32.0, 7.9, 11.8]
        }
    })
    .to_string()
    .into_bytes()
}

pub fn features(glucose: f64, bmi: f64, age: f64) -> medscreen_core::FeatureVector {
    medscreen_core::FeatureVector::new().with("glucose", glucose).with("bmi", bmi).with("age", age)
}

/// Memory store that counts fetches and sleeps before answering, optionally per domain.
#[derive(Default)]
pub struct SlowStore {
    pub inner: MemoryArtifactStore,
    pub fetches: AtomicUsize,
    pub delay: Duration,
    pub delays: HashMap<String, Duration>,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self { Self { delay, ..Self::default() } }

    pub fn fetches(&self) -> usize { self.fetches.load(Ordering::SeqCst) }
}

#[async_trait]
impl ArtifactStore for SlowStore {
    async fn fetch(&self, domain: &str, version: &str) -> Result<Vec<u8>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delays.get(domain).copied().unwrap_or(self.delay)).await;
        self.inner.fetch(domain, version).await
    }

    async fn domains(&self) -> Result<Vec<String>, StoreError> { self.inner.domains().await }
}
