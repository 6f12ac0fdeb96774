//! Registry + scoring walkthrough against an in-memory store.
//!
//! Run with: cargo run --example registry_demo

use medscreen_core::guidance::{interpretation, lifestyle_tips, recommendation, warnings, DISCLAIMER};
use medscreen_core::{
    compare, init_tracing, score, BundleDocument, FeatureSpec, FeatureVector, MemoryArtifactStore, ModelRegistry, ModelSpec,
    RegistryConfig, StaticVersions, WarningRule,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn heart_bundle() -> anyhow::Result<Vec<u8>> {
    let doc = BundleDocument {
        domain: "heart".into(),
        version: "2.0.0".into(),
        model_name: "LogisticRegression".into(),
        trained_at: None,
        features: vec![
            FeatureSpec::bounded("age", 1.0, 120.0).with_label("Age"),
            FeatureSpec::bounded("resting_bp", 60.0, 250.0).with_label("Resting blood pressure"),
            FeatureSpec::bounded("cholesterol", 80.0, 600.0)
                .with_warning(WarningRule::at_least(240.0, "Cholesterol of {value} mg/dL is high")),
        ],
        metrics: BTreeMap::from([("roc_auc".to_string(), 0.9)]),
        training_samples: 918,
        threshold: 0.5,
        model: ModelSpec::Logistic {
            intercept: -0.3,
            coefficients: vec![0.6, 0.4, 0.5],
            means: Some(vec![53.0, 132.0, 199.0]),
            scales: Some(vec![9.4, 18.5, 109.0]),
        },
        calibration: None,
    };
    Ok(doc.to_bytes()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("registry-demo")?;

    let store = Arc::new(MemoryArtifactStore::new());
    store.put("heart", "2.0.0", heart_bundle()?);
    let versions = Arc::new(StaticVersions::new([("heart", "2.0.0")]));
    let registry = ModelRegistry::new(store, versions, RegistryConfig::default());

    let bundle = registry.get_active("heart").await?;
    let patient = FeatureVector::new().with("age", 64.0).with("resting_bp", 160.0).with("cholesterol", 310.0);
    let result = score(&bundle, &patient)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    println!("{}", recommendation(result.prediction, result.confidence_level, &result.domain));
    for factor in &result.top_factors {
        println!("  - {}", interpretation(factor));
    }
    for tip in lifestyle_tips(&result.top_factors, result.prediction) {
        println!("  * {tip}");
    }
    for warning in warnings(bundle.metadata(), &patient) {
        println!("  ! {warning}");
    }

    let improved = FeatureVector::new().with("age", 64.0).with("resting_bp", 125.0).with("cholesterol", 190.0);
    let what_if = compare(&bundle, &patient, &improved)?;
    println!("probability change: {:+.3} ({})", what_if.probability_change, what_if.key_changes.join(", "));
    println!("{DISCLAIMER}");

    registry.shutdown();
    Ok(())
}
