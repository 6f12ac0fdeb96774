//! Plain-language guidance derived from a prediction.

use crate::bundle::BundleMetadata;
use crate::inference::{ConfidenceLevel, FeatureContribution, FeatureVector};

pub const DISCLAIMER: &str = "This is a screening tool only. Results do not constitute medical diagnosis. \
                              Please consult a healthcare professional for proper evaluation.";

const MAX_TIPS: usize = 4;
const TIP_FACTORS: usize = 3;
const TIP_MIN_CONTRIBUTION: f64 = 0.1;
const MINIMAL_IMPACT: f64 = 0.01;

// first match wins
const KEYWORD_TIPS: &[(&[&str], &str)] = &[
    (&["glucose"], "Consider reducing sugar intake and increasing physical activity"),
    (&["bmi", "weight"], "Maintaining a healthy weight can significantly reduce health risks"),
    (&["pressure", "bp"], "Monitor blood pressure regularly and consider reducing sodium intake"),
    (&["cholesterol"], "Focus on heart-healthy foods and regular cardiovascular exercise"),
    (&["smoking"], "Smoking cessation is one of the most impactful health improvements"),
    (&["alcohol"], "Moderate alcohol consumption can benefit overall health"),
    (&["age"], "Regular health screenings become more important with age"),
];

pub fn recommendation(prediction: u8, confidence: ConfidenceLevel, domain: &str) -> String {
    match (prediction, confidence) {
        (0, ConfidenceLevel::High) => format!(
            "Based on the provided data, your {domain} risk appears low. \
             Continue maintaining a healthy lifestyle. Regular check-ups are still recommended."
        ),
        (0, _) => format!(
            "Your {domain} risk appears low, but the model's confidence is limited. \
             Consider discussing your risk factors with a healthcare provider."
        ),
        (_, ConfidenceLevel::High) => format!(
            "The analysis indicates elevated {domain} risk factors. \
             We strongly recommend consulting a healthcare professional for proper evaluation and testing."
        ),
        (_, ConfidenceLevel::Medium) => format!(
            "Some {domain} risk factors were detected. \
             Consider scheduling a check-up with your doctor to discuss these findings."
        ),
        (_, ConfidenceLevel::Low) => format!(
            "The results are inconclusive regarding {domain} risk. \
             This screening cannot provide a clear assessment. Please consult a healthcare provider."
        ),
    }
}

/// Tips keyed off the leading risk-raising factors, at most four.
pub fn lifestyle_tips(top_factors: &[FeatureContribution], prediction: u8) -> Vec<String> {
    let mut tips = Vec::new();
    if prediction == 0 {
        tips.push("Continue your current healthy habits".to_string());
    }
    for factor in top_factors.iter().take(TIP_FACTORS).filter(|f| f.contribution > TIP_MIN_CONTRIBUTION) {
        let name = factor.feature_name.to_lowercase();
        if let Some((_, tip)) = KEYWORD_TIPS.iter().find(|(keys, _)| keys.iter().any(|k| name.contains(k))) {
            tips.push(tip.to_string());
        }
    }
    if tips.is_empty() {
        tips.push("Maintain a balanced diet and regular exercise routine".to_string());
        tips.push("Schedule regular check-ups with your healthcare provider".to_string());
    }
    tips.truncate(MAX_TIPS);
    tips
}

/// One-line reading of a single attribution.
pub fn interpretation(factor: &FeatureContribution) -> String {
    if factor.contribution.abs() < MINIMAL_IMPACT {
        format!("{} had minimal impact on the prediction", factor.display_name)
    } else if factor.contribution > 0.0 {
        format!("{} ({:.1}) increased risk assessment", factor.display_name, factor.value)
    } else {
        format!("{} ({:.1}) decreased risk assessment", factor.display_name, factor.value)
    }
}

/// Clinical warnings for the submitted values, in feature declaration order.
/// Each feature reports at most its first matching rule; absent values are skipped.
pub fn warnings(metadata: &BundleMetadata, features: &FeatureVector) -> Vec<String> {
    metadata
        .features
        .iter()
        .filter_map(|spec| {
            let value = features.get(&spec.name)?;
            let rule = spec.warnings.iter().find(|r| r.matches(value))?;
            Some(rule.render(&spec.display_name(), value))
        })
        .collect()
}
