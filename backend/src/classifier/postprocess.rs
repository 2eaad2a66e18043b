use std::collections::HashMap;

use shared::{ClassProbabilities, PredictionResult};
use tch::{Kind, Tensor};

use super::advice;
use super::ClassifierError;

/// Softmax over a logits vector (any shape with a single non-unit dimension).
pub fn probabilities(logits: &Tensor) -> Result<Vec<f32>, ClassifierError> {
    let probs = logits
        .f_view([-1])
        .and_then(|flat| flat.f_softmax(-1, Kind::Float))
        .map_err(|e| ClassifierError::Inference(e.to_string()))?;
    Vec::<f32>::try_from(&probs).map_err(|e| ClassifierError::Inference(e.to_string()))
}

/// Index of the largest value; the first one wins on ties. NaN counts as
/// the maximum, so the first NaN is returned when present.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            return Some(i);
        }
        match best {
            Some(b) if v <= values[b] => {}
            _ => best = Some(i),
        }
    }
    best
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

pub fn build_result(
    probabilities: &[f32],
    class_names: &[String],
    disease_info: &HashMap<String, serde_json::Value>,
) -> Result<PredictionResult, ClassifierError> {
    if probabilities.len() != class_names.len() {
        return Err(ClassifierError::Inference(format!(
            "network produced {} scores for {} classes",
            probabilities.len(),
            class_names.len()
        )));
    }
    if let Some(i) = probabilities.iter().position(|p| !p.is_finite()) {
        return Err(ClassifierError::Inference(format!(
            "non-finite probability for class `{}`",
            class_names[i]
        )));
    }
    let class_index = argmax(probabilities)
        .ok_or_else(|| ClassifierError::Inference("empty probability vector".into()))?;

    let predicted_class = class_names[class_index].clone();
    let confidence = f64::from(probabilities[class_index]);

    let all_probabilities = ClassProbabilities(
        class_names
            .iter()
            .zip(probabilities)
            .map(|(name, &p)| (name.clone(), round4(f64::from(p))))
            .collect(),
    );

    Ok(PredictionResult {
        is_healthy: advice::is_healthy(&predicted_class),
        recommendation: advice::recommend(&predicted_class, confidence).to_string(),
        disease_info: disease_info
            .get(&predicted_class)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({})),
        confidence: round4(confidence),
        all_probabilities,
        class_index,
        predicted_class,
    })
}
