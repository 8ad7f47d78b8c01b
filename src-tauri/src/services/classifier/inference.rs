use crate::error::AppError;
use crate::models::classify_types::{Prediction, PredictionSet};
use crate::services::classifier::labels::{format_label, LabelMap};
use crate::services::classifier::model_manager::OnnxModel;
use ndarray::Array4;
use ort::value::Value;
use std::cmp::Ordering;

/// Runs one forward pass and returns the raw scores of the first output.
pub fn run_inference_with_model(model: &mut OnnxModel, input: Array4<f32>) -> Result<Vec<f32>, AppError> {
    // Get the input name from the model (assuming single input)
    let input_name = model.inputs()[0].name().to_string();

    let input_tensor = Value::from_array(input)
        .map_err(|e| AppError::model(format!("Failed to create tensor value: {}", e)))?;

    let outputs = model
        .run(ort::inputs![input_name.as_str() => input_tensor])
        .map_err(|e| AppError::model(format!("Inference failed: {}", e)))?;

    let output_value = outputs
        .values()
        .next()
        .ok_or_else(|| AppError::model("Model produced no outputs"))?;

    let (_, data) = output_value
        .try_extract_tensor::<f32>()
        .map_err(|e| AppError::model(format!("Failed to extract output tensor: {}", e)))?;

    Ok(data.to_vec())
}

/// Converts model scores to probabilities.
///
/// Models exported with a softmax head already emit a distribution; those are
/// passed through untouched. Anything else is treated as logits.
pub fn to_probabilities(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let in_range = scores.iter().all(|&x| (0.0..=1.0).contains(&x));
    let sum: f32 = scores.iter().sum();
    if in_range && (sum - 1.0).abs() < 1e-3 {
        return scores.to_vec();
    }

    let max_logit = scores.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exps: Vec<f32> = scores.iter().map(|&x| (x - max_logit).exp()).collect();
    let exp_sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / exp_sum).collect()
}

/// Picks the `top_k` most confident classes, highest first.
///
/// The sort is stable, so equal confidences keep the model's class order.
pub fn rank_top_k(probabilities: &[f32], labels: &LabelMap, top_k: usize) -> PredictionSet {
    let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let top_k = top_k.min(indexed.len());
    let predictions = indexed[..top_k]
        .iter()
        .map(|&(idx, confidence)| {
            let raw_label = labels.name_or_placeholder(idx);
            Prediction {
                class_index: idx,
                synset: labels.get(idx).and_then(|l| l.synset.clone()),
                label: format_label(&raw_label),
                raw_label,
                confidence,
            }
        })
        .collect();

    PredictionSet::new(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelMap {
        LabelMap::from_json(
            r#"{"0": ["n01440764", "tench"], "1": ["n01443537", "goldfish"],
                "2": ["n01484850", "great_white_shark"], "3": ["n01491361", "tiger_shark"]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_softmax_on_logits() {
        let probs = to_probabilities(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_distribution_passes_through() {
        let scores = [0.1, 0.7, 0.2];
        assert_eq!(to_probabilities(&scores), scores.to_vec());
    }

    #[test]
    fn test_large_logits_stay_finite() {
        let probs = to_probabilities(&[1000.0, 999.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_top_k_descending_with_display_labels() {
        let set = rank_top_k(&[0.05, 0.1, 0.6, 0.25], &labels(), 3);
        assert_eq!(set.len(), 3);
        assert_eq!(set.labels(), vec!["great white shark", "tiger shark", "goldfish"]);
        assert_eq!(set.top().unwrap().raw_label, "great_white_shark");
        assert_eq!(set.top().unwrap().synset.as_deref(), Some("n01484850"));
        let confidences: Vec<f32> = set.predictions.iter().map(|p| p.confidence).collect();
        assert!(confidences.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_ties_keep_class_order() {
        let set = rank_top_k(&[0.25, 0.25, 0.25, 0.25], &labels(), 3);
        let indices: Vec<usize> = set.predictions.iter().map(|p| p.class_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_top_k_larger_than_classes() {
        let set = rank_top_k(&[0.5, 0.5], &labels(), 10);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let scores = [0.3, 0.3, 0.2, 0.2];
        let first = rank_top_k(&scores, &labels(), 3);
        for _ in 0..5 {
            assert_eq!(rank_top_k(&scores, &labels(), 3), first);
        }
    }

    #[test]
    fn test_unknown_index_gets_placeholder() {
        let small = LabelMap::from_json(r#"{"0": "tench"}"#).unwrap();
        let set = rank_top_k(&[0.1, 0.9], &small, 1);
        assert_eq!(set.top().unwrap().label, "class 1");
        assert_eq!(set.top().unwrap().raw_label, "class_1");
    }
}
