pub mod inference;
pub mod labels;
pub mod model_manager;

use crate::error::AppError;
use crate::models::classify_types::PredictionSet;
use crate::services::image_loader;
use model_manager::ModelManager;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Maps an image on disk to its top-K labels. Implementations block; callers
/// run them off the async executor.
pub trait ImageClassifier: Send + Sync {
    fn classify(&self, path: &Path, top_k: usize) -> Result<PredictionSet, AppError>;
}

/// ImageNet classifier backed by an ONNX Runtime session.
#[derive(Clone)]
pub struct OnnxClassifier {
    manager: ModelManager,
}

impl OnnxClassifier {
    pub fn new(manager: ModelManager) -> Self {
        Self { manager }
    }
}

impl ImageClassifier for OnnxClassifier {
    fn classify(&self, path: &Path, top_k: usize) -> Result<PredictionSet, AppError> {
        let start = Instant::now();
        let tensor = image_loader::load_model_input(path, &self.manager.config().input)?;

        let predictions = self.manager.with_model(|session, labels| {
            let scores = inference::run_inference_with_model(session, tensor)?;
            let probabilities = inference::to_probabilities(&scores);
            Ok(inference::rank_top_k(&probabilities, labels, top_k))
        })?;

        debug!(
            "Classified {} in {:.0} ms: {:?}",
            path.display(),
            start.elapsed().as_secs_f64() * 1000.0,
            predictions.labels()
        );
        Ok(predictions)
    }
}
