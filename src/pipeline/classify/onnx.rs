//! ONNX Runtime scorer, behind the `onnx-classifier` feature.
//!
//! Expects one model per crop in the model directory, named `<crop>.onnx`
//! (e.g. `rice.onnx`). Each model takes a `[1, 3, N, N]` float tensor and
//! emits `[1, labels]` scores in taxonomy order. Logits are fine: the
//! adapter softmax-normalizes anything that is not already a distribution.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::TensorRef;

use super::scorer::ImageScorer;
use super::taxonomy::labels_for;
use crate::pipeline::error::ScorerError;
use crate::pipeline::preprocess::ImageTensor;
use crate::pipeline::types::CropType;

/// Per-crop ONNX sessions.
///
/// Uses interior mutability (Mutex) because `Session::run` requires `&mut self`
/// while `ImageScorer` exposes `&self` for shared usage across requests.
pub struct OnnxScorer {
    sessions: HashMap<CropType, Mutex<Session>>,
}

impl OnnxScorer {
    /// Load every `<crop>.onnx` present in `model_dir`.
    ///
    /// Crops without a model file stay unconfigured. Fails only when no model
    /// at all could be found.
    pub fn load(model_dir: &Path) -> Result<Self, ScorerError> {
        let mut sessions = HashMap::new();

        for crop in CropType::ALL {
            let model_path = model_dir.join(format!("{}.onnx", crop.as_str()));
            if !model_path.exists() {
                tracing::debug!(crop = crop.as_str(), path = %model_path.display(), "No model file");
                continue;
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| ScorerError::ModelInit(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| ScorerError::ModelInit(e.to_string()))?
                .commit_from_file(&model_path)
                .map_err(|e: ort::Error| {
                    ScorerError::ModelInit(format!("ONNX load failed for {crop}: {e}"))
                })?;

            tracing::info!(crop = crop.as_str(), path = %model_path.display(), "ONNX model loaded");
            sessions.insert(crop, Mutex::new(session));
        }

        if sessions.is_empty() {
            return Err(ScorerError::ModelNotFound(model_dir.to_path_buf()));
        }
        Ok(Self { sessions })
    }

    pub fn loaded_crops(&self) -> Vec<CropType> {
        let mut crops: Vec<_> = self.sessions.keys().copied().collect();
        crops.sort();
        crops
    }
}

impl ImageScorer for OnnxScorer {
    fn score(&self, tensor: &ImageTensor, crop: CropType) -> Result<Vec<f32>, ScorerError> {
        let session = self
            .sessions
            .get(&crop)
            .ok_or(ScorerError::ModelNotLoaded(crop))?;

        let input = TensorRef::from_array_view(tensor.array())
            .map_err(|e| ScorerError::Inference(e.to_string()))?;

        let mut session = session
            .lock()
            .map_err(|_| ScorerError::Inference("Session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ScorerError::Inference(format!("ONNX inference failed: {e}")))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ScorerError::Inference(format!("Output extraction: {e}")))?;

        let expected = labels_for(crop).len();
        let elements: i64 = shape.iter().product();
        if elements as usize != expected {
            return Err(ScorerError::Inference(format!(
                "Unexpected output shape: {shape:?}, expected [1, {expected}]"
            )));
        }

        Ok(data.to_vec())
    }

    fn name(&self) -> &str {
        "onnx"
    }
}
