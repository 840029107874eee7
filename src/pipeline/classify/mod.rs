//! Disease classifier adapter.
//!
//! Thin, swappable boundary around an injected `ImageScorer`. Runs the scorer
//! on the blocking pool under a timeout, tries a fallback scorer when the
//! primary is unavailable, and maps the raw scores onto the crop's taxonomy.
//! No learning happens here.

pub mod scorer;
pub mod taxonomy;
#[cfg(feature = "onnx-classifier")]
pub mod onnx;

pub use scorer::{ImageScorer, MockScorer, UnconfiguredScorer};
pub use taxonomy::{labels_for, TaxonomyEntry};
#[cfg(feature = "onnx-classifier")]
pub use onnx::OnnxScorer;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::ModelUnavailableError;
use super::preprocess::ImageTensor;
use super::types::{CropType, LabelScore};

/// Tolerance on the sum of a normalized distribution.
pub const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

/// Which scorer produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Primary,
    Fallback,
}

/// Adapter output: top label plus the full distribution in taxonomy order.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub crop: CropType,
    pub label: &'static str,
    pub display_name: &'static str,
    pub confidence: f32,
    pub distribution: Vec<LabelScore>,
    pub source: ScoreSource,
}

pub struct DiseaseClassifier {
    primary: Arc<dyn ImageScorer>,
    fallback: Option<Arc<dyn ImageScorer>>,
    timeout: Duration,
}

impl DiseaseClassifier {
    pub fn new(primary: Arc<dyn ImageScorer>, timeout: Duration) -> Self {
        Self {
            primary,
            fallback: None,
            timeout,
        }
    }

    /// Secondary scorer tried when the primary is unavailable.
    pub fn with_fallback(mut self, fallback: Arc<dyn ImageScorer>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Score `tensor` for `crop`, giving up with `ModelUnavailableError`
    /// only when every configured scorer failed.
    pub async fn classify(
        &self,
        tensor: Arc<ImageTensor>,
        crop: CropType,
    ) -> Result<Classification, ModelUnavailableError> {
        let primary_err = match self
            .run_scorer(&self.primary, Arc::clone(&tensor), crop, ScoreSource::Primary)
            .await
        {
            Ok(classification) => return Ok(classification),
            Err(e) => e,
        };

        warn!(
            crop = crop.as_str(),
            scorer = self.primary.name(),
            error = %primary_err,
            "Primary scorer unavailable"
        );

        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };

        self.run_scorer(fallback, tensor, crop, ScoreSource::Fallback)
            .await
            .inspect_err(|e| {
                warn!(
                    crop = crop.as_str(),
                    scorer = fallback.name(),
                    error = %e,
                    "Fallback scorer unavailable"
                );
            })
    }

    async fn run_scorer(
        &self,
        scorer: &Arc<dyn ImageScorer>,
        tensor: Arc<ImageTensor>,
        crop: CropType,
        source: ScoreSource,
    ) -> Result<Classification, ModelUnavailableError> {
        let scorer = Arc::clone(scorer);
        let task = tokio::task::spawn_blocking(move || scorer.score(&tensor, crop));

        // A timed-out task keeps running on the blocking pool; its output is dropped.
        let raw = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => return Err(ModelUnavailableError::Timeout(self.timeout)),
            Ok(Err(join_err)) => {
                return Err(ModelUnavailableError::Backend(format!(
                    "Scoring task failed: {join_err}"
                )))
            }
            Ok(Ok(result)) => result?,
        };

        interpret_scores(crop, &raw, source)
    }
}

/// Map raw scorer output onto the crop's taxonomy and pick the top label.
pub fn interpret_scores(
    crop: CropType,
    raw: &[f32],
    source: ScoreSource,
) -> Result<Classification, ModelUnavailableError> {
    let entries = labels_for(crop);
    let probabilities = normalize_distribution(raw, entries.len())?;
    let top = argmax_first(&probabilities);

    let distribution = entries
        .iter()
        .zip(&probabilities)
        .map(|(entry, &probability)| LabelScore {
            label: entry.label.to_string(),
            display_name: entry.display_name.to_string(),
            probability,
        })
        .collect();

    Ok(Classification {
        crop,
        label: entries[top].label,
        display_name: entries[top].display_name,
        confidence: probabilities[top].clamp(0.0, 1.0),
        distribution,
        source,
    })
}

/// Validate a scorer's output as a distribution over `expected_len` labels.
///
/// - every value in [0,1], sum within `DISTRIBUTION_TOLERANCE` of 1: unchanged;
/// - every value in [0,1] with a positive sum: divided by the sum (rounded
///   exports, sigmoid heads);
/// - any value outside [0,1]: treated as logits and softmax-normalized.
///
/// All-zero output carries no signal and is malformed.
pub fn normalize_distribution(
    raw: &[f32],
    expected_len: usize,
) -> Result<Vec<f32>, ModelUnavailableError> {
    if raw.len() != expected_len {
        return Err(ModelUnavailableError::MalformedOutput(format!(
            "expected {expected_len} scores, got {}",
            raw.len()
        )));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(ModelUnavailableError::MalformedOutput(
            "non-finite score".into(),
        ));
    }

    if !raw.iter().all(|v| (0.0..=1.0).contains(v)) {
        return Ok(softmax(raw));
    }

    let sum: f32 = raw.iter().sum();
    if (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE {
        return Ok(raw.to_vec());
    }
    if sum <= 0.0 {
        return Err(ModelUnavailableError::MalformedOutput(
            "all scores are zero".into(),
        ));
    }
    Ok(raw.iter().map(|v| v / sum).collect())
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the maximum; ties go to the earliest index.
pub fn argmax_first(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::HEALTHY_LABEL;
    use ndarray::Array4;

    fn tensor() -> Arc<ImageTensor> {
        Arc::new(ImageTensor::new(Array4::zeros((1, 3, 8, 8)), 8, 8).unwrap())
    }

    fn classifier(scorer: MockScorer) -> DiseaseClassifier {
        DiseaseClassifier::new(Arc::new(scorer), Duration::from_millis(200))
    }

    // ── normalize / argmax ──

    #[test]
    fn normalized_input_passes_through() {
        let probs = normalize_distribution(&[0.1, 0.2, 0.3, 0.15, 0.25], 5).unwrap();
        assert_eq!(probs, vec![0.1, 0.2, 0.3, 0.15, 0.25]);
    }

    #[test]
    fn logits_are_softmaxed() {
        let probs = normalize_distribution(&[2.0, 1.0, 0.0, -1.0, -3.0], 5).unwrap();
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);
    }

    #[test]
    fn in_range_scores_are_renormalized_not_softmaxed() {
        let probs = normalize_distribution(&[0.05, 0.0, 0.81, 0.05, 0.04], 5).unwrap();
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!((probs[2] - 0.81 / 0.95).abs() < 1e-5, "{probs:?}");
        assert_eq!(probs[1], 0.0);
    }

    #[test]
    fn sigmoid_head_keeps_its_top_label_confident() {
        let c = interpret_scores(
            CropType::Rice,
            &[0.05, 0.0, 0.81, 0.05, 0.04],
            ScoreSource::Primary,
        )
        .unwrap();
        assert_eq!(c.label, "bacterial_blight");
        assert!(c.confidence > 0.85, "confidence {}", c.confidence);
    }

    #[test]
    fn over_unit_sum_in_range_is_renormalized() {
        let probs = normalize_distribution(&[0.9, 0.6, 0.3, 0.2, 0.0], 5).unwrap();
        assert!((probs[0] - 0.45).abs() < 1e-5);
        assert!((probs[1] - 0.3).abs() < 1e-5);
    }

    #[test]
    fn all_zero_is_malformed() {
        assert!(matches!(
            normalize_distribution(&[0.0; 5], 5),
            Err(ModelUnavailableError::MalformedOutput(_))
        ));
    }

    #[test]
    fn wrong_length_is_malformed() {
        assert!(matches!(
            normalize_distribution(&[0.5, 0.5], 5),
            Err(ModelUnavailableError::MalformedOutput(_))
        ));
    }

    #[test]
    fn nan_is_malformed() {
        assert!(matches!(
            normalize_distribution(&[f32::NAN, 0.0, 0.0, 0.0, 1.0], 5),
            Err(ModelUnavailableError::MalformedOutput(_))
        ));
    }

    #[test]
    fn argmax_ties_go_to_earliest() {
        assert_eq!(argmax_first(&[0.4, 0.4, 0.2]), 0);
        assert_eq!(argmax_first(&[0.1, 0.45, 0.45]), 1);
        assert_eq!(argmax_first(&[0.2]), 0);
    }

    #[test]
    fn interpret_maps_labels_in_order() {
        let c = interpret_scores(
            CropType::Rice,
            &[0.19, 0.0, 0.81, 0.0, 0.0],
            ScoreSource::Primary,
        )
        .unwrap();
        assert_eq!(c.label, "bacterial_blight");
        assert_eq!(c.display_name, "Bacterial Leaf Blight");
        assert!((c.confidence - 0.81).abs() < 1e-6);
        assert_eq!(c.distribution.len(), 5);
        assert_eq!(c.distribution[0].label, HEALTHY_LABEL);
    }

    #[test]
    fn uniform_distribution_resolves_to_healthy() {
        let c = interpret_scores(CropType::Wheat, &[0.2; 5], ScoreSource::Primary).unwrap();
        assert_eq!(c.label, HEALTHY_LABEL);
    }

    // ── DiseaseClassifier ──

    #[tokio::test]
    async fn classifies_with_primary() {
        let scorer = MockScorer::new()
            .with_distribution(CropType::Tomato, vec![0.92, 0.08, 0.0, 0.0, 0.0]);
        let c = classifier(scorer)
            .classify(tensor(), CropType::Tomato)
            .await
            .unwrap();
        assert_eq!(c.label, HEALTHY_LABEL);
        assert_eq!(c.source, ScoreSource::Primary);
    }

    #[tokio::test]
    async fn timeout_is_model_unavailable() {
        let scorer = MockScorer::new()
            .with_distribution(CropType::Rice, vec![1.0, 0.0, 0.0, 0.0, 0.0])
            .slow(Duration::from_millis(600));
        let err = DiseaseClassifier::new(Arc::new(scorer), Duration::from_millis(50))
            .classify(tensor(), CropType::Rice)
            .await
            .unwrap_err();
        assert_eq!(err, ModelUnavailableError::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn unconfigured_crop_is_unavailable() {
        let err = classifier(MockScorer::new())
            .classify(tensor(), CropType::Potato)
            .await
            .unwrap_err();
        assert_eq!(err, ModelUnavailableError::NotConfigured(CropType::Potato));
    }

    #[tokio::test]
    async fn fallback_used_when_primary_fails() {
        let fallback = Arc::new(
            MockScorer::new().with_distribution(CropType::Maize, vec![0.1, 0.1, 0.7, 0.05, 0.05]),
        );
        let c = DiseaseClassifier::new(Arc::new(MockScorer::failing("gpu lost")), Duration::from_secs(1))
            .with_fallback(fallback.clone())
            .classify(tensor(), CropType::Maize)
            .await
            .unwrap();
        assert_eq!(c.label, "common_rust");
        assert_eq!(c.source, ScoreSource::Fallback);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn fallback_not_called_when_primary_succeeds() {
        let fallback = Arc::new(MockScorer::new());
        let primary = MockScorer::new().with_distribution(CropType::Maize, vec![1.0, 0.0, 0.0, 0.0, 0.0]);
        classifier(primary)
            .with_fallback(fallback.clone())
            .classify(tensor(), CropType::Maize)
            .await
            .unwrap();
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn both_failing_reports_fallback_error() {
        let err = classifier(MockScorer::failing("primary down"))
            .with_fallback(Arc::new(UnconfiguredScorer))
            .classify(tensor(), CropType::Rice)
            .await
            .unwrap_err();
        assert_eq!(err, ModelUnavailableError::NotConfigured(CropType::Rice));
    }

    #[tokio::test]
    async fn malformed_output_is_unavailable() {
        let scorer = MockScorer::new().with_distribution(CropType::Rice, vec![1.0]);
        let err = classifier(scorer)
            .classify(tensor(), CropType::Rice)
            .await
            .unwrap_err();
        assert!(matches!(err, ModelUnavailableError::MalformedOutput(_)));
    }
}
