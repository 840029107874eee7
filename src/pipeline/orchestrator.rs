//! Detection orchestrator.
//!
//! Single entry point that drives one photo through the pipeline:
//! validate → (quality ∥ preprocess) → classify → resolve → gate.
//!
//! Uses trait-based DI for every stage (QualityAssessor, ImagePreprocessor,
//! ImageScorer) so the orchestrator stays fully testable with mocks. Only
//! invalid input fails a request; every other failure degrades the result.

use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::{DetectionConfig, GatingPolicy};

use super::classify::{scorer::ImageScorer, taxonomy, Classification, DiseaseClassifier};
use super::error::{InvalidInputError, ModelUnavailableError};
use super::preprocess::{ImagePreprocessor, ImageTensor, LetterboxPreprocessor};
use super::quality::{HeuristicQualityAssessor, QualityAssessor, QualityReport};
use super::recommend::{
    quality_caveat, DiseaseInfo, RecommendationResolver, ReferenceTable,
    REPHOTOGRAPH_RECOMMENDATION,
};
use super::types::{
    CropType, DegradedReason, DetectionResult, DetectionStatus, ImageFormat, QualityVerdict,
    HEALTHY_LABEL, UNAVAILABLE_LABEL,
};
use super::validate::{validate_image, DecodedImage, ValidationLimits};

pub const UNAVAILABLE_MESSAGE: &str =
    "Disease detection is currently unavailable. Please try again later \
     or consult a local agricultural extension officer";

// ═══════════════════════════════════════════════════════════
// State machine
// ═══════════════════════════════════════════════════════════

/// Lifecycle of one detection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Validated,
    Preprocessed,
    Classified,
    Resolved,
    Completed,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Preprocessed => "preprocessed",
            Self::Classified => "classified",
            Self::Resolved => "resolved",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stages advance strictly forward; `Failed` is reachable from any
    /// non-terminal stage.
    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Received, Validated)
            | (Validated, Preprocessed)
            | (Preprocessed, Classified)
            | (Classified, Resolved)
            | (Resolved, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request stage cursor. Logs every transition.
struct StageTracker {
    crop: Option<CropType>,
    stage: PipelineStage,
}

impl StageTracker {
    fn new(crop: Option<CropType>) -> Self {
        Self {
            crop,
            stage: PipelineStage::Received,
        }
    }

    fn crop_str(&self) -> &'static str {
        self.crop.map(|c| c.as_str()).unwrap_or("unknown")
    }

    fn advance(&mut self, next: PipelineStage) {
        debug_assert!(
            self.stage.can_transition_to(next),
            "illegal transition {} -> {}",
            self.stage,
            next
        );
        debug!(
            crop = self.crop_str(),
            from = self.stage.as_str(),
            stage = next.as_str(),
            "Pipeline stage"
        );
        self.stage = next;
    }

    fn fail(&mut self, err: &InvalidInputError) {
        warn!(
            crop = self.crop_str(),
            stage = self.stage.as_str(),
            reason = err.reason(),
            error = %err,
            "Detection rejected"
        );
        self.advance(PipelineStage::Failed);
    }
}

// ═══════════════════════════════════════════════════════════
// DetectionPipeline
// ═══════════════════════════════════════════════════════════

/// Diagnosis fields filled by the classify and resolve stages.
struct Diagnosis {
    disease: String,
    display_name: String,
    confidence: f32,
    is_diseased: bool,
    recommendations: Vec<String>,
    disease_info: Option<DiseaseInfo>,
    low_confidence: bool,
    status: DetectionStatus,
    degraded_reason: Option<DegradedReason>,
    message: Option<String>,
    all_predictions: Vec<super::types::LabelScore>,
}

/// Crop disease detection pipeline. Shared across requests as `Arc`.
pub struct DetectionPipeline {
    config: DetectionConfig,
    assessor: Arc<dyn QualityAssessor>,
    preprocessor: Arc<dyn ImagePreprocessor>,
    classifier: DiseaseClassifier,
    resolver: RecommendationResolver,
    reference: Arc<ReferenceTable>,
}

impl DetectionPipeline {
    /// Production stages built from `config`, scoring with `scorer`.
    pub fn new(
        config: DetectionConfig,
        scorer: Arc<dyn ImageScorer>,
        reference: Arc<ReferenceTable>,
    ) -> Self {
        let assessor = Arc::new(HeuristicQualityAssessor::new(&config.policy));
        let preprocessor = Arc::new(LetterboxPreprocessor::new(config.model_input.clone()));
        let classifier = DiseaseClassifier::new(scorer, config.inference_timeout);
        let resolver = RecommendationResolver::new(Arc::clone(&reference), config.policy.clone());
        Self {
            config,
            assessor,
            preprocessor,
            classifier,
            resolver,
            reference,
        }
    }

    pub fn with_fallback_scorer(mut self, fallback: Arc<dyn ImageScorer>) -> Self {
        self.classifier = self.classifier.with_fallback(fallback);
        self
    }

    pub fn with_quality_assessor(mut self, assessor: Arc<dyn QualityAssessor>) -> Self {
        self.assessor = assessor;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn ImagePreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    // ── Lookup operations ──

    pub fn supported_crops(&self) -> &'static [CropType] {
        &CropType::ALL
    }

    pub fn labels_for(&self, crop: CropType) -> &'static [taxonomy::TaxonomyEntry] {
        taxonomy::labels_for(crop)
    }

    /// Reference entry for a (crop, label) pair, without running detection.
    pub fn disease_info(&self, crop: CropType, label: &str) -> Option<DiseaseInfo> {
        self.reference.get(crop, label).cloned()
    }

    // ── Detection ──

    /// Run detection on raw upload bytes with caller-supplied strings.
    ///
    /// `declared_format` accepts a MIME type, `jpeg`/`jpg`/`png`, or a file
    /// extension. `crop_type` is case-insensitive.
    pub async fn detect(
        &self,
        image_bytes: &[u8],
        declared_format: &str,
        crop_type: &str,
    ) -> Result<DetectionResult, InvalidInputError> {
        let parsed = crop_type
            .parse::<CropType>()
            .and_then(|crop| Ok((crop, ImageFormat::from_hint(declared_format)?)));

        match parsed {
            Ok((crop, format)) => self.detect_typed(image_bytes, format, crop).await,
            Err(e) => {
                StageTracker::new(crop_type.parse().ok()).fail(&e);
                Err(e)
            }
        }
    }

    /// Run detection with already-parsed format and crop.
    pub async fn detect_typed(
        &self,
        image_bytes: &[u8],
        format: ImageFormat,
        crop: CropType,
    ) -> Result<DetectionResult, InvalidInputError> {
        let started = Instant::now();
        let mut stage = StageTracker::new(Some(crop));

        info!(
            crop = crop.as_str(),
            format = format.as_str(),
            bytes = image_bytes.len(),
            "Detection started"
        );

        let decoded = match validate_image(image_bytes, format, &self.limits()) {
            Ok(decoded) => decoded,
            Err(e) => {
                stage.fail(&e);
                return Err(e);
            }
        };
        stage.advance(PipelineStage::Validated);

        let image_fingerprint = fingerprint(image_bytes);
        let image = decoded.metadata();

        let (quality, tensor) = self.assess_and_preprocess(Arc::new(decoded)).await;
        stage.advance(PipelineStage::Preprocessed);

        let classification = match tensor {
            Ok(tensor) => self.classifier.classify(Arc::new(tensor), crop).await,
            Err(e) => Err(e),
        };
        stage.advance(PipelineStage::Classified);

        let mut diagnosis = match classification {
            Ok(classification) => self.resolve(classification),
            Err(e) => unavailable(crop, &e),
        };
        stage.advance(PipelineStage::Resolved);

        apply_gating(
            &mut diagnosis.recommendations,
            &diagnosis.disease,
            diagnosis.confidence,
            &quality,
            &self.config.policy,
        );
        stage.advance(PipelineStage::Completed);

        info!(
            crop = crop.as_str(),
            label = %diagnosis.disease,
            confidence = diagnosis.confidence,
            verdict = quality.verdict.as_str(),
            degraded = diagnosis.status == DetectionStatus::Degraded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Detection completed"
        );

        Ok(DetectionResult {
            crop_type: crop,
            is_diseased: diagnosis.is_diseased,
            disease: diagnosis.disease,
            display_name: diagnosis.display_name,
            confidence: diagnosis.confidence,
            image_quality: quality.verdict,
            recommendations: diagnosis.recommendations,
            disease_info: diagnosis.disease_info,
            low_confidence: diagnosis.low_confidence,
            status: diagnosis.status,
            degraded_reason: diagnosis.degraded_reason,
            message: diagnosis.message,
            all_predictions: diagnosis.all_predictions,
            quality,
            image,
            image_fingerprint,
        })
    }

    fn limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_bytes: self.config.max_image_bytes,
            min_dimension: self.config.min_dimension,
            max_dimension: self.config.max_dimension,
        }
    }

    /// Quality and preprocessing are independent reads of the decoded image;
    /// run both on the blocking pool at once.
    async fn assess_and_preprocess(
        &self,
        image: Arc<DecodedImage>,
    ) -> (QualityReport, Result<ImageTensor, ModelUnavailableError>) {
        let assessor = Arc::clone(&self.assessor);
        let quality_image = Arc::clone(&image);
        let quality_task = tokio::task::spawn_blocking(move || assessor.assess(&quality_image));

        let preprocessor = Arc::clone(&self.preprocessor);
        let preprocess_task = tokio::task::spawn_blocking(move || preprocessor.preprocess(&image));

        let (quality, tensor) = tokio::join!(quality_task, preprocess_task);

        let quality = quality.unwrap_or_else(|e| {
            warn!(error = %e, "Quality assessment failed, treating image as poor");
            QualityReport::unassessed()
        });

        let tensor = match tensor {
            Ok(Ok(tensor)) => Ok(tensor),
            Ok(Err(e)) => Err(ModelUnavailableError::Backend(format!(
                "Preprocessing failed: {e}"
            ))),
            Err(e) => Err(ModelUnavailableError::Backend(format!(
                "Preprocessing task failed: {e}"
            ))),
        };

        (quality, tensor)
    }

    fn resolve(&self, classification: Classification) -> Diagnosis {
        let Classification {
            crop,
            label,
            display_name,
            confidence,
            distribution,
            ..
        } = classification;

        let base = Diagnosis {
            disease: label.to_string(),
            display_name: display_name.to_string(),
            confidence,
            is_diseased: label != HEALTHY_LABEL,
            recommendations: Vec::new(),
            disease_info: None,
            low_confidence: confidence < self.config.policy.moderate_confidence,
            status: DetectionStatus::Completed,
            degraded_reason: None,
            message: None,
            all_predictions: distribution,
        };

        match self.resolver.resolve(crop, label, confidence) {
            Ok(resolution) => Diagnosis {
                recommendations: resolution.recommendations,
                disease_info: resolution.disease_info,
                low_confidence: resolution.low_confidence,
                ..base
            },
            Err(e) => {
                warn!(crop = crop.as_str(), label, error = %e, "No reference entry for diagnosis");
                Diagnosis {
                    status: DetectionStatus::Degraded,
                    degraded_reason: Some(DegradedReason::UnknownDisease),
                    message: Some(format!(
                        "Detailed information for {display_name} is not available. \
                         Consult a local agricultural extension officer"
                    )),
                    ..base
                }
            }
        }
    }
}

/// Sentinel diagnosis when no scorer produced a classification.
fn unavailable(crop: CropType, err: &ModelUnavailableError) -> Diagnosis {
    warn!(crop = crop.as_str(), error = %err, "Classification unavailable, returning degraded result");
    Diagnosis {
        disease: UNAVAILABLE_LABEL.to_string(),
        display_name: "Unavailable".to_string(),
        confidence: 0.0,
        is_diseased: false,
        recommendations: Vec::new(),
        disease_info: None,
        low_confidence: true,
        status: DetectionStatus::Degraded,
        degraded_reason: Some(DegradedReason::ModelUnavailable),
        message: Some(UNAVAILABLE_MESSAGE.to_string()),
        all_predictions: Vec::new(),
    }
}

/// Final gating over the resolved recommendations.
///
/// - below `moderate_confidence` any non-healthy result carries the
///   re-photograph advice;
/// - a poor photo below `quality_caveat_below` gets the quality caveat first.
pub fn apply_gating(
    recommendations: &mut Vec<String>,
    disease: &str,
    confidence: f32,
    quality: &QualityReport,
    policy: &GatingPolicy,
) {
    if confidence < policy.moderate_confidence
        && disease != HEALTHY_LABEL
        && !recommendations.iter().any(|r| r == REPHOTOGRAPH_RECOMMENDATION)
    {
        recommendations.push(REPHOTOGRAPH_RECOMMENDATION.to_string());
    }

    if quality.verdict == QualityVerdict::Poor && confidence < policy.quality_caveat_below {
        recommendations.insert(0, quality_caveat(&quality.warnings));
    }
}

/// SHA-256 of the raw upload, base64.
pub fn fingerprint(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    base64::engine::general_purpose::STANDARD.encode(hash)
}
