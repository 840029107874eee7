//! Scoring capability boundary.
//!
//! A scorer takes the preprocessed tensor and the crop and returns one score
//! per taxonomy label, in taxonomy order. It performs no mapping to labels;
//! that is the adapter's job. Implementations must be `Send + Sync` because a
//! single loaded scorer serves concurrent requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::pipeline::error::ScorerError;
use crate::pipeline::preprocess::ImageTensor;
use crate::pipeline::types::CropType;

/// Model-scoring capability: `score(tensor, crop) -> distribution`.
pub trait ImageScorer: Send + Sync {
    fn score(&self, tensor: &ImageTensor, crop: CropType) -> Result<Vec<f32>, ScorerError>;

    /// Short identifier for logs.
    fn name(&self) -> &str {
        "scorer"
    }
}

// ═══════════════════════════════════════════════════════════
// UnconfiguredScorer
// ═══════════════════════════════════════════════════════════

/// Stand-in when no model artifact is installed. Every call is unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredScorer;

impl ImageScorer for UnconfiguredScorer {
    fn score(&self, _tensor: &ImageTensor, crop: CropType) -> Result<Vec<f32>, ScorerError> {
        Err(ScorerError::ModelNotLoaded(crop))
    }

    fn name(&self) -> &str {
        "unconfigured"
    }
}

// ═══════════════════════════════════════════════════════════
// MockScorer (testing and demos)
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum MockBehavior {
    Fixed,
    Failing(String),
    Slow(Duration),
}

/// Scorer returning a fixed distribution per crop.
///
/// Crops without a configured distribution report `ModelNotLoaded`.
#[derive(Debug)]
pub struct MockScorer {
    distributions: HashMap<CropType, Vec<f32>>,
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockScorer {
    pub fn new() -> Self {
        Self {
            distributions: HashMap::new(),
            behavior: MockBehavior::Fixed,
            calls: AtomicUsize::new(0),
        }
    }

    /// Set the scores returned for `crop`, in taxonomy order.
    pub fn with_distribution(mut self, crop: CropType, scores: Vec<f32>) -> Self {
        self.distributions.insert(crop, scores);
        self
    }

    /// Every call fails with an inference error.
    pub fn failing(message: &str) -> Self {
        Self {
            behavior: MockBehavior::Failing(message.to_string()),
            ..Self::new()
        }
    }

    /// Sleep before answering, to exercise inference timeouts.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.behavior = MockBehavior::Slow(delay);
        self
    }

    /// Number of `score` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageScorer for MockScorer {
    fn score(&self, _tensor: &ImageTensor, crop: CropType) -> Result<Vec<f32>, ScorerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Failing(msg) => return Err(ScorerError::Inference(msg.clone())),
            MockBehavior::Slow(delay) => std::thread::sleep(*delay),
            MockBehavior::Fixed => {}
        }
        self.distributions
            .get(&crop)
            .cloned()
            .ok_or(ScorerError::ModelNotLoaded(crop))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
