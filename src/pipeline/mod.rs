//! Crop disease detection pipeline.
//!
//! validate → quality ∥ preprocess → classify → recommend → gate.
//! `orchestrator::DetectionPipeline` is the only entry point callers need.

pub mod error;
pub mod types;
pub mod validate;
pub mod quality;
pub mod preprocess;
pub mod classify;
pub mod recommend;
pub mod orchestrator;

pub use error::{InvalidInputError, ModelUnavailableError, ReferenceError, ScorerError};
pub use orchestrator::{DetectionPipeline, PipelineStage};
pub use types::{CropType, DetectionResult, ImageFormat, QualityVerdict};
