//! Error taxonomy for the detection pipeline.
//!
//! Only `InvalidInputError` reaches the caller of `detect`. The others are
//! absorbed by the orchestrator and surface as degraded fields of a
//! still-successful `DetectionResult`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::types::{CropType, ImageFormat};

/// Malformed, oversized or unrecognized input. The request is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidInputError {
    #[error("Image data is empty")]
    Empty,

    #[error("Image data is {size} bytes, exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("Unsupported image format: {0}. Please use JPEG or PNG")]
    UnsupportedFormat(String),

    #[error("Declared format {declared} does not match image content ({detected})")]
    FormatMismatch {
        declared: ImageFormat,
        detected: ImageFormat,
    },

    #[error("Image could not be decoded: {0}")]
    Corrupt(String),

    #[error("Image dimensions {width}x{height} outside the accepted range {min}..={max} pixels")]
    DimensionsOutOfRange {
        width: u32,
        height: u32,
        min: u32,
        max: u32,
    },

    #[error("Unknown crop type: {0}")]
    UnknownCrop(String),
}

impl InvalidInputError {
    /// Stable machine-readable reason code for the caller's transport layer.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::TooLarge { .. } => "too_large",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::FormatMismatch { .. } => "format_mismatch",
            Self::Corrupt(_) => "corrupt",
            Self::DimensionsOutOfRange { .. } => "dimensions_out_of_range",
            Self::UnknownCrop(_) => "unknown_crop",
        }
    }
}

/// The inference backend is missing, failed, or timed out. Recoverable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelUnavailableError {
    #[error("No scoring model configured for {0}")]
    NotConfigured(CropType),

    #[error("Inference exceeded the {0:?} timeout")]
    Timeout(Duration),

    #[error("Inference backend failed: {0}")]
    Backend(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),
}

/// Error returned by a scoring capability implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScorerError {
    #[error("Model not loaded for {0}")]
    ModelNotLoaded(CropType),

    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Model initialization failed: {0}")]
    ModelInit(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

impl From<ScorerError> for ModelUnavailableError {
    fn from(err: ScorerError) -> Self {
        match err {
            ScorerError::ModelNotLoaded(crop) => Self::NotConfigured(crop),
            other => Self::Backend(other.to_string()),
        }
    }
}

/// The reference table has no entry for a (crop, label) pair. Recoverable.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("No reference information for {label} on {crop}")]
pub struct UnknownDiseaseError {
    pub crop: CropType,
    pub label: String,
}

/// Reference table failed to load at startup.
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Reference JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Reference table names an unknown crop: {0}")]
    UnknownCrop(String),

    #[error("Reference table names label {label} which is not in the {crop} taxonomy")]
    UnknownLabel { crop: CropType, label: String },
}

/// Tensor construction failed after a successful decode.
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Invalid model input configuration: {0}")]
    InvalidConfig(String),
}

/// Startup configuration rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}
