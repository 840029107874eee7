use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::InvalidInputError;
use super::quality::QualityReport;
use super::recommend::DiseaseInfo;

// ═══════════════════════════════════════════════════════════
// Request-side enums
// ═══════════════════════════════════════════════════════════

/// Crops the advisory pipeline can diagnose. Supplied by the caller, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropType {
    Rice,
    Wheat,
    Maize,
    Tomato,
    Potato,
}

impl CropType {
    pub const ALL: [CropType; 5] = [
        Self::Rice,
        Self::Wheat,
        Self::Maize,
        Self::Tomato,
        Self::Potato,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rice => "rice",
            Self::Wheat => "wheat",
            Self::Maize => "maize",
            Self::Tomato => "tomato",
            Self::Potato => "potato",
        }
    }
}

impl std::fmt::Display for CropType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CropType {
    type Err = InvalidInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rice" => Ok(Self::Rice),
            "wheat" => Ok(Self::Wheat),
            // "corn" is how most farmers outside South Asia name maize
            "maize" | "corn" => Ok(Self::Maize),
            "tomato" => Ok(Self::Tomato),
            "potato" => Ok(Self::Potato),
            _ => Err(InvalidInputError::UnknownCrop(s.to_string())),
        }
    }
}

/// Accepted upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    /// Parse a caller hint: MIME type, bare name, or file extension.
    pub fn from_hint(hint: &str) -> Result<Self, InvalidInputError> {
        let normalized = hint.trim().to_ascii_lowercase();
        let name = normalized
            .strip_prefix("image/")
            .unwrap_or(normalized.trim_start_matches('.'));
        match name {
            "jpeg" | "jpg" | "pjpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            _ => Err(InvalidInputError::UnsupportedFormat(hint.to_string())),
        }
    }

    pub(crate) fn to_image_format(self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Quality verdict
// ═══════════════════════════════════════════════════════════

/// Categorical judgment of image usability, independent of the diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityVerdict {
    Good,
    Acceptable,
    Poor,
}

impl QualityVerdict {
    /// Derive the verdict from a score in [0,1].
    pub fn from_score(score: f32, good: f32, acceptable: f32) -> Self {
        if score >= good {
            Self::Good
        } else if score >= acceptable {
            Self::Acceptable
        } else {
            Self::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Acceptable => "acceptable",
            Self::Poor => "poor",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Result types
// ═══════════════════════════════════════════════════════════

/// Label emitted when no classification could be obtained.
pub const UNAVAILABLE_LABEL: &str = "unavailable";

/// Pseudo-label every crop taxonomy starts with.
pub const HEALTHY_LABEL: &str = "healthy";

/// One entry of a classifier distribution, in taxonomy order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub display_name: String,
    pub probability: f32,
}

/// Metadata of the submitted photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub file_size: usize,
    /// EXIF orientation tag value (1 = upright).
    pub exif_orientation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Completed,
    Degraded,
}

/// Why a result is degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    ModelUnavailable,
    UnknownDisease,
}

/// Output of one pipeline invocation. Owned by the caller once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub crop_type: CropType,
    pub is_diseased: bool,
    /// Taxonomy label, `healthy`, or `unavailable`.
    pub disease: String,
    pub display_name: String,
    pub confidence: f32,
    pub image_quality: QualityVerdict,
    pub recommendations: Vec<String>,
    pub disease_info: Option<DiseaseInfo>,
    /// Diagnosis below the moderate-confidence threshold; `disease_info` is for reference only.
    pub low_confidence: bool,
    pub status: DetectionStatus,
    pub degraded_reason: Option<DegradedReason>,
    pub message: Option<String>,
    pub all_predictions: Vec<LabelScore>,
    pub quality: QualityReport,
    pub image: ImageMetadata,
    /// SHA-256 of the raw upload, base64.
    pub image_fingerprint: String,
}

impl DetectionResult {
    pub fn is_degraded(&self) -> bool {
        self.status == DetectionStatus::Degraded
    }
}
