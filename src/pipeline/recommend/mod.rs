//! Recommendation resolution.
//!
//! Turns a classified (crop, label, confidence) into farmer-facing advice,
//! gated by confidence. Wording is aimed at smallholders reading on a phone:
//! short imperative sentences, one action each.

pub mod reference;

pub use reference::{DiseaseInfo, ReferenceTable};

use std::sync::Arc;

use crate::config::GatingPolicy;

use super::classify::taxonomy;
use super::error::UnknownDiseaseError;
use super::quality::QualityWarning;
use super::types::{CropType, HEALTHY_LABEL};

// ═══════════════════════════════════════════════════════════
// Advice text
// ═══════════════════════════════════════════════════════════

pub const HEALTHY_TIPS: [&str; 4] = [
    "Your crop appears healthy!",
    "Continue regular monitoring",
    "Maintain good agricultural practices",
    "Ensure proper irrigation and nutrition",
];

pub const REPHOTOGRAPH_RECOMMENDATION: &str =
    "The diagnosis is uncertain. Retake the photo of a single affected leaf in daylight, \
     or consult a local agricultural extension officer";

pub const UNCERTAINTY_CAVEAT: &str =
    "This diagnosis is not certain. Confirm the symptoms below before treating";

pub const EXTENSION_OFFICER_ADVICE: &str =
    "Consult with local agricultural extension officer";

/// Advice keyed on a word in the disease label. First match wins.
const KEYWORD_TIPS: &[(&str, [&str; 2])] = &[
    (
        "blight",
        [
            "Improve air circulation and reduce humidity",
            "Remove and destroy infected plant parts",
        ],
    ),
    (
        "rust",
        [
            "Apply sulfur-based fungicides",
            "Use resistant varieties for future planting",
        ],
    ),
    (
        "spot",
        [
            "Improve drainage and avoid overhead irrigation",
            "Apply copper-based fungicides",
        ],
    ),
];

/// Caveat placed first when a poor photo produced a weak diagnosis.
pub fn quality_caveat(warnings: &[QualityWarning]) -> String {
    if warnings.is_empty() {
        return "Photo quality is poor, so this result may be unreliable. \
                Retake the photo in good light with the affected leaf filling the frame"
            .to_string();
    }
    let problems: Vec<&str> = warnings.iter().map(|w| w.describe()).collect();
    format!(
        "Photo quality is poor ({}), so this result may be unreliable. \
         Retake the photo in good light with the affected leaf filling the frame",
        problems.join(", ")
    )
}

// ═══════════════════════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub recommendations: Vec<String>,
    pub disease_info: Option<DiseaseInfo>,
    /// Diagnosis below `moderate_confidence`; info attached for reference only.
    pub low_confidence: bool,
}

pub struct RecommendationResolver {
    table: Arc<ReferenceTable>,
    policy: GatingPolicy,
}

impl RecommendationResolver {
    pub fn new(table: Arc<ReferenceTable>, policy: GatingPolicy) -> Self {
        Self { table, policy }
    }

    pub fn table(&self) -> &ReferenceTable {
        &self.table
    }

    /// Resolve advice for one diagnosis.
    ///
    /// `healthy` never touches the table. Any other label must have a
    /// reference entry or the call fails with `UnknownDiseaseError`.
    pub fn resolve(
        &self,
        crop: CropType,
        label: &str,
        confidence: f32,
    ) -> Result<Resolution, UnknownDiseaseError> {
        if label == HEALTHY_LABEL {
            return Ok(Resolution {
                recommendations: HEALTHY_TIPS.iter().map(|s| s.to_string()).collect(),
                disease_info: None,
                low_confidence: false,
            });
        }

        let info = self
            .table
            .get(crop, label)
            .ok_or_else(|| UnknownDiseaseError {
                crop,
                label: label.to_string(),
            })?;
        let name = taxonomy::display_name(crop, label).unwrap_or(label);

        let (recommendations, low_confidence) = if confidence >= self.policy.high_confidence {
            let mut recs = vec![
                format!("Disease detected: {name}"),
                "Immediate action required".to_string(),
                format!("Treatment: {}", info.treatment),
                format!("Prevention: {}", info.prevention),
            ];
            recs.extend(keyword_tips(label).iter().map(|s| s.to_string()));
            recs.push(EXTENSION_OFFICER_ADVICE.to_string());
            (recs, false)
        } else if confidence >= self.policy.moderate_confidence {
            let recs = vec![
                UNCERTAINTY_CAVEAT.to_string(),
                format!("Possible disease: {name}"),
                format!("Treatment: {}", info.treatment),
                EXTENSION_OFFICER_ADVICE.to_string(),
            ];
            (recs, false)
        } else {
            (vec![REPHOTOGRAPH_RECOMMENDATION.to_string()], true)
        };

        Ok(Resolution {
            recommendations,
            disease_info: Some(info.clone()),
            low_confidence,
        })
    }
}

fn keyword_tips(label: &str) -> &'static [&'static str] {
    KEYWORD_TIPS
        .iter()
        .find(|(keyword, _)| label.contains(keyword))
        .map(|(_, tips)| tips.as_slice())
        .unwrap_or(&[])
}
