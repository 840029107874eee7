//! Fixed (crop, disease) taxonomy.
//!
//! Order matters: index `i` of a crop's list is output `i` of that crop's
//! model, and ties in the classifier distribution go to the earliest entry.
//! `healthy` is always first.

use crate::pipeline::types::{CropType, HEALTHY_LABEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxonomyEntry {
    pub label: &'static str,
    pub display_name: &'static str,
}

const fn entry(label: &'static str, display_name: &'static str) -> TaxonomyEntry {
    TaxonomyEntry {
        label,
        display_name,
    }
}

const RICE: &[TaxonomyEntry] = &[
    entry(HEALTHY_LABEL, "Healthy"),
    entry("brown_spot", "Brown Spot"),
    entry("bacterial_blight", "Bacterial Leaf Blight"),
    entry("leaf_smut", "Leaf Smut"),
    entry("rice_blast", "Rice Blast"),
];

const WHEAT: &[TaxonomyEntry] = &[
    entry(HEALTHY_LABEL, "Healthy"),
    entry("rust", "Rust"),
    entry("powdery_mildew", "Powdery Mildew"),
    entry("septoria", "Septoria Leaf Blotch"),
    entry("fusarium_head_blight", "Fusarium Head Blight"),
];

const MAIZE: &[TaxonomyEntry] = &[
    entry(HEALTHY_LABEL, "Healthy"),
    entry("northern_leaf_blight", "Northern Leaf Blight"),
    entry("common_rust", "Common Rust"),
    entry("gray_leaf_spot", "Gray Leaf Spot"),
    entry("bacterial_wilt", "Bacterial Wilt"),
];

const TOMATO: &[TaxonomyEntry] = &[
    entry(HEALTHY_LABEL, "Healthy"),
    entry("early_blight", "Early Blight"),
    entry("late_blight", "Late Blight"),
    entry("bacterial_spot", "Bacterial Spot"),
    entry("mosaic_virus", "Mosaic Virus"),
];

const POTATO: &[TaxonomyEntry] = &[
    entry(HEALTHY_LABEL, "Healthy"),
    entry("late_blight", "Late Blight"),
    entry("early_blight", "Early Blight"),
    entry("blackleg", "Blackleg"),
    entry("viral_disease", "Viral Disease"),
];

/// Every label a crop's model can emit, in output order.
pub fn labels_for(crop: CropType) -> &'static [TaxonomyEntry] {
    match crop {
        CropType::Rice => RICE,
        CropType::Wheat => WHEAT,
        CropType::Maize => MAIZE,
        CropType::Tomato => TOMATO,
        CropType::Potato => POTATO,
    }
}

pub fn position(crop: CropType, label: &str) -> Option<usize> {
    labels_for(crop).iter().position(|e| e.label == label)
}

pub fn is_known_label(crop: CropType, label: &str) -> bool {
    position(crop, label).is_some()
}

pub fn display_name(crop: CropType, label: &str) -> Option<&'static str> {
    labels_for(crop)
        .iter()
        .find(|e| e.label == label)
        .map(|e| e.display_name)
}

/// Diseased labels only (taxonomy minus `healthy`).
pub fn disease_labels(crop: CropType) -> impl Iterator<Item = &'static TaxonomyEntry> {
    labels_for(crop).iter().filter(|e| e.label != HEALTHY_LABEL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::UNAVAILABLE_LABEL;

    #[test]
    fn every_crop_starts_with_healthy() {
        for crop in CropType::ALL {
            assert_eq!(labels_for(crop)[0].label, HEALTHY_LABEL);
        }
    }

    #[test]
    fn labels_unique_within_crop() {
        for crop in CropType::ALL {
            let mut labels: Vec<_> = labels_for(crop).iter().map(|e| e.label).collect();
            let n = labels.len();
            labels.sort_unstable();
            labels.dedup();
            assert_eq!(labels.len(), n, "duplicate label in {crop}");
        }
    }

    #[test]
    fn sentinel_never_in_taxonomy() {
        for crop in CropType::ALL {
            assert!(!is_known_label(crop, UNAVAILABLE_LABEL));
        }
    }

    #[test]
    fn rice_bacterial_blight_display_name() {
        assert_eq!(
            display_name(CropType::Rice, "bacterial_blight"),
            Some("Bacterial Leaf Blight")
        );
        assert_eq!(position(CropType::Rice, "bacterial_blight"), Some(2));
    }

    #[test]
    fn label_sets_are_crop_specific() {
        assert!(is_known_label(CropType::Tomato, "early_blight"));
        assert!(!is_known_label(CropType::Rice, "early_blight"));
        // Same label, different output index
        assert_ne!(
            position(CropType::Tomato, "late_blight"),
            position(CropType::Potato, "late_blight")
        );
    }

    #[test]
    fn disease_labels_exclude_healthy() {
        assert_eq!(disease_labels(CropType::Maize).count(), 4);
        assert!(disease_labels(CropType::Maize).all(|e| e.label != HEALTHY_LABEL));
    }
}
