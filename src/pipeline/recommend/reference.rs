//! Curated (crop, disease) reference table.
//!
//! Read-only after load and shared across requests behind an `Arc`. The JSON
//! layout is `{ "<crop>": { "<label>": DiseaseInfo } }`; `healthy` needs no
//! entry.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pipeline::classify::taxonomy;
use crate::pipeline::error::ReferenceError;
use crate::pipeline::types::CropType;

const BUILTIN_REFERENCE: &str = include_str!("../../../resources/disease_reference.json");

/// Agronomic reference for one disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseInfo {
    pub symptoms: Vec<String>,
    pub causes: String,
    pub treatment: String,
    pub prevention: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: HashMap<(CropType, String), DiseaseInfo>,
}

impl ReferenceTable {
    /// Table shipped with the binary. Covers every diseased taxonomy entry.
    pub fn builtin() -> Result<Self, ReferenceError> {
        Self::from_json_str(BUILTIN_REFERENCE)
    }

    pub fn from_path(path: &Path) -> Result<Self, ReferenceError> {
        let raw = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&raw)?;
        info!(path = %path.display(), entries = table.len(), "Reference table loaded");
        Ok(table)
    }

    /// Parse and check every crop and label against the taxonomy.
    pub fn from_json_str(raw: &str) -> Result<Self, ReferenceError> {
        let parsed: BTreeMap<String, BTreeMap<String, DiseaseInfo>> = serde_json::from_str(raw)?;

        let mut entries = HashMap::new();
        for (crop_name, diseases) in parsed {
            let crop: CropType = crop_name
                .parse()
                .map_err(|_| ReferenceError::UnknownCrop(crop_name.clone()))?;
            for (label, info) in diseases {
                if !taxonomy::is_known_label(crop, &label) {
                    return Err(ReferenceError::UnknownLabel { crop, label });
                }
                entries.insert((crop, label), info);
            }
        }

        Ok(Self { entries })
    }

    pub fn get(&self, crop: CropType, label: &str) -> Option<&DiseaseInfo> {
        self.entries.get(&(crop, label.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
