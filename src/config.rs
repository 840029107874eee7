use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::error::ConfigError;

/// Application-level constants
pub const APP_NAME: &str = "AgriAdvisor";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default upload limit, matches the advisory web form (10 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Default inference timeout.
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default `tracing` filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "agri_advisor=info,warn"
}

/// Get the application data directory
/// ~/AgriAdvisor/ on all platforms. Falls back to the working directory
/// when no home directory can be determined (service accounts).
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Get the models directory (one `<crop>.onnx` per crop)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

// ═══════════════════════════════════════════════════════════
// Pipeline configuration
// ═══════════════════════════════════════════════════════════

/// Tunable decision thresholds.
///
/// The production values were inferred from observed behavior of the
/// previous advisory service and remain open to tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatingPolicy {
    /// At or above: full treatment and prevention advice.
    pub high_confidence: f32,
    /// At or above (and below high): treatment with an uncertainty caveat.
    /// Below: re-photograph advice only.
    pub moderate_confidence: f32,
    /// Poor images below this confidence get a quality caveat first.
    pub quality_caveat_below: f32,
    /// Quality score at or above: `good`.
    pub good_quality: f32,
    /// Quality score at or above: `acceptable`.
    pub acceptable_quality: f32,
}

impl Default for GatingPolicy {
    fn default() -> Self {
        Self {
            high_confidence: 0.7,
            moderate_confidence: 0.5,
            quality_caveat_below: 0.6,
            good_quality: 0.7,
            acceptable_quality: 0.4,
        }
    }
}

/// Per-channel normalization applied after scaling pixels to [0,1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `pixel / 255`.
    UnitRange,
    /// `(pixel / 255 - mean[c]) / std[c]`.
    MeanStd { mean: [f32; 3], std: [f32; 3] },
}

impl Normalization {
    /// ImageNet statistics, used by most transfer-learned leaf classifiers.
    pub fn imagenet() -> Self {
        Self::MeanStd {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

/// What the classifier needs. Changes per model, not per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelInputConfig {
    /// Target square dimension of the tensor.
    pub target_size: u32,
    /// Letterbox padding colour (RGB). Black for natural images.
    pub padding_color: [u8; 3],
    pub normalization: Normalization,
}

impl Default for ModelInputConfig {
    fn default() -> Self {
        Self {
            target_size: 224,
            padding_color: [0, 0, 0],
            normalization: Normalization::UnitRange,
        }
    }
}

/// Everything the pipeline reads at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub max_image_bytes: usize,
    pub min_dimension: u32,
    pub max_dimension: u32,
    #[serde(with = "duration_millis")]
    pub inference_timeout: Duration,
    pub model_dir: PathBuf,
    pub model_input: ModelInputConfig,
    pub policy: GatingPolicy,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            min_dimension: 16,
            max_dimension: 4000,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
            model_dir: models_dir(),
            model_input: ModelInputConfig::default(),
            policy: GatingPolicy::default(),
        }
    }
}

impl DetectionConfig {
    /// Defaults overridden by `AGRI_*` environment variables, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("AGRI_MAX_IMAGE_BYTES")? {
            config.max_image_bytes = v;
        }
        if let Some(ms) = env_parse::<u64>("AGRI_INFERENCE_TIMEOUT_MS")? {
            config.inference_timeout = Duration::from_millis(ms);
        }
        if let Ok(dir) = std::env::var("AGRI_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse::<f32>("AGRI_CONFIDENCE_HIGH")? {
            config.policy.high_confidence = v;
        }
        if let Some(v) = env_parse::<f32>("AGRI_CONFIDENCE_MODERATE")? {
            config.policy.moderate_confidence = v;
        }
        if let Some(v) = env_parse::<f32>("AGRI_QUALITY_CAVEAT_BELOW")? {
            config.policy.quality_caveat_below = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations whose thresholds overlap or whose limits are zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.policy;
        for (key, value) in [
            ("high_confidence", p.high_confidence),
            ("moderate_confidence", p.moderate_confidence),
            ("quality_caveat_below", p.quality_caveat_below),
            ("good_quality", p.good_quality),
            ("acceptable_quality", p.acceptable_quality),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    value: value.to_string(),
                });
            }
        }
        if p.moderate_confidence > p.high_confidence {
            return Err(ConfigError::Inconsistent(
                "moderate_confidence must not exceed high_confidence".into(),
            ));
        }
        if p.acceptable_quality > p.good_quality {
            return Err(ConfigError::Inconsistent(
                "acceptable_quality must not exceed good_quality".into(),
            ));
        }
        if self.max_image_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_image_bytes".into(),
                value: "0".into(),
            });
        }
        if self.min_dimension == 0 || self.min_dimension > self.max_dimension {
            return Err(ConfigError::Inconsistent(format!(
                "dimension range {}..={} is empty",
                self.min_dimension, self.max_dimension
            )));
        }
        if self.inference_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "inference_timeout".into(),
                value: "0ms".into(),
            });
        }
        if self.model_input.target_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "model_input.target_size".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.into(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
