//! Classifier input preparation.
//!
//! Letterboxes a decoded photo into a fixed square and converts it into an
//! NCHW `f32` tensor. Pure function of the pixels: identical input gives a
//! bit-identical tensor.
//!
//! Resize policy (reproducible):
//! 1. Scale so the longest side equals `target_size` (up or down), each side
//!    rounded and at least 1 px.
//! 2. Resample with the Triangle (bilinear) filter.
//! 3. Paste centred on a `target_size` square filled with `padding_color`,
//!    offsets `floor((target - content) / 2)`.
//! 4. Channel values `v / 255`, then the configured per-channel normalization.

use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use ndarray::Array4;
use tracing::debug;

use super::error::PreprocessError;
use super::validate::DecodedImage;
use crate::config::{ModelInputConfig, Normalization};

/// Number of colour channels the classifier consumes.
pub const TENSOR_CHANNELS: usize = 3;

/// Classifier input: shape `[1, 3, target, target]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Array4<f32>,
    /// Size of the resized photo within the padded canvas.
    pub content_width: u32,
    pub content_height: u32,
}

impl ImageTensor {
    pub fn new(
        data: Array4<f32>,
        content_width: u32,
        content_height: u32,
    ) -> Result<Self, PreprocessError> {
        let shape = data.shape();
        if shape[0] != 1 || shape[1] != TENSOR_CHANNELS || shape[2] != shape[3] {
            return Err(PreprocessError::InvalidConfig(format!(
                "expected [1, 3, N, N] tensor, got {shape:?}"
            )));
        }
        Ok(Self {
            data,
            content_width,
            content_height,
        })
    }

    pub fn view(&self) -> ndarray::ArrayView4<'_, f32> {
        self.data.view()
    }

    pub fn array(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn shape(&self) -> [usize; 4] {
        let s = self.data.shape();
        [s[0], s[1], s[2], s[3]]
    }

    /// Square side of the tensor.
    pub fn side(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn as_slice(&self) -> Option<&[f32]> {
        self.data.as_slice()
    }
}

/// Turns a decoded photo into classifier input.
pub trait ImagePreprocessor: Send + Sync {
    fn preprocess(&self, image: &DecodedImage) -> Result<ImageTensor, PreprocessError>;
}

/// Production preprocessor: aspect-preserving letterbox.
#[derive(Debug, Clone)]
pub struct LetterboxPreprocessor {
    config: ModelInputConfig,
}

impl LetterboxPreprocessor {
    pub fn new(config: ModelInputConfig) -> Self {
        Self { config }
    }
}

impl Default for LetterboxPreprocessor {
    fn default() -> Self {
        Self::new(ModelInputConfig::default())
    }
}

impl ImagePreprocessor for LetterboxPreprocessor {
    fn preprocess(&self, image: &DecodedImage) -> Result<ImageTensor, PreprocessError> {
        let target = self.config.target_size;
        if target == 0 {
            return Err(PreprocessError::InvalidConfig("target_size is 0".into()));
        }
        if let Normalization::MeanStd { std, .. } = &self.config.normalization {
            if std.iter().any(|s| *s <= 0.0 || !s.is_finite()) {
                return Err(PreprocessError::InvalidConfig(format!(
                    "std must be positive, got {std:?}"
                )));
            }
        }

        let canvas = letterbox(&image.rgb, target, self.config.padding_color);
        let (content_w, content_h) = compute_fit_dimensions(image.width, image.height, target);
        let data = to_nchw(&canvas, &self.config.normalization)?;

        debug!(
            original = format!("{}x{}", image.width, image.height),
            content = format!("{content_w}x{content_h}"),
            output = format!("{target}x{target}"),
            "Image preprocessed for classifier"
        );

        ImageTensor::new(data, content_w, content_h)
    }
}

/// Dimensions that fit inside a square with the longest side equal to `target_size`.
pub fn compute_fit_dimensions(width: u32, height: u32, target_size: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (1, 1);
    }

    let scale = (target_size as f32 / width as f32).min(target_size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, target_size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, target_size);
    (new_w, new_h)
}

/// Resize preserving aspect ratio and pad to a centred square canvas.
pub fn letterbox(image: &RgbImage, target: u32, padding: [u8; 3]) -> RgbImage {
    let (content_w, content_h) = compute_fit_dimensions(image.width(), image.height(), target);
    let resized = if (content_w, content_h) == image.dimensions() {
        image.clone()
    } else {
        image::imageops::resize(image, content_w, content_h, FilterType::Triangle)
    };

    let mut canvas = RgbImage::from_pixel(target, target, Rgb(padding));
    let offset_x = (target - content_w) / 2;
    let offset_y = (target - content_h) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x, offset_y);
    canvas
}

/// Convert a square RGB canvas into a normalized `[1, 3, H, W]` tensor.
fn to_nchw(canvas: &RgbImage, normalization: &Normalization) -> Result<Array4<f32>, PreprocessError> {
    let (w, h) = (canvas.width() as usize, canvas.height() as usize);
    let plane = w * h;
    let mut data = vec![0.0f32; TENSOR_CHANNELS * plane];

    let (mean, std) = match normalization {
        Normalization::UnitRange => ([0.0; 3], [1.0; 3]),
        Normalization::MeanStd { mean, std } => (*mean, *std),
    };

    for (x, y, p) in canvas.enumerate_pixels() {
        let idx = y as usize * w + x as usize;
        for c in 0..TENSOR_CHANNELS {
            data[c * plane + idx] = (p.0[c] as f32 / 255.0 - mean[c]) / std[c];
        }
    }

    Ok(Array4::from_shape_vec((1, TENSOR_CHANNELS, h, w), data)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::quality::tests::{decoded, leaf_scene};

    /// Preprocessor that always fails.
    pub(crate) struct FailingPreprocessor;

    impl ImagePreprocessor for FailingPreprocessor {
        fn preprocess(&self, _image: &DecodedImage) -> Result<ImageTensor, PreprocessError> {
            Err(PreprocessError::InvalidConfig("preprocessing disabled".into()))
        }
    }

    #[test]
    fn failing_preprocessor_reports_config_error() {
        let err = FailingPreprocessor.preprocess(&decoded(leaf_scene(32))).unwrap_err();
        assert!(matches!(err, PreprocessError::InvalidConfig(_)));
    }

    // ── compute_fit_dimensions ──

    #[test]
    fn fit_landscape_into_square() {
        let (w, h) = compute_fit_dimensions(2000, 1000, 224);
        assert_eq!(w, 224, "Width should fill target");
        assert_eq!(h, 112);
    }

    #[test]
    fn fit_portrait_into_square() {
        let (w, h) = compute_fit_dimensions(300, 400, 224);
        assert_eq!(h, 224);
        assert_eq!(w, 168);
    }

    #[test]
    fn fit_small_image_is_upscaled() {
        let (w, h) = compute_fit_dimensions(50, 50, 224);
        assert_eq!((w, h), (224, 224));
    }

    #[test]
    fn fit_extreme_ratio_keeps_one_pixel() {
        let (w, h) = compute_fit_dimensions(4000, 2, 224);
        assert_eq!(w, 224);
        assert!(h >= 1);
    }

    #[test]
    fn fit_zero_dimensions_clamped() {
        assert_eq!(compute_fit_dimensions(0, 0, 224), (1, 1));
    }

    // ── letterbox ──

    #[test]
    fn letterbox_pads_with_configured_color() {
        let img = RgbImage::from_pixel(200, 100, Rgb([200, 10, 10]));
        let canvas = letterbox(&img, 224, [0, 0, 255]);
        assert_eq!(canvas.dimensions(), (224, 224));
        // Content occupies rows 56..168
        assert_eq!(canvas.get_pixel(112, 0).0, [0, 0, 255]);
        assert_eq!(canvas.get_pixel(112, 223).0, [0, 0, 255]);
        let center = canvas.get_pixel(112, 112).0;
        assert!((center[0] as i32 - 200).abs() <= 1 && center[2] <= 11, "{center:?}");
    }

    // ── LetterboxPreprocessor (service) ──

    #[test]
    fn tensor_has_nchw_shape() {
        let tensor = LetterboxPreprocessor::default()
            .preprocess(&decoded(leaf_scene(300)))
            .unwrap();
        assert_eq!(tensor.shape(), [1, 3, 224, 224]);
        assert_eq!(tensor.side(), 224);
    }

    #[test]
    fn unit_range_values_within_bounds() {
        let tensor = LetterboxPreprocessor::default()
            .preprocess(&decoded(leaf_scene(120)))
            .unwrap();
        assert!(tensor.view().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn channel_planes_are_separate() {
        let img = RgbImage::from_pixel(224, 224, Rgb([255, 0, 51]));
        let tensor = LetterboxPreprocessor::default().preprocess(&decoded(img)).unwrap();
        let view = tensor.view();
        assert_eq!(view[[0, 0, 10, 10]], 1.0);
        assert_eq!(view[[0, 1, 10, 10]], 0.0);
        assert!((view[[0, 2, 10, 10]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn mean_std_normalization_applied() {
        let config = ModelInputConfig {
            normalization: Normalization::MeanStd {
                mean: [0.5, 0.5, 0.5],
                std: [0.5, 0.5, 0.5],
            },
            ..ModelInputConfig::default()
        };
        let img = RgbImage::from_pixel(224, 224, Rgb([255, 0, 255]));
        let tensor = LetterboxPreprocessor::new(config).preprocess(&decoded(img)).unwrap();
        let view = tensor.view();
        assert_eq!(view[[0, 0, 0, 0]], 1.0);
        assert_eq!(view[[0, 1, 0, 0]], -1.0);
    }

    #[test]
    fn non_positive_std_rejected() {
        let config = ModelInputConfig {
            normalization: Normalization::MeanStd {
                mean: [0.0; 3],
                std: [1.0, 0.0, 1.0],
            },
            ..ModelInputConfig::default()
        };
        let err = LetterboxPreprocessor::new(config)
            .preprocess(&decoded(leaf_scene(50)))
            .unwrap_err();
        assert!(matches!(err, PreprocessError::InvalidConfig(_)));
    }

    #[test]
    fn preprocessing_is_deterministic() {
        let image = decoded(leaf_scene(333));
        let pre = LetterboxPreprocessor::default();
        let a = pre.preprocess(&image).unwrap();
        let b = pre.preprocess(&image).unwrap();
        let bits_a: Vec<u32> = a.view().iter().map(|v| v.to_bits()).collect();
        let bits_b: Vec<u32> = b.view().iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits_a, bits_b);
    }

    #[test]
    fn content_dimensions_reported() {
        let img = RgbImage::from_pixel(400, 200, Rgb([1, 2, 3]));
        let tensor = LetterboxPreprocessor::default().preprocess(&decoded(img)).unwrap();
        assert_eq!((tensor.content_width, tensor.content_height), (224, 112));
    }

    #[test]
    fn non_square_tensor_rejected() {
        let data = Array4::<f32>::zeros((1, 3, 10, 12));
        assert!(ImageTensor::new(data, 10, 10).is_err());
    }
}
