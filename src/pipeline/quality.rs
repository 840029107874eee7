//! Image quality assessment for field photos.
//!
//! Read-only analysis of a decoded photo. Produces a score in [0,1] from three
//! proxies and a categorical verdict. Never fails the request: a `poor` verdict
//! only caveats the diagnosis downstream.
//!
//! Score = 0.5 x sharpness + 0.3 x exposure + 0.2 x framing.

use std::borrow::Cow;

use image::imageops::FilterType;
use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};

use super::types::QualityVerdict;
use super::validate::DecodedImage;
use crate::config::GatingPolicy;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

const SHARPNESS_WEIGHT: f32 = 0.5;
const EXPOSURE_WEIGHT: f32 = 0.3;
const FRAMING_WEIGHT: f32 = 0.2;

/// Analysis runs on a copy no larger than this on its long side.
/// Keeps cost constant and makes Laplacian variance comparable across phones.
const ANALYSIS_MAX_DIM: u32 = 512;

/// Laplacian variance at which sharpness reaches 1 - 1/e.
const SHARPNESS_KNEE: f32 = 100.0;

/// Laplacian variance below this = blurry.
const BLUR_VARIANCE: f32 = 50.0;

/// Luminance outside [LOW, HIGH] counts as clipped.
const EXPOSURE_LOW: u8 = 20;
const EXPOSURE_HIGH: u8 = 235;

const UNDEREXPOSED_MEAN: f32 = 40.0;
const OVEREXPOSED_MEAN: f32 = 220.0;

/// Border ring used to estimate the background colour, as a fraction of each side.
const BORDER_FRACTION: f32 = 0.05;

/// RGB distance from the background colour above which a pixel is foreground.
const FOREGROUND_DISTANCE: f32 = 40.0;

/// Excess-green index (2G - R - B) above which a pixel counts as vegetation.
const EXCESS_GREEN: i32 = 20;

/// Foreground fraction at which framing scores 1.0.
const FRAMING_TARGET: f32 = 0.25;

/// Below this the subject is too small in the frame.
const SUBJECT_TOO_SMALL: f32 = 0.10;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// What is wrong with a photo, used to word the quality caveat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityWarning {
    Blurry,
    Underexposed,
    Overexposed,
    SubjectTooSmall,
}

impl QualityWarning {
    /// Farmer-facing description.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Blurry => "blurry",
            Self::Underexposed => "too dark",
            Self::Overexposed => "too bright",
            Self::SubjectTooSmall => "the plant fills too little of the frame",
        }
    }
}

/// Quality assessment report with numeric scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Weighted score in [0,1].
    pub score: f32,
    pub verdict: QualityVerdict,
    pub sharpness: f32,
    pub exposure: f32,
    pub framing: f32,
    /// Raw Laplacian variance of the analysis copy.
    pub laplacian_variance: f32,
    pub mean_luminance: f32,
    pub foreground_fraction: f32,
    pub warnings: Vec<QualityWarning>,
}

impl QualityReport {
    /// Report used when assessment could not run at all.
    pub fn unassessed() -> Self {
        Self {
            score: 0.0,
            verdict: QualityVerdict::Poor,
            sharpness: 0.0,
            exposure: 0.0,
            framing: 0.0,
            laplacian_variance: 0.0,
            mean_luminance: 0.0,
            foreground_fraction: 0.0,
            warnings: vec![],
        }
    }
}

/// Assesses image quality without modifying it.
pub trait QualityAssessor: Send + Sync {
    fn assess(&self, image: &DecodedImage) -> QualityReport;
}

// ═══════════════════════════════════════════════════════════
// HeuristicQualityAssessor
// ═══════════════════════════════════════════════════════════

/// Production assessor: Laplacian sharpness, clipping-based exposure,
/// border-contrast framing.
#[derive(Debug, Clone)]
pub struct HeuristicQualityAssessor {
    good_threshold: f32,
    acceptable_threshold: f32,
}

impl HeuristicQualityAssessor {
    pub fn new(policy: &GatingPolicy) -> Self {
        Self {
            good_threshold: policy.good_quality,
            acceptable_threshold: policy.acceptable_quality,
        }
    }
}

impl Default for HeuristicQualityAssessor {
    fn default() -> Self {
        Self::new(&GatingPolicy::default())
    }
}

impl QualityAssessor for HeuristicQualityAssessor {
    fn assess(&self, image: &DecodedImage) -> QualityReport {
        let working = downscale_for_analysis(&image.rgb, ANALYSIS_MAX_DIM);
        if working.width() == 0 || working.height() == 0 {
            return QualityReport::unassessed();
        }
        let gray = rgb_to_gray(&working);

        let laplacian_variance = compute_laplacian_variance(&gray);
        let sharpness = sharpness_score(laplacian_variance);

        let (exposure, mean_luminance) = exposure_score(&gray);

        let foreground_fraction = foreground_fraction(&working);
        let framing = (foreground_fraction / FRAMING_TARGET).min(1.0);

        let score = (SHARPNESS_WEIGHT * sharpness
            + EXPOSURE_WEIGHT * exposure
            + FRAMING_WEIGHT * framing)
            .clamp(0.0, 1.0);

        let mut warnings = Vec::new();
        if laplacian_variance < BLUR_VARIANCE {
            warnings.push(QualityWarning::Blurry);
        }
        if mean_luminance < UNDEREXPOSED_MEAN {
            warnings.push(QualityWarning::Underexposed);
        } else if mean_luminance > OVEREXPOSED_MEAN {
            warnings.push(QualityWarning::Overexposed);
        }
        if foreground_fraction < SUBJECT_TOO_SMALL {
            warnings.push(QualityWarning::SubjectTooSmall);
        }

        QualityReport {
            score,
            verdict: QualityVerdict::from_score(
                score,
                self.good_threshold,
                self.acceptable_threshold,
            ),
            sharpness,
            exposure,
            framing,
            laplacian_variance,
            mean_luminance,
            foreground_fraction,
            warnings,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Quality analysis functions
// ═══════════════════════════════════════════════════════════

/// Convert RGB image to grayscale using ITU-R BT.601 luminance.
pub fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    let (w, h) = (rgb.width(), rgb.height());
    let mut gray = GrayImage::new(w, h);
    for (x, y, p) in rgb.enumerate_pixels() {
        let luma = 0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32;
        gray.put_pixel(x, y, Luma([luma.round().clamp(0.0, 255.0) as u8]));
    }
    gray
}

/// Laplacian variance over a 3x3 `[0,1,0; 1,-4,1; 0,1,0]` kernel.
/// Higher = sharper. Returns 0 for images smaller than 3x3.
pub fn compute_laplacian_variance(img: &GrayImage) -> f32 {
    let (w, h) = (img.width(), img.height());
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = img.get_pixel(x, y).0[0] as f64;
            let top = img.get_pixel(x, y - 1).0[0] as f64;
            let bottom = img.get_pixel(x, y + 1).0[0] as f64;
            let left = img.get_pixel(x - 1, y).0[0] as f64;
            let right = img.get_pixel(x + 1, y).0[0] as f64;

            let laplacian = top + bottom + left + right - 4.0 * center;
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64) - (mean * mean);
    variance.max(0.0) as f32
}

/// Map Laplacian variance onto [0,1).
pub fn sharpness_score(laplacian_variance: f32) -> f32 {
    1.0 - (-laplacian_variance.max(0.0) / SHARPNESS_KNEE).exp()
}

/// Fraction of luminance values away from the 0/255 extremes, plus the mean.
pub fn exposure_score(gray: &GrayImage) -> (f32, f32) {
    let mut histogram = [0u64; 256];
    for p in gray.pixels() {
        histogram[p.0[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return (0.0, 0.0);
    }

    let mid: u64 = histogram[EXPOSURE_LOW as usize..=EXPOSURE_HIGH as usize]
        .iter()
        .sum();
    let weighted: f64 = histogram
        .iter()
        .enumerate()
        .map(|(value, &n)| value as f64 * n as f64)
        .sum();

    (
        mid as f32 / total as f32,
        (weighted / total as f64) as f32,
    )
}

/// Fraction of pixels that differ from the border colour or look like vegetation.
pub fn foreground_fraction(rgb: &RgbImage) -> f32 {
    let (w, h) = (rgb.width(), rgb.height());
    let total = (w as u64) * (h as u64);
    if total == 0 {
        return 0.0;
    }

    let background = border_mean(rgb);
    let threshold_sq = FOREGROUND_DISTANCE * FOREGROUND_DISTANCE;

    let foreground = rgb
        .pixels()
        .filter(|p| {
            let [r, g, b] = p.0;
            let dr = r as f32 - background[0];
            let dg = g as f32 - background[1];
            let db = b as f32 - background[2];
            let distinct = dr * dr + dg * dg + db * db > threshold_sq;
            let vegetation = 2 * g as i32 - r as i32 - b as i32 > EXCESS_GREEN;
            distinct || vegetation
        })
        .count();

    foreground as f32 / total as f32
}

/// Mean colour of the outer ring of the image.
fn border_mean(rgb: &RgbImage) -> [f32; 3] {
    let (w, h) = (rgb.width(), rgb.height());
    let bx = ((w as f32 * BORDER_FRACTION).ceil() as u32).max(1);
    let by = ((h as f32 * BORDER_FRACTION).ceil() as u32).max(1);

    let mut sum = [0.0f64; 3];
    let mut count = 0u64;
    for (x, y, p) in rgb.enumerate_pixels() {
        if x < bx || y < by || x >= w.saturating_sub(bx) || y >= h.saturating_sub(by) {
            for c in 0..3 {
                sum[c] += p.0[c] as f64;
            }
            count += 1;
        }
    }
    if count == 0 {
        return [0.0; 3];
    }
    [
        (sum[0] / count as f64) as f32,
        (sum[1] / count as f64) as f32,
        (sum[2] / count as f64) as f32,
    ]
}

/// Downscale to the analysis size. Uses `Cow` to avoid cloning small photos.
fn downscale_for_analysis(img: &RgbImage, max_dim: u32) -> Cow<'_, RgbImage> {
    let (w, h) = (img.width(), img.height());
    let largest = w.max(h);
    if largest <= max_dim {
        return Cow::Borrowed(img);
    }

    let scale = max_dim as f32 / largest as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    Cow::Owned(image::imageops::resize(img, new_w, new_h, FilterType::Triangle))
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::types::ImageFormat;
    use image::Rgb;

    /// Assessor that always returns the same report.
    pub(crate) struct FixedQualityAssessor(pub QualityReport);

    impl QualityAssessor for FixedQualityAssessor {
        fn assess(&self, _image: &DecodedImage) -> QualityReport {
            self.0.clone()
        }
    }

    pub(crate) fn decoded(rgb: RgbImage) -> DecodedImage {
        DecodedImage {
            format: ImageFormat::Png,
            byte_len: 0,
            width: rgb.width(),
            height: rgb.height(),
            channels: 3,
            exif_orientation: 1,
            rgb,
        }
    }

    /// Leaf-on-soil scene: brown background, green disc with dark veins.
    pub(crate) fn leaf_scene(size: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(size, size, Rgb([110, 85, 60]));
        let c = size as f32 / 2.0;
        let r = size as f32 * 0.35;
        for y in 0..size {
            for x in 0..size {
                let dx = x as f32 - c;
                let dy = y as f32 - c;
                if dx * dx + dy * dy < r * r {
                    let vein = (x + y) % 7 == 0 || x % 11 == 0;
                    let px = if vein { Rgb([30, 90, 25]) } else { Rgb([70, 170, 60]) };
                    img.put_pixel(x, y, px);
                }
            }
        }
        img
    }

    #[test]
    fn all_black_is_poor() {
        let report = HeuristicQualityAssessor::default()
            .assess(&decoded(RgbImage::from_pixel(50, 50, Rgb([0, 0, 0]))));
        assert_eq!(report.verdict, QualityVerdict::Poor);
        assert!(report.score < 0.1, "score {}", report.score);
        assert!(report.warnings.contains(&QualityWarning::Blurry));
        assert!(report.warnings.contains(&QualityWarning::Underexposed));
    }

    #[test]
    fn all_white_is_overexposed() {
        let report = HeuristicQualityAssessor::default()
            .assess(&decoded(RgbImage::from_pixel(80, 80, Rgb([255, 255, 255]))));
        assert_eq!(report.verdict, QualityVerdict::Poor);
        assert!(report.warnings.contains(&QualityWarning::Overexposed));
    }

    #[test]
    fn framed_leaf_is_good() {
        let report = HeuristicQualityAssessor::default().assess(&decoded(leaf_scene(300)));
        assert_eq!(report.verdict, QualityVerdict::Good, "report {report:?}");
        assert!(report.framing > 0.99);
        assert!(report.exposure > 0.99);
        assert!(report.warnings.is_empty(), "warnings {:?}", report.warnings);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        for img in [
            RgbImage::from_pixel(20, 20, Rgb([128, 128, 128])),
            leaf_scene(64),
            leaf_scene(700),
        ] {
            let report = HeuristicQualityAssessor::default().assess(&decoded(img));
            assert!((0.0..=1.0).contains(&report.score));
        }
    }

    #[test]
    fn laplacian_zero_on_flat_image() {
        let gray = GrayImage::from_pixel(20, 20, Luma([90]));
        assert_eq!(compute_laplacian_variance(&gray), 0.0);
    }

    #[test]
    fn laplacian_high_on_checkerboard() {
        let mut gray = GrayImage::new(20, 20);
        for (x, y, p) in gray.enumerate_pixels_mut() {
            *p = Luma([if (x + y) % 2 == 0 { 0 } else { 255 }]);
        }
        assert!(compute_laplacian_variance(&gray) > 10_000.0);
    }

    #[test]
    fn laplacian_tiny_image_is_zero() {
        assert_eq!(compute_laplacian_variance(&GrayImage::new(2, 2)), 0.0);
    }

    #[test]
    fn sharpness_is_monotonic() {
        assert_eq!(sharpness_score(0.0), 0.0);
        assert!(sharpness_score(50.0) < sharpness_score(100.0));
        assert!(sharpness_score(10_000.0) > 0.99);
    }

    #[test]
    fn exposure_counts_clipped_pixels() {
        let mut gray = GrayImage::from_pixel(10, 10, Luma([128]));
        for x in 0..10 {
            gray.put_pixel(x, 0, Luma([0]));
            gray.put_pixel(x, 1, Luma([255]));
        }
        let (exposure, _) = exposure_score(&gray);
        assert!((exposure - 0.8).abs() < 1e-6);
    }

    #[test]
    fn uniform_image_has_no_foreground() {
        let img = RgbImage::from_pixel(40, 40, Rgb([120, 100, 90]));
        assert_eq!(foreground_fraction(&img), 0.0);
    }

    #[test]
    fn green_fill_counts_as_foreground() {
        // Macro shot: the leaf fills the whole frame, border included
        let img = RgbImage::from_pixel(40, 40, Rgb([60, 160, 50]));
        assert_eq!(foreground_fraction(&img), 1.0);
    }

    #[test]
    fn large_image_is_downscaled_for_analysis() {
        let img = RgbImage::new(2048, 1024);
        let working = downscale_for_analysis(&img, ANALYSIS_MAX_DIM);
        assert_eq!((working.width(), working.height()), (512, 256));
    }

    #[test]
    fn verdict_honors_policy_thresholds() {
        // Flat mid-gray: exposure only, score 0.3
        let flat = decoded(RgbImage::from_pixel(60, 60, Rgb([128, 128, 128])));
        let default_report = HeuristicQualityAssessor::default().assess(&flat);
        assert!((default_report.score - 0.3).abs() < 1e-4);
        assert_eq!(default_report.verdict, QualityVerdict::Poor);

        let lenient = HeuristicQualityAssessor::new(&GatingPolicy {
            acceptable_quality: 0.25,
            ..GatingPolicy::default()
        });
        assert_eq!(lenient.assess(&flat).verdict, QualityVerdict::Acceptable);
    }
}
