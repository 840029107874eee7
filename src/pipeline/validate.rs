//! Image validation: the first stage of every detection.
//!
//! Rejects malformed uploads before any expensive work. Checks run cheapest
//! first: emptiness and size, then magic bytes, then the header's dimension
//! bounds, then the full decode. Each rejection is a distinct `InvalidInputError`.

use std::io::Cursor;

use image::{ColorType, DynamicImage, GenericImageView, RgbImage};
use tracing::debug;

use super::error::InvalidInputError;
use super::types::{ImageFormat, ImageMetadata};

/// Limits applied by the validator. Taken from `DetectionConfig` at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_bytes: usize,
    pub min_dimension: u32,
    pub max_dimension: u32,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_bytes: crate::config::DEFAULT_MAX_IMAGE_BYTES,
            min_dimension: 16,
            max_dimension: 4000,
        }
    }
}

/// A decoded, upright photo. Lives for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub format: ImageFormat,
    pub byte_len: usize,
    pub width: u32,
    pub height: u32,
    /// Channel count of the source encoding: 1, 3 or 4.
    pub channels: u8,
    pub exif_orientation: u32,
    /// Orientation-corrected RGB pixels. Width/height above are post-rotation.
    pub rgb: RgbImage,
}

impl DecodedImage {
    pub fn metadata(&self) -> ImageMetadata {
        ImageMetadata {
            format: self.format,
            width: self.width,
            height: self.height,
            channels: self.channels,
            file_size: self.byte_len,
            exif_orientation: self.exif_orientation,
        }
    }
}

/// Validate and decode an upload.
pub fn validate_image(
    bytes: &[u8],
    declared: ImageFormat,
    limits: &ValidationLimits,
) -> Result<DecodedImage, InvalidInputError> {
    validate_image_bytes(bytes, limits.max_bytes)?;

    let detected = sniff_format(bytes)?;
    if detected != declared {
        return Err(InvalidInputError::FormatMismatch { declared, detected });
    }

    // Bounds are symmetric, so the pre-rotation header size is enough.
    let (header_w, header_h) = read_dimensions(bytes, declared)?;
    check_dimensions(header_w, header_h, limits)?;

    let img = image::io::Reader::with_format(Cursor::new(bytes), declared.to_image_format())
        .decode()
        .map_err(|e| InvalidInputError::Corrupt(e.to_string()))?;

    let channels = source_channels(img.color());
    let orientation = read_exif_orientation(bytes);
    let img = apply_orientation(img, orientation);
    let (width, height) = img.dimensions();

    debug!(
        format = declared.as_str(),
        dimensions = format!("{width}x{height}"),
        channels,
        orientation,
        bytes = bytes.len(),
        "Image validated"
    );

    Ok(DecodedImage {
        format: declared,
        byte_len: bytes.len(),
        width,
        height,
        channels,
        exif_orientation: orientation,
        rgb: img.to_rgb8(),
    })
}

/// Image size from the format header, without decoding pixel data.
pub fn read_dimensions(bytes: &[u8], format: ImageFormat) -> Result<(u32, u32), InvalidInputError> {
    image::io::Reader::with_format(Cursor::new(bytes), format.to_image_format())
        .into_dimensions()
        .map_err(|e| InvalidInputError::Corrupt(e.to_string()))
}

fn check_dimensions(
    width: u32,
    height: u32,
    limits: &ValidationLimits,
) -> Result<(), InvalidInputError> {
    let in_range = |side: u32| (limits.min_dimension..=limits.max_dimension).contains(&side);
    if in_range(width) && in_range(height) {
        return Ok(());
    }
    Err(InvalidInputError::DimensionsOutOfRange {
        width,
        height,
        min: limits.min_dimension,
        max: limits.max_dimension,
    })
}

/// Size checks that need no parsing.
pub fn validate_image_bytes(bytes: &[u8], max_bytes: usize) -> Result<(), InvalidInputError> {
    if bytes.is_empty() {
        return Err(InvalidInputError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(InvalidInputError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    Ok(())
}

/// Identify the format from magic bytes. Declared MIME types can be wrong.
pub fn sniff_format(bytes: &[u8]) -> Result<ImageFormat, InvalidInputError> {
    match bytes {
        // JPEG: SOI marker followed by any marker
        [0xFF, 0xD8, 0xFF, ..] => Ok(ImageFormat::Jpeg),
        // PNG: fixed 8-byte signature
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Ok(ImageFormat::Png),
        _ => Err(InvalidInputError::UnsupportedFormat(
            "unrecognized file signature".into(),
        )),
    }
}

/// Channel count of the encoded source. Gray+alpha is expanded to RGBA.
fn source_channels(color: ColorType) -> u8 {
    match color.channel_count() {
        1 => 1,
        2 | 4 => 4,
        _ => 3,
    }
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform to a `DynamicImage`.
///
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
