//! # Image Preprocessing Module
//!
//! This module normalizes uploaded receipt photos for text recognition.
//! A fixed, deterministic transform sequence is applied: optional crop,
//! downscale to a bounded size, grayscale conversion, contrast stretch,
//! sharpening, and a brightness lift, then a lossless PNG re-encode.

use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Maximum width/height of a normalized image. Larger photos are scaled down
/// to fit; smaller ones are never upscaled.
const MAX_DIMENSION: u32 = 1920;

/// Sharpening parameters (unsharp mask with a moderate radius)
const SHARPEN_SIGMA: f32 = 1.5;
const SHARPEN_THRESHOLD: i32 = 4;

/// Brightness multiplier applied after grayscale conversion
const BRIGHTNESS_FACTOR: f32 = 1.10;

/// Errors that can occur during image normalization.
#[derive(Debug, Clone)]
pub enum PreprocessingError {
    /// Failed to decode the uploaded bytes as an image
    ImageLoad { message: String },
    /// A crop region was supplied that cannot be applied
    InvalidCrop { message: String },
    /// Image processing operation failed
    ProcessingFailed { message: String },
}

impl std::fmt::Display for PreprocessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreprocessingError::ImageLoad { message } => {
                write!(f, "Failed to load image: {}", message)
            }
            PreprocessingError::InvalidCrop { message } => {
                write!(f, "Invalid crop region: {}", message)
            }
            PreprocessingError::ProcessingFailed { message } => {
                write!(f, "Image processing failed: {}", message)
            }
        }
    }
}

impl std::error::Error for PreprocessingError {}

/// Rectangular region of interest applied before normalization.
///
/// A region whose `x` coordinate is zero marks the image as already cropped
/// by the caller; the crop step is skipped in that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A receipt photo after the normalization sequence.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    /// The normalized pixels (grayscale)
    pub image: DynamicImage,
    /// Lossless PNG encoding of `image`, handed to the OCR engine
    pub png_bytes: Vec<u8>,
}

impl NormalizedImage {
    /// Encode the normalized image as JPEG for on-disk storage.
    pub fn to_jpeg_bytes(&self) -> Result<Vec<u8>, PreprocessingError> {
        let mut buffer = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buffer, ImageFormat::Jpeg)
            .map_err(|e| PreprocessingError::ProcessingFailed {
                message: format!("JPEG encoding failed: {}", e),
            })?;
        Ok(buffer.into_inner())
    }
}

/// Applies the fixed normalization sequence to uploaded receipt photos.
#[derive(Debug, Clone, Default)]
pub struct ReceiptNormalizer;

impl ReceiptNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize raw uploaded bytes into an OCR-ready image.
    ///
    /// The transform order is fixed: crop (when requested and not marked
    /// pre-cropped), bounded resize, grayscale, contrast stretch, unsharp
    /// mask, brightness lift, PNG encode. The transform is pure; any failure
    /// is terminal and never retried.
    pub fn normalize(
        &self,
        bytes: &[u8],
        crop: Option<CropRegion>,
    ) -> Result<NormalizedImage, PreprocessingError> {
        let start_time = std::time::Instant::now();

        let decoded =
            image::load_from_memory(bytes).map_err(|e| PreprocessingError::ImageLoad {
                message: e.to_string(),
            })?;
        let (source_width, source_height) = decoded.dimensions();

        let cropped = match crop {
            // x == 0 signals a caller-side crop already happened
            Some(region) if region.x != 0 => apply_crop(&decoded, region)?,
            _ => decoded,
        };

        let bounded = resize_within_bounds(&cropped);
        let gray = bounded.grayscale();
        let stretched = stretch_contrast(&gray);
        let sharpened = stretched.unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD);
        let brightened = lift_brightness(&sharpened);

        let mut buffer = Cursor::new(Vec::new());
        brightened
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| PreprocessingError::ProcessingFailed {
                message: format!("PNG encoding failed: {}", e),
            })?;

        debug!(
            target: "ocr_preprocessing",
            "Normalized receipt image in {}ms: {}x{} -> {}x{}",
            start_time.elapsed().as_millis(),
            source_width,
            source_height,
            brightened.width(),
            brightened.height()
        );

        Ok(NormalizedImage {
            image: brightened,
            png_bytes: buffer.into_inner(),
        })
    }
}

/// Crop the image to the requested region, clamped to the image bounds.
fn apply_crop(
    image: &DynamicImage,
    region: CropRegion,
) -> Result<DynamicImage, PreprocessingError> {
    let (width, height) = image.dimensions();

    if region.width == 0 || region.height == 0 {
        return Err(PreprocessingError::InvalidCrop {
            message: format!("zero-sized region {}x{}", region.width, region.height),
        });
    }
    if region.x >= width || region.y >= height {
        return Err(PreprocessingError::InvalidCrop {
            message: format!(
                "origin ({}, {}) outside image {}x{}",
                region.x, region.y, width, height
            ),
        });
    }

    let crop_width = region.width.min(width - region.x);
    let crop_height = region.height.min(height - region.y);

    Ok(image.crop_imm(region.x, region.y, crop_width, crop_height))
}

/// Scale the image down to fit within MAX_DIMENSION on both axes.
/// Images already within bounds pass through untouched (no upscaling).
fn resize_within_bounds(image: &DynamicImage) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width <= MAX_DIMENSION && height <= MAX_DIMENSION {
        return image.clone();
    }
    // resize() preserves aspect ratio and fits within the given box
    image.resize(
        MAX_DIMENSION,
        MAX_DIMENSION,
        image::imageops::FilterType::CatmullRom,
    )
}

/// Stretch the grayscale histogram so the darkest pixel maps to 0 and the
/// brightest to 255. A flat image (min == max) is returned unchanged.
fn stretch_contrast(image: &DynamicImage) -> DynamicImage {
    let mut gray = image.to_luma8();

    let (mut min, mut max) = (u8::MAX, u8::MIN);
    for pixel in gray.pixels() {
        min = min.min(pixel[0]);
        max = max.max(pixel[0]);
    }

    if max > min {
        let range = f32::from(max - min);
        for pixel in gray.pixels_mut() {
            let stretched = (f32::from(pixel[0] - min) * 255.0 / range).round();
            pixel[0] = stretched.clamp(0.0, 255.0) as u8;
        }
    }

    DynamicImage::ImageLuma8(gray)
}

/// Multiply pixel values by the fixed brightness factor. The image is already
/// grayscale at this point, so saturation stays at zero.
fn lift_brightness(image: &DynamicImage) -> DynamicImage {
    let mut gray = image.to_luma8();
    for pixel in gray.pixels_mut() {
        let lifted = (f32::from(pixel[0]) * BRIGHTNESS_FACTOR).round();
        pixel[0] = lifted.clamp(0.0, 255.0) as u8;
    }
    DynamicImage::ImageLuma8(gray)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn encode_test_image(width: u32, height: u32) -> Vec<u8> {
        let mut img = RgbImage::new(width, height);
        // Non-uniform pixels so the contrast stretch has a real range
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            let v = ((x + y) % 256) as u8;
            *pixel = Rgb([v, v / 2, 255 - v]);
        }
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_large_image_fits_within_bounds() {
        let bytes = encode_test_image(2400, 3000);
        let normalized = ReceiptNormalizer::new().normalize(&bytes, None).unwrap();
        assert!(normalized.image.width() <= MAX_DIMENSION);
        assert!(normalized.image.height() <= MAX_DIMENSION);
    }

    #[test]
    fn test_small_image_not_upscaled() {
        let bytes = encode_test_image(320, 240);
        let normalized = ReceiptNormalizer::new().normalize(&bytes, None).unwrap();
        assert_eq!(normalized.image.width(), 320);
        assert_eq!(normalized.image.height(), 240);
    }

    #[test]
    fn test_crop_applied() {
        let bytes = encode_test_image(400, 400);
        let crop = CropRegion {
            x: 100,
            y: 100,
            width: 150,
            height: 120,
        };
        let normalized = ReceiptNormalizer::new()
            .normalize(&bytes, Some(crop))
            .unwrap();
        assert_eq!(normalized.image.width(), 150);
        assert_eq!(normalized.image.height(), 120);
    }

    #[test]
    fn test_crop_with_zero_x_is_skipped() {
        let bytes = encode_test_image(400, 400);
        let crop = CropRegion {
            x: 0,
            y: 100,
            width: 150,
            height: 120,
        };
        let normalized = ReceiptNormalizer::new()
            .normalize(&bytes, Some(crop))
            .unwrap();
        // Pre-cropped marker: full image dimensions retained
        assert_eq!(normalized.image.width(), 400);
        assert_eq!(normalized.image.height(), 400);
    }

    #[test]
    fn test_crop_clamped_to_bounds() {
        let bytes = encode_test_image(200, 200);
        let crop = CropRegion {
            x: 150,
            y: 150,
            width: 500,
            height: 500,
        };
        let normalized = ReceiptNormalizer::new()
            .normalize(&bytes, Some(crop))
            .unwrap();
        assert_eq!(normalized.image.width(), 50);
        assert_eq!(normalized.image.height(), 50);
    }

    #[test]
    fn test_crop_outside_image_rejected() {
        let bytes = encode_test_image(100, 100);
        let crop = CropRegion {
            x: 100,
            y: 0,
            width: 10,
            height: 10,
        };
        let result = ReceiptNormalizer::new().normalize(&bytes, Some(crop));
        assert!(matches!(
            result,
            Err(PreprocessingError::InvalidCrop { .. })
        ));
    }

    #[test]
    fn test_output_is_png_encoded_grayscale() {
        let bytes = encode_test_image(300, 200);
        let normalized = ReceiptNormalizer::new().normalize(&bytes, None).unwrap();
        assert!(normalized.png_bytes.starts_with(&[0x89, b'P', b'N', b'G']));
        let reloaded = image::load_from_memory(&normalized.png_bytes).unwrap();
        assert_eq!(reloaded.color().channel_count(), 1);
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let result = ReceiptNormalizer::new().normalize(b"not an image", None);
        assert!(matches!(result, Err(PreprocessingError::ImageLoad { .. })));
    }

    #[test]
    fn test_jpeg_reencoding_for_storage() {
        let bytes = encode_test_image(300, 200);
        let normalized = ReceiptNormalizer::new().normalize(&bytes, None).unwrap();
        let jpeg = normalized.to_jpeg_bytes().unwrap();
        assert!(jpeg.starts_with(&[0xFF, 0xD8]));
    }
}
