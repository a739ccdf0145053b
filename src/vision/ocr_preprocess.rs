//! Image preprocessing for OCR
//!
//! Converts captured RGBA frames into the image handed to the recognition
//! backend: optional grayscale, and a downscale when the frame exceeds the
//! configured maximum dimension.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use tracing::debug;

use super::RecognitionError;
use crate::capture::frame::CapturedFrame;

/// Preprocessing settings applied before recognition
#[derive(Debug, Clone)]
pub struct PreprocessSettings {
    /// Convert to grayscale
    pub grayscale: bool,
    /// Maximum image dimension (larger images are scaled down, 0 = never)
    pub max_image_size: u32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            grayscale: true,
            max_image_size: 1920,
        }
    }
}

/// Build the backend image for a frame
pub fn prepare_image(frame: &CapturedFrame, settings: &PreprocessSettings) -> Result<DynamicImage, RecognitionError> {
    let rgba = RgbaImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or_else(|| {
        RecognitionError::InvalidFrame {
            sequence: frame.sequence,
            reason: "pixel buffer does not match dimensions".to_string(),
        }
    })?;
    let mut image = DynamicImage::ImageRgba8(rgba);

    let max = settings.max_image_size;
    if max > 0 && (frame.width > max || frame.height > max) {
        debug!(
            "Downscaling frame {} from {}x{} to fit {}",
            frame.sequence, frame.width, frame.height, max
        );
        image = image.resize(max, max, FilterType::Triangle);
    }

    if settings.grayscale {
        image = DynamicImage::ImageLuma8(image.to_luma8());
    }

    Ok(image)
}

/// Encode a prepared image as PNG bytes
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, RecognitionError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}
