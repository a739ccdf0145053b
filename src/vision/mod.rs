//! Vision/OCR Layer
//!
//! Defines the recognition engine contract the pipeline consumes, plus the
//! result types every backend produces. Backends:
//! - External OCR command (e.g. tesseract) driven over stdin/stdout

pub mod command;
pub mod ocr_preprocess;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::capture::frame::CapturedFrame;

pub use command::{CommandEngine, CommandEngineConfig};
pub use ocr_preprocess::PreprocessSettings;

/// One recognition hypothesis for a text region
#[derive(Debug, Clone, PartialEq)]
pub struct TextCandidate {
    /// Recognized text content
    pub text: String,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
}

/// Detected text region from OCR
#[derive(Debug, Clone, PartialEq)]
pub struct TextRegion {
    /// Alternative readings, in the order the backend reported them
    pub candidates: Vec<TextCandidate>,
}

impl TextRegion {
    /// Region with a single fully-confident candidate
    pub fn single(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![TextCandidate {
                text: text.into(),
                confidence: 1.0,
            }],
        }
    }

    /// The most confident candidate, if the backend produced any.
    /// Ties go to the one reported first.
    pub fn top_candidate(&self) -> Option<&str> {
        self.candidates
            .iter()
            .reduce(|best, c| if c.confidence > best.confidence { c } else { best })
            .map(|c| c.text.as_str())
    }
}

/// Errors produced while recognizing a frame
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The engine cannot take work right now
    #[error("recognition engine unavailable: {0}")]
    Unavailable(String),
    /// No recognition request can be built for this frame
    #[error("frame {sequence} cannot be recognized: {reason}")]
    InvalidFrame { sequence: u64, reason: String },
    /// The engine ran and reported a failure
    #[error("recognition engine failed: {0}")]
    EngineFailed(String),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Opaque text recognition capability: image in, text regions out.
///
/// Latency is unknown and may vary wildly between calls.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Whether the engine can accept work at all
    fn is_ready(&self) -> bool {
        true
    }

    /// Check that a recognition request can be built for `frame`
    fn validate(&self, frame: &CapturedFrame) -> Result<(), RecognitionError> {
        if frame.is_well_formed() {
            Ok(())
        } else {
            Err(RecognitionError::InvalidFrame {
                sequence: frame.sequence,
                reason: format!(
                    "{} bytes for a {}x{} RGBA frame",
                    frame.data.len(),
                    frame.width,
                    frame.height
                ),
            })
        }
    }

    /// Recognize text in one frame, regions in detection order.
    ///
    /// The frame is shared so backends can move it onto a blocking thread.
    async fn recognize(&self, frame: Arc<CapturedFrame>) -> Result<Vec<TextRegion>, RecognitionError>;
}

/// Join the top candidate of each region, in detection order.
///
/// Regions without any candidate are skipped.
pub fn merge_top_candidates(regions: &[TextRegion], separator: &str) -> String {
    regions
        .iter()
        .filter_map(TextRegion::top_candidate)
        .collect::<Vec<_>>()
        .join(separator)
}
