//! Vision/OCR Layer
//!
//! Extracts text blocks with bounding boxes from reconstructed frames. The OCR
//! engine is an external capability behind [`TextRecognizer`].

pub mod block;
pub mod tesseract;

use async_trait::async_trait;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use block::{BlockBounds, BlockId, TextBlock, DEFAULT_ID_QUANTUM};
pub use tesseract::TesseractRecognizer;

/// Text recognition failures. The frame is discarded, overlays stay as they are.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode frame for OCR: {0}")]
    Encode(String),
    #[error("OCR engine failed: {0}")]
    Engine(String),
    #[error("unreadable OCR output: {0}")]
    Parse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Produces the text blocks of one image
///
/// Each call consumes the image once; the returned sequence is finite.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &RgbaImage) -> Result<Vec<TextBlock>, RecognitionError>;
}

/// Configuration for the vision pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Path or name of the tesseract executable
    pub tesseract_path: String,
    /// Tesseract language code(s), e.g. "eng" or "eng+jpn"
    pub ocr_language: String,
    /// Minimum word confidence (0 - 100)
    pub min_confidence: f32,
    /// Grid size in pixels used to derive stable block ids
    pub id_quantum: i32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            tesseract_path: "tesseract".to_string(),
            ocr_language: "eng".to_string(),
            min_confidence: 60.0,
            id_quantum: DEFAULT_ID_QUANTUM,
        }
    }
}
