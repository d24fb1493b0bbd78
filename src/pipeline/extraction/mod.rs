pub mod types;
pub mod pdfium;
pub mod vision;

pub use types::*;
pub use pdfium::*;
pub use vision::*;

use thiserror::Error;

use crate::pipeline::retry::Retryable;
use crate::pipeline::structuring::ChatError;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Document cannot be parsed as a PDF: {0}")]
    DocumentCorrupt(String),

    #[error("PDF is password-protected")]
    PdfEncrypted,

    #[error("Rendering page {page} failed: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("PDFium library not available: {0}")]
    PdfiumUnavailable(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Completion service error: {0}")]
    Service(#[from] ChatError),

    #[error("Extraction failed after {attempts} attempts: {reason}")]
    ExtractionFailed { attempts: u32, reason: String },

    #[error("Extraction cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl Retryable for ExtractionError {
    fn is_retryable(&self) -> bool {
        match self {
            ExtractionError::Service(e) => e.is_retryable(),
            ExtractionError::DocumentCorrupt(_)
            | ExtractionError::PdfEncrypted
            | ExtractionError::PdfRendering { .. }
            | ExtractionError::PdfiumUnavailable(_)
            | ExtractionError::ImageProcessing(_)
            | ExtractionError::ExtractionFailed { .. }
            | ExtractionError::Cancelled { .. } => false,
        }
    }
}
