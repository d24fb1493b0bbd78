//! Fatal run errors.
//!
//! Per-batch failures never appear here: they degrade the batch and are
//! recorded in its `BatchReport`.

use thiserror::Error;

use crate::pipeline::extraction::ExtractionError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("The document could not be read: {0}")]
    DocumentCorrupt(String),

    #[error("Invalid window configuration: overlap {overlap} must be smaller than batch size {batch_size}")]
    InvalidWindowConfig { batch_size: usize, overlap: usize },

    #[error("Page rendering failed: {0}")]
    Rendering(ExtractionError),
}

impl From<ExtractionError> for PipelineError {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::DocumentCorrupt(reason) => PipelineError::DocumentCorrupt(reason),
            ExtractionError::PdfEncrypted => {
                PipelineError::DocumentCorrupt("the PDF is password-protected".into())
            }
            other => PipelineError::Rendering(other),
        }
    }
}
