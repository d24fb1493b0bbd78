use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Default upscaling factor applied when rasterising pages.
pub const DEFAULT_RENDER_SCALE: f32 = 2.0;

/// One rendered page: PNG bytes plus its 0-based position in the document.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("png_bytes", &self.png.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// All pages of a document, in order. Immutable once rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pages: Vec<Page>,
}

impl Document {
    pub fn new(pages: Vec<Page>) -> Self {
        Self { pages }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Whether a batch is sent to the vision model page by page or all at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// One request per page; texts are joined in page order.
    #[default]
    PerPage,
    /// One request carrying every page image of the batch.
    PerBatch,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMode::PerPage => "per_page",
            ExtractionMode::PerBatch => "per_batch",
        }
    }
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_page" | "page" => Ok(ExtractionMode::PerPage),
            "per_batch" | "batch" => Ok(ExtractionMode::PerBatch),
            other => Err(format!(
                "unknown extraction mode '{other}' (expected per-page or per-batch)"
            )),
        }
    }
}

/// PDF rasterisation abstraction (allows mocking without the PDFium binary).
pub trait PdfPageRenderer: Send + Sync {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError>;

    /// Render one 0-based page at `scale` times its natural size.
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        scale: f32,
    ) -> Result<Page, ExtractionError>;

    /// Render every page in order.
    fn render_all(&self, pdf_bytes: &[u8], scale: f32) -> Result<Vec<Page>, ExtractionError> {
        let count = self.page_count(pdf_bytes)?;
        (0..count)
            .map(|n| self.render_page(pdf_bytes, n, scale))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_mode_parses_cli_spellings() {
        assert_eq!("per-page".parse::<ExtractionMode>().unwrap(), ExtractionMode::PerPage);
        assert_eq!("PER_BATCH".parse::<ExtractionMode>().unwrap(), ExtractionMode::PerBatch);
        assert!("per-line".parse::<ExtractionMode>().is_err());
    }

    #[test]
    fn extraction_mode_default_is_per_page() {
        assert_eq!(ExtractionMode::default(), ExtractionMode::PerPage);
        assert_eq!(
            serde_json::to_string(&ExtractionMode::PerBatch).unwrap(),
            "\"per_batch\""
        );
    }

    #[test]
    fn page_debug_hides_bytes() {
        let page = Page {
            index: 2,
            png: vec![0u8; 1024],
            width: 10,
            height: 20,
        };
        let debug = format!("{page:?}");
        assert!(debug.contains("png_bytes: 1024"));
        assert!(!debug.contains("[0, 0"));
    }

    #[test]
    fn document_accessors() {
        let doc = Document::default();
        assert!(doc.is_empty());
        assert_eq!(doc.len(), 0);
    }
}
