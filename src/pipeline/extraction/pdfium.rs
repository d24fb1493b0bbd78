//! Contract page rasterisation with PDFium.
//!
//! Every page becomes a PNG at `scale` times its point size, capped at
//! `MAX_DIMENSION_PX` on the longer side. `PdfiumRenderer` holds no state;
//! each call binds the library afresh.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView, GrayImage, ImageOutputFormat, Luma};
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::types::{Document, Page, PdfPageRenderer};
use super::ExtractionError;

/// Maximum dimension (width or height) for rendered page images.
/// Prevents OOM on extremely large pages or absurd scale factors.
const MAX_DIMENSION_PX: u32 = 4096;

/// Renders PDF pages to PNG images using Google PDFium.
pub struct PdfiumRenderer;

impl PdfiumRenderer {
    /// Create a new renderer, verifying the PDFium library is loadable.
    pub fn new() -> Result<Self, ExtractionError> {
        let _ = load_pdfium()?;
        Ok(Self)
    }
}

/// Load the PDFium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var (explicit path to the library file)
/// 2. Alongside the running executable, then `lib/` and `../lib/` next to it
/// 3. System library search paths
fn load_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
            ExtractionError::PdfiumUnavailable(format!("Failed to load PDFium from {path}: {e}"))
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidates = [
                exe_dir.to_path_buf(),
                exe_dir.join("lib"),
                exe_dir.join("..").join("lib"),
            ];

            for dir in &candidates {
                let lib_path = Pdfium::pdfium_platform_library_name_at_path(
                    dir.to_string_lossy().as_ref(),
                );
                if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                    debug!(dir = %dir.display(), "Loaded PDFium from candidate directory");
                    return Ok(Pdfium::new(bindings));
                }
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        ExtractionError::PdfiumUnavailable(format!(
            "Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

/// Map PDF load errors: encrypted documents get their own variant, anything
/// else means the bytes are not a usable PDF.
fn map_load_error(e: PdfiumError) -> ExtractionError {
    let msg = format!("{e}");
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::DocumentCorrupt(msg)
    }
}

/// Compute pixel dimensions for rendering at `scale`, applying the dimension guard.
///
/// Returns (width_px, height_px), both clamped to [1, MAX_DIMENSION_PX].
/// Preserves aspect ratio when capping.
fn compute_render_dimensions(width_points: f32, height_points: f32, scale: f32) -> (u32, u32) {
    let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ExtractionError> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

/// Rasterise one loaded page and encode it as PNG.
fn render_loaded_page(
    page: &PdfPage,
    page_number: usize,
    scale: f32,
) -> Result<Page, ExtractionError> {
    let width_points = page.width().value;
    let height_points = page.height().value;
    let (target_w, target_h) = compute_render_dimensions(width_points, height_points, scale);

    let uncapped_w = (width_points * scale) as u32;
    let uncapped_h = (height_points * scale) as u32;
    if target_w != uncapped_w.max(1) || target_h != uncapped_h.max(1) {
        warn!(
            page = page_number,
            raw_width = uncapped_w,
            raw_height = uncapped_h,
            capped_width = target_w,
            capped_height = target_h,
            "Page dimensions capped to {MAX_DIMENSION_PX}px",
        );
    }

    let config = PdfRenderConfig::new()
        .set_target_width(target_w as i32)
        .set_maximum_height(target_h as i32);

    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| ExtractionError::PdfRendering {
            page: page_number,
            reason: format!("Rendering failed: {e}"),
        })?;

    let rendered = bitmap.as_image();
    let (width, height) = rendered.dimensions();
    let png = encode_png(&rendered)?;

    debug!(
        page = page_number,
        width,
        height,
        png_size = png.len(),
        "Rendered PDF page to PNG"
    );

    Ok(Page {
        index: page_number,
        png,
        width,
        height,
    })
}

impl PdfPageRenderer for PdfiumRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        scale: f32,
    ) -> Result<Page, ExtractionError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;

        let pages = document.pages();

        let page_index = u16::try_from(page_number).map_err(|_| ExtractionError::PdfRendering {
            page: page_number,
            reason: format!("Page index {page_number} exceeds u16 maximum"),
        })?;

        let page = pages
            .get(page_index)
            .map_err(|_| ExtractionError::PdfRendering {
                page: page_number,
                reason: format!(
                    "Page {page_number} out of range (document has {} pages)",
                    pages.len()
                ),
            })?;

        render_loaded_page(&page, page_number, scale)
    }

    /// Loads the document once for all pages.
    fn render_all(&self, pdf_bytes: &[u8], scale: f32) -> Result<Vec<Page>, ExtractionError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;

        document
            .pages()
            .iter()
            .enumerate()
            .map(|(n, page)| render_loaded_page(&page, n, scale))
            .collect()
    }
}

/// Render a whole document.
///
/// Empty input and zero-page documents are reported as corrupt; nothing
/// downstream can make use of them.
pub fn render_document(
    renderer: &dyn PdfPageRenderer,
    pdf_bytes: &[u8],
    scale: f32,
) -> Result<Document, ExtractionError> {
    if pdf_bytes.is_empty() {
        return Err(ExtractionError::DocumentCorrupt("input is empty".into()));
    }

    let _span = tracing::info_span!("render_document", bytes = pdf_bytes.len(), scale).entered();
    let start = std::time::Instant::now();

    let pages = renderer.render_all(pdf_bytes, scale)?;
    if pages.is_empty() {
        return Err(ExtractionError::DocumentCorrupt("document has no pages".into()));
    }

    tracing::info!(
        pages = pages.len(),
        elapsed_ms = %start.elapsed().as_millis(),
        "Document rendered"
    );
    Ok(Document::new(pages))
}

// ── Mock for testing ──────────────────────────────────────

/// Page renderer that never touches PDFium.
///
/// Pages are blank white PNGs. With `with_text_pages()` the page bytes are
/// the UTF-8 text `"page {n}"` instead, so `MockVisionClient::echo()` reads
/// back distinct text for every page.
pub struct MockPdfPageRenderer {
    page_count: usize,
    text_pages: bool,
    corrupt: bool,
}

impl MockPdfPageRenderer {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            text_pages: false,
            corrupt: false,
        }
    }

    pub fn with_text_pages(mut self) -> Self {
        self.text_pages = true;
        self
    }

    /// Every document fails to load as if it were not a PDF.
    pub fn corrupt() -> Self {
        Self {
            corrupt: true,
            ..Self::new(0)
        }
    }
}

impl PdfPageRenderer for MockPdfPageRenderer {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        if self.corrupt {
            return Err(ExtractionError::DocumentCorrupt("not a PDF (mock)".into()));
        }
        Ok(self.page_count)
    }

    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page_number: usize,
        scale: f32,
    ) -> Result<Page, ExtractionError> {
        if page_number >= self.page_count {
            return Err(ExtractionError::PdfRendering {
                page: page_number,
                reason: format!("no page {page_number} in a {}-page mock", self.page_count),
            });
        }
        if self.text_pages {
            return Ok(Page {
                index: page_number,
                png: format!("page {page_number}").into_bytes(),
                width: 1,
                height: 1,
            });
        }

        // A tiny A4-proportioned sheet, so scale still shows in the size.
        let (width, height) = compute_render_dimensions(6.0, 8.5, scale);
        let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([255])));
        Ok(Page {
            index: page_number,
            png: encode_png(&blank)?,
            width,
            height,
        })
    }
}
