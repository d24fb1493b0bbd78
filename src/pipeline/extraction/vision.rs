//! Contract text extraction from page images via a vision model.
//!
//! The model's reply is taken verbatim as the batch text: legally significant
//! passages are asked for word for word, routine ones may be summarised.

use std::sync::Arc;

use base64::Engine as _;

use super::types::{ExtractionMode, Page};
use super::ExtractionError;
use crate::config::DEFAULT_VISION_MODEL;
use crate::pipeline::batch::CancellationToken;
use crate::pipeline::retry::{Attempted, RetryError, RetryPolicy};
use crate::pipeline::structuring::prompt::{BATCH_EXTRACTION_PROMPT, PAGE_EXTRACTION_PROMPT};
use crate::pipeline::structuring::types::VisionClient;

/// Text extracted for one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchText {
    pub text: String,
    /// Total requests made, retries included.
    pub attempts: u32,
    /// Pages whose request ultimately failed (per-page mode only).
    pub failed_pages: Vec<usize>,
    /// Set when cancellation stopped the batch between pages.
    pub interrupted: bool,
}

/// Extraction client adapter: page images in, raw text out.
pub struct ContractVisionExtractor {
    client: Arc<dyn VisionClient>,
    model: String,
    mode: ExtractionMode,
    retry: RetryPolicy,
}

impl ContractVisionExtractor {
    pub fn new(client: Arc<dyn VisionClient>) -> Self {
        Self {
            client,
            model: DEFAULT_VISION_MODEL.to_string(),
            mode: ExtractionMode::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_mode(mut self, mode: ExtractionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn mode(&self) -> ExtractionMode {
        self.mode
    }

    /// One retried request carrying `pages` in order.
    ///
    /// The reply is returned as is, blank or not; only service errors are retried.
    fn request(
        &self,
        pages: &[Page],
        prompt: &str,
        on_retry: &mut dyn FnMut(u32, &ExtractionError),
    ) -> Result<Attempted<String>, ExtractionError> {
        let images: Vec<String> = pages
            .iter()
            .map(|p| base64::engine::general_purpose::STANDARD.encode(&p.png))
            .collect();

        let _span = tracing::info_span!(
            "vision_extract",
            model = %self.model,
            first_page = pages.first().map(|p| p.index),
            image_count = images.len(),
        )
        .entered();
        let start = std::time::Instant::now();

        let outcome = self.retry.run(
            |_attempt| -> Result<String, ExtractionError> {
                self.client
                    .chat_with_images(&self.model, prompt, &images, None)
                    .map_err(ExtractionError::from)
            },
            |attempt, error| {
                tracing::warn!(attempt, error = %error, "Vision extraction failed, retrying");
                on_retry(attempt, error);
            },
        );

        match outcome {
            Ok(attempted) => {
                tracing::info!(
                    attempts = attempted.attempts,
                    text_len = attempted.value.len(),
                    elapsed_ms = %start.elapsed().as_millis(),
                    "Vision extraction complete"
                );
                Ok(attempted)
            }
            Err(RetryError::Cancelled { attempts, .. }) => {
                Err(ExtractionError::Cancelled { attempts })
            }
            Err(e) => {
                let attempts = e.attempts();
                let reason = e.into_inner().to_string();
                tracing::warn!(attempts, reason = %reason, "Vision extraction gave up");
                Err(ExtractionError::ExtractionFailed { attempts, reason })
            }
        }
    }

    /// Extract one page, reporting retries.
    pub fn try_extract_page_with(
        &self,
        page: &Page,
        on_retry: &mut dyn FnMut(u32, &ExtractionError),
    ) -> Result<Attempted<String>, ExtractionError> {
        self.request(std::slice::from_ref(page), PAGE_EXTRACTION_PROMPT, on_retry)
    }

    pub fn try_extract_page(&self, page: &Page) -> Result<Attempted<String>, ExtractionError> {
        self.try_extract_page_with(page, &mut |_, _| {})
    }

    /// Extract all `pages` in a single request, reporting retries.
    pub fn try_extract_pages_with(
        &self,
        pages: &[Page],
        on_retry: &mut dyn FnMut(u32, &ExtractionError),
    ) -> Result<Attempted<String>, ExtractionError> {
        self.request(pages, BATCH_EXTRACTION_PROMPT, on_retry)
    }

    /// Extract one page, degrading to empty text on failure.
    pub fn extract(&self, page: &Page) -> String {
        self.try_extract_page(page)
            .map(|a| a.value)
            .unwrap_or_default()
    }

    /// Extract the text of one batch according to the configured mode.
    ///
    /// Per-page mode joins non-blank page texts with `"\n"` in page order.
    /// A failed page contributes nothing and is listed in `failed_pages`;
    /// the batch only fails if every page failed. Cancellation is checked
    /// between pages and between retries, and marks the batch interrupted.
    pub fn extract_batch(
        &self,
        pages: &[Page],
        cancel: &CancellationToken,
        on_retry: &mut dyn FnMut(u32, &ExtractionError),
    ) -> Result<BatchText, ExtractionError> {
        match self.mode {
            ExtractionMode::PerBatch => match self.try_extract_pages_with(pages, on_retry) {
                Ok(attempted) => Ok(BatchText {
                    text: attempted.value,
                    attempts: attempted.attempts,
                    ..BatchText::default()
                }),
                Err(ExtractionError::Cancelled { attempts }) => Ok(BatchText {
                    attempts,
                    interrupted: true,
                    ..BatchText::default()
                }),
                Err(e) => Err(e),
            },
            ExtractionMode::PerPage => {
                let mut out = BatchText::default();
                let mut texts = Vec::with_capacity(pages.len());
                let mut last_error = None;

                for page in pages {
                    if cancel.is_cancelled() {
                        out.interrupted = true;
                        break;
                    }
                    match self.try_extract_page_with(page, on_retry) {
                        Ok(attempted) => {
                            out.attempts += attempted.attempts;
                            if attempted.value.trim().is_empty() {
                                tracing::debug!(page = page.index, "Blank page skipped");
                            } else {
                                texts.push(attempted.value);
                            }
                        }
                        Err(ExtractionError::Cancelled { attempts }) => {
                            out.attempts += attempts;
                            out.interrupted = true;
                            break;
                        }
                        Err(e) => {
                            if let ExtractionError::ExtractionFailed { attempts, .. } = &e {
                                out.attempts += attempts;
                            }
                            out.failed_pages.push(page.index);
                            last_error = Some(e);
                        }
                    }
                }

                if !out.interrupted && texts.is_empty() && !out.failed_pages.is_empty() {
                    if let Some(ExtractionError::ExtractionFailed { reason, .. }) = last_error {
                        return Err(ExtractionError::ExtractionFailed {
                            attempts: out.attempts,
                            reason,
                        });
                    }
                }

                out.text = texts.join("\n");
                Ok(out)
            }
        }
    }
}
