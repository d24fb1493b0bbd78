//! Batch scheduler: partitions a page sequence into overlapping windows.
//!
//! Windows are `[start, start + batch_size)` for
//! `start = 0, step, 2 * step, ...` with `step = batch_size - overlap`,
//! clipped to the page count, until `start >= len`.

use serde::{Deserialize, Serialize};

use super::error::PipelineError;
use super::types::{Batch, BatchWindow};
use crate::pipeline::extraction::Page;

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_OVERLAP: usize = 1;

/// Validated window geometry: `batch_size > 0` and `overlap < batch_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWindowConfig")]
pub struct WindowConfig {
    batch_size: usize,
    overlap: usize,
}

#[derive(Deserialize)]
struct RawWindowConfig {
    batch_size: usize,
    overlap: usize,
}

impl TryFrom<RawWindowConfig> for WindowConfig {
    type Error = PipelineError;

    fn try_from(raw: RawWindowConfig) -> Result<Self, Self::Error> {
        WindowConfig::new(raw.batch_size, raw.overlap)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl WindowConfig {
    /// Rejects geometries that would never advance.
    pub fn new(batch_size: usize, overlap: usize) -> Result<Self, PipelineError> {
        if batch_size == 0 || overlap >= batch_size {
            return Err(PipelineError::InvalidWindowConfig {
                batch_size,
                overlap,
            });
        }
        Ok(Self {
            batch_size,
            overlap,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Pages advanced per window. Always at least one.
    pub fn step(&self) -> usize {
        self.batch_size - self.overlap
    }

    /// Number of windows produced for `page_count` pages.
    pub fn window_count(&self, page_count: usize) -> usize {
        page_count.div_ceil(self.step())
    }
}

/// Lazy iterator over the windows for a page count.
#[derive(Debug, Clone)]
pub struct Windows {
    config: WindowConfig,
    page_count: usize,
    next_start: usize,
    next_index: usize,
}

impl Iterator for Windows {
    type Item = BatchWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_start >= self.page_count {
            return None;
        }
        let start = self.next_start;
        let end = (start + self.config.batch_size).min(self.page_count);
        let window = BatchWindow {
            index: self.next_index,
            start,
            end,
        };
        self.next_start += self.config.step();
        self.next_index += 1;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .page_count
            .saturating_sub(self.next_start)
            .div_ceil(self.config.step());
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Windows {}

/// Windows over `page_count` pages.
pub fn windows(config: WindowConfig, page_count: usize) -> Windows {
    Windows {
        config,
        page_count,
        next_start: 0,
        next_index: 0,
    }
}

/// Lazily slice `pages` into batches.
pub fn schedule(pages: &[Page], config: WindowConfig) -> impl Iterator<Item = Batch<'_>> + '_ {
    windows(config, pages.len()).map(move |window| Batch {
        pages: &pages[window.start..window.end],
        window,
    })
}
