//! Run configuration for one analysis.
//!
//! Built from the connection `Settings` (model names) plus per-run knobs:
//! window geometry, analysis and extraction modes, retry budget, record cap
//! and render scale. CLI flags override the defaults.

use serde::Serialize;

use crate::config::Settings;
use crate::pipeline::batch::WindowConfig;
use crate::pipeline::extraction::{ExtractionMode, DEFAULT_RENDER_SCALE};
use crate::pipeline::retry::{Backoff, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::pipeline::structuring::{AnalysisMode, DEFAULT_MAX_RECORDS_PER_CALL, DEFAULT_TEMPERATURE};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub vision_model: String,
    pub text_model: String,
    pub window: WindowConfig,
    pub mode: AnalysisMode,
    pub extraction_mode: ExtractionMode,
    /// Attempt ceiling shared by extraction and classification calls.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Clause records kept from a single classification call.
    pub max_records_per_call: usize,
    /// Upscaling factor for page rasterisation.
    pub render_scale: f32,
    pub temperature: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            vision_model: settings.vision_model.clone(),
            text_model: settings.text_model.clone(),
            window: WindowConfig::default(),
            mode: AnalysisMode::default(),
            extraction_mode: ExtractionMode::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            max_records_per_call: DEFAULT_MAX_RECORDS_PER_CALL,
            render_scale: DEFAULT_RENDER_SCALE,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Retry policy for adapters, using the real thread sleeper.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff)
    }
}
