use std::sync::Arc;

use super::prompt::build_terms_prompt;
use super::types::LlmClient;
use super::StructuringError;
use crate::config::DEFAULT_EMAIL_MODEL;
use crate::pipeline::retry::RetryPolicy;

/// Plain-language review of a terms-and-conditions text.
///
/// Single completion call; the response is Markdown with a "concerning and
/// risky" section ahead of the general terms.
pub struct TermsAnalyst {
    client: Arc<dyn LlmClient>,
    model: String,
    retry: RetryPolicy,
}

impl TermsAnalyst {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            model: DEFAULT_EMAIL_MODEL.to_string(),
            retry: RetryPolicy::no_retry(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn analyze_terms(&self, terms_text: &str) -> Result<String, StructuringError> {
        let terms_text = terms_text.trim();
        if terms_text.is_empty() {
            return Err(StructuringError::EmptyInput);
        }

        let _span =
            tracing::info_span!("analyze_terms", model = %self.model, text_len = terms_text.len())
                .entered();

        let prompt = build_terms_prompt(terms_text);
        let attempted = self
            .retry
            .run(
                |_| self.client.generate(&self.model, &prompt, None),
                |attempt, error| {
                    tracing::warn!(attempt, error = %error, "Terms analysis failed, retrying");
                },
            )
            .map_err(|e| StructuringError::Service(e.into_inner()))?;

        tracing::info!(attempts = attempted.attempts, "Terms analysis complete");
        Ok(attempted.value.trim().to_string())
    }
}
