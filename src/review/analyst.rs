use std::sync::Arc;

use super::ReviewError;
use crate::config::DEFAULT_TEXT_MODEL;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::structuring::prompt::build_implications_prompt;
use crate::pipeline::structuring::{ClauseRecord, LlmClient};

/// Legal implications of a single clause.
///
/// One completion call covering legal standing, benefits, risks and
/// recommended counters, answered as a single paragraph.
pub struct ClauseAnalyst {
    client: Arc<dyn LlmClient>,
    model: String,
    retry: RetryPolicy,
}

impl ClauseAnalyst {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            model: DEFAULT_TEXT_MODEL.to_string(),
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

    pub fn implications(&self, clause: &ClauseRecord) -> Result<String, ReviewError> {
        let _span = tracing::info_span!(
            "clause_implications",
            model = %self.model,
            clause = %clause.title,
        )
        .entered();

        let prompt = build_implications_prompt(&clause.title, &clause.description);
        let attempted = self
            .retry
            .run(
                |_| self.client.generate(&self.model, &prompt, None),
                |attempt, error| {
                    tracing::warn!(attempt, error = %error, "Implications request failed, retrying");
                },
            )
            .map_err(|e| ReviewError::Service(e.into_inner()))?;

        tracing::debug!(attempts = attempted.attempts, "Implications received");
        Ok(attempted.value.trim().to_string())
    }
}
