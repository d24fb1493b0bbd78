//! Review email drafting from per-clause decisions.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::{Decision, ReviewError};
use crate::config::DEFAULT_EMAIL_MODEL;
use crate::pipeline::batch::{ClauseCollection, ClauseId};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::structuring::prompt::build_email_prompt;
use crate::pipeline::structuring::LlmClient;

/// One decision as presented to the email model.
#[derive(Debug, Serialize)]
struct EmailDecision<'a> {
    clause: &'a str,
    decision: &'static str,
    counter_proposal: &'a str,
}

/// Pretty JSON list of decided clauses, in clause order.
///
/// Clauses without a decision are left out.
pub fn decisions_payload(
    clauses: &ClauseCollection,
    decisions: &HashMap<ClauseId, Decision>,
) -> String {
    let items: Vec<EmailDecision<'_>> = clauses
        .iter()
        .filter_map(|entry| {
            decisions.get(&entry.id).map(|decision| EmailDecision {
                clause: &entry.record.title,
                decision: decision.kind().label(),
                counter_proposal: decision.counter_proposal().unwrap_or(""),
            })
        })
        .collect();
    serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
}

pub struct EmailDrafter {
    client: Arc<dyn LlmClient>,
    model: String,
    retry: RetryPolicy,
}

impl EmailDrafter {
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

    /// Draft the email. Returns an empty string without calling the service
    /// when there are no clauses or no decisions for them.
    pub fn draft(
        &self,
        clauses: &ClauseCollection,
        decisions: &HashMap<ClauseId, Decision>,
    ) -> Result<String, ReviewError> {
        let decided = clauses.iter().filter(|e| decisions.contains_key(&e.id)).count();
        if clauses.is_empty() || decided == 0 {
            tracing::debug!("No decisions to report, skipping email");
            return Ok(String::new());
        }

        let _span = tracing::info_span!("draft_email", model = %self.model, decided).entered();

        let prompt = build_email_prompt(&decisions_payload(clauses, decisions));
        let attempted = self
            .retry
            .run(
                |_| self.client.generate(&self.model, &prompt, None),
                |attempt, error| {
                    tracing::warn!(attempt, error = %error, "Email drafting failed, retrying");
                },
            )
            .map_err(|e| ReviewError::Service(e.into_inner()))?;

        tracing::info!(attempts = attempted.attempts, "Review email drafted");
        Ok(attempted.value.trim().to_string())
    }
}
