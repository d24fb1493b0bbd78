use std::sync::Arc;

use super::parser::parse_clause_payload;
use super::prompt::build_classification_prompt;
use super::types::{AnalysisMode, ClauseRecord, LlmClient};
use super::StructuringError;
use crate::config::DEFAULT_TEXT_MODEL;
use crate::pipeline::retry::RetryPolicy;

/// Records accepted from a single classification call.
pub const DEFAULT_MAX_RECORDS_PER_CALL: usize = 4;

/// Outcome of one successful classification call.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Parsed records, already capped.
    pub records: Vec<ClauseRecord>,
    /// Records the model actually returned, before the cap.
    pub received: usize,
    pub attempts: u32,
}

impl Classification {
    pub fn truncated(&self) -> bool {
        self.received > self.records.len()
    }
}

/// Turns extracted contract text into clause records via the text model.
pub struct ClauseClassifier {
    client: Arc<dyn LlmClient>,
    model: String,
    mode: AnalysisMode,
    max_records: usize,
    retry: RetryPolicy,
}

impl ClauseClassifier {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            model: DEFAULT_TEXT_MODEL.to_string(),
            mode: AnalysisMode::default(),
            max_records: DEFAULT_MAX_RECORDS_PER_CALL,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_mode(mut self, mode: AnalysisMode) -> Self {
        self.mode = mode;
        self
    }

    /// Clamped to at least one record.
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    /// Classify `text`, reporting the outcome of every attempt.
    ///
    /// Transport failures and unparseable payloads share the retry budget.
    /// Gives up with `ClassificationFailed` once the budget is spent or a
    /// fatal service error occurs.
    pub fn try_classify_with(
        &self,
        text: &str,
        on_retry: &mut dyn FnMut(u32, &StructuringError),
    ) -> Result<Classification, StructuringError> {
        if text.trim().is_empty() {
            return Err(StructuringError::EmptyInput);
        }

        let _span = tracing::info_span!(
            "classify_clauses",
            model = %self.model,
            mode = %self.mode,
            text_len = text.len(),
        )
        .entered();
        let start = std::time::Instant::now();

        let prompt = build_classification_prompt(self.mode, text, self.max_records);

        let outcome = self.retry.run(
            |_attempt| -> Result<Vec<ClauseRecord>, StructuringError> {
                let raw = self.client.generate(&self.model, &prompt, None)?;
                parse_clause_payload(&raw, self.mode)
            },
            |attempt, error| {
                tracing::warn!(attempt, error = %error, "Classification attempt failed, retrying");
                on_retry(attempt, error);
            },
        );

        let attempted = outcome.map_err(|e| {
            if e.is_cancelled() {
                return StructuringError::Cancelled {
                    attempts: e.attempts(),
                };
            }
            let attempts = e.attempts();
            let reason = e.into_inner().to_string();
            tracing::warn!(attempts, reason = %reason, "Classification gave up");
            StructuringError::ClassificationFailed { attempts, reason }
        })?;

        let attempts = attempted.attempts;
        let mut records = attempted.value;
        let received = records.len();
        if received > self.max_records {
            tracing::warn!(
                received,
                cap = self.max_records,
                "Model returned more clauses than allowed, truncating"
            );
            records.truncate(self.max_records);
        }

        tracing::info!(
            attempts,
            records = records.len(),
            elapsed_ms = %start.elapsed().as_millis(),
            "Classification complete"
        );

        Ok(Classification {
            records,
            received,
            attempts,
        })
    }

    pub fn try_classify(&self, text: &str) -> Result<Classification, StructuringError> {
        self.try_classify_with(text, &mut |_, _| {})
    }

    /// Classify `text`, degrading to an empty list on any failure.
    pub fn classify(&self, text: &str) -> Vec<ClauseRecord> {
        match self.try_classify(text) {
            Ok(classification) => classification.records,
            Err(e) => {
                tracing::warn!(error = %e, "Classification degraded to no clauses");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch::CancellationToken;
    use crate::pipeline::retry::{Backoff, RecordingSleeper};
    use crate::pipeline::structuring::client::{MockLlmClient, ScriptedLlmClient};
    use crate::pipeline::structuring::client_types::ChatError;

    const VALID: &str = r#"[{"clause_title":"Termination","description":"30 days notice."}]"#;

    fn fast_retry(max: u32) -> (RetryPolicy, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        (
            RetryPolicy::new(max, Backoff::default()).with_sleeper(sleeper.clone()),
            sleeper,
        )
    }

    #[test]
    fn parses_valid_response_first_try() {
        let client = Arc::new(MockLlmClient::new(VALID));
        let classifier = ClauseClassifier::new(client.clone());
        let result = classifier.try_classify("CLAUSE 7. Termination ...").unwrap();
        assert_eq!(result.records, vec![ClauseRecord::new("Termination", "30 days notice.")]);
        assert_eq!(result.attempts, 1);
        assert!(client.prompts()[0].contains("CLAUSE 7. Termination"));
    }

    #[test]
    fn malformed_then_valid_retries_once() {
        let client = Arc::new(ScriptedLlmClient::new(vec![
            Ok("Sure! Here are the clauses: [".into()),
            Ok(VALID.into()),
        ]));
        let (retry, sleeper) = fast_retry(20);
        let classifier = ClauseClassifier::new(client.clone()).with_retry(retry);

        let mut retries = Vec::new();
        let result = classifier
            .try_classify_with("text", &mut |attempt, err| {
                assert!(matches!(err, StructuringError::MalformedPayload(_)));
                retries.push(attempt);
            })
            .unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.attempts, 2);
        assert_eq!(retries, vec![1]);
        assert_eq!(sleeper.delays().len(), 1);
        assert_eq!(client.call_count(), 2);
    }

    #[test]
    fn succeeds_on_twentieth_attempt() {
        let mut script: Vec<Result<String, ChatError>> =
            (0..19).map(|_| Err(ChatError::RateLimited)).collect();
        script.push(Ok(VALID.into()));
        let client = Arc::new(ScriptedLlmClient::new(script));
        let (retry, _) = fast_retry(20);
        let classifier = ClauseClassifier::new(client).with_retry(retry);

        let result = classifier.try_classify("text").unwrap();
        assert_eq!(result.attempts, 20);
        assert_eq!(result.records.len(), 1);
    }

    #[test]
    fn twenty_failures_return_empty() {
        let client = Arc::new(MockLlmClient::new("not json at all"));
        let (retry, sleeper) = fast_retry(20);
        let classifier = ClauseClassifier::new(client.clone()).with_retry(retry);

        assert!(classifier.classify("text").is_empty());
        assert_eq!(client.call_count(), 20);
        assert_eq!(sleeper.delays().len(), 19);
    }

    #[test]
    fn exhausted_reports_attempts() {
        let client = Arc::new(MockLlmClient::failing(ChatError::Timeout(5)));
        let (retry, _) = fast_retry(3);
        let classifier = ClauseClassifier::new(client).with_retry(retry);

        match classifier.try_classify("text").unwrap_err() {
            StructuringError::ClassificationFailed { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancellation_between_attempts_stops_classification() {
        let client = Arc::new(MockLlmClient::new("not json at all"));
        let cancel = CancellationToken::new();
        let (retry, sleeper) = fast_retry(20);
        let classifier = ClauseClassifier::new(client.clone())
            .with_retry(retry.with_cancellation(cancel.clone()));

        let err = classifier
            .try_classify_with("text", &mut |_, _| cancel.cancel())
            .unwrap_err();
        assert!(matches!(err, StructuringError::Cancelled { attempts: 1 }));
        assert_eq!(client.call_count(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn unauthorized_stops_after_one_attempt() {
        let client = Arc::new(MockLlmClient::failing(ChatError::Unauthorized(401)));
        let (retry, sleeper) = fast_retry(20);
        let classifier = ClauseClassifier::new(client.clone()).with_retry(retry);

        assert!(classifier.classify("text").is_empty());
        assert_eq!(client.call_count(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn overflow_truncated_to_cap() {
        let raw = serde_json::to_string(
            &(0..6)
                .map(|i| serde_json::json!({"clause_title": format!("C{i}"), "description": "d"}))
                .collect::<Vec<_>>(),
        )
        .unwrap();
        let classifier = ClauseClassifier::new(Arc::new(MockLlmClient::new(&raw)));

        let result = classifier.try_classify("text").unwrap();
        assert_eq!(result.received, 6);
        assert_eq!(result.records.len(), 4);
        assert!(result.truncated());
        assert_eq!(result.records[3].title, "C3");
    }

    #[test]
    fn summary_mode_parses_topics() {
        let client = Arc::new(MockLlmClient::new(
            r#"[{"topic":"Non-compete","description":"You cannot work for rivals for 2 years."}]"#,
        ));
        let classifier = ClauseClassifier::new(client.clone()).with_mode(AnalysisMode::Summary);
        let records = classifier.classify("text");
        assert_eq!(records[0].title, "Non-compete");
        assert!(client.prompts()[0].contains("\"topic\""));
    }

    #[test]
    fn empty_text_rejected_without_call() {
        let client = Arc::new(MockLlmClient::new(VALID));
        let classifier = ClauseClassifier::new(client.clone());
        assert!(matches!(
            classifier.try_classify("  \n "),
            Err(StructuringError::EmptyInput)
        ));
        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn max_records_clamped_to_one() {
        let raw = r#"[{"clause_title":"A","description":"a"},{"clause_title":"B","description":"b"}]"#;
        let classifier =
            ClauseClassifier::new(Arc::new(MockLlmClient::new(raw))).with_max_records(0);
        assert_eq!(classifier.classify("text").len(), 1);
    }
}
