//! PipelineRunner: drives one analysis run end to end.
//!
//! Render → {Batch → Extract → Classify → Merge}* → Complete.
//! Batches run sequentially and merge in batch order, so "first occurrence
//! wins" is well defined. A failing batch degrades to no clauses and the run
//! carries on; only rendering errors abort.
//!
//! `Idle` is the state before [`PipelineRunner::run`] is called and is never
//! emitted. The first event is `StateChanged(Rendering)`; `Started` follows
//! once the page count is known.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use super::error::PipelineError;
use super::merge::ClauseCollection;
use super::scheduler::schedule;
use super::types::*;
use crate::pipeline::diagnostic::DiagnosticDump;
use crate::pipeline::extraction::{
    render_document, ContractVisionExtractor, Document, ExtractionError, PdfPageRenderer,
};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::structuring::{ClauseClassifier, LlmClient, StructuringError, VisionClient};
use crate::pipeline_config::PipelineConfig;

/// Orchestrates rendering, extraction, classification and merging.
pub struct PipelineRunner {
    renderer: Arc<dyn PdfPageRenderer>,
    vision: Arc<dyn VisionClient>,
    llm: Arc<dyn LlmClient>,
    config: PipelineConfig,
    retry: RetryPolicy,
    dump_base: Option<PathBuf>,
}

impl PipelineRunner {
    pub fn new(
        renderer: Arc<dyn PdfPageRenderer>,
        vision: Arc<dyn VisionClient>,
        llm: Arc<dyn LlmClient>,
        config: PipelineConfig,
    ) -> Self {
        let retry = config.retry_policy();
        Self {
            renderer,
            vision,
            llm,
            config,
            retry,
            dump_base: None,
        }
    }

    /// Replace the retry policy derived from the config (e.g. to inject a sleeper).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Write diagnostic artifacts under `dir` when set.
    pub fn with_dump_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.dump_base = dir;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Retry policy that stops between attempts once `cancel` is set.
    fn run_retry(&self, cancel: &CancellationToken) -> RetryPolicy {
        self.retry.clone().with_cancellation(cancel.clone())
    }

    fn extractor(&self, cancel: &CancellationToken) -> ContractVisionExtractor {
        ContractVisionExtractor::new(self.vision.clone())
            .with_model(&self.config.vision_model)
            .with_mode(self.config.extraction_mode)
            .with_retry(self.run_retry(cancel))
    }

    fn classifier(&self, cancel: &CancellationToken) -> ClauseClassifier {
        ClauseClassifier::new(self.llm.clone())
            .with_model(&self.config.text_model)
            .with_mode(self.config.mode)
            .with_max_records(self.config.max_records_per_call)
            .with_retry(self.run_retry(cancel))
    }

    /// Render `pdf_bytes` and analyze every batch.
    ///
    /// Fails only if the document cannot be rendered.
    pub fn run(
        &self,
        pdf_bytes: &[u8],
        cancel: &CancellationToken,
        progress: Option<&dyn Fn(&RunEvent)>,
    ) -> Result<RunReport, PipelineError> {
        if let Some(progress) = progress {
            progress(&RunEvent::StateChanged {
                state: RunState::Rendering,
                batch: None,
            });
        }

        let document = render_document(self.renderer.as_ref(), pdf_bytes, self.config.render_scale)
            .map_err(|e| {
                tracing::error!(error = %e, "Rendering failed, aborting run");
                PipelineError::from(e)
            })?;

        Ok(self.run_document(&document, cancel, progress))
    }

    /// Analyze an already rendered document. Never fails as a whole.
    pub fn run_document(
        &self,
        document: &Document,
        cancel: &CancellationToken,
        progress: Option<&dyn Fn(&RunEvent)>,
    ) -> RunReport {
        let emit = |event: RunEvent| {
            if let Some(progress) = progress {
                progress(&event);
            }
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let window = self.config.window;
        let batch_count = window.window_count(document.len());

        let _span = tracing::info_span!(
            "pipeline_run",
            run_id = %run_id,
            pages = document.len(),
            batches = batch_count,
            mode = %self.config.mode,
            extraction = %self.config.extraction_mode,
        )
        .entered();

        let dump = DiagnosticDump::for_run(self.dump_base.as_deref(), &run_id);
        if let Some(dump) = &dump {
            for page in document.pages() {
                dump.page_image(page.index, &page.png);
            }
        }

        emit(RunEvent::Started {
            run_id,
            page_count: document.len(),
            batch_count,
        });

        let extractor = self.extractor(cancel);
        let classifier = self.classifier(cancel);
        let mut clauses = ClauseCollection::new(self.config.mode);
        let mut batches = Vec::with_capacity(batch_count);
        let mut cancelled = false;

        for batch in schedule(document.pages(), window) {
            if cancel.is_cancelled() {
                tracing::info!(batch = batch.window.index, "Run cancelled before batch");
                cancelled = true;
                break;
            }

            match self.process_batch(&batch, &extractor, &classifier, &mut clauses, cancel, dump.as_ref(), &emit) {
                Some(report) => {
                    emit(RunEvent::BatchCompleted {
                        batch: report.index,
                        outcome: report.outcome.clone(),
                        clauses_total: clauses.len(),
                    });
                    batches.push(report);
                }
                None => {
                    tracing::info!(batch = batch.window.index, "Run cancelled during batch");
                    cancelled = true;
                    break;
                }
            }
        }

        emit(RunEvent::StateChanged {
            state: RunState::Complete,
            batch: None,
        });

        let report = RunReport {
            run_id,
            mode: self.config.mode,
            extraction_mode: self.config.extraction_mode,
            started_at,
            page_count: document.len(),
            batch_count,
            clauses,
            batches,
            cancelled,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        let failed_batches = report.failed_batches().count();
        if let Some(notice) = report.incomplete_notice() {
            tracing::warn!(failed_batches, cancelled, "{notice}");
        }
        tracing::info!(
            clauses = report.clauses.len(),
            failed_batches,
            duration_ms = report.duration_ms,
            "Run complete"
        );

        emit(RunEvent::Completed {
            clauses: report.clauses.len(),
            failed_batches,
            cancelled,
            duration_ms: report.duration_ms,
        });

        if let Some(dump) = &dump {
            dump.report(&report);
        }

        report
    }

    /// Extract, classify and merge one batch.
    ///
    /// Returns `None` if cancellation interrupted extraction or
    /// classification; the partial batch is discarded unmerged.
    #[allow(clippy::too_many_arguments)]
    fn process_batch(
        &self,
        batch: &Batch<'_>,
        extractor: &ContractVisionExtractor,
        classifier: &ClauseClassifier,
        clauses: &mut ClauseCollection,
        cancel: &CancellationToken,
        dump: Option<&DiagnosticDump>,
        emit: &dyn Fn(RunEvent),
    ) -> Option<BatchReport> {
        let index = batch.window.index;
        let _span = tracing::info_span!("batch", index, window = %batch.window).entered();
        let mut report = BatchReport::new(batch.window);

        emit(RunEvent::StateChanged {
            state: RunState::Batching,
            batch: Some(index),
        });
        emit(RunEvent::StateChanged {
            state: RunState::Extracting,
            batch: Some(index),
        });

        let extracted = extractor.extract_batch(
            batch.pages,
            cancel,
            &mut |attempt, error: &ExtractionError| {
                emit(RunEvent::Retrying {
                    batch: index,
                    stage: RunState::Extracting,
                    attempt,
                    error: error.to_string(),
                });
            },
        );

        let text = match extracted {
            Ok(batch_text) if batch_text.interrupted => return None,
            Ok(batch_text) => {
                report.extraction_attempts = batch_text.attempts;
                report.failed_pages = batch_text.failed_pages;
                batch_text.text
            }
            Err(e) => {
                let reason = match e {
                    ExtractionError::ExtractionFailed { attempts, reason } => {
                        report.extraction_attempts = attempts;
                        reason
                    }
                    other => other.to_string(),
                };
                tracing::warn!(reason = %reason, "Batch extraction failed, continuing without it");
                report.outcome = BatchOutcome::ExtractionFailed(reason);
                return Some(report);
            }
        };

        if let Some(dump) = dump {
            dump.batch_text(index, &text);
        }

        if text.trim().is_empty() {
            tracing::info!("Batch produced no text, skipping classification");
            report.outcome = BatchOutcome::Empty;
            return Some(report);
        }

        emit(RunEvent::StateChanged {
            state: RunState::Classifying,
            batch: Some(index),
        });

        let classified = classifier.try_classify_with(
            &text,
            &mut |attempt, error: &StructuringError| {
                emit(RunEvent::Retrying {
                    batch: index,
                    stage: RunState::Classifying,
                    attempt,
                    error: error.to_string(),
                });
            },
        );

        match classified {
            Ok(classification) => {
                report.classification_attempts = classification.attempts;
                report.records_received = classification.received;
                report.truncated = classification.truncated();

                if let Some(dump) = dump {
                    dump.batch_clauses(index, &classification.records);
                }

                emit(RunEvent::StateChanged {
                    state: RunState::Merging,
                    batch: Some(index),
                });
                let stats = clauses.merge(classification.records);
                report.records_added = stats.added;
                report.duplicates = stats.duplicates;
                report.outcome = BatchOutcome::Merged;

                tracing::info!(
                    added = stats.added,
                    duplicates = stats.duplicates,
                    total = clauses.len(),
                    "Batch merged"
                );
            }
            Err(StructuringError::Cancelled { .. }) => return None,
            Err(e) => {
                let reason = match e {
                    StructuringError::ClassificationFailed { attempts, reason } => {
                        report.classification_attempts = attempts;
                        reason
                    }
                    other => other.to_string(),
                };
                tracing::warn!(reason = %reason, "Batch classification failed, continuing without it");
                report.outcome = BatchOutcome::ClassificationFailed(reason);
            }
        }

        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::pipeline::batch::WindowConfig;
    use crate::pipeline::extraction::{ExtractionMode, MockPdfPageRenderer};
    use crate::pipeline::retry::{Backoff, RecordingSleeper};
    use crate::pipeline::structuring::{
        AnalysisMode, ChatError, MockLlmClient, MockVisionClient,
    };

    /// Classifier mock that names one clause after every page it sees,
    /// so overlapping windows produce duplicate titles.
    fn page_titles_llm() -> MockLlmClient {
        MockLlmClient::with_responder(|prompt| {
            let items: Vec<serde_json::Value> = prompt
                .lines()
                .filter_map(|l| l.strip_prefix("page "))
                .map(|n| serde_json::json!({"clause_title": format!("Clause {n}"), "description": format!("From page {n}")}))
                .collect();
            Ok(serde_json::to_string(&items).unwrap_or_default())
        })
    }

    fn runner(
        pages: usize,
        vision: MockVisionClient,
        llm: MockLlmClient,
        config: PipelineConfig,
    ) -> PipelineRunner {
        PipelineRunner::new(
            Arc::new(MockPdfPageRenderer::new(pages).with_text_pages()),
            Arc::new(vision),
            Arc::new(llm),
            config,
        )
        .with_retry(
            RetryPolicy::new(3, Backoff::default()).with_sleeper(Arc::new(RecordingSleeper::new())),
        )
    }

    #[test]
    fn twelve_pages_run_three_batches_and_dedup_overlap() {
        let r = runner(12, MockVisionClient::echo(), page_titles_llm(), PipelineConfig::default());
        let report = r.run(b"%PDF", &CancellationToken::new(), None).unwrap();

        assert_eq!(report.batch_count, 3);
        assert_eq!(report.batches.len(), 3);
        assert!(report.is_complete());

        // Five records per full window, four kept: [0:5] -> 0..3, [4:9] -> 4..7, [8:12] -> 8..11
        let titles: Vec<String> = report.clauses.records().map(|c| c.title.clone()).collect();
        let expected: Vec<String> = (0..12).map(|n| format!("Clause {n}")).collect();
        assert_eq!(titles, expected);
        assert!(report.batches[0].truncated);
        assert_eq!(report.batches[0].records_received, 5);
        assert_eq!(report.batches[2].records_received, 4);
    }

    #[test]
    fn overlap_duplicate_counted_and_first_wins() {
        // Every batch yields "Termination" with a batch-specific description
        let llm = MockLlmClient::with_responder(|prompt| {
            let first = prompt
                .lines()
                .find_map(|l| l.strip_prefix("page "))
                .unwrap_or("?")
                .to_string();
            Ok(format!(
                r#"[{{"clause_title":"Termination","description":"starting at page {first}"}}]"#
            ))
        });
        let r = runner(9, MockVisionClient::echo(), llm, PipelineConfig::default());
        let report = r.run(b"%PDF", &CancellationToken::new(), None).unwrap();

        assert_eq!(report.clauses.len(), 1);
        assert_eq!(report.clauses.entries()[0].record.description, "starting at page 0");
        assert_eq!(report.batches[1].duplicates, 1);
        assert_eq!(report.batches[1].records_added, 0);
    }

    #[test]
    fn failed_classification_degrades_batch_only() {
        let llm = MockLlmClient::with_responder(|prompt| {
            if prompt.contains("page 4") {
                Ok("definitely not json".into())
            } else {
                Ok(r#"[{"clause_title":"Payment","description":"You pay monthly."}]"#.into())
            }
        });
        let config = PipelineConfig {
            window: WindowConfig::new(4, 0).unwrap(),
            ..PipelineConfig::default()
        };
        let r = runner(12, MockVisionClient::echo(), llm, config);
        let report = r.run(b"%PDF", &CancellationToken::new(), None).unwrap();

        assert_eq!(report.batches.len(), 3);
        assert!(matches!(
            report.batches[1].outcome,
            BatchOutcome::ClassificationFailed(_)
        ));
        assert_eq!(report.batches[1].classification_attempts, 3);
        assert_eq!(report.batches[2].outcome, BatchOutcome::Merged);
        assert_eq!(report.clauses.len(), 1);
        assert!(report.incomplete_notice().unwrap().contains("pages 5-8"));
    }

    #[test]
    fn failed_extraction_degrades_batch_only() {
        let config = PipelineConfig {
            window: WindowConfig::new(2, 0).unwrap(),
            extraction_mode: ExtractionMode::PerBatch,
            ..PipelineConfig::default()
        };
        let vision = MockVisionClient::echo().with_script(vec![Err(ChatError::Unauthorized(401))]);
        let r = runner(4, vision, page_titles_llm(), config);
        let report = r.run(b"%PDF", &CancellationToken::new(), None).unwrap();

        assert!(matches!(report.batches[0].outcome, BatchOutcome::ExtractionFailed(_)));
        assert_eq!(report.batches[0].extraction_attempts, 1);
        assert_eq!(report.batches[1].outcome, BatchOutcome::Merged);
        let titles: Vec<&str> = report.clauses.records().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Clause 2", "Clause 3"]);
    }

    #[test]
    fn blank_vision_output_skips_classification() {
        let vision = Arc::new(MockVisionClient::new("   \n"));
        let llm = Arc::new(MockLlmClient::new("[]"));
        let r = PipelineRunner::new(
            Arc::new(MockPdfPageRenderer::new(3)),
            vision.clone(),
            llm.clone(),
            PipelineConfig::default(),
        )
        .with_retry(
            RetryPolicy::new(20, Backoff::default()).with_sleeper(Arc::new(RecordingSleeper::new())),
        );
        let report = r.run(b"%PDF", &CancellationToken::new(), None).unwrap();

        // A blank page is a valid reply: one call per page, no retries
        assert_eq!(report.batches[0].outcome, BatchOutcome::Empty);
        assert_eq!(report.batches[0].extraction_attempts, 3);
        assert_eq!(vision.call_count(), 3);
        assert_eq!(llm.call_count(), 0);
        assert!(report.is_complete());
        assert!(report.clauses.is_empty());
    }

    #[test]
    fn page_lost_in_per_page_mode_marks_run_incomplete() {
        let vision = MockVisionClient::echo()
            .with_script(vec![Ok("page 0".into()), Err(ChatError::Unauthorized(401))]);
        let r = runner(3, vision, page_titles_llm(), PipelineConfig::default());
        let report = r.run(b"%PDF", &CancellationToken::new(), None).unwrap();

        assert_eq!(report.batches[0].outcome, BatchOutcome::Merged);
        assert_eq!(report.batches[0].failed_pages, vec![1]);
        let titles: Vec<&str> = report.clauses.records().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Clause 0", "Clause 2"]);
        assert!(!report.is_complete());
        assert!(report.incomplete_notice().unwrap().contains("page 2 could not be read"));
    }

    #[test]
    fn corrupt_document_aborts_before_remote_calls() {
        let vision = Arc::new(MockVisionClient::echo());
        let llm = Arc::new(MockLlmClient::new("[]"));
        let r = PipelineRunner::new(
            Arc::new(MockPdfPageRenderer::corrupt()),
            vision.clone(),
            llm.clone(),
            PipelineConfig::default(),
        );
        let err = r.run(b"not a pdf", &CancellationToken::new(), None).unwrap_err();
        assert!(matches!(err, PipelineError::DocumentCorrupt(_)));
        assert_eq!(vision.call_count(), 0);
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn cancelled_before_start_processes_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let r = runner(12, MockVisionClient::echo(), page_titles_llm(), PipelineConfig::default());
        let report = r.run(b"%PDF", &cancel, None).unwrap();

        assert!(report.cancelled);
        assert!(report.batches.is_empty());
        assert!(report.incomplete_notice().unwrap().contains("3 batch(es) unprocessed"));
    }

    #[test]
    fn cancellation_from_progress_stops_after_current_batch() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let on_event = move |event: &RunEvent| {
            if matches!(event, RunEvent::BatchCompleted { batch: 0, .. }) {
                trigger.cancel();
            }
        };
        let r = runner(12, MockVisionClient::echo(), page_titles_llm(), PipelineConfig::default());
        let report = r.run(b"%PDF", &cancel, Some(&on_event)).unwrap();

        assert!(report.cancelled);
        assert_eq!(report.batches.len(), 1);
        assert!(!report.clauses.is_empty());
    }

    #[test]
    fn cancellation_on_first_retry_stops_retrying() {
        let script = (0..20).map(|_| Err(ChatError::RateLimited)).collect();
        let vision = Arc::new(MockVisionClient::echo().with_script(script));
        let llm = Arc::new(page_titles_llm());
        let r = PipelineRunner::new(
            Arc::new(MockPdfPageRenderer::new(3).with_text_pages()),
            vision.clone(),
            llm.clone(),
            PipelineConfig::default(),
        )
        .with_retry(
            RetryPolicy::new(20, Backoff::default()).with_sleeper(Arc::new(RecordingSleeper::new())),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let on_event = move |event: &RunEvent| {
            if matches!(event, RunEvent::Retrying { attempt: 1, .. }) {
                trigger.cancel();
            }
        };
        let report = r.run(b"%PDF", &cancel, Some(&on_event)).unwrap();

        assert_eq!(vision.call_count(), 1);
        assert_eq!(llm.call_count(), 0);
        assert!(report.cancelled);
        assert!(report.batches.is_empty());
        assert!(report.incomplete_notice().unwrap().contains("1 batch(es) unprocessed"));
    }

    #[test]
    fn cancellation_during_classification_retries_discards_batch() {
        let llm = Arc::new(MockLlmClient::new("not json"));
        let r = PipelineRunner::new(
            Arc::new(MockPdfPageRenderer::new(2).with_text_pages()),
            Arc::new(MockVisionClient::echo()),
            llm.clone(),
            PipelineConfig::default(),
        )
        .with_retry(
            RetryPolicy::new(20, Backoff::default()).with_sleeper(Arc::new(RecordingSleeper::new())),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let on_event = move |event: &RunEvent| {
            if matches!(event, RunEvent::Retrying { stage: RunState::Classifying, .. }) {
                trigger.cancel();
            }
        };
        let report = r.run(b"%PDF", &cancel, Some(&on_event)).unwrap();

        assert_eq!(llm.call_count(), 1);
        assert!(report.cancelled);
        assert!(report.batches.is_empty());
    }

    #[test]
    fn events_follow_state_machine() {
        let events = Mutex::new(Vec::new());
        let on_event = |event: &RunEvent| {
            if let Ok(mut e) = events.lock() {
                e.push(event.clone());
            }
        };
        let config = PipelineConfig {
            window: WindowConfig::new(5, 0).unwrap(),
            ..PipelineConfig::default()
        };
        let r = runner(3, MockVisionClient::echo(), page_titles_llm(), config);
        r.run(b"%PDF", &CancellationToken::new(), Some(&on_event)).unwrap();

        let states: Vec<RunState> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                RunEvent::StateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                RunState::Rendering,
                RunState::Batching,
                RunState::Extracting,
                RunState::Classifying,
                RunState::Merging,
                RunState::Complete,
            ]
        );
        let events = events.lock().unwrap();
        // Idle is never emitted; rendering comes first, then Started
        assert!(matches!(
            events[0],
            RunEvent::StateChanged { state: RunState::Rendering, batch: None }
        ));
        assert!(matches!(events[1], RunEvent::Started { page_count: 3, batch_count: 1, .. }));
        assert!(matches!(events.last(), Some(RunEvent::Completed { clauses: 3, .. })));
    }

    #[test]
    fn retries_are_reported_as_events() {
        let vision = MockVisionClient::echo().with_script(vec![Err(ChatError::RateLimited)]);
        let retries = Mutex::new(Vec::new());
        let on_event = |event: &RunEvent| {
            if let RunEvent::Retrying { batch, stage, attempt, .. } = event {
                if let Ok(mut r) = retries.lock() {
                    r.push((*batch, *stage, *attempt));
                }
            }
        };
        let r = runner(1, vision, page_titles_llm(), PipelineConfig::default());
        r.run(b"%PDF", &CancellationToken::new(), Some(&on_event)).unwrap();

        assert_eq!(retries.lock().unwrap().clone(), vec![(0, RunState::Extracting, 1)]);
    }

    #[test]
    fn summary_mode_dedups_on_description() {
        let llm = MockLlmClient::new(
            r#"[{"topic":"Penalty","description":"You pay 10% for late payment."}]"#,
        );
        let config = PipelineConfig {
            mode: AnalysisMode::Summary,
            ..PipelineConfig::default()
        };
        let r = runner(12, MockVisionClient::echo(), llm, config);
        let report = r.run(b"%PDF", &CancellationToken::new(), None).unwrap();
        assert_eq!(report.clauses.len(), 1);
        assert_eq!(report.clauses.mode(), AnalysisMode::Summary);
    }

    #[test]
    fn diagnostic_dump_written_when_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let r = runner(2, MockVisionClient::echo(), page_titles_llm(), PipelineConfig::default())
            .with_dump_dir(Some(tmp.path().to_path_buf()));
        let report = r.run(b"%PDF", &CancellationToken::new(), None).unwrap();

        let dir = tmp.path().join(report.run_id.to_string());
        assert!(dir.join("01-page-0.png").exists());
        assert!(dir.join("01-page-1.png").exists());
        assert_eq!(
            std::fs::read_to_string(dir.join("02-batch-0-text.txt")).unwrap(),
            "page 0\npage 1"
        );
        assert!(dir.join("03-batch-0-clauses.json").exists());
        assert!(dir.join("04-report.json").exists());
    }
}
