use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::merge::ClauseCollection;
use crate::pipeline::extraction::{ExtractionMode, Page};
use crate::pipeline::structuring::AnalysisMode;

// ═══════════════════════════════════════════
// Windows and batches
// ═══════════════════════════════════════════

/// Half-open page range `[start, end)` of one batch, 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWindow {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl BatchWindow {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Human page range, 1-based and inclusive ("5-9").
    pub fn page_label(&self) -> String {
        if self.len() <= 1 {
            format!("{}", self.start + 1)
        } else {
            format!("{}-{}", self.start + 1, self.end)
        }
    }
}

impl fmt::Display for BatchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.start, self.end)
    }
}

/// Pages of one window, borrowed from the rendered document.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub window: BatchWindow,
    pub pages: &'a [Page],
}

// ═══════════════════════════════════════════
// Run state machine
// ═══════════════════════════════════════════

/// `Idle -> Rendering -> {Batching -> Extracting -> Classifying -> Merging}* -> Complete`
///
/// `Idle` is implicit: a runner is idle until `run` is called, and no event
/// carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Rendering,
    Batching,
    Extracting,
    Classifying,
    Merging,
    Complete,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Rendering => "rendering",
            RunState::Batching => "batching",
            RunState::Extracting => "extracting",
            RunState::Classifying => "classifying",
            RunState::Merging => "merging",
            RunState::Complete => "complete",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress notifications emitted during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    /// Sent after `Rendering`, once pages and batches are counted.
    Started {
        run_id: Uuid,
        page_count: usize,
        batch_count: usize,
    },
    StateChanged {
        state: RunState,
        batch: Option<usize>,
    },
    Retrying {
        batch: usize,
        stage: RunState,
        attempt: u32,
        error: String,
    },
    BatchCompleted {
        batch: usize,
        outcome: BatchOutcome,
        clauses_total: usize,
    },
    Completed {
        clauses: usize,
        failed_batches: usize,
        cancelled: bool,
        duration_ms: u64,
    },
}

// ═══════════════════════════════════════════
// Reports
// ═══════════════════════════════════════════

/// How a batch ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Clauses were classified and merged (possibly zero new ones).
    Merged,
    /// No text came back, so classification was skipped.
    Empty,
    ExtractionFailed(String),
    ClassificationFailed(String),
}

impl BatchOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BatchOutcome::ExtractionFailed(_) | BatchOutcome::ClassificationFailed(_)
        )
    }
}

/// Per-batch accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub index: usize,
    pub window: BatchWindow,
    pub extraction_attempts: u32,
    pub classification_attempts: u32,
    /// Pages whose extraction failed while others in the batch succeeded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_pages: Vec<usize>,
    pub records_received: usize,
    pub records_added: usize,
    pub duplicates: usize,
    pub truncated: bool,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    pub fn new(window: BatchWindow) -> Self {
        Self {
            index: window.index,
            window,
            extraction_attempts: 0,
            classification_attempts: 0,
            failed_pages: Vec::new(),
            records_received: 0,
            records_added: 0,
            duplicates: 0,
            truncated: false,
            outcome: BatchOutcome::Empty,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: AnalysisMode,
    pub extraction_mode: ExtractionMode,
    pub started_at: DateTime<Utc>,
    pub page_count: usize,
    /// Windows the document was divided into, processed or not.
    pub batch_count: usize,
    pub clauses: ClauseCollection,
    pub batches: Vec<BatchReport>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn failed_batches(&self) -> impl Iterator<Item = &BatchReport> {
        self.batches.iter().filter(|b| b.outcome.is_failure())
    }

    /// 1-based numbers of pages lost inside batches that otherwise succeeded.
    pub fn unread_pages(&self) -> BTreeSet<usize> {
        self.batches
            .iter()
            .flat_map(|b| b.failed_pages.iter().map(|p| p + 1))
            .collect()
    }

    /// True when every window and every page was processed without failure.
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && self.batches.len() == self.batch_count
            && self.failed_batches().next().is_none()
            && self.batches.iter().all(|b| b.failed_pages.is_empty())
    }

    /// User-facing notice for a partial result, `None` when complete.
    pub fn incomplete_notice(&self) -> Option<String> {
        if self.is_complete() {
            return None;
        }

        let mut parts = Vec::new();
        let failed: Vec<String> = self
            .failed_batches()
            .map(|b| b.window.page_label())
            .collect();
        if !failed.is_empty() {
            parts.push(format!("pages {} could not be analyzed", failed.join(", ")));
        }
        let unread: Vec<String> = self.unread_pages().iter().map(|p| p.to_string()).collect();
        match unread.len() {
            0 => {}
            1 => parts.push(format!("page {} could not be read", unread[0])),
            _ => parts.push(format!("pages {} could not be read", unread.join(", "))),
        }
        if self.cancelled || self.batches.len() < self.batch_count {
            let skipped = self.batch_count.saturating_sub(self.batches.len());
            parts.push(format!("the run was stopped with {skipped} batch(es) unprocessed"));
        }

        Some(format!(
            "Analysis incomplete for part of the document: {}.",
            parts.join("; ")
        ))
    }
}

// ═══════════════════════════════════════════
// Cancellation
// ═══════════════════════════════════════════

/// Cooperative cancellation flag shared between a caller and a run.
///
/// Checked before each batch and between pages; requests already in
/// flight are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
