//! Clause review: per-clause decisions, legal implications and the
//! review email sent back to the counterparty.

pub mod session;
pub mod email;
pub mod analyst;

pub use session::ReviewSession;
pub use email::EmailDrafter;
pub use analyst::ClauseAnalyst;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::structuring::ChatError;

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("Unknown clause: {0}")]
    UnknownClause(String),

    #[error("A counter decision needs a non-empty proposal")]
    EmptyCounterProposal,

    #[error("Completion service error: {0}")]
    Service(#[from] ChatError),

    #[error("Invalid decisions: {0}")]
    InvalidDecisions(String),
}

/// What the user decided for one clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
    Counter { proposal: String },
}

impl Decision {
    /// Counter decision; the proposal is trimmed and must not be blank.
    pub fn counter(proposal: &str) -> Result<Self, ReviewError> {
        let proposal = proposal.trim();
        if proposal.is_empty() {
            return Err(ReviewError::EmptyCounterProposal);
        }
        Ok(Decision::Counter {
            proposal: proposal.to_string(),
        })
    }

    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::Accept => DecisionKind::Accept,
            Decision::Reject => DecisionKind::Reject,
            Decision::Counter { .. } => DecisionKind::Counter,
        }
    }

    pub fn counter_proposal(&self) -> Option<&str> {
        match self {
            Decision::Counter { proposal } => Some(proposal),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    #[serde(alias = "Accept", alias = "accepted")]
    Accept,
    #[serde(alias = "Reject", alias = "rejected")]
    Reject,
    #[serde(alias = "Counter", alias = "countered")]
    Counter,
}

impl DecisionKind {
    /// Label used in the review email payload.
    pub fn label(&self) -> &'static str {
        match self {
            DecisionKind::Accept => "Accept",
            DecisionKind::Reject => "Reject",
            DecisionKind::Counter => "Counter",
        }
    }
}

/// One line of a decisions file, addressing a clause by its 1-based number.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DecisionEntry {
    pub clause: usize,
    pub decision: DecisionKind,
    #[serde(default)]
    pub counter_proposal: Option<String>,
}

impl DecisionEntry {
    pub fn to_decision(&self) -> Result<Decision, ReviewError> {
        match self.decision {
            DecisionKind::Accept => Ok(Decision::Accept),
            DecisionKind::Reject => Ok(Decision::Reject),
            DecisionKind::Counter => Decision::counter(self.counter_proposal.as_deref().unwrap_or("")),
        }
    }
}

/// Parse a decisions file: a JSON array of [`DecisionEntry`].
pub fn parse_decisions(json: &str) -> Result<Vec<DecisionEntry>, ReviewError> {
    serde_json::from_str(json).map_err(|e| ReviewError::InvalidDecisions(e.to_string()))
}
