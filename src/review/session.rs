//! ReviewSession: clauses of one run plus everything the user did with them.
//!
//! Owns its state outright; nothing is global. `reset()` returns the session
//! to empty for the next document.

use std::collections::HashMap;

use super::{ClauseAnalyst, Decision, DecisionEntry, EmailDrafter, ReviewError};
use crate::pipeline::batch::{ClauseCollection, ClauseEntry, ClauseId, RunReport};

#[derive(Debug, Clone)]
pub struct ReviewSession {
    clauses: ClauseCollection,
    decisions: HashMap<ClauseId, Decision>,
    implications: HashMap<ClauseId, String>,
    email: Option<String>,
}

impl ReviewSession {
    pub fn new(clauses: ClauseCollection) -> Self {
        Self {
            clauses,
            decisions: HashMap::new(),
            implications: HashMap::new(),
            email: None,
        }
    }

    pub fn from_report(report: RunReport) -> Self {
        Self::new(report.clauses)
    }

    pub fn clauses(&self) -> &ClauseCollection {
        &self.clauses
    }

    /// Record a decision, replacing any earlier one for the clause.
    pub fn decide(&mut self, id: ClauseId, decision: Decision) -> Result<(), ReviewError> {
        if self.clauses.get(&id).is_none() {
            return Err(ReviewError::UnknownClause(id.to_string()));
        }
        if let Decision::Counter { proposal } = &decision {
            if proposal.trim().is_empty() {
                return Err(ReviewError::EmptyCounterProposal);
            }
        }
        tracing::debug!(clause = %id, decision = %decision, "Decision recorded");
        self.decisions.insert(id, decision);
        // A drafted email no longer reflects the decisions.
        self.email = None;
        Ok(())
    }

    /// Record a decision for the clause with 1-based `number`.
    pub fn decide_by_number(
        &mut self,
        number: usize,
        decision: Decision,
    ) -> Result<ClauseId, ReviewError> {
        let id = self
            .clauses
            .by_number(number)
            .map(|e| e.id)
            .ok_or_else(|| ReviewError::UnknownClause(format!("#{number}")))?;
        self.decide(id, decision)?;
        Ok(id)
    }

    /// Apply decisions file entries in order. Stops at the first invalid one.
    pub fn apply_entries(&mut self, entries: &[DecisionEntry]) -> Result<usize, ReviewError> {
        for entry in entries {
            self.decide_by_number(entry.clause, entry.to_decision()?)?;
        }
        Ok(entries.len())
    }

    pub fn decision(&self, id: &ClauseId) -> Option<&Decision> {
        self.decisions.get(id)
    }

    pub fn clear_decision(&mut self, id: &ClauseId) -> Option<Decision> {
        let removed = self.decisions.remove(id);
        if removed.is_some() {
            self.email = None;
        }
        removed
    }

    /// Decided clauses in clause order.
    pub fn decisions(&self) -> Vec<(&ClauseEntry, &Decision)> {
        self.clauses
            .iter()
            .filter_map(|e| self.decisions.get(&e.id).map(|d| (e, d)))
            .collect()
    }

    pub fn cached_implications(&self, id: &ClauseId) -> Option<&str> {
        self.implications.get(id).map(String::as_str)
    }

    /// Implications for a clause, computed once and then served from cache.
    pub fn implications(
        &mut self,
        id: &ClauseId,
        analyst: &ClauseAnalyst,
    ) -> Result<&str, ReviewError> {
        let entry = self
            .clauses
            .get(id)
            .ok_or_else(|| ReviewError::UnknownClause(id.to_string()))?;

        if !self.implications.contains_key(id) {
            let text = analyst.implications(&entry.record)?;
            self.implications.insert(*id, text);
        }
        Ok(self.implications.get(id).map(String::as_str).unwrap_or_default())
    }

    /// Draft (or return the already drafted) review email.
    pub fn draft_email(&mut self, drafter: &EmailDrafter) -> Result<&str, ReviewError> {
        if self.email.is_none() {
            let email = drafter.draft(&self.clauses, &self.decisions)?;
            self.email = Some(email);
        }
        Ok(self.email.as_deref().unwrap_or_default())
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Discard clauses, decisions, cached implications and the email.
    pub fn reset(&mut self) {
        self.clauses = ClauseCollection::new(self.clauses.mode());
        self.decisions.clear();
        self.implications.clear();
        self.email = None;
    }
}
