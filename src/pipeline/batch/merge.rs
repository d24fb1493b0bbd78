//! Dedup merger: combines clause records across batches.
//!
//! Overlapping windows re-extract the same clauses, so every record is keyed
//! by its identity string (title in detailed mode, description in summary
//! mode). The first arrival wins; later records with the same identity are
//! dropped silently.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::structuring::{AnalysisMode, ClauseRecord};

/// Stable identifier assigned to a clause when it enters a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClauseId(Uuid);

impl ClauseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClauseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClauseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClauseEntry {
    pub id: ClauseId,
    #[serde(flatten)]
    pub record: ClauseRecord,
}

/// Counts from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub duplicates: usize,
}

/// Insertion-ordered clauses with no two sharing an identity.
#[derive(Debug, Clone, Serialize)]
pub struct ClauseCollection {
    mode: AnalysisMode,
    entries: Vec<ClauseEntry>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl ClauseCollection {
    pub fn new(mode: AnalysisMode) -> Self {
        Self {
            mode,
            entries: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ClauseEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClauseEntry> {
        self.entries.iter()
    }

    pub fn records(&self) -> impl Iterator<Item = &ClauseRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    pub fn get(&self, id: &ClauseId) -> Option<&ClauseEntry> {
        self.entries.iter().find(|e| e.id == *id)
    }

    /// 0-based position of `id` in arrival order.
    pub fn position(&self, id: &ClauseId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == *id)
    }

    /// Clause by 1-based number, as shown to users.
    pub fn by_number(&self, number: usize) -> Option<&ClauseEntry> {
        number.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn contains_identity(&self, identity: &str) -> bool {
        self.seen.contains(identity)
    }

    /// Append `record` unless its identity is already present.
    pub fn insert(&mut self, record: ClauseRecord) -> Option<ClauseId> {
        let identity = record.identity(self.mode).to_string();
        if self.seen.contains(&identity) {
            tracing::debug!(identity = %identity, "Duplicate clause suppressed");
            return None;
        }
        let id = ClauseId::new();
        self.seen.insert(identity);
        self.entries.push(ClauseEntry { id, record });
        Some(id)
    }

    /// Merge one batch's records in arrival order.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = ClauseRecord>) -> MergeStats {
        let mut stats = MergeStats::default();
        for record in incoming {
            match self.insert(record) {
                Some(_) => stats.added += 1,
                None => stats.duplicates += 1,
            }
        }
        stats
    }
}

/// Functional form of [`ClauseCollection::merge`].
pub fn merge(
    mut collection: ClauseCollection,
    incoming: impl IntoIterator<Item = ClauseRecord>,
) -> ClauseCollection {
    collection.merge(incoming);
    collection
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(title: &str, description: &str) -> ClauseRecord {
        ClauseRecord::new(title, description)
    }

    fn titles(c: &ClauseCollection) -> Vec<&str> {
        c.records().map(|r| r.title.as_str()).collect()
    }

    #[test]
    fn merging_same_record_twice_keeps_one() {
        let mut c = ClauseCollection::new(AnalysisMode::Detailed);
        c.merge(vec![rec("A", "a")]);
        let stats = c.merge(vec![rec("A", "a")]);
        assert_eq!(c.len(), 1);
        assert_eq!(stats, MergeStats { added: 0, duplicates: 1 });
    }

    #[test]
    fn first_arrival_order_preserved() {
        let c = merge(
            merge(ClauseCollection::new(AnalysisMode::Detailed), vec![rec("A", "a"), rec("B", "b")]),
            vec![rec("B", "b"), rec("C", "c")],
        );
        assert_eq!(titles(&c), vec!["A", "B", "C"]);
    }

    #[test]
    fn first_termination_wins() {
        let mut c = ClauseCollection::new(AnalysisMode::Detailed);
        c.merge(vec![rec("Termination", "from batch 0")]);
        c.merge(vec![rec("Termination", "from batch 1")]);
        assert_eq!(c.len(), 1);
        assert_eq!(c.entries()[0].record.description, "from batch 0");
    }

    #[test]
    fn duplicates_within_one_batch_suppressed() {
        let mut c = ClauseCollection::new(AnalysisMode::Detailed);
        let stats = c.merge(vec![rec("Fees", "x"), rec("Fees", "y")]);
        assert_eq!(stats, MergeStats { added: 1, duplicates: 1 });
    }

    #[test]
    fn summary_mode_keys_on_description() {
        let mut c = ClauseCollection::new(AnalysisMode::Summary);
        c.merge(vec![rec("Renewal", "You are renewed yearly.")]);
        c.merge(vec![rec("Auto renewal", "You are renewed yearly.")]);
        c.merge(vec![rec("Renewal", "A different description.")]);
        assert_eq!(c.len(), 2);
        assert_eq!(titles(&c), vec!["Renewal", "Renewal"]);
    }

    #[test]
    fn identity_is_exact_string_equality() {
        let mut c = ClauseCollection::new(AnalysisMode::Detailed);
        c.merge(vec![rec("Termination", "a"), rec("termination", "b"), rec("Termination ", "c")]);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn ids_are_unique_and_resolvable() {
        let mut c = ClauseCollection::new(AnalysisMode::Detailed);
        let a = c.insert(rec("A", "a")).unwrap();
        let b = c.insert(rec("B", "b")).unwrap();
        assert_ne!(a, b);
        assert_eq!(c.get(&b).unwrap().record.title, "B");
        assert_eq!(c.position(&b), Some(1));
        assert_eq!(c.by_number(1).unwrap().id, a);
        assert!(c.by_number(0).is_none());
        assert!(c.by_number(3).is_none());
        assert!(c.contains_identity("A"));
    }

    #[test]
    fn serializes_entries_flat() {
        let mut c = ClauseCollection::new(AnalysisMode::Detailed);
        c.insert(rec("Fees", "Monthly fee."));
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["mode"], "detailed");
        assert_eq!(json["entries"][0]["title"], "Fees");
        assert!(json["entries"][0]["id"].is_string());
        assert!(json.get("seen").is_none());
    }
}
