//! Indexer state and sweep reports

use crate::lifecycle::LifecycleAction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// What happened to one document during a sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Parsed,
    Embedded { chunks: usize },
    ParseFailed { reason: String },
    /// Chunks already inserted stay in the table
    EmbedFailed { reason: String, inserted: usize },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::ParseFailed { .. } | Outcome::EmbedFailed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentOutcome {
    pub doc_id: String,
    pub base: String,
    pub outcome: Outcome,
}

/// Result of one full sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub documents: Vec<DocumentOutcome>,
    /// Bases with at least one document transition
    pub touched: BTreeSet<String>,
    pub actions: Vec<LifecycleAction>,
}

impl SweepReport {
    pub fn record(&mut self, doc_id: &str, base: &str, outcome: Outcome) {
        self.touched.insert(base.to_string());
        self.documents.push(DocumentOutcome {
            doc_id: doc_id.to_string(),
            base: base.to_string(),
            outcome,
        });
    }

    pub fn failures(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| d.outcome.is_failure())
            .count()
    }

    /// Outcomes recorded for one document, in order
    pub fn outcomes_for(&self, doc_id: &str) -> Vec<&Outcome> {
        self.documents
            .iter()
            .filter(|d| d.doc_id == doc_id)
            .map(|d| &d.outcome)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.actions.is_empty()
    }
}

/// State owned by one [`super::BackgroundIndexer`]
#[derive(Debug, Clone, Default)]
pub struct IndexerState {
    /// Completed sweeps since start
    pub sweeps: u64,
    /// A sweep is in progress
    pub running: bool,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub last_report: Option<SweepReport>,
}

impl IndexerState {
    pub(super) fn begin(&mut self) {
        self.running = true;
    }

    pub(super) fn finish(&mut self, report: SweepReport) {
        self.running = false;
        self.sweeps += 1;
        self.last_sweep_at = Some(Utc::now());
        self.last_report = Some(report);
    }
}
