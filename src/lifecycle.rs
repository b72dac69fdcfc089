//! Index lifecycle of knowledge-base chunk tables
//!
//! Every table keeps a full-text index on its chunk text. Once a table grows
//! past the promotion threshold it gets an approximate vector index, exactly
//! once: a marker file per table records the promotion and is never removed
//! while the table lives.

use crate::config::Config;
use crate::error::Result;
use crate::kb::{CHUNK_TEXT, CHUNK_VECTOR};
use crate::store::{DistanceMetric, IndexKind, VectorStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Marker file contents
const MARKER_CONTENT: &str = "1";

/// What a lifecycle check did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleAction {
    FullTextCreated { table: String },
    Promoted { table: String, rows: usize },
}

pub struct IndexLifecycle {
    store: Arc<dyn VectorStore>,
    tips_dir: PathBuf,
    threshold: usize,
}

impl IndexLifecycle {
    pub fn new(store: Arc<dyn VectorStore>, tips_dir: PathBuf, threshold: usize) -> Self {
        Self {
            store,
            tips_dir,
            threshold,
        }
    }

    pub fn from_config(store: Arc<dyn VectorStore>, config: &Config) -> Self {
        Self::new(
            store,
            config.index_tips_dir(),
            config.lifecycle.promotion_threshold,
        )
    }

    pub fn marker_path(&self, table: &str) -> PathBuf {
        self.tips_dir.join(format!("{}.pl", table))
    }

    /// Whether `table` has been promoted; only the marker is consulted
    pub fn is_promoted(&self, table: &str) -> bool {
        self.marker_path(table).exists()
    }

    /// Create the full-text index on chunk text if absent; true when created
    pub async fn ensure_fulltext(&self, table: &str) -> Result<bool> {
        let present = self
            .store
            .list_indexes(table)
            .await?
            .iter()
            .any(|i| i.column == CHUNK_TEXT && i.kind == IndexKind::FullText);
        if present {
            return Ok(false);
        }

        self.store
            .create_index(table, CHUNK_TEXT, IndexKind::FullText, false)
            .await?;
        debug!(table = %table, "Created full-text index");
        Ok(true)
    }

    /// Rebuild the full-text index so it covers recent inserts
    pub async fn rebuild_fulltext(&self, table: &str) -> Result<()> {
        self.store
            .create_index(table, CHUNK_TEXT, IndexKind::FullText, true)
            .await
    }

    /// Promote `table` when unmarked and over the threshold
    ///
    /// The marker is written before the build starts, so a failed build is
    /// not attempted again.
    pub async fn maybe_promote(&self, table: &str) -> Result<Option<usize>> {
        if self.is_promoted(table) {
            return Ok(None);
        }

        let rows = self.store.count(table, None).await?;
        if rows <= self.threshold {
            return Ok(None);
        }

        std::fs::create_dir_all(&self.tips_dir)?;
        std::fs::write(self.marker_path(table), MARKER_CONTENT)?;

        info!(table = %table, rows, "Promoting table to approximate vector index");
        self.store
            .create_index(
                table,
                CHUNK_VECTOR,
                IndexKind::Approximate(DistanceMetric::Cosine),
                true,
            )
            .await
            .inspect_err(|e| warn!(table = %table, error = %e, "Vector index build failed"))?;

        Ok(Some(rows))
    }

    /// Ensure the full-text index, then promote if due
    pub async fn check(&self, table: &str) -> Result<Vec<LifecycleAction>> {
        let mut actions = Vec::new();
        if self.ensure_fulltext(table).await? {
            actions.push(LifecycleAction::FullTextCreated {
                table: table.to_string(),
            });
        }
        if let Some(rows) = self.maybe_promote(table).await? {
            actions.push(LifecycleAction::Promoted {
                table: table.to_string(),
                rows,
            });
        }
        Ok(actions)
    }

    /// Forget a promotion; used when the table itself is dropped
    pub fn remove_marker(&self, table: &str) -> Result<()> {
        let path = self.marker_path(table);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
