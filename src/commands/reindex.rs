//! Reindex command implementation

use crate::error::{Error, Result};
use crate::kb::KnowledgeBaseManager;
use serde::Serialize;
use tracing::info;

/// Reindex statistics
#[derive(Debug, Clone, Serialize)]
pub struct ReindexStats {
    pub base: String,
    pub documents_queued: u64,
    pub purged: bool,
}

/// Queue a base, or a single document of it, for reprocessing
///
/// Nothing is parsed or embedded here; the next sweep picks the documents up.
pub async fn cmd_reindex(
    manager: &KnowledgeBaseManager,
    base: &str,
    doc_id: Option<&str>,
    purge: bool,
) -> Result<ReindexStats> {
    let documents_queued = match doc_id {
        Some(doc_id) => {
            let in_base = manager
                .documents(base)
                .await?
                .iter()
                .any(|d| d.doc_id == doc_id);
            if !in_base {
                return Err(Error::DocumentNotFound(format!("{} in {}", doc_id, base)));
            }
            manager.reindex_document(doc_id, purge).await?;
            1
        }
        None => manager.reindex_base(base, purge).await?,
    };

    info!(base = %base, documents_queued, purge, "Queued for reindex");
    Ok(ReindexStats {
        base: base.to_string(),
        documents_queued,
        purged: purge,
    })
}

pub fn print_reindex_stats(stats: &ReindexStats) {
    println!(
        "✓ Queued {} document(s) in '{}' for reindex",
        stats.documents_queued, stats.base
    );
    if stats.purged {
        println!("  Existing chunks were removed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::kb::KnowledgeBaseConfig;
    use crate::meta::{DocumentRegistry, ParseState};
    use crate::store::{SqliteVectorStore, VectorStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reindex_document_must_belong_to_base() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::with_base_dir(temp.path().canonicalize().unwrap());
        config.embedding.dimension = 2;
        let store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open(&config.store_path()).await.unwrap());
        let registry = Arc::new(DocumentRegistry::new(store.clone()));
        let manager = KnowledgeBaseManager::new(Arc::new(config), store, registry.clone());

        for name in ["docs", "other"] {
            manager
                .create_base(KnowledgeBaseConfig::new(name, "m"))
                .await
                .unwrap();
        }
        let file = temp.path().join("a.md");
        std::fs::write(&file, "# A").unwrap();
        let doc = manager.add_document("docs", &file).await.unwrap();
        registry.set_state(&doc.doc_id, ParseState::Failed).await.unwrap();

        let err = cmd_reindex(&manager, "other", Some(&doc.doc_id), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(_)));

        let stats = cmd_reindex(&manager, "docs", Some(&doc.doc_id), false)
            .await
            .unwrap();
        assert_eq!(stats.documents_queued, 1);
        let doc = registry.get(&doc.doc_id).await.unwrap().unwrap();
        assert_eq!(doc.is_parsed, ParseState::Unparsed);

        let stats = cmd_reindex(&manager, "docs", None, true).await.unwrap();
        assert_eq!(stats.documents_queued, 1);
        assert!(stats.purged);
    }
}
