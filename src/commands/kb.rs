//! Knowledge base management commands

use crate::error::Result;
use crate::kb::{BaseSummary, KnowledgeBaseConfig, KnowledgeBaseManager, SearchStrategy};
use tracing::info;

/// Options for `kb create`; unset fields keep the base defaults
#[derive(Debug, Clone, Default)]
pub struct CreateBaseOptions {
    pub description: Option<String>,
    pub supplier: Option<String>,
    pub strategy: Option<SearchStrategy>,
    pub max_recall: Option<usize>,
    pub recall_accuracy: Option<f32>,
    pub vector_weight: Option<f32>,
    pub keyword_weight: Option<f32>,
    pub chunk_size: Option<usize>,
    pub overlap_size: Option<usize>,
    pub separators: Vec<String>,
}

/// Create a knowledge base
pub async fn cmd_create_base(
    manager: &KnowledgeBaseManager,
    name: &str,
    model: &str,
    options: CreateBaseOptions,
) -> Result<KnowledgeBaseConfig> {
    let mut kb = KnowledgeBaseConfig::new(name, model);
    kb.rag_desc = options.description;
    kb.separators = options.separators;
    if let Some(supplier) = options.supplier {
        kb.supplier_name = supplier;
    }
    if let Some(strategy) = options.strategy {
        kb.search_strategy = strategy;
    }
    if let Some(v) = options.max_recall {
        kb.max_recall = v;
    }
    if let Some(v) = options.recall_accuracy {
        kb.recall_accuracy = v;
    }
    if let Some(v) = options.vector_weight {
        kb.vector_weight = v;
    }
    if let Some(v) = options.keyword_weight {
        kb.keyword_weight = v;
    }
    if let Some(v) = options.chunk_size {
        kb.chunk_size = v;
    }
    if let Some(v) = options.overlap_size {
        kb.overlap_size = v;
    }

    info!(base = %name, "Creating knowledge base");
    manager.create_base(kb).await
}

/// Summaries of every knowledge base
pub async fn cmd_list_bases(manager: &KnowledgeBaseManager) -> Result<Vec<BaseSummary>> {
    let mut summaries = Vec::new();
    for name in manager.list_bases()? {
        summaries.push(manager.summary(&name).await?);
    }
    Ok(summaries)
}

pub async fn cmd_remove_base(manager: &KnowledgeBaseManager, name: &str) -> Result<()> {
    manager.remove_base(name).await
}

pub fn print_base_created(kb: &KnowledgeBaseConfig) {
    println!("✓ Created knowledge base '{}'", kb.rag_name);
    println!("  Supplier:  {}", kb.supplier_name);
    println!("  Model:     {}", kb.embedding_model);
    println!("  Strategy:  {}", kb.search_strategy);
    println!("  Chunking:  {} chars, {} overlap", kb.chunk_size, kb.overlap_size);
}

pub fn print_bases(summaries: &[BaseSummary]) {
    if summaries.is_empty() {
        println!("No knowledge bases. Create one with: kbindex kb create <name> --model <model>");
        return;
    }

    println!("Knowledge bases ({}):\n", summaries.len());
    for summary in summaries {
        let index = if summary.promoted { "ivf" } else { "flat" };
        println!("  {} [{}]", summary.name, summary.strategy);
        println!("    Model:     {}/{}", summary.supplier, summary.model);
        println!("    Chunks:    {} ({})", summary.chunks, index);
        let states: Vec<String> = summary
            .documents
            .iter()
            .map(|(state, count)| format!("{} {}", count, state))
            .collect();
        println!("    Documents: {}", states.join(", "));
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::meta::DocumentRegistry;
    use crate::store::{SqliteVectorStore, VectorStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn manager(temp: &TempDir) -> KnowledgeBaseManager {
        let mut config = Config::with_base_dir(temp.path().canonicalize().unwrap());
        config.embedding.dimension = 2;
        let store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open(&config.store_path()).await.unwrap());
        let registry = Arc::new(DocumentRegistry::new(store.clone()));
        KnowledgeBaseManager::new(Arc::new(config), store, registry)
    }

    #[tokio::test]
    async fn test_create_applies_options_and_lists() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp).await;

        let options = CreateBaseOptions {
            strategy: Some(SearchStrategy::Vector),
            chunk_size: Some(200),
            overlap_size: Some(20),
            separators: vec!["/\\n#+ /".to_string()],
            ..Default::default()
        };
        let kb = cmd_create_base(&manager, "docs", "nomic-embed-text", options)
            .await
            .unwrap();
        assert_eq!(kb.search_strategy, SearchStrategy::Vector);
        assert_eq!(kb.chunk_size, 200);
        assert!(kb.rag_create_time.is_some());

        let summaries = cmd_list_bases(&manager).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "docs");
        assert_eq!(summaries[0].chunks, 0);

        cmd_remove_base(&manager, "docs").await.unwrap();
        assert!(cmd_list_bases(&manager).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_overlap() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp).await;

        let options = CreateBaseOptions {
            chunk_size: Some(100),
            overlap_size: Some(101),
            ..Default::default()
        };
        assert!(cmd_create_base(&manager, "docs", "m", options).await.is_err());
        assert!(!manager.exists("docs"));

        let options = CreateBaseOptions {
            chunk_size: Some(100),
            overlap_size: Some(100),
            ..Default::default()
        };
        assert!(cmd_create_base(&manager, "docs", "m", options).await.is_ok());
        assert!(manager.exists("docs"));
    }
}
