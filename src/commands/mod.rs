//! CLI commands implementation

pub mod documents;
pub mod init;
pub mod kb;
pub mod query;
pub mod reindex;
pub mod status;
pub mod sweep;

pub use documents::*;
pub use init::*;
pub use kb::*;
pub use query::*;
pub use reindex::*;
pub use status::*;
pub use sweep::*;

use crate::config::Config;
use crate::embed::{ConfigEmbedderProvider, EmbedderProvider};
use crate::error::Result;
use crate::indexer::BackgroundIndexer;
use crate::kb::KnowledgeBaseManager;
use crate::meta::DocumentRegistry;
use crate::parse::FileParser;
use crate::search::SearchEngine;
use crate::store::{SqliteVectorStore, VectorStore};
use std::sync::Arc;

/// Shared components opened once per CLI invocation
pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<dyn VectorStore>,
    pub registry: Arc<DocumentRegistry>,
    pub embedders: Arc<dyn EmbedderProvider>,
}

impl Services {
    pub async fn open(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let store = SqliteVectorStore::open(&config.store_path())
            .await?
            .with_probes(config.lifecycle.ivf_probes);
        let store: Arc<dyn VectorStore> = Arc::new(store);
        Ok(Self {
            registry: Arc::new(DocumentRegistry::new(store.clone())),
            embedders: Arc::new(ConfigEmbedderProvider::new(config.clone())),
            store,
            config,
        })
    }

    pub fn manager(&self) -> KnowledgeBaseManager {
        KnowledgeBaseManager::new(self.config.clone(), self.store.clone(), self.registry.clone())
    }

    pub fn indexer(&self) -> BackgroundIndexer {
        BackgroundIndexer::new(
            self.config.clone(),
            self.store.clone(),
            self.registry.clone(),
            Arc::new(FileParser::new()),
            self.embedders.clone(),
        )
    }

    pub fn search_engine(&self) -> SearchEngine {
        SearchEngine::new(
            self.config.clone(),
            self.store.clone(),
            self.registry.clone(),
            self.embedders.clone(),
        )
    }
}
