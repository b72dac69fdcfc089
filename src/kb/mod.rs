//! Knowledge-base management
//!
//! A knowledge base is a directory under `<data>/rag/<name>/` holding its
//! `config.json` and parsed markdown, plus one chunk table in the vector
//! store. Documents of every base share the registry in [`crate::meta`].

mod config;

pub use config::{table_name, KnowledgeBaseConfig, SearchStrategy};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lifecycle::IndexLifecycle;
use crate::meta::{Document, DocumentRegistry, ParseState};
use crate::store::{ColumnType, Predicate, TableSchema, VectorQuery, VectorStore};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

// Chunk table columns
pub const CHUNK_ID: &str = "id";
pub const CHUNK_TEXT: &str = "doc";
pub const CHUNK_DOC_ID: &str = "docId";
pub const CHUNK_KEYWORDS: &str = "keywords";
pub const CHUNK_VECTOR: &str = "vector";

const CONFIG_FILE: &str = "config.json";

/// Schema of a base's chunk table
pub fn chunk_schema(dimension: usize) -> TableSchema {
    TableSchema::new()
        .column(CHUNK_ID, ColumnType::Text)
        .column(CHUNK_TEXT, ColumnType::Text)
        .column(CHUNK_DOC_ID, ColumnType::Text)
        .column(CHUNK_KEYWORDS, ColumnType::List)
        .column(CHUNK_VECTOR, ColumnType::Vector(dimension))
}

/// A stored chunk, without its vector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredChunk {
    pub id: String,
    pub doc: String,
    pub doc_id: String,
    pub keywords: Vec<String>,
}

/// Overview of one base
#[derive(Debug, Clone, Serialize)]
pub struct BaseSummary {
    pub name: String,
    pub table: String,
    pub supplier: String,
    pub model: String,
    pub strategy: SearchStrategy,
    pub documents: Vec<(ParseState, usize)>,
    pub chunks: usize,
    pub promoted: bool,
}

/// Create, inspect and tear down knowledge bases and their documents
pub struct KnowledgeBaseManager {
    config: Arc<Config>,
    store: Arc<dyn VectorStore>,
    registry: Arc<DocumentRegistry>,
    lifecycle: IndexLifecycle,
}

impl KnowledgeBaseManager {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn VectorStore>,
        registry: Arc<DocumentRegistry>,
    ) -> Self {
        let lifecycle = IndexLifecycle::from_config(store.clone(), &config);
        Self {
            config,
            store,
            registry,
            lifecycle,
        }
    }

    pub fn base_dir(&self, name: &str) -> PathBuf {
        self.config.rag_dir().join(name)
    }

    fn config_path(&self, name: &str) -> PathBuf {
        config_path(&self.config.rag_dir(), name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.config_path(name).is_file()
    }

    // ===== Base Operations =====

    /// Create a base; fails if one with the same name exists
    pub async fn create_base(&self, mut kb: KnowledgeBaseConfig) -> Result<KnowledgeBaseConfig> {
        validate_base_name(&kb.rag_name)?;
        if self.exists(&kb.rag_name) {
            return Err(Error::KnowledgeBaseExists(kb.rag_name));
        }
        if !self.config.embedding.suppliers.contains_key(&kb.supplier_name) {
            return Err(Error::Config(format!(
                "Unknown embedding supplier: {}",
                kb.supplier_name
            )));
        }

        kb.rag_create_time.get_or_insert_with(|| Utc::now().timestamp());
        kb.validate()?;
        kb.save(&self.config_path(&kb.rag_name))?;

        let table = table_name(&kb.rag_name);
        self.store
            .create_table(&table, &chunk_schema(self.config.embedding.dimension))
            .await?;

        info!(base = %kb.rag_name, table = %table, "Created knowledge base");
        Ok(kb)
    }

    /// Names of all bases, sorted
    pub fn list_bases(&self) -> Result<Vec<String>> {
        list_bases(&self.config.rag_dir())
    }

    pub fn load_config(&self, name: &str) -> Result<KnowledgeBaseConfig> {
        if !self.exists(name) {
            return Err(Error::KnowledgeBaseNotFound(name.to_string()));
        }
        KnowledgeBaseConfig::load(&self.config_path(name))
    }

    /// Delete a base with its documents, chunk table, marker and files
    pub async fn remove_base(&self, name: &str) -> Result<()> {
        if !self.exists(name) {
            return Err(Error::KnowledgeBaseNotFound(name.to_string()));
        }

        let table = table_name(name);
        let removed = self.registry.delete_base(name).await?;
        self.store.drop_table(&table).await?;
        self.lifecycle.remove_marker(&table)?;
        std::fs::remove_dir_all(self.base_dir(name))?;

        info!(base = %name, documents = removed, "Removed knowledge base");
        Ok(())
    }

    pub async fn summary(&self, name: &str) -> Result<BaseSummary> {
        let kb = self.load_config(name)?;
        let table = table_name(name);
        let chunks = match self.store.count(&table, None).await {
            Ok(n) => n,
            Err(Error::TableNotFound(_)) => 0,
            Err(e) => return Err(e),
        };

        Ok(BaseSummary {
            name: name.to_string(),
            promoted: self.lifecycle.is_promoted(&table),
            table,
            supplier: kb.supplier_name,
            model: kb.embedding_model,
            strategy: kb.search_strategy,
            documents: self.registry.state_counts(Some(name)).await?,
            chunks,
        })
    }

    // ===== Document Operations =====

    /// Register a file with a base in the unparsed state
    pub async fn add_document(&self, base: &str, path: &Path) -> Result<Document> {
        if !self.exists(base) {
            return Err(Error::KnowledgeBaseNotFound(base.to_string()));
        }
        if !path.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Not a file: {}", path.display()),
            )));
        }

        let absolute = path.canonicalize()?;
        let doc_name = absolute
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        let doc = Document::new(base, &doc_name, &self.config.to_portable_path(&absolute));
        self.registry.insert(&doc).await?;

        info!(base = %base, doc_id = %doc.doc_id, name = %doc.doc_name, "Added document");
        Ok(doc)
    }

    /// Register every supported file below `dir`
    pub async fn add_directory(
        &self,
        base: &str,
        dir: &Path,
        supported: impl Fn(&Path) -> bool,
    ) -> Result<Vec<Document>> {
        if !self.exists(base) {
            return Err(Error::KnowledgeBaseNotFound(base.to_string()));
        }

        let mut added = Vec::new();
        let walker = WalkDir::new(dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !supported(entry.path()) {
                continue;
            }
            added.push(self.add_document(base, entry.path()).await?);
        }
        Ok(added)
    }

    pub async fn documents(&self, base: &str) -> Result<Vec<Document>> {
        if !self.exists(base) {
            return Err(Error::KnowledgeBaseNotFound(base.to_string()));
        }
        self.registry.by_base(base).await
    }

    async fn require_document(&self, doc_id: &str) -> Result<Document> {
        self.registry
            .get(doc_id)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(doc_id.to_string()))
    }

    /// Delete chunks matching `filter`; a missing table holds none
    async fn delete_chunks(&self, base: &str, filter: &Predicate) -> Result<u64> {
        match self.store.delete(&table_name(base), filter).await {
            Ok(n) => Ok(n),
            Err(Error::TableNotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Delete a document, its chunks and its parsed text
    pub async fn remove_document(&self, doc_id: &str) -> Result<Document> {
        let doc = self.require_document(doc_id).await?;

        let chunks = self
            .delete_chunks(&doc.doc_rag, &Predicate::eq(CHUNK_DOC_ID, doc_id))
            .await?;
        self.registry.delete(doc_id).await?;

        if let Some(md_file) = &doc.md_file {
            let path = self.config.resolve_path(md_file);
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove parsed text");
                }
            }
        }

        info!(doc_id = %doc_id, chunks, "Removed document");
        Ok(doc)
    }

    /// Queue a document for reprocessing
    ///
    /// Existing chunks stay unless `purge` is set.
    pub async fn reindex_document(&self, doc_id: &str, purge: bool) -> Result<()> {
        let doc = self.require_document(doc_id).await?;
        if purge {
            let removed = self
                .delete_chunks(&doc.doc_rag, &Predicate::eq(CHUNK_DOC_ID, doc_id))
                .await?;
            debug!(doc_id = %doc_id, removed, "Purged chunks before reindex");
        }
        self.registry.set_state(doc_id, ParseState::Unparsed).await
    }

    /// Queue every document of a base for reprocessing; returns the count
    pub async fn reindex_base(&self, name: &str, purge: bool) -> Result<u64> {
        let docs = self.documents(name).await?;
        if purge && !docs.is_empty() {
            let ids = docs.iter().map(|d| d.doc_id.as_str());
            let removed = self
                .delete_chunks(name, &Predicate::is_in(CHUNK_DOC_ID, ids))
                .await?;
            debug!(base = %name, removed, "Purged chunks before reindex");
        }
        self.registry.reset_base(name).await
    }

    /// Stored chunks of one document, in insertion order
    pub async fn document_chunks(&self, doc_id: &str) -> Result<Vec<StoredChunk>> {
        let doc = self.require_document(doc_id).await?;
        let query = VectorQuery::new()
            .filter(Predicate::eq(CHUNK_DOC_ID, doc_id))
            .select(&[CHUNK_ID, CHUNK_TEXT, CHUNK_DOC_ID, CHUNK_KEYWORDS]);

        let hits = match self.store.query(&table_name(&doc.doc_rag), &query).await {
            Ok(hits) => hits,
            Err(Error::TableNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(hits
            .into_iter()
            .map(|mut hit| StoredChunk {
                id: hit.row.take_text(CHUNK_ID).unwrap_or_default(),
                doc: hit.row.take_text(CHUNK_TEXT).unwrap_or_default(),
                doc_id: hit.row.take_text(CHUNK_DOC_ID).unwrap_or_default(),
                keywords: hit
                    .row
                    .list(CHUNK_KEYWORDS)
                    .map(<[String]>::to_vec)
                    .unwrap_or_default(),
            })
            .collect())
    }
}

/// Names of the bases under `rag_dir`: directories holding a `config.json`
pub fn list_bases(rag_dir: &Path) -> Result<Vec<String>> {
    if !rag_dir.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(rag_dir)? {
        let entry = entry?;
        if entry.path().join(CONFIG_FILE).is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Path of a base's `config.json`
pub fn config_path(rag_dir: &Path, name: &str) -> PathBuf {
    rag_dir.join(name).join(CONFIG_FILE)
}

fn validate_base_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name == "index_tips";
    if invalid {
        return Err(Error::Config(format!(
            "Invalid knowledge base name: {:?}",
            name
        )));
    }
    Ok(())
}
