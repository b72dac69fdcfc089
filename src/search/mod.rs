//! Hybrid retrieval across knowledge bases
//!
//! Each requested base is searched on its own and concurrently with the
//! others. Within a base the vector and keyword sub-searches run together,
//! are fused by chunk id, ranked, consolidated into whole documents where
//! most of a document was recalled, and annotated with provenance from the
//! document registry. A base that cannot be searched contributes nothing.

mod context;

pub use context::{build_context, context_budget};

use crate::config::{Config, URL_PLACEHOLDER};
use crate::embed::{embed_one, EmbedderProvider};
use crate::error::{Error, Result};
use crate::kb::{
    self, table_name, KnowledgeBaseConfig, CHUNK_DOC_ID, CHUNK_ID, CHUNK_TEXT, CHUNK_VECTOR,
};
use crate::lifecycle::IndexLifecycle;
use crate::meta::{Document, DocumentRegistry};
use crate::rank::{
    consolidate_documents, fuse, keyword_score, rank, similarity, Candidate, ScoredChunk,
};
use crate::store::{Predicate, QueryHit, VectorQuery, VectorStore};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A retrieval request
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub bases: Vec<String>,
    pub query: String,
    /// Keywords for the keyword sub-search; none disables it
    pub keywords: Option<Vec<String>>,
}

impl SearchRequest {
    pub fn new(bases: Vec<String>, query: &str) -> Self {
        Self {
            bases,
            query: query.to_string(),
            keywords: None,
        }
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = Some(keywords);
        self
    }
}

/// A ranked passage with provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub doc: String,
    pub doc_id: String,
    pub doc_name: String,
    pub doc_file: String,
    pub base: String,
    pub score: f32,
    pub vector_score: Option<f32>,
    pub keyword_score: Option<f32>,
}

pub struct SearchEngine {
    config: Arc<Config>,
    store: Arc<dyn VectorStore>,
    registry: Arc<DocumentRegistry>,
    embedders: Arc<dyn EmbedderProvider>,
    lifecycle: IndexLifecycle,
}

impl SearchEngine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn VectorStore>,
        registry: Arc<DocumentRegistry>,
        embedders: Arc<dyn EmbedderProvider>,
    ) -> Self {
        let lifecycle = IndexLifecycle::from_config(store.clone(), &config);
        Self {
            config,
            store,
            registry,
            embedders,
            lifecycle,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Search every requested base; results are concatenated in base order
    pub async fn search(&self, request: &SearchRequest) -> Vec<SearchHit> {
        let searches = request
            .bases
            .iter()
            .map(|base| self.search_base(base, request));
        join_all(searches).await.into_iter().flatten().collect()
    }

    /// Search one base; any failure yields an empty list
    pub async fn search_base(&self, base: &str, request: &SearchRequest) -> Vec<SearchHit> {
        match self.try_search_base(base, request).await {
            Ok(hits) => {
                debug!(base = %base, hits = hits.len(), "Searched knowledge base");
                hits
            }
            Err(e) => {
                warn!(base = %base, error = %e, "Skipping knowledge base");
                Vec::new()
            }
        }
    }

    async fn try_search_base(&self, base: &str, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let path = kb::config_path(&self.config.rag_dir(), base);
        if !path.is_file() {
            return Err(Error::KnowledgeBaseNotFound(base.to_string()));
        }
        let kb = KnowledgeBaseConfig::load(&path)?;

        let weights = kb.effective_weights();
        if weights.is_empty() {
            return Ok(Vec::new());
        }

        let table = table_name(base);
        if !self.store.table_exists(&table).await? {
            return Err(Error::TableNotFound(table));
        }

        let keywords: Vec<String> = request
            .keywords
            .iter()
            .flatten()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        let (vector_hits, keyword_hits) = tokio::join!(
            async {
                if weights.vector > 0.0 {
                    self.vector_search(&kb, &table, &request.query).await
                } else {
                    Ok(Vec::new())
                }
            },
            async {
                if weights.keyword > 0.0 && !keywords.is_empty() {
                    self.keyword_search(&table, &keywords).await
                } else {
                    Ok(Vec::new())
                }
            }
        );

        let ranked = rank(fuse(vector_hits?, keyword_hits?, weights), kb.max_recall);
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let doc_ids: Vec<String> = ranked.iter().map(|c| c.doc_id.clone()).collect();
        let documents = self
            .registry
            .lookup(&doc_ids, self.config.search.lookup_batch_size)
            .await?;
        let full_texts = self.full_texts(&documents).await;
        let consolidated = consolidate_documents(ranked, &full_texts);

        Ok(consolidated
            .into_iter()
            .filter_map(|candidate| self.annotate(base, candidate, &documents))
            .collect())
    }

    // ===== Sub-searches =====

    async fn vector_search(
        &self,
        kb: &KnowledgeBaseConfig,
        table: &str,
        query: &str,
    ) -> Result<Vec<ScoredChunk>> {
        let embedder = self.embedders.resolve(&kb.supplier_name, &kb.embedding_model)?;
        let vector = embed_one(embedder.as_ref(), query).await?;

        let limit = kb.candidate_limit(
            self.config.search.candidate_multiplier,
            self.config.search.min_candidates,
        );
        let query = VectorQuery::new()
            .nearest_to(CHUNK_VECTOR, vector)
            .limit(limit)
            .select(&[CHUNK_ID, CHUNK_TEXT, CHUNK_DOC_ID]);
        let hits = self.store.query(table, &query).await?;

        // Promoted tables report cosine distance, flat tables squared L2,
        // so each gets its own cutoff
        let promoted = self.lifecycle.is_promoted(table);
        let cutoff = self.config.search.flat_distance_cutoff;
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let distance = hit.distance?;
                let score = similarity(distance);
                let keep = if promoted {
                    score > kb.recall_accuracy
                } else {
                    distance <= cutoff
                };
                keep.then(|| scored(hit, score))
            })
            .collect())
    }

    async fn keyword_search(&self, table: &str, keywords: &[String]) -> Result<Vec<ScoredChunk>> {
        let filter = Predicate::any(
            keywords
                .iter()
                .map(|k| Predicate::contains(CHUNK_TEXT, k))
                .collect(),
        );
        let query = VectorQuery::new()
            .filter(filter)
            .select(&[CHUNK_ID, CHUNK_TEXT, CHUNK_DOC_ID]);
        let hits = self.store.query(table, &query).await?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let score = hit
                    .row
                    .text(CHUNK_TEXT)
                    .map(|text| keyword_score(text, keywords))
                    .unwrap_or(0.0);
                scored(hit, score)
            })
            .collect())
    }

    // ===== Provenance =====

    async fn full_texts(&self, documents: &HashMap<String, Document>) -> HashMap<String, String> {
        let mut texts = HashMap::with_capacity(documents.len());
        for (doc_id, doc) in documents {
            let Some(md_file) = &doc.md_file else {
                continue;
            };
            match tokio::fs::read_to_string(self.config.resolve_path(md_file)).await {
                Ok(text) => {
                    texts.insert(doc_id.clone(), text);
                }
                Err(e) => debug!(doc_id = %doc_id, error = %e, "Parsed text unavailable"),
            }
        }
        texts
    }

    fn annotate(
        &self,
        base: &str,
        candidate: Candidate,
        documents: &HashMap<String, Document>,
    ) -> Option<SearchHit> {
        let Some(doc) = documents.get(&candidate.doc_id) else {
            debug!(doc_id = %candidate.doc_id, "Dropping chunk of unregistered document");
            return None;
        };
        Some(SearchHit {
            id: candidate.id,
            doc: candidate
                .doc
                .replace(URL_PLACEHOLDER, &self.config.search.external_url),
            doc_id: candidate.doc_id,
            doc_name: doc.doc_name.clone(),
            doc_file: self.config.resolve_path(&doc.doc_file).display().to_string(),
            base: base.to_string(),
            score: candidate.score,
            vector_score: candidate.vector_score,
            keyword_score: candidate.keyword_score,
        })
    }
}

fn scored(mut hit: QueryHit, score: f32) -> ScoredChunk {
    ScoredChunk {
        id: hit.row.take_text(CHUNK_ID).unwrap_or_default(),
        doc: hit.row.take_text(CHUNK_TEXT).unwrap_or_default(),
        doc_id: hit.row.take_text(CHUNK_DOC_ID).unwrap_or_default(),
        score,
    }
}
