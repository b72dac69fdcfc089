//! Background indexer
//!
//! One sweep walks the document registry twice: unparsed documents are
//! parsed, then parsed documents are chunked, embedded and inserted into
//! their base's chunk table. Every document is handled on its own; a failure
//! flags that document and the sweep moves on. Bases touched by the sweep
//! get their full-text index rebuilt and storage compacted, then every base
//! runs the index lifecycle check.

mod state;

pub use state::{DocumentOutcome, IndexerState, Outcome, SweepReport};

use crate::chunk::split_text;
use crate::config::Config;
use crate::embed::{embed_one, purge_expired, Embedder, EmbedderProvider};
use crate::error::{Error, Result};
use crate::kb::{
    self, chunk_schema, table_name, KnowledgeBaseConfig, CHUNK_DOC_ID, CHUNK_ID, CHUNK_KEYWORDS,
    CHUNK_TEXT, CHUNK_VECTOR,
};
use crate::keywords::{extract_keywords, make_abstract, DEFAULT_KEYWORD_COUNT};
use crate::lifecycle::{IndexLifecycle, LifecycleAction};
use crate::meta::{Document, DocumentRegistry, ParseState, ParsedFields};
use crate::parse::DocumentParser;
use crate::store::{Row, VectorStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct BackgroundIndexer {
    config: Arc<Config>,
    store: Arc<dyn VectorStore>,
    registry: Arc<DocumentRegistry>,
    parser: Arc<dyn DocumentParser>,
    embedders: Arc<dyn EmbedderProvider>,
    lifecycle: IndexLifecycle,
    state: IndexerState,
}

impl BackgroundIndexer {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn VectorStore>,
        registry: Arc<DocumentRegistry>,
        parser: Arc<dyn DocumentParser>,
        embedders: Arc<dyn EmbedderProvider>,
    ) -> Self {
        let lifecycle = IndexLifecycle::from_config(store.clone(), &config);
        Self {
            config,
            store,
            registry,
            parser,
            embedders,
            lifecycle,
            state: IndexerState::default(),
        }
    }

    pub fn state(&self) -> &IndexerState {
        &self.state
    }

    /// Sweep until `shutdown` flips to true
    ///
    /// The next sweep is scheduled only after the previous one completes.
    /// Shutdown is observed between sweeps; a sweep in flight runs to the end.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.indexer.sweep_interval_secs);
        info!(interval_secs = interval.as_secs(), "Background indexer started");

        let ttl = Duration::from_secs(self.config.embedding.cache_ttl_secs);
        if let Err(e) = purge_expired(&self.config.embedding_cache_dir(), ttl) {
            warn!(error = %e, "Failed to purge embedding cache");
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.sweep().await {
                Ok(report) if !report.is_empty() => info!(
                    documents = report.documents.len(),
                    failures = report.failures(),
                    bases = report.touched.len(),
                    actions = report.actions.len(),
                    "Sweep finished"
                ),
                Ok(_) => debug!("Sweep finished with nothing to do"),
                Err(e) => error!(error = %e, "Sweep aborted"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(sweeps = self.state.sweeps, "Background indexer stopped");
    }

    /// Run one sweep
    ///
    /// Only a failure to read the registry itself is returned as an error;
    /// document and base failures are recorded in the report.
    pub async fn sweep(&mut self) -> Result<SweepReport> {
        self.state.begin();
        let result = self.sweep_inner().await;
        match result {
            Ok(report) => {
                self.state.finish(report.clone());
                Ok(report)
            }
            Err(e) => {
                self.state.running = false;
                Err(e)
            }
        }
    }

    async fn sweep_inner(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for doc in self.registry.by_state(ParseState::Unparsed).await? {
            let outcome = match self.parse_document(&doc).await {
                Ok(()) => Outcome::Parsed,
                Err(e) => {
                    warn!(doc_id = %doc.doc_id, base = %doc.doc_rag, error = %e, "Parse failed");
                    self.mark_failed(&doc.doc_id).await;
                    Outcome::ParseFailed {
                        reason: e.to_string(),
                    }
                }
            };
            report.record(&doc.doc_id, &doc.doc_rag, outcome);
        }

        for doc in self.registry.by_state(ParseState::Parsed).await? {
            let mut inserted = 0;
            let outcome = match self.embed_document(&doc, &mut inserted).await {
                Ok(()) => match self.registry.set_state(&doc.doc_id, ParseState::Embedded).await {
                    Ok(()) => Outcome::Embedded { chunks: inserted },
                    Err(e) => {
                        warn!(doc_id = %doc.doc_id, error = %e, "Failed to record embedded state");
                        Outcome::EmbedFailed {
                            reason: e.to_string(),
                            inserted,
                        }
                    }
                },
                Err(e) => {
                    warn!(
                        doc_id = %doc.doc_id,
                        base = %doc.doc_rag,
                        inserted,
                        error = %e,
                        "Embedding failed"
                    );
                    self.mark_failed(&doc.doc_id).await;
                    Outcome::EmbedFailed {
                        reason: e.to_string(),
                        inserted,
                    }
                }
            };
            report.record(&doc.doc_id, &doc.doc_rag, outcome);
        }

        for base in &report.touched {
            self.refresh_base(base).await;
        }
        report.actions = self.check_lifecycle().await;

        Ok(report)
    }

    async fn mark_failed(&self, doc_id: &str) {
        if let Err(e) = self.registry.set_state(doc_id, ParseState::Failed).await {
            error!(doc_id = %doc_id, error = %e, "Failed to flag document");
        }
    }

    fn markdown_path(&self, doc: &Document) -> PathBuf {
        self.config
            .rag_dir()
            .join(&doc.doc_rag)
            .join("markdown")
            .join(format!("{}.md", doc.doc_id))
    }

    // ===== Parse Phase =====

    async fn parse_document(&self, doc: &Document) -> Result<()> {
        let source = self.config.resolve_path(&doc.doc_file);
        let target = self.markdown_path(doc);

        let (text, saved) = self
            .parser
            .parse(&source, &target)
            .await
            .map_err(|e| Error::Parse(format!("{:#}", e)))?;
        if text.trim().is_empty() {
            return Err(Error::Parse("Parser returned no text".to_string()));
        }

        let fields = ParsedFields {
            md_file: self.config.to_portable_path(&saved),
            doc_abstract: make_abstract(&text),
            doc_keywords: extract_keywords(&text, DEFAULT_KEYWORD_COUNT),
        };
        self.registry.mark_parsed(&doc.doc_id, fields).await?;

        debug!(doc_id = %doc.doc_id, md_file = %saved.display(), "Parsed document");
        Ok(())
    }

    // ===== Embed Phase =====

    /// Chunk, embed and insert one document; `inserted` counts stored chunks
    async fn embed_document(&self, doc: &Document, inserted: &mut usize) -> Result<()> {
        let kb = KnowledgeBaseConfig::load(&kb::config_path(&self.config.rag_dir(), &doc.doc_rag))?;
        let md_file = doc
            .md_file
            .as_deref()
            .ok_or_else(|| Error::Parse("Document has no parsed text".to_string()))?;
        let text = tokio::fs::read_to_string(self.config.resolve_path(md_file)).await?;

        // Full-text bases may run without a model; they store zero vectors
        let embedder: Option<Arc<dyn Embedder>> = if kb.embedding_model.trim().is_empty() {
            None
        } else {
            Some(self.embedders.resolve(&kb.supplier_name, &kb.embedding_model)?)
        };
        let dimension = embedder
            .as_ref()
            .map(|e| e.dimension())
            .unwrap_or(self.config.embedding.dimension);

        let table = table_name(&doc.doc_rag);
        if !self.store.table_exists(&table).await? {
            self.store.create_table(&table, &chunk_schema(dimension)).await?;
        }

        let chunks = split_text(&doc.doc_name, &text, &kb.chunk_options()?);
        debug!(doc_id = %doc.doc_id, chunks = chunks.len(), "Chunked document");

        for chunk in chunks.iter().filter(|c| !c.is_blank()) {
            let vector = match &embedder {
                Some(embedder) => embed_one(embedder.as_ref(), &chunk.text).await?,
                None => vec![0.0; dimension],
            };
            let row = Row::new()
                .with(CHUNK_ID, Uuid::new_v4().to_string())
                .with(CHUNK_TEXT, chunk.text.as_str())
                .with(CHUNK_DOC_ID, doc.doc_id.as_str())
                .with(
                    CHUNK_KEYWORDS,
                    extract_keywords(&chunk.text, DEFAULT_KEYWORD_COUNT),
                )
                .with(CHUNK_VECTOR, vector);
            self.store.insert(&table, vec![row]).await?;
            *inserted += 1;
        }

        Ok(())
    }

    // ===== Index Maintenance =====

    async fn refresh_base(&self, base: &str) {
        let table = table_name(base);
        match self.store.table_exists(&table).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(base = %base, error = %e, "Failed to check chunk table");
                return;
            }
        }

        if let Err(e) = self.lifecycle.rebuild_fulltext(&table).await {
            warn!(base = %base, table = %table, error = %e, "Full-text rebuild failed");
        }
        if let Err(e) = self.store.optimize(&table).await {
            warn!(base = %base, table = %table, error = %e, "Compaction failed");
        }
    }

    async fn check_lifecycle(&self) -> Vec<LifecycleAction> {
        let bases = match kb::list_bases(&self.config.rag_dir()) {
            Ok(bases) => bases,
            Err(e) => {
                warn!(error = %e, "Failed to list knowledge bases");
                return Vec::new();
            }
        };

        let mut actions = Vec::new();
        for base in bases {
            let table = table_name(&base);
            if !matches!(self.store.table_exists(&table).await, Ok(true)) {
                continue;
            }
            match self.lifecycle.check(&table).await {
                Ok(taken) => actions.extend(taken),
                Err(e) => warn!(base = %base, table = %table, error = %e, "Lifecycle check failed"),
            }
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::KnowledgeBaseManager;
    use crate::store::{IndexKind, SqliteVectorStore};
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    /// Copies the source text; files named `bad*` fail
    struct CopyParser;

    #[async_trait]
    impl DocumentParser for CopyParser {
        async fn parse(&self, source: &Path, target: &Path) -> anyhow::Result<(String, PathBuf)> {
            let name = source.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with("bad") {
                anyhow::bail!("unreadable document");
            }
            let text = std::fs::read_to_string(source)?;
            std::fs::create_dir_all(target.parent().unwrap())?;
            std::fs::write(target, &text)?;
            Ok((text, target.to_path_buf()))
        }
    }

    /// Fails on any text containing "poison"
    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            texts
                .iter()
                .map(|t| {
                    if t.contains("poison") {
                        Err(Error::Embedding("model crashed".to_string()))
                    } else {
                        Ok(vec![t.len() as f32, 1.0])
                    }
                })
                .collect()
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "fake"
        }
    }

    struct FakeProvider;

    impl EmbedderProvider for FakeProvider {
        fn resolve(&self, _supplier: &str, model: &str) -> Result<Arc<dyn Embedder>> {
            if model == "missing" {
                return Err(Error::Config(format!("Unknown model {}", model)));
            }
            Ok(Arc::new(FakeEmbedder))
        }
    }

    struct Fixture {
        indexer: BackgroundIndexer,
        manager: KnowledgeBaseManager,
        registry: Arc<DocumentRegistry>,
        store: Arc<dyn VectorStore>,
        temp: TempDir,
    }

    async fn fixture(threshold: usize) -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut config = Config::with_base_dir(temp.path().canonicalize().unwrap());
        config.embedding.dimension = 2;
        config.lifecycle.promotion_threshold = threshold;
        let config = Arc::new(config);

        let store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open(&config.store_path()).await.unwrap());
        let registry = Arc::new(DocumentRegistry::new(store.clone()));
        let manager = KnowledgeBaseManager::new(config.clone(), store.clone(), registry.clone());
        let indexer = BackgroundIndexer::new(
            config,
            store.clone(),
            registry.clone(),
            Arc::new(CopyParser),
            Arc::new(FakeProvider),
        );
        Fixture {
            indexer,
            manager,
            registry,
            store,
            temp,
        }
    }

    impl Fixture {
        async fn base(&self, name: &str, model: &str) {
            let mut kb = KnowledgeBaseConfig::new(name, model);
            kb.chunk_size = 100;
            kb.overlap_size = 0;
            self.manager.create_base(kb).await.unwrap();
        }

        async fn add(&self, base: &str, file: &str, text: &str) -> Document {
            let path = self.temp.path().join(file);
            std::fs::write(&path, text).unwrap();
            self.manager.add_document(base, &path).await.unwrap()
        }

        async fn state_of(&self, doc: &Document) -> ParseState {
            self.registry
                .get(&doc.doc_id)
                .await
                .unwrap()
                .unwrap()
                .is_parsed
        }
    }

    const PROSE: &str = "Apples and pears grow in the orchard behind the old stone house.\n\n\
                         Every autumn the harvest fills the cellar with crates of fruit.";

    #[tokio::test]
    async fn test_document_walks_all_states() {
        let mut fx = fixture(256).await;
        fx.base("kb", "fake").await;
        let doc = fx.add("kb", "orchard.md", PROSE).await;

        let report = fx.indexer.sweep().await.unwrap();
        assert_eq!(
            report.outcomes_for(&doc.doc_id),
            vec![&Outcome::Parsed, &Outcome::Embedded { chunks: 2 }]
        );
        assert_eq!(fx.state_of(&doc).await, ParseState::Embedded);

        let stored = fx.registry.get(&doc.doc_id).await.unwrap().unwrap();
        assert!(stored.md_file.unwrap().starts_with("{DATA_DIR}/rag/kb/markdown/"));
        assert!(stored.doc_abstract.unwrap().starts_with("Apples and pears"));
        assert!(!stored.doc_keywords.is_empty());

        let chunks = fx.manager.document_chunks(&doc.doc_id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| !c.keywords.is_empty()));

        let indexes = fx.store.list_indexes(&table_name("kb")).await.unwrap();
        assert!(indexes
            .iter()
            .any(|i| i.column == CHUNK_TEXT && i.kind == IndexKind::FullText));

        let again = fx.indexer.sweep().await.unwrap();
        assert!(again.documents.is_empty());
        assert_eq!(fx.indexer.state().sweeps, 2);
    }

    #[tokio::test]
    async fn test_parse_failure_is_terminal_until_reset() {
        let mut fx = fixture(256).await;
        fx.base("kb", "fake").await;
        let bad = fx.add("kb", "bad.md", PROSE).await;
        let good = fx.add("kb", "good.md", PROSE).await;

        let report = fx.indexer.sweep().await.unwrap();
        assert!(matches!(
            report.outcomes_for(&bad.doc_id)[..],
            [Outcome::ParseFailed { .. }]
        ));
        assert_eq!(fx.state_of(&bad).await, ParseState::Failed);
        assert_eq!(fx.state_of(&good).await, ParseState::Embedded);
        assert_eq!(report.failures(), 1);

        let report = fx.indexer.sweep().await.unwrap();
        assert!(report.outcomes_for(&bad.doc_id).is_empty());
        assert_eq!(fx.state_of(&bad).await, ParseState::Failed);

        fx.manager.reindex_document(&bad.doc_id, false).await.unwrap();
        assert_eq!(fx.state_of(&bad).await, ParseState::Unparsed);
        let report = fx.indexer.sweep().await.unwrap();
        assert_eq!(report.outcomes_for(&bad.doc_id).len(), 1);
    }

    #[tokio::test]
    async fn test_embed_failure_keeps_inserted_chunks() {
        let mut fx = fixture(256).await;
        fx.base("kb", "fake").await;
        let text = "Apples and pears grow in the orchard behind the old stone house.\n\n\
                    This paragraph carries poison and cannot be embedded by the model.";
        let doc = fx.add("kb", "orchard.md", text).await;

        let report = fx.indexer.sweep().await.unwrap();
        assert!(matches!(
            report.outcomes_for(&doc.doc_id)[..],
            [Outcome::Parsed, Outcome::EmbedFailed { inserted: 1, .. }]
        ));
        assert_eq!(fx.state_of(&doc).await, ParseState::Failed);
        assert_eq!(fx.store.count(&table_name("kb"), None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_model_fails_document_only() {
        let mut fx = fixture(256).await;
        fx.base("broken", "missing").await;
        fx.base("kb", "fake").await;
        let broken = fx.add("broken", "a.md", PROSE).await;
        let fine = fx.add("kb", "b.md", PROSE).await;

        let report = fx.indexer.sweep().await.unwrap();
        assert_eq!(fx.state_of(&broken).await, ParseState::Failed);
        assert_eq!(fx.state_of(&fine).await, ParseState::Embedded);
        assert!(report.touched.contains("broken"));
    }

    #[tokio::test]
    async fn test_sweep_promotes_large_tables() {
        let mut fx = fixture(1).await;
        fx.base("kb", "fake").await;
        fx.add("kb", "orchard.md", PROSE).await;

        let report = fx.indexer.sweep().await.unwrap();
        assert!(report.actions.contains(&LifecycleAction::Promoted {
            table: table_name("kb"),
            rows: 2,
        }));

        let report = fx.indexer.sweep().await.unwrap();
        assert!(report.actions.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut fx = fixture(256).await;
        fx.base("kb", "fake").await;
        let doc = fx.add("kb", "orchard.md", PROSE).await;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            fx.indexer.run(rx).await;
            fx
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        let fx = handle.await.unwrap();
        assert!(fx.indexer.state().sweeps >= 1);
        assert!(!fx.indexer.state().running);
        assert_eq!(fx.state_of(&doc).await, ParseState::Embedded);
    }
}
