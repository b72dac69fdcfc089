//! Shared document registry
//!
//! One store table holds a record per document across all knowledge bases:
//! - Identity and provenance (`doc_id`, `doc_name`, `doc_file`, `md_file`)
//! - Owning base (`doc_rag`)
//! - Abstract and keywords produced at parse time
//! - Processing state (`is_parsed`) and last update time

use crate::error::{Error, Result};
use crate::store::{ColumnType, IndexKind, Predicate, Row, TableSchema, VectorQuery, VectorStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

/// Registry table name
pub const REGISTRY_TABLE: &str = "doc_table";

/// Document processing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseState {
    Unparsed,
    /// Parsed, awaiting embedding
    Parsed,
    Embedded,
    /// Terminal until an explicit reindex
    Failed,
}

impl ParseState {
    pub const ALL: [ParseState; 4] = [
        ParseState::Unparsed,
        ParseState::Parsed,
        ParseState::Embedded,
        ParseState::Failed,
    ];

    /// Stored `is_parsed` code
    pub fn code(self) -> i64 {
        match self {
            ParseState::Unparsed => 0,
            ParseState::Parsed => 2,
            ParseState::Embedded => 3,
            ParseState::Failed => -1,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(ParseState::Unparsed),
            2 => Ok(ParseState::Parsed),
            3 => Ok(ParseState::Embedded),
            -1 => Ok(ParseState::Failed),
            _ => Err(Error::Store(format!("Unknown parse state code: {}", code))),
        }
    }
}

impl std::fmt::Display for ParseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseState::Unparsed => write!(f, "unparsed"),
            ParseState::Parsed => write!(f, "parsed"),
            ParseState::Embedded => write!(f, "embedded"),
            ParseState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ParseState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "unparsed" => Ok(ParseState::Unparsed),
            "parsed" => Ok(ParseState::Parsed),
            "embedded" => Ok(ParseState::Embedded),
            "failed" => Ok(ParseState::Failed),
            _ => Err(Error::Config(format!("Unknown parse state: {}", s))),
        }
    }
}

/// A registered document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub doc_name: String,
    /// Source path, possibly carrying the data-dir placeholder
    pub doc_file: String,
    /// Parsed markdown path, set once parsed
    pub md_file: Option<String>,
    /// Owning knowledge base
    pub doc_rag: String,
    pub doc_abstract: Option<String>,
    pub doc_keywords: Vec<String>,
    pub is_parsed: ParseState,
    /// UNIX seconds
    pub update_time: i64,
}

impl Document {
    pub fn new(base: &str, doc_name: &str, doc_file: &str) -> Self {
        Self {
            doc_id: Uuid::new_v4().to_string(),
            doc_name: doc_name.to_string(),
            doc_file: doc_file.to_string(),
            md_file: None,
            doc_rag: base.to_string(),
            doc_abstract: None,
            doc_keywords: Vec::new(),
            is_parsed: ParseState::Unparsed,
            update_time: Utc::now().timestamp(),
        }
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("doc_id", self.doc_id.as_str())
            .with("doc_name", self.doc_name.as_str())
            .with("doc_file", self.doc_file.as_str())
            .with("md_file", self.md_file.clone())
            .with("doc_rag", self.doc_rag.as_str())
            .with("doc_abstract", self.doc_abstract.clone())
            .with("doc_keywords", self.doc_keywords.clone())
            .with("is_parsed", self.is_parsed.code())
            .with("update_time", self.update_time)
    }

    fn from_row(mut row: Row) -> Result<Self> {
        let required = |row: &mut Row, column: &str| {
            row.take_text(column)
                .ok_or_else(|| Error::Store(format!("Registry row missing {}", column)))
        };
        Ok(Self {
            doc_id: required(&mut row, "doc_id")?,
            doc_name: required(&mut row, "doc_name")?,
            doc_file: required(&mut row, "doc_file")?,
            md_file: row.take_text("md_file"),
            doc_rag: required(&mut row, "doc_rag")?,
            doc_abstract: row.take_text("doc_abstract"),
            doc_keywords: row.list("doc_keywords").map(<[String]>::to_vec).unwrap_or_default(),
            is_parsed: ParseState::from_code(row.integer("is_parsed").unwrap_or(0))?,
            update_time: row.integer("update_time").unwrap_or(0),
        })
    }
}

/// Parse-phase results written back to the registry
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFields {
    pub md_file: String,
    pub doc_abstract: String,
    pub doc_keywords: Vec<String>,
}

fn registry_schema() -> TableSchema {
    TableSchema::new()
        .column("doc_id", ColumnType::Text)
        .column("doc_name", ColumnType::Text)
        .column("doc_file", ColumnType::Text)
        .column("md_file", ColumnType::Text)
        .column("doc_rag", ColumnType::Text)
        .column("doc_abstract", ColumnType::Text)
        .column("doc_keywords", ColumnType::List)
        .column("is_parsed", ColumnType::Integer)
        .column("update_time", ColumnType::Integer)
}

/// Document registry over a [`VectorStore`]
///
/// The table and its indexes are created on first use.
pub struct DocumentRegistry {
    store: Arc<dyn VectorStore>,
    ready: OnceCell<()>,
}

impl DocumentRegistry {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            ready: OnceCell::new(),
        }
    }

    async fn ensure_table(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                if !self.store.table_exists(REGISTRY_TABLE).await? {
                    debug!("Creating document registry table");
                    self.store
                        .create_table(REGISTRY_TABLE, &registry_schema())
                        .await?;
                }
                for column in ["doc_id", "doc_rag", "is_parsed"] {
                    self.store
                        .create_index(REGISTRY_TABLE, column, IndexKind::BTree, false)
                        .await?;
                }
                self.store
                    .create_index(REGISTRY_TABLE, "doc_keywords", IndexKind::LabelList, false)
                    .await?;
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    async fn find(&self, filter: Predicate) -> Result<Vec<Document>> {
        self.ensure_table().await?;
        let hits = self
            .store
            .query(REGISTRY_TABLE, &VectorQuery::new().filter(filter))
            .await?;
        hits.into_iter().map(|h| Document::from_row(h.row)).collect()
    }

    async fn update_where(&self, filter: Predicate, mut values: Row) -> Result<u64> {
        self.ensure_table().await?;
        values.set("update_time", Utc::now().timestamp());
        self.store.update(REGISTRY_TABLE, &filter, values).await
    }

    // ===== Document Operations =====

    pub async fn insert(&self, doc: &Document) -> Result<()> {
        self.ensure_table().await?;
        self.store.insert(REGISTRY_TABLE, vec![doc.to_row()]).await
    }

    pub async fn get(&self, doc_id: &str) -> Result<Option<Document>> {
        Ok(self
            .find(Predicate::eq("doc_id", doc_id))
            .await?
            .into_iter()
            .next())
    }

    /// Documents in `state`, across all bases
    pub async fn by_state(&self, state: ParseState) -> Result<Vec<Document>> {
        self.find(Predicate::eq("is_parsed", state.code())).await
    }

    pub async fn by_base(&self, base: &str) -> Result<Vec<Document>> {
        self.find(Predicate::eq("doc_rag", base)).await
    }

    /// Documents tagged with a keyword
    pub async fn by_keyword(&self, keyword: &str) -> Result<Vec<Document>> {
        self.find(Predicate::HasLabel(
            "doc_keywords".to_string(),
            keyword.to_string(),
        ))
        .await
    }

    /// Fetch documents by id in batches of `batch_size`
    pub async fn lookup(
        &self,
        doc_ids: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, Document>> {
        let mut unique: Vec<&String> = Vec::new();
        for id in doc_ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }

        let mut found = HashMap::with_capacity(unique.len());
        for batch in unique.chunks(batch_size.max(1)) {
            let filter = Predicate::any(
                batch
                    .iter()
                    .map(|id| Predicate::eq("doc_id", id.as_str()))
                    .collect(),
            );
            for doc in self.find(filter).await? {
                found.insert(doc.doc_id.clone(), doc);
            }
        }
        Ok(found)
    }

    pub async fn set_state(&self, doc_id: &str, state: ParseState) -> Result<()> {
        let changed = self
            .update_where(
                Predicate::eq("doc_id", doc_id),
                Row::new().with("is_parsed", state.code()),
            )
            .await?;
        if changed == 0 {
            return Err(Error::DocumentNotFound(doc_id.to_string()));
        }
        Ok(())
    }

    /// Record parse output and move the document to [`ParseState::Parsed`]
    pub async fn mark_parsed(&self, doc_id: &str, fields: ParsedFields) -> Result<()> {
        let values = Row::new()
            .with("md_file", fields.md_file)
            .with("doc_abstract", fields.doc_abstract)
            .with("doc_keywords", fields.doc_keywords)
            .with("is_parsed", ParseState::Parsed.code());
        let changed = self
            .update_where(Predicate::eq("doc_id", doc_id), values)
            .await?;
        if changed == 0 {
            return Err(Error::DocumentNotFound(doc_id.to_string()));
        }
        Ok(())
    }

    /// Reset every document of a base to [`ParseState::Unparsed`]
    pub async fn reset_base(&self, base: &str) -> Result<u64> {
        self.update_where(
            Predicate::eq("doc_rag", base),
            Row::new().with("is_parsed", ParseState::Unparsed.code()),
        )
        .await
    }

    pub async fn delete(&self, doc_id: &str) -> Result<u64> {
        self.ensure_table().await?;
        self.store
            .delete(REGISTRY_TABLE, &Predicate::eq("doc_id", doc_id))
            .await
    }

    pub async fn delete_base(&self, base: &str) -> Result<u64> {
        self.ensure_table().await?;
        self.store
            .delete(REGISTRY_TABLE, &Predicate::eq("doc_rag", base))
            .await
    }

    // ===== Statistics =====

    /// Document count per state, optionally restricted to one base
    pub async fn state_counts(&self, base: Option<&str>) -> Result<Vec<(ParseState, usize)>> {
        self.ensure_table().await?;
        let mut counts = Vec::with_capacity(ParseState::ALL.len());
        for state in ParseState::ALL {
            let mut filter = Predicate::eq("is_parsed", state.code());
            if let Some(base) = base {
                filter = filter.and(Predicate::eq("doc_rag", base));
            }
            let n = self.store.count(REGISTRY_TABLE, Some(&filter)).await?;
            counts.push((state, n));
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteVectorStore;
    use tempfile::TempDir;

    async fn setup_registry() -> (DocumentRegistry, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&temp_dir.path().join("vector.db"))
            .await
            .unwrap();
        (DocumentRegistry::new(Arc::new(store)), temp_dir)
    }

    #[test]
    fn test_parse_state_codes() {
        for state in ParseState::ALL {
            assert_eq!(ParseState::from_code(state.code()).unwrap(), state);
            assert_eq!(state.to_string().parse::<ParseState>().unwrap(), state);
        }
        assert!(ParseState::from_code(1).is_err());
    }

    #[tokio::test]
    async fn test_document_crud() {
        let (registry, _temp) = setup_registry().await;

        let doc = Document::new("manuals", "guide.md", "{DATA_DIR}/files/guide.md");
        registry.insert(&doc).await.unwrap();

        let fetched = registry.get(&doc.doc_id).await.unwrap().unwrap();
        assert_eq!(fetched, doc);
        assert!(registry.get("missing").await.unwrap().is_none());

        assert_eq!(registry.by_base("manuals").await.unwrap().len(), 1);
        assert_eq!(registry.by_state(ParseState::Unparsed).await.unwrap().len(), 1);

        assert_eq!(registry.delete(&doc.doc_id).await.unwrap(), 1);
        assert!(registry.get(&doc.doc_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_parsed_and_state_changes() {
        let (registry, _temp) = setup_registry().await;
        let doc = Document::new("manuals", "guide.md", "/tmp/guide.md");
        registry.insert(&doc).await.unwrap();

        registry
            .mark_parsed(
                &doc.doc_id,
                ParsedFields {
                    md_file: "{DATA_DIR}/rag/manuals/markdown/x.md".to_string(),
                    doc_abstract: "An abstract".to_string(),
                    doc_keywords: vec!["rust".to_string(), "index".to_string()],
                },
            )
            .await
            .unwrap();

        let parsed = registry.get(&doc.doc_id).await.unwrap().unwrap();
        assert_eq!(parsed.is_parsed, ParseState::Parsed);
        assert_eq!(parsed.doc_abstract.as_deref(), Some("An abstract"));
        assert_eq!(registry.by_keyword("rust").await.unwrap().len(), 1);

        registry
            .set_state(&doc.doc_id, ParseState::Failed)
            .await
            .unwrap();
        assert_eq!(registry.by_state(ParseState::Failed).await.unwrap().len(), 1);

        assert_eq!(registry.reset_base("manuals").await.unwrap(), 1);
        let reset = registry.get(&doc.doc_id).await.unwrap().unwrap();
        assert_eq!(reset.is_parsed, ParseState::Unparsed);

        let err = registry
            .set_state("missing", ParseState::Parsed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn test_batched_lookup() {
        let (registry, _temp) = setup_registry().await;
        let mut ids = Vec::new();
        for i in 0..25 {
            let doc = Document::new("base", &format!("doc{}.md", i), "/tmp/doc.md");
            registry.insert(&doc).await.unwrap();
            ids.push(doc.doc_id);
        }
        // Duplicates and unknown ids are tolerated
        ids.push(ids[0].clone());
        ids.push("unknown".to_string());

        let found = registry.lookup(&ids, 10).await.unwrap();
        assert_eq!(found.len(), 25);
    }

    #[tokio::test]
    async fn test_delete_base_and_counts() {
        let (registry, _temp) = setup_registry().await;
        registry
            .insert(&Document::new("a", "one.md", "/tmp/one.md"))
            .await
            .unwrap();
        registry
            .insert(&Document::new("b", "two.md", "/tmp/two.md"))
            .await
            .unwrap();

        let counts = registry.state_counts(Some("a")).await.unwrap();
        assert_eq!(counts[0], (ParseState::Unparsed, 1));

        assert_eq!(registry.delete_base("a").await.unwrap(), 1);
        let counts = registry.state_counts(None).await.unwrap();
        assert_eq!(counts[0], (ParseState::Unparsed, 1));
    }
}
