//! Table-oriented vector store
//!
//! This module defines the storage capability the engine is written against:
//! - Tables with typed columns (text, integer, float, fixed-size vector, label list)
//! - Secondary indexes (exact-ordered, bitmap, label-list, full-text, approximate vector)
//! - Insert, predicate update/delete, predicate and/or nearest-vector queries, counts
//!
//! Nothing here knows about knowledge bases or documents. [`SqliteVectorStore`]
//! is the bundled implementation.

mod ivf;
mod sqlite;

pub use ivf::IvfModel;
pub use sqlite::SqliteVectorStore;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Column types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    /// Fixed-dimension float vector
    Vector(usize),
    /// Set of string labels
    List,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Text => write!(f, "text"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Vector(dim) => write!(f, "vector:{}", dim),
            ColumnType::List => write!(f, "list"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(ColumnType::Text),
            "integer" => Ok(ColumnType::Integer),
            "float" => Ok(ColumnType::Float),
            "list" => Ok(ColumnType::List),
            other => other
                .strip_prefix("vector:")
                .and_then(|dim| dim.parse().ok())
                .map(ColumnType::Vector)
                .ok_or_else(|| Error::Store(format!("Unknown column type: {}", s))),
        }
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

/// Ordered column list of a table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            column_type,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn type_of(&self, name: &str) -> Result<ColumnType> {
        self.get(name)
            .map(|c| c.column_type)
            .ok_or_else(|| Error::Store(format!("Unknown column: {}", name)))
    }
}

/// Distance used by vector search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Squared euclidean distance
    L2,
    /// `1 - cosine similarity`
    Cosine,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            DistanceMetric::Cosine => {
                let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na.sqrt() * nb.sqrt())
                }
            }
        }
    }
}

/// Index kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Exact ordered index (equality and range lookups)
    BTree,
    /// Low-cardinality equality index
    Bitmap,
    /// Membership index over a label-list column
    LabelList,
    /// Full-text index over a text column
    FullText,
    /// Approximate nearest-neighbour index over a vector column
    Approximate(DistanceMetric),
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::BTree => write!(f, "btree"),
            IndexKind::Bitmap => write!(f, "bitmap"),
            IndexKind::LabelList => write!(f, "label_list"),
            IndexKind::FullText => write!(f, "fts"),
            IndexKind::Approximate(DistanceMetric::L2) => write!(f, "ivf_l2"),
            IndexKind::Approximate(DistanceMetric::Cosine) => write!(f, "ivf_cosine"),
        }
    }
}

impl FromStr for IndexKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "btree" => Ok(IndexKind::BTree),
            "bitmap" => Ok(IndexKind::Bitmap),
            "label_list" => Ok(IndexKind::LabelList),
            "fts" => Ok(IndexKind::FullText),
            "ivf_l2" => Ok(IndexKind::Approximate(DistanceMetric::L2)),
            "ivf_cosine" => Ok(IndexKind::Approximate(DistanceMetric::Cosine)),
            _ => Err(Error::Store(format!("Unknown index kind: {}", s))),
        }
    }
}

/// An existing index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub column: String,
    pub kind: IndexKind,
    pub created_at: String,
}

/// A cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Vector(Vec<f32>),
    List(Vec<String>),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::Vector(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One table row, keyed by column name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.0.insert(column.to_string(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.remove(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        match self.0.get(column) {
            Some(Value::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn integer(&self, column: &str) -> Option<i64> {
        match self.0.get(column) {
            Some(Value::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn float(&self, column: &str) -> Option<f64> {
        match self.0.get(column) {
            Some(Value::Float(f)) => Some(*f),
            Some(Value::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn vector(&self, column: &str) -> Option<&[f32]> {
        match self.0.get(column) {
            Some(Value::Vector(v)) => Some(v),
            _ => None,
        }
    }

    pub fn list(&self, column: &str) -> Option<&[String]> {
        match self.0.get(column) {
            Some(Value::List(l)) => Some(l),
            _ => None,
        }
    }

    /// Take a text value out of the row
    pub fn take_text(&mut self, column: &str) -> Option<String> {
        match self.0.remove(column) {
            Some(Value::Text(s)) => Some(s),
            _ => None,
        }
    }
}

/// Row filter
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    In(String, Vec<Value>),
    /// Case-insensitive substring match on a text column
    Contains(String, String),
    /// Label-list column holds the label
    HasLabel(String, String),
    /// Full-text match against a column's full-text index
    Matches(String, String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Predicate::Eq(column.to_string(), value.into())
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        )
    }

    pub fn contains(column: &str, needle: &str) -> Self {
        Predicate::Contains(column.to_string(), needle.to_string())
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Disjunction of `parts`
    pub fn any(parts: Vec<Predicate>) -> Self {
        Predicate::Or(parts)
    }
}

/// Nearest-neighbour target
#[derive(Debug, Clone, PartialEq)]
pub struct Nearest {
    pub column: String,
    pub vector: Vec<f32>,
}

/// Query by predicate and/or vector similarity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorQuery {
    pub filter: Option<Predicate>,
    pub nearest: Option<Nearest>,
    pub limit: Option<usize>,
    /// Projection; `None` returns every column
    pub columns: Option<Vec<String>>,
}

impl VectorQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn nearest_to(mut self, column: &str, vector: Vec<f32>) -> Self {
        self.nearest = Some(Nearest {
            column: column.to_string(),
            vector,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }
}

/// A query result row
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub row: Row,
    /// Set for nearest-neighbour queries
    pub distance: Option<f32>,
}

/// Table-scoped storage operations
///
/// Implementations own their connection lifecycle: every call opens what it
/// needs and releases it before returning, on success and on error.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Names of all user tables
    async fn table_names(&self) -> Result<Vec<String>>;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Create a table if it does not exist yet
    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()>;

    /// Drop a table and its indexes; missing tables are ignored
    async fn drop_table(&self, table: &str) -> Result<()>;

    /// Create an index; an existing index on the column is kept unless `replace`
    async fn create_index(
        &self,
        table: &str,
        column: &str,
        kind: IndexKind,
        replace: bool,
    ) -> Result<()>;

    async fn drop_index(&self, table: &str, column: &str) -> Result<()>;

    async fn list_indexes(&self, table: &str) -> Result<Vec<IndexInfo>>;

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<()>;

    /// Set `values` on every row matching `filter`; returns rows changed
    async fn update(&self, table: &str, filter: &Predicate, values: Row) -> Result<u64>;

    /// Delete every row matching `filter`; returns rows removed
    async fn delete(&self, table: &str, filter: &Predicate) -> Result<u64>;

    async fn query(&self, table: &str, query: &VectorQuery) -> Result<Vec<QueryHit>>;

    async fn count(&self, table: &str, filter: Option<&Predicate>) -> Result<usize>;

    /// Compact storage and fold recently inserted rows into indexes
    async fn optimize(&self, table: &str) -> Result<()>;
}

/// Table and column names are restricted to plain identifiers
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Store(format!("Invalid identifier: {:?}", name)))
    }
}

/// Little-endian f32 encoding used for vector cells
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
