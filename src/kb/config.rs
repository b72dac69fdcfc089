//! Per-knowledge-base configuration (`config.json`)

use crate::chunk::{parse_separators, ChunkOptions};
use crate::config::{
    default_chunk_size, default_keyword_weight, default_max_recall, default_overlap_size,
    default_recall_accuracy, default_supplier_name, default_vector_weight,
};
use crate::error::{Error, Result};
use crate::rank::{normalize_weights, Weights};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Which sub-searches a base runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    #[default]
    Hybrid,
    Vector,
    Fulltext,
}

impl std::fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchStrategy::Hybrid => write!(f, "hybrid"),
            SearchStrategy::Vector => write!(f, "vector"),
            SearchStrategy::Fulltext => write!(f, "fulltext"),
        }
    }
}

impl FromStr for SearchStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "hybrid" => Ok(SearchStrategy::Hybrid),
            "vector" => Ok(SearchStrategy::Vector),
            "fulltext" => Ok(SearchStrategy::Fulltext),
            _ => Err(Error::Config(format!("Unknown search strategy: {}", s))),
        }
    }
}

/// Knowledge base configuration, stored as camelCase JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseConfig {
    pub rag_name: String,

    #[serde(default)]
    pub rag_desc: Option<String>,

    /// UNIX seconds
    #[serde(default)]
    pub rag_create_time: Option<i64>,

    #[serde(default = "default_supplier_name")]
    pub supplier_name: String,

    pub embedding_model: String,

    #[serde(default)]
    pub search_strategy: SearchStrategy,

    #[serde(default = "default_max_recall")]
    pub max_recall: usize,

    #[serde(default = "default_recall_accuracy")]
    pub recall_accuracy: f32,

    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,

    /// Empty means auto-detect; `/expr/` entries are regular expressions
    #[serde(default)]
    pub separators: Vec<String>,
}

impl KnowledgeBaseConfig {
    pub fn new(name: &str, embedding_model: &str) -> Self {
        Self {
            rag_name: name.to_string(),
            rag_desc: None,
            rag_create_time: None,
            supplier_name: default_supplier_name(),
            embedding_model: embedding_model.to_string(),
            search_strategy: SearchStrategy::default(),
            max_recall: default_max_recall(),
            recall_accuracy: default_recall_accuracy(),
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            chunk_size: default_chunk_size(),
            overlap_size: default_overlap_size(),
            separators: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KnowledgeBaseConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.rag_name.trim().is_empty() {
            return Err(Error::Config("Knowledge base name must not be empty".to_string()));
        }
        if self.embedding_model.trim().is_empty() && self.search_strategy != SearchStrategy::Fulltext
        {
            return Err(Error::Config(format!(
                "Knowledge base {} has no embedding model",
                self.rag_name
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunkSize must be greater than 0".to_string()));
        }
        if self.overlap_size > self.chunk_size {
            return Err(Error::Config(format!(
                "overlapSize ({}) must not exceed chunkSize ({})",
                self.overlap_size, self.chunk_size
            )));
        }
        if self.max_recall == 0 {
            return Err(Error::Config("maxRecall must be greater than 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.recall_accuracy) {
            return Err(Error::Config(format!(
                "recallAccuracy must be within [0, 1], got {}",
                self.recall_accuracy
            )));
        }
        parse_separators(&self.separators)?;
        Ok(())
    }

    /// Chunker options for this base
    pub fn chunk_options(&self) -> Result<ChunkOptions> {
        Ok(ChunkOptions::new(self.chunk_size, self.overlap_size)
            .with_separators(parse_separators(&self.separators)?))
    }

    /// Weights after applying the search strategy, then normalizing
    pub fn effective_weights(&self) -> Weights {
        let (vector, keyword) = match self.search_strategy {
            SearchStrategy::Hybrid => (self.vector_weight, self.keyword_weight),
            SearchStrategy::Vector => (self.vector_weight, 0.0),
            SearchStrategy::Fulltext => (0.0, self.keyword_weight),
        };
        normalize_weights(vector, keyword)
    }

    /// Vector candidates fetched before fusion
    pub fn candidate_limit(&self, multiplier: usize, minimum: usize) -> usize {
        (self.max_recall * multiplier).max(minimum)
    }
}

/// Chunk table name of a base: first 32 hex chars of its blake3 hash
pub fn table_name(base: &str) -> String {
    let hash = blake3::hash(base.as_bytes()).to_hex();
    format!("t{}", &hash[..32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_minimal_json() {
        let json = r#"{"ragName": "manuals", "embeddingModel": "bge-m3"}"#;
        let config: KnowledgeBaseConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.supplier_name, "ollama");
        assert_eq!(config.search_strategy, SearchStrategy::Hybrid);
        assert_eq!(config.max_recall, 5);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.overlap_size, 100);
        assert!(config.separators.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_load_camel_case() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("manuals").join("config.json");

        let mut config = KnowledgeBaseConfig::new("manuals", "bge-m3");
        config.separators = vec!["\\n\\n".to_string(), "/第.{1,3}章/".to_string()];
        config.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"embeddingModel\""));
        assert!(raw.contains("\"vectorWeight\""));

        let loaded = KnowledgeBaseConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.chunk_options().unwrap().separators.len(), 2);
    }

    #[test]
    fn test_overlap_equal_to_chunk_size_is_accepted() {
        let mut config = KnowledgeBaseConfig::new("kb", "model");
        config.chunk_size = 200;
        config.overlap_size = 200;
        assert!(config.validate().is_ok());

        let text = "word ".repeat(200);
        let chunks = crate::chunk::split_text("a.txt", &text, &config.chunk_options().unwrap());
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.overlap == 0 && c.char_len() <= 200));
    }

    #[test]
    fn test_validation() {
        let mut config = KnowledgeBaseConfig::new("kb", "model");
        config.overlap_size = config.chunk_size + 1;
        assert!(config.validate().is_err());

        let mut config = KnowledgeBaseConfig::new("kb", "model");
        config.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = KnowledgeBaseConfig::new("kb", "model");
        config.recall_accuracy = 1.5;
        assert!(config.validate().is_err());

        let mut config = KnowledgeBaseConfig::new("kb", "model");
        config.max_recall = 0;
        assert!(config.validate().is_err());

        let mut config = KnowledgeBaseConfig::new("kb", "model");
        config.separators = vec!["/(broken/".to_string()];
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_strategy_weights() {
        let mut config = KnowledgeBaseConfig::new("kb", "model");
        let hybrid = config.effective_weights();
        assert!((hybrid.vector - 0.7).abs() < 1e-6);

        config.search_strategy = SearchStrategy::Vector;
        let vector = config.effective_weights();
        assert_eq!(vector.keyword, 0.0);
        assert!((vector.vector - 0.7).abs() < 1e-6);

        config.search_strategy = SearchStrategy::Fulltext;
        let fulltext = config.effective_weights();
        assert_eq!(fulltext.vector, 0.0);
    }

    #[test]
    fn test_candidate_limit() {
        let mut config = KnowledgeBaseConfig::new("kb", "model");
        assert_eq!(config.candidate_limit(3, 50), 50);
        config.max_recall = 40;
        assert_eq!(config.candidate_limit(3, 50), 120);
    }

    #[test]
    fn test_table_name_is_stable_identifier() {
        let name = table_name("manuals");
        assert_eq!(name, table_name("manuals"));
        assert_ne!(name, table_name("Manuals"));
        assert_eq!(name.len(), 33);
        assert!(crate::store::validate_identifier(&name).is_ok());
    }
}
