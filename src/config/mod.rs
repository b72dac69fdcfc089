//! Configuration management for kbindex
//!
//! Handles loading, saving, and validating the engine configuration from TOML.
//! Per-knowledge-base settings live in JSON next to each base (see [`crate::kb`]).

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Placeholder stored in registry paths instead of the data directory
pub const DATA_DIR_PLACEHOLDER: &str = "{DATA_DIR}";

/// Placeholder in document text rewritten to [`SearchConfig::external_url`]
pub const URL_PLACEHOLDER: &str = "{URL}";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (defaults to the directory holding config.toml)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Background indexer configuration
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// Index lifecycle configuration
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Retrieval configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Embedding configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Background indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Seconds to wait after a sweep completes before starting the next
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Index lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Promote a table once its row count exceeds this
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: usize,

    /// Partitions probed by approximate queries
    #[serde(default = "default_ivf_probes")]
    pub ivf_probes: usize,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Raw distance cutoff applied to flat (unpromoted) tables
    #[serde(default = "default_flat_distance_cutoff")]
    pub flat_distance_cutoff: f32,

    /// Registry lookup batch size for provenance resolution
    #[serde(default = "default_lookup_batch_size")]
    pub lookup_batch_size: usize,

    /// Externally reachable URL for the `{URL}` placeholder
    #[serde(default = "default_external_url")]
    pub external_url: String,

    /// Minimum number of vector candidates per base
    #[serde(default = "default_min_candidates")]
    pub min_candidates: usize,

    /// Vector candidates per requested result
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Prompt context budget for the local supplier
    #[serde(default = "default_local_context_chars")]
    pub local_context_chars: usize,

    /// Prompt context budget for any other supplier
    #[serde(default = "default_remote_context_chars")]
    pub remote_context_chars: usize,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding dimension (every returned vector must match)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Seconds before a cached embedding expires
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// HTTP timeout per embedding request
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    /// Named embedding suppliers
    #[serde(default = "default_suppliers")]
    pub suppliers: BTreeMap<String, SupplierConfig>,
}

/// Wire protocol spoken by an embedding supplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupplierKind {
    Ollama,
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

impl std::fmt::Display for SupplierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupplierKind::Ollama => write!(f, "ollama"),
            SupplierKind::OpenAi => write!(f, "openai"),
        }
    }
}

impl std::str::FromStr for SupplierKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(SupplierKind::Ollama),
            "openai" | "openai-compatible" => Ok(SupplierKind::OpenAi),
            _ => Err(Error::Config(format!("Unknown supplier kind: {}", s))),
        }
    }
}

/// One embedding supplier endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierConfig {
    pub kind: SupplierKind,
    pub url: String,

    /// Environment variable holding the bearer token, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl SupplierConfig {
    /// Read the API key from the environment
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty())
    }
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for kbindex
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            indexer: IndexerConfig::default(),
            lifecycle: LifecycleConfig::default(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: default_promotion_threshold(),
            ivf_probes: default_ivf_probes(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            flat_distance_cutoff: default_flat_distance_cutoff(),
            lookup_batch_size: default_lookup_batch_size(),
            external_url: default_external_url(),
            min_candidates: default_min_candidates(),
            candidate_multiplier: default_candidate_multiplier(),
            local_context_chars: default_local_context_chars(),
            remote_context_chars: default_remote_context_chars(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_embedding_dimension(),
            cache_ttl_secs: default_cache_ttl_secs(),
            timeout_secs: default_embedding_timeout_secs(),
            suppliers: default_suppliers(),
        }
    }
}

impl Config {
    /// Get the default base directory for kbindex (~/.kbindex)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kbindex")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            base_dir: base,
        };
    }

    /// Configuration rooted at `base_dir` with every default applied
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.init_paths(Some(base_dir.into()));
        config
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if kbindex is initialized
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists()
    }

    /// Effective data directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.paths.base_dir.clone())
    }

    /// Root of all knowledge-base state
    pub fn rag_dir(&self) -> PathBuf {
        self.data_dir().join("rag")
    }

    /// Directory holding index promotion markers
    pub fn index_tips_dir(&self) -> PathBuf {
        self.rag_dir().join("index_tips")
    }

    /// SQLite file backing the vector store and the document registry
    pub fn store_path(&self) -> PathBuf {
        self.rag_dir().join("vector.db")
    }

    /// Directory of cached embeddings
    pub fn embedding_cache_dir(&self) -> PathBuf {
        self.data_dir().join("embedding_cache")
    }

    /// Replace the data directory prefix of `path` with [`DATA_DIR_PLACEHOLDER`]
    pub fn to_portable_path(&self, path: &Path) -> String {
        let data_dir = self.data_dir();
        match path.strip_prefix(&data_dir) {
            Ok(rest) => format!("{}/{}", DATA_DIR_PLACEHOLDER, rest.display()),
            Err(_) => path.display().to_string(),
        }
    }

    /// Expand [`DATA_DIR_PLACEHOLDER`] back into the data directory
    pub fn resolve_path(&self, stored: &str) -> PathBuf {
        match stored.strip_prefix(DATA_DIR_PLACEHOLDER) {
            Some(rest) => self.data_dir().join(rest.trim_start_matches(['/', '\\'])),
            None => PathBuf::from(stored),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.indexer.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "indexer.sweep_interval_secs must be > 0".to_string(),
            ));
        }

        if self.lifecycle.ivf_probes == 0 {
            return Err(Error::Config("lifecycle.ivf_probes must be > 0".to_string()));
        }

        if self.search.lookup_batch_size == 0 {
            return Err(Error::Config(
                "search.lookup_batch_size must be > 0".to_string(),
            ));
        }

        if self.search.candidate_multiplier == 0 {
            return Err(Error::Config(
                "search.candidate_multiplier must be > 0".to_string(),
            ));
        }

        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding.dimension must be > 0".to_string()));
        }

        for (name, supplier) in &self.embedding.suppliers {
            url::Url::parse(&supplier.url).map_err(|e| {
                Error::Config(format!(
                    "embedding.suppliers.{}.url is invalid ({}): {}",
                    name, supplier.url, e
                ))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.indexer.sweep_interval_secs, 5);
        assert_eq!(config.lifecycle.promotion_threshold, 256);
        assert_eq!(config.search.external_url, "http://127.0.0.1:7071");
        assert_eq!(config.embedding.dimension, 1024);
        assert!(config.embedding.suppliers.contains_key("ollama"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::with_base_dir(tmp.path());
        config.search.lookup_batch_size = 25;
        config.embedding.suppliers.insert(
            "remote".to_string(),
            SupplierConfig {
                kind: SupplierKind::OpenAi,
                url: "https://embeddings.example.com".to_string(),
                api_key_env: Some("REMOTE_KEY".to_string()),
            },
        );

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.search.lookup_batch_size, 25);
        assert_eq!(loaded.embedding.suppliers["remote"].kind, SupplierKind::OpenAi);
        assert_eq!(loaded.data_dir(), tmp.path());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[search]\nmin_candidates = 10\n").unwrap();
        assert_eq!(config.search.min_candidates, 10);
        assert_eq!(config.search.candidate_multiplier, 3);
        assert_eq!(config.indexer.sweep_interval_secs, 5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.indexer.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
        config.indexer.sweep_interval_secs = 5;

        config.search.lookup_batch_size = 0;
        assert!(config.validate().is_err());
        config.search.lookup_batch_size = 10;

        config.embedding.suppliers.insert(
            "broken".to_string(),
            SupplierConfig {
                kind: SupplierKind::Ollama,
                url: "not a url".to_string(),
                api_key_env: None,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_portable_path_round_trip() {
        let config = Config::with_base_dir("/var/lib/kbindex");
        let stored = config.to_portable_path(Path::new("/var/lib/kbindex/rag/docs/markdown/a.md"));
        assert_eq!(stored, "{DATA_DIR}/rag/docs/markdown/a.md");
        assert_eq!(
            config.resolve_path(&stored),
            PathBuf::from("/var/lib/kbindex/rag/docs/markdown/a.md")
        );

        let outside = config.to_portable_path(Path::new("/home/user/notes.md"));
        assert_eq!(outside, "/home/user/notes.md");
    }

    #[test]
    fn test_supplier_kind_parse() {
        assert_eq!("Ollama".parse::<SupplierKind>().unwrap(), SupplierKind::Ollama);
        assert_eq!(
            "openai-compatible".parse::<SupplierKind>().unwrap(),
            SupplierKind::OpenAi
        );
        assert!("bogus".parse::<SupplierKind>().is_err());
    }
}
