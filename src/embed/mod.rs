//! Embedding generation
//!
//! This module provides an abstraction over embedding suppliers with:
//! - A trait for different embedding backends
//! - HTTP backends for Ollama and OpenAI-compatible endpoints
//! - An on-disk cache keyed by supplier, model and text
//! - Per-base resolution of `(supplier, model)` to an embedder

mod cache;
mod http_backend;

pub use cache::{purge_expired, CachedEmbedder};
pub use http_backend::HttpEmbedder;

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; one vector per input, in order
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Embed a single text
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(vec![text.to_string()])
        .await?
        .pop()
        .ok_or_else(|| Error::Embedding("Embedder returned no vector".to_string()))
}

/// Check every vector against the expected dimension
pub fn validate_dimensions(embeddings: &[Vec<f32>], expected: usize) -> Result<()> {
    if let Some(bad) = embeddings.iter().find(|v| v.len() != expected) {
        return Err(Error::DimensionMismatch {
            expected,
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Resolves a base's `(supplier, model)` pair to an embedder
pub trait EmbedderProvider: Send + Sync {
    fn resolve(&self, supplier: &str, model: &str) -> Result<Arc<dyn Embedder>>;
}

/// Builds cached HTTP embedders from `[embedding.suppliers]`
pub struct ConfigEmbedderProvider {
    config: Arc<Config>,
    resolved: Mutex<HashMap<(String, String), Arc<dyn Embedder>>>,
}

impl ConfigEmbedderProvider {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            resolved: Mutex::new(HashMap::new()),
        }
    }
}

impl EmbedderProvider for ConfigEmbedderProvider {
    fn resolve(&self, supplier: &str, model: &str) -> Result<Arc<dyn Embedder>> {
        if model.trim().is_empty() {
            return Err(Error::Config(format!(
                "No embedding model configured for supplier {}",
                supplier
            )));
        }

        let key = (supplier.to_string(), model.to_string());
        let mut resolved = self
            .resolved
            .lock()
            .map_err(|_| Error::Other("Embedder cache lock poisoned".to_string()))?;
        if let Some(embedder) = resolved.get(&key) {
            return Ok(embedder.clone());
        }

        let supplier_config = self
            .config
            .embedding
            .suppliers
            .get(supplier)
            .ok_or_else(|| Error::Config(format!("Unknown embedding supplier: {}", supplier)))?;

        let embedding = &self.config.embedding;
        let http = HttpEmbedder::new(
            supplier_config,
            model,
            embedding.dimension,
            Duration::from_secs(embedding.timeout_secs),
        )?;
        let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(
            Arc::new(http),
            supplier,
            self.config.embedding_cache_dir(),
            Duration::from_secs(embedding.cache_ttl_secs),
        ));

        debug!(supplier = %supplier, model = %model, "Resolved embedder");
        resolved.insert(key, embedder.clone());
        Ok(embedder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_dimensions() {
        assert!(validate_dimensions(&[vec![0.0; 3], vec![1.0; 3]], 3).is_ok());
        let err = validate_dimensions(&[vec![0.0; 3], vec![1.0; 2]], 3).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_provider_resolution() {
        let temp_dir = TempDir::new().unwrap();
        let provider = ConfigEmbedderProvider::new(Arc::new(Config::with_base_dir(temp_dir.path())));

        let first = provider.resolve("ollama", "bge-m3").unwrap();
        assert_eq!(first.model_name(), "bge-m3");
        assert_eq!(first.dimension(), 1024);

        let second = provider.resolve("ollama", "bge-m3").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert!(matches!(
            provider.resolve("nowhere", "bge-m3"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            provider.resolve("ollama", " "),
            Err(Error::Config(_))
        ));
    }
}
