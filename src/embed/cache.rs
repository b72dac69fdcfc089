//! File cache in front of an [`Embedder`]
//!
//! One JSON file per `(supplier, model, text)`, named by the blake3 hash of
//! `supplier-model-text`. Entries older than the TTL are treated as misses
//! and removed.

use super::{validate_dimensions, Embedder};
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    supplier: String,
    dir: PathBuf,
    ttl: Duration,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, supplier: &str, dir: PathBuf, ttl: Duration) -> Self {
        Self {
            inner,
            supplier: supplier.to_string(),
            dir,
            ttl,
        }
    }

    fn entry_path(&self, text: &str) -> PathBuf {
        let key = format!("{}-{}-{}", self.supplier, self.inner.model_name(), text);
        self.dir
            .join(format!("{}.json", blake3::hash(key.as_bytes()).to_hex()))
    }

    /// Read a live entry; stale or unreadable entries are removed
    fn read(&self, path: &Path) -> Option<Vec<f32>> {
        if !path.exists() {
            return None;
        }
        if is_expired(path, self.ttl) {
            let _ = std::fs::remove_file(path);
            return None;
        }

        let vector = std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Vec<f32>>(&raw).ok());
        match vector {
            Some(v) if v.len() == self.inner.dimension() => Some(v),
            _ => {
                let _ = std::fs::remove_file(path);
                None
            }
        }
    }

    fn write(&self, path: &Path, vector: &[f32]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(path, serde_json::to_string(vector)?)?;
        Ok(())
    }

    /// Delete every expired entry of this cache's directory
    pub fn purge_expired(&self) -> Result<usize> {
        purge_expired(&self.dir, self.ttl)
    }
}

fn is_expired(path: &Path, ttl: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > ttl)
        .unwrap_or(true)
}

/// Delete every cache entry under `dir` older than `ttl`; returns how many
/// were removed
pub fn purge_expired(dir: &Path, ttl: Duration) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") && is_expired(&path, ttl) {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    debug!(removed, dir = %dir.display(), "Purged expired embeddings");
    Ok(removed)
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let paths: Vec<PathBuf> = texts.iter().map(|t| self.entry_path(t)).collect();
        let mut results: Vec<Option<Vec<f32>>> = paths.iter().map(|p| self.read(p)).collect();

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| results[i].is_none()).collect();
        if !missing.is_empty() {
            let batch = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed(batch).await?;
            validate_dimensions(&fresh, self.inner.dimension())?;

            for (&i, vector) in missing.iter().zip(fresh) {
                if let Err(e) = self.write(&paths[i], &vector) {
                    warn!(error = %e, "Failed to cache embedding");
                }
                results[i] = Some(vector);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingEmbedder {
        calls: AtomicUsize,
        texts: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn cached(dir: &Path, ttl: Duration) -> (CachedEmbedder, Arc<CountingEmbedder>) {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        });
        (
            CachedEmbedder::new(inner.clone(), "ollama", dir.to_path_buf(), ttl),
            inner,
        )
    }

    #[tokio::test]
    async fn test_hits_skip_inner_embedder() {
        let temp_dir = TempDir::new().unwrap();
        let (embedder, inner) = cached(temp_dir.path(), Duration::from_secs(3600));

        let first = embedder
            .embed(vec!["a".to_string(), "bb".to_string()])
            .await
            .unwrap();
        assert_eq!(first, vec![vec![1.0, 1.0], vec![2.0, 1.0]]);

        let second = embedder
            .embed(vec!["bb".to_string(), "ccc".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(second, vec![vec![2.0, 1.0], vec![3.0, 1.0], vec![1.0, 1.0]]);

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(inner.texts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let temp_dir = TempDir::new().unwrap();
        let (embedder, inner) = cached(temp_dir.path(), Duration::ZERO);

        embedder.embed(vec!["a".to_string()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        embedder.embed(vec!["a".to_string()]).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(embedder.purge_expired().unwrap(), 1);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_keys_differ_by_supplier() {
        let temp_dir = TempDir::new().unwrap();
        let (a, inner) = cached(temp_dir.path(), Duration::from_secs(60));
        let b = CachedEmbedder::new(
            inner,
            "other",
            temp_dir.path().to_path_buf(),
            Duration::from_secs(60),
        );
        assert_ne!(a.entry_path("text"), b.entry_path("text"));
    }
}
