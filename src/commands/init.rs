//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::SqliteVectorStore;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Paths created by `init`
#[derive(Debug, Clone, Serialize)]
pub struct InitInfo {
    pub config_path: String,
    pub rag_dir: String,
    pub store_path: String,
}

/// Write a default configuration and create the data layout
pub async fn cmd_init(base_dir: PathBuf, config_path: PathBuf, force: bool) -> Result<InitInfo> {
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.init_paths(Some(base_dir));
    config.paths.config_file = config_path;
    config.validate()?;
    config.save()?;

    std::fs::create_dir_all(config.index_tips_dir())?;
    std::fs::create_dir_all(config.embedding_cache_dir())?;
    SqliteVectorStore::open(&config.store_path()).await?;
    info!("Created store at {:?}", config.store_path());

    Ok(InitInfo {
        config_path: config.paths.config_file.display().to_string(),
        rag_dir: config.rag_dir().display().to_string(),
        store_path: config.store_path().display().to_string(),
    })
}

pub fn print_init(info: &InitInfo) {
    println!("✓ Initialized kbindex");
    println!("\nConfiguration: {}", info.config_path);
    println!("Knowledge bases: {}", info.rag_dir);
    println!("Store: {}", info.store_path);
    println!("\nNext steps:");
    println!("  kbindex kb create docs --model nomic-embed-text   # Create a knowledge base");
    println!("  kbindex add docs ./path/to/docs                   # Register documents");
    println!("  kbindex serve                                     # Parse and embed in the background");
    println!("  kbindex query \"how to use X\" --base docs          # Search");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_layout_and_refuses_overwrite() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");

        let info =
            tokio_test::assert_ok!(cmd_init(temp.path().to_path_buf(), config_path.clone(), false).await);
        assert!(config_path.exists());
        assert!(temp.path().join("rag").join("index_tips").is_dir());
        assert!(temp.path().join("rag").join("vector.db").exists());
        assert!(info.store_path.ends_with("vector.db"));

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded.rag_dir(), temp.path().join("rag"));

        let err = cmd_init(temp.path().to_path_buf(), config_path.clone(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        tokio_test::assert_ok!(cmd_init(temp.path().to_path_buf(), config_path, true).await);
    }
}
