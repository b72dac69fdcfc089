//! Document registration commands

use crate::error::{Error, Result};
use crate::kb::{KnowledgeBaseManager, StoredChunk};
use crate::meta::Document;
use crate::parse::is_supported;
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Documents registered by `add`
#[derive(Debug, Clone, Serialize)]
pub struct AddStats {
    pub base: String,
    pub documents: Vec<Document>,
}

/// Register a file, or every supported file below a directory
pub async fn cmd_add(manager: &KnowledgeBaseManager, base: &str, path: &Path) -> Result<AddStats> {
    let documents = if path.is_dir() {
        info!(base = %base, dir = %path.display(), "Scanning directory");
        manager.add_directory(base, path, is_supported).await?
    } else if path.is_file() {
        vec![manager.add_document(base, path).await?]
    } else {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("No such file or directory: {}", path.display()),
        )));
    };

    Ok(AddStats {
        base: base.to_string(),
        documents,
    })
}

pub async fn cmd_remove_document(manager: &KnowledgeBaseManager, doc_id: &str) -> Result<Document> {
    manager.remove_document(doc_id).await
}

pub async fn cmd_chunks(manager: &KnowledgeBaseManager, doc_id: &str) -> Result<Vec<StoredChunk>> {
    manager.document_chunks(doc_id).await
}

pub fn print_add_stats(stats: &AddStats) {
    println!(
        "✓ Registered {} document(s) in '{}'",
        stats.documents.len(),
        stats.base
    );
    for doc in &stats.documents {
        println!("  {}  {}", doc.doc_id, doc.doc_name);
    }
    if !stats.documents.is_empty() {
        println!("\nRun 'kbindex sweep' or 'kbindex serve' to parse and embed them.");
    }
}

pub fn print_chunks(chunks: &[StoredChunk]) {
    if chunks.is_empty() {
        println!("No chunks stored for this document.");
        return;
    }

    for (i, chunk) in chunks.iter().enumerate() {
        println!("─── Chunk {} ({}) ───", i + 1, chunk.id);
        if !chunk.keywords.is_empty() {
            println!("Keywords: {}", chunk.keywords.join(", "));
        }
        println!("{}\n", chunk.doc);
    }
}
