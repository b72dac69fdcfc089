//! Status command implementation

use crate::config::Config;
use crate::error::Result;
use crate::kb::KnowledgeBaseManager;
use crate::meta::{DocumentRegistry, ParseState};
use serde::Serialize;
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub store_path: String,
    pub rag_dir: String,
    pub sweep_interval_secs: u64,
    pub promotion_threshold: usize,
    pub suppliers: Vec<String>,
    pub bases: usize,
    pub promoted_bases: usize,
    pub chunks: usize,
    pub documents: Vec<(ParseState, usize)>,
}

/// Get system status
pub async fn cmd_status(
    config: &Config,
    manager: &KnowledgeBaseManager,
    registry: &DocumentRegistry,
) -> Result<StatusInfo> {
    info!("Getting status");

    let mut bases = 0;
    let mut promoted_bases = 0;
    let mut chunks = 0;
    for name in manager.list_bases()? {
        let summary = manager.summary(&name).await?;
        bases += 1;
        chunks += summary.chunks;
        if summary.promoted {
            promoted_bases += 1;
        }
    }

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        store_path: config.store_path().display().to_string(),
        rag_dir: config.rag_dir().display().to_string(),
        sweep_interval_secs: config.indexer.sweep_interval_secs,
        promotion_threshold: config.lifecycle.promotion_threshold,
        suppliers: config.embedding.suppliers.keys().cloned().collect(),
        bases,
        promoted_bases,
        chunks,
        documents: registry.state_counts(None).await?,
    })
}

/// Print status information
pub fn print_status(status: &StatusInfo) {
    println!("kbindex Status\n");

    println!("Configuration:");
    println!("  Config file:  {}", status.config_path);
    println!("  Store:        {}", status.store_path);
    println!("  Bases dir:    {}", status.rag_dir);
    println!("  Suppliers:    {}", status.suppliers.join(", "));
    println!();

    println!("Indexer:");
    println!("  Sweep every:  {}s", status.sweep_interval_secs);
    println!("  Promote at:   {} rows", status.promotion_threshold);
    println!();

    println!("Statistics:");
    println!(
        "  Bases:        {} ({} promoted)",
        status.bases, status.promoted_bases
    );
    println!("  Chunks:       {}", status.chunks);
    for (state, count) in &status.documents {
        println!("  {:<13} {}", format!("{}:", capitalize(&state.to_string())), count);
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
