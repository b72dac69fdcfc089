//! Default values for configuration

use super::{SupplierConfig, SupplierKind};
use std::collections::BTreeMap;

/// Default seconds between two indexer sweeps
pub fn default_sweep_interval_secs() -> u64 {
    5
}

/// Row count above which a chunk table is promoted to an approximate index
pub fn default_promotion_threshold() -> usize {
    256
}

/// Number of IVF partitions probed per approximate query
pub fn default_ivf_probes() -> usize {
    20
}

/// Raw (squared L2) distance above which flat vector hits are discarded
pub fn default_flat_distance_cutoff() -> f32 {
    600.0
}

/// Document ids per registry lookup batch
pub fn default_lookup_batch_size() -> usize {
    10
}

/// URL substituted for the `{URL}` placeholder in returned passages
pub fn default_external_url() -> String {
    "http://127.0.0.1:7071".to_string()
}

/// Lower bound on vector candidates fetched per base
pub fn default_min_candidates() -> usize {
    50
}

/// Vector over-fetch factor relative to maxRecall
pub fn default_candidate_multiplier() -> usize {
    3
}

/// Context budget (chars) for the local supplier
pub fn default_local_context_chars() -> usize {
    6144
}

/// Context budget (chars) for remote suppliers
pub fn default_remote_context_chars() -> usize {
    49152
}

/// Default embedding dimension
pub fn default_embedding_dimension() -> usize {
    1024
}

/// Embedding cache entries expire after one week
pub fn default_cache_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

/// HTTP timeout for embedding requests
pub fn default_embedding_timeout_secs() -> u64 {
    60
}

/// Name of the supplier used when a knowledge base does not pick one
pub fn default_supplier_name() -> String {
    "ollama".to_string()
}

/// Default Ollama URL
pub fn default_ollama_url() -> String {
    std::env::var("KBINDEX_OLLAMA_URL").unwrap_or_else(|_| "http://127.0.0.1:11434".to_string())
}

/// Built-in supplier table
pub fn default_suppliers() -> BTreeMap<String, SupplierConfig> {
    let mut suppliers = BTreeMap::new();
    suppliers.insert(
        default_supplier_name(),
        SupplierConfig {
            kind: SupplierKind::Ollama,
            url: default_ollama_url(),
            api_key_env: None,
        },
    );
    suppliers
}

// ===== Knowledge Base Defaults =====

/// Passages returned per base
pub fn default_max_recall() -> usize {
    5
}

/// Minimum similarity kept from a promoted index
pub fn default_recall_accuracy() -> f32 {
    0.3
}

pub fn default_vector_weight() -> f32 {
    0.7
}

pub fn default_keyword_weight() -> f32 {
    0.3
}

/// Target chunk length in characters
pub fn default_chunk_size() -> usize {
    1000
}

/// Overlap carried between size-split chunks
pub fn default_overlap_size() -> usize {
    100
}
