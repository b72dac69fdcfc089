//! kbindex - Knowledge-base indexing and hybrid retrieval for local RAG
//!
//! This crate provides:
//! - Separator-aware chunking with overlap
//! - A background indexer that parses, embeds and stores registered documents
//! - Index lifecycle management (full-text index, one-time vector index promotion)
//! - Hybrid vector + keyword retrieval with per-document consolidation

pub mod chunk;
pub mod commands;
pub mod config;
pub mod embed;
pub mod error;
pub mod indexer;
pub mod kb;
pub mod keywords;
pub mod lifecycle;
pub mod meta;
pub mod parse;
pub mod rank;
pub mod search;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
