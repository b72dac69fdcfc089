//! kbindex CLI entry point

use clap::{Parser, Subcommand};
use kbindex::{
    commands::{
        cmd_add, cmd_chunks, cmd_create_base, cmd_init, cmd_list_bases, cmd_query,
        cmd_remove_base, cmd_remove_document, cmd_reindex, cmd_serve, cmd_status, cmd_sweep,
        print_add_stats, print_base_created, print_bases, print_chunks, print_init,
        print_query_results, print_reindex_stats, print_status, print_sweep_report,
        CreateBaseOptions, QueryOptions, Services,
    },
    config::Config,
    error::{Error, Result},
    kb::SearchStrategy,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "kbindex")]
#[command(version, about = "Knowledge-base indexing and hybrid retrieval for local RAG", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "KBINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize kbindex configuration and storage
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Manage knowledge bases
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Register a file, or every supported file in a directory, with a base
    Add {
        /// Knowledge base name
        base: String,

        /// File or directory to register
        path: PathBuf,
    },

    /// Remove a document, its chunks and its parsed text
    Remove {
        /// Document ID (see 'kbindex kb list' and 'kbindex chunks')
        doc_id: String,
    },

    /// Queue documents for parsing and embedding again
    Reindex {
        /// Knowledge base name
        base: String,

        /// Only this document
        #[arg(long)]
        doc: Option<String>,

        /// Delete existing chunks first
        #[arg(long)]
        purge: bool,
    },

    /// Show the stored chunks of a document
    Chunks {
        /// Document ID
        doc_id: String,
    },

    /// Run one indexer sweep and exit
    Sweep,

    /// Run the background indexer until interrupted
    Serve,

    /// Search one or more knowledge bases
    Query {
        /// The search query
        query: String,

        /// Knowledge base to search (repeatable)
        #[arg(short, long = "base", required = true)]
        bases: Vec<String>,

        /// Skip the keyword sub-search
        #[arg(long)]
        no_keywords: bool,

        /// Also print the prompt context built from the results
        #[arg(long)]
        context: bool,
    },

    /// Show system status
    Status,
}

/// Knowledge base actions
#[derive(Subcommand)]
enum KbAction {
    /// Create a knowledge base
    Create {
        /// Knowledge base name
        name: String,

        /// Embedding model (may be empty for full-text bases)
        #[arg(short, long, default_value = "")]
        model: String,

        /// Embedding supplier from the config's supplier table
        #[arg(long)]
        supplier: Option<String>,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,

        /// Search strategy: hybrid, vector or fulltext
        #[arg(long)]
        strategy: Option<SearchStrategy>,

        /// Passages returned per query
        #[arg(long)]
        max_recall: Option<usize>,

        /// Minimum similarity once the base is promoted (0-1)
        #[arg(long)]
        recall_accuracy: Option<f32>,

        /// Weight of the vector score
        #[arg(long)]
        vector_weight: Option<f32>,

        /// Weight of the keyword score
        #[arg(long)]
        keyword_weight: Option<f32>,

        /// Maximum chunk length in characters
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Characters shared by adjacent chunks
        #[arg(long)]
        overlap: Option<usize>,

        /// Chunk separator; wrap in slashes for a regular expression (repeatable)
        #[arg(long = "separator")]
        separators: Vec<String>,
    },

    /// List knowledge bases
    List,

    /// Remove a knowledge base and everything in it
    Remove {
        /// Knowledge base name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(
            cli.log_json
                .then(|| fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!cli.log_json).then(|| fmt::layer().with_writer(std::io::stderr)),
        )
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init { force } = cli.command {
        let (base_dir, config_path) = init_paths(cli.config);
        let info = cmd_init(base_dir, config_path, force).await?;
        return output(cli.json, &info, print_init);
    }

    let config = load_config(cli.config.as_deref())?;
    let services = Services::open(config).await?;
    let manager = services.manager();

    match cli.command {
        Commands::Init { .. } => unreachable!(),

        Commands::Kb { action } => match action {
            KbAction::Create {
                name,
                model,
                supplier,
                description,
                strategy,
                max_recall,
                recall_accuracy,
                vector_weight,
                keyword_weight,
                chunk_size,
                overlap,
                separators,
            } => {
                let options = CreateBaseOptions {
                    description,
                    supplier,
                    strategy,
                    max_recall,
                    recall_accuracy,
                    vector_weight,
                    keyword_weight,
                    chunk_size,
                    overlap_size: overlap,
                    separators,
                };
                let kb = cmd_create_base(&manager, &name, &model, options).await?;
                output(cli.json, &kb, print_base_created)?;
            }
            KbAction::List => {
                let summaries = cmd_list_bases(&manager).await?;
                output(cli.json, &summaries, |s| print_bases(s))?;
            }
            KbAction::Remove { name } => {
                cmd_remove_base(&manager, &name).await?;
                if cli.json {
                    println!(r#"{{"status": "ok", "removed": {}}}"#, serde_json::to_string(&name)?);
                } else {
                    println!("✓ Knowledge base '{}' removed", name);
                }
            }
        },

        Commands::Add { base, path } => {
            let stats = cmd_add(&manager, &base, &path).await?;
            output(cli.json, &stats, print_add_stats)?;
        }

        Commands::Remove { doc_id } => {
            let doc = cmd_remove_document(&manager, &doc_id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                println!("✓ Removed '{}' from '{}'", doc.doc_name, doc.doc_rag);
            }
        }

        Commands::Reindex { base, doc, purge } => {
            let stats = cmd_reindex(&manager, &base, doc.as_deref(), purge).await?;
            output(cli.json, &stats, print_reindex_stats)?;
        }

        Commands::Chunks { doc_id } => {
            let chunks = cmd_chunks(&manager, &doc_id).await?;
            output(cli.json, &chunks, |c| print_chunks(c))?;
        }

        Commands::Sweep => {
            let mut indexer = services.indexer();
            let report = cmd_sweep(&mut indexer).await?;
            output(cli.json, &report, print_sweep_report)?;
        }

        Commands::Serve => {
            cmd_serve(services.indexer()).await?;
        }

        Commands::Query {
            query,
            bases,
            no_keywords,
            context,
        } => {
            let options = QueryOptions {
                no_keywords,
                context,
            };
            let engine = services.search_engine();
            let results = cmd_query(&engine, &manager, &query, bases, options).await?;
            output(cli.json, &results, print_query_results)?;
        }

        Commands::Status => {
            let status = cmd_status(&services.config, &manager, &services.registry).await?;
            output(cli.json, &status, print_status)?;
        }
    }

    Ok(())
}

/// Print `value` as pretty JSON or through its human-readable printer
fn output<T: Serialize + ?Sized>(json: bool, value: &T, print: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

/// Base directory and config file for `init`
///
/// A `.toml` path is taken as the config file itself; any other path is
/// treated as the base directory.
fn init_paths(config: Option<PathBuf>) -> (PathBuf, PathBuf) {
    match config {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path)
        }
        Some(dir) => (dir.clone(), dir.join("config.toml")),
        None => {
            let base = Config::default_base_dir();
            (base.clone(), base.join("config.toml"))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}
