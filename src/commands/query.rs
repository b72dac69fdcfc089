//! Query command implementation

use crate::error::Result;
use crate::kb::KnowledgeBaseManager;
use crate::keywords::query_keywords;
use crate::search::{build_context, context_budget, SearchEngine, SearchHit, SearchRequest};
use serde::Serialize;
use tracing::{debug, info};

/// Query options
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Skip the keyword sub-search
    pub no_keywords: bool,
    /// Also assemble a prompt context from the hits
    pub context: bool,
}

/// Query result for CLI display
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub query: String,
    pub bases: Vec<String>,
    pub keywords: Vec<String>,
    pub results: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Execute a query across the named bases
pub async fn cmd_query(
    engine: &SearchEngine,
    manager: &KnowledgeBaseManager,
    query: &str,
    bases: Vec<String>,
    options: QueryOptions,
) -> Result<QueryResult> {
    info!("Querying: {}", query);

    let mut request = SearchRequest::new(bases.clone(), query);
    let keywords = if options.no_keywords {
        Vec::new()
    } else {
        let keywords = query_keywords(query);
        debug!(?keywords, "Query keywords");
        request = request.with_keywords(keywords.clone());
        keywords
    };

    let results = engine.search(&request).await;

    let context = if options.context {
        // The first base decides which supplier the context is sized for
        let supplier = match bases.first() {
            Some(base) => manager.load_config(base)?.supplier_name,
            None => String::new(),
        };
        let budget = context_budget(&engine.config().search, &supplier);
        Some(build_context(&results, budget))
    } else {
        None
    };

    Ok(QueryResult {
        query: query.to_string(),
        bases,
        keywords,
        results,
        context,
    })
}

/// Print query results
pub fn print_query_results(result: &QueryResult) {
    if result.results.is_empty() {
        println!("No results found for: {}", result.query);
        return;
    }

    println!(
        "Found {} result(s) for: {}\n",
        result.results.len(),
        result.query
    );

    for (i, hit) in result.results.iter().enumerate() {
        println!("─── Result {} (score: {:.3}) ───", i + 1, hit.score);
        println!("Base: {}", hit.base);
        println!("Document: {} ({})", hit.doc_name, hit.doc_file);
        match (hit.vector_score, hit.keyword_score) {
            (Some(v), Some(k)) => println!("Vector: {:.3}  Keyword: {:.3}", v, k),
            (Some(v), None) => println!("Vector: {:.3}", v),
            (None, Some(k)) => println!("Keyword: {:.3}", k),
            (None, None) => {}
        }
        println!();

        let preview = if hit.doc.chars().count() > 500 {
            format!("{}...", hit.doc.chars().take(500).collect::<String>())
        } else {
            hit.doc.clone()
        };
        println!("{}\n", preview);
    }

    if let Some(context) = &result.context {
        println!("─── Context ({} chars) ───", context.chars().count());
        println!("{}", context);
    }
}
