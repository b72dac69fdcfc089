//! Indexer commands: one-shot sweep and the long-running service

use crate::error::Result;
use crate::indexer::{BackgroundIndexer, Outcome, SweepReport};
use crate::lifecycle::LifecycleAction;
use tokio::sync::watch;
use tracing::{info, warn};

/// Run a single sweep in the foreground
pub async fn cmd_sweep(indexer: &mut BackgroundIndexer) -> Result<SweepReport> {
    indexer.sweep().await
}

/// Sweep on the configured interval until Ctrl-C
pub async fn cmd_serve(mut indexer: BackgroundIndexer) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = tokio::spawn(async move {
        indexer.run(shutdown_rx).await;
        indexer.state().sweeps
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for the current sweep to finish");
    if shutdown_tx.send(true).is_err() {
        warn!("Indexer already stopped");
    }

    match worker.await {
        Ok(sweeps) => info!(sweeps, "Indexer stopped"),
        Err(e) => warn!(error = %e, "Indexer task failed"),
    }
    Ok(())
}

pub fn print_sweep_report(report: &SweepReport) {
    if report.is_empty() {
        println!("✓ Nothing to do");
        return;
    }

    let parsed = count(report, |o| matches!(o, Outcome::Parsed));
    let embedded = count(report, |o| matches!(o, Outcome::Embedded { .. }));
    let chunks: usize = report
        .documents
        .iter()
        .map(|d| match d.outcome {
            Outcome::Embedded { chunks } => chunks,
            _ => 0,
        })
        .sum();

    println!("✓ Sweep complete");
    println!("  Parsed:    {}", parsed);
    println!("  Embedded:  {} ({} chunks)", embedded, chunks);
    println!("  Failed:    {}", report.failures());

    for doc in &report.documents {
        match &doc.outcome {
            Outcome::ParseFailed { reason } => {
                println!("  ✗ {} [{}] parse: {}", doc.doc_id, doc.base, reason)
            }
            Outcome::EmbedFailed { reason, inserted } => println!(
                "  ✗ {} [{}] embed after {} chunk(s): {}",
                doc.doc_id, doc.base, inserted, reason
            ),
            _ => {}
        }
    }

    for action in &report.actions {
        match action {
            LifecycleAction::FullTextCreated { table } => {
                println!("  Full-text index created on {}", table)
            }
            LifecycleAction::Promoted { table, rows } => {
                println!("  Promoted {} to an approximate index ({} rows)", table, rows)
            }
        }
    }
}

fn count(report: &SweepReport, pred: impl Fn(&Outcome) -> bool) -> usize {
    report.documents.iter().filter(|d| pred(&d.outcome)).count()
}
