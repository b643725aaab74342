use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mascot_rag::config::{CredentialArgs, EmbeddingArgs, LogArgs, StoreArgs};
use mascot_rag::validate::{validate_collection, ValidationReport};
use mascot_rag::EmbeddingProvider;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "mascot-validate",
    about = "Check an ingested collection: record count, sample records and a self-query"
)]
struct ValidateCli {
    /// Number of sample records to print
    #[arg(long, default_value_t = 3)]
    samples: usize,

    /// Re-embed the first sample's text with the configured embedding model for the self-query
    #[arg(long, default_value_t = false)]
    reembed: bool,

    #[command(flatten)]
    creds: CredentialArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    log: LogArgs,
}

fn main() -> Result<()> {
    let cli = ValidateCli::parse();
    cli.log.init();

    // Owns the pgvector connection driver for the whole run.
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let store = runtime.block_on(cli.store.open())?;
    println!("✓ Connected to {}", store.describe());

    let embedder: Option<Arc<dyn EmbeddingProvider>> = if cli.reembed {
        Some(Arc::new(cli.embedding.resolving_embedder(&cli.creds)?))
    } else {
        None
    };
    let text_cache = cli.store.text_cache()?;
    let report = validate_collection(
        store.as_ref(),
        cli.samples,
        embedder.as_deref(),
        text_cache.as_deref(),
    )?;
    print_report(&report);

    anyhow::ensure!(report.is_healthy(), "collection {} failed validation", report.store);
    info!(store = %report.store, count = report.count, "collection validated");
    println!("\n✓ Validation complete - ready to use!");
    Ok(())
}

fn print_report(report: &ValidationReport) {
    println!("  Total documents: {}", report.count);
    if !report.samples.is_empty() {
        println!("\nSample documents (first {}):", report.samples.len());
    }
    for (idx, sample) in report.samples.iter().enumerate() {
        println!("\n  {}. ID: {}", idx + 1, sample.id);
        println!("     File: {}", sample.filename);
        match &sample.preview {
            Some(preview) => println!("     Text preview: {preview}..."),
            None => println!("     Text preview: (detached, not in chunk cache)"),
        }
    }
    match &report.self_query {
        Some(query) => {
            let source = if query.reembedded { "re-embedded text" } else { "stored vector" };
            println!("\nSelf-query with {} of {}:", source, query.id);
            println!("  Query returned {} results", query.returned);
            match query.rank {
                Some(0) => println!("  ✓ Record came back as the top hit"),
                Some(rank) => println!(
                    "  ✗ Record ranked {} behind {}",
                    rank + 1,
                    query.top_id.as_deref().unwrap_or("?")
                ),
                None => println!("  ✗ Record missing from the results"),
            }
        }
        None => println!("\n✗ Collection is empty"),
    }
}
