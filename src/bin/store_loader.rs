use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mascot_rag::config::{LogArgs, StoreArgs, StoreBackend};
use mascot_rag::records::parse_records;
use mascot_rag::vector_store::StoredVector;
use mascot_rag::{EmbeddedChunkRecord, LocalVectorStore, PgVectorStore, RagError};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "mascot-store-loader",
    about = "Load embedded chunks into the local collection or a pgvector table"
)]
struct LoaderCli {
    /// Embedded chunk records produced by `mascot-embedder`
    #[arg(long, env = "MASCOT_EMBED_OUTPUT", default_value = "embeddings.jsonl")]
    input: PathBuf,

    /// Store vectors and metadata only; chunk text is served from a chunk cache at query time
    #[arg(long, env = "MASCOT_STORE_DETACHED", default_value_t = false)]
    detached: bool,

    /// Number of rows buffered per INSERT transaction (pgvector only)
    #[arg(long, env = "MASCOT_PGVECTOR_BATCH", default_value_t = 128)]
    batch_size: usize,

    /// Create the vector extension/table automatically if missing (pgvector only)
    #[arg(long, env = "MASCOT_PGVECTOR_PREPARE", default_value_t = true)]
    prepare_table: bool,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    log: LogArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = LoaderCli::parse();
    cli.log.init();

    let raw = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to open embedding input {:?}", cli.input))?;
    let embedded: Vec<EmbeddedChunkRecord> = parse_records(&raw)
        .with_context(|| format!("invalid embedding records in {:?}", cli.input))?;
    if embedded.is_empty() {
        println!("No embeddings to insert; nothing to do.");
        return Ok(());
    }
    let records: Vec<StoredVector> = embedded
        .iter()
        .map(|record| StoredVector::from_embedded(record, cli.detached))
        .collect();
    let dims = uniform_dimension(&records)?;

    let (total, target) = match cli.store.store {
        StoreBackend::Local => load_local(&cli.store, records)?,
        StoreBackend::Pgvector => {
            load_pgvector(&cli.store, records, dims, cli.batch_size, cli.prepare_table).await?
        }
    };

    println!(
        "Successfully inserted {} record{} into {}.",
        total,
        if total == 1 { "" } else { "s" },
        target
    );
    Ok(())
}

fn load_local(args: &StoreArgs, records: Vec<StoredVector>) -> Result<(usize, String)> {
    let mut store =
        LocalVectorStore::open_or_create(&args.collection_path, args.collection.clone(), args.metric)?;
    let written = store.upsert(records)?;
    store.persist()?;
    info!(
        collection = store.name(),
        path = %store.path().display(),
        total = store.len(),
        "local collection persisted"
    );
    Ok((written, store.path().display().to_string()))
}

async fn load_pgvector(
    args: &StoreArgs,
    records: Vec<StoredVector>,
    dims: usize,
    batch_size: usize,
    prepare_table: bool,
) -> Result<(usize, String)> {
    let url = args
        .database_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .context("DATABASE_URL must be set for the pgvector store")?;
    let table = args.table_name()?;
    let qualified = table.qualified();
    let mut store = PgVectorStore::connect(&url, table, args.metric).await?;
    if prepare_table {
        store.prepare(dims).await?;
    }

    let mut total_inserted = 0usize;
    for batch in records.chunks(batch_size.max(1)) {
        total_inserted += store.upsert(batch).await?;
        render_progress(total_inserted)?;
    }
    println!();
    Ok((total_inserted, qualified))
}

/// Dimension shared by every record; a collection never mixes dimensions.
fn uniform_dimension(records: &[StoredVector]) -> Result<usize> {
    let Some(first) = records.first() else {
        return Ok(0);
    };
    let expected = first.embedding.len();
    anyhow::ensure!(expected > 0, "first embedding record missing vector values");
    if let Some(bad) = records.iter().find(|record| record.embedding.len() != expected) {
        return Err(RagError::DimensionMismatch {
            id: bad.id.clone(),
            expected,
            found: bad.embedding.len(),
        }
        .into());
    }
    Ok(expected)
}

fn render_progress(inserted: usize) -> Result<()> {
    let plural = if inserted == 1 { "" } else { "s" };
    print!("\rInserted {} record{}...", inserted, plural);
    io::stdout().flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn vector(id: &str, dims: usize) -> StoredVector {
        StoredVector {
            id: id.to_string(),
            embedding: vec![0.5; dims],
            document: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn uniform_dimension_reports_offender() {
        let records = vec![vector("a.md:0", 3), vector("a.md:1", 3), vector("b.md:0", 4)];
        let err = uniform_dimension(&records).expect_err("mixed");
        assert!(err.to_string().contains("b.md:0"), "{err}");
        assert_eq!(uniform_dimension(&records[..2]).expect("uniform"), 3);
    }
}
