use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use mascot_rag::config::LogArgs;
use mascot_rag::ingest::chunk_repository;
use mascot_rag::records::DEFAULT_SOURCE;
use mascot_rag::ChunkerConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "mascot-chunker",
    about = "Chunk a repository's markdown documentation into chunk records"
)]
struct ChunkerCli {
    /// Repository root to scan for *.md files
    repo: PathBuf,

    /// Output file for chunk records
    #[arg(long, env = "MASCOT_CHUNKS_OUTPUT", default_value = "chunks.json")]
    output: PathBuf,

    /// Output layout
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Maximum characters per chunk
    #[arg(long, env = "MASCOT_MAX_CHUNK_SIZE", default_value_t = 1000)]
    max_chunk_size: usize,

    /// Non-zero carries the last paragraph of each chunk into the next one
    #[arg(long, env = "MASCOT_CHUNK_OVERLAP", default_value_t = 200)]
    overlap: usize,

    /// Value of the `source` metadata field
    #[arg(long, default_value = DEFAULT_SOURCE)]
    source: String,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One pretty-printed JSON array
    Json,
    /// One record per line
    Jsonl,
}

fn main() -> Result<()> {
    let cli = ChunkerCli::parse();
    cli.log.init();
    anyhow::ensure!(cli.max_chunk_size > 0, "--max-chunk-size must be positive");

    let config = ChunkerConfig {
        max_chunk_size: cli.max_chunk_size,
        overlap: cli.overlap,
    };
    let report = chunk_repository(&cli.repo, &config, &cli.source)?;

    let output = File::create(&cli.output)
        .with_context(|| format!("failed to create {:?}", cli.output))?;
    let mut writer = BufWriter::new(output);
    match cli.format {
        OutputFormat::Json => serde_json::to_writer_pretty(&mut writer, &report.records)?,
        OutputFormat::Jsonl => {
            for record in &report.records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
        }
    }
    writer.flush()?;

    info!(
        chunks = report.records.len(),
        files = report.files,
        skipped = report.skipped,
        output = %cli.output.display(),
        "chunking complete"
    );
    Ok(())
}
