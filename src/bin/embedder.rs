use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use mascot_rag::config::{CredentialArgs, EmbeddingArgs, LogArgs};
use mascot_rag::records::parse_records;
use mascot_rag::{ChunkRecord, EmbeddedChunkRecord, EmbeddingProvider, RagError};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "mascot-embedder",
    about = "Embed chunk records with a worker pool and write embedded JSONL"
)]
struct EmbedCli {
    /// Chunk records produced by `mascot-chunker` (JSON array or JSONL)
    #[arg(long, env = "MASCOT_EMBED_INPUT", default_value = "chunks.json")]
    input: PathBuf,

    /// Output JSONL containing embedded chunk records
    #[arg(long, env = "MASCOT_EMBED_OUTPUT", default_value = "embeddings.jsonl")]
    output: PathBuf,

    /// Number of concurrent embedding workers
    #[arg(long, env = "MASCOT_EMBED_THREADS", default_value_t = 1, alias = "worker-threads")]
    threads: usize,

    #[command(flatten)]
    creds: CredentialArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    log: LogArgs,
}

fn main() -> Result<()> {
    let cli = EmbedCli::parse();
    cli.log.init();

    let raw =
        fs::read_to_string(&cli.input).with_context(|| format!("failed to read {:?}", cli.input))?;
    let chunks: Vec<ChunkRecord> = parse_records(&raw)
        .with_context(|| format!("invalid chunk records in {:?}", cli.input))?;
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(cli.embedding.resolving_embedder(&cli.creds)?);

    let output =
        File::create(&cli.output).with_context(|| format!("failed to create {:?}", cli.output))?;
    let mut writer = BufWriter::new(output);
    let written = process_records(
        chunks,
        &mut writer,
        embedder,
        cli.embedding.embedding_batch_size.max(1),
        cli.threads,
    )?;
    writer.flush()?;
    info!(chunks = written, output = %cli.output.display(), "embedding complete");
    Ok(())
}

fn process_records<W: Write>(
    chunks: Vec<ChunkRecord>,
    writer: &mut W,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    worker_threads: usize,
) -> Result<usize> {
    let worker_threads = worker_threads.max(1);
    info!(
        chunks = chunks.len(),
        batch_size,
        workers = worker_threads,
        "launching embedder"
    );
    let (task_tx, task_rx) = bounded::<EmbeddingTask>(worker_threads * 2);
    let (result_tx, result_rx) = bounded::<EmbeddingResult>(worker_threads * 2);

    for worker_id in 0..worker_threads {
        let worker_embedder = Arc::clone(&embedder);
        let worker_rx = task_rx.clone();
        let worker_tx = result_tx.clone();
        thread::spawn(move || worker_loop(worker_id, worker_rx, worker_tx, worker_embedder));
    }
    drop(task_rx);
    drop(result_tx);

    let mut output = OrderedOutput::new(writer);
    let mut inflight_batches = 0usize;
    for (batch_id, batch) in chunks.chunks(batch_size).enumerate() {
        let records = batch
            .iter()
            .map(|chunk| EmbeddedChunkRecord {
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                embedding: Vec::new(),
            })
            .collect();
        task_tx
            .send(EmbeddingTask {
                id: batch_id,
                records,
            })
            .map_err(|_| anyhow!("embedding worker channel closed"))?;
        inflight_batches += 1;
        debug!(batch = batch_id, "queued embedding batch");
        drain_ready_results(&result_rx, &mut output, &mut inflight_batches)?;
    }
    drop(task_tx);

    while inflight_batches > 0 {
        let result = match result_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => {
                info!(
                    inflight = inflight_batches,
                    oldest = output.next_id,
                    "still waiting on embedding batches"
                );
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                anyhow::bail!("embedding worker channel closed unexpectedly")
            }
        };
        inflight_batches -= 1;
        output.accept(result?)?;
    }

    if output.written == 0 {
        warn!("no chunk records found to embed");
    }
    Ok(output.written)
}

fn drain_ready_results<W: Write>(
    result_rx: &Receiver<EmbeddingResult>,
    output: &mut OrderedOutput<'_, W>,
    inflight_batches: &mut usize,
) -> Result<()> {
    loop {
        let result = match result_rx.try_recv() {
            Ok(res) => res,
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                anyhow::bail!("embedding worker channel closed unexpectedly")
            }
        };
        *inflight_batches = inflight_batches.saturating_sub(1);
        output.accept(result?)?;
    }
    Ok(())
}

/// Writes batches in submission order and pins the collection dimension to the first vector.
struct OrderedOutput<'a, W: Write> {
    writer: &'a mut W,
    pending: BTreeMap<usize, Vec<EmbeddedChunkRecord>>,
    next_id: usize,
    dimension: Option<usize>,
    written: usize,
}

impl<'a, W: Write> OrderedOutput<'a, W> {
    fn new(writer: &'a mut W) -> Self {
        Self {
            writer,
            pending: BTreeMap::new(),
            next_id: 0,
            dimension: None,
            written: 0,
        }
    }

    fn accept(&mut self, batch: EmbeddingBatchResult) -> Result<()> {
        self.pending.insert(batch.id, batch.records);
        while let Some(records) = self.pending.remove(&self.next_id) {
            for record in records {
                self.check_dimension(&record)?;
                serde_json::to_writer(&mut *self.writer, &record)?;
                self.writer.write_all(b"\n")?;
                self.written += 1;
            }
            info!(embedded = self.written, "embedded chunks");
            self.next_id += 1;
        }
        Ok(())
    }

    fn check_dimension(&mut self, record: &EmbeddedChunkRecord) -> Result<()> {
        let found = record.embedding.len();
        match self.dimension {
            None => {
                info!(dimension = found, "embedding dimension fixed by first vector");
                self.dimension = Some(found);
                Ok(())
            }
            Some(expected) if expected == found => Ok(()),
            Some(expected) => Err(RagError::DimensionMismatch {
                id: record.key(),
                expected,
                found,
            }
            .into()),
        }
    }
}

fn worker_loop(
    worker_id: usize,
    receiver: Receiver<EmbeddingTask>,
    sender: Sender<EmbeddingResult>,
    embedder: Arc<dyn EmbeddingProvider>,
) {
    for task in receiver.iter() {
        let EmbeddingTask {
            id: batch_id,
            mut records,
        } = task;
        let chunk_count = records.len();
        debug!(worker = worker_id, batch = batch_id, chunks = chunk_count, "embedding batch");
        let result = embed_records(embedder.as_ref(), &mut records)
            .map(|_| EmbeddingBatchResult {
                id: batch_id,
                records,
            })
            .map_err(|err| {
                anyhow!(
                    "worker {} failed batch {} ({} chunks): {:#}",
                    worker_id,
                    batch_id,
                    chunk_count,
                    err
                )
            });
        if sender.send(result).is_err() {
            break;
        }
    }
}

fn embed_records(
    embedder: &dyn EmbeddingProvider,
    records: &mut [EmbeddedChunkRecord],
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let inputs: Vec<&str> = records.iter().map(|record| record.text.as_str()).collect();
    let embeddings = embedder.embed(&inputs)?;
    anyhow::ensure!(
        embeddings.len() == records.len(),
        "embedding count {} mismatched pending {}",
        embeddings.len(),
        records.len()
    );

    for (record, vector) in records.iter_mut().zip(embeddings) {
        record.embedding = vector;
    }
    Ok(())
}

struct EmbeddingTask {
    id: usize,
    records: Vec<EmbeddedChunkRecord>,
}

struct EmbeddingBatchResult {
    id: usize,
    records: Vec<EmbeddedChunkRecord>,
}

type EmbeddingResult = Result<EmbeddingBatchResult>;

#[cfg(test)]
mod tests {
    use super::*;
    use mascot_rag::ChunkMetadata;
    use pretty_assertions::assert_eq;

    struct LengthEmbedder;

    impl EmbeddingProvider for LengthEmbedder {
        fn name(&self) -> &str {
            "length"
        }

        fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| vec![text.len() as f32; if text.starts_with("wide") { 3 } else { 2 }])
                .collect())
        }
    }

    fn chunk(text: &str, index: usize) -> ChunkRecord {
        ChunkRecord {
            text: text.to_string(),
            metadata: ChunkMetadata {
                file_path: "docs/a.md".to_string(),
                filename: "a.md".to_string(),
                chunk_index: index,
                total_chunks: 4,
                source: "github".to_string(),
            },
        }
    }

    #[test]
    fn writes_records_in_input_order() {
        let chunks = vec![chunk("a", 0), chunk("bb", 1), chunk("ccc", 2), chunk("dddd", 3)];
        let mut out = Vec::new();

        let written =
            process_records(chunks, &mut out, Arc::new(LengthEmbedder), 1, 3).expect("embed");

        assert_eq!(written, 4);
        let records: Vec<EmbeddedChunkRecord> =
            parse_records(std::str::from_utf8(&out).expect("utf8")).expect("jsonl");
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "bb", "ccc", "dddd"]);
        assert_eq!(records[3].embedding, vec![4.0, 4.0]);
    }

    #[test]
    fn mixed_dimensions_abort() {
        let chunks = vec![chunk("a", 0), chunk("wide", 1)];
        let mut out = Vec::new();

        let err = process_records(chunks, &mut out, Arc::new(LengthEmbedder), 1, 1)
            .expect_err("mismatch");

        assert!(err.to_string().contains("docs/a.md:1"), "{err}");
    }
}
