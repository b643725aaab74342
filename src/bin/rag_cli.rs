use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mascot_rag::config::{CredentialArgs, EmbeddingArgs, GenerationArgs, LogArgs, StoreArgs};
use mascot_rag::prompt::context_block;
use mascot_rag::retriever::DEFAULT_TOP_K;
use mascot_rag::{AnswerPipeline, GenerationProvider, Mascot, NO_CONTEXT_ANSWER};

#[derive(Parser, Debug)]
#[command(
    name = "mascot-rag",
    about = "Answer one question in a mascot's voice from the documentation store"
)]
struct RagCli {
    /// Question to answer
    #[arg(long)]
    question: String,

    /// Mascot voice (gooey or bill)
    #[arg(long, default_value = "gooey")]
    mascot: Mascot,

    /// Number of chunks retrieved for the prompt
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Only print the retrieved context and prompt (skip the generation call)
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[command(flatten)]
    creds: CredentialArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    generation: GenerationArgs,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    log: LogArgs,
}

fn main() -> Result<()> {
    let cli = RagCli::parse();
    cli.log.init();

    // Owns the pgvector connection driver for the whole run.
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let store = runtime.block_on(cli.store.open())?;
    let embedder = cli.embedding.query_embedder(&cli.creds)?;
    let retriever = cli.store.retriever(embedder, store)?;
    let generator: Arc<dyn GenerationProvider> =
        Arc::new(cli.generation.resolving_generator(&cli.creds)?);
    let pipeline = AnswerPipeline::new(retriever, generator, cli.generation.max_input_chars());

    if cli.dry_run {
        let prepared = pipeline.prepare(cli.mascot, &cli.question, cli.top_k)?;
        println!(
            "--- Retrieved Context ---\n{}\n",
            context_block(&prepared.contexts)
        );
        match prepared.prompt {
            Some(prompt) => println!("--- Prompt ---\n{prompt}\n"),
            None => println!("--- Prompt ---\n(no context; would answer: {NO_CONTEXT_ANSWER})\n"),
        }
        println!("dry-run enabled; skipping generation call.");
        return Ok(());
    }

    let answer = pipeline.answer(cli.mascot, &cli.question, cli.top_k)?;
    println!("--- Answer ---\n{}\n", answer.response.trim());
    if !answer.sources.is_empty() {
        println!("--- Sources ---");
        for (idx, source) in answer.sources.iter().enumerate() {
            println!("[{}] {}", idx + 1, source);
        }
        println!();
    }
    println!(
        "confidence: {:.3} ({} distance)",
        answer.confidence, answer.metric
    );
    Ok(())
}
