//! Command-line / environment configuration shared by the binaries.
//!
//! Each group is a `clap::Args` struct meant to be `#[command(flatten)]`-ed into a binary's
//! parser. Every flag has an environment fallback.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, ValueEnum};

use crate::embedder::openai::OpenAiEmbedder;
use crate::embedder::qdrant::QdrantEmbedder;
use crate::embedder::{probe_dimensions, CachingEmbedder, EmbeddingProvider};
use crate::generation::{AnthropicProvider, GenerationProvider, GenerationSettings, OpenAiProvider};
use crate::prompt::max_input_chars_for_tokens;
use crate::resolver::{Resolver, ResolvingEmbedder, ResolvingGenerator};
use crate::retriever::Retriever;
use crate::telemetry;
use crate::text_cache::ChunkTextCache;
use crate::vector_store::{DistanceMetric, LocalVectorStore, PgVectorStore, TableName, VectorStore};

const DEFAULT_OPENAI_EMBEDDING_MODELS: &str =
    "text-embedding-3-small,text-embedding-3-large,text-embedding-ada-002";
const DEFAULT_QDRANT_EMBEDDING_MODELS: &str = "qdrant/all-MiniLM-L6-v2";
const DEFAULT_OPENAI_GENERATION_MODELS: &str = "gpt-4o-mini,gpt-4o,gpt-4.1-mini";
const DEFAULT_ANTHROPIC_GENERATION_MODELS: &str =
    "claude-3-5-haiku-latest,claude-3-5-sonnet-latest";

/// Splits a comma separated candidate list, dropping blanks.
pub fn parse_candidates(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .map(str::to_string)
        .collect()
}

/// API credentials and endpoints.
#[derive(Args, Debug, Clone)]
pub struct CredentialArgs {
    /// OpenAI API key (embeddings and/or generation).
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base URL for OpenAI-compatible endpoints.
    #[arg(long, env = "MASCOT_OPENAI_BASE", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    /// Anthropic API key.
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Qdrant Cloud API key.
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    pub qdrant_api_key: Option<String>,

    /// Qdrant Cloud Inference endpoint (https://<cluster>/inference/text).
    #[arg(long, env = "QDRANT_INFERENCE_ENDPOINT")]
    pub qdrant_endpoint: Option<String>,
}

impl CredentialArgs {
    fn required(value: &Option<String>, var: &str) -> Result<String> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("{var} must be set for the selected provider"))
    }
}

/// Embedding provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingBackend {
    /// OpenAI-compatible `/embeddings`.
    Openai,
    /// Qdrant Cloud Inference.
    Qdrant,
}

/// Embedding model selection.
#[derive(Args, Debug, Clone)]
pub struct EmbeddingArgs {
    /// Embedding provider.
    #[arg(long, env = "MASCOT_EMBEDDING_PROVIDER", value_enum, default_value_t = EmbeddingBackend::Openai)]
    pub embedding_provider: EmbeddingBackend,

    /// Candidate embedding models in priority order (comma separated).
    #[arg(long, env = "MASCOT_EMBEDDING_MODELS")]
    pub embedding_models: Option<String>,

    /// Optional embedding dimension override (OpenAI only).
    #[arg(long, env = "MASCOT_EMBEDDING_DIMENSIONS")]
    pub embedding_dimensions: Option<usize>,

    /// Max inputs per embedding request.
    #[arg(long, env = "MASCOT_EMBEDDING_BATCH", default_value_t = 32)]
    pub embedding_batch_size: usize,

    /// Seconds before embedding requests time out.
    #[arg(long, env = "MASCOT_EMBEDDING_TIMEOUT_SECS", default_value_t = 30)]
    pub embedding_timeout_secs: u64,

    /// Client-side retry attempts for transient embedding errors.
    #[arg(long, env = "MASCOT_EMBEDDING_MAX_RETRIES", default_value_t = 3)]
    pub embedding_max_retries: usize,

    /// Cached query embeddings kept in memory (0 disables caching).
    #[arg(long, env = "MASCOT_EMBEDDING_CACHE", default_value_t = 1024)]
    pub embedding_cache_size: usize,
}

impl EmbeddingArgs {
    /// Candidate models, falling back to the provider defaults.
    pub fn candidates(&self) -> Vec<String> {
        let default = match self.embedding_provider {
            EmbeddingBackend::Openai => DEFAULT_OPENAI_EMBEDDING_MODELS,
            EmbeddingBackend::Qdrant => DEFAULT_QDRANT_EMBEDDING_MODELS,
        };
        parse_candidates(self.embedding_models.as_deref().unwrap_or(default))
    }

    /// Embedder that resolves its model lazily on first use.
    pub fn resolving_embedder(&self, creds: &CredentialArgs) -> Result<ResolvingEmbedder> {
        let candidates = self.candidates();
        anyhow::ensure!(!candidates.is_empty(), "at least one embedding model is required");
        let timeout = Duration::from_secs(self.embedding_timeout_secs.max(1));
        let retries = self.embedding_max_retries.max(1);
        let batch_size = self.embedding_batch_size.max(1);
        let resolver: Resolver<dyn EmbeddingProvider> = match self.embedding_provider {
            EmbeddingBackend::Openai => {
                let key = CredentialArgs::required(&creds.openai_api_key, "OPENAI_API_KEY")?;
                let base_url = creds.openai_base_url.clone();
                let dimensions = self.embedding_dimensions;
                Resolver::new("embedding", candidates, move |model: &str| {
                    let client = OpenAiEmbedder::new(
                        &key,
                        &base_url,
                        model.to_string(),
                        dimensions,
                        timeout,
                        retries,
                        batch_size,
                    )?;
                    probe_dimensions(&client)?;
                    Ok(Arc::new(client) as Arc<dyn EmbeddingProvider>)
                })
            }
            EmbeddingBackend::Qdrant => {
                let key = CredentialArgs::required(&creds.qdrant_api_key, "QDRANT_API_KEY")?;
                let endpoint =
                    CredentialArgs::required(&creds.qdrant_endpoint, "QDRANT_INFERENCE_ENDPOINT")?;
                Resolver::new("embedding", candidates, move |model: &str| {
                    let client = QdrantEmbedder::new(
                        &key,
                        &endpoint,
                        model.to_string(),
                        timeout,
                        retries,
                        batch_size,
                    )?;
                    probe_dimensions(&client)?;
                    Ok(Arc::new(client) as Arc<dyn EmbeddingProvider>)
                })
            }
        };
        Ok(ResolvingEmbedder::new(resolver))
    }

    /// Query-time embedder: lazily resolved and fronted by the LRU cache.
    pub fn query_embedder(&self, creds: &CredentialArgs) -> Result<Arc<dyn EmbeddingProvider>> {
        let resolving: Arc<dyn EmbeddingProvider> = Arc::new(self.resolving_embedder(creds)?);
        Ok(CachingEmbedder::wrap(resolving, self.embedding_cache_size))
    }
}

/// Generation provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GenerationBackend {
    /// OpenAI-compatible chat completions.
    Openai,
    /// Anthropic messages API.
    Anthropic,
}

/// Generation model selection and sampling settings.
#[derive(Args, Debug, Clone)]
pub struct GenerationArgs {
    /// Generation provider.
    #[arg(long, env = "MASCOT_GENERATION_PROVIDER", value_enum, default_value_t = GenerationBackend::Openai)]
    pub generation_provider: GenerationBackend,

    /// Candidate generation models in priority order (comma separated).
    #[arg(long, env = "MASCOT_GENERATION_MODELS")]
    pub generation_models: Option<String>,

    /// Maximum tokens in a generated answer.
    #[arg(long, env = "MAX_OUTPUT_TOKENS", default_value_t = 1024)]
    pub max_output_tokens: usize,

    /// Prompt budget in tokens (4 characters per token).
    #[arg(long, env = "MAX_INPUT_TOKENS", default_value_t = 4096)]
    pub max_input_tokens: usize,

    /// Sampling temperature.
    #[arg(long, env = "MASCOT_TEMPERATURE", default_value_t = 0.7)]
    pub temperature: f32,

    /// Nucleus sampling mass.
    #[arg(long, env = "MASCOT_TOP_P", default_value_t = 0.95)]
    pub top_p: f32,

    /// Top-k sampling cutoff, where the API supports it.
    #[arg(long, env = "MASCOT_SAMPLING_TOP_K", default_value_t = 40)]
    pub sampling_top_k: u32,

    /// Seconds before generation requests time out.
    #[arg(long, env = "MASCOT_GENERATION_TIMEOUT_SECS", default_value_t = 60)]
    pub generation_timeout_secs: u64,
}

impl GenerationArgs {
    /// Sampling settings passed to every provider.
    pub fn settings(&self) -> GenerationSettings {
        GenerationSettings {
            max_output_tokens: self.max_output_tokens.max(1),
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.sampling_top_k,
        }
    }

    /// Prompt budget in characters.
    pub fn max_input_chars(&self) -> usize {
        max_input_chars_for_tokens(self.max_input_tokens)
    }

    /// Candidate models, falling back to the provider defaults.
    pub fn candidates(&self) -> Vec<String> {
        let default = match self.generation_provider {
            GenerationBackend::Openai => DEFAULT_OPENAI_GENERATION_MODELS,
            GenerationBackend::Anthropic => DEFAULT_ANTHROPIC_GENERATION_MODELS,
        };
        parse_candidates(self.generation_models.as_deref().unwrap_or(default))
    }

    /// Generator that resolves its model lazily on first use.
    pub fn resolving_generator(&self, creds: &CredentialArgs) -> Result<ResolvingGenerator> {
        let candidates = self.candidates();
        anyhow::ensure!(!candidates.is_empty(), "at least one generation model is required");
        let settings = self.settings();
        let timeout = Duration::from_secs(self.generation_timeout_secs.max(1));
        let resolver: Resolver<dyn GenerationProvider> = match self.generation_provider {
            GenerationBackend::Openai => {
                let key = CredentialArgs::required(&creds.openai_api_key, "OPENAI_API_KEY")?;
                let base_url = creds.openai_base_url.clone();
                Resolver::new("generation", candidates, move |model: &str| {
                    let client =
                        OpenAiProvider::new(&key, &base_url, model.to_string(), settings, timeout)?;
                    client.probe()?;
                    Ok(Arc::new(client) as Arc<dyn GenerationProvider>)
                })
            }
            GenerationBackend::Anthropic => {
                let key = CredentialArgs::required(&creds.anthropic_api_key, "ANTHROPIC_API_KEY")?;
                Resolver::new("generation", candidates, move |model: &str| {
                    let client = AnthropicProvider::new(&key, model.to_string(), settings, timeout)?;
                    client.probe()?;
                    Ok(Arc::new(client) as Arc<dyn GenerationProvider>)
                })
            }
        };
        Ok(ResolvingGenerator::new(resolver))
    }
}

/// Vector store family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// JSON collection file on local disk.
    Local,
    /// Postgres table with the pgvector extension.
    Pgvector,
}

/// Vector store location.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Vector store backend.
    #[arg(long, env = "MASCOT_STORE", value_enum, default_value_t = StoreBackend::Local)]
    pub store: StoreBackend,

    /// Local collection file.
    #[arg(long, env = "MASCOT_COLLECTION_PATH", default_value = "data/uplifted_mascot.json")]
    pub collection_path: PathBuf,

    /// Collection name recorded in new local collections.
    #[arg(long, env = "MASCOT_COLLECTION", default_value = "uplifted_mascot")]
    pub collection: String,

    /// Postgres connection string (postgres://...).
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Schema of the pgvector table.
    #[arg(long, env = "MASCOT_PGVECTOR_SCHEMA", default_value = "public")]
    pub schema: String,

    /// pgvector table name.
    #[arg(long, env = "MASCOT_PGVECTOR_TABLE", default_value = "mascot_chunks")]
    pub table: String,

    /// Distance metric used for ranking and confidence.
    #[arg(long, env = "MASCOT_DISTANCE", value_enum, default_value_t = DistanceMetric::Cosine)]
    pub metric: DistanceMetric,

    /// Chunk record file serving text for detached indexes.
    #[arg(long, env = "MASCOT_CHUNK_CACHE")]
    pub chunk_cache: Option<PathBuf>,
}

impl StoreArgs {
    /// Qualified pgvector table.
    pub fn table_name(&self) -> Result<TableName> {
        TableName::new(self.schema.clone(), self.table.clone())
    }

    /// Connects to the configured backend.
    ///
    /// Must run on the multi-threaded runtime that stays alive for the store's lifetime when the
    /// backend is pgvector.
    pub async fn open(&self) -> Result<Arc<dyn VectorStore>> {
        match self.store {
            StoreBackend::Local => {
                let store = LocalVectorStore::open(&self.collection_path).with_context(|| {
                    format!(
                        "failed to open local collection {}",
                        self.collection_path.display()
                    )
                })?;
                Ok(Arc::new(store))
            }
            StoreBackend::Pgvector => {
                let url = CredentialArgs::required(&self.database_url, "DATABASE_URL")?;
                let store = PgVectorStore::connect(&url, self.table_name()?, self.metric).await?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Loads the chunk text cache when one is configured.
    pub fn text_cache(&self) -> Result<Option<Arc<ChunkTextCache>>> {
        self.chunk_cache
            .as_ref()
            .map(|path| {
                ChunkTextCache::load(path)
                    .map(Arc::new)
                    .with_context(|| format!("failed to load chunk cache {}", path.display()))
            })
            .transpose()
    }

    /// Builds a retriever over `store`, attaching the text cache when configured.
    pub fn retriever(
        &self,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Retriever> {
        let retriever = Retriever::new(embedder, store);
        Ok(match self.text_cache()? {
            Some(cache) => retriever.with_text_cache(cache),
            None => retriever,
        })
    }
}

/// Logging verbosity.
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Default log filter (RUST_LOG overrides it).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl LogArgs {
    /// Installs the tracing subscriber.
    pub fn init(&self) {
        telemetry::init(&self.log_level.to_lowercase());
    }
}
