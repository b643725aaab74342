use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use mascot_rag::config::{
    CredentialArgs, EmbeddingArgs, GenerationArgs, LogArgs, StoreArgs, StoreBackend,
};
use mascot_rag::pipeline::{normalize_question, validate_top_k};
use mascot_rag::retriever::DEFAULT_TOP_K;
use mascot_rag::{AnswerPipeline, GenerationProvider, Mascot, RagError, VectorStore};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "Uplifted Mascot RAG Service";

#[derive(Parser, Debug)]
#[command(
    name = "mascot-api",
    about = "HTTP API answering questions in a mascot's voice from retrieved documentation"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "MASCOT_BIND", default_value = "0.0.0.0:8000")]
    bind: String,

    /// Project label reported by the service banner.
    #[arg(long, env = "MASCOT_PROJECT", default_value = "terasology")]
    project: String,

    /// Seconds a request may take before it is abandoned with 504.
    #[arg(long, env = "MASCOT_REQUEST_TIMEOUT_SECS", default_value_t = 120)]
    request_timeout_secs: u64,

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

#[derive(Clone)]
struct AppState {
    pipeline: Arc<AnswerPipeline>,
    store: Arc<dyn VectorStore>,
    collection: String,
    project: String,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    project: String,
    mascot: String,
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    response: String,
    sources: Vec<String>,
    confidence: f64,
}

#[derive(Debug, Serialize)]
struct Banner {
    service: &'static str,
    status: &'static str,
    project: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    store: StoreHealth,
}

#[derive(Debug, Serialize)]
struct StoreHealth {
    backend: String,
    collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn main() -> Result<()> {
    let cli = ApiCli::parse();
    cli.log.init();

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let store = runtime.block_on(cli.store.open())?;
    info!(store = %store.describe(), metric = %store.metric(), "vector store ready");

    let embedder = cli.embedding.query_embedder(&cli.creds)?;
    let generator: Arc<dyn GenerationProvider> =
        Arc::new(cli.generation.resolving_generator(&cli.creds)?);
    let retriever = cli.store.retriever(embedder, Arc::clone(&store))?;
    let pipeline = AnswerPipeline::new(retriever, generator, cli.generation.max_input_chars());

    let collection = match cli.store.store {
        StoreBackend::Local => cli.store.collection.clone(),
        StoreBackend::Pgvector => cli.store.table_name()?.qualified(),
    };
    let state = AppState {
        pipeline: Arc::new(pipeline),
        store,
        collection,
        project: cli.project,
        request_timeout: Duration::from_secs(cli.request_timeout_secs.max(1)),
    };
    runtime.block_on(serve(&cli.bind, state))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/ask-mascot", post(ask_mascot))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn serve(bind: &str, state: AppState) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;
    let app = router(state);
    info!(%addr, "mascot-api listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn banner(State(state): State<AppState>) -> Json<Banner> {
    Json(Banner {
        service: SERVICE_NAME,
        status: "running",
        project: state.project.clone(),
    })
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = Arc::clone(&state.store);
    let counted = tokio::task::spawn_blocking(move || store.count())
        .await
        .map_err(anyhow::Error::from)
        .and_then(|count| count);
    let (document_count, error) = match counted {
        Ok(count) => (Some(count), None),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "store health check failed");
            (None, Some(format!("{err:#}")))
        }
    };
    Json(HealthResponse {
        status: "healthy",
        store: StoreHealth {
            backend: state.store.describe(),
            collection: state.collection.clone(),
            document_count,
            error,
        },
    })
}

async fn ask_mascot(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let mascot: Mascot = request
        .mascot
        .parse()
        .map_err(|err| reject(StatusCode::BAD_REQUEST, err))?;
    let question = normalize_question(&request.question)
        .map_err(|err| reject(StatusCode::UNPROCESSABLE_ENTITY, err))?
        .to_string();
    let top_k = validate_top_k(request.top_k.unwrap_or(DEFAULT_TOP_K))
        .map_err(|err| reject(StatusCode::UNPROCESSABLE_ENTITY, err))?;
    info!(
        project = %request.project,
        %mascot,
        top_k,
        "ask-mascot request"
    );

    let pipeline = Arc::clone(&state.pipeline);
    let task = tokio::task::spawn_blocking(move || pipeline.answer(mascot, &question, top_k));
    let answer = match tokio::time::timeout(state.request_timeout, task).await {
        Err(_) => {
            warn!(timeout = ?state.request_timeout, "request deadline expired");
            return Err(error_body(
                StatusCode::GATEWAY_TIMEOUT,
                format!(
                    "request exceeded {}s deadline",
                    state.request_timeout.as_secs()
                ),
            ));
        }
        Ok(Err(join)) => {
            error!(error = %join, "answer task failed");
            return Err(error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "answer task failed".to_string(),
            ));
        }
        Ok(Ok(result)) => result.map_err(pipeline_error)?,
    };

    Ok(Json(AskResponse {
        response: answer.response,
        sources: answer.sources,
        confidence: answer.confidence,
    }))
}

fn pipeline_error(err: RagError) -> ApiError {
    let status = match &err {
        RagError::EmbeddingUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RagError::InvalidArgument(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %err, "pipeline failed");
    }
    reject(status, err)
}

fn reject(status: StatusCode, err: RagError) -> ApiError {
    let message = match err {
        RagError::InvalidArgument(message) => message,
        other => other.to_string(),
    };
    error_body(status, message)
}

fn error_body(status: StatusCode, message: String) -> ApiError {
    (status, Json(ErrorBody { message }))
}
