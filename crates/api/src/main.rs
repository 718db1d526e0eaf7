mod backend;
mod cache;
mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use index::{
    default_predefined_phrases, Embedder, EmbeddingClient, IndexOptions, IndexReport, Indexer,
    MemoryIndex, QdrantIndex, SearchHit, TokenizerKind, VectorIndex, VocabStore,
};
use ingest::{ChunkStore, Chunker, FileReader, SiblingIndex};
use query::{
    MultiQueryAggregator, MultiQueryRequest, OllamaJudge, Recommendation, Recommender,
    Retriever, SearchRequest, SparseScorer,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::backend::{JudgeBackend, VectorBackend};
use crate::cache::{CacheStats, CachedEmbedder};
use crate::config::{AppConfig, BackendKind};
use crate::metrics::{Metrics, MetricsSnapshot, QueryKind, TimedOperation};

struct AppState<E> {
    config: AppConfig,
    index: Arc<VectorBackend>,
    query_embedder: Arc<CachedEmbedder<E>>,
    retriever: Arc<Retriever<VectorBackend, CachedEmbedder<E>>>,
    aggregator: MultiQueryAggregator<VectorBackend, CachedEmbedder<E>, JudgeBackend>,
    indexer: Indexer<E, VectorBackend>,
    siblings: SiblingIndex,
    metrics: Arc<Metrics>,
}

impl<E: Embedder + Clone> AppState<E> {
    async fn build(config: AppConfig, embedder: E, index: VectorBackend) -> Result<Self> {
        let index = Arc::new(index);
        let tokenizer = TokenizerKind::default().build();

        let siblings = match &config.paths.sibling_csv {
            Some(path) => SiblingIndex::load_csv(path)?,
            None => SiblingIndex::default(),
        };
        let predefined_phrases = config
            .paths
            .load_predefined_phrases(default_predefined_phrases())?;

        let cache_entries = if config.cache.enabled {
            config.cache.max_entries
        } else {
            0
        };
        let query_embedder = Arc::new(CachedEmbedder::new(embedder.clone(), cache_entries));
        let retriever = Arc::new(Retriever::new(
            index.clone(),
            query_embedder.clone(),
            config.retrieval.clone(),
        ));

        let judge = match &config.judge {
            Some(judge_config) => JudgeBackend::Ollama(OllamaJudge::new(judge_config.clone())?),
            None => JudgeBackend::Off,
        };
        let vocab_store = VocabStore::new(config.paths.artifacts_dir());
        let aggregator = MultiQueryAggregator::new(
            retriever.clone(),
            SparseScorer::new(tokenizer.clone()),
            vocab_store.clone(),
            Arc::new(judge),
        );

        let indexer = Indexer::new(
            Chunker::new(config.chunker.clone()),
            ChunkStore::new(config.paths.chunks_dir()),
            vocab_store,
            Arc::new(embedder),
            index.clone(),
        )
        .with_tokenizer(tokenizer)
        .with_predefined_phrases(predefined_phrases);

        Ok(Self {
            config,
            index,
            query_embedder,
            retriever,
            aggregator,
            indexer,
            siblings,
            metrics: Metrics::new(),
        })
    }
}

type SharedState<E> = State<Arc<AppState<E>>>;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    backend: String,
    indexed_chunks: Option<usize>,
    error: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct IngestRequest {
    /// File or directory; defaults to the configured docs directory.
    path: Option<String>,
    chunks_only: bool,
    embed_only: bool,
    entity: Option<String>,
    compute_idf: bool,
}

#[derive(Serialize)]
struct SearchResponse {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct RecommendRequest {
    #[serde(flatten)]
    search: SearchRequest,
    #[serde(default)]
    shortlist: Option<usize>,
}

#[derive(Serialize)]
struct StatsResponse {
    metrics: MetricsSnapshot,
    cache: CacheStats,
    indexed_chunks: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;

    // Create embedding client
    let embedder = EmbeddingClient::new(config.embedding.clone())
        .context("Failed to create embedding client")?;

    let index = match config.backend {
        BackendKind::Memory => VectorBackend::Memory(MemoryIndex::new()),
        BackendKind::Qdrant => {
            let qdrant = QdrantIndex::new(config.qdrant.clone())?;
            qdrant
                .ensure_collection(&embedder)
                .await
                .context("Failed to initialize Qdrant collection")?;
            VectorBackend::Qdrant(qdrant)
        }
    };

    let bind_addr = config.server.bind_addr.clone();
    let state = Arc::new(AppState::build(config, embedder, index).await?);
    let app = router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context(format!("Failed to bind {}", bind_addr))?;

    info!(addr = %bind_addr, "Server listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn router<E: Embedder + Clone + 'static>(state: Arc<AppState<E>>) -> Router {
    Router::new()
        .route("/health", get(health_check::<E>))
        .route("/ingest", post(ingest_documents::<E>))
        .route("/search", post(search::<E>))
        .route("/recommend", post(recommend::<E>))
        .route("/search/multi", post(search_multi::<E>))
        .route("/stats", get(get_stats::<E>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check<E: Embedder + Clone + 'static>(
    State(state): SharedState<E>,
) -> Json<HealthResponse> {
    let (status, indexed_chunks, error) = match state.index.count().await {
        Ok(count) => ("ok", Some(count), None),
        Err(e) => ("degraded", None, Some(format!("{:#}", e))),
    };

    Json(HealthResponse {
        status: status.to_string(),
        backend: state.index.name().to_string(),
        indexed_chunks,
        error,
    })
}

async fn ingest_documents<E: Embedder + Clone + 'static>(
    State(state): SharedState<E>,
    req: Option<Json<IngestRequest>>,
) -> Result<Json<IndexReport>, StatusCode> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let path = req
        .path
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| state.config.paths.docs_dir());
    let options = IndexOptions {
        chunks_only: req.chunks_only,
        embed_only: req.embed_only,
        entity: req.entity,
        compute_idf: req.compute_idf,
    };

    if !options.embed_only && !path.exists() {
        state.metrics.record_request(false);
        return Err(StatusCode::NOT_FOUND);
    }

    let timer = TimedOperation::start();
    let result = if path.is_file() && !options.embed_only {
        match FileReader::read_document(&path).await {
            Ok(document) => {
                let mut report = IndexReport::default();
                state
                    .indexer
                    .index_document(&document, &state.siblings, &options, &mut report)
                    .await;
                Ok(report)
            }
            Err(e) => Err(e),
        }
    } else {
        state
            .indexer
            .index_directory(&path, &state.siblings, &options)
            .await
    };

    match result {
        Ok(report) => {
            state
                .metrics
                .record_ingest(timer.elapsed(), report.documents, report.chunks_embedded);
            state.metrics.record_request(true);
            Ok(Json(report))
        }
        Err(e) => {
            error!(path = ?path, error = %e, "Ingest failed");
            state.metrics.record_request(false);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn search<E: Embedder + Clone + 'static>(
    State(state): SharedState<E>,
    Json(req): Json<SearchRequest>,
) -> Json<SearchResponse> {
    let timer = TimedOperation::start();
    let hits = state.retriever.search(&req).await;

    state
        .metrics
        .record_query(QueryKind::Search, timer.elapsed(), hits.len());
    state.metrics.record_request(true);
    Json(SearchResponse { hits })
}

async fn recommend<E: Embedder + Clone + 'static>(
    State(state): SharedState<E>,
    Json(req): Json<RecommendRequest>,
) -> Json<Recommendation> {
    let timer = TimedOperation::start();
    let shortlist = req.shortlist.unwrap_or(state.config.server.shortlist);
    let recommendation = Recommender::new(state.retriever.clone())
        .with_shortlist(shortlist)
        .recommend(&req.search)
        .await;

    state.metrics.record_query(
        QueryKind::Recommend,
        timer.elapsed(),
        recommendation.trace.hits_retrieved,
    );
    state.metrics.record_request(true);
    Json(recommendation)
}

async fn search_multi<E: Embedder + Clone + 'static>(
    State(state): SharedState<E>,
    Json(req): Json<MultiQueryRequest>,
) -> Json<SearchResponse> {
    let timer = TimedOperation::start();
    let hits: Vec<SearchHit> = state
        .aggregator
        .run(&req)
        .await
        .into_iter()
        .map(SearchHit::from)
        .collect();

    state
        .metrics
        .record_query(QueryKind::MultiSearch, timer.elapsed(), hits.len());
    state.metrics.record_request(true);
    Json(SearchResponse { hits })
}

async fn get_stats<E: Embedder + Clone + 'static>(
    State(state): SharedState<E>,
) -> Json<StatsResponse> {
    Json(StatsResponse {
        metrics: state.metrics.snapshot(),
        cache: state.query_embedder.stats(),
        indexed_chunks: state.index.count().await.ok(),
    })
}
