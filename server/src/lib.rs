use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::{HeaderValue, StatusCode}, routing::get, Json, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use unigram_core::{ingest, BuildControl, DocumentStore, IndexBuilder, QueryEngine, SearchResult, SledStore};

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}
fn default_limit() -> usize { 10 }

#[derive(Serialize)]
pub struct CreateIndexResponse {
    pub unigram_count: usize,
    pub document_count: usize,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub count: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SledStore>,
    pub builder: Arc<IndexBuilder>,
    pub engine: Arc<QueryEngine>,
    /// Data file loaded by `/upload_data`
    pub data_file: PathBuf,
    /// Held for the duration of a build; a second build is refused.
    pub build_lock: Arc<Mutex<()>>,
}

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub fn build_app(db: &str, data_file: PathBuf) -> Result<Router> {
    let store = Arc::new(SledStore::open(db)?);
    Ok(router(store, data_file))
}

impl AppState {
    pub fn new(store: Arc<SledStore>, data_file: PathBuf) -> Self {
        Self {
            store,
            builder: Arc::new(IndexBuilder::default()),
            engine: Arc::new(QueryEngine::default()),
            data_file,
            build_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub fn router(store: Arc<SledStore>, data_file: PathBuf) -> Router {
    router_with_state(AppState::new(store, data_file))
}

pub fn router_with_state(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/create_index", get(create_index_handler))
        .route("/lookup/:id", get(lookup_handler))
        .route("/upload_data", get(upload_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

/// CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
fn cors_layer() -> CorsLayer {
    let origins: Vec<HeaderValue> = std::env::var("CORS_ALLOW_ORIGIN")
        .map(|val| val.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let start = std::time::Instant::now();
    let (q, offset, limit) = (params.q.clone(), params.offset, params.limit);
    let results = tokio::task::spawn_blocking(move || state.engine.search(state.store.as_ref(), &q, offset, limit))
        .await
        .map_err(internal)?
        .map_err(internal)?;
    tracing::info!(q = %params.q, offset = params.offset, limit = params.limit, hits = results.len(), took_s = start.elapsed().as_secs_f64(), "search");
    Ok(Json(results))
}

pub async fn create_index_handler(State(state): State<AppState>) -> Result<Json<CreateIndexResponse>, ApiError> {
    tracing::info!("started create_index");
    let stats = tokio::task::spawn_blocking(move || {
        let Some(_guard) = state.build_lock.try_lock() else {
            return Err((StatusCode::CONFLICT, "index build already running".to_string()));
        };
        let store = state.store.as_ref();
        let stats = state.builder.build(store, store, &BuildControl::new()).map_err(internal)?;
        state.store.flush().map_err(internal)?;
        Ok(stats)
    })
    .await
    .map_err(internal)??;
    tracing::info!(unigrams = stats.term_count, documents = stats.document_count, "finished create_index");
    Ok(Json(CreateIndexResponse { unigram_count: stats.term_count, document_count: stats.document_count }))
}

pub async fn lookup_handler(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let doc = tokio::task::spawn_blocking(move || DocumentStore::get(state.store.as_ref(), &id))
        .await
        .map_err(internal)?
        .map_err(internal)?;
    match doc {
        Some(doc) => Ok(Json(serde_json::to_value(doc).map_err(internal)?)),
        None => Ok(Json(serde_json::json!({}))),
    }
}

pub async fn upload_handler(State(state): State<AppState>) -> Result<Json<UploadResponse>, ApiError> {
    let count = tokio::task::spawn_blocking(move || {
        let count = ingest::upload(state.store.as_ref(), &state.data_file)?;
        state.store.flush()?;
        Ok::<_, unigram_core::Error>(count)
    })
    .await
    .map_err(internal)?
    .map_err(internal)?;
    Ok(Json(UploadResponse { count }))
}
