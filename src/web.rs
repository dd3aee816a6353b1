use crate::{
    app::{
        service::{KeywordSearchResponse, SearchResponse},
        AppError, IndexReport, SearchParams, SearchService,
    },
    auth,
    config::Config,
    dataset::{self, Record, Region, SignEntry},
    store::CollectionInfo,
};
use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Query, State,
    },
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

const BODY_LIMIT: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct SharedState {
    pub service: Arc<SearchService>,
    pub admin_token: Option<String>,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

pub fn router(state: SharedState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/collection_info", get(collection_info))
        .route("/collections", get(collections))
        .route("/recreate", post(recreate))
        .route("/index/records", post(index_records))
        .route("/index/jsonl", post(index_jsonl))
        .route("/search", get(search_get).post(search_post))
        .route("/semantic_search", get(semantic_search_get).post(semantic_search_post))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

pub async fn serve(service: Arc<SearchService>, config: &Config) -> anyhow::Result<()> {
    let state = SharedState {
        service,
        admin_token: config.admin_token.clone(),
    };
    let app = router(state, cors_layer(&config.cors_origins));

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

// Wraps `AppError` so handlers can use `?`.
#[derive(Debug)]
pub struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::BadRequest(_) | AppError::Dataset(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::CollectionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::DimensionMismatch { .. } => StatusCode::CONFLICT,
            AppError::KeywordsDisabled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Embedding(_) | AppError::Store(_) | AppError::Keywords(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            log::error!("{:?}", self.0);
        } else {
            log::debug!("{status}: {}", self.0);
        }

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl From<AppError> for HttpError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

// Extractor rejections go through `HttpError` so clients always get a JSON body.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

fn parse_region(region: Option<&str>) -> Result<Option<Region>, AppError> {
    match region.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some(region) => Region::parse(region)
            .map(Some)
            .ok_or_else(|| AppError::BadRequest(format!("unknown region {region:?}"))),
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "service": env!("CARGO_PKG_NAME")}))
}

async fn health(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, HttpError> {
    let info = state.service.collection_info().await?;
    Ok(Json(json!({
        "status": "ok",
        "collection": state.service.collection(),
        "collection_status": info.map(|info| info.status),
    })))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub collection: String,
    pub store: String,
    pub model: String,
    pub dimensions: usize,
    pub keywords_enabled: bool,
    pub info: Option<CollectionInfo>,
}

async fn status(State(state): State<SharedState>) -> Result<Json<StatusResponse>, HttpError> {
    let service = &state.service;
    Ok(Json(StatusResponse {
        collection: service.collection().to_string(),
        store: service.store_mode().to_string(),
        model: service.model_name().to_string(),
        dimensions: service.dimensions(),
        keywords_enabled: service.keywords_enabled(),
        info: service.collection_info().await?,
    }))
}

async fn collection_info(
    State(state): State<SharedState>,
) -> Result<Json<CollectionInfo>, HttpError> {
    let info = state
        .service
        .collection_info()
        .await?
        .ok_or_else(|| AppError::CollectionNotFound(state.service.collection().to_string()))?;
    Ok(Json(info))
}

async fn collections(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let names = state.service.list_collections().await?;
    Ok(Json(json!({ "collections": names })))
}

#[derive(Debug, Deserialize)]
pub struct RecreateRequest {
    /// Must repeat the collection name.
    pub confirm: String,
}

async fn recreate(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<RecreateRequest>, JsonRejection>,
) -> Result<Json<CollectionInfo>, HttpError> {
    auth::authorize_admin(&headers, state.admin_token.as_deref())?;
    let payload = json_body(payload)?;

    if payload.confirm != state.service.collection() {
        return Err(AppError::BadRequest(format!(
            "refusing to recreate: confirm must be {:?}",
            state.service.collection()
        ))
        .into());
    }

    Ok(Json(state.service.recreate().await?))
}

async fn index_records(
    State(state): State<SharedState>,
    records: Result<Json<Vec<Record>>, JsonRejection>,
) -> Result<Json<IndexReport>, HttpError> {
    let records = json_body(records)?;
    log::debug!("indexing {} records", records.len());
    let entries = records.into_iter().map(SignEntry::from).collect();
    Ok(Json(state.service.index(entries).await?))
}

async fn index_jsonl(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IndexReport>, HttpError> {
    let mut multipart =
        multipart.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadRequest(err.to_string()))?
    {
        if field.name() == Some("file") || field.file_name().is_some() {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|err| AppError::BadRequest(err.to_string()))?;
            log::debug!("received {file_name} ({} bytes)", bytes.len());
            upload = Some(bytes);
            break;
        }
    }

    let bytes = upload
        .ok_or_else(|| AppError::BadRequest("multipart field \"file\" is missing".to_string()))?;
    let entries = dataset::parse_jsonl(&bytes).map_err(AppError::from)?;

    Ok(Json(state.service.index(entries).await?))
}

#[derive(Debug, Deserialize)]
pub struct SearchQueryParams {
    pub q: String,
    #[serde(default, alias = "top_k")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub with_scores: Option<bool>,
}

impl SearchQueryParams {
    fn into_params(self) -> Result<SearchParams, AppError> {
        Ok(SearchParams {
            region: parse_region(self.region.as_deref())?,
            query: self.q,
            limit: self.limit,
            with_scores: self.with_scores.unwrap_or(true),
            score_threshold: None,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub query: String,
    #[serde(default, alias = "top_k")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub with_scores: Option<bool>,
    #[serde(default)]
    pub score_threshold: Option<f32>,
}

impl SearchBody {
    fn into_params(self) -> Result<SearchParams, AppError> {
        Ok(SearchParams {
            region: parse_region(self.region.as_deref())?,
            query: self.query,
            limit: self.limit,
            with_scores: self.with_scores.unwrap_or(true),
            score_threshold: self.score_threshold,
        })
    }
}

async fn search_get(
    State(state): State<SharedState>,
    params: Result<Query<SearchQueryParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, HttpError> {
    let params = query_params(params)?.into_params()?;
    Ok(Json(state.service.search(params).await?))
}

async fn search_post(
    State(state): State<SharedState>,
    body: Result<Json<SearchBody>, JsonRejection>,
) -> Result<Json<SearchResponse>, HttpError> {
    let params = json_body(body)?.into_params()?;
    Ok(Json(state.service.search(params).await?))
}

async fn semantic_search_get(
    State(state): State<SharedState>,
    params: Result<Query<SearchQueryParams>, QueryRejection>,
) -> Result<Json<KeywordSearchResponse>, HttpError> {
    let params = query_params(params)?.into_params()?;
    Ok(Json(state.service.keyword_search(params).await?))
}

async fn semantic_search_post(
    State(state): State<SharedState>,
    body: Result<Json<SearchBody>, JsonRejection>,
) -> Result<Json<KeywordSearchResponse>, HttpError> {
    let params = json_body(body)?.into_params()?;
    Ok(Json(state.service.keyword_search(params).await?))
}
