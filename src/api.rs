use crate::{
    config::parse_bool,
    images::{ImageError, validate_images},
    jobs::{JobInfo, JobQueue},
    metrics,
    models::{AnalyzeRequest, AnalyzeResponse, ApiError},
    pipeline::Pipeline,
    product::AnalyzedProduct,
    text::{NormalizedText, extract_baseline, normalize},
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};
use uuid::Uuid;

const OPENAPI_YAML: &str = include_str!("../docs/openapi.yaml");

#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
    queue: JobQueue,
    openapi: Arc<Value>,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
    docs_key: Option<String>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, queue: JobQueue, prometheus_handle: PrometheusHandle) -> Self {
        let openapi = serde_yaml::from_str(OPENAPI_YAML)
            .unwrap_or_else(|_| json!({ "openapi": "3.0.3" }));
        Self {
            pipeline,
            queue,
            openapi: Arc::new(openapi),
            prometheus_handle,
            metrics_key: non_empty_env("METRICS_KEY"),
            docs_key: non_empty_env("OPENAPI_KEY"),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/analyze", post(analyze))
        .nest(
            "/stages",
            Router::new()
                .route("/normalize", post(stage_normalize))
                .route("/baseline", post(stage_baseline)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/analyze", post(enqueue_analyze_job))
                .route("/{id}", get(get_job_status)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()))
}

pub fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(16 * 1024 * 1024)
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(ApiError),
    Unauthorized,
    NotFound(&'static str),
    Internal(ApiError),
}

impl AppError {
    fn bad_request(error: &str, detail: impl Into<String>) -> Self {
        Self::BadRequest(ApiError {
            error: error.to_string(),
            detail: Some(detail.into()),
        })
    }
}

impl From<ImageError> for AppError {
    fn from(err: ImageError) -> Self {
        Self::bad_request(err.code(), err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        Self::bad_request("invalid_json", err.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: "unauthorized".into(),
                    detail: None,
                },
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: "not_found".into(),
                    detail: Some(what.into()),
                },
            ),
            AppError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err),
        };
        (status, Json(payload)).into_response()
    }
}

fn presented_key<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "merchant-analyzer",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    if let Some(key) = &state.docs_key
        && presented_key(&headers, "X-Docs-Key") != key.as_str()
    {
        return Err(AppError::Unauthorized);
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> impl IntoResponse {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Merchant Analyzer API</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key
        && presented_key(&headers, "X-Metrics-Key") != secret.as_str()
    {
        return AppError::Unauthorized.into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeQuery {
    #[serde(rename = "rulesStrict")]
    rules_strict: Option<String>,
}

async fn analyze(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    metrics::inc_requests("/analyze");
    let Json(mut request) = payload?;
    if query.rules_strict.as_deref().is_some_and(parse_bool) {
        request.options.rules_only = true;
    }
    let config = state.pipeline.config();
    let images = validate_images(&request.images, config.max_images, config.max_image_bytes)?;

    let report = state
        .pipeline
        .analyze(&request.text, &images, &request.options)
        .await;
    info!(
        target: "analyzer.api",
        attempted = report.meta.attempted.len(),
        succeeded = report.meta.succeeded.len(),
        total_ms = report.meta.timings.get("total").copied().unwrap_or_default(),
        "analysis served"
    );
    Ok(Json(AnalyzeResponse {
        analyzed: report.product,
        meta: report.meta,
    }))
}

#[derive(Debug, Deserialize)]
struct StageTextRequest {
    text: String,
}

async fn stage_normalize(
    payload: Result<Json<StageTextRequest>, JsonRejection>,
) -> Result<Json<NormalizedText>, AppError> {
    metrics::inc_requests("/stages/normalize");
    let Json(request) = payload?;
    Ok(Json(normalize(&request.text)))
}

#[derive(Debug, Serialize)]
struct BaselineResponse {
    analyzed: AnalyzedProduct,
    weak_fields: Vec<&'static str>,
}

async fn stage_baseline(
    payload: Result<Json<StageTextRequest>, JsonRejection>,
) -> Result<Json<BaselineResponse>, AppError> {
    metrics::inc_requests("/stages/baseline");
    let Json(request) = payload?;
    let analyzed = extract_baseline(&normalize(&request.text));
    let weak_fields = analyzed.weak_fields();
    Ok(Json(BaselineResponse {
        analyzed,
        weak_fields,
    }))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_analyze_job(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    metrics::inc_requests("/jobs/analyze");
    let Json(mut request) = payload?;
    let config = state.pipeline.config();
    request.images = validate_images(&request.images, config.max_images, config.max_image_bytes)?;
    let id = state
        .queue
        .enqueue(request)
        .await
        .map_err(AppError::Internal)?;
    debug!(target: "analyzer.api", job = %id, "analysis job queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: id.to_string(),
        }),
    ))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, AppError> {
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return Err(AppError::bad_request("invalid_job_id", id));
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job"))
}
