//! HTTP surface over the recognition core.
//!
//! The core is synchronous; every handler moves its work onto the blocking
//! pool. Inference runs behind one mutex, index reads run in parallel.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use facefuse_vision::EmbeddingProvider;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::batch::{batch_many_to_many, batch_one_to_many, BatchReport};
use crate::compare::{compare_two_faces, Comparison};
use crate::config::ModelWeights;
use crate::context::ServiceContext;
use crate::error::Error;
use crate::predict::{self, FaceResult};
use crate::search::{find_closest_faces, ClosestFaces, SearchRequest};
use crate::types::IdentityMatch;

pub type SharedProvider = Arc<Mutex<dyn EmbeddingProvider>>;

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
const DEFAULT_THRESHOLD: f32 = 0.5;
const DEFAULT_RESULTS: usize = 3;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<ServiceContext>,
    /// Absent when the ONNX models could not be loaded; predict endpoints then answer 503.
    pub provider: Option<SharedProvider>,
}

impl AppState {
    pub fn new(context: Arc<ServiceContext>, provider: Option<SharedProvider>) -> Self {
        Self { context, provider }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/predict_0", post(predict_0))
        .route("/api/predict_1", post(predict_1))
        .route("/api/predict_4", post(predict_4))
        .route("/api/compare_faces", post(compare_faces))
        .route("/api/batch_compare_one_to_many", post(batch_compare_one_to_many))
        .route("/api/batch_compare_many_to_many", post(batch_compare_many_to_many))
        .route("/api/person_names", get(person_names))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Errors returned by handlers
#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    ModelsUnavailable,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Core(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::ModelsUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "face recognition models are not loaded" }),
            ),
            ApiError::Core(Error::NoFaceDetected) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "No face detected in image. Try a clearer, front-facing photo." }),
            ),
            ApiError::Core(Error::Validation { message, invalid }) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "invalid_names": invalid }),
            ),
            ApiError::Core(e @ Error::NotFound(_)) => {
                (StatusCode::NOT_FOUND, json!({ "error": e.to_string() }))
            }
            ApiError::Core(e @ Error::IndexCapacityExceeded { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": e.to_string() }))
            }
            ApiError::Core(Error::Internal(e)) => {
                log::error!("internal error: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error", "detail": format!("{e:#}") }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run synchronous core work off the async executor and log its outcome.
async fn blocking<T, F>(op: &'static str, work: F) -> ApiResult<T>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let out = tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Internal(anyhow::anyhow!("worker task failed: {e}")))?;
    match &out {
        Ok(_) => log::info!("{op} ok"),
        Err(e) => log::warn!("{op} failed: {e}"),
    }
    Ok(Json(out?))
}

/// Positional request body: `{ "data": [...] }`.
#[derive(Debug, Deserialize)]
pub struct PositionalRequest {
    pub data: Vec<Value>,
}

fn text_at(data: &[Value], idx: usize, field: &str) -> Result<String, Error> {
    match data.get(idx) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(Error::validation(format!("{field} must be a string"))),
    }
}

fn number_at(data: &[Value], idx: usize, field: &str) -> Result<Option<f64>, Error> {
    match data.get(idx) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::validation(format!("{field} must be a number"))),
        Some(_) => Err(Error::validation(format!("{field} must be a number"))),
    }
}

fn count_at(data: &[Value], idx: usize, field: &str) -> Result<Option<usize>, Error> {
    match number_at(data, idx, field)? {
        Some(n) if n.is_finite() && n >= 0.0 => Ok(Some(n as usize)),
        Some(_) => Err(Error::validation(format!("{field} must be a non-negative count"))),
        None => Ok(None),
    }
}

struct ImageQuery {
    image: String,
    threshold: f32,
    results: usize,
}

fn image_query(req: &PositionalRequest) -> Result<ImageQuery, Error> {
    Ok(ImageQuery {
        image: text_at(&req.data, 0, "image")?,
        threshold: number_at(&req.data, 1, "threshold")?.map_or(DEFAULT_THRESHOLD, |t| t as f32),
        results: count_at(&req.data, 2, "results")?.unwrap_or(DEFAULT_RESULTS),
    })
}

fn provider(state: &AppState) -> Result<SharedProvider, ApiError> {
    state.provider.clone().ok_or(ApiError::ModelsUnavailable)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "module": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /api/predict_0
///
/// Ranked identities for the most prominent face.
async fn predict_0(
    State(state): State<AppState>,
    Json(req): Json<PositionalRequest>,
) -> ApiResult<Vec<IdentityMatch>> {
    let query = image_query(&req)?;
    let provider = provider(&state)?;
    let ctx = state.context.clone();
    blocking("predict_0", move || {
        let img = predict::decode_image(&query.image)?;
        let mut guard = provider
            .lock()
            .map_err(|_| anyhow::anyhow!("embedding provider lock poisoned"))?;
        predict::predict_best_face(&ctx, &mut *guard, &img, query.threshold, query.results)
    })
    .await
}

/// POST /api/predict_1
///
/// One entry per detected face, with its crop and ranked identities.
async fn predict_1(
    State(state): State<AppState>,
    Json(req): Json<PositionalRequest>,
) -> ApiResult<Vec<FaceResult>> {
    let query = image_query(&req)?;
    let provider = provider(&state)?;
    let ctx = state.context.clone();
    blocking("predict_1", move || {
        let img = predict::decode_image(&query.image)?;
        let mut guard = provider
            .lock()
            .map_err(|_| anyhow::anyhow!("embedding provider lock poisoned"))?;
        predict::predict_all_faces(&ctx, &mut *guard, &img, query.threshold, query.results)
    })
    .await
}

/// POST /api/predict_4
///
/// `data: [person_name, num_results, tolerance, arc_weight, facenet_weight]`
async fn predict_4(
    State(state): State<AppState>,
    Json(req): Json<PositionalRequest>,
) -> ApiResult<ClosestFaces> {
    if req.data.len() < 5 {
        return Err(Error::validation(format!(
            "expected 5 values [person_name, num_results, tolerance, arc_weight, facenet_weight], got {}",
            req.data.len()
        ))
        .into());
    }
    let required = |idx: usize, field: &str| {
        number_at(&req.data, idx, field)?
            .ok_or_else(|| Error::validation(format!("{field} is required")))
    };
    let search = SearchRequest {
        name: text_at(&req.data, 0, "person_name")?,
        num_results: count_at(&req.data, 1, "num_results")?
            .ok_or_else(|| Error::validation("num_results is required"))?,
        tolerance: required(2, "tolerance")? as f32,
        weights: ModelWeights::new(
            required(3, "arc_weight")? as f32,
            required(4, "facenet_weight")? as f32,
        ),
    };

    let ctx = state.context.clone();
    blocking("predict_4", move || find_closest_faces(&ctx, &search)).await
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub person1: String,
    pub person2: String,
}

/// POST /api/compare_faces
async fn compare_faces(
    State(state): State<AppState>,
    Json(req): Json<CompareRequest>,
) -> ApiResult<Comparison> {
    let ctx = state.context.clone();
    blocking("compare_faces", move || {
        compare_two_faces(&ctx, &req.person1, &req.person2)
    })
    .await
}

fn default_tolerance() -> f32 {
    0.0
}

#[derive(Debug, Deserialize)]
pub struct OneToManyRequest {
    pub target_person: String,
    pub comparison_people: String,
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
}

/// POST /api/batch_compare_one_to_many
async fn batch_compare_one_to_many(
    State(state): State<AppState>,
    Json(req): Json<OneToManyRequest>,
) -> ApiResult<BatchReport> {
    let ctx = state.context.clone();
    blocking("batch_compare_one_to_many", move || {
        batch_one_to_many(&ctx, &req.target_person, &req.comparison_people, req.tolerance)
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct ManyToManyRequest {
    pub group1_people: String,
    pub group2_people: String,
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
}

/// POST /api/batch_compare_many_to_many
async fn batch_compare_many_to_many(
    State(state): State<AppState>,
    Json(req): Json<ManyToManyRequest>,
) -> ApiResult<BatchReport> {
    let ctx = state.context.clone();
    blocking("batch_compare_many_to_many", move || {
        batch_many_to_many(&ctx, &req.group1_people, &req.group2_people, req.tolerance)
    })
    .await
}

/// GET /api/person_names
async fn person_names(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.context.registry.names())
}
