use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use facegate_core::{codec, DecodeLimits};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::EngineHandle;
use crate::error::ApiError;

const CORS_MAX_AGE: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub limits: DecodeLimits,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    stored_embedding: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollResponse {
    success: bool,
    face_descriptor: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    success: bool,
    distance: f64,
}

pub fn router(state: AppState, config: &Config) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list([config.allowed_origin.clone()]))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
        .max_age(CORS_MAX_AGE);

    let trace = TraceLayer::new_for_http().make_span_with(|req: &Request| {
        tracing::info_span!(
            "request",
            method = %req.method(),
            uri = %req.uri(),
            request_id = %Uuid::new_v4(),
        )
    });

    Router::new()
        .route("/health", get(health))
        .route("/api/enroll", post(enroll))
        .route("/api/verify", post(verify))
        // Enforced by the `Json` extractor so oversized bodies still get a JSON error.
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors)
        .layer(trace)
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "facegate backend is running",
    })
}

async fn enroll(
    State(state): State<AppState>,
    payload: Result<Json<EnrollRequest>, JsonRejection>,
) -> Result<Json<EnrollResponse>, ApiError> {
    let Json(request) = payload?;
    let image_data = non_empty(request.image).ok_or(ApiError::MissingImage)?;

    let image = decode_off_thread(image_data, state.limits).await?;
    tracing::info!(width = image.width(), height = image.height(), "enroll: image decoded");

    let enrolled = state.engine.enroll(image).await?;
    tracing::info!(confidence = enrolled.confidence, "face enrolled");

    Ok(Json(EnrollResponse {
        success: true,
        face_descriptor: codec::encode_embedding(&enrolled.embedding),
    }))
}

async fn verify(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Json(request) = payload?;
    let (Some(image_data), Some(stored_data)) =
        (non_empty(request.image), non_empty(request.stored_embedding))
    else {
        return Err(ApiError::MissingVerifyFields);
    };

    let image = decode_off_thread(image_data, state.limits).await?;
    tracing::info!(width = image.width(), height = image.height(), "verify: image decoded");

    let stored = codec::decode_embedding(&stored_data)?;
    let verified = state.engine.verify(image, stored).await?;
    tracing::info!(
        matched = verified.result.matched,
        confidence = verified.confidence,
        "face verified"
    );

    Ok(Json(VerifyResponse {
        success: verified.result.matched,
        distance: f64::from(verified.result.distance),
    }))
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.trim().is_empty())
}

/// Base64 + image decoding is CPU-bound; keep it off the async workers.
async fn decode_off_thread(data: String, limits: DecodeLimits) -> Result<RgbImage, ApiError> {
    tokio::task::spawn_blocking(move || codec::decode_image(&data, &limits))
        .await
        .map_err(|e| ApiError::Internal(format!("decode task failed: {e}")))?
        .map_err(ApiError::InvalidImage)
}
