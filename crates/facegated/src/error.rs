use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use facegate_core::{DecodeError, EmbeddingCodecError};
use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineError;

pub const FACE_NOT_DETECTED: &str = "Face not detected. Try again with a clear front photo.";

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Every way a request can fail. The display strings are the client-facing
/// messages; the wrapped sources are only logged.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No image provided")]
    MissingImage,
    #[error("Missing image or stored embedding")]
    MissingVerifyFields,
    #[error("Invalid request body")]
    InvalidBody(#[source] JsonRejection),
    #[error("Request body too large")]
    PayloadTooLarge,
    #[error("Invalid image data")]
    InvalidImage(#[source] DecodeError),
    #[error("Invalid stored embedding")]
    InvalidStoredEmbedding(String),
    #[error("Face not detected. Try again with a clear front photo.")]
    FaceNotDetected(#[source] EngineError),
    #[error("Internal server error")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::InvalidBody(rejection)
        }
    }
}

impl From<EmbeddingCodecError> for ApiError {
    fn from(err: EmbeddingCodecError) -> Self {
        ApiError::InvalidStoredEmbedding(err.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::StoredEmbedding(mismatch) => {
                ApiError::InvalidStoredEmbedding(mismatch.to_string())
            }
            EngineError::Pipeline(_) => ApiError::FaceNotDetected(err),
            EngineError::Spawn(_) | EngineError::ChannelClosed | EngineError::Panicked(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn log(&self) {
        match self {
            ApiError::InvalidBody(rejection) => {
                tracing::warn!(error = %rejection.body_text(), "rejected request body")
            }
            ApiError::InvalidImage(err) => tracing::warn!(error = %err, "image decode failed"),
            ApiError::InvalidStoredEmbedding(detail) => {
                tracing::warn!(error = %detail, "stored embedding rejected")
            }
            ApiError::FaceNotDetected(EngineError::Pipeline(err)) if err.is_no_face() => {
                tracing::warn!(error = %err, "no face detected")
            }
            ApiError::FaceNotDetected(err) => tracing::error!(error = %err, "face model failure"),
            ApiError::Internal(detail) => tracing::error!(error = %detail, "internal error"),
            ApiError::MissingImage | ApiError::MissingVerifyFields | ApiError::PayloadTooLarge => {
                tracing::debug!(error = %self, "request rejected")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
