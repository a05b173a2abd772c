//! facegate-core — Face embedding engine for the facegate HTTP service.
//!
//! Decodes base64 photos, finds faces with SCRFD and extracts Facenet512
//! embeddings, both running via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod codec;
pub mod detector;
pub mod pipeline;
pub mod recognizer;
pub mod types;

pub use codec::{
    decode_embedding, decode_image, encode_embedding, DecodeError, DecodeLimits,
    EmbeddingCodecError,
};
pub use detector::FaceDetector;
pub use pipeline::{Extraction, FaceEmbedder, FacePipeline, PipelineError};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, DimensionMismatch, Embedding, EuclideanMatcher, MatchResult, Matcher};

use std::path::PathBuf;

/// File name of the SCRFD detector weights inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_500m.onnx";

/// File name of the Facenet512 recognizer weights inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "facenet512.onnx";

/// Euclidean distance below which two Facenet512 embeddings are the same person.
///
/// Tuned for the raw (un-normalized) Facenet512 output scale. Swapping the
/// recognizer model requires re-tuning this value.
pub const MATCH_THRESHOLD: f32 = 10.0;

/// Default model directory: `$XDG_DATA_HOME/facegate/models`, falling back to
/// `~/.local/share/facegate/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
        .join("models")
}
