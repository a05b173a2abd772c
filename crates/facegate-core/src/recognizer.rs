//! Facenet512 face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional embeddings from aligned 160×160 RGB face crops.
//! The model is the Keras Facenet512 export, so the input is NHWC with pixels
//! scaled to [0, 1]. Outputs are left un-normalized: the match threshold is
//! tuned on the raw output scale.

use crate::alignment;
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FACENET_INPUT_SIZE: u32 = 160;
const FACENET_EMBEDDING_DIM: usize = 512;
const FACENET_MODEL_VERSION: &str = "facenet512";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks, alignment needs detector landmarks")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Facenet512-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the Facenet512 ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded Facenet512 model"
        );

        Ok(Self { session })
    }

    /// Dimension of the embeddings this model produces.
    pub fn embedding_dim(&self) -> usize {
        FACENET_EMBEDDING_DIM
    }

    /// Extract an embedding for a detected face in an RGB frame.
    ///
    /// The face is aligned to the canonical 160×160 position using its
    /// detector landmarks before inference.
    pub fn extract(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;

        let aligned = alignment::align_face(frame, landmarks, FACENET_INPUT_SIZE);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let values = validate_output(raw)?;

        Ok(Embedding {
            values,
            model_version: Some(FACENET_MODEL_VERSION.to_string()),
        })
    }
}

/// Convert an aligned 160×160 RGB crop into a 1×160×160×3 tensor in [0, 1].
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = FACENET_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));

    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
        }
    }

    tensor
}

fn validate_output(raw: &[f32]) -> Result<Vec<f32>, RecognizerError> {
    if raw.len() != FACENET_EMBEDDING_DIM {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {FACENET_EMBEDDING_DIM}-dim embedding, got {}",
            raw.len()
        )));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(RecognizerError::InferenceFailed(
            "embedding contains non-finite values".to_string(),
        ));
    }
    Ok(raw.to_vec())
}
