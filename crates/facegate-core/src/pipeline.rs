//! Detection → alignment → embedding, behind the [`FaceEmbedder`] seam.

use std::path::Path;

use image::RgbImage;
use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use crate::{DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

impl PipelineError {
    /// `true` when the photo simply had no usable face, as opposed to a model failure.
    pub fn is_no_face(&self) -> bool {
        matches!(
            self,
            PipelineError::NoFaceDetected | PipelineError::Recognizer(RecognizerError::NoLandmarks)
        )
    }
}

/// Embedding of the selected face plus what the detector saw.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub embedding: Embedding,
    /// The face the embedding was taken from.
    pub face: BoundingBox,
    /// Number of faces found in the frame after NMS.
    pub faces_found: usize,
}

/// Produces a face embedding from a decoded photo.
///
/// Detection is always enforced: implementations must fail with
/// [`PipelineError::NoFaceDetected`] rather than embed a non-face region.
pub trait FaceEmbedder: Send {
    fn embed(&mut self, image: &RgbImage) -> Result<Extraction, PipelineError>;
}

/// SCRFD detector + Facenet512 recognizer.
pub struct FacePipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FacePipeline {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self {
            detector,
            recognizer,
        }
    }

    /// Load both models from `model_dir` using the standard file names.
    pub fn load(model_dir: &Path) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self::new(detector, recognizer))
    }

    pub fn embedding_dim(&self) -> usize {
        self.recognizer.embedding_dim()
    }
}

impl FaceEmbedder for FacePipeline {
    fn embed(&mut self, image: &RgbImage) -> Result<Extraction, PipelineError> {
        let faces = self.detector.detect(image)?;
        let face = select_face(&faces).ok_or(PipelineError::NoFaceDetected)?;

        if faces.len() > 1 {
            tracing::debug!(
                faces = faces.len(),
                confidence = face.confidence,
                "multiple faces detected, using the most confident"
            );
        }

        let embedding = self.recognizer.extract(image, face)?;

        Ok(Extraction {
            embedding,
            face: face.clone(),
            faces_found: faces.len(),
        })
    }
}

/// Highest-confidence detection.
fn select_face(faces: &[BoundingBox]) -> Option<&BoundingBox> {
    faces
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}
