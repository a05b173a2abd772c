use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::MATCH_THRESHOLD;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for Facenet512).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "facenet512").
    /// `None` for embeddings decoded from a caller-supplied descriptor.
    pub model_version: Option<String>,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("embedding dimension mismatch: probe has {probe}, stored has {stored}")]
pub struct DimensionMismatch {
    pub probe: usize,
    pub stored: usize,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings of equal dimension.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32, DimensionMismatch> {
        if self.dim() != other.dim() {
            return Err(DimensionMismatch {
                probe: self.dim(),
                stored: other.dim(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

/// Result of comparing a fresh embedding against a stored one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance between the two embeddings. Lower = more similar.
    pub distance: f32,
}

/// Strategy for deciding whether a probe embedding matches a stored one.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, stored: &Embedding) -> Result<MatchResult, DimensionMismatch>;
}

/// Euclidean distance matcher: a match is `distance < threshold`.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: MATCH_THRESHOLD,
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, stored: &Embedding) -> Result<MatchResult, DimensionMismatch> {
        let distance = probe.euclidean_distance(stored)?;
        Ok(MatchResult {
            matched: distance < self.threshold,
            distance,
        })
    }
}
