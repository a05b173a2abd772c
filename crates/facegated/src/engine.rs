use facegate_core::{
    DimensionMismatch, Embedding, EuclideanMatcher, FaceEmbedder, MatchResult, Matcher,
    PipelineError,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("extraction failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("stored embedding rejected: {0}")]
    StoredEmbedding(#[from] DimensionMismatch),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("face model panicked: {0}")]
    Panicked(String),
}

/// Result of an enrollment operation.
#[derive(Debug)]
pub struct EnrollResult {
    pub embedding: Embedding,
    /// Detector confidence of the embedded face.
    pub confidence: f32,
}

/// Result of a verification operation.
#[derive(Debug)]
pub struct VerifyResult {
    pub result: MatchResult,
    pub confidence: f32,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Enroll {
        image: RgbImage,
        reply: oneshot::Sender<Result<EnrollResult, EngineError>>,
    },
    Verify {
        image: RgbImage,
        stored: Embedding,
        reply: oneshot::Sender<Result<VerifyResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Extract the embedding of the most confident face in `image`.
    pub async fn enroll(&self, image: RgbImage) -> Result<EnrollResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Extract an embedding from `image` and compare it against `stored`.
    pub async fn verify(&self, image: RgbImage, stored: Embedding) -> Result<VerifyResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                image,
                stored,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The embedder (and the model sessions it owns) lives on that thread for
/// the rest of the process; requests are served one at a time in arrival
/// order, `queue` deep.
pub fn spawn_engine(
    mut embedder: Box<dyn FaceEmbedder>,
    queue: usize,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue.max(1));
    let matcher = EuclideanMatcher::default();

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { image, reply } => {
                        let result = isolate(|| run_enroll(embedder.as_mut(), &image));
                        let _ = reply.send(result);
                    }
                    EngineRequest::Verify {
                        image,
                        stored,
                        reply,
                    } => {
                        let result =
                            isolate(|| run_verify(embedder.as_mut(), &matcher, &image, &stored));
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

/// Run one job, turning a panic into an error so the thread outlives it.
fn isolate<T>(job: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
    panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(panic = %message, "engine job panicked");
        Err(EngineError::Panicked(message))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_enroll(embedder: &mut dyn FaceEmbedder, image: &RgbImage) -> Result<EnrollResult, EngineError> {
    let extraction = embedder.embed(image)?;

    tracing::info!(
        confidence = extraction.face.confidence,
        faces = extraction.faces_found,
        dim = extraction.embedding.dim(),
        model = extraction.embedding.model_version.as_deref().unwrap_or("unknown"),
        "enroll: embedding extracted"
    );

    Ok(EnrollResult {
        embedding: extraction.embedding,
        confidence: extraction.face.confidence,
    })
}

fn run_verify(
    embedder: &mut dyn FaceEmbedder,
    matcher: &impl Matcher,
    image: &RgbImage,
    stored: &Embedding,
) -> Result<VerifyResult, EngineError> {
    let extraction = embedder.embed(image)?;
    let result = matcher.compare(&extraction.embedding, stored)?;

    tracing::info!(
        distance = result.distance,
        matched = result.matched,
        confidence = extraction.face.confidence,
        "verify: compared against stored embedding"
    );

    Ok(VerifyResult {
        result,
        confidence: extraction.face.confidence,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use facegate_core::{BoundingBox, Extraction};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// What the stub embedder does when called.
    #[derive(Clone)]
    pub(crate) enum Stub {
        Embed(Vec<f32>),
        NoFace,
        Panic,
    }

    pub(crate) struct StubEmbedder {
        pub behaviour: Stub,
        pub calls: Arc<AtomicUsize>,
    }

    impl FaceEmbedder for StubEmbedder {
        fn embed(&mut self, _image: &RgbImage) -> Result<Extraction, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Stub::Embed(values) => Ok(Extraction {
                    embedding: Embedding {
                        values: values.clone(),
                        model_version: Some("stub-v1".to_string()),
                    },
                    face: BoundingBox {
                        x: 1.0, y: 1.0, width: 10.0, height: 10.0,
                        confidence: 0.9, landmarks: None,
                    },
                    faces_found: 1,
                }),
                Stub::NoFace => Err(PipelineError::NoFaceDetected),
                Stub::Panic => panic!("inference blew up"),
            }
        }
    }

    pub(crate) fn stub_engine(behaviour: Stub) -> (EngineHandle, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = StubEmbedder {
            behaviour,
            calls: calls.clone(),
        };
        let engine = spawn_engine(Box::new(embedder), 4).unwrap();
        (engine, calls)
    }

    fn image() -> RgbImage {
        RgbImage::new(8, 8)
    }

    #[tokio::test]
    async fn test_enroll_returns_embedding() {
        let (engine, calls) = stub_engine(Stub::Embed(vec![1.0, 2.0, 3.0]));
        let result = engine.enroll(image()).await.unwrap();
        assert_eq!(result.embedding.values, vec![1.0, 2.0, 3.0]);
        assert_eq!(result.embedding.model_version.as_deref(), Some("stub-v1"));
        assert!((result.confidence - 0.9).abs() < 1e-6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enroll_no_face() {
        let (engine, _) = stub_engine(Stub::NoFace);
        let err = engine.enroll(image()).await.unwrap_err();
        assert!(matches!(err, EngineError::Pipeline(PipelineError::NoFaceDetected)));
    }

    #[tokio::test]
    async fn test_verify_same_embedding_matches() {
        let (engine, _) = stub_engine(Stub::Embed(vec![0.5; 512]));
        let result = engine.verify(image(), Embedding::new(vec![0.5; 512])).await.unwrap();
        assert!(result.result.matched);
        assert_eq!(result.result.distance, 0.0);
    }

    #[tokio::test]
    async fn test_verify_distant_embedding_rejected() {
        let (engine, _) = stub_engine(Stub::Embed(vec![0.0; 512]));
        let result = engine.verify(image(), Embedding::new(vec![1.0; 512])).await.unwrap();
        assert!(!result.result.matched);
        assert!(result.result.distance > facegate_core::MATCH_THRESHOLD);
    }

    #[tokio::test]
    async fn test_verify_dimension_mismatch() {
        let (engine, _) = stub_engine(Stub::Embed(vec![0.0; 512]));
        let err = engine.verify(image(), Embedding::new(vec![0.0; 128])).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::StoredEmbedding(DimensionMismatch { probe: 512, stored: 128 })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_requests_all_served() {
        let (engine, calls) = stub_engine(Stub::Embed(vec![0.0; 4]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.enroll(image()).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_panic_does_not_kill_engine() {
        let (engine, calls) = stub_engine(Stub::Panic);
        for _ in 0..2 {
            let err = engine.enroll(image()).await.unwrap_err();
            assert!(matches!(&err, EngineError::Panicked(msg) if msg == "inference blew up"), "got {err:?}");
        }
        let err = engine.verify(image(), Embedding::new(vec![0.0; 4])).await.unwrap_err();
        assert!(matches!(err, EngineError::Panicked(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
