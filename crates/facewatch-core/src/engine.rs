//! Analyzer thread and its async handle.
//!
//! ONNX inference blocks, so the analyzer lives on a dedicated OS thread and
//! the async side talks to it through a request channel. The awaited reply
//! is the only suspension point of a recognition step.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::{Detection, Frame};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

enum EngineRequest {
    DetectAll {
        frame: Frame,
        reply: oneshot::Sender<Result<Vec<Detection>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread. The thread exits once every
/// handle is dropped.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect every face in `frame` and describe it.
    pub async fn detect_all(&self, frame: Frame) -> Result<Vec<Detection>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::DetectAll {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Move `analyzer` onto its own thread and return a handle to it.
pub fn spawn_engine<A: FaceAnalyzer>(mut analyzer: A) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facewatch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::DetectAll { frame, reply } => {
                        let result = analyzer.detect_all(&frame).map_err(EngineError::from);
                        if let Ok(detections) = &result {
                            tracing::trace!(
                                sequence = frame.sequence,
                                faces = detections.len(),
                                "frame analyzed"
                            );
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
