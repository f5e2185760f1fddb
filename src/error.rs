use thiserror::Error;

/// Errors that end the frame loop or reject a lifecycle call.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("frame loop already started")]
    AlreadyRunning,
    #[error("frame loop has no worker to join")]
    NotRunning,
    #[error("frame source exhausted: {0}")]
    SourceExhausted(#[source] SourceError),
    #[error("failed to spawn frame loop worker")]
    Spawn(#[from] std::io::Error),
    #[error("frame loop worker panicked")]
    WorkerPanicked,
}

/// Failures of a frame source. Every variant is fatal to the loop.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no more frames")]
    Exhausted,
    #[error("source disconnected: {0}")]
    Disconnected(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A failed inference call. Recoverable: the loop logs it and moves on.
#[derive(Debug, Error)]
#[error("inference failed: {0:#}")]
pub struct InferenceError(#[from] anyhow::Error);

impl InferenceError {
    pub fn msg(message: impl Into<String>) -> Self {
        InferenceError(anyhow::anyhow!(message.into()))
    }
}
