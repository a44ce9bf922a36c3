use thiserror::Error;

/// Errors surfaced by the pipeline.
///
/// Configuration variants (`InvalidCount`, `InvalidKey`, `InvalidMode`) are
/// returned at setup time and are fatal for bootstrap. Runtime variants are
/// logged, counted, and delivered per-envelope through the acknowledgement
/// callback; they never tear the pipeline down.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid partition count: {0}")]
    InvalidCount(usize),

    #[error("key extractor is required for key mode")]
    InvalidKey,

    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("publisher closed")]
    Closed,

    #[error("batcher stopped")]
    BatcherStopped,

    #[error("batcher buffer at capacity, message dropped")]
    BufferFull,

    #[error("backoff attempts exhausted")]
    BackoffTimeout,

    #[error("cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("wire protocol error: {0}")]
    Protocol(#[from] postcard::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("broker write failed: {0}")]
    Write(String),
}

pub type Result<T> = std::result::Result<T, Error>;
