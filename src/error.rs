//! Error types for transpool.

use thiserror::Error;

/// Main error type for transpool.
#[derive(Error, Debug)]
pub enum TranspoolError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Channel to worker {pid} is closed")]
    ChannelClosed { pid: u32 },

    #[error("Resource probe failed: {0}")]
    Probe(String),

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("Reply could not be delivered: {0}")]
    Reply(String),

    #[error("Scheduler is not running")]
    SchedulerStopped,

    #[error("Scheduler invariant violated: {0}")]
    Invariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for transpool operations.
pub type Result<T> = std::result::Result<T, TranspoolError>;
