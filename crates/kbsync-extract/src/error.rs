//! Error types for text extraction.

use thiserror::Error;

/// Errors from the extraction cache and worker pool.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// No handler exists for the file's extension
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The worker could not be started or exited unsuccessfully
    #[error("Worker failure: {0}")]
    WorkerFailure(String),

    /// The worker exceeded its time budget and was killed
    #[error("Worker timed out after {secs}s: {file}")]
    WorkerTimeout { file: String, secs: u64 },

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid extraction configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The ticket pool has been shut down
    #[error("Ticket pool closed")]
    Closed,
}
