//! Chunked, resumable transfers between local disk and a lake store.
//!
//! Files are cut into chunks that a bounded pool of workers moves in
//! parallel, each chunk in block-sized calls. [`TransferClient`] schedules
//! chunks and tracks their state; [`Uploader`] and [`Downloader`] turn a
//! path, directory or glob into file pairs and drive a client.

mod chunked;
mod client;
mod download;
mod persist;
mod progress;
mod scan;
mod types;
mod upload;
mod validation;

pub use chunked::{ChunkOutcome, ChunkSpan, get_chunk, merge_chunks, put_chunk};
pub use client::{BeforeStart, ClientConfig, ProgressFn, SessionInfo, TransferClient};
pub use download::Downloader;
pub use persist::{TransferStore, default_state_dir, session_hash};
pub use progress::SpeedCalculator;
pub use scan::{LocalFile, LocalScan, scan_local};
pub use types::{
    ChunkRecord, ChunkState, Direction, FileState, FileTransfer, SessionSnapshot, chunk_offsets,
};
pub use upload::{TransferOptions, Uploader};
pub use validation::validate_relative_path;

use lakestore_store::StoreError;

/// Default chunk size: 256 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024 * 1024;

/// Default block size: 4 MiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("destination files exist and overwrite was not requested: {}", .0.join(", "))]
    FileExists(Vec<String>),

    #[error("source not found or not accessible: {0}")]
    NotFound(String),

    #[error("no files to transfer")]
    NoFiles,

    #[error("transfer still running after the configured timeout")]
    Timeout,

    #[error("transfer is already running")]
    AlreadyRunning,

    #[error("transfer worker failed: {0}")]
    Worker(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("saved session does not match: {0}")]
    SessionMismatch(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransferError {
    /// Whether a chunk that failed with this error is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Io(_) => true,
            TransferError::Store(e) => matches!(
                e,
                StoreError::IncompleteTransfer { .. }
                    | StoreError::MaxRetriesExceeded { .. }
                    | StoreError::BadOffset { .. }
                    | StoreError::Rest(_)
                    | StoreError::Io(_)
            ),
            _ => false,
        }
    }
}
