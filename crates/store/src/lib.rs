//! Cache-backed filesystem facade over a lakestore transport.
//!
//! [`FileSystem`] owns the directory listing cache and the retry policy and
//! exposes every namespace operation; [`RemoteFile`] is a buffered
//! file-like handle on a single object.

pub mod cache;
pub mod file;
pub mod fs;
pub mod path;
pub mod retry;

pub use cache::{CacheLookup, PathCache};
pub use file::{DEFAULT_READ_BLOCK, FileOptions, OpenMode, RemoteFile};
pub use fs::{ContentSummary, FileSystem, Walk};
pub use path::LakePath;
pub use retry::{MAX_RETRY_DELAY, RetryPolicy, fetch_range_with_retry, put_data_with_retry};

use lakestore_protocol::{Operation, ProtocolError};
use lakestore_rest::RestError;

/// Errors from filesystem operations and file handles.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(LakePath),

    #[error("permission denied: {path}: {message}")]
    PermissionDenied { path: LakePath, message: String },

    #[error("bad offset on {path}: {message}")]
    BadOffset { path: LakePath, message: String },

    #[error("incomplete transfer on {path}: {message}")]
    IncompleteTransfer { path: LakePath, message: String },

    #[error("max retries exceeded after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: RestError,
    },

    #[error("{0} is a directory")]
    IsDirectory(LakePath),

    #[error("{0} is not a directory")]
    NotADirectory(LakePath),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(LakePath),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation not permitted on a handle opened for {0}")]
    InvalidMode(OpenMode),

    #[error("I/O operation on closed file")]
    Closed,

    #[error("{op} on {path} reported failure")]
    OperationFailed { op: Operation, path: LakePath },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Rest(RestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<RestError> for StoreError {
    fn from(e: RestError) -> Self {
        match e {
            RestError::NotFound { path } => StoreError::NotFound(LakePath::new(&path)),
            RestError::PermissionDenied { path, message } => StoreError::PermissionDenied {
                path: LakePath::new(&path),
                message,
            },
            RestError::BadOffset { path, message } => StoreError::BadOffset {
                path: LakePath::new(&path),
                message,
            },
            RestError::OperationFailed { op, path } => StoreError::OperationFailed {
                op,
                path: LakePath::new(&path),
            },
            other => StoreError::Rest(other),
        }
    }
}
