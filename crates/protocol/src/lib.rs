//! WebHDFS wire types for the lakestore object-store client.
//!
//! Everything that crosses the REST boundary lives here: the operation
//! table, response DTOs, and the validated [`DirectoryEntry`] record that
//! the rest of the workspace works with instead of raw JSON maps.

pub mod acl;
pub mod constants;
pub mod entry;
pub mod types;

// Re-export primary types for convenience.
pub use acl::{AclEntry, AclScope, AclSpec};
pub use constants::{ExpiryOption, Operation, SyncFlag};
pub use entry::{DirectoryEntry, EntryAttributes, EntryKind};
pub use types::{
    AclStatus, AclStatusResponse, BooleanResponse, ConcatSources, FileStatus, FileStatusResponse,
    FileStatuses, ListStatusResponse, RemoteException, RemoteExceptionResponse,
};

/// Errors produced while validating wire data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown entry type {kind:?} for {name}")]
    UnknownEntryType { name: String, kind: String },

    #[error("invalid ACL spec: {0}")]
    InvalidAclSpec(String),

    #[error("invalid expiry option: {0}")]
    InvalidExpiryOption(String),

    #[error("invalid sync flag: {0}")]
    InvalidSyncFlag(String),
}
