use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw status record as returned by `LISTSTATUS` and `GETFILESTATUS`.
///
/// Fields the client does not model are kept in `extra` so that a listing
/// can be round-tripped without losing server-provided attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    #[serde(default)]
    pub path_suffix: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub length: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub permission: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default)]
    pub access_time: i64,
    #[serde(default)]
    pub modification_time: i64,
    #[serde(default)]
    pub block_size: u64,
    #[serde(default)]
    pub replication: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub acl_bit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ms_expiration_time: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileStatus {
    pub fn file(path_suffix: impl Into<String>, length: u64) -> Self {
        Self::with_type(path_suffix, "FILE", length)
    }

    pub fn directory(path_suffix: impl Into<String>) -> Self {
        Self::with_type(path_suffix, "DIRECTORY", 0)
    }

    fn with_type(path_suffix: impl Into<String>, entry_type: &str, length: u64) -> Self {
        Self {
            path_suffix: path_suffix.into(),
            entry_type: entry_type.to_string(),
            length,
            permission: String::new(),
            owner: String::new(),
            group: String::new(),
            access_time: 0,
            modification_time: 0,
            block_size: 0,
            replication: 0,
            acl_bit: false,
            ms_expiration_time: None,
            extra: Map::new(),
        }
    }
}

/// One page of a directory listing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatuses {
    #[serde(rename = "FileStatus", default)]
    pub file_status: Vec<FileStatus>,
    /// Name to pass as `listAfter` for the next page; empty when done.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub continuation_token: String,
}

/// Body of a `LISTSTATUS` response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListStatusResponse {
    #[serde(rename = "FileStatuses")]
    pub file_statuses: FileStatuses,
}

/// Body of a `GETFILESTATUS` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatusResponse {
    #[serde(rename = "FileStatus")]
    pub file_status: FileStatus,
}

/// ACL state of a single path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclStatus {
    #[serde(default)]
    pub entries: Vec<String>,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub permission: String,
    #[serde(default)]
    pub sticky_bit: bool,
}

/// Body of a `MSGETACLSTATUS` response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AclStatusResponse {
    #[serde(rename = "AclStatus")]
    pub acl_status: AclStatus,
}

/// Server-side exception detail carried in error bodies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteException {
    #[serde(default)]
    pub exception: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub java_class_name: String,
}

impl RemoteException {
    pub fn is_bad_offset(&self) -> bool {
        self.exception == "BadOffsetException"
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoteExceptionResponse {
    #[serde(rename = "RemoteException")]
    pub remote_exception: RemoteException,
}

/// `{"boolean": ...}` reply used by mutating operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BooleanResponse {
    pub boolean: bool,
}

/// Request body of `MSCONCAT`: absolute source paths in merge order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConcatSources {
    pub sources: Vec<String>,
}
