use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// API version sent with every request unless overridden.
pub const DEFAULT_API_VERSION: &str = "2018-09-01";

/// Default host suffix for store endpoints.
pub const DEFAULT_URL_SUFFIX: &str = "azuredatalakestore.net";

/// Base path of the standard WebHDFS endpoint.
pub const WEBHDFS_PREFIX: &str = "webhdfs/v1/";

/// Base path of the store-specific extension endpoint.
pub const WEBHDFS_EXT_PREFIX: &str = "webhdfsext/";

/// Largest block a single append may carry (4 MiB).
pub const MAX_APPEND_BLOCK: usize = 4 * 1024 * 1024;

/// HTTP verb used by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// REST operation identifier, sent as the `op` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "LISTSTATUS")]
    ListStatus,
    #[serde(rename = "GETFILESTATUS")]
    GetFileStatus,
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "APPEND")]
    Append,
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "RENAME")]
    Rename,
    #[serde(rename = "MKDIRS")]
    Mkdirs,
    #[serde(rename = "SETPERMISSION")]
    SetPermission,
    #[serde(rename = "SETOWNER")]
    SetOwner,
    #[serde(rename = "SETEXPIRY")]
    SetExpiry,
    #[serde(rename = "SETACL")]
    SetAcl,
    #[serde(rename = "MODIFYACLENTRIES")]
    ModifyAclEntries,
    #[serde(rename = "REMOVEACLENTRIES")]
    RemoveAclEntries,
    #[serde(rename = "REMOVEACL")]
    RemoveAcl,
    #[serde(rename = "REMOVEDEFAULTACL")]
    RemoveDefaultAcl,
    #[serde(rename = "MSGETACLSTATUS")]
    MsGetAclStatus,
    #[serde(rename = "MSCONCAT")]
    MsConcat,
}

impl Operation {
    /// Wire name of the operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::ListStatus => "LISTSTATUS",
            Operation::GetFileStatus => "GETFILESTATUS",
            Operation::Create => "CREATE",
            Operation::Append => "APPEND",
            Operation::Open => "OPEN",
            Operation::Delete => "DELETE",
            Operation::Rename => "RENAME",
            Operation::Mkdirs => "MKDIRS",
            Operation::SetPermission => "SETPERMISSION",
            Operation::SetOwner => "SETOWNER",
            Operation::SetExpiry => "SETEXPIRY",
            Operation::SetAcl => "SETACL",
            Operation::ModifyAclEntries => "MODIFYACLENTRIES",
            Operation::RemoveAclEntries => "REMOVEACLENTRIES",
            Operation::RemoveAcl => "REMOVEACL",
            Operation::RemoveDefaultAcl => "REMOVEDEFAULTACL",
            Operation::MsGetAclStatus => "MSGETACLSTATUS",
            Operation::MsConcat => "MSCONCAT",
        }
    }

    pub fn method(self) -> HttpMethod {
        match self {
            Operation::ListStatus
            | Operation::GetFileStatus
            | Operation::Open
            | Operation::MsGetAclStatus => HttpMethod::Get,
            Operation::Append | Operation::MsConcat => HttpMethod::Post,
            Operation::Delete => HttpMethod::Delete,
            Operation::Create
            | Operation::Rename
            | Operation::Mkdirs
            | Operation::SetPermission
            | Operation::SetOwner
            | Operation::SetExpiry
            | Operation::SetAcl
            | Operation::ModifyAclEntries
            | Operation::RemoveAclEntries
            | Operation::RemoveAcl
            | Operation::RemoveDefaultAcl => HttpMethod::Put,
        }
    }

    /// Whether the operation is served by the extension endpoint rather than
    /// the standard WebHDFS path.
    pub fn is_extended(self) -> bool {
        matches!(self, Operation::SetExpiry)
    }

    /// Whether the operation changes the namespace or file contents.
    pub fn is_mutating(self) -> bool {
        !matches!(
            self,
            Operation::ListStatus
                | Operation::GetFileStatus
                | Operation::Open
                | Operation::MsGetAclStatus
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durability hint attached to `CREATE` and `APPEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncFlag {
    /// Persist data and update metadata.
    #[serde(rename = "METADATA")]
    Metadata,
    /// Persist data only.
    #[serde(rename = "DATA")]
    Data,
    /// Persist data, update metadata and release the lease.
    #[serde(rename = "CLOSE")]
    Close,
}

impl SyncFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncFlag::Metadata => "METADATA",
            SyncFlag::Data => "DATA",
            SyncFlag::Close => "CLOSE",
        }
    }
}

impl FromStr for SyncFlag {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "METADATA" => Ok(SyncFlag::Metadata),
            "DATA" => Ok(SyncFlag::Data),
            "CLOSE" => Ok(SyncFlag::Close),
            other => Err(ProtocolError::InvalidSyncFlag(other.to_string())),
        }
    }
}

/// How `SETEXPIRY` interprets the expire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpiryOption {
    NeverExpire,
    RelativeToNow,
    RelativeToCreationDate,
    Absolute,
}

impl ExpiryOption {
    pub const ALL: [ExpiryOption; 4] = [
        ExpiryOption::NeverExpire,
        ExpiryOption::RelativeToNow,
        ExpiryOption::RelativeToCreationDate,
        ExpiryOption::Absolute,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExpiryOption::NeverExpire => "NeverExpire",
            ExpiryOption::RelativeToNow => "RelativeToNow",
            ExpiryOption::RelativeToCreationDate => "RelativeToCreationDate",
            ExpiryOption::Absolute => "Absolute",
        }
    }

    /// Whether an expire time must accompany this option.
    pub fn requires_time(self) -> bool {
        !matches!(self, ExpiryOption::NeverExpire)
    }
}

impl FromStr for ExpiryOption {
    type Err = ProtocolError;

    /// Case-insensitive parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExpiryOption::ALL
            .into_iter()
            .find(|o| o.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::InvalidExpiryOption(s.to_string()))
    }
}
