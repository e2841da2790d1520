use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProtocolError;
use crate::types::FileStatus;

/// Whether an entry is a file (with its length) or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryKind {
    File { length: u64 },
    Directory,
}

/// Attributes carried alongside an entry; opaque to the transfer engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryAttributes {
    pub permission: String,
    pub owner: String,
    pub group: String,
    pub access_time: i64,
    pub modification_time: i64,
    pub block_size: u64,
    pub replication: u32,
    pub acl_bit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// A validated listing record keyed by its full store path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Full path without a leading slash.
    pub name: String,
    #[serde(flatten)]
    pub kind: EntryKind,
    pub attributes: EntryAttributes,
}

impl DirectoryEntry {
    /// Build an entry from a raw status, using `name` as the full path.
    ///
    /// Rejects records whose `type` is neither `FILE` nor `DIRECTORY`.
    pub fn from_status(name: impl Into<String>, status: FileStatus) -> Result<Self, ProtocolError> {
        let name = name.into();
        let kind = match status.entry_type.as_str() {
            "FILE" => EntryKind::File {
                length: status.length,
            },
            "DIRECTORY" => EntryKind::Directory,
            other => {
                return Err(ProtocolError::UnknownEntryType {
                    name,
                    kind: other.to_string(),
                });
            }
        };
        Ok(Self {
            name,
            kind,
            attributes: EntryAttributes {
                permission: status.permission,
                owner: status.owner,
                group: status.group,
                access_time: status.access_time,
                modification_time: status.modification_time,
                block_size: status.block_size,
                replication: status.replication,
                acl_bit: status.acl_bit,
                expiration_time: status.ms_expiration_time,
                extra: status.extra,
            },
        })
    }

    pub fn file(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File { length },
            attributes: EntryAttributes::default(),
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            attributes: EntryAttributes::default(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File { .. })
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    /// Length in bytes; directories report zero.
    pub fn length(&self) -> u64 {
        match self.kind {
            EntryKind::File { length } => length,
            EntryKind::Directory => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_file() {
        let mut status = FileStatus::file("data.bin", 42);
        status.owner = "alice".into();
        let entry = DirectoryEntry::from_status("dir/data.bin", status).unwrap();
        assert_eq!(entry.name, "dir/data.bin");
        assert_eq!(entry.kind, EntryKind::File { length: 42 });
        assert_eq!(entry.attributes.owner, "alice");
        assert!(entry.is_file());
        assert_eq!(entry.length(), 42);
    }

    #[test]
    fn from_status_directory_ignores_length() {
        let mut status = FileStatus::directory("sub");
        status.length = 99;
        let entry = DirectoryEntry::from_status("sub", status).unwrap();
        assert!(entry.is_dir());
        assert_eq!(entry.length(), 0);
    }

    #[test]
    fn from_status_rejects_unknown_type() {
        let mut status = FileStatus::file("link", 0);
        status.entry_type = "SYMLINK".into();
        let err = DirectoryEntry::from_status("link", status).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnknownEntryType {
                name: "link".into(),
                kind: "SYMLINK".into()
            }
        );
    }

    #[test]
    fn serialized_kind_is_flattened() {
        let entry = DirectoryEntry::file("a/b", 7);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["length"], 7);
        assert_eq!(json["name"], "a/b");
    }
}
