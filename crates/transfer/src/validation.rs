use std::path::{Component, Path};

use crate::TransferError;

/// Checks that a path taken from a remote listing stays inside the local
/// download root.
///
/// Rejects empty and absolute paths, `..` segments and Windows prefixes.
pub fn validate_relative_path(relative: &str) -> Result<(), TransferError> {
    if relative.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let path = Path::new(relative);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {relative}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {relative}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {relative}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}
