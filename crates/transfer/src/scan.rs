//! Local enumeration for uploads.
//!
//! Walks a directory recursively, or expands a glob, and produces files
//! with `/`-separated paths relative to the enumeration root.

use std::path::{Path, PathBuf};

use crate::TransferError;

const GLOB_CHARS: [char; 3] = ['*', '?', '['];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    /// Relative to the enumeration root, `/` separated.
    pub relative: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalScan {
    pub files: Vec<LocalFile>,
    /// Relative paths of directories with no entries at all.
    pub empty_dirs: Vec<String>,
    /// The source was a single file rather than a directory or pattern.
    pub single_file: bool,
}

pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(GLOB_CHARS)
}

/// Enumerates `source`: a file, a directory (recursively) or a glob.
///
/// Results are sorted by relative path.
pub fn scan_local(source: &str) -> Result<LocalScan, TransferError> {
    let mut scan = LocalScan::default();

    if is_glob(source) {
        let root = globless_prefix(source);
        let paths = glob::glob(source).map_err(|e| TransferError::InvalidPath(e.to_string()))?;
        for path in paths {
            let path = path.map_err(|e| TransferError::Io(e.into_error()))?;
            let metadata = std::fs::metadata(&path)?;
            if metadata.is_file() {
                let relative = relative_str(&root, &path)?;
                scan.files.push(LocalFile {
                    path,
                    relative,
                    size: metadata.len(),
                });
            }
        }
    } else {
        let root = Path::new(source);
        let metadata = match std::fs::metadata(root) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::NotFound(source.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_file() {
            scan.single_file = true;
            scan.files.push(LocalFile {
                path: root.to_path_buf(),
                relative: file_name(root),
                size: metadata.len(),
            });
        } else {
            walk_dir(root, root, &mut scan)?;
        }
    }

    scan.files.sort_by(|a, b| a.relative.cmp(&b.relative));
    scan.empty_dirs.sort();
    Ok(scan)
}

fn walk_dir(root: &Path, current: &Path, scan: &mut LocalScan) -> Result<(), TransferError> {
    let mut empty = true;
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        empty = false;
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            walk_dir(root, &path, scan)?;
        } else if metadata.is_file() {
            let relative = relative_str(root, &path)?;
            scan.files.push(LocalFile {
                path,
                relative,
                size: metadata.len(),
            });
        }
    }
    if empty && current != root {
        scan.empty_dirs.push(relative_str(root, current)?);
    }
    Ok(())
}

fn relative_str(root: &Path, path: &Path) -> Result<String, TransferError> {
    let rel = path.strip_prefix(root).map_err(std::io::Error::other)?;
    // Normalize to forward slashes.
    Ok(rel.to_string_lossy().replace('\\', "/"))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Leading components of a local pattern that hold no wildcard.
fn globless_prefix(pattern: &str) -> PathBuf {
    Path::new(pattern)
        .components()
        .take_while(|c| !c.as_os_str().to_string_lossy().contains(GLOB_CHARS))
        .collect()
}
