//! On-disk store of interrupted sessions.
//!
//! One JSON file per direction maps session hash to [`SessionSnapshot`].
//! The file is read and rewritten whole.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{Direction, SessionSnapshot, TransferError};

/// Saved sessions of one direction.
#[derive(Debug, Clone)]
pub struct TransferStore {
    path: PathBuf,
}

impl TransferStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<dir>/uploads.json` or `<dir>/downloads.json`.
    pub fn for_direction(dir: &Path, direction: Direction) -> Self {
        let name = match direction {
            Direction::Upload => "uploads.json",
            Direction::Download => "downloads.json",
        };
        Self::new(dir.join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every saved session. A missing file is an empty store.
    pub fn load(&self) -> Result<BTreeMap<String, SessionSnapshot>, TransferError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let sessions: BTreeMap<String, SessionSnapshot> = serde_json::from_str(&data)?;
        debug!(count = sessions.len(), path = %self.path.display(), "loaded sessions");
        Ok(sessions)
    }

    pub fn get(&self, hash: &str) -> Result<Option<SessionSnapshot>, TransferError> {
        Ok(self.load()?.remove(hash))
    }

    /// Stores `snapshot` while it is unfinished and `keep` is set; removes
    /// it otherwise.
    pub fn save(&self, snapshot: &SessionSnapshot, keep: bool) -> Result<(), TransferError> {
        let mut sessions = self.load()?;
        if keep && !snapshot.is_finished() {
            sessions.insert(snapshot.hash.clone(), snapshot.clone());
        } else {
            sessions.remove(&snapshot.hash);
        }
        self.write(&sessions)
    }

    pub fn remove(&self, hash: &str) -> Result<(), TransferError> {
        let mut sessions = self.load()?;
        if sessions.remove(hash).is_some() {
            self.write(&sessions)?;
        }
        Ok(())
    }

    /// Deletes the store file.
    pub fn clear(&self) -> Result<(), TransferError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, sessions: &BTreeMap<String, SessionSnapshot>) -> Result<(), TransferError> {
        let json = serde_json::to_string_pretty(sessions)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!(count = sessions.len(), path = %self.path.display(), "persisted sessions");
        Ok(())
    }
}

/// Deterministic id of a session: SHA-256 over its defining parameters,
/// first 16 bytes, hex.
pub fn session_hash(
    identity: &str,
    source: &str,
    destination: &str,
    chunk_size: u64,
    block_size: u64,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        identity,
        source,
        destination,
        &chunk_size.to_string(),
        &block_size.to_string(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(&hasher.finalize()[..16])
}

/// `<config dir>/lakestore/transfers`.
pub fn default_state_dir() -> Option<PathBuf> {
    config_dir().map(|d| d.join("lakestore").join("transfers"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
