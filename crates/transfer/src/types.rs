use serde::{Deserialize, Serialize};

/// Which way a session moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkState {
    Pending,
    Running,
    Finished,
    Cancelled,
    Errored,
}

impl ChunkState {
    /// Whether a new run should pick this chunk up again.
    pub fn is_resumable(self) -> bool {
        !matches!(self, ChunkState::Finished)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Pending,
    Transferring,
    /// Segments are being concatenated (uploads) or the download is being
    /// moved into place.
    Merging,
    Finished,
    Cancelled,
    Errored,
}

impl FileState {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            FileState::Pending | FileState::Transferring | FileState::Merging
        )
    }
}

/// One chunk of a file transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Where this chunk is written: a remote segment (or the destination
    /// itself) for uploads, the local `.inprogress` file for downloads.
    pub name: String,
    /// Byte offset within the source file.
    pub offset: u64,
    /// Length of the chunk.
    pub expected: u64,
    /// Bytes of the chunk known to be in place.
    pub actual: u64,
    pub state: ChunkState,
    /// Failed attempts in the current run.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkRecord {
    pub fn remaining(&self) -> u64 {
        self.expected.saturating_sub(self.actual)
    }
}

/// One source/destination pair and its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransfer {
    pub source: String,
    pub destination: String,
    pub length: u64,
    pub state: FileState,
    pub chunks: Vec<ChunkRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileTransfer {
    pub fn all_chunks(&self, state: ChunkState) -> bool {
        !self.chunks.is_empty() && self.chunks.iter().all(|c| c.state == state)
    }

    pub fn any_chunk(&self, state: ChunkState) -> bool {
        self.chunks.iter().any(|c| c.state == state)
    }

    /// Bytes of finished chunks.
    pub fn finished_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Finished)
            .map(|c| c.expected)
            .sum()
    }
}

/// Everything needed to pick a session up in another process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub hash: String,
    pub direction: Direction,
    /// Source path or pattern as given by the caller.
    pub source: String,
    /// Destination root as given by the caller.
    pub destination: String,
    pub chunk_size: u64,
    pub block_size: u64,
    pub overwrite: bool,
    /// Suffix of upload segment directories.
    pub unique: String,
    pub files: Vec<FileTransfer>,
    /// Empty directories to recreate at the destination.
    #[serde(default)]
    pub empty_dirs: Vec<String>,
}

impl SessionSnapshot {
    pub fn is_finished(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|f| f.state == FileState::Finished)
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }

    pub fn finished_bytes(&self) -> u64 {
        self.files.iter().map(FileTransfer::finished_bytes).sum()
    }
}

/// Splits `[0, length)` into `(offset, len)` chunks of at most `chunk_size`.
///
/// An empty file still gets one zero-length chunk.
pub fn chunk_offsets(length: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let chunk_size = chunk_size.max(1);
    if length == 0 {
        return vec![(0, 0)];
    }
    (0..length)
        .step_by(chunk_size as usize)
        .map(|offset| (offset, chunk_size.min(length - offset)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn chunks_partition_the_file() {
        for length in [0u64, 1, 99, 100, 101, 250, 1000] {
            for chunk_size in [1u64, 7, 100, 4096] {
                let chunks = chunk_offsets(length, chunk_size);
                let mut next = 0;
                for &(offset, len) in &chunks {
                    assert_eq!(offset, next);
                    assert!(len <= chunk_size);
                    next += len;
                }
                assert_eq!(next, length);
                if length <= chunk_size {
                    assert_eq!(chunks.len(), 1);
                }
            }
        }
    }

    #[test]
    fn large_file_gets_three_chunks() {
        let chunks = chunk_offsets(600 * MIB, 256 * MIB);
        assert_eq!(
            chunks,
            [(0, 256 * MIB), (256 * MIB, 256 * MIB), (512 * MIB, 88 * MIB)]
        );
    }

    #[test]
    fn empty_file_gets_one_empty_chunk() {
        assert_eq!(chunk_offsets(0, 256 * MIB), [(0, 0)]);
    }

    #[test]
    fn chunk_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ChunkState::Errored).unwrap(), "\"errored\"");
        assert_eq!(serde_json::to_string(&FileState::Merging).unwrap(), "\"merging\"");
        assert_eq!(serde_json::to_string(&Direction::Download).unwrap(), "\"download\"");
    }

    #[test]
    fn chunk_record_defaults_missing_fields() {
        let raw = r#"{"name":"a","offset":0,"expected":5,"actual":2,"state":"pending"}"#;
        let chunk: ChunkRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.attempts, 0);
        assert_eq!(chunk.error, None);
        assert_eq!(chunk.remaining(), 3);
    }

    #[test]
    fn file_state_helpers() {
        let file = FileTransfer {
            source: "s".into(),
            destination: "d".into(),
            length: 10,
            state: FileState::Transferring,
            chunks: vec![
                ChunkRecord {
                    name: "d_0".into(),
                    offset: 0,
                    expected: 6,
                    actual: 6,
                    state: ChunkState::Finished,
                    attempts: 0,
                    error: None,
                },
                ChunkRecord {
                    name: "d_6".into(),
                    offset: 6,
                    expected: 4,
                    actual: 1,
                    state: ChunkState::Pending,
                    attempts: 0,
                    error: None,
                },
            ],
            error: None,
        };
        assert!(!file.all_chunks(ChunkState::Finished));
        assert!(file.any_chunk(ChunkState::Pending));
        assert_eq!(file.finished_bytes(), 6);
        assert!(file.state.is_active());
    }
}
