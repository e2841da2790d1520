//! Buffered file-like handle on a single remote object.
//!
//! Read handles keep one fetched window `[start, end)` of the object and
//! serve reads from it, fetching a new block whenever the position leaves
//! the window. Write and append handles accumulate data and send it in
//! block-sized appends at explicit offsets.
//!
//! There is no async drop: a write handle must be [`close`]d or buffered
//! data is lost.
//!
//! [`close`]: RemoteFile::close

use std::fmt;
use std::io::SeekFrom;

use lakestore_protocol::constants::MAX_APPEND_BLOCK;
use lakestore_protocol::{DirectoryEntry, Operation, SyncFlag};
use lakestore_rest::RestRequest;
use tracing::debug;
use uuid::Uuid;

use crate::retry::{fetch_range_with_retry, put_data_with_retry};
use crate::{FileSystem, LakePath, StoreError};

/// Read-ahead size for read handles (32 MiB).
pub const DEFAULT_READ_BLOCK: usize = 32 * 1024 * 1024;

/// Consecutive empty fetches tolerated before a read gives up.
const MAX_ZERO_READS: u32 = 5;

/// Scan size used when looking for a delimiter.
const DELIMITER_SCAN_BLOCK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate.
    Write,
    /// Continue after the current end, creating the object if missing.
    Append,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::Append)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpenMode::Read => "read",
            OpenMode::Write => "write",
            OpenMode::Append => "append",
        })
    }
}

#[derive(Debug, Clone)]
pub struct FileOptions {
    /// Read-ahead size, or buffer size for writes (capped at 4 MiB).
    pub block_size: usize,
    /// For writes: flushes end on this byte string where possible.
    pub delimiter: Option<Vec<u8>>,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_READ_BLOCK,
            delimiter: None,
        }
    }
}

pub struct RemoteFile<'a> {
    fs: &'a FileSystem,
    path: LakePath,
    mode: OpenMode,
    block_size: usize,
    delimiter: Option<Vec<u8>>,
    /// Logical position: read cursor, or bytes written so far.
    loc: u64,
    /// Object length; read mode only.
    size: u64,
    start: u64,
    end: u64,
    cache: Vec<u8>,
    buffer: Vec<u8>,
    closed: bool,
    /// Sent as both `filesessionid` and `leaseid`.
    session_id: String,
}

impl<'a> RemoteFile<'a> {
    pub(crate) async fn open(
        fs: &'a FileSystem,
        path: LakePath,
        mode: OpenMode,
        options: FileOptions,
    ) -> Result<Self, StoreError> {
        if options.block_size == 0 {
            return Err(StoreError::InvalidArgument("block size must be positive".into()));
        }

        let existing = match fs.info(&path, true).await {
            Ok(entry) => Some(entry),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if existing.as_ref().is_some_and(DirectoryEntry::is_dir) {
            return Err(StoreError::IsDirectory(path));
        }

        let block_size = if mode.is_writable() {
            options.block_size.min(MAX_APPEND_BLOCK)
        } else {
            options.block_size
        };
        let mut file = Self {
            fs,
            path,
            mode,
            block_size,
            delimiter: options.delimiter.filter(|d| !d.is_empty()),
            loc: 0,
            size: 0,
            start: 0,
            end: 0,
            cache: Vec::new(),
            buffer: Vec::new(),
            closed: false,
            session_id: Uuid::new_v4().to_string(),
        };

        match (mode, existing) {
            (OpenMode::Read, None) => return Err(StoreError::NotFound(file.path)),
            (OpenMode::Read, Some(entry)) => file.size = entry.length(),
            (OpenMode::Append, Some(entry)) => file.loc = entry.length(),
            (OpenMode::Write, _) | (OpenMode::Append, None) => file.create().await?,
        }
        Ok(file)
    }

    async fn create(&self) -> Result<(), StoreError> {
        let request = RestRequest::new(Operation::Create, self.path.as_str())
            .param("overwrite", "true")
            .param("write", "true")
            .param("syncFlag", SyncFlag::Data.as_str())
            .param("leaseid", &self.session_id)
            .param("filesessionid", &self.session_id)
            .body(Vec::new());
        put_data_with_retry(self.fs.transport(), self.fs.retry(), request).await?;
        self.fs.invalidate(Some(&self.path));
        debug!(path = %self.path, "created file");
        Ok(())
    }

    pub fn path(&self) -> &LakePath {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Object length as seen when the handle was opened (read mode).
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn tell(&self) -> u64 {
        self.loc
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn info(&self) -> Result<DirectoryEntry, StoreError> {
        self.fs.info(&self.path, true).await
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    fn check_readable(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if self.mode != OpenMode::Read {
            return Err(StoreError::InvalidMode(self.mode));
        }
        Ok(())
    }

    /// Makes sure the window covers `loc`, fetching one block if it does not.
    async fn fill_window(&mut self) -> Result<(), StoreError> {
        if self.loc >= self.start && self.loc < self.end {
            return Ok(());
        }
        if self.loc >= self.size {
            self.start = self.size;
            self.end = self.size;
            self.cache.clear();
            return Ok(());
        }

        let length = (self.block_size as u64).min(self.size - self.loc);
        let mut data = fetch_range_with_retry(
            self.fs.transport(),
            self.fs.retry(),
            &self.path,
            self.loc,
            length,
            Some(&self.session_id),
        )
        .await?;
        data.truncate(length as usize);

        self.start = self.loc;
        self.end = self.loc + data.len() as u64;
        self.cache = data;
        Ok(())
    }

    /// Bytes of the window from `loc` onward.
    fn window_tail(&self) -> &[u8] {
        if self.loc < self.start || self.loc >= self.end {
            return &[];
        }
        &self.cache[(self.loc - self.start) as usize..]
    }

    /// Reads up to `length` bytes, or to end of file when `None`.
    pub async fn read(&mut self, length: Option<usize>) -> Result<Vec<u8>, StoreError> {
        self.check_readable()?;
        let mut remaining = length.map_or(u64::MAX, |l| l as u64);
        let mut out = Vec::new();
        let mut zero_reads = 0;

        while remaining > 0 && self.loc < self.size {
            self.fill_window().await?;
            let tail = self.window_tail();
            let n = (tail.len() as u64).min(remaining) as usize;
            if n == 0 {
                zero_reads += 1;
                if zero_reads >= MAX_ZERO_READS {
                    return Err(self.incomplete());
                }
                continue;
            }
            zero_reads = 0;
            out.extend_from_slice(&tail[..n]);
            self.loc += n as u64;
            remaining -= n as u64;
        }
        Ok(out)
    }

    /// Reads through the next `\n` (included) or to end of file.
    pub async fn read_line(&mut self) -> Result<Vec<u8>, StoreError> {
        self.check_readable()?;
        let mut line = Vec::new();
        let mut zero_reads = 0;

        while self.loc < self.size {
            self.fill_window().await?;
            let tail = self.window_tail();
            if tail.is_empty() {
                zero_reads += 1;
                if zero_reads >= MAX_ZERO_READS {
                    return Err(self.incomplete());
                }
                continue;
            }
            zero_reads = 0;
            match tail.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    line.extend_from_slice(&tail[..=i]);
                    self.loc += i as u64 + 1;
                    return Ok(line);
                }
                None => {
                    let n = tail.len();
                    line.extend_from_slice(tail);
                    self.loc += n as u64;
                }
            }
        }
        Ok(line)
    }

    fn incomplete(&self) -> StoreError {
        StoreError::IncompleteTransfer {
            path: self.path.clone(),
            message: format!(
                "repeated zero byte reads at offset {} of {}",
                self.loc, self.size
            ),
        }
    }

    /// Moves the read position. Only valid in read mode and within
    /// `[0, size]`.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, StoreError> {
        if self.mode != OpenMode::Read {
            return Err(StoreError::InvalidMode(self.mode));
        }
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(d) => self.loc as i128 + d as i128,
            SeekFrom::End(d) => self.size as i128 + d as i128,
        };
        if target < 0 {
            return Err(StoreError::InvalidArgument("seek before start of file".into()));
        }
        if target > self.size as i128 {
            return Err(StoreError::InvalidArgument("seek beyond end of file".into()));
        }
        self.loc = target as u64;
        Ok(self.loc)
    }

    /// Reads `length` bytes at `offset`, widened to whole records when a
    /// delimiter is given.
    ///
    /// With a delimiter, the start moves forward to just past the first
    /// delimiter at or after `offset` (unless `offset` is 0) and the end
    /// moves forward the same way from `offset + length`.
    pub async fn read_block(
        &mut self,
        offset: u64,
        length: u64,
        delimiter: Option<&[u8]>,
    ) -> Result<Vec<u8>, StoreError> {
        let (start, length) = match delimiter.filter(|d| !d.is_empty()) {
            Some(delim) => {
                self.seek(SeekFrom::Start(offset.min(self.size)))?;
                self.seek_delimiter(delim).await?;
                let start = self.loc;
                let end = (offset + length).min(self.size).max(start);
                self.seek(SeekFrom::Start(end))?;
                self.seek_delimiter(delim).await?;
                (start, self.loc - start)
            }
            None => (offset.min(self.size), length),
        };
        self.seek(SeekFrom::Start(start))?;
        self.read(Some(length as usize)).await
    }

    /// Advances to just past the next `delimiter`, or to end of file.
    async fn seek_delimiter(&mut self, delimiter: &[u8]) -> Result<(), StoreError> {
        if self.loc == 0 {
            return Ok(());
        }
        let mut last: Vec<u8> = Vec::new();
        loop {
            let current = self.read(Some(DELIMITER_SCAN_BLOCK)).await?;
            if current.is_empty() {
                return Ok(());
            }
            let mut full = std::mem::take(&mut last);
            full.extend_from_slice(&current);
            if let Some(i) = find(&full, delimiter) {
                let rewind = (full.len() - i - delimiter.len()) as u64;
                self.loc -= rewind;
                return Ok(());
            }
            let keep = full.len().saturating_sub(delimiter.len());
            last = full.split_off(keep);
        }
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if !self.mode.is_writable() {
            return Err(StoreError::InvalidMode(self.mode));
        }
        Ok(())
    }

    /// Buffers `data` one block at a time, flushing with `DATA` after each
    /// block. Returns the number of bytes accepted.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, StoreError> {
        self.check_writable()?;
        for piece in data.chunks(self.block_size) {
            self.buffer.extend_from_slice(piece);
            self.loc += piece.len() as u64;
            self.flush(SyncFlag::Data, false).await?;
        }
        Ok(data.len())
    }

    /// Sends buffered data.
    ///
    /// While more than one block is buffered, sends a block, cut short after
    /// the last delimiter inside it when a delimiter is set. With `force`,
    /// also sends whatever remains, with `sync`.
    pub async fn flush(&mut self, sync: SyncFlag, force: bool) -> Result<(), StoreError> {
        if !self.mode.is_writable() || self.closed {
            return Ok(());
        }

        let data = std::mem::take(&mut self.buffer);
        let mut sent = 0usize;
        while data.len() - sent > self.block_size {
            let window = &data[sent..sent + self.block_size];
            let limit = self
                .delimiter
                .as_deref()
                .and_then(|d| rfind(window, d).map(|i| i + d.len()))
                .unwrap_or(self.block_size);
            let offset = self.loc - (data.len() - sent) as u64;
            if let Err(e) = self
                .append(&data[sent..sent + limit], SyncFlag::Data, offset)
                .await
            {
                self.buffer = data[sent..].to_vec();
                return Err(e);
            }
            sent += limit;
        }

        if force {
            let offset = self.loc - (data.len() - sent) as u64;
            if let Err(e) = self.append(&data[sent..], sync, offset).await {
                self.buffer = data[sent..].to_vec();
                return Err(e);
            }
            sent = data.len();
        }

        self.buffer = data[sent..].to_vec();
        Ok(())
    }

    async fn append(&self, chunk: &[u8], sync: SyncFlag, offset: u64) -> Result<(), StoreError> {
        let request = RestRequest::new(Operation::Append, self.path.as_str())
            .param("append", "true")
            .param("offset", offset)
            .param("syncFlag", sync.as_str())
            .param("leaseid", &self.session_id)
            .param("filesessionid", &self.session_id)
            .body(chunk.to_vec());
        put_data_with_retry(self.fs.transport(), self.fs.retry(), request).await?;
        debug!(path = %self.path, offset, bytes = chunk.len(), sync = sync.as_str(), "appended");
        Ok(())
    }

    /// Flushes everything with `CLOSE` and invalidates the cached listing.
    /// Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        if self.mode.is_writable() {
            self.flush(SyncFlag::Close, true).await?;
            self.fs.invalidate(Some(&self.path));
        }
        self.closed = true;
        Ok(())
    }
}

impl fmt::Debug for RemoteFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFile")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("loc", &self.loc)
            .field("closed", &self.closed)
            .finish()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use lakestore_rest::{Fault, MemoryTransport};

    use crate::RetryPolicy;

    fn setup() -> (Arc<MemoryTransport>, FileSystem) {
        let t = Arc::new(MemoryTransport::new());
        let fs = FileSystem::new(t.clone()).with_retry(RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
        });
        (t, fs)
    }

    fn opts(block_size: usize) -> FileOptions {
        FileOptions {
            block_size,
            delimiter: None,
        }
    }

    #[tokio::test]
    async fn read_fetches_block_sized_windows() {
        let (t, fs) = setup();
        t.put_file("f", b"abcdefghij".to_vec());

        let mut f = fs.open_with(&"f".into(), OpenMode::Read, opts(4)).await.unwrap();
        assert_eq!(f.size(), 10);
        assert_eq!(f.read(Some(3)).await.unwrap(), b"abc");
        assert_eq!(f.read(Some(3)).await.unwrap(), b"def");
        assert_eq!(f.tell(), 6);
        assert_eq!(f.read(None).await.unwrap(), b"ghij");
        assert_eq!(f.read(None).await.unwrap(), b"");
        // abcd, efgh, ij
        assert_eq!(t.call_count(Operation::Open), 3);
    }

    #[tokio::test]
    async fn seek_is_bounded_and_read_only() {
        let (t, fs) = setup();
        t.put_file("f", b"0123456789".to_vec());

        let mut f = fs.open(&"f".into(), OpenMode::Read).await.unwrap();
        assert_eq!(f.seek(SeekFrom::End(-3)).unwrap(), 7);
        assert_eq!(f.read(None).await.unwrap(), b"789");
        assert!(f.seek(SeekFrom::Start(11)).is_err());
        assert!(f.seek(SeekFrom::Current(-20)).is_err());
        assert_eq!(f.tell(), 10);
        assert_eq!(f.seek(SeekFrom::Start(10)).unwrap(), 10);

        let mut w = fs.open(&"g".into(), OpenMode::Write).await.unwrap();
        assert!(matches!(
            w.seek(SeekFrom::Start(0)),
            Err(StoreError::InvalidMode(OpenMode::Write))
        ));
        w.close().await.unwrap();
    }

    #[tokio::test]
    async fn seek_back_inside_window_does_not_refetch() {
        let (t, fs) = setup();
        t.put_file("f", b"0123456789".to_vec());

        let mut f = fs.open_with(&"f".into(), OpenMode::Read, opts(8)).await.unwrap();
        f.read(Some(5)).await.unwrap();
        f.seek(SeekFrom::Start(1)).unwrap();
        assert_eq!(f.read(Some(2)).await.unwrap(), b"12");
        assert_eq!(t.call_count(Operation::Open), 1);
    }

    #[tokio::test]
    async fn short_reads_are_stitched_together() {
        let (t, fs) = setup();
        t.put_file("f", b"0123456789".to_vec());
        t.set_read_cap(Some(3));

        let mut f = fs.open_with(&"f".into(), OpenMode::Read, opts(8)).await.unwrap();
        assert_eq!(f.read(None).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn repeated_zero_reads_fail() {
        let (t, fs) = setup();
        t.put_file("f", b"0123456789".to_vec());
        t.set_read_cap(Some(0));

        let mut f = fs.open(&"f".into(), OpenMode::Read).await.unwrap();
        let err = f.read(None).await.unwrap_err();
        assert!(matches!(err, StoreError::IncompleteTransfer { .. }));
        assert_eq!(t.call_count(Operation::Open), 5);
    }

    #[tokio::test]
    async fn open_read_missing_or_directory_fails() {
        let (t, fs) = setup();
        t.mkdir("d");
        assert!(matches!(
            fs.open(&"nope".into(), OpenMode::Read).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            fs.open(&"d".into(), OpenMode::Read).await,
            Err(StoreError::IsDirectory(_))
        ));
        assert!(matches!(
            fs.open(&"d".into(), OpenMode::Write).await,
            Err(StoreError::IsDirectory(_))
        ));
    }

    #[tokio::test]
    async fn read_line_splits_on_newline() {
        let (t, fs) = setup();
        t.put_file("f", b"one\ntwo\nthree".to_vec());

        let mut f = fs.open_with(&"f".into(), OpenMode::Read, opts(2)).await.unwrap();
        assert_eq!(f.read_line().await.unwrap(), b"one\n");
        assert_eq!(f.read_line().await.unwrap(), b"two\n");
        assert_eq!(f.read_line().await.unwrap(), b"three");
        assert_eq!(f.read_line().await.unwrap(), b"");
    }

    #[tokio::test]
    async fn write_sends_full_blocks_and_close_sends_rest() {
        let (t, fs) = setup();

        let mut f = fs.open_with(&"out".into(), OpenMode::Write, opts(4)).await.unwrap();
        assert_eq!(t.call_count(Operation::Create), 1);
        f.write(b"0123456789").await.unwrap();
        // Blocks go out only once more than one block is buffered.
        assert_eq!(t.file("out").unwrap(), b"01234567");
        f.close().await.unwrap();
        assert_eq!(t.file("out").unwrap(), b"0123456789");
        assert!(f.is_closed());
        assert!(matches!(f.write(b"x").await, Err(StoreError::Closed)));

        let last = t.calls().into_iter().rev().find(|c| c.op == Operation::Append).unwrap();
        assert!(last.params.contains(&("syncFlag".into(), "CLOSE".into())));
    }

    #[tokio::test]
    async fn write_block_size_is_capped() {
        let (_t, fs) = setup();
        let f = fs
            .open_with(&"out".into(), OpenMode::Write, opts(64 * 1024 * 1024))
            .await
            .unwrap();
        assert_eq!(f.block_size, MAX_APPEND_BLOCK);
    }

    #[tokio::test]
    async fn delimiter_keeps_records_whole() {
        let (t, fs) = setup();
        let options = FileOptions {
            block_size: 8,
            delimiter: Some(b"\n".to_vec()),
        };

        let mut f = fs.open_with(&"out".into(), OpenMode::Write, options).await.unwrap();
        f.write(b"aaa\nbb\ncccc\ndd\n").await.unwrap();
        f.close().await.unwrap();
        assert_eq!(t.file("out").unwrap(), b"aaa\nbb\ncccc\ndd\n");

        let sizes: Vec<usize> = t
            .calls()
            .into_iter()
            .filter(|c| c.op == Operation::Append && c.body_len > 0)
            .map(|c| c.body_len)
            .collect();
        // The first block is cut after the last delimiter inside it.
        assert_eq!(sizes, [7, 8]);
    }

    #[tokio::test]
    async fn append_continues_existing_file() {
        let (t, fs) = setup();
        t.put_file("log", b"head-".to_vec());

        let mut f = fs.open(&"log".into(), OpenMode::Append).await.unwrap();
        assert_eq!(f.tell(), 5);
        f.write(b"tail").await.unwrap();
        f.close().await.unwrap();
        assert_eq!(t.file("log").unwrap(), b"head-tail");
        assert_eq!(t.call_count(Operation::Create), 0);

        let mut g = fs.open(&"fresh".into(), OpenMode::Append).await.unwrap();
        g.write(b"x").await.unwrap();
        g.close().await.unwrap();
        assert_eq!(t.file("fresh").unwrap(), b"x");
    }

    #[tokio::test]
    async fn failed_flush_keeps_buffer() {
        let (t, fs) = setup();
        let mut f = fs.open_with(&"out".into(), OpenMode::Write, opts(4)).await.unwrap();
        f.write(b"abc").await.unwrap();

        t.fail_next(Operation::Append, Fault::PermissionDenied, 1);
        assert!(f.close().await.is_err());
        assert!(!f.is_closed());
        f.close().await.unwrap();
        assert_eq!(t.file("out").unwrap(), b"abc");
    }

    #[tokio::test]
    async fn read_block_aligns_to_delimiters() {
        let (t, fs) = setup();
        t.put_file("f", b"Alice, 100\nBob, 200\nCharlie, 300".to_vec());

        let mut f = fs.open(&"f".into(), OpenMode::Read).await.unwrap();
        assert_eq!(f.read_block(0, 13, Some(b"\n")).await.unwrap(), b"Alice, 100\nBob, 200\n");
        assert_eq!(f.read_block(13, 50, Some(b"\n")).await.unwrap(), b"Charlie, 300");
        assert_eq!(f.read_block(0, 5, None).await.unwrap(), b"Alice");
    }
}
