//! Per-chunk transfer functions.
//!
//! Each function moves one chunk in block-sized calls and reports how far
//! it got. Errors are returned inside the outcome, next to the byte count,
//! so the scheduler can record partial progress of a failed chunk.

use std::io::SeekFrom;
use std::path::Path;

use lakestore_store::{
    FileOptions, FileSystem, LakePath, OpenMode, StoreError, fetch_range_with_retry,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::TransferError;

/// Byte range of one chunk and how much of it is already in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Offset of the chunk within the source file.
    pub offset: u64,
    /// Chunk length.
    pub expected: u64,
    /// Bytes of the chunk transferred by earlier attempts.
    pub done: u64,
}

impl ChunkSpan {
    pub fn new(offset: u64, expected: u64) -> Self {
        Self {
            offset,
            expected,
            done: 0,
        }
    }
}

/// What a chunk transfer achieved.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    /// Bytes of the chunk already in place when this attempt started.
    pub resumed_at: u64,
    /// Bytes moved by this attempt.
    pub transferred: u64,
    pub error: Option<TransferError>,
}

impl ChunkOutcome {
    /// Bytes of the chunk now in place.
    pub fn reached(&self) -> u64 {
        self.resumed_at + self.transferred
    }
}

/// Uploads one chunk of `src` into the remote object `dst`.
///
/// A fresh chunk (`done == 0`) truncates `dst`. A resumed chunk reopens it
/// for append and trusts the length the service reports, so bytes already
/// stored are never sent twice. Cancellation is checked before each block;
/// a cancelled chunk closes the object and returns without error.
pub async fn put_chunk(
    fs: &FileSystem,
    src: &Path,
    dst: &LakePath,
    span: ChunkSpan,
    block_size: u64,
    cancel: &CancellationToken,
) -> ChunkOutcome {
    let mut outcome = ChunkOutcome::default();
    if let Err(e) = put_chunk_inner(fs, src, dst, span, block_size, cancel, &mut outcome).await {
        warn!(src = %src.display(), dst = %dst, offset = span.offset, error = %e, "upload chunk failed");
        outcome.error = Some(e);
    }
    outcome
}

async fn put_chunk_inner(
    fs: &FileSystem,
    src: &Path,
    dst: &LakePath,
    span: ChunkSpan,
    block_size: u64,
    cancel: &CancellationToken,
    outcome: &mut ChunkOutcome,
) -> Result<(), TransferError> {
    let block_size = block_size.max(1);
    let options = FileOptions {
        block_size: block_size as usize,
        delimiter: None,
    };

    let mut remote = if span.done > 0 {
        fs.open_with(dst, OpenMode::Append, options.clone()).await?
    } else {
        fs.open_with(dst, OpenMode::Write, options.clone()).await?
    };
    if remote.tell() > span.expected {
        // Longer than the chunk itself; start over.
        remote.close().await?;
        remote = fs.open_with(dst, OpenMode::Write, options).await?;
    }
    outcome.resumed_at = remote.tell();

    let end = span.offset + span.expected;
    let mut pos = span.offset + outcome.resumed_at;
    if pos < end {
        let mut local = tokio::fs::File::open(src).await?;
        local.seek(SeekFrom::Start(pos)).await?;
        let mut buf = vec![0u8; block_size.min(span.expected) as usize];

        while pos < end {
            if cancel.is_cancelled() {
                debug!(dst = %dst, offset = pos, "upload chunk cancelled");
                break;
            }
            let want = block_size.min(end - pos) as usize;
            let n = read_full(&mut local, &mut buf[..want]).await?;
            if n < want {
                let _ = remote.close().await;
                return Err(StoreError::IncompleteTransfer {
                    path: dst.clone(),
                    message: format!(
                        "local file {} ended at {} before {}",
                        src.display(),
                        pos + n as u64,
                        end
                    ),
                }
                .into());
            }
            if let Err(e) = remote.write(&buf[..n]).await {
                let _ = remote.close().await;
                return Err(e.into());
            }
            pos += n as u64;
            outcome.transferred += n as u64;
        }
    }

    remote.close().await?;
    debug!(
        src = %src.display(),
        dst = %dst,
        offset = span.offset,
        bytes = outcome.transferred,
        "uploaded chunk"
    );
    Ok(())
}

/// Reads until `buf` is full or the file ends.
async fn read_full(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Downloads the unfinished part of one chunk of `src` into the local file
/// `dst` at the same offset.
///
/// `dst` must already exist. A server reply shorter than asked for is not
/// an error by itself; if the chunk still comes up short the outcome
/// carries an [`StoreError::IncompleteTransfer`] and the remainder can be
/// retried from `reached()`.
pub async fn get_chunk(
    fs: &FileSystem,
    src: &LakePath,
    dst: &Path,
    span: ChunkSpan,
    block_size: u64,
    cancel: &CancellationToken,
) -> ChunkOutcome {
    let mut outcome = ChunkOutcome {
        resumed_at: span.done.min(span.expected),
        ..ChunkOutcome::default()
    };
    if let Err(e) = get_chunk_inner(fs, src, dst, span, block_size, cancel, &mut outcome).await {
        warn!(src = %src, dst = %dst.display(), offset = span.offset, error = %e, "download chunk failed");
        outcome.error = Some(e);
    }
    outcome
}

async fn get_chunk_inner(
    fs: &FileSystem,
    src: &LakePath,
    dst: &Path,
    span: ChunkSpan,
    block_size: u64,
    cancel: &CancellationToken,
    outcome: &mut ChunkOutcome,
) -> Result<(), TransferError> {
    let block_size = block_size.max(1);
    let end = span.offset + span.expected;
    let mut pos = span.offset + outcome.resumed_at;

    let mut local = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(dst)
        .await?;
    local.seek(SeekFrom::Start(pos)).await?;
    let session_id = Uuid::new_v4().to_string();

    while pos < end {
        if cancel.is_cancelled() {
            debug!(src = %src, offset = pos, "download chunk cancelled");
            local.flush().await?;
            return Ok(());
        }
        let want = block_size.min(end - pos);
        let data = fetch_range_with_retry(
            fs.transport(),
            fs.retry(),
            src,
            pos,
            want,
            Some(&session_id),
        )
        .await?;
        if data.is_empty() {
            break;
        }
        if data.len() as u64 > want {
            return Err(TransferError::Store(StoreError::IncompleteTransfer {
                path: src.clone(),
                message: format!("received {} bytes, asked for {want}", data.len()),
            }));
        }
        local.write_all(&data).await?;
        pos += data.len() as u64;
        outcome.transferred += data.len() as u64;
    }
    local.flush().await?;

    if pos < end {
        return Err(TransferError::Store(StoreError::IncompleteTransfer {
            path: src.clone(),
            message: format!(
                "received {} of {} bytes at offset {}",
                outcome.reached(),
                span.expected,
                span.offset
            ),
        }));
    }
    debug!(
        src = %src,
        dst = %dst.display(),
        offset = span.offset,
        bytes = outcome.transferred,
        "downloaded chunk"
    );
    Ok(())
}

/// Concatenates uploaded segments into `outfile` and removes their
/// directory.
///
/// The destination is checked against the service, not the cache. If it
/// appeared during the upload it is replaced only with `overwrite`.
pub async fn merge_chunks(
    fs: &FileSystem,
    outfile: &LakePath,
    parts: &[LakePath],
    overwrite: bool,
) -> Result<(), TransferError> {
    if fs.exists(outfile, true).await? {
        if !overwrite {
            return Err(TransferError::FileExists(vec![outfile.as_posix()]));
        }
        fs.rm(outfile, true).await?;
    }
    fs.concat(outfile, parts, true).await?;
    fs.invalidate(Some(outfile));
    info!(path = %outfile, parts = parts.len(), "merged segments");
    Ok(())
}

/// Moves a finished download from its `.inprogress` name into place.
pub(crate) async fn finish_download(
    inprogress: &Path,
    dst: &Path,
    overwrite: bool,
) -> Result<(), TransferError> {
    if tokio::fs::try_exists(dst).await? {
        if !overwrite {
            return Err(TransferError::FileExists(vec![dst.display().to_string()]));
        }
        tokio::fs::remove_file(dst).await?;
    }
    tokio::fs::rename(inprogress, dst).await?;
    debug!(from = %inprogress.display(), to = %dst.display(), "renamed download");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use lakestore_protocol::Operation;
    use lakestore_rest::{Fault, MemoryTransport};
    use lakestore_store::RetryPolicy;
    use tempfile::TempDir;

    fn setup() -> (Arc<MemoryTransport>, FileSystem) {
        let t = Arc::new(MemoryTransport::new());
        let fs = FileSystem::new(t.clone()).with_retry(RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
        });
        (t, fs)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn local_file(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn put_chunk_uploads_its_range() {
        let (t, fs) = setup();
        let dir = TempDir::new().unwrap();
        let data = pattern(100);
        let src = local_file(&dir, "src", &data);

        let outcome = put_chunk(
            &fs,
            &src,
            &LakePath::new("seg/part_40"),
            ChunkSpan::new(40, 35),
            16,
            &CancellationToken::new(),
        )
        .await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.reached(), 35);
        assert_eq!(t.file("seg/part_40").unwrap(), &data[40..75]);
    }

    #[tokio::test]
    async fn put_chunk_resumes_from_remote_length() {
        let (t, fs) = setup();
        let dir = TempDir::new().unwrap();
        let data = pattern(50);
        let src = local_file(&dir, "src", &data);
        // The service already holds more than the recorded progress.
        t.put_file("dst", data[..30].to_vec());

        let span = ChunkSpan {
            offset: 0,
            expected: 50,
            done: 20,
        };
        let outcome = put_chunk(&fs, &src, &LakePath::new("dst"), span, 8, &CancellationToken::new()).await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.resumed_at, 30);
        assert_eq!(outcome.transferred, 20);
        assert_eq!(t.file("dst").unwrap(), data);
        assert_eq!(t.call_count(Operation::Create), 0);
    }

    #[tokio::test]
    async fn put_chunk_stops_when_cancelled() {
        let (t, fs) = setup();
        let dir = TempDir::new().unwrap();
        let src = local_file(&dir, "src", &pattern(40));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = put_chunk(&fs, &src, &LakePath::new("dst"), ChunkSpan::new(0, 40), 8, &cancel).await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.transferred, 0);
        assert_eq!(t.file("dst").unwrap(), b"");
    }

    #[tokio::test]
    async fn put_chunk_reports_short_local_file() {
        let (_t, fs) = setup();
        let dir = TempDir::new().unwrap();
        let src = local_file(&dir, "src", &pattern(10));

        let outcome = put_chunk(
            &fs,
            &src,
            &LakePath::new("dst"),
            ChunkSpan::new(0, 20),
            8,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            outcome.error,
            Some(TransferError::Store(StoreError::IncompleteTransfer { .. }))
        ));
        assert_eq!(outcome.transferred, 8);
    }

    #[tokio::test]
    async fn get_chunk_writes_at_offset() {
        let (t, fs) = setup();
        let dir = TempDir::new().unwrap();
        let data = pattern(64);
        t.put_file("src", data.clone());
        let dst = local_file(&dir, "dst", &[0u8; 64]);

        let outcome = get_chunk(
            &fs,
            &LakePath::new("src"),
            &dst,
            ChunkSpan::new(32, 32),
            10,
            &CancellationToken::new(),
        )
        .await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.reached(), 32);
        let written = std::fs::read(&dst).unwrap();
        assert_eq!(&written[32..], &data[32..]);
        assert!(written[..32].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn get_chunk_short_reads_advance_without_rewriting() {
        let (t, fs) = setup();
        let dir = TempDir::new().unwrap();
        let data = pattern(40);
        t.put_file("src", data.clone());
        t.set_read_cap(Some(3));
        let dst = local_file(&dir, "dst", &[]);

        let outcome = get_chunk(
            &fs,
            &LakePath::new("src"),
            &dst,
            ChunkSpan::new(0, 40),
            16,
            &CancellationToken::new(),
        )
        .await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.transferred, 40);
        assert_eq!(std::fs::read(&dst).unwrap(), data);
    }

    #[tokio::test]
    async fn get_chunk_reports_remainder_after_failure() {
        let (t, fs) = setup();
        let dir = TempDir::new().unwrap();
        let data = pattern(30);
        t.put_file("src", data.clone());
        let dst = local_file(&dir, "dst", &[0u8; 30]);

        // First block succeeds, the second exhausts the retries.
        let t2 = t.clone();
        t.set_call_hook(move |req| {
            if req.op == Operation::Open && req.get_param("offset") == Some("10") {
                t2.fail_next(Operation::Open, Fault::Unavailable, 1);
            }
        });
        let outcome = get_chunk(
            &fs,
            &LakePath::new("src"),
            &dst,
            ChunkSpan::new(0, 30),
            10,
            &CancellationToken::new(),
        )
        .await;
        assert!(outcome.error.as_ref().is_some_and(TransferError::is_retryable));
        assert_eq!(outcome.reached(), 10);

        // Retrying the remainder completes the chunk.
        let span = ChunkSpan {
            offset: 0,
            expected: 30,
            done: outcome.reached(),
        };
        t.set_call_hook(|_| {});
        let outcome = get_chunk(&fs, &LakePath::new("src"), &dst, span, 10, &CancellationToken::new()).await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.reached(), 30);
        assert_eq!(std::fs::read(&dst).unwrap(), data);
        let opens: Vec<_> = t
            .calls()
            .into_iter()
            .filter(|c| c.op == Operation::Open)
            .filter(|c| c.params.contains(&("offset".into(), "0".into())))
            .collect();
        assert_eq!(opens.len(), 1);
    }

    #[tokio::test]
    async fn get_chunk_cancelled_keeps_partial_progress() {
        let (t, fs) = setup();
        let dir = TempDir::new().unwrap();
        t.put_file("src", pattern(30));
        let dst = local_file(&dir, "dst", &[0u8; 30]);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        t.set_call_hook(move |req| {
            if req.op == Operation::Open && req.get_param("offset") == Some("10") {
                c.cancel();
            }
        });
        let outcome = get_chunk(&fs, &LakePath::new("src"), &dst, ChunkSpan::new(0, 30), 10, &cancel).await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.reached(), 20);
    }

    #[tokio::test]
    async fn merge_refuses_existing_destination_without_overwrite() {
        let (t, fs) = setup();
        t.put_file("out", b"old".to_vec());
        t.put_file("out.segments/out_0", b"ab".to_vec());
        t.put_file("out.segments/out_2", b"cd".to_vec());
        let parts = [
            LakePath::new("out.segments/out_0"),
            LakePath::new("out.segments/out_2"),
        ];

        let err = merge_chunks(&fs, &LakePath::new("out"), &parts, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::FileExists(ref v) if v == &["/out".to_string()]));
        assert_eq!(t.file("out").unwrap(), b"old");

        merge_chunks(&fs, &LakePath::new("out"), &parts, true).await.unwrap();
        assert_eq!(t.file("out").unwrap(), b"abcd");
        assert!(!t.exists("out.segments"));
    }

    #[tokio::test]
    async fn finish_download_renames_into_place() {
        let dir = TempDir::new().unwrap();
        let part = local_file(&dir, "f.inprogress", b"new");
        let dst = local_file(&dir, "f", b"old");

        assert!(finish_download(&part, &dst, false).await.is_err());
        finish_download(&part, &dst, true).await.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"new");
        assert!(!part.exists());
    }
}
