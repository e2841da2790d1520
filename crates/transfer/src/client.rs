//! Chunk scheduler.
//!
//! A [`TransferClient`] owns the file and chunk records of one session.
//! `run` hands unfinished chunks to worker tasks bounded by a semaphore;
//! workers report back over a channel to a single scheduler task, which is
//! the only place chunk and file state changes while a run is in flight.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lakestore_store::{FileSystem, LakePath};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunked::{self, ChunkOutcome, ChunkSpan};
use crate::persist::TransferStore;
use crate::{
    ChunkRecord, ChunkState, DEFAULT_BLOCK_SIZE, DEFAULT_CHUNK_SIZE, Direction, FileState,
    FileTransfer, SessionSnapshot, TransferError, chunk_offsets,
};

/// Called with `(bytes_done, bytes_total)` each time a chunk finishes.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Called once per unfinished file before its chunks are dispatched. An
/// error marks that file errored without touching the others.
pub type BeforeStart = dyn Fn(&FileTransfer) -> Result<(), TransferError> + Send + Sync;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Upper bound of a chunk, the unit of parallel work.
    pub chunk_size: u64,
    /// Upper bound of a single read or append call.
    pub block_size: u64,
    /// Chunks in flight at once.
    pub nthreads: usize,
    /// Further attempts for a chunk that failed with a transient error.
    pub chunk_retries: u32,
    /// How long a monitored run waits. `None` or zero waits forever.
    pub timeout: Option<Duration>,
    pub overwrite: bool,
    /// Suffix upload segment directories with the session's unique id.
    pub unique_temporary: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            nthreads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            chunk_retries: 3,
            timeout: None,
            overwrite: false,
            unique_temporary: true,
        }
    }
}

/// Identity of a session, carried into its snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub hash: String,
    pub source: String,
    pub destination: String,
    /// Generated when left empty.
    pub unique: String,
    pub empty_dirs: Vec<String>,
}

/// Schedules the chunks of a set of file transfers over a worker pool.
///
/// Cloning gives another handle on the same session.
#[derive(Clone)]
pub struct TransferClient {
    inner: Arc<Inner>,
}

struct Inner {
    fs: Arc<FileSystem>,
    direction: Direction,
    config: ClientConfig,
    session: SessionInfo,
    state: Mutex<State>,
    progress: Mutex<Option<ProgressFn>>,
    store: Mutex<Option<TransferStore>>,
    cancel: Mutex<CancellationToken>,
    running: watch::Sender<bool>,
}

struct State {
    files: Vec<FileTransfer>,
    bytes_done: u64,
}

struct ChunkJob {
    file: usize,
    chunk: usize,
    source: String,
    target: String,
    span: ChunkSpan,
}

/// Merge of upload segments, or rename of a finished download.
struct FinalizeJob {
    file: usize,
    destination: String,
    parts: Vec<String>,
}

enum Work {
    Chunk(ChunkJob),
    Finalize(FinalizeJob),
}

enum Event {
    Chunk {
        file: usize,
        chunk: usize,
        outcome: ChunkOutcome,
    },
    Finalized {
        file: usize,
        result: Result<(), TransferError>,
    },
}

impl TransferClient {
    pub fn new(
        fs: Arc<FileSystem>,
        direction: Direction,
        config: ClientConfig,
        mut session: SessionInfo,
    ) -> Self {
        if session.unique.is_empty() {
            session.unique = Uuid::new_v4().simple().to_string();
        }
        Self::with_files(fs, direction, config, session, Vec::new())
    }

    fn with_files(
        fs: Arc<FileSystem>,
        direction: Direction,
        config: ClientConfig,
        session: SessionInfo,
        files: Vec<FileTransfer>,
    ) -> Self {
        let bytes_done = files.iter().map(FileTransfer::finished_bytes).sum();
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                fs,
                direction,
                config,
                session,
                state: Mutex::new(State { files, bytes_done }),
                progress: Mutex::new(None),
                store: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
                running,
            }),
        }
    }

    /// Rebuilds a client from a saved session. Chunk and block size and
    /// the overwrite flag come from the snapshot.
    pub fn from_snapshot(
        fs: Arc<FileSystem>,
        snapshot: SessionSnapshot,
        config: ClientConfig,
    ) -> Self {
        let config = ClientConfig {
            chunk_size: snapshot.chunk_size,
            block_size: snapshot.block_size,
            overwrite: snapshot.overwrite,
            ..config
        };
        let session = SessionInfo {
            hash: snapshot.hash,
            source: snapshot.source,
            destination: snapshot.destination,
            unique: snapshot.unique,
            empty_dirs: snapshot.empty_dirs,
        };
        Self::with_files(fs, snapshot.direction, config, session, snapshot.files)
    }

    pub fn set_progress(&self, progress: Option<ProgressFn>) {
        *self.inner.progress.lock().unwrap() = progress;
    }

    /// Where the session is saved after every run.
    pub fn set_store(&self, store: Option<TransferStore>) {
        *self.inner.store.lock().unwrap() = store;
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &SessionInfo {
        &self.inner.session
    }

    pub fn hash(&self) -> &str {
        &self.inner.session.hash
    }

    pub fn filesystem(&self) -> &Arc<FileSystem> {
        &self.inner.fs
    }

    /// Registers a file pair and splits it into chunks.
    ///
    /// Upload chunks of a multi-chunk file go to
    /// `{parent}/{name}.segments[.{unique}]/{name}_{offset}`; everything
    /// else is written straight to the destination, or to
    /// `{destination}.inprogress` for downloads.
    pub fn submit(&self, source: impl Into<String>, destination: impl Into<String>, length: u64) {
        let source = source.into();
        let destination = destination.into();
        let offsets = chunk_offsets(length, self.inner.config.chunk_size);
        let count = offsets.len();
        let chunks = offsets
            .into_iter()
            .map(|(offset, expected)| ChunkRecord {
                name: self.inner.chunk_name(&destination, offset, count),
                offset,
                expected,
                actual: 0,
                state: ChunkState::Pending,
                attempts: 0,
                error: None,
            })
            .collect();
        debug!(source = %source, destination = %destination, length, chunks = count, "submitted file");

        self.inner.state.lock().unwrap().files.push(FileTransfer {
            source,
            destination,
            length,
            state: FileState::Pending,
            chunks,
            error: None,
        });
    }

    /// Starts or resumes the session.
    ///
    /// Only chunks that are not finished are dispatched; a resumed chunk
    /// continues at `offset + actual`. With `monitor`, waits until the run
    /// is over (bounded by the configured timeout, which leaves the work
    /// running) and logs what did not finish.
    pub async fn run(
        &self,
        nthreads: Option<usize>,
        monitor: bool,
        before_start: Option<&BeforeStart>,
    ) -> Result<(), TransferError> {
        if self.inner.running.send_replace(true) {
            return Err(TransferError::AlreadyRunning);
        }
        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().unwrap() = cancel.clone();

        let unfinished = self.inner.reset_unfinished();
        if let Some(hook) = before_start {
            for (index, file) in &unfinished {
                if let Err(e) = hook(file) {
                    self.inner.fail_file(*index, &e);
                }
            }
        }

        let work = self.inner.initial_work();
        let nthreads = nthreads.unwrap_or(self.inner.config.nthreads).max(1);
        info!(
            hash = %self.inner.session.hash,
            direction = self.inner.direction.as_str(),
            files = unfinished.len(),
            jobs = work.len(),
            nthreads,
            "starting transfer"
        );
        tokio::spawn(schedule(Arc::clone(&self.inner), cancel, nthreads, work));

        if monitor {
            self.monitor().await?;
        }
        Ok(())
    }

    async fn monitor(&self) -> Result<(), TransferError> {
        match self.inner.config.timeout {
            Some(limit) if !limit.is_zero() => tokio::time::timeout(limit, self.wait())
                .await
                .map_err(|_| TransferError::Timeout)?,
            _ => self.wait().await,
        }
        self.log_unfinished();
        Ok(())
    }

    /// Resolves once no run is in flight.
    pub async fn wait(&self) {
        let mut rx = self.inner.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Asks in-flight chunks to stop at their next block boundary.
    pub fn cancel(&self) {
        self.inner.cancel.lock().unwrap().cancel();
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Whether every file finished. A session with no files has nothing
    /// left to do and counts as successful.
    pub fn successful(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.files.iter().all(|f| f.state == FileState::Finished)
    }

    /// Current file and chunk records.
    pub fn progress(&self) -> Vec<FileTransfer> {
        self.inner.state.lock().unwrap().files.clone()
    }

    /// Chunk counts per state.
    pub fn status(&self) -> BTreeMap<ChunkState, usize> {
        let state = self.inner.state.lock().unwrap();
        let mut counts = BTreeMap::new();
        for chunk in state.files.iter().flat_map(|f| &f.chunks) {
            *counts.entry(chunk.state).or_insert(0) += 1;
        }
        counts
    }

    pub fn bytes_done(&self) -> u64 {
        self.inner.state.lock().unwrap().bytes_done
    }

    pub fn total_bytes(&self) -> u64 {
        self.inner.state.lock().unwrap().total_bytes()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot()
    }

    /// Writes the session to the configured store. Without a store this is
    /// a no-op.
    pub fn save(&self, keep: bool) -> Result<(), TransferError> {
        let store = self.inner.store.lock().unwrap().clone();
        match store {
            Some(store) => store.save(&self.inner.snapshot(), keep),
            None => Ok(()),
        }
    }

    fn log_unfinished(&self) {
        let state = self.inner.state.lock().unwrap();
        for file in &state.files {
            for chunk in file.chunks.iter().filter(|c| c.state != ChunkState::Finished) {
                error!(
                    source = %file.source,
                    destination = %file.destination,
                    offset = chunk.offset,
                    state = ?chunk.state,
                    error = chunk.error.as_deref().unwrap_or(""),
                    "chunk did not finish"
                );
            }
            if chunk_free_failure(file) {
                error!(
                    source = %file.source,
                    destination = %file.destination,
                    error = file.error.as_deref().unwrap_or(""),
                    "file did not finish"
                );
            }
        }
    }
}

/// A file that failed after all of its chunks finished.
fn chunk_free_failure(file: &FileTransfer) -> bool {
    file.state != FileState::Finished && file.all_chunks(ChunkState::Finished)
}

impl State {
    fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }
}

impl Inner {
    fn chunk_name(&self, destination: &str, offset: u64, count: usize) -> String {
        match self.direction {
            Direction::Download => format!("{destination}.inprogress"),
            Direction::Upload if count == 1 => destination.to_string(),
            Direction::Upload => {
                let dst = LakePath::new(destination);
                let name = dst.name();
                let dir = if self.config.unique_temporary {
                    format!("{name}.segments.{}", self.session.unique)
                } else {
                    format!("{name}.segments")
                };
                dst.parent()
                    .join(&dir)
                    .join(&format!("{name}_{offset}"))
                    .as_str()
                    .to_string()
            }
        }
    }

    /// Puts every unfinished file and chunk back to pending with a fresh
    /// retry budget. Returns the files touched.
    fn reset_unfinished(&self) -> Vec<(usize, FileTransfer)> {
        let mut state = self.state.lock().unwrap();
        let mut touched = Vec::new();
        for (index, file) in state.files.iter_mut().enumerate() {
            if file.state == FileState::Finished {
                continue;
            }
            file.state = FileState::Pending;
            file.error = None;
            for chunk in file.chunks.iter_mut().filter(|c| c.state.is_resumable()) {
                chunk.state = ChunkState::Pending;
                chunk.attempts = 0;
                chunk.error = None;
            }
            touched.push((index, file.clone()));
        }
        touched
    }

    fn fail_file(&self, index: usize, err: &TransferError) {
        let mut state = self.state.lock().unwrap();
        let file = &mut state.files[index];
        error!(source = %file.source, destination = %file.destination, error = %err, "could not prepare file");
        file.state = FileState::Errored;
        file.error = Some(err.to_string());
        for chunk in file.chunks.iter_mut().filter(|c| c.state == ChunkState::Pending) {
            chunk.state = ChunkState::Errored;
            chunk.error = Some(err.to_string());
        }
    }

    fn initial_work(&self) -> Vec<Work> {
        let mut state = self.state.lock().unwrap();
        let mut work = Vec::new();
        for (index, file) in state.files.iter_mut().enumerate() {
            if file.state != FileState::Pending {
                continue;
            }
            if file.any_chunk(ChunkState::Pending) {
                file.state = FileState::Transferring;
                for chunk in 0..file.chunks.len() {
                    if file.chunks[chunk].state == ChunkState::Pending {
                        file.chunks[chunk].state = ChunkState::Running;
                        work.push(Work::Chunk(chunk_job(index, file, chunk)));
                    }
                }
            } else {
                work.extend(self.settle(index, file));
            }
        }
        work
    }

    fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().unwrap();
        SessionSnapshot {
            hash: self.session.hash.clone(),
            direction: self.direction,
            source: self.session.source.clone(),
            destination: self.session.destination.clone(),
            chunk_size: self.config.chunk_size,
            block_size: self.config.block_size,
            overwrite: self.config.overwrite,
            unique: self.session.unique.clone(),
            files: state.files.clone(),
            empty_dirs: self.session.empty_dirs.clone(),
        }
    }

    async fn transfer_chunk(&self, job: &ChunkJob, cancel: &CancellationToken) -> ChunkOutcome {
        let block_size = self.config.block_size;
        match self.direction {
            Direction::Upload => {
                let dst = LakePath::new(&job.target);
                chunked::put_chunk(&self.fs, Path::new(&job.source), &dst, job.span, block_size, cancel)
                    .await
            }
            Direction::Download => {
                let src = LakePath::new(&job.source);
                chunked::get_chunk(&self.fs, &src, Path::new(&job.target), job.span, block_size, cancel)
                    .await
            }
        }
    }

    async fn finalize(&self, job: &FinalizeJob) -> Result<(), TransferError> {
        match self.direction {
            Direction::Upload => {
                let parts: Vec<LakePath> = job.parts.iter().map(|p| LakePath::new(p)).collect();
                let outfile = LakePath::new(&job.destination);
                chunked::merge_chunks(&self.fs, &outfile, &parts, self.config.overwrite).await
            }
            Direction::Download => {
                let inprogress = job
                    .parts
                    .first()
                    .ok_or_else(|| TransferError::InvalidPath(job.destination.clone()))?;
                chunked::finish_download(
                    Path::new(inprogress),
                    Path::new(&job.destination),
                    self.config.overwrite,
                )
                .await
            }
        }
    }

    /// Records a chunk completion and returns the work it unlocks: a retry
    /// of the chunk or the finalize step of its file.
    fn on_chunk(
        &self,
        file_index: usize,
        chunk_index: usize,
        outcome: ChunkOutcome,
        cancelled: bool,
    ) -> Vec<Work> {
        let mut work = Vec::new();
        let mut notify = None;
        {
            let mut state = self.state.lock().unwrap();
            let total = state.total_bytes();
            let State { files, bytes_done } = &mut *state;
            let file = &mut files[file_index];
            let mut retry = false;
            {
                let chunk = &mut file.chunks[chunk_index];
                chunk.actual = outcome.reached().min(chunk.expected);
                match outcome.error {
                    None if chunk.actual >= chunk.expected => {
                        chunk.state = ChunkState::Finished;
                        chunk.error = None;
                        *bytes_done += chunk.expected;
                        notify = Some((*bytes_done, total));
                        debug!(name = %chunk.name, offset = chunk.offset, bytes = chunk.expected, "chunk finished");
                    }
                    None if cancelled => {
                        chunk.state = ChunkState::Cancelled;
                        debug!(name = %chunk.name, offset = chunk.offset, actual = chunk.actual, "chunk cancelled");
                    }
                    error => {
                        let (retryable, message) = match error {
                            Some(e) => (e.is_retryable(), e.to_string()),
                            None => (
                                true,
                                format!("stopped at {} of {} bytes", chunk.actual, chunk.expected),
                            ),
                        };
                        chunk.attempts += 1;
                        if cancelled {
                            chunk.state = ChunkState::Cancelled;
                            chunk.error = Some(message);
                        } else if retryable && chunk.attempts <= self.config.chunk_retries {
                            warn!(
                                name = %chunk.name,
                                offset = chunk.offset,
                                actual = chunk.actual,
                                attempt = chunk.attempts,
                                error = %message,
                                "retrying chunk"
                            );
                            chunk.state = ChunkState::Running;
                            retry = true;
                        } else {
                            error!(
                                name = %chunk.name,
                                offset = chunk.offset,
                                attempts = chunk.attempts,
                                error = %message,
                                "chunk failed"
                            );
                            chunk.state = ChunkState::Errored;
                            chunk.error = Some(message);
                        }
                    }
                }
            }
            if retry {
                work.push(Work::Chunk(chunk_job(file_index, file, chunk_index)));
            }
            work.extend(self.settle(file_index, file));
        }

        if let Some((done, total)) = notify {
            let progress = self.progress.lock().unwrap().clone();
            if let Some(progress) = progress {
                progress(done, total);
            }
        }
        work
    }

    fn on_finalized(&self, file_index: usize, result: Result<(), TransferError>) {
        let mut state = self.state.lock().unwrap();
        let file = &mut state.files[file_index];
        match result {
            Ok(()) => {
                file.state = FileState::Finished;
                file.error = None;
                info!(source = %file.source, destination = %file.destination, bytes = file.length, "transferred file");
            }
            Err(e) => {
                error!(source = %file.source, destination = %file.destination, error = %e, "could not finish file");
                file.state = FileState::Errored;
                file.error = Some(e.to_string());
            }
        }
    }

    /// Moves a file forward once none of its chunks is pending or running.
    fn settle(&self, index: usize, file: &mut FileTransfer) -> Option<Work> {
        if file.any_chunk(ChunkState::Pending) || file.any_chunk(ChunkState::Running) {
            return None;
        }
        if file.all_chunks(ChunkState::Finished) {
            if self.direction == Direction::Upload && file.chunks.len() == 1 {
                file.state = FileState::Finished;
                info!(source = %file.source, destination = %file.destination, bytes = file.length, "transferred file");
                return None;
            }
            file.state = FileState::Merging;
            let mut parts: Vec<String> = Vec::with_capacity(file.chunks.len());
            for chunk in &file.chunks {
                if !parts.contains(&chunk.name) {
                    parts.push(chunk.name.clone());
                }
            }
            return Some(Work::Finalize(FinalizeJob {
                file: index,
                destination: file.destination.clone(),
                parts,
            }));
        }
        if let Some(failed) = file.chunks.iter().find(|c| c.state == ChunkState::Errored) {
            file.state = FileState::Errored;
            file.error = failed.error.clone();
        } else {
            file.state = FileState::Cancelled;
        }
        None
    }

    fn persist(&self) {
        let store = self.store.lock().unwrap().clone();
        if let Some(store) = store {
            if let Err(e) = store.save(&self.snapshot(), true) {
                warn!(hash = %self.session.hash, error = %e, "could not save session");
            }
        }
    }
}

fn chunk_job(file_index: usize, file: &FileTransfer, chunk_index: usize) -> ChunkJob {
    let chunk = &file.chunks[chunk_index];
    ChunkJob {
        file: file_index,
        chunk: chunk_index,
        source: file.source.clone(),
        target: chunk.name.clone(),
        span: ChunkSpan {
            offset: chunk.offset,
            expected: chunk.expected,
            done: chunk.actual,
        },
    }
}

/// Runs `initial` and everything it unlocks, then clears the running flag.
async fn schedule(inner: Arc<Inner>, cancel: CancellationToken, nthreads: usize, initial: Vec<Work>) {
    let semaphore = Arc::new(Semaphore::new(nthreads));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut outstanding = 0usize;

    for work in initial {
        dispatch(&inner, &semaphore, &cancel, &tx, work);
        outstanding += 1;
    }

    while outstanding > 0 {
        let Some(event) = rx.recv().await else {
            break;
        };
        outstanding -= 1;
        let follow_up = match event {
            Event::Chunk {
                file,
                chunk,
                outcome,
            } => inner.on_chunk(file, chunk, outcome, cancel.is_cancelled()),
            Event::Finalized { file, result } => {
                inner.on_finalized(file, result);
                Vec::new()
            }
        };
        for work in follow_up {
            dispatch(&inner, &semaphore, &cancel, &tx, work);
            outstanding += 1;
        }
    }

    inner.persist();
    info!(hash = %inner.session.hash, "transfer run finished");
    inner.running.send_replace(false);
}

/// Spawns `work` and reports its event on `tx`. A worker that panics is
/// reported as a failed chunk or finalize step, so the scheduler always
/// sees one event per dispatch.
fn dispatch(
    inner: &Arc<Inner>,
    semaphore: &Arc<Semaphore>,
    cancel: &CancellationToken,
    tx: &mpsc::UnboundedSender<Event>,
    work: Work,
) {
    let inner = Arc::clone(inner);
    let semaphore = Arc::clone(semaphore);
    let cancel = cancel.clone();
    let tx = tx.clone();
    let slot = match &work {
        Work::Chunk(job) => (job.file, Some((job.chunk, job.span.done))),
        Work::Finalize(job) => (job.file, None),
    };
    let worker = tokio::spawn(async move {
        match work {
            Work::Chunk(job) => {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = if cancel.is_cancelled() {
                    ChunkOutcome {
                        resumed_at: job.span.done,
                        ..ChunkOutcome::default()
                    }
                } else {
                    inner.transfer_chunk(&job, &cancel).await
                };
                Event::Chunk {
                    file: job.file,
                    chunk: job.chunk,
                    outcome,
                }
            }
            Work::Finalize(job) => Event::Finalized {
                file: job.file,
                result: inner.finalize(&job).await,
            },
        }
    });
    tokio::spawn(async move {
        let event = match worker.await {
            Ok(event) => event,
            Err(e) => {
                let err = TransferError::Worker(e.to_string());
                match slot {
                    (file, Some((chunk, done))) => Event::Chunk {
                        file,
                        chunk,
                        outcome: ChunkOutcome {
                            resumed_at: done,
                            transferred: 0,
                            error: Some(err),
                        },
                    },
                    (file, None) => Event::Finalized {
                        file,
                        result: Err(err),
                    },
                }
            }
        };
        let _ = tx.send(event);
    });
}
