//! Remote to local sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lakestore_protocol::DirectoryEntry;
use lakestore_store::{FileSystem, LakePath};
use tracing::{debug, info};

use crate::client::{BeforeStart, SessionInfo, TransferClient};
use crate::persist::{TransferStore, session_hash};
use crate::upload::TransferOptions;
use crate::validation::validate_relative_path;
use crate::{Direction, FileTransfer, SessionSnapshot, TransferError};

/// Downloads a remote file, directory tree or glob below a local path.
///
/// Files are written to `{destination}.inprogress` and renamed once all of
/// their chunks are in place.
pub struct Downloader {
    client: TransferClient,
}

impl Downloader {
    /// Resolves `rpath` into file pairs under `lpath` and submits them.
    ///
    /// The glob-less prefix of `rpath` is checked against the service
    /// first, so a missing source fails with [`TransferError::NotFound`]
    /// before anything is scheduled.
    pub async fn new(
        fs: Arc<FileSystem>,
        rpath: &LakePath,
        lpath: &Path,
        options: TransferOptions,
    ) -> Result<Self, TransferError> {
        let prefix = rpath.globless_prefix();
        if !fs.exists(&prefix, true).await? {
            return Err(TransferError::NotFound(rpath.as_posix()));
        }

        let (files, empty_dirs) = if rpath.is_glob() {
            (fs.glob(rpath, true).await?, Vec::new())
        } else {
            let walk = fs.walk(rpath, true).await?;
            (walk.files, walk.empty_dirs)
        };
        if files.is_empty() {
            return Err(TransferError::NoFiles);
        }

        let single = files.len() == 1 && !rpath.is_glob() && fs.info(rpath, false).await?.is_file();
        let pairs: Vec<(&DirectoryEntry, PathBuf)> = if single {
            let file = &files[0];
            let dst = if tokio::fs::metadata(lpath).await.is_ok_and(|m| m.is_dir()) {
                lpath.join(LakePath::new(&file.name).name())
            } else {
                lpath.to_path_buf()
            };
            vec![(file, dst)]
        } else {
            let mut pairs = Vec::with_capacity(files.len());
            for file in &files {
                let relative = relative_below(&LakePath::new(&file.name), &prefix)?;
                pairs.push((file, lpath.join(relative)));
            }
            pairs
        };

        let mut relative_dirs = Vec::with_capacity(empty_dirs.len());
        for dir in &empty_dirs {
            relative_dirs.push(relative_below(dir, &prefix)?);
        }

        if !options.client.overwrite {
            let mut existing = Vec::new();
            for (_, dst) in &pairs {
                if tokio::fs::try_exists(dst).await? {
                    existing.push(dst.display().to_string());
                }
            }
            if !existing.is_empty() {
                return Err(TransferError::FileExists(existing));
            }
        }

        let config = options.client.clone();
        let destination = lpath.display().to_string();
        let session = SessionInfo {
            hash: session_hash(
                fs.identity(),
                &rpath.as_posix(),
                &destination,
                config.chunk_size,
                config.block_size,
            ),
            source: rpath.as_posix(),
            destination,
            unique: String::new(),
            empty_dirs: relative_dirs,
        };
        let client = TransferClient::new(fs, Direction::Download, config, session);
        options.attach(&client);
        for (file, dst) in &pairs {
            client.submit(file.name.clone(), dst.to_string_lossy(), file.length());
        }
        info!(
            source = %rpath,
            destination = %lpath.display(),
            files = pairs.len(),
            hash = client.hash(),
            "prepared download"
        );

        let downloader = Self { client };
        if options.run {
            downloader.run(None, true).await?;
        }
        Ok(downloader)
    }

    /// Rebuilds a download from a saved session.
    pub async fn resume(
        fs: Arc<FileSystem>,
        snapshot: SessionSnapshot,
        options: TransferOptions,
    ) -> Result<Self, TransferError> {
        if snapshot.direction != Direction::Download {
            return Err(TransferError::SessionMismatch(format!(
                "{} is a {} session",
                snapshot.hash,
                snapshot.direction.as_str()
            )));
        }
        let client = TransferClient::from_snapshot(fs, snapshot, options.client.clone());
        options.attach(&client);
        let downloader = Self { client };
        if options.run {
            downloader.run(None, true).await?;
        }
        Ok(downloader)
    }

    /// Creates the empty directories found remotely, then runs the client.
    /// Each file gets its parent directories and a pre-sized `.inprogress`
    /// file before its chunks start.
    pub async fn run(&self, nthreads: Option<usize>, monitor: bool) -> Result<(), TransferError> {
        let session = self.client.session();
        let root = PathBuf::from(&session.destination);
        for dir in &session.empty_dirs {
            let path = root.join(dir);
            debug!(path = %path.display(), "creating empty directory");
            tokio::fs::create_dir_all(&path).await?;
        }
        let prepare: &BeforeStart = &prepare_local;
        self.client.run(nthreads, monitor, Some(prepare)).await
    }

    pub fn client(&self) -> &TransferClient {
        &self.client
    }

    pub fn hash(&self) -> &str {
        self.client.hash()
    }

    pub fn successful(&self) -> bool {
        self.client.successful()
    }

    pub fn save(&self, keep: bool) -> Result<(), TransferError> {
        self.client.save(keep)
    }

    /// Saved download sessions in `dir`.
    pub fn load(dir: &Path) -> Result<BTreeMap<String, SessionSnapshot>, TransferError> {
        TransferStore::for_direction(dir, Direction::Download).load()
    }

    pub fn clear_saved(dir: &Path) -> Result<(), TransferError> {
        TransferStore::for_direction(dir, Direction::Download).clear()
    }
}

fn relative_below(path: &LakePath, prefix: &LakePath) -> Result<String, TransferError> {
    let relative = path
        .relative_to(prefix)
        .ok_or_else(|| TransferError::InvalidPath(path.as_posix()))?;
    validate_relative_path(relative)?;
    Ok(relative.to_string())
}

/// Creates the parent directories and the `.inprogress` file. Existing
/// content is kept so that a resumed download continues where it stopped.
fn prepare_local(file: &FileTransfer) -> Result<(), TransferError> {
    let Some(chunk) = file.chunks.first() else {
        return Ok(());
    };
    let inprogress = Path::new(&chunk.name);
    if let Some(parent) = inprogress.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let handle = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(inprogress)?;
    handle.set_len(file.length)?;
    Ok(())
}
