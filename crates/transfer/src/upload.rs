//! Local to remote sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lakestore_store::{FileSystem, LakePath};
use tracing::{debug, info};

use crate::client::{ClientConfig, ProgressFn, SessionInfo, TransferClient};
use crate::persist::{TransferStore, session_hash};
use crate::scan::{LocalFile, scan_local};
use crate::{Direction, SessionSnapshot, TransferError};

/// Settings shared by [`Uploader`] and [`Downloader`](crate::Downloader).
#[derive(Clone)]
pub struct TransferOptions {
    pub client: ClientConfig,
    /// Start a monitored run as soon as the session is set up.
    pub run: bool,
    /// Directory holding saved sessions; the session is saved after every
    /// run when set.
    pub persist_dir: Option<PathBuf>,
    pub progress: Option<ProgressFn>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            run: true,
            persist_dir: None,
            progress: None,
        }
    }
}

impl TransferOptions {
    pub(crate) fn attach(&self, client: &TransferClient) {
        client.set_progress(self.progress.clone());
        client.set_store(
            self.persist_dir
                .as_deref()
                .map(|dir| TransferStore::for_direction(dir, client.direction())),
        );
    }
}

/// Uploads a local file, directory tree or glob below a remote path.
pub struct Uploader {
    client: TransferClient,
}

impl Uploader {
    /// Resolves `lpath` into file pairs under `rpath` and submits them.
    ///
    /// A single local file goes to `rpath` itself, or into it when `rpath`
    /// is an existing directory. Fails with [`TransferError::FileExists`]
    /// before submitting anything if a destination exists and overwrite is
    /// off.
    pub async fn new(
        fs: Arc<FileSystem>,
        lpath: &str,
        rpath: &LakePath,
        options: TransferOptions,
    ) -> Result<Self, TransferError> {
        let source = lpath.to_string();
        let scan = tokio::task::spawn_blocking(move || scan_local(&source))
            .await
            .map_err(std::io::Error::other)??;
        if scan.files.is_empty() {
            return Err(TransferError::NoFiles);
        }

        let pairs: Vec<(&LocalFile, LakePath)> = if scan.single_file {
            let file = &scan.files[0];
            let into_dir = fs.exists(rpath, true).await? && fs.info(rpath, false).await?.is_dir();
            let dst = if into_dir {
                rpath.join(&file.relative)
            } else {
                rpath.clone()
            };
            vec![(file, dst)]
        } else {
            scan.files
                .iter()
                .map(|f| (f, rpath.join(&f.relative)))
                .collect()
        };

        if !options.client.overwrite {
            let mut existing = Vec::new();
            for (_, dst) in &pairs {
                if fs.exists(dst, false).await? {
                    existing.push(dst.as_posix());
                }
            }
            if !existing.is_empty() {
                return Err(TransferError::FileExists(existing));
            }
        }

        let config = options.client.clone();
        let session = SessionInfo {
            hash: session_hash(
                fs.identity(),
                lpath,
                &rpath.as_posix(),
                config.chunk_size,
                config.block_size,
            ),
            source: lpath.to_string(),
            destination: rpath.as_posix(),
            unique: String::new(),
            empty_dirs: scan.empty_dirs.clone(),
        };
        let client = TransferClient::new(fs, Direction::Upload, config, session);
        options.attach(&client);
        for (file, dst) in &pairs {
            client.submit(file.path.to_string_lossy(), dst.as_str(), file.size);
        }
        info!(
            source = lpath,
            destination = %rpath,
            files = pairs.len(),
            hash = client.hash(),
            "prepared upload"
        );

        let uploader = Self { client };
        if options.run {
            uploader.run(None, true).await?;
        }
        Ok(uploader)
    }

    /// Rebuilds an upload from a saved session.
    pub async fn resume(
        fs: Arc<FileSystem>,
        snapshot: SessionSnapshot,
        options: TransferOptions,
    ) -> Result<Self, TransferError> {
        if snapshot.direction != Direction::Upload {
            return Err(TransferError::SessionMismatch(format!(
                "{} is a {} session",
                snapshot.hash,
                snapshot.direction.as_str()
            )));
        }
        let client = TransferClient::from_snapshot(fs, snapshot, options.client.clone());
        options.attach(&client);
        let uploader = Self { client };
        if options.run {
            uploader.run(None, true).await?;
        }
        Ok(uploader)
    }

    /// Creates the empty directories found locally, then runs the client.
    pub async fn run(&self, nthreads: Option<usize>, monitor: bool) -> Result<(), TransferError> {
        let session = self.client.session();
        let root = LakePath::new(&session.destination).globless_prefix();
        for dir in &session.empty_dirs {
            let path = root.join(dir);
            debug!(path = %path, "creating empty directory");
            self.client.filesystem().mkdir(&path).await?;
        }
        self.client.run(nthreads, monitor, None).await
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

    /// Saved upload sessions in `dir`.
    pub fn load(dir: &Path) -> Result<BTreeMap<String, SessionSnapshot>, TransferError> {
        TransferStore::for_direction(dir, Direction::Upload).load()
    }

    pub fn clear_saved(dir: &Path) -> Result<(), TransferError> {
        TransferStore::for_direction(dir, Direction::Upload).clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    use lakestore_protocol::Operation;
    use lakestore_rest::{Fault, MemoryTransport};
    use lakestore_store::RetryPolicy;
    use tempfile::TempDir;

    fn setup() -> (Arc<MemoryTransport>, Arc<FileSystem>) {
        let t = Arc::new(MemoryTransport::new());
        let fs = FileSystem::new(t.clone()).with_retry(RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
        });
        (t, Arc::new(fs))
    }

    fn options() -> TransferOptions {
        TransferOptions {
            client: ClientConfig {
                chunk_size: 8,
                block_size: 4,
                nthreads: 4,
                ..ClientConfig::default()
            },
            ..TransferOptions::default()
        }
    }

    fn local_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("a.csv"), b"alpha,beta,gamma\n").unwrap();
        fs::write(root.join("sub").join("b.csv"), b"b\n").unwrap();
        dir
    }

    fn src(dir: &TempDir) -> String {
        dir.path().join("src").to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn uploads_directory_tree() {
        let (t, fs) = setup();
        let dir = local_tree();

        let up = Uploader::new(fs, &src(&dir), &LakePath::new("dst"), options())
            .await
            .unwrap();
        assert!(up.successful());
        assert_eq!(t.file("dst/a.csv").unwrap(), b"alpha,beta,gamma\n");
        assert_eq!(t.file("dst/sub/b.csv").unwrap(), b"b\n");
        assert!(t.is_dir("dst/empty"));
        assert_eq!(t.call_count(Operation::MsConcat), 1);
    }

    #[tokio::test]
    async fn single_file_goes_into_existing_directory() {
        let (t, fs) = setup();
        let dir = local_tree();
        t.mkdir("dst");
        let file = dir.path().join("src").join("sub").join("b.csv");

        Uploader::new(fs, &file.to_string_lossy(), &LakePath::new("dst"), options())
            .await
            .unwrap();
        assert_eq!(t.file("dst/b.csv").unwrap(), b"b\n");
    }

    #[tokio::test]
    async fn single_file_to_literal_path() {
        let (t, fs) = setup();
        let dir = local_tree();
        let file = dir.path().join("src").join("sub").join("b.csv");

        Uploader::new(fs, &file.to_string_lossy(), &LakePath::new("dst/renamed.csv"), options())
            .await
            .unwrap();
        assert_eq!(t.file("dst/renamed.csv").unwrap(), b"b\n");
    }

    #[tokio::test]
    async fn glob_keeps_paths_below_prefix() {
        let (t, fs) = setup();
        let dir = local_tree();
        let pattern = format!("{}/*/*.csv", src(&dir));

        Uploader::new(fs, &pattern, &LakePath::new("dst"), options())
            .await
            .unwrap();
        assert_eq!(t.file("dst/sub/b.csv").unwrap(), b"b\n");
        assert!(!t.exists("dst/a.csv"));
    }

    #[tokio::test]
    async fn existing_destination_aborts_before_any_transfer() {
        let (t, fs) = setup();
        let dir = local_tree();
        t.put_file("dst/sub/b.csv", b"old".to_vec());

        let err = Uploader::new(fs.clone(), &src(&dir), &LakePath::new("dst"), options())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransferError::FileExists(ref v) if v == &["/dst/sub/b.csv".to_string()]));
        assert_eq!(t.call_count(Operation::Create), 0);
        assert!(!t.exists("dst/a.csv"));

        let mut opts = options();
        opts.client.overwrite = true;
        let up = Uploader::new(fs, &src(&dir), &LakePath::new("dst"), opts)
            .await
            .unwrap();
        assert!(up.successful());
        assert_eq!(t.file("dst/sub/b.csv").unwrap(), b"b\n");
    }

    #[tokio::test]
    async fn missing_or_empty_source() {
        let (_t, fs) = setup();
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("nope");
        let err = Uploader::new(fs.clone(), &missing.to_string_lossy(), &LakePath::new("dst"), options())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransferError::NotFound(_)));

        fs::create_dir_all(dir.path().join("only_dirs").join("x")).unwrap();
        let only_dirs = dir.path().join("only_dirs");
        let err = Uploader::new(fs, &only_dirs.to_string_lossy(), &LakePath::new("dst"), options())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransferError::NoFiles));
    }

    #[tokio::test]
    async fn failed_session_is_saved_and_resumed() {
        let (t, fs) = setup();
        let dir = local_tree();
        let state = TempDir::new().unwrap();
        t.fail_next(Operation::Create, Fault::PermissionDenied, 1);

        let mut opts = options();
        opts.client.nthreads = 1;
        opts.persist_dir = Some(state.path().to_path_buf());
        let up = Uploader::new(fs.clone(), &src(&dir), &LakePath::new("dst"), opts.clone())
            .await
            .unwrap();
        assert!(!up.successful());

        let saved = Uploader::load(state.path()).unwrap();
        let snapshot = saved.get(up.hash()).cloned().unwrap();
        assert!(!snapshot.is_finished());

        let resumed = Uploader::resume(fs, snapshot, opts).await.unwrap();
        assert!(resumed.successful());
        assert_eq!(t.file("dst/a.csv").unwrap(), b"alpha,beta,gamma\n");
        assert!(Uploader::load(state.path()).unwrap().is_empty());

        Uploader::clear_saved(state.path()).unwrap();
    }

    #[tokio::test]
    async fn resume_rejects_download_session() {
        let (_t, fs) = setup();
        let snapshot = SessionSnapshot {
            hash: "h".into(),
            direction: Direction::Download,
            source: "/r".into(),
            destination: "/l".into(),
            chunk_size: 8,
            block_size: 4,
            overwrite: false,
            unique: "u".into(),
            files: vec![],
            empty_dirs: vec![],
        };
        assert!(matches!(
            Uploader::resume(fs, snapshot, options()).await,
            Err(TransferError::SessionMismatch(_))
        ));
    }
}
