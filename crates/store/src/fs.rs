//! Filesystem facade over a [`RestTransport`].
//!
//! Owns the listing cache and the retry policy. Every mutating operation
//! invalidates the paths it touches before returning.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use lakestore_protocol::{
    AclSpec, AclStatus, AclStatusResponse, ConcatSources, DirectoryEntry, ExpiryOption,
    FileStatusResponse, ListStatusResponse, Operation,
};
use lakestore_rest::{RestRequest, RestResponse, RestTransport};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::cache::{CacheLookup, PathCache};
use crate::file::{FileOptions, OpenMode, RemoteFile};
use crate::{LakePath, RetryPolicy, StoreError};

/// Page size requested from `LISTSTATUS`.
pub const DEFAULT_LIST_BATCH: usize = 4000;

/// Local copy granularity for [`FileSystem::get`] and [`FileSystem::put`].
const COPY_BLOCK: usize = 64 * 1024;

/// Result of a breadth-first walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Walk {
    /// Every file below the root, level by level.
    pub files: Vec<DirectoryEntry>,
    /// Every directory below the root.
    pub dirs: Vec<LakePath>,
    /// Directories below the root that had no entries.
    pub empty_dirs: Vec<LakePath>,
}

/// Aggregate size and counts below a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSummary {
    pub directory_count: u64,
    pub file_count: u64,
    pub length: u64,
    pub space_consumed: u64,
    pub quota: i64,
    pub space_quota: i64,
}

pub struct FileSystem {
    transport: Arc<dyn RestTransport>,
    cache: PathCache,
    retry: RetryPolicy,
    list_batch_size: usize,
}

impl FileSystem {
    pub fn new(transport: Arc<dyn RestTransport>) -> Self {
        Self {
            transport,
            cache: PathCache::new(),
            retry: RetryPolicy::default(),
            list_batch_size: DEFAULT_LIST_BATCH,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_list_batch_size(mut self, size: usize) -> Self {
        self.list_batch_size = size.max(1);
        self
    }

    pub fn transport(&self) -> &dyn RestTransport {
        self.transport.as_ref()
    }

    /// Identity of the underlying store.
    pub fn identity(&self) -> &str {
        self.transport.identity()
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn cache(&self) -> &PathCache {
        &self.cache
    }

    /// See [`PathCache::invalidate`].
    pub fn invalidate(&self, path: Option<&LakePath>) {
        self.cache.invalidate(path);
    }

    async fn call(&self, request: RestRequest) -> Result<RestResponse, StoreError> {
        self.retry.call(self.transport(), request).await
    }

    /// Calls and fails on a `{"boolean": false}` reply.
    async fn call_checked(&self, request: RestRequest) -> Result<(), StoreError> {
        let (op, path) = (request.op, request.path.clone());
        self.call(request).await?.ensure_success(op, &path)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Listing and metadata
    // ------------------------------------------------------------------

    /// Listing of `path`, from the cache unless `invalidate` is set.
    ///
    /// Pages through `LISTSTATUS` until no continuation token is returned.
    /// Entry names are rebuilt as `path/suffix`. Listing a file yields that
    /// file alone.
    pub async fn list(
        &self,
        path: &LakePath,
        invalidate: bool,
    ) -> Result<Vec<DirectoryEntry>, StoreError> {
        if !invalidate {
            if let Some(cached) = self.cache.get(path) {
                return Ok(cached);
            }
        }

        let generation = self.cache.generation();
        let mut entries = Vec::new();
        let mut after = String::new();
        loop {
            let mut request = RestRequest::new(Operation::ListStatus, path.as_str())
                .param("listSize", self.list_batch_size);
            if !after.is_empty() {
                request = request.param("listAfter", &after);
            }
            let page: ListStatusResponse = self.call(request).await?.json()?;
            let page = page.file_statuses;
            let received = page.file_status.len();

            for status in page.file_status {
                let name = if status.path_suffix.is_empty() {
                    path.clone()
                } else {
                    path.join(&status.path_suffix)
                };
                entries.push(DirectoryEntry::from_status(name.as_str(), status)?);
            }

            if page.continuation_token.is_empty() || received == 0 {
                break;
            }
            after = page.continuation_token;
        }

        debug!(path = %path, entries = entries.len(), "listed");
        if !self.cache.insert_if_current(path.clone(), entries.clone(), generation) {
            debug!(path = %path, "cache changed during listing, not caching");
        }
        Ok(entries)
    }

    /// Like [`list`](Self::list), but an empty result is checked against
    /// the path itself: an empty directory lists as empty, a missing path
    /// fails with `NotFound`.
    pub async fn ls(
        &self,
        path: &LakePath,
        invalidate: bool,
    ) -> Result<Vec<DirectoryEntry>, StoreError> {
        let entries = self.list(path, invalidate).await?;
        if entries.is_empty() {
            let entry = self.info(path, false).await?;
            if entry.is_file() {
                return Ok(vec![entry]);
            }
        }
        Ok(entries)
    }

    /// Metadata for one path.
    ///
    /// The root and `invalidate` always go to the service. Otherwise the
    /// parent's cached listing answers, and a cached listing that lacks the
    /// path means `NotFound`.
    pub async fn info(&self, path: &LakePath, invalidate: bool) -> Result<DirectoryEntry, StoreError> {
        if !invalidate && !path.is_root() {
            match self.cache.lookup(path) {
                CacheLookup::Found(entry) => return Ok(entry),
                CacheLookup::Missing => return Err(StoreError::NotFound(path.clone())),
                CacheLookup::Uncached => {}
            }
        }

        let resp: FileStatusResponse = self
            .call(RestRequest::new(Operation::GetFileStatus, path.as_str()))
            .await?
            .json()?;
        let entry = DirectoryEntry::from_status(path.as_str(), resp.file_status)?;
        if !path.is_root() {
            self.cache.upsert(entry.clone());
        }
        Ok(entry)
    }

    pub async fn exists(&self, path: &LakePath, invalidate: bool) -> Result<bool, StoreError> {
        match self.info(path, invalidate).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Breadth-first walk below `path`.
    ///
    /// Directories that vanish mid-walk are skipped; a missing `path`
    /// fails. Walking a file yields just that file.
    pub async fn walk(&self, path: &LakePath, invalidate: bool) -> Result<Walk, StoreError> {
        let mut walk = Walk::default();
        let mut queue: VecDeque<LakePath> = VecDeque::new();

        for entry in self.list(path, invalidate).await? {
            walk.push(entry, &mut queue);
        }
        while let Some(dir) = queue.pop_front() {
            let entries = match self.list(&dir, invalidate).await {
                Ok(entries) => entries,
                Err(StoreError::NotFound(_)) => {
                    debug!(path = %dir, "directory vanished during walk");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if entries.is_empty() {
                walk.empty_dirs.push(dir);
                continue;
            }
            for entry in entries {
                walk.push(entry, &mut queue);
            }
        }
        Ok(walk)
    }

    /// Files matching `pattern`. Wildcards do not cross `/`.
    pub async fn glob(
        &self,
        pattern: &LakePath,
        invalidate: bool,
    ) -> Result<Vec<DirectoryEntry>, StoreError> {
        let prefix = pattern.globless_prefix();
        let files = self.walk(&prefix, invalidate).await?.files;
        if prefix == *pattern {
            return Ok(files);
        }
        Ok(files
            .into_iter()
            .filter(|f| LakePath::new(&f.name).matches(pattern))
            .collect())
    }

    /// Size of each entry of `path` (or of every file below it when `deep`).
    pub async fn du(
        &self,
        path: &LakePath,
        deep: bool,
        invalidate: bool,
    ) -> Result<Vec<(LakePath, u64)>, StoreError> {
        let entries = if deep {
            self.walk(path, invalidate).await?.files
        } else {
            self.ls(path, invalidate).await?
        };
        Ok(entries
            .into_iter()
            .map(|e| (LakePath::new(&e.name), e.length()))
            .collect())
    }

    /// Sum of [`du`](Self::du).
    pub async fn du_total(&self, path: &LakePath, deep: bool, invalidate: bool) -> Result<u64, StoreError> {
        Ok(self
            .du(path, deep, invalidate)
            .await?
            .into_iter()
            .map(|(_, len)| len)
            .sum())
    }

    /// Content summary of `path`; a directory counts itself.
    pub async fn df(&self, path: &LakePath) -> Result<ContentSummary, StoreError> {
        let entry = self.info(path, false).await?;
        let (directory_count, file_count, length) = if entry.is_file() {
            (0, 1, entry.length())
        } else {
            let walk = self.walk(path, true).await?;
            let length = walk.files.iter().map(DirectoryEntry::length).sum();
            (1 + walk.dirs.len() as u64, walk.files.len() as u64, length)
        };
        Ok(ContentSummary {
            directory_count,
            file_count,
            length,
            space_consumed: length,
            quota: -1,
            space_quota: -1,
        })
    }

    // ------------------------------------------------------------------
    // Namespace changes
    // ------------------------------------------------------------------

    /// Creates `path` and any missing parents.
    pub async fn mkdir(&self, path: &LakePath) -> Result<(), StoreError> {
        self.call_checked(RestRequest::new(Operation::Mkdirs, path.as_str()))
            .await?;
        self.invalidate(Some(path));
        Ok(())
    }

    /// Removes an empty directory.
    pub async fn rmdir(&self, path: &LakePath) -> Result<(), StoreError> {
        if !self.info(path, true).await?.is_dir() {
            return Err(StoreError::NotADirectory(path.clone()));
        }
        if !self.ls(path, true).await?.is_empty() {
            return Err(StoreError::DirectoryNotEmpty(path.clone()));
        }
        self.rm(path, false).await
    }

    /// Renames `src` to `dst`.
    pub async fn mv(&self, src: &LakePath, dst: &LakePath) -> Result<(), StoreError> {
        let request =
            RestRequest::new(Operation::Rename, src.as_str()).param("destination", dst.as_posix());
        self.call_checked(request).await?;
        self.invalidate(Some(src));
        self.invalidate(Some(dst));
        Ok(())
    }

    /// Concatenates `sources` (in order) onto `outfile`.
    ///
    /// Never retried. With `delete_source`, the directory holding the
    /// sources is removed afterwards.
    pub async fn concat(
        &self,
        outfile: &LakePath,
        sources: &[LakePath],
        delete_source: bool,
    ) -> Result<(), StoreError> {
        if sources.is_empty() {
            return Err(StoreError::InvalidArgument("concat needs at least one source".into()));
        }
        let body = serde_json::to_vec(&ConcatSources {
            sources: sources.iter().map(LakePath::as_posix).collect(),
        })
        .map_err(|e| StoreError::InvalidArgument(e.to_string()))?;
        let request = RestRequest::new(Operation::MsConcat, outfile.as_str())
            .param("deleteSourceDirectory", delete_source)
            .body(body);

        RetryPolicy::no_retry()
            .call(self.transport(), request)
            .await?
            .ensure_success(Operation::MsConcat, outfile.as_str())?;

        self.invalidate(Some(outfile));
        for source in sources {
            self.invalidate(Some(source));
        }
        if delete_source {
            self.cache.invalidate_prefix(&sources[0].parent());
        }
        debug!(path = %outfile, sources = sources.len(), "concatenated");
        Ok(())
    }

    /// Deletes `path`; directories with children need `recursive`.
    pub async fn rm(&self, path: &LakePath, recursive: bool) -> Result<(), StoreError> {
        if !self.exists(path, false).await? {
            return Err(StoreError::NotFound(path.clone()));
        }
        let request =
            RestRequest::new(Operation::Delete, path.as_str()).param("recursive", recursive);
        self.call_checked(request).await?;
        if recursive {
            self.cache.invalidate_prefix(path);
        } else {
            self.invalidate(Some(path));
        }
        Ok(())
    }

    /// Creates an empty file, truncating any existing one.
    pub async fn touch(&self, path: &LakePath) -> Result<(), StoreError> {
        let mut file = self.open(path, OpenMode::Write).await?;
        file.close().await
    }

    // ------------------------------------------------------------------
    // Attributes and ACLs
    // ------------------------------------------------------------------

    /// Sets octal permission bits, e.g. `"750"`.
    pub async fn chmod(&self, path: &LakePath, permission: &str) -> Result<(), StoreError> {
        let valid = matches!(permission.len(), 3 | 4)
            && permission.bytes().all(|b| (b'0'..=b'7').contains(&b));
        if !valid {
            return Err(StoreError::InvalidArgument(format!(
                "permission must be 3 or 4 octal digits, got {permission:?}"
            )));
        }
        let request =
            RestRequest::new(Operation::SetPermission, path.as_str()).param("permission", permission);
        self.call(request).await?;
        self.invalidate(Some(path));
        Ok(())
    }

    /// Changes owner and/or group; at least one is required.
    pub async fn chown(
        &self,
        path: &LakePath,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<(), StoreError> {
        if owner.is_none() && group.is_none() {
            return Err(StoreError::InvalidArgument("must supply owner and/or group".into()));
        }
        let mut request = RestRequest::new(Operation::SetOwner, path.as_str());
        if let Some(owner) = owner {
            request = request.param("owner", owner);
        }
        if let Some(group) = group {
            request = request.param("group", group);
        }
        self.call(request).await?;
        self.invalidate(Some(path));
        Ok(())
    }

    /// Sets when a file expires. `expire_time` is milliseconds and is
    /// required for every option except `NeverExpire`.
    pub async fn set_expiry(
        &self,
        path: &LakePath,
        option: ExpiryOption,
        expire_time: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut request = RestRequest::new(Operation::SetExpiry, path.as_str())
            .param("expiryOption", option.as_str());
        match (option.requires_time(), expire_time) {
            (true, None) => {
                return Err(StoreError::InvalidArgument(format!(
                    "{} requires an expire time",
                    option.as_str()
                )));
            }
            (true, Some(t)) => request = request.param("expireTime", t),
            (false, _) => {}
        }
        self.call(request).await?;
        self.invalidate(Some(path));
        Ok(())
    }

    async fn acl_call(
        &self,
        op: Operation,
        path: &LakePath,
        spec: Option<AclSpec>,
    ) -> Result<(), StoreError> {
        let mut request = RestRequest::new(op, path.as_str());
        if let Some(spec) = spec {
            request = request.param("aclSpec", spec);
        }
        self.call(request).await?;
        self.invalidate(Some(path));
        Ok(())
    }

    /// Replaces the ACL of `path`.
    pub async fn set_acl(&self, path: &LakePath, spec: &str) -> Result<(), StoreError> {
        let spec = AclSpec::parse(spec)?;
        self.acl_call(Operation::SetAcl, path, Some(spec)).await
    }

    pub async fn modify_acl_entries(&self, path: &LakePath, spec: &str) -> Result<(), StoreError> {
        let spec = AclSpec::parse(spec)?;
        self.acl_call(Operation::ModifyAclEntries, path, Some(spec)).await
    }

    /// Removes entries; permissions in `spec` are optional.
    pub async fn remove_acl_entries(&self, path: &LakePath, spec: &str) -> Result<(), StoreError> {
        let spec = AclSpec::parse_removal(spec)?;
        self.acl_call(Operation::RemoveAclEntries, path, Some(spec)).await
    }

    /// Removes every non-default entry.
    pub async fn remove_acl(&self, path: &LakePath) -> Result<(), StoreError> {
        self.acl_call(Operation::RemoveAcl, path, None).await
    }

    pub async fn remove_default_acl(&self, path: &LakePath) -> Result<(), StoreError> {
        self.acl_call(Operation::RemoveDefaultAcl, path, None).await
    }

    pub async fn get_acl_status(&self, path: &LakePath) -> Result<AclStatus, StoreError> {
        let resp: AclStatusResponse = self
            .call(RestRequest::new(Operation::MsGetAclStatus, path.as_str()))
            .await?
            .json()?;
        Ok(resp.acl_status)
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    pub async fn open(&self, path: &LakePath, mode: OpenMode) -> Result<RemoteFile<'_>, StoreError> {
        self.open_with(path, mode, FileOptions::default()).await
    }

    pub async fn open_with(
        &self,
        path: &LakePath,
        mode: OpenMode,
        options: FileOptions,
    ) -> Result<RemoteFile<'_>, StoreError> {
        RemoteFile::open(self, path.clone(), mode, options).await
    }

    /// Whole contents of a file.
    pub async fn cat(&self, path: &LakePath) -> Result<Vec<u8>, StoreError> {
        self.open(path, OpenMode::Read).await?.read(None).await
    }

    /// First `size` bytes.
    pub async fn head(&self, path: &LakePath, size: usize) -> Result<Vec<u8>, StoreError> {
        self.open(path, OpenMode::Read).await?.read(Some(size)).await
    }

    /// Last `size` bytes.
    pub async fn tail(&self, path: &LakePath, size: usize) -> Result<Vec<u8>, StoreError> {
        let mut file = self.open(path, OpenMode::Read).await?;
        let start = file.size().saturating_sub(size as u64);
        file.seek(std::io::SeekFrom::Start(start))?;
        file.read(None).await
    }

    /// `length` bytes at `offset`, widened to whole records when a
    /// delimiter is given.
    pub async fn read_block(
        &self,
        path: &LakePath,
        offset: u64,
        length: u64,
        delimiter: Option<&[u8]>,
    ) -> Result<Vec<u8>, StoreError> {
        let mut file = self.open(path, OpenMode::Read).await?;
        file.read_block(offset, length, delimiter).await
    }

    /// Streams a remote file into a local one.
    pub async fn get(&self, rpath: &LakePath, lpath: &Path) -> Result<u64, StoreError> {
        let mut remote = self.open(rpath, OpenMode::Read).await?;
        if let Some(parent) = lpath.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut local = tokio::fs::File::create(lpath).await?;
        let mut copied = 0u64;
        loop {
            let data = remote.read(Some(COPY_BLOCK)).await?;
            if data.is_empty() {
                break;
            }
            local.write_all(&data).await?;
            copied += data.len() as u64;
        }
        local.flush().await?;
        debug!(remote = %rpath, local = %lpath.display(), bytes = copied, "downloaded file");
        Ok(copied)
    }

    /// Streams a local file into a remote one, truncating it first.
    pub async fn put(
        &self,
        lpath: &Path,
        rpath: &LakePath,
        delimiter: Option<&[u8]>,
    ) -> Result<u64, StoreError> {
        let mut local = tokio::fs::File::open(lpath).await?;
        let options = FileOptions {
            delimiter: delimiter.map(<[u8]>::to_vec),
            ..FileOptions::default()
        };
        let mut remote = self.open_with(rpath, OpenMode::Write, options).await?;
        let mut buf = vec![0u8; COPY_BLOCK];
        let mut copied = 0u64;
        loop {
            let n = local.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            remote.write(&buf[..n]).await?;
            copied += n as u64;
        }
        remote.close().await?;
        debug!(local = %lpath.display(), remote = %rpath, bytes = copied, "uploaded file");
        Ok(copied)
    }
}

impl Walk {
    fn push(&mut self, entry: DirectoryEntry, queue: &mut VecDeque<LakePath>) {
        if entry.is_dir() {
            let path = LakePath::new(&entry.name);
            self.dirs.push(path.clone());
            queue.push_back(path);
        } else {
            self.files.push(entry);
        }
    }
}
