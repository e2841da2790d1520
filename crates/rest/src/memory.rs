//! In-memory store speaking the same request vocabulary as the real service.
//!
//! Used by every test above the transport layer. Besides plain storage it
//! can inject faults, cap read sizes, drop append responses after applying
//! them, add latency, and run a hook before each call.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lakestore_protocol::{
    AclStatus, AclStatusResponse, BooleanResponse, ConcatSources, FileStatus, FileStatusResponse,
    FileStatuses, ListStatusResponse, Operation, RemoteException, RemoteExceptionResponse,
};

use crate::transport::BoxFuture;
use crate::{RestError, RestRequest, RestResponse, RestTransport};

const DEFAULT_BLOCK_SIZE: u64 = 256 * 1024 * 1024;

/// Failure to inject for upcoming calls of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    NotFound,
    PermissionDenied,
    BadOffset,
    /// HTTP 503.
    Unavailable,
    /// HTTP 429.
    Throttled,
    /// HTTP 400 with no particular exception.
    BadRequest,
    Timeout,
    Disconnect,
}

impl Fault {
    fn to_error(self, path: &str) -> RestError {
        match self {
            Fault::NotFound => remote_error(path, 404, "FileNotFoundException", "injected"),
            Fault::PermissionDenied => {
                remote_error(path, 403, "AccessControlException", "injected")
            }
            Fault::BadOffset => remote_error(path, 400, "BadOffsetException", "injected"),
            Fault::Unavailable => remote_error(path, 503, "ServiceUnavailableException", "injected"),
            Fault::Throttled => remote_error(path, 429, "ThrottledException", "injected"),
            Fault::BadRequest => remote_error(path, 400, "IllegalArgumentException", "injected"),
            Fault::Timeout => RestError::Timeout,
            Fault::Disconnect => RestError::Transport("connection reset (injected)".into()),
        }
    }
}

/// A call as seen by the store, without its body.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub op: Operation,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body_len: usize,
}

type CallHook = Arc<dyn Fn(&RestRequest) + Send + Sync>;

#[derive(Debug, Clone)]
struct Node {
    /// `None` for directories.
    data: Option<Vec<u8>>,
    permission: String,
    owner: String,
    group: String,
    acl: Vec<String>,
    expiry: Option<i64>,
    mtime: i64,
}

impl Node {
    fn new(data: Option<Vec<u8>>, mtime: i64) -> Self {
        Self {
            data,
            permission: "770".into(),
            owner: "owner".into(),
            group: "group".into(),
            acl: Vec::new(),
            expiry: None,
            mtime,
        }
    }

    fn status(&self, suffix: &str) -> FileStatus {
        let mut status = match &self.data {
            Some(data) => {
                let mut s = FileStatus::file(suffix, data.len() as u64);
                s.block_size = DEFAULT_BLOCK_SIZE;
                s.replication = 1;
                s
            }
            None => FileStatus::directory(suffix),
        };
        status.permission = self.permission.clone();
        status.owner = self.owner.clone();
        status.group = self.group.clone();
        status.access_time = self.mtime;
        status.modification_time = self.mtime;
        status.acl_bit = !self.acl.is_empty();
        status.ms_expiration_time = self.expiry;
        status
    }
}

#[derive(Default)]
struct MemoryState {
    nodes: BTreeMap<String, Node>,
    calls: Vec<RecordedCall>,
    faults: Vec<(Operation, Fault, usize)>,
    lost_appends: usize,
    read_cap: Option<usize>,
    latency: Option<Duration>,
    tick: i64,
}

/// [`RestTransport`] over an in-memory tree.
pub struct MemoryTransport {
    identity: String,
    state: Mutex<MemoryState>,
    hook: Mutex<Option<CallHook>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_identity("memory")
    }

    pub fn with_identity(identity: impl Into<String>) -> Self {
        let mut state = MemoryState::default();
        state.nodes.insert(String::new(), Node::new(None, 0));
        Self {
            identity: identity.into(),
            state: Mutex::new(state),
            hook: Mutex::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Seeding and inspection
    // ------------------------------------------------------------------

    /// Creates or replaces a file, creating parent directories.
    pub fn put_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        let path = normalize(path);
        let mut state = self.state.lock().unwrap();
        let _ = state.ensure_dirs(&parent_of(&path));
        let tick = state.next_tick();
        state.nodes.insert(path, Node::new(Some(data.into()), tick));
    }

    pub fn mkdir(&self, path: &str) {
        let _ = self.state.lock().unwrap().ensure_dirs(&normalize(path));
    }

    /// Contents of a file, or `None` if it is missing or a directory.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.nodes.get(&normalize(path)).and_then(|n| n.data.clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().unwrap().nodes.contains_key(&normalize(path))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .get(&normalize(path))
            .is_some_and(|n| n.data.is_none())
    }

    /// All paths in the store except the root, sorted.
    pub fn paths(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.nodes.keys().filter(|k| !k.is_empty()).cloned().collect()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, op: Operation) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.iter().filter(|c| c.op == op).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Fails the next `times` calls of `op` with `fault`, without touching
    /// the store.
    pub fn fail_next(&self, op: Operation, fault: Fault, times: usize) {
        self.state.lock().unwrap().faults.push((op, fault, times));
    }

    /// Applies the next `times` appends but reports a dropped connection.
    pub fn lose_append_responses(&self, times: usize) {
        self.state.lock().unwrap().lost_appends = times;
    }

    /// Caps the number of bytes any single `OPEN` returns.
    pub fn set_read_cap(&self, cap: Option<usize>) {
        self.state.lock().unwrap().read_cap = cap;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().unwrap().latency = latency;
    }

    /// Runs `hook` at the start of every call.
    pub fn set_call_hook(&self, hook: impl Fn(&RestRequest) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Arc::new(hook));
    }

    async fn handle(&self, request: RestRequest) -> Result<RestResponse, RestError> {
        let hook = self.hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(&request);
        }

        let latency = self.state.lock().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(RecordedCall {
            op: request.op,
            path: request.path.clone(),
            params: request.params.clone(),
            body_len: request.body_len(),
        });
        if let Some(fault) = state.take_fault(request.op) {
            return Err(fault.to_error(&request.path));
        }
        state.apply(&request)
    }
}

impl RestTransport for MemoryTransport {
    fn call(&self, request: RestRequest) -> BoxFuture<'_, Result<RestResponse, RestError>> {
        Box::pin(self.handle(request))
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}

impl MemoryState {
    fn next_tick(&mut self) -> i64 {
        self.tick += 1;
        self.tick
    }

    fn take_fault(&mut self, op: Operation) -> Option<Fault> {
        let slot = self
            .faults
            .iter_mut()
            .find(|(o, _, remaining)| *o == op && *remaining > 0)?;
        slot.2 -= 1;
        let fault = slot.1;
        self.faults.retain(|(_, _, remaining)| *remaining > 0);
        Some(fault)
    }

    /// Creates `path` and every missing ancestor as directories.
    fn ensure_dirs(&mut self, path: &str) -> Result<(), RestError> {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            match self.nodes.get(&current) {
                Some(node) if node.data.is_some() => {
                    return Err(remote_error(
                        &current,
                        403,
                        "FileAlreadyExistsException",
                        "a file exists where a directory is needed",
                    ));
                }
                Some(_) => {}
                None => {
                    let tick = self.next_tick();
                    self.nodes.insert(current.clone(), Node::new(None, tick));
                }
            }
        }
        Ok(())
    }

    fn node(&self, path: &str) -> Result<&Node, RestError> {
        self.nodes
            .get(path)
            .ok_or_else(|| remote_error(path, 404, "FileNotFoundException", "path not found"))
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut Node, RestError> {
        self.nodes
            .get_mut(path)
            .ok_or_else(|| remote_error(path, 404, "FileNotFoundException", "path not found"))
    }

    fn children(&self, dir: &str) -> Vec<(&str, &Node)> {
        self.nodes
            .iter()
            .filter(|(k, _)| !k.is_empty() && parent_of(k) == dir)
            .map(|(k, n)| (suffix_of(k), n))
            .collect()
    }

    fn remove_tree(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.nodes
            .retain(|k, _| k != path && !k.starts_with(&prefix));
    }

    fn apply(&mut self, req: &RestRequest) -> Result<RestResponse, RestError> {
        let path = req.path.as_str();
        match req.op {
            Operation::ListStatus => self.list_status(req),
            Operation::GetFileStatus => RestResponse::json_body(&FileStatusResponse {
                file_status: self.node(path)?.status(""),
            }),
            Operation::Create => self.create(req),
            Operation::Append => self.append(req),
            Operation::Open => self.open(req),
            Operation::Delete => {
                if path.is_empty() || !self.nodes.contains_key(path) {
                    return boolean(false);
                }
                let recursive = req.get_param("recursive") == Some("true");
                if !recursive && !self.children(path).is_empty() {
                    return Err(remote_error(
                        path,
                        400,
                        "PathIsNotEmptyDirectoryException",
                        "directory is not empty",
                    ));
                }
                self.remove_tree(path);
                boolean(true)
            }
            Operation::Rename => self.rename(req),
            Operation::Mkdirs => {
                self.ensure_dirs(path)?;
                boolean(true)
            }
            Operation::SetPermission => {
                let permission = req.get_param("permission").unwrap_or("770").to_string();
                self.node_mut(path)?.permission = permission;
                Ok(RestResponse::empty())
            }
            Operation::SetOwner => {
                let owner = req.get_param("owner").map(str::to_string);
                let group = req.get_param("group").map(str::to_string);
                let node = self.node_mut(path)?;
                if let Some(owner) = owner {
                    node.owner = owner;
                }
                if let Some(group) = group {
                    node.group = group;
                }
                Ok(RestResponse::empty())
            }
            Operation::SetExpiry => {
                let option = req.get_param("expiryOption").unwrap_or("NeverExpire");
                let time = req
                    .get_param("expireTime")
                    .and_then(|t| t.parse::<i64>().ok())
                    .unwrap_or(0);
                let tick = self.tick;
                let node = self.node_mut(path)?;
                node.expiry = match option {
                    "NeverExpire" => None,
                    "Absolute" => Some(time),
                    "RelativeToCreationDate" => Some(node.mtime + time),
                    _ => Some(tick + time),
                };
                Ok(RestResponse::empty())
            }
            Operation::SetAcl => {
                let entries = split_acl(req.get_param("aclSpec").unwrap_or(""));
                self.node_mut(path)?.acl = entries;
                Ok(RestResponse::empty())
            }
            Operation::ModifyAclEntries => {
                let entries = split_acl(req.get_param("aclSpec").unwrap_or(""));
                let node = self.node_mut(path)?;
                for entry in entries {
                    let key = acl_key(&entry);
                    match node.acl.iter_mut().find(|e| acl_key(e) == key) {
                        Some(existing) => *existing = entry,
                        None => node.acl.push(entry),
                    }
                }
                Ok(RestResponse::empty())
            }
            Operation::RemoveAclEntries => {
                let keys: Vec<String> = split_acl(req.get_param("aclSpec").unwrap_or(""))
                    .iter()
                    .map(|e| acl_key(e))
                    .collect();
                let node = self.node_mut(path)?;
                node.acl.retain(|e| !keys.contains(&acl_key(e)));
                Ok(RestResponse::empty())
            }
            Operation::RemoveAcl => {
                self.node_mut(path)?.acl.retain(|e| e.starts_with("default:"));
                Ok(RestResponse::empty())
            }
            Operation::RemoveDefaultAcl => {
                self.node_mut(path)?.acl.retain(|e| !e.starts_with("default:"));
                Ok(RestResponse::empty())
            }
            Operation::MsGetAclStatus => {
                let node = self.node(path)?;
                RestResponse::json_body(&AclStatusResponse {
                    acl_status: AclStatus {
                        entries: node.acl.clone(),
                        owner: node.owner.clone(),
                        group: node.group.clone(),
                        permission: node.permission.clone(),
                        sticky_bit: false,
                    },
                })
            }
            Operation::MsConcat => self.concat(req),
        }
    }

    fn list_status(&self, req: &RestRequest) -> Result<RestResponse, RestError> {
        let node = self.node(&req.path)?;
        if node.data.is_some() {
            return RestResponse::json_body(&ListStatusResponse {
                file_statuses: FileStatuses {
                    file_status: vec![node.status("")],
                    continuation_token: String::new(),
                },
            });
        }

        let list_size = req
            .get_param("listSize")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(usize::MAX);
        let after = req.get_param("listAfter").unwrap_or("");

        let remaining: Vec<(&str, &Node)> = self
            .children(&req.path)
            .into_iter()
            .filter(|(name, _)| after.is_empty() || *name > after)
            .collect();
        let page: Vec<FileStatus> = remaining
            .iter()
            .take(list_size)
            .map(|(name, node)| node.status(name))
            .collect();
        let continuation_token = if remaining.len() > page.len() {
            page.last().map(|s| s.path_suffix.clone()).unwrap_or_default()
        } else {
            String::new()
        };

        RestResponse::json_body(&ListStatusResponse {
            file_statuses: FileStatuses {
                file_status: page,
                continuation_token,
            },
        })
    }

    fn create(&mut self, req: &RestRequest) -> Result<RestResponse, RestError> {
        let path = req.path.as_str();
        let overwrite = req.get_param("overwrite") == Some("true");
        if let Some(existing) = self.nodes.get(path) {
            if existing.data.is_none() || !overwrite {
                return Err(remote_error(
                    path,
                    403,
                    "FileAlreadyExistsException",
                    "destination exists and overwrite is false",
                ));
            }
        }
        self.ensure_dirs(&parent_of(path))?;
        let tick = self.next_tick();
        let data = req.body.clone().unwrap_or_default();
        self.nodes.insert(path.to_string(), Node::new(Some(data), tick));
        Ok(RestResponse::new(201, Vec::new()))
    }

    fn append(&mut self, req: &RestRequest) -> Result<RestResponse, RestError> {
        let path = req.path.as_str();
        let offset = req.get_param("offset").and_then(|o| o.parse::<usize>().ok());
        let tick = self.next_tick();
        let lose = self.lost_appends > 0;

        let node = self.node_mut(path)?;
        let Some(data) = node.data.as_mut() else {
            return Err(remote_error(path, 400, "InvalidOperation", "cannot append to a directory"));
        };
        if let Some(offset) = offset {
            if offset != data.len() {
                return Err(remote_error(
                    path,
                    400,
                    "BadOffsetException",
                    &format!("offset {offset} does not match length {}", data.len()),
                ));
            }
        }
        data.extend_from_slice(req.body.as_deref().unwrap_or_default());
        node.mtime = tick;

        if lose && req.body_len() > 0 {
            self.lost_appends -= 1;
            return Err(RestError::Transport("connection reset after append".into()));
        }
        Ok(RestResponse::empty())
    }

    fn open(&self, req: &RestRequest) -> Result<RestResponse, RestError> {
        let path = req.path.as_str();
        let Some(data) = self.node(path)?.data.as_ref() else {
            return Err(remote_error(path, 400, "InvalidOperation", "cannot open a directory"));
        };
        let offset = req
            .get_param("offset")
            .and_then(|o| o.parse::<usize>().ok())
            .unwrap_or(0);
        if offset > data.len() {
            return Err(remote_error(path, 400, "InvalidOffset", "offset beyond end of file"));
        }
        let mut length = req
            .get_param("length")
            .and_then(|l| l.parse::<usize>().ok())
            .unwrap_or(usize::MAX)
            .min(data.len() - offset);
        if let Some(cap) = self.read_cap {
            length = length.min(cap);
        }
        Ok(RestResponse::new(200, data[offset..offset + length].to_vec()))
    }

    fn rename(&mut self, req: &RestRequest) -> Result<RestResponse, RestError> {
        let src = req.path.clone();
        let Some(dst) = req.get_param("destination").map(normalize) else {
            return Err(remote_error(&src, 400, "IllegalArgumentException", "missing destination"));
        };
        if src.is_empty()
            || dst.is_empty()
            || !self.nodes.contains_key(&src)
            || self.nodes.contains_key(&dst)
            || dst.starts_with(&format!("{src}/"))
            || !self
                .nodes
                .get(&parent_of(&dst))
                .is_some_and(|n| n.data.is_none())
        {
            return boolean(false);
        }

        let prefix = format!("{src}/");
        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| **k == src || k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = self.nodes.remove(&key) {
                let new_key = format!("{dst}{}", &key[src.len()..]);
                self.nodes.insert(new_key, node);
            }
        }
        boolean(true)
    }

    fn concat(&mut self, req: &RestRequest) -> Result<RestResponse, RestError> {
        let dst = req.path.clone();
        let body: ConcatSources = serde_json::from_slice(req.body.as_deref().unwrap_or_default())?;
        let sources: Vec<String> = body.sources.iter().map(|s| normalize(s)).collect();
        if sources.is_empty() {
            return Err(remote_error(&dst, 400, "IllegalArgumentException", "no sources"));
        }

        let mut merged = match self.nodes.get(&dst) {
            Some(Node { data: Some(d), .. }) => d.clone(),
            Some(_) => {
                return Err(remote_error(&dst, 400, "InvalidOperation", "destination is a directory"));
            }
            None => Vec::new(),
        };
        for source in &sources {
            match self.node(source)?.data.as_ref() {
                Some(data) => merged.extend_from_slice(data),
                None => {
                    return Err(remote_error(source, 400, "InvalidOperation", "source is a directory"));
                }
            }
        }

        for source in &sources {
            self.nodes.remove(source);
        }
        if req.get_param("deleteSourceDirectory") == Some("true") {
            let dir = parent_of(&sources[0]);
            if !dir.is_empty() && !(dst == dir || dst.starts_with(&format!("{dir}/"))) {
                self.remove_tree(&dir);
            }
        }

        self.ensure_dirs(&parent_of(&dst))?;
        let tick = self.next_tick();
        self.nodes.insert(dst, Node::new(Some(merged), tick));
        Ok(RestResponse::empty())
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn parent_of(path: &str) -> String {
    path.rsplit_once('/')
        .map(|(parent, _)| parent.to_string())
        .unwrap_or_default()
}

fn suffix_of(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

fn split_acl(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

/// `[default:]scope:id` part of an ACL entry.
fn acl_key(entry: &str) -> String {
    let parts: Vec<&str> = entry.split(':').collect();
    let take = if parts.first() == Some(&"default") { 3 } else { 2 };
    parts.into_iter().take(take).collect::<Vec<_>>().join(":")
}

fn boolean(value: bool) -> Result<RestResponse, RestError> {
    RestResponse::json_body(&BooleanResponse { boolean: value })
}

fn remote_error(path: &str, status: u16, exception: &str, message: &str) -> RestError {
    let body = serde_json::to_vec(&RemoteExceptionResponse {
        remote_exception: RemoteException {
            exception: exception.to_string(),
            message: message.to_string(),
            java_class_name: String::new(),
        },
    })
    .unwrap_or_default();
    RestError::from_response(path, status, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn list(t: &MemoryTransport, path: &str, size: usize, after: &str) -> FileStatuses {
        let mut req = RestRequest::new(Operation::ListStatus, path).param("listSize", size);
        if !after.is_empty() {
            req = req.param("listAfter", after);
        }
        let resp = t.call(req).await.unwrap();
        resp.json::<ListStatusResponse>().unwrap().file_statuses
    }

    #[tokio::test]
    async fn list_status_pages_with_continuation_token() {
        let t = MemoryTransport::new();
        for name in ["a", "b", "c", "d", "e"] {
            t.put_file(&format!("dir/{name}"), vec![0u8; 3]);
        }
        t.mkdir("dir/sub");

        let first = list(&t, "dir", 4, "").await;
        let names: Vec<_> = first.file_status.iter().map(|s| s.path_suffix.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
        assert_eq!(first.continuation_token, "d");

        let second = list(&t, "dir", 4, &first.continuation_token).await;
        let names: Vec<_> = second.file_status.iter().map(|s| s.path_suffix.as_str()).collect();
        assert_eq!(names, ["e", "sub"]);
        assert!(second.continuation_token.is_empty());
        assert_eq!(second.file_status[1].entry_type, "DIRECTORY");
    }

    #[tokio::test]
    async fn list_status_on_file_returns_single_entry() {
        let t = MemoryTransport::new();
        t.put_file("f.txt", b"hello".to_vec());
        let page = list(&t, "f.txt", 10, "").await;
        assert_eq!(page.file_status.len(), 1);
        assert_eq!(page.file_status[0].path_suffix, "");
        assert_eq!(page.file_status[0].length, 5);
    }

    #[tokio::test]
    async fn append_checks_offset() {
        let t = MemoryTransport::new();
        t.put_file("f", b"abc".to_vec());

        let bad = RestRequest::new(Operation::Append, "f")
            .param("offset", 1)
            .body(b"x".to_vec());
        assert!(matches!(t.call(bad).await, Err(RestError::BadOffset { .. })));

        let good = RestRequest::new(Operation::Append, "f")
            .param("offset", 3)
            .body(b"de".to_vec());
        t.call(good).await.unwrap();
        assert_eq!(t.file("f").unwrap(), b"abcde");
    }

    #[tokio::test]
    async fn lost_append_is_applied_but_reported_as_transport_error() {
        let t = MemoryTransport::new();
        t.put_file("f", Vec::new());
        t.lose_append_responses(1);

        let req = RestRequest::new(Operation::Append, "f")
            .param("offset", 0)
            .body(b"data".to_vec());
        let err = t.call(req).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(t.file("f").unwrap(), b"data");
    }

    #[tokio::test]
    async fn open_honours_range_and_read_cap() {
        let t = MemoryTransport::new();
        t.put_file("f", b"0123456789".to_vec());

        let req = RestRequest::new(Operation::Open, "f")
            .param("offset", 2)
            .param("length", 5);
        assert_eq!(t.call(req.clone()).await.unwrap().body, b"23456");

        t.set_read_cap(Some(2));
        assert_eq!(t.call(req).await.unwrap().body, b"23");
    }

    #[tokio::test]
    async fn concat_merges_and_removes_source_directory() {
        let t = MemoryTransport::new();
        t.put_file("out.tmp/out_0", b"abc".to_vec());
        t.put_file("out.tmp/out_3", b"def".to_vec());

        let body = serde_json::to_vec(&ConcatSources {
            sources: vec!["/out.tmp/out_0".into(), "/out.tmp/out_3".into()],
        })
        .unwrap();
        let req = RestRequest::new(Operation::MsConcat, "out")
            .param("deleteSourceDirectory", "true")
            .body(body);
        t.call(req).await.unwrap();

        assert_eq!(t.file("out").unwrap(), b"abcdef");
        assert!(!t.exists("out.tmp"));
    }

    #[tokio::test]
    async fn rename_moves_subtree_and_refuses_existing_destination() {
        let t = MemoryTransport::new();
        t.put_file("a/x", b"1".to_vec());
        t.put_file("a/y/z", b"2".to_vec());
        t.put_file("c", b"3".to_vec());

        let req = RestRequest::new(Operation::Rename, "a").param("destination", "/b");
        let resp = t.call(req).await.unwrap();
        resp.ensure_success(Operation::Rename, "a").unwrap();
        assert_eq!(t.paths(), ["b", "b/x", "b/y", "b/y/z", "c"]);

        let clash = RestRequest::new(Operation::Rename, "b").param("destination", "c");
        let resp = t.call(clash).await.unwrap();
        assert!(resp.ensure_success(Operation::Rename, "b").is_err());
    }

    #[tokio::test]
    async fn delete_requires_recursive_for_non_empty_dir() {
        let t = MemoryTransport::new();
        t.put_file("d/f", b"1".to_vec());

        let plain = RestRequest::new(Operation::Delete, "d");
        assert!(t.call(plain).await.is_err());

        let recursive = RestRequest::new(Operation::Delete, "d").param("recursive", "true");
        t.call(recursive).await.unwrap();
        assert!(t.paths().is_empty());
    }

    #[tokio::test]
    async fn acl_entries_modify_and_remove() {
        let t = MemoryTransport::new();
        t.put_file("f", Vec::new());

        let set = RestRequest::new(Operation::SetAcl, "f").param("aclSpec", "user:bob:r--,default:user:bob:rwx");
        t.call(set).await.unwrap();
        let modify = RestRequest::new(Operation::ModifyAclEntries, "f").param("aclSpec", "user:bob:rwx");
        t.call(modify).await.unwrap();
        let remove = RestRequest::new(Operation::RemoveAclEntries, "f").param("aclSpec", "default:user:bob");
        t.call(remove).await.unwrap();

        let resp = t.call(RestRequest::new(Operation::MsGetAclStatus, "f")).await.unwrap();
        let status: AclStatusResponse = resp.json().unwrap();
        assert_eq!(status.acl_status.entries, vec!["user:bob:rwx"]);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let t = MemoryTransport::new();
        t.put_file("f", b"x".to_vec());
        t.fail_next(Operation::GetFileStatus, Fault::Unavailable, 2);

        let req = RestRequest::new(Operation::GetFileStatus, "f");
        assert!(t.call(req.clone()).await.unwrap_err().is_transient());
        assert!(t.call(req.clone()).await.unwrap_err().is_transient());
        assert!(t.call(req).await.is_ok());
        assert_eq!(t.call_count(Operation::GetFileStatus), 3);
    }

    #[tokio::test]
    async fn create_without_overwrite_refuses_existing_file() {
        let t = MemoryTransport::new();
        t.put_file("f", b"old".to_vec());

        let req = RestRequest::new(Operation::Create, "f")
            .param("overwrite", "false")
            .body(b"new".to_vec());
        assert!(matches!(
            t.call(req).await,
            Err(RestError::PermissionDenied { .. })
        ));

        let req = RestRequest::new(Operation::Create, "g/h")
            .param("overwrite", "true")
            .body(b"new".to_vec());
        t.call(req).await.unwrap();
        assert!(t.is_dir("g"));
        assert_eq!(t.file("g/h").unwrap(), b"new");
    }
}
