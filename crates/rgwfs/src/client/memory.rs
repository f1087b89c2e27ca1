//! In-memory object gateway.
//!
//! Holds a namespace of buckets (the top-level directories) and objects in
//! memory. Every [`MemoryConnection`] mounted from one [`MemoryGateway`]
//! sees the same namespace, so tests can mutate objects under a live export.
//! Failures can be injected per operation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{BackendResult, ObjectKey, ObjectStat, RawDirEntry, RawStatFs, RgwClient, RgwConnection};
use crate::attrs::ObjectType;
use crate::config::ExportParams;
use crate::error::BackendCode;

const ROOT: ObjectKey = ObjectKey { bucket: 0, object: 0 };
const BLOCK_SIZE: u64 = 4096;
const TOTAL_BLOCKS: u64 = 1 << 20;
const TOTAL_FILES: u64 = 1 << 20;

#[derive(Debug)]
struct Node {
    stat: ObjectStat,
    children: BTreeMap<String, ObjectKey>,
}

impl Node {
    fn new(stat: ObjectStat) -> Self {
        Self {
            stat,
            children: BTreeMap::new(),
        }
    }

    fn is_dir(&self) -> bool {
        ObjectType::from_mode(self.stat.mode).is_some_and(ObjectType::is_dir)
    }
}

#[derive(Debug, Default)]
struct Failures {
    mount: Option<i32>,
    root_lookup: Option<i32>,
    umount: Option<i32>,
}

#[derive(Debug)]
struct GatewayState {
    nodes: RwLock<HashMap<ObjectKey, Node>>,
    next_ino: AtomicU64,
    users: RwLock<HashMap<String, String>>,
    failures: Mutex<Failures>,
    mounts: AtomicUsize,
    open_connections: AtomicUsize,
    released: Mutex<Vec<ObjectKey>>,
}

/// In-memory [`RgwClient`].
///
/// Cloning shares the namespace.
#[derive(Debug, Clone)]
pub struct MemoryGateway {
    state: Arc<GatewayState>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// A gateway holding only the root directory. Any user may mount.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT, Node::new(ObjectStat::directory(0o755).with_ino(1)));
        Self {
            state: Arc::new(GatewayState {
                nodes: RwLock::new(nodes),
                next_ino: AtomicU64::new(2),
                users: RwLock::new(HashMap::new()),
                failures: Mutex::new(Failures::default()),
                mounts: AtomicUsize::new(0),
                open_connections: AtomicUsize::new(0),
                released: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Require credentials. Once any user is registered, mounts by other
    /// users or with a wrong secret fail with `EACCES`.
    pub fn with_user(self, user_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.state.users.write().insert(user_id.into(), secret.into());
        self
    }

    pub fn root_key(&self) -> ObjectKey {
        ROOT
    }

    /// Replace the root's mode bits.
    pub fn set_root_mode(&self, mode: u32) {
        if let Some(root) = self.state.nodes.write().get_mut(&ROOT) {
            root.stat.mode = mode;
        }
    }

    pub fn add_file(&self, path: &str, size: i64, perm: u32) -> ObjectKey {
        self.insert(path, ObjectStat::file(size, perm))
    }

    pub fn add_dir(&self, path: &str, perm: u32) -> ObjectKey {
        self.insert(path, ObjectStat::directory(perm))
    }

    /// Insert or replace the object at `path`, creating missing parent
    /// directories. A zero inode number is replaced with a fresh one.
    pub fn insert(&self, path: &str, stat: ObjectStat) -> ObjectKey {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let Some((last, parents)) = components.split_last() else {
            return ROOT;
        };

        let mut nodes = self.state.nodes.write();
        let mut parent = ROOT;
        for name in parents {
            parent = self.child_or_create(&mut nodes, parent, name, ObjectStat::directory(0o755));
        }

        let existing = nodes.get(&parent).and_then(|n| n.children.get(*last)).copied();
        match existing {
            Some(key) => {
                if let Some(node) = nodes.get_mut(&key) {
                    let ino = node.stat.ino;
                    node.stat = stat;
                    if node.stat.ino == 0 {
                        node.stat.ino = ino;
                    }
                }
                key
            }
            None => self.child_or_create(&mut nodes, parent, last, stat),
        }
    }

    fn child_or_create(
        &self,
        nodes: &mut HashMap<ObjectKey, Node>,
        parent: ObjectKey,
        name: &str,
        mut stat: ObjectStat,
    ) -> ObjectKey {
        if let Some(key) = nodes.get(&parent).and_then(|n| n.children.get(name)) {
            return *key;
        }

        let ino = self.state.next_ino.fetch_add(1, Ordering::Relaxed);
        if stat.ino == 0 {
            stat.ino = ino;
        }
        // Top-level directories are buckets and key their own contents.
        let key = if parent == ROOT {
            ObjectKey::new(ino, 0)
        } else {
            ObjectKey::new(parent.bucket, ino)
        };

        nodes.insert(key, Node::new(stat));
        if let Some(parent) = nodes.get_mut(&parent) {
            parent.children.insert(name.to_owned(), key);
        }
        key
    }

    /// Replace the metadata of an existing object. Returns false when the
    /// key is unknown.
    pub fn set_stat(&self, key: ObjectKey, stat: ObjectStat) -> bool {
        match self.state.nodes.write().get_mut(&key) {
            Some(node) => {
                let ino = node.stat.ino;
                node.stat = stat;
                if node.stat.ino == 0 {
                    node.stat.ino = ino;
                }
                true
            }
            None => false,
        }
    }

    /// Remove the object at `path` and everything beneath it.
    pub fn remove(&self, path: &str) -> bool {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let Some((last, parents)) = components.split_last() else {
            return false;
        };

        let mut nodes = self.state.nodes.write();
        let mut parent = ROOT;
        for name in parents {
            match nodes.get(&parent).and_then(|n| n.children.get(*name)) {
                Some(key) => parent = *key,
                None => return false,
            }
        }

        let Some(key) = nodes.get_mut(&parent).and_then(|n| n.children.remove(*last)) else {
            return false;
        };
        let mut doomed = vec![key];
        while let Some(key) = doomed.pop() {
            if let Some(node) = nodes.remove(&key) {
                doomed.extend(node.children.into_values());
            }
        }
        true
    }

    /// Fail the next mounts with a gateway-space code.
    pub fn fail_mount(&self, code: i32) {
        self.state.failures.lock().mount = Some(code);
    }

    /// Fail root lookups with a raw-space code.
    pub fn fail_root_lookup(&self, code: i32) {
        self.state.failures.lock().root_lookup = Some(code);
    }

    /// Fail unmounts with a gateway-space code.
    pub fn fail_umount(&self, code: i32) {
        self.state.failures.lock().umount = Some(code);
    }

    pub fn clear_failures(&self) {
        *self.state.failures.lock() = Failures::default();
    }

    /// Successful mounts so far.
    pub fn mounts(&self) -> usize {
        self.state.mounts.load(Ordering::Acquire)
    }

    /// Connections mounted and not yet unmounted.
    pub fn open_connections(&self) -> usize {
        self.state.open_connections.load(Ordering::Acquire)
    }

    /// Keys whose references were dropped through [`RgwConnection::release`],
    /// in order.
    pub fn released_keys(&self) -> Vec<ObjectKey> {
        self.state.released.lock().clone()
    }

    fn authorize(&self, params: &ExportParams) -> BackendResult<()> {
        let users = self.state.users.read();
        if users.is_empty() {
            return Ok(());
        }
        match users.get(&params.user_id) {
            Some(secret) if *secret == params.secret_access_key => Ok(()),
            _ => Err(BackendCode::Gateway(libc::EACCES)),
        }
    }
}

#[async_trait]
impl RgwClient for MemoryGateway {
    async fn mount(&self, params: &ExportParams) -> BackendResult<Arc<dyn RgwConnection>> {
        if let Some(code) = self.state.failures.lock().mount {
            return Err(BackendCode::Gateway(code));
        }
        self.authorize(params)?;

        self.state.mounts.fetch_add(1, Ordering::AcqRel);
        self.state.open_connections.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(user = %params.user_id, "memory gateway mounted");
        Ok(Arc::new(MemoryConnection {
            state: Arc::clone(&self.state),
            open: AtomicBool::new(true),
        }))
    }
}

/// A connection mounted from a [`MemoryGateway`].
#[derive(Debug)]
pub struct MemoryConnection {
    state: Arc<GatewayState>,
    open: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> BackendResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BackendCode::Raw(-libc::ESTALE))
        }
    }

    fn stat_of(&self, key: ObjectKey) -> BackendResult<ObjectStat> {
        self.ensure_open()?;
        self.state
            .nodes
            .read()
            .get(&key)
            .map(|n| n.stat.clone())
            .ok_or(BackendCode::Raw(-libc::ESTALE))
    }
}

#[async_trait]
impl RgwConnection for MemoryConnection {
    async fn lookup_root(&self) -> BackendResult<(ObjectKey, ObjectStat)> {
        if let Some(code) = self.state.failures.lock().root_lookup {
            return Err(BackendCode::Raw(code));
        }
        Ok((ROOT, self.stat_of(ROOT)?))
    }

    async fn lookup(&self, parent: ObjectKey, name: &str) -> BackendResult<(ObjectKey, ObjectStat)> {
        self.ensure_open()?;
        let nodes = self.state.nodes.read();
        let dir = nodes.get(&parent).ok_or(BackendCode::Raw(-libc::ESTALE))?;
        if !dir.is_dir() {
            return Err(BackendCode::Raw(-libc::ENOTDIR));
        }
        let key = dir.children.get(name).ok_or(BackendCode::Raw(-libc::ENOENT))?;
        let node = nodes.get(key).ok_or(BackendCode::Raw(-libc::ENOENT))?;
        Ok((*key, node.stat.clone()))
    }

    async fn stat(&self, key: ObjectKey) -> BackendResult<ObjectStat> {
        self.stat_of(key)
    }

    async fn readdir(&self, dir: ObjectKey, whence: u64) -> BackendResult<Vec<RawDirEntry>> {
        self.ensure_open()?;
        let nodes = self.state.nodes.read();
        let node = nodes.get(&dir).ok_or(BackendCode::Raw(-libc::ESTALE))?;
        if !node.is_dir() {
            return Err(BackendCode::Raw(-libc::ENOTDIR));
        }

        let skip = usize::try_from(whence).unwrap_or(usize::MAX);
        Ok(node
            .children
            .keys()
            .enumerate()
            .skip(skip)
            .map(|(index, name)| RawDirEntry {
                name: name.clone(),
                cookie: index as u64 + 1,
            })
            .collect())
    }

    async fn statfs(&self, key: ObjectKey) -> BackendResult<RawStatFs> {
        self.stat_of(key)?;
        let nodes = self.state.nodes.read();
        let used_blocks: u64 = nodes
            .values()
            .map(|n| u64::try_from(n.stat.blocks).unwrap_or(0))
            .sum::<u64>()
            .div_ceil(BLOCK_SIZE / 512);
        let free = TOTAL_BLOCKS.saturating_sub(used_blocks);
        let free_files = TOTAL_FILES.saturating_sub(nodes.len() as u64);
        Ok(RawStatFs {
            bsize: BLOCK_SIZE,
            frsize: BLOCK_SIZE,
            blocks: TOTAL_BLOCKS,
            bfree: free,
            bavail: free,
            files: TOTAL_FILES,
            ffree: free_files,
            favail: free_files,
        })
    }

    fn release(&self, key: ObjectKey) {
        self.state.released.lock().push(key);
    }

    async fn umount(&self) -> BackendResult<()> {
        if let Some(code) = self.state.failures.lock().umount {
            return Err(BackendCode::Gateway(code));
        }
        if self.open.swap(false, Ordering::AcqRel) {
            self.state.open_connections.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }
}
