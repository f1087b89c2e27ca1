//! Object-store collaborator seam.
//!
//! The core never talks to the object gateway directly. It calls through
//! [`RgwClient`] to open a connection and through [`RgwConnection`] for
//! everything after that. Failures come back as [`BackendCode`]s tagged
//! with the code space that produced them; translation happens in the core.
//!
//! [`MemoryGateway`] is an in-memory implementation for tests and for the
//! inspection tool.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ExportParams;
use crate::error::BackendCode;

pub use memory::{MemoryConnection, MemoryGateway};

/// Result type for collaborator calls.
pub type BackendResult<T> = Result<T, BackendCode>;

/// The object store's address of one object on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Hash of the bucket holding the object.
    pub bucket: u64,
    /// Hash of the object within its bucket.
    pub object: u64,
}

impl ObjectKey {
    pub fn new(bucket: u64, object: u64) -> Self {
        Self { bucket, object }
    }
}

/// Seconds and nanoseconds since the Unix epoch, as the store reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawTime {
    pub sec: i64,
    pub nsec: i64,
}

impl RawTime {
    pub fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }
}

/// Stat-like metadata for one object.
///
/// Field widths follow the platform `stat` record; the attribute translator
/// is responsible for narrowing them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStat {
    pub dev: u64,
    pub ino: u64,
    /// Type and permission bits.
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    /// Allocated 512-byte blocks.
    pub blocks: i64,
    pub atime: RawTime,
    pub mtime: RawTime,
    pub ctime: RawTime,
}

impl ObjectStat {
    /// Metadata for a regular file.
    pub fn file(size: i64, perm: u32) -> Self {
        Self {
            mode: libc::S_IFREG as u32 | (perm & 0o7777),
            nlink: 1,
            size,
            blocks: (size + 511) / 512,
            ..Default::default()
        }
    }

    /// Metadata for a directory.
    pub fn directory(perm: u32) -> Self {
        Self {
            mode: libc::S_IFDIR as u32 | (perm & 0o7777),
            nlink: 2,
            size: 4096,
            blocks: 8,
            ..Default::default()
        }
    }

    /// Metadata for a symbolic link.
    pub fn symlink(target_len: i64) -> Self {
        Self {
            mode: libc::S_IFLNK as u32 | 0o777,
            nlink: 1,
            size: target_len,
            ..Default::default()
        }
    }

    pub fn with_ino(mut self, ino: u64) -> Self {
        self.ino = ino;
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Set all three timestamps.
    pub fn with_times(mut self, time: RawTime) -> Self {
        self.atime = time;
        self.mtime = time;
        self.ctime = time;
        self
    }

    pub fn with_mtime(mut self, mtime: RawTime) -> Self {
        self.mtime = mtime;
        self
    }
}

/// One entry returned by [`RgwConnection::readdir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDirEntry {
    pub name: String,
    /// Resume point: passing it back continues after this entry.
    pub cookie: u64,
}

/// Filesystem statistics as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawStatFs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
}

/// Opens connection contexts to the object-store cluster.
#[async_trait]
pub trait RgwClient: Send + Sync {
    /// Open a connection as the given user.
    ///
    /// Reports gateway-space codes on failure.
    async fn mount(&self, params: &ExportParams) -> BackendResult<Arc<dyn RgwConnection>>;
}

/// One open connection context.
///
/// Implementations must tolerate concurrent independent calls.
#[async_trait]
pub trait RgwConnection: Send + Sync {
    /// Look up the root of the namespace.
    async fn lookup_root(&self) -> BackendResult<(ObjectKey, ObjectStat)>;

    /// Look up `name` inside the directory `parent`.
    async fn lookup(&self, parent: ObjectKey, name: &str) -> BackendResult<(ObjectKey, ObjectStat)>;

    /// Stat an object by key.
    async fn stat(&self, key: ObjectKey) -> BackendResult<ObjectStat>;

    /// List `dir`, resuming after `whence` (0 starts from the beginning).
    async fn readdir(&self, dir: ObjectKey, whence: u64) -> BackendResult<Vec<RawDirEntry>>;

    /// Filesystem statistics for the namespace containing `key`.
    async fn statfs(&self, key: ObjectKey) -> BackendResult<RawStatFs>;

    /// Drop the store's reference on `key`. Never blocks.
    fn release(&self, key: ObjectKey);

    /// Close the connection. Reports gateway-space codes on failure.
    async fn umount(&self) -> BackendResult<()>;
}
