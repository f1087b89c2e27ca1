//! Exports: one mounted namespace each.
//!
//! [`RgwExport::create`] opens a connection, looks up the namespace root and
//! materializes the root handle. The export owns the connection, the root
//! handle, the identifier allocator and a registry of live handles. Handles
//! point back at it weakly.
//!
//! ```text
//! RgwExport
//! ├── connection: Arc<dyn RgwConnection>   (shared by all handles)
//! ├── root: OnceLock<Arc<RgwHandle>>       (set once during bootstrap)
//! ├── ids: HandleIdAllocator               (unique ids within the export)
//! └── handles: DashMap<id, Weak<RgwHandle>>
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use dashmap::DashMap;

use crate::attrs::AttrMask;
use crate::client::{RawStatFs, RgwClient, RgwConnection};
use crate::config::{ExportParams, ModuleConfig};
use crate::error::{FsalResult, FsalStatus, StatusCode, translate};
use crate::handle::RgwHandle;
use crate::upcall::UpcallOps;
use crate::wire::WireHandle;

/// Monotonic source of handle identifiers for one export.
#[derive(Debug)]
pub struct HandleIdAllocator {
    next: AtomicU64,
}

impl Default for HandleIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Next unused identifier. Never returns the same value twice.
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Filesystem usage, as reported to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DynamicFsInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub avail_bytes: u64,
    pub total_files: u64,
    pub free_files: u64,
    pub avail_files: u64,
    /// Granularity of timestamps.
    pub time_delta: Duration,
}

impl From<RawStatFs> for DynamicFsInfo {
    fn from(raw: RawStatFs) -> Self {
        let unit = if raw.frsize != 0 { raw.frsize } else { raw.bsize };
        Self {
            total_bytes: raw.blocks.saturating_mul(unit),
            free_bytes: raw.bfree.saturating_mul(unit),
            avail_bytes: raw.bavail.saturating_mul(unit),
            total_files: raw.files,
            free_files: raw.ffree,
            avail_files: raw.favail,
            time_delta: Duration::from_secs(1),
        }
    }
}

/// One mounted namespace.
///
/// Callers must [`release`](Self::release) an export before dropping it.
/// Dropping an export that is still mounted logs a warning and leaves the
/// connection to the client library.
pub struct RgwExport {
    config: Arc<ModuleConfig>,
    connection: Arc<dyn RgwConnection>,
    upcall: Arc<dyn UpcallOps>,
    user_id: String,
    root: OnceLock<Arc<RgwHandle>>,
    ids: HandleIdAllocator,
    handles: DashMap<u64, Weak<RgwHandle>>,
    released: AtomicBool,
    umounted: AtomicBool,
}

impl fmt::Debug for RgwExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RgwExport")
            .field("user_id", &self.user_id)
            .field("root", &self.root.get().map(|r| r.id()))
            .field("live_handles", &self.handles.len())
            .field("released", &self.is_released())
            .field("umounted", &self.umounted.load(Ordering::Acquire))
            .finish()
    }
}

impl RgwExport {
    /// Mount `params.user_id`'s namespace and materialize its root handle.
    ///
    /// Once the connection is open, any later failure closes it again before
    /// the failure is returned.
    #[tracing::instrument(skip_all, fields(user = %params.user_id))]
    pub async fn create(
        config: Arc<ModuleConfig>,
        client: &dyn RgwClient,
        params: &ExportParams,
        upcall: Arc<dyn UpcallOps>,
    ) -> FsalResult<Arc<Self>> {
        let connection = client.mount(params).await.map_err(|code| {
            let status = translate(code);
            tracing::warn!(%status, "mount failed");
            status
        })?;

        let (root_key, root_stat) = match connection.lookup_root().await {
            Ok(found) => found,
            Err(code) => {
                let status = translate(code);
                tracing::warn!(%status, "root lookup failed");
                abandon(connection.as_ref()).await;
                return Err(status);
            }
        };

        let export = Arc::new(Self {
            config,
            connection,
            upcall,
            user_id: params.user_id.clone(),
            root: OnceLock::new(),
            ids: HandleIdAllocator::new(),
            handles: DashMap::new(),
            released: AtomicBool::new(false),
            umounted: AtomicBool::new(false),
        });

        let root = match RgwHandle::construct(&root_stat, export.allocate_id(), root_key, &export) {
            Ok(root) => root,
            Err(status) => {
                tracing::warn!(%status, "root handle construction failed");
                export.released.store(true, Ordering::Release);
                abandon(export.connection.as_ref()).await;
                export.umounted.store(true, Ordering::Release);
                return Err(status);
            }
        };
        let root_id = root.id();
        // The export was created above, so the slot is still empty.
        let _ = export.root.set(root);

        tracing::info!(root = root_id, ?root_key, "export created");
        Ok(export)
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub(crate) fn connection(&self) -> &Arc<dyn RgwConnection> {
        &self.connection
    }

    pub(crate) fn upcall(&self) -> &Arc<dyn UpcallOps> {
        &self.upcall
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Reserve a fresh handle identifier.
    pub fn allocate_id(&self) -> u64 {
        self.ids.allocate()
    }

    /// Number of handles currently alive.
    pub fn live_handles(&self) -> usize {
        self.handles.len()
    }

    pub(crate) fn register(&self, handle: &Arc<RgwHandle>) {
        let previous = self.handles.insert(handle.id(), Arc::downgrade(handle));
        debug_assert!(
            previous.is_none_or(|p| p.strong_count() == 0),
            "handle id {} registered twice",
            handle.id()
        );
    }

    pub(crate) fn forget(&self, id: u64) {
        self.handles.remove_if(&id, |_, weak| weak.strong_count() == 0);
    }

    /// The root handle. `Stale` after release.
    pub fn root(&self) -> FsalResult<Arc<RgwHandle>> {
        if self.is_released() {
            return Err(FsalStatus::stale());
        }
        self.root.get().cloned().ok_or_else(FsalStatus::stale)
    }

    /// Resolve a `/`-separated path from the root.
    #[tracing::instrument(skip(self))]
    pub async fn lookup_path(&self, path: &str) -> FsalResult<Arc<RgwHandle>> {
        if path.len() > self.config.fs_info().max_path_len as usize {
            return Err(FsalStatus::from_major(StatusCode::NameTooLong));
        }

        let mut current = self.root()?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = current.lookup(component).await?;
        }
        Ok(current)
    }

    /// Validate bytes handed back by the server.
    pub fn wire_to_host(&self, bytes: &[u8]) -> FsalResult<WireHandle> {
        WireHandle::decode(bytes)
    }

    /// Resolve a wire handle to a live handle.
    ///
    /// The registered handle is reused when its key still matches; otherwise
    /// the object is looked up by key and a new handle is constructed.
    #[tracing::instrument(skip(self), fields(id = wire.id))]
    pub async fn create_handle(self: &Arc<Self>, wire: &WireHandle) -> FsalResult<Arc<RgwHandle>> {
        if self.is_released() {
            return Err(FsalStatus::stale());
        }

        let live = self.handles.get(&wire.id).and_then(|entry| entry.value().upgrade());
        if let Some(handle) = live {
            if handle.key() == wire.key {
                return Ok(handle);
            }
        }

        let stat = self.connection.stat(wire.key).await?;
        let handle = RgwHandle::construct(&stat, self.allocate_id(), wire.key, self)?;
        tracing::debug!(new_id = handle.id(), "reconstructed handle from wire");
        Ok(handle)
    }

    /// Current filesystem usage.
    pub async fn statfs(&self) -> FsalResult<DynamicFsInfo> {
        let root = self.root()?;
        let raw = self.connection.statfs(root.key()).await?;
        Ok(raw.into())
    }

    /// Reject a set-attributes request naming unsettable attributes.
    pub fn check_settable(&self, requested: AttrMask) -> FsalResult<()> {
        self.config.check_settable(requested)
    }

    /// Unmount. Live handles are invalidated through the upcall notifier and
    /// fail with `Stale` from now on. Once the connection is closed, further
    /// calls are no-ops; after a failed unmount the next call retries it.
    #[tracing::instrument(skip(self), fields(user = %self.user_id))]
    pub async fn release(&self) -> FsalResult<()> {
        if !self.released.swap(true, Ordering::AcqRel) {
            // Collect first: dropping an upgraded handle while a map guard is
            // held would re-enter the map from the handle's destructor.
            let live: Vec<Weak<RgwHandle>> = self.handles.iter().map(|e| e.value().clone()).collect();
            self.handles.clear();

            let mut invalidated = 0usize;
            for handle in live.iter().filter_map(Weak::upgrade) {
                self.upcall.invalidate(handle.id(), handle.key());
                invalidated += 1;
            }
            tracing::debug!(invalidated, "live handles invalidated");
        }

        if self.umounted.load(Ordering::Acquire) {
            return Ok(());
        }
        self.connection.umount().await.map_err(|code| {
            let status = translate(code);
            tracing::warn!(%status, "umount failed");
            status
        })?;
        self.umounted.store(true, Ordering::Release);

        tracing::info!("export released");
        Ok(())
    }
}

impl Drop for RgwExport {
    fn drop(&mut self) {
        if !self.umounted.load(Ordering::Acquire) {
            tracing::warn!(user = %self.user_id, "export dropped while mounted; connection left to the client");
        }
    }
}

/// Close a connection after a failed bootstrap, logging rather than
/// surfacing a failure to close.
async fn abandon(connection: &dyn RgwConnection) {
    if let Err(code) = connection.umount().await {
        tracing::warn!(status = %translate(code), "failed to close connection after bootstrap failure");
    }
}
