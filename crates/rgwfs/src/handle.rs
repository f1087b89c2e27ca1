//! Object handles.
//!
//! A [`RgwHandle`] stands for one storage object inside one export. Handles
//! are shared (`Arc`) between the server's request workers; the last
//! reference to go away destroys the handle. The handle only holds weak
//! references back to its export and to the upcall notifier, so an export
//! can be torn down while handles are still referenced: those handles then
//! fail every operation with `Stale`.
//!
//! Identifiers are allocated by the export ([`RgwExport::allocate_id`]) and
//! are unique within it for as long as the export lives.

use std::sync::{Arc, Weak};

use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};

use crate::attrs::{AttrList, ObjectType};
use crate::client::{ObjectKey, ObjectStat};
use crate::error::{FsalResult, FsalStatus, StatusCode};
use crate::export::RgwExport;
use crate::upcall::UpcallOps;
use crate::wire::WireHandle;

bitflags! {
    /// Open state of a handle. Empty means closed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const RDWR = Self::READ.bits() | Self::WRITE.bits();
        const TRUNCATE = 1 << 2;
    }
}

/// One entry produced by [`RgwHandle::readdir`].
#[derive(Debug)]
pub struct ReaddirEntry {
    pub name: String,
    /// Pass back as `whence` to continue after this entry.
    pub cookie: u64,
    pub handle: Arc<RgwHandle>,
}

/// In-process representative of one storage object.
#[derive(Debug)]
pub struct RgwHandle {
    id: u64,
    key: ObjectKey,
    object_type: ObjectType,
    openable: bool,
    open_state: Mutex<OpenFlags>,
    attrs: RwLock<AttrList>,
    export: Weak<RgwExport>,
    upcall: Weak<dyn UpcallOps>,
}

impl RgwHandle {
    /// Build a handle for the object described by `stat`.
    ///
    /// `id` must come from `export`'s allocator. Fails with
    /// `InvalidArgument` when the mode's type bits are not recognized.
    /// Performs no I/O.
    pub fn construct(
        stat: &ObjectStat,
        id: u64,
        key: ObjectKey,
        export: &Arc<RgwExport>,
    ) -> FsalResult<Arc<Self>> {
        let Some(object_type) = ObjectType::from_mode(stat.mode) else {
            tracing::debug!(id, ?key, mode = %format!("{:o}", stat.mode), "unrecognized object type");
            return Err(FsalStatus::invalid_argument());
        };

        let handle = Arc::new(Self {
            id,
            key,
            object_type,
            openable: object_type.is_openable(),
            open_state: Mutex::new(OpenFlags::empty()),
            attrs: RwLock::new(export.config().translate_attributes(stat)),
            export: Arc::downgrade(export),
            upcall: Arc::downgrade(export.upcall()),
        });
        export.register(&handle);

        tracing::trace!(id, ?key, %object_type, "constructed handle");
        Ok(handle)
    }

    /// Destroy the handle if `self` is the last reference.
    ///
    /// When other references remain the handle is left alive and the
    /// caller's reference is handed back.
    pub fn destroy(self: Arc<Self>) -> Result<(), Arc<Self>> {
        let handle = Arc::try_unwrap(self)?;
        drop(handle);
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> ObjectKey {
        self.key
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn is_openable(&self) -> bool {
        self.openable
    }

    /// The owning export, or `Stale` once it is released or gone.
    pub fn export(&self) -> FsalResult<Arc<RgwExport>> {
        match self.export.upgrade() {
            Some(export) if !export.is_released() => Ok(export),
            _ => Err(FsalStatus::stale()),
        }
    }

    /// Whether this handle belongs to `export`.
    pub fn belongs_to(&self, export: &Arc<RgwExport>) -> bool {
        std::ptr::eq(self.export.as_ptr(), Arc::as_ptr(export))
    }

    /// Attributes as of construction or the last [`getattrs`](Self::getattrs).
    pub fn cached_attributes(&self) -> AttrList {
        self.attrs.read().clone()
    }

    /// Refresh attributes from the object store.
    ///
    /// If they differ from the cached copy the server is told through the
    /// upcall notifier.
    #[tracing::instrument(skip(self), fields(handle = self.id))]
    pub async fn getattrs(&self) -> FsalResult<AttrList> {
        let export = self.export()?;
        let stat = export.connection().stat(self.key).await?;
        let fresh = export.config().translate_attributes(&stat);

        let changed = {
            let mut cached = self.attrs.write();
            if *cached == fresh {
                false
            } else {
                *cached = fresh.clone();
                true
            }
        };

        if changed {
            if let Some(upcall) = self.upcall.upgrade() {
                upcall.update(self.id, self.key, &fresh);
            }
        }
        Ok(fresh)
    }

    /// Look up `name` in this directory.
    #[tracing::instrument(skip(self), fields(handle = self.id))]
    pub async fn lookup(&self, name: &str) -> FsalResult<Arc<RgwHandle>> {
        let export = self.export()?;
        if !self.object_type.is_dir() {
            return Err(FsalStatus::from_major(StatusCode::NotDir));
        }
        validate_name(name, export.config().fs_info().max_name_len)?;

        let (key, stat) = export.connection().lookup(self.key, name).await?;
        let child = RgwHandle::construct(&stat, export.allocate_id(), key, &export)?;
        tracing::debug!(child = child.id, ?key, "lookup");
        Ok(child)
    }

    /// List this directory after the cookie `whence` (0 for the start).
    #[tracing::instrument(skip(self), fields(handle = self.id))]
    pub async fn readdir(&self, whence: u64) -> FsalResult<Vec<ReaddirEntry>> {
        let export = self.export()?;
        if !self.object_type.is_dir() {
            return Err(FsalStatus::from_major(StatusCode::NotDir));
        }

        let connection = export.connection();
        let raw = connection.readdir(self.key, whence).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for entry in raw {
            let (key, stat) = connection.lookup(self.key, &entry.name).await?;
            let handle = RgwHandle::construct(&stat, export.allocate_id(), key, &export)?;
            entries.push(ReaddirEntry {
                name: entry.name,
                cookie: entry.cookie,
                handle,
            });
        }
        Ok(entries)
    }

    /// Open the object. Only regular files can be opened, and only once
    /// until closed.
    pub fn open(&self, flags: OpenFlags) -> FsalResult<()> {
        self.export()?;
        if !self.openable {
            let major = if self.object_type.is_dir() {
                StatusCode::IsDir
            } else {
                StatusCode::InvalidArgument
            };
            return Err(FsalStatus::from_major(major));
        }
        if !flags.intersects(OpenFlags::RDWR) {
            return Err(FsalStatus::invalid_argument());
        }

        let mut state = self.open_state.lock();
        if !state.is_empty() {
            return Err(FsalStatus::from_major(StatusCode::FileOpen));
        }
        *state = flags;
        Ok(())
    }

    /// Close the object. Allowed after the export is released.
    pub fn close(&self) -> FsalResult<()> {
        let mut state = self.open_state.lock();
        if state.is_empty() {
            return Err(FsalStatus::from_major(StatusCode::NotOpened));
        }
        *state = OpenFlags::empty();
        Ok(())
    }

    pub fn open_flags(&self) -> OpenFlags {
        *self.open_state.lock()
    }

    pub fn is_open(&self) -> bool {
        !self.open_flags().is_empty()
    }

    pub fn wire_handle(&self) -> WireHandle {
        WireHandle::new(self.id, self.key)
    }

    /// Encoded [`WireHandle`] for the server's file handle.
    pub fn to_wire(&self) -> FsalResult<Vec<u8>> {
        self.wire_handle().encode()
    }
}

impl Drop for RgwHandle {
    fn drop(&mut self) {
        if let Some(export) = self.export.upgrade() {
            export.forget(self.id);
            if !export.is_released() {
                export.connection().release(self.key);
            }
        }
        tracing::trace!(id = self.id, "destroyed handle");
    }
}

fn validate_name(name: &str, max_name_len: u32) -> FsalResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsalStatus::invalid_argument());
    }
    if name.len() > max_name_len as usize {
        return Err(FsalStatus::from_major(StatusCode::NameTooLong));
    }
    Ok(())
}
