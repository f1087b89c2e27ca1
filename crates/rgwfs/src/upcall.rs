//! Backend-to-server notifications.
//!
//! Handles push cache invalidations and attribute refreshes through an
//! [`UpcallOps`] supplied by the file-sharing server when an export is
//! created. Handles hold it weakly; once the server drops its notifier,
//! notifications are skipped.

use crate::attrs::AttrList;
use crate::client::ObjectKey;

/// Callbacks into the file-sharing server's caches.
pub trait UpcallOps: Send + Sync {
    /// Cached state for the object is no longer valid.
    fn invalidate(&self, handle_id: u64, key: ObjectKey);

    /// The object's attributes changed to `attrs`.
    fn update(&self, handle_id: u64, key: ObjectKey, attrs: &AttrList);
}

/// Notifier that discards every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUpcall;

impl UpcallOps for NoopUpcall {
    fn invalidate(&self, _handle_id: u64, _key: ObjectKey) {}

    fn update(&self, _handle_id: u64, _key: ObjectKey, _attrs: &AttrList) {}
}
