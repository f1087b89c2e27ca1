//! Wire form of a handle.
//!
//! The file-sharing server embeds these bytes in its opaque file handle and
//! hands them back on later requests. The encoding is `postcard` over
//! [`WireHandle`], versioned and bounded by [`MAX_WIRE_LEN`].

use serde::{Deserialize, Serialize};

use crate::client::ObjectKey;
use crate::error::{FsalResult, FsalStatus};

/// Current encoding version.
pub const WIRE_VERSION: u8 = 1;

/// Largest encoding the server's file handle has room for.
pub const MAX_WIRE_LEN: usize = 64;

/// Identity of one handle, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WireHandle {
    pub version: u8,
    /// Identifier of the handle within its export.
    pub id: u64,
    /// The object store's key for the object.
    pub key: ObjectKey,
}

impl WireHandle {
    pub fn new(id: u64, key: ObjectKey) -> Self {
        Self {
            version: WIRE_VERSION,
            id,
            key,
        }
    }

    /// Encode for embedding in a server file handle.
    pub fn encode(&self) -> FsalResult<Vec<u8>> {
        let bytes = postcard::to_stdvec(self).map_err(|e| {
            tracing::warn!(error = %e, "failed to encode wire handle");
            FsalStatus::bad_handle()
        })?;
        if bytes.len() > MAX_WIRE_LEN {
            return Err(FsalStatus::bad_handle());
        }
        Ok(bytes)
    }

    /// Decode and validate bytes produced by [`WireHandle::encode`].
    pub fn decode(bytes: &[u8]) -> FsalResult<Self> {
        if bytes.is_empty() || bytes.len() > MAX_WIRE_LEN {
            return Err(FsalStatus::bad_handle());
        }
        let (handle, rest): (WireHandle, &[u8]) =
            postcard::take_from_bytes(bytes).map_err(|_| FsalStatus::bad_handle())?;
        if !rest.is_empty() || handle.version != WIRE_VERSION {
            return Err(FsalStatus::bad_handle());
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;

    #[test]
    fn test_encoding_fits_and_decodes() {
        let handle = WireHandle::new(u64::MAX, ObjectKey::new(u64::MAX, u64::MAX));
        let bytes = handle.encode().unwrap();
        assert!(bytes.len() <= MAX_WIRE_LEN);
        assert_eq!(WireHandle::decode(&bytes).unwrap(), handle);
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(WireHandle::decode(&[]).unwrap_err().major, StatusCode::BadHandle);
        assert_eq!(WireHandle::decode(&[0xff; 3]).unwrap_err().major, StatusCode::BadHandle);
        assert_eq!(WireHandle::decode(&[0u8; 65]).unwrap_err().major, StatusCode::BadHandle);
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = WireHandle::new(7, ObjectKey::new(1, 2)).encode().unwrap();
        bytes.push(0);
        assert!(WireHandle::decode(&bytes).is_err());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut handle = WireHandle::new(7, ObjectKey::new(1, 2));
        handle.version = WIRE_VERSION + 1;
        let bytes = postcard::to_stdvec(&handle).unwrap();
        assert!(WireHandle::decode(&bytes).is_err());
    }
}
