//! # rgwfs
//!
//! Object gateway backend for a file-system abstraction layer.
//!
//! A file-sharing server reaches objects in an object store through this
//! crate. The core pieces:
//! - [`RgwModule`] binds a [`ModuleConfig`] to an object-store client
//! - [`RgwExport`] is one mounted namespace, owning its connection and root
//! - [`RgwHandle`] stands for one object inside an export
//! - [`FsalStatus`] is the status every operation reports, translated from
//!   the store's POSIX codes
//! - [`AttrList`] is the attribute record translated from raw metadata
//!
//! The object store sits behind [`RgwClient`] / [`RgwConnection`];
//! [`MemoryGateway`] is an in-memory implementation.

pub mod attrs;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod handle;
pub mod module;
pub mod upcall;
pub mod wire;

pub use attrs::{AttrList, AttrMask, ObjectType};
pub use client::{
    BackendResult, MemoryConnection, MemoryGateway, ObjectKey, ObjectStat, RawDirEntry, RawStatFs,
    RawTime, RgwClient, RgwConnection,
};
pub use config::{
    ConfigError, ExportParams, GatewayConfig, ModuleConfig, StaticFsInfo, BIGGEST_PATTERN,
    MAX_IO_SIZE, SETTABLE_ATTRIBUTES, SUPPORTED_ATTRIBUTES,
};
pub use error::{BackendCode, FsalResult, FsalStatus, StatusCode};
pub use export::{DynamicFsInfo, HandleIdAllocator, RgwExport};
pub use handle::{OpenFlags, ReaddirEntry, RgwHandle};
pub use module::RgwModule;
pub use upcall::{NoopUpcall, UpcallOps};
pub use wire::{MAX_WIRE_LEN, WIRE_VERSION, WireHandle};
