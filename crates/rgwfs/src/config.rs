//! Module configuration.
//!
//! One [`ModuleConfig`] is built at startup and shared by `Arc` with every
//! export. It never changes afterwards. Construction enforces
//! `settable ⊆ supported`, so every value of the type satisfies it.
//!
//! The on-disk form is RON; every section is optional:
//!
//! ```ron
//! (
//!     fs_info: (max_name_len: 255),
//!     supported: "TYPE | SIZE | MODE | OWNER | GROUP | MTIME",
//!     settable: "MODE | OWNER | GROUP",
//!     gateway: (cluster: Some("ceph")),
//! )
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attrs::{self, AttrList, AttrMask};
use crate::client::ObjectStat;
use crate::error::{FsalResult, FsalStatus, StatusCode};

/// Attributes the gateway backend can report.
pub const SUPPORTED_ATTRIBUTES: AttrMask = AttrMask::POSIX;

/// Attributes a client may ask to change.
pub const SETTABLE_ATTRIBUTES: AttrMask = AttrMask::MODE
    .union(AttrMask::OWNER)
    .union(AttrMask::GROUP)
    .union(AttrMask::ATIME)
    .union(AttrMask::MTIME)
    .union(AttrMask::SIZE);

/// Largest stripe pattern a layout may describe.
pub const BIGGEST_PATTERN: usize = 1024;

/// Largest single read or write, in bytes.
pub const MAX_IO_SIZE: u64 = 64 * 1024 * 1024;

/// Static filesystem capabilities reported to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticFsInfo {
    pub max_file_size: u64,
    pub max_link: u32,
    pub max_name_len: u32,
    pub max_path_len: u32,
    pub no_trunc: bool,
    pub chown_restricted: bool,
    pub case_insensitive: bool,
    pub case_preserving: bool,
    pub link_support: bool,
    pub symlink_support: bool,
    pub lock_support: bool,
    pub named_attr: bool,
    pub unique_handles: bool,
    pub cansettime: bool,
    pub homogenous: bool,
    pub acl_support: bool,
    pub umask: u32,
    pub lease_time_secs: u32,
    pub max_read: u64,
    pub max_write: u64,
    pub max_layout_stripes: usize,
}

impl Default for StaticFsInfo {
    fn default() -> Self {
        Self {
            max_file_size: u64::MAX,
            max_link: 8,
            max_name_len: 1024,
            max_path_len: 1024,
            no_trunc: true,
            chown_restricted: true,
            case_insensitive: false,
            case_preserving: true,
            link_support: false,
            symlink_support: false,
            lock_support: false,
            named_attr: true,
            unique_handles: true,
            cansettime: true,
            homogenous: true,
            acl_support: false,
            umask: 0,
            lease_time_secs: 10,
            max_read: MAX_IO_SIZE,
            max_write: MAX_IO_SIZE,
            max_layout_stripes: BIGGEST_PATTERN,
        }
    }
}

/// Parameters for initializing the gateway client library.
///
/// Not interpreted here; handed to whoever builds the [`RgwClient`].
///
/// [`RgwClient`]: crate::client::RgwClient
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Cluster configuration file.
    pub conf_path: Option<PathBuf>,
    /// Client name to authenticate as.
    pub name: Option<String>,
    pub cluster: Option<String>,
    /// Extra arguments passed through to the client library.
    pub init_args: Option<String>,
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    /// The settable mask names attributes that are not supported.
    #[error("settable attributes not supported: {0:?}")]
    SettableNotSupported(AttrMask),

    #[error("invalid fs info: {0}")]
    InvalidFsInfo(String),
}

/// On-disk shape, validated into a [`ModuleConfig`].
#[derive(Debug, Deserialize)]
#[serde(default)]
struct ModuleConfigFile {
    fs_info: StaticFsInfo,
    #[serde(with = "bitflags::serde")]
    supported: AttrMask,
    #[serde(with = "bitflags::serde")]
    settable: AttrMask,
    gateway: GatewayConfig,
}

impl Default for ModuleConfigFile {
    fn default() -> Self {
        Self {
            fs_info: StaticFsInfo::default(),
            supported: SUPPORTED_ATTRIBUTES,
            settable: SETTABLE_ATTRIBUTES,
            gateway: GatewayConfig::default(),
        }
    }
}

/// Process-wide capability and mask descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleConfig {
    fs_info: StaticFsInfo,
    supported: AttrMask,
    settable: AttrMask,
    gateway: GatewayConfig,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            fs_info: StaticFsInfo::default(),
            supported: SUPPORTED_ATTRIBUTES,
            settable: SETTABLE_ATTRIBUTES,
            gateway: GatewayConfig::default(),
        }
    }
}

impl ModuleConfig {
    /// Build a configuration, rejecting a settable mask that is not a subset
    /// of the supported mask.
    pub fn new(
        fs_info: StaticFsInfo,
        supported: AttrMask,
        settable: AttrMask,
        gateway: GatewayConfig,
    ) -> Result<Self, ConfigError> {
        let extra = settable.difference(supported);
        if !extra.is_empty() {
            return Err(ConfigError::SettableNotSupported(extra));
        }
        if fs_info.max_name_len == 0 || fs_info.max_path_len < fs_info.max_name_len {
            return Err(ConfigError::InvalidFsInfo(format!(
                "max_name_len {} / max_path_len {}",
                fs_info.max_name_len, fs_info.max_path_len
            )));
        }
        Ok(Self {
            fs_info,
            supported,
            settable,
            gateway,
        })
    }

    /// Parse a RON document.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let file: ModuleConfigFile = ron::from_str(text)?;
        Self::new(file.fs_info, file.supported, file.settable, file.gateway)
    }

    /// Read and parse a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_ron(&text)?;
        tracing::info!(path = %path.display(), supported = ?config.supported, "loaded module config");
        Ok(config)
    }

    pub fn fs_info(&self) -> &StaticFsInfo {
        &self.fs_info
    }

    pub fn supported(&self) -> AttrMask {
        self.supported
    }

    pub fn settable(&self) -> AttrMask {
        self.settable
    }

    pub fn gateway(&self) -> &GatewayConfig {
        &self.gateway
    }

    /// Reject a set-attributes request naming anything outside `settable`.
    pub fn check_settable(&self, requested: AttrMask) -> FsalResult<()> {
        if self.settable.contains(requested) {
            Ok(())
        } else {
            Err(FsalStatus::from_major(StatusCode::InvalidArgument))
        }
    }

    /// Translate raw metadata under this configuration's supported mask.
    pub fn translate_attributes(&self, stat: &ObjectStat) -> AttrList {
        attrs::translate(stat, self.supported)
    }
}

/// Credentials for one export.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportParams {
    pub user_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl ExportParams {
    pub fn new(
        user_id: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl fmt::Debug for ExportParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportParams")
            .field("user_id", &self.user_id)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settable_within_supported() {
        assert!((SETTABLE_ATTRIBUTES & !SUPPORTED_ATTRIBUTES).is_empty());
        let config = ModuleConfig::default();
        assert!((config.settable() & !config.supported()).is_empty());
        assert_eq!(config.fs_info().max_layout_stripes, BIGGEST_PATTERN);
    }

    #[test]
    fn test_settable_outside_supported_rejected() {
        let result = ModuleConfig::new(
            StaticFsInfo::default(),
            AttrMask::SIZE | AttrMask::MODE,
            AttrMask::MODE | AttrMask::OWNER,
            GatewayConfig::default(),
        );
        match result {
            Err(ConfigError::SettableNotSupported(extra)) => assert_eq!(extra, AttrMask::OWNER),
            other => panic!("expected SettableNotSupported, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_fs_info_rejected() {
        let fs_info = StaticFsInfo {
            max_name_len: 0,
            ..Default::default()
        };
        let result = ModuleConfig::new(fs_info, SUPPORTED_ATTRIBUTES, SETTABLE_ATTRIBUTES, GatewayConfig::default());
        assert!(matches!(result, Err(ConfigError::InvalidFsInfo(_))));
    }

    #[test]
    fn test_empty_ron_uses_defaults() {
        let config = ModuleConfig::from_ron("()").unwrap();
        assert_eq!(config, ModuleConfig::default());
    }

    #[test]
    fn test_ron_overrides() {
        let config = ModuleConfig::from_ron(
            r#"(
                fs_info: (max_name_len: 255, max_path_len: 4096),
                supported: "TYPE | SIZE | MODE | MTIME",
                settable: "MODE",
                gateway: (cluster: Some("ceph"), name: Some("client.admin")),
            )"#,
        )
        .unwrap();

        assert_eq!(config.fs_info().max_name_len, 255);
        assert_eq!(config.fs_info().max_path_len, 4096);
        assert!(config.fs_info().no_trunc);
        assert_eq!(config.supported(), AttrMask::TYPE | AttrMask::SIZE | AttrMask::MODE | AttrMask::MTIME);
        assert_eq!(config.settable(), AttrMask::MODE);
        assert_eq!(config.gateway().cluster.as_deref(), Some("ceph"));
    }

    #[test]
    fn test_ron_settable_outside_supported_rejected() {
        let result = ModuleConfig::from_ron(r#"(supported: "SIZE", settable: "SIZE | MODE")"#);
        assert!(matches!(result, Err(ConfigError::SettableNotSupported(_))));
    }

    #[test]
    fn test_module_doc_example_loads() {
        let config = ModuleConfig::from_ron(
            r#"(
                fs_info: (max_name_len: 255),
                supported: "TYPE | SIZE | MODE | OWNER | GROUP | MTIME",
                settable: "MODE | OWNER | GROUP",
                gateway: (cluster: Some("ceph")),
            )"#,
        )
        .unwrap();

        assert_eq!(config.fs_info().max_name_len, 255);
        assert_eq!(
            config.supported(),
            AttrMask::TYPE | AttrMask::SIZE | AttrMask::MODE | AttrMask::OWNER | AttrMask::GROUP | AttrMask::MTIME
        );
        assert_eq!(config.settable(), AttrMask::MODE | AttrMask::OWNER | AttrMask::GROUP);
        assert_eq!(config.gateway().cluster.as_deref(), Some("ceph"));
    }

    #[test]
    fn test_ron_mask_names_rejected_when_unknown() {
        let result = ModuleConfig::from_ron(r#"(supported: "SIZE | BOGUS")"#);
        assert!(matches!(result, Err(ConfigError::Ron(_))));
    }

    #[test]
    fn test_ron_syntax_error() {
        assert!(matches!(ModuleConfig::from_ron("(fs_info: "), Err(ConfigError::Ron(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgw.ron");
        std::fs::write(&path, r#"(settable: "MODE")"#).unwrap();

        let config = ModuleConfig::load(&path).unwrap();
        assert_eq!(config.settable(), AttrMask::MODE);
        assert_eq!(config.supported(), SUPPORTED_ATTRIBUTES);

        let missing = ModuleConfig::load(dir.path().join("missing.ron"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_check_settable() {
        let config = ModuleConfig::default();
        assert!(config.check_settable(AttrMask::MODE | AttrMask::SIZE).is_ok());
        let err = config.check_settable(AttrMask::FILEID).unwrap_err();
        assert_eq!(err.major, StatusCode::InvalidArgument);
    }

    #[test]
    fn test_export_params_debug_redacts_secret() {
        let params = ExportParams::new("alice", "AKIA", "hunter2");
        let debug = format!("{params:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }
}
