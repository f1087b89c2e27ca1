//! Namespace fixtures: a RON description of buckets and objects loaded into
//! a [`MemoryGateway`].
//!
//! ```ron
//! (
//!     user: Some((id: "alice", secret: "s3cret")),
//!     objects: [
//!         (path: "/photos/cat.jpg", size: 1000, uid: 1000, gid: 1000, mtime: 1700000000),
//!         (path: "/photos/2024", kind: Dir),
//!     ],
//! )
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use rgwfs::{MemoryGateway, ObjectStat, RawTime};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub enum Kind {
    #[default]
    File,
    Dir,
    Symlink,
}

#[derive(Debug, Deserialize)]
pub struct FixtureUser {
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct FixtureObject {
    pub path: String,
    #[serde(default)]
    pub kind: Kind,
    #[serde(default)]
    pub size: i64,
    pub perm: Option<u32>,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    /// Seconds since the epoch, applied to all three timestamps.
    #[serde(default)]
    pub mtime: i64,
}

impl FixtureObject {
    fn stat(&self) -> ObjectStat {
        let stat = match self.kind {
            Kind::File => ObjectStat::file(self.size, self.perm.unwrap_or(0o644)),
            Kind::Dir => ObjectStat::directory(self.perm.unwrap_or(0o755)),
            Kind::Symlink => ObjectStat::symlink(self.size),
        };
        stat.with_owner(self.uid, self.gid)
            .with_times(RawTime::new(self.mtime, 0))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub user: Option<FixtureUser>,
    #[serde(default)]
    pub objects: Vec<FixtureObject>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        ron::from_str(&text).with_context(|| format!("parsing fixture {}", path.display()))
    }

    /// A gateway populated with the fixture's objects.
    pub fn build(&self) -> MemoryGateway {
        let mut gateway = MemoryGateway::new();
        if let Some(user) = &self.user {
            gateway = gateway.with_user(user.id.clone(), user.secret.clone());
        }
        for object in &self.objects {
            gateway.insert(&object.path, object.stat());
        }
        tracing::debug!(objects = self.objects.len(), "fixture loaded");
        gateway
    }
}
