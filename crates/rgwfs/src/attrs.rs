//! Attribute records and raw-metadata translation.
//!
//! [`translate`] turns an [`ObjectStat`] into an [`AttrList`] limited to a
//! supported mask. Fields outside the mask are never fabricated, and a field
//! whose source value does not fit is reported invalid on its own without
//! failing the rest of the record.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::client::{ObjectStat, RawTime};

bitflags! {
    /// Attribute selection mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AttrMask: u64 {
        const TYPE = 1 << 0;
        const SIZE = 1 << 1;
        const FSID = 1 << 2;
        const SPACEUSED = 1 << 3;
        const FILEID = 1 << 4;
        const MODE = 1 << 5;
        const NUMLINKS = 1 << 6;
        const OWNER = 1 << 7;
        const GROUP = 1 << 8;
        const RAWDEV = 1 << 9;
        const ATIME = 1 << 10;
        const MTIME = 1 << 11;
        const CTIME = 1 << 12;
        const CHGTIME = 1 << 13;
        const CHANGE = 1 << 14;

        /// Everything a POSIX stat can report.
        const POSIX = Self::TYPE.bits()
            | Self::SIZE.bits()
            | Self::FSID.bits()
            | Self::SPACEUSED.bits()
            | Self::FILEID.bits()
            | Self::MODE.bits()
            | Self::NUMLINKS.bits()
            | Self::OWNER.bits()
            | Self::GROUP.bits()
            | Self::RAWDEV.bits()
            | Self::ATIME.bits()
            | Self::MTIME.bits()
            | Self::CTIME.bits()
            | Self::CHGTIME.bits()
            | Self::CHANGE.bits();
    }
}

/// Object type, derived from the `S_IFMT` bits of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum ObjectType {
    RegularFile,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl ObjectType {
    /// Decode the type bits of `mode`. `None` for unrecognized types.
    pub fn from_mode(mode: u32) -> Option<Self> {
        let fmt = mode & libc::S_IFMT as u32;
        let kind = match fmt {
            f if f == libc::S_IFREG as u32 => ObjectType::RegularFile,
            f if f == libc::S_IFDIR as u32 => ObjectType::Directory,
            f if f == libc::S_IFLNK as u32 => ObjectType::Symlink,
            f if f == libc::S_IFCHR as u32 => ObjectType::CharDevice,
            f if f == libc::S_IFBLK as u32 => ObjectType::BlockDevice,
            f if f == libc::S_IFIFO as u32 => ObjectType::Fifo,
            f if f == libc::S_IFSOCK as u32 => ObjectType::Socket,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_dir(self) -> bool {
        matches!(self, ObjectType::Directory)
    }

    /// Only regular files can be opened for I/O.
    pub fn is_openable(self) -> bool {
        matches!(self, ObjectType::RegularFile)
    }
}

/// Translated attributes for one object.
///
/// A field is `Some` exactly when its bit is in [`AttrList::mask`]. Fields
/// that were requested but could not be represented have their bit in
/// [`AttrList::invalid`] instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrList {
    mask: AttrMask,
    invalid: AttrMask,
    object_type: Option<ObjectType>,
    size: Option<u64>,
    fsid: Option<u64>,
    space_used: Option<u64>,
    fileid: Option<u64>,
    mode: Option<u32>,
    numlinks: Option<u32>,
    owner: Option<u64>,
    group: Option<u64>,
    rawdev: Option<u64>,
    atime: Option<SystemTime>,
    mtime: Option<SystemTime>,
    ctime: Option<SystemTime>,
    chgtime: Option<SystemTime>,
    change: Option<u64>,
}

impl AttrList {
    /// Fields that carry a value.
    pub fn mask(&self) -> AttrMask {
        self.mask
    }

    /// Fields that were requested but could not be represented.
    pub fn invalid(&self) -> AttrMask {
        self.invalid
    }

    pub fn is_reported(&self, attr: AttrMask) -> bool {
        self.mask.contains(attr)
    }

    pub fn object_type(&self) -> Option<ObjectType> {
        self.object_type
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn fsid(&self) -> Option<u64> {
        self.fsid
    }

    pub fn space_used(&self) -> Option<u64> {
        self.space_used
    }

    pub fn fileid(&self) -> Option<u64> {
        self.fileid
    }

    /// Permission bits (`mode & 0o7777`), without the type.
    pub fn mode(&self) -> Option<u32> {
        self.mode
    }

    pub fn numlinks(&self) -> Option<u32> {
        self.numlinks
    }

    pub fn owner(&self) -> Option<u64> {
        self.owner
    }

    pub fn group(&self) -> Option<u64> {
        self.group
    }

    pub fn rawdev(&self) -> Option<u64> {
        self.rawdev
    }

    pub fn atime(&self) -> Option<SystemTime> {
        self.atime
    }

    pub fn mtime(&self) -> Option<SystemTime> {
        self.mtime
    }

    pub fn ctime(&self) -> Option<SystemTime> {
        self.ctime
    }

    pub fn chgtime(&self) -> Option<SystemTime> {
        self.chgtime
    }

    pub fn change(&self) -> Option<u64> {
        self.change
    }

    /// Store `value` under `attr` if `wanted`, or mark it invalid when the
    /// conversion produced nothing.
    fn fill<T>(&mut self, wanted: AttrMask, attr: AttrMask, slot: fn(&mut Self) -> &mut Option<T>, value: Option<T>) {
        if !wanted.contains(attr) {
            return;
        }
        match value {
            Some(v) => {
                *slot(self) = Some(v);
                self.mask |= attr;
            }
            None => self.invalid |= attr,
        }
    }
}

/// Translate raw metadata, populating only the fields in `supported`.
pub fn translate(stat: &ObjectStat, supported: AttrMask) -> AttrList {
    let mut attrs = AttrList::default();

    let atime = raw_to_system_time(stat.atime);
    let mtime = raw_to_system_time(stat.mtime);
    let ctime = raw_to_system_time(stat.ctime);
    let chgtime = match (mtime, ctime) {
        (Some(m), Some(c)) => Some(m.max(c)),
        _ => None,
    };
    let change = chgtime
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs());

    attrs.fill(supported, AttrMask::TYPE, |a| &mut a.object_type, ObjectType::from_mode(stat.mode));
    attrs.fill(supported, AttrMask::SIZE, |a| &mut a.size, u64::try_from(stat.size).ok());
    attrs.fill(supported, AttrMask::FSID, |a| &mut a.fsid, Some(stat.dev));
    attrs.fill(
        supported,
        AttrMask::SPACEUSED,
        |a| &mut a.space_used,
        u64::try_from(stat.blocks).ok().and_then(|b| b.checked_mul(512)),
    );
    attrs.fill(supported, AttrMask::FILEID, |a| &mut a.fileid, Some(stat.ino));
    attrs.fill(supported, AttrMask::MODE, |a| &mut a.mode, Some(stat.mode & 0o7777));
    attrs.fill(supported, AttrMask::NUMLINKS, |a| &mut a.numlinks, u32::try_from(stat.nlink).ok());
    attrs.fill(supported, AttrMask::OWNER, |a| &mut a.owner, Some(u64::from(stat.uid)));
    attrs.fill(supported, AttrMask::GROUP, |a| &mut a.group, Some(u64::from(stat.gid)));
    attrs.fill(supported, AttrMask::RAWDEV, |a| &mut a.rawdev, Some(stat.rdev));
    attrs.fill(supported, AttrMask::ATIME, |a| &mut a.atime, atime);
    attrs.fill(supported, AttrMask::MTIME, |a| &mut a.mtime, mtime);
    attrs.fill(supported, AttrMask::CTIME, |a| &mut a.ctime, ctime);
    attrs.fill(supported, AttrMask::CHGTIME, |a| &mut a.chgtime, chgtime);
    attrs.fill(supported, AttrMask::CHANGE, |a| &mut a.change, change);

    attrs
}

/// Convert a raw timestamp. `None` if the nanoseconds are out of range or
/// the instant is not representable.
fn raw_to_system_time(time: RawTime) -> Option<SystemTime> {
    let nsec = u32::try_from(time.nsec).ok().filter(|n| *n < 1_000_000_000)?;
    if time.sec >= 0 {
        UNIX_EPOCH.checked_add(Duration::new(time.sec.unsigned_abs(), nsec))
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(time.sec.unsigned_abs()))?
            .checked_add(Duration::from_nanos(u64::from(nsec)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ObjectStat {
        ObjectStat::file(4096, 0o644)
            .with_ino(42)
            .with_owner(1000, 1000)
            .with_times(RawTime::new(1_700_000_000, 250))
    }

    #[test]
    fn test_full_translation() {
        let stat = sample();
        let attrs = translate(&stat, AttrMask::POSIX);

        assert_eq!(attrs.mask(), AttrMask::POSIX);
        assert!(attrs.invalid().is_empty());
        assert_eq!(attrs.object_type(), Some(ObjectType::RegularFile));
        assert_eq!(attrs.size(), Some(4096));
        assert_eq!(attrs.mode(), Some(0o644));
        assert_eq!(attrs.owner(), Some(1000));
        assert_eq!(attrs.group(), Some(1000));
        assert_eq!(attrs.fileid(), Some(42));
        assert_eq!(attrs.numlinks(), Some(1));
        assert_eq!(attrs.space_used(), Some(8 * 512));

        let expected = UNIX_EPOCH + Duration::new(1_700_000_000, 250);
        assert_eq!(attrs.atime(), Some(expected));
        assert_eq!(attrs.mtime(), Some(expected));
        assert_eq!(attrs.ctime(), Some(expected));
        assert_eq!(attrs.change(), Some(1_700_000_000));
    }

    #[test]
    fn test_unsupported_fields_stay_unset() {
        let attrs = translate(&sample(), AttrMask::SIZE | AttrMask::MODE);
        assert_eq!(attrs.mask(), AttrMask::SIZE | AttrMask::MODE);
        assert_eq!(attrs.size(), Some(4096));
        assert_eq!(attrs.owner(), None);
        assert_eq!(attrs.mtime(), None);
        assert!(!attrs.is_reported(AttrMask::OWNER));
    }

    #[test]
    fn test_empty_mask_reports_nothing() {
        let attrs = translate(&sample(), AttrMask::empty());
        assert_eq!(attrs, AttrList::default());
    }

    #[test]
    fn test_bad_timestamp_only_invalidates_that_field() {
        let stat = sample().with_mtime(RawTime::new(0, 2_000_000_000));
        let attrs = translate(&stat, AttrMask::POSIX);

        assert_eq!(attrs.mtime(), None);
        assert!(attrs.invalid().contains(AttrMask::MTIME));
        // Change time depends on mtime.
        assert!(attrs.invalid().contains(AttrMask::CHGTIME | AttrMask::CHANGE));
        assert!(attrs.atime().is_some());
        assert_eq!(attrs.size(), Some(4096));
    }

    #[test]
    fn test_invalid_fields_outside_mask_are_ignored() {
        let stat = sample().with_mtime(RawTime::new(0, -1));
        let attrs = translate(&stat, AttrMask::SIZE);
        assert!(attrs.invalid().is_empty());
    }

    #[test]
    fn test_negative_size_is_invalid() {
        let mut stat = sample();
        stat.size = -1;
        stat.blocks = -1;
        let attrs = translate(&stat, AttrMask::POSIX);
        assert_eq!(attrs.size(), None);
        assert!(attrs.invalid().contains(AttrMask::SIZE | AttrMask::SPACEUSED));
    }

    #[test]
    fn test_nlink_overflow_is_invalid() {
        let mut stat = sample();
        stat.nlink = u64::from(u32::MAX) + 1;
        let attrs = translate(&stat, AttrMask::POSIX);
        assert!(attrs.invalid().contains(AttrMask::NUMLINKS));
        assert_eq!(attrs.numlinks(), None);
    }

    #[test]
    fn test_unknown_type_is_invalid() {
        let mut stat = sample();
        stat.mode = 0o644;
        let attrs = translate(&stat, AttrMask::POSIX);
        assert_eq!(attrs.object_type(), None);
        assert!(attrs.invalid().contains(AttrMask::TYPE));
        assert_eq!(attrs.mode(), Some(0o644));
    }

    #[test]
    fn test_pre_epoch_time() {
        let stat = sample().with_times(RawTime::new(-10, 500));
        let attrs = translate(&stat, AttrMask::ATIME);
        let expected = UNIX_EPOCH - Duration::from_secs(10) + Duration::from_nanos(500);
        assert_eq!(attrs.atime(), Some(expected));
    }

    #[test]
    fn test_chgtime_is_latest_of_mtime_and_ctime() {
        let mut stat = sample();
        stat.mtime = RawTime::new(100, 0);
        stat.ctime = RawTime::new(200, 0);
        let attrs = translate(&stat, AttrMask::POSIX);
        assert_eq!(attrs.chgtime(), Some(UNIX_EPOCH + Duration::from_secs(200)));
        assert_eq!(attrs.change(), Some(200));
    }

    #[test]
    fn test_object_type_from_mode() {
        assert_eq!(ObjectType::from_mode(libc::S_IFDIR as u32 | 0o755), Some(ObjectType::Directory));
        assert_eq!(ObjectType::from_mode(libc::S_IFLNK as u32), Some(ObjectType::Symlink));
        assert_eq!(ObjectType::from_mode(0), None);
        assert!(ObjectType::RegularFile.is_openable());
        assert!(!ObjectType::Directory.is_openable());
        assert_eq!(ObjectType::CharDevice.to_string(), "char_device");
    }
}
