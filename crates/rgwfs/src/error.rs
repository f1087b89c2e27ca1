//! Status model and object-store error translation.
//!
//! The object store reports failures as signed integers in two code spaces
//! (the raw client and the gateway client). Both are carried as a tagged
//! [`BackendCode`] and funnelled through one classification table into an
//! [`FsalStatus`]: a major [`StatusCode`] plus the POSIX code it came from.

use std::io;

use thiserror::Error;

/// Major status of an operation, as seen by the file-sharing server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum StatusCode {
    /// The operation succeeded.
    #[error("success")]
    NoError,

    /// Caller lacks the privilege for the operation.
    #[error("operation not permitted")]
    Perm,

    /// Object does not exist.
    #[error("no such file or directory")]
    NotFound,

    /// I/O or transport failure talking to the object store.
    #[error("I/O error")]
    Io,

    /// Backing device or cluster is unreachable.
    #[error("no such device")]
    NoDevice,

    /// Object is not open for I/O.
    #[error("object is not opened")]
    NotOpened,

    /// Allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// Permission bits deny the access.
    #[error("permission denied")]
    Access,

    /// Bad address passed to the client library.
    #[error("bad address")]
    Fault,

    /// An object with that name already exists.
    #[error("object already exists")]
    Exists,

    /// Operation would span two exports.
    #[error("cross-device link")]
    CrossDevice,

    /// Expected a directory.
    #[error("not a directory")]
    NotDir,

    /// Object is a directory.
    #[error("is a directory")]
    IsDir,

    /// Malformed request or unrecognized object type.
    #[error("invalid argument")]
    InvalidArgument,

    /// Size exceeds the maximum file size.
    #[error("file too large")]
    FileTooBig,

    /// Object store is out of space.
    #[error("no space left on device")]
    NoSpace,

    /// Link count limit reached.
    #[error("too many links")]
    TooManyLinks,

    /// User or bucket quota exceeded.
    #[error("quota exceeded")]
    QuotaExceeded,

    /// Name or path exceeds the configured maximum.
    #[error("name too long")]
    NameTooLong,

    /// Directory still has entries.
    #[error("directory not empty")]
    NotEmpty,

    /// Handle outlived its object or its export.
    #[error("stale handle")]
    Stale,

    /// Transient condition; the caller may retry.
    #[error("resource temporarily unavailable")]
    Delay,

    /// Export is read-only.
    #[error("read-only file system")]
    ReadOnly,

    /// Operation is not implemented by the object store.
    #[error("operation not supported")]
    NotSupported,

    /// Value does not fit the target type.
    #[error("value too large")]
    Overflow,

    /// Lock request would deadlock.
    #[error("resource deadlock avoided")]
    Deadlock,

    /// Call was interrupted.
    #[error("interrupted")]
    Interrupted,

    /// Too many symbolic links while resolving.
    #[error("too many levels of symbolic links")]
    SymlinkLoop,

    /// Object is already open.
    #[error("object is already open")]
    FileOpen,

    /// Wire handle failed validation.
    #[error("malformed handle")]
    BadHandle,

    /// Catch-all for codes the table does not know.
    #[error("server fault")]
    ServerFault,
}

impl StatusCode {
    /// Canonical POSIX code for this major status.
    pub fn errno(self) -> i32 {
        match self {
            StatusCode::NoError => 0,
            StatusCode::Perm => libc::EPERM,
            StatusCode::NotFound => libc::ENOENT,
            StatusCode::Io => libc::EIO,
            StatusCode::NoDevice => libc::ENXIO,
            StatusCode::NotOpened => libc::EBADF,
            StatusCode::OutOfMemory => libc::ENOMEM,
            StatusCode::Access => libc::EACCES,
            StatusCode::Fault => libc::EFAULT,
            StatusCode::Exists => libc::EEXIST,
            StatusCode::CrossDevice => libc::EXDEV,
            StatusCode::NotDir => libc::ENOTDIR,
            StatusCode::IsDir => libc::EISDIR,
            StatusCode::InvalidArgument => libc::EINVAL,
            StatusCode::FileTooBig => libc::EFBIG,
            StatusCode::NoSpace => libc::ENOSPC,
            StatusCode::TooManyLinks => libc::EMLINK,
            StatusCode::QuotaExceeded => libc::EDQUOT,
            StatusCode::NameTooLong => libc::ENAMETOOLONG,
            StatusCode::NotEmpty => libc::ENOTEMPTY,
            StatusCode::Stale => libc::ESTALE,
            StatusCode::Delay => libc::EAGAIN,
            StatusCode::ReadOnly => libc::EROFS,
            StatusCode::NotSupported => libc::EOPNOTSUPP,
            StatusCode::Overflow => libc::EOVERFLOW,
            StatusCode::Deadlock => libc::EDEADLK,
            StatusCode::Interrupted => libc::EINTR,
            StatusCode::SymlinkLoop => libc::ELOOP,
            StatusCode::FileOpen => libc::EBUSY,
            StatusCode::BadHandle => libc::EINVAL,
            StatusCode::ServerFault => libc::EIO,
        }
    }
}

/// Operation status: major classification plus the originating POSIX code.
///
/// `minor` is zero when the status was not produced from a POSIX code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("{major} (minor {minor})")]
pub struct FsalStatus {
    pub major: StatusCode,
    pub minor: u32,
}

impl FsalStatus {
    /// Canonical success.
    pub const SUCCESS: FsalStatus = FsalStatus {
        major: StatusCode::NoError,
        minor: 0,
    };

    pub fn new(major: StatusCode, minor: u32) -> Self {
        Self { major, minor }
    }

    /// A status carrying the canonical POSIX code of `major` as its minor.
    pub fn from_major(major: StatusCode) -> Self {
        Self {
            major,
            minor: major.errno().unsigned_abs(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.major == StatusCode::NoError
    }

    pub fn is_error(&self) -> bool {
        !self.is_ok()
    }

    /// POSIX code to surface to the file-sharing client.
    ///
    /// The preserved minor wins; statuses without one fall back to the
    /// canonical code of their major.
    pub fn errno(&self) -> i32 {
        match i32::try_from(self.minor) {
            Ok(minor) if minor != 0 => minor,
            _ => self.major.errno(),
        }
    }

    /// `Ok(())` for success, `Err(self)` otherwise.
    pub fn into_result(self) -> FsalResult<()> {
        if self.is_ok() { Ok(()) } else { Err(self) }
    }

    pub fn not_found() -> Self {
        Self::from_major(StatusCode::NotFound)
    }

    pub fn invalid_argument() -> Self {
        Self::from_major(StatusCode::InvalidArgument)
    }

    pub fn stale() -> Self {
        Self::from_major(StatusCode::Stale)
    }

    pub fn bad_handle() -> Self {
        Self::from_major(StatusCode::BadHandle)
    }
}

impl From<StatusCode> for FsalStatus {
    fn from(major: StatusCode) -> Self {
        Self::from_major(major)
    }
}

/// Convert a status to `std::io::Error` for callers speaking std I/O.
impl From<FsalStatus> for io::Error {
    fn from(status: FsalStatus) -> Self {
        io::Error::from_raw_os_error(status.errno())
    }
}

/// Result type for every fallible operation in this crate.
pub type FsalResult<T> = Result<T, FsalStatus>;

/// A status code reported by one of the object-store collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCode {
    /// Raw object-store client: negated POSIX codes for errors, zero or a
    /// positive count on success.
    Raw(i32),
    /// Gateway client: any non-zero value is an error whose magnitude is the
    /// POSIX code.
    Gateway(i32),
}

impl BackendCode {
    /// The POSIX code this value carries, or `None` when it denotes success.
    pub fn errno(self) -> Option<u32> {
        match self {
            BackendCode::Raw(code) if code < 0 => Some(code.unsigned_abs()),
            BackendCode::Raw(_) => None,
            BackendCode::Gateway(0) => None,
            BackendCode::Gateway(code) => Some(code.unsigned_abs()),
        }
    }

    pub fn is_error(self) -> bool {
        self.errno().is_some()
    }
}

impl From<BackendCode> for FsalStatus {
    fn from(code: BackendCode) -> Self {
        translate(code)
    }
}

/// Translate a collaborator status code into the status model.
pub fn translate(code: BackendCode) -> FsalStatus {
    match code.errno() {
        None => FsalStatus::SUCCESS,
        Some(errno) => FsalStatus::new(classify(errno), errno),
    }
}

/// Translate a raw object-store client code.
pub fn translate_raw(code: i32) -> FsalStatus {
    translate(BackendCode::Raw(code))
}

/// Translate a gateway client code.
pub fn translate_gateway(code: i32) -> FsalStatus {
    translate(BackendCode::Gateway(code))
}

/// Classify a POSIX error code.
pub fn classify(errno: u32) -> StatusCode {
    let Ok(errno) = i32::try_from(errno) else {
        return StatusCode::ServerFault;
    };

    match errno {
        0 => StatusCode::NoError,
        libc::EPERM => StatusCode::Perm,
        libc::ENOENT => StatusCode::NotFound,
        libc::EIO
        | libc::ECONNREFUSED
        | libc::ECONNABORTED
        | libc::ECONNRESET
        | libc::ENFILE
        | libc::EMFILE
        | libc::EPIPE
        | libc::ETIMEDOUT => StatusCode::Io,
        libc::ENODEV | libc::ENXIO => StatusCode::NoDevice,
        libc::EBADF => StatusCode::NotOpened,
        libc::ENOMEM => StatusCode::OutOfMemory,
        libc::EACCES => StatusCode::Access,
        libc::EFAULT => StatusCode::Fault,
        libc::EEXIST => StatusCode::Exists,
        libc::EXDEV => StatusCode::CrossDevice,
        libc::ENOTDIR => StatusCode::NotDir,
        libc::EISDIR => StatusCode::IsDir,
        libc::EINVAL => StatusCode::InvalidArgument,
        libc::EFBIG => StatusCode::FileTooBig,
        libc::ENOSPC => StatusCode::NoSpace,
        libc::EMLINK => StatusCode::TooManyLinks,
        libc::EDQUOT => StatusCode::QuotaExceeded,
        libc::ENAMETOOLONG => StatusCode::NameTooLong,
        libc::ENOTEMPTY => StatusCode::NotEmpty,
        libc::ESTALE => StatusCode::Stale,
        libc::EBUSY => StatusCode::Delay,
        libc::EROFS => StatusCode::ReadOnly,
        libc::ENOSYS => StatusCode::NotSupported,
        libc::EOVERFLOW | libc::ERANGE => StatusCode::Overflow,
        libc::EDEADLK => StatusCode::Deadlock,
        libc::EINTR => StatusCode::Interrupted,
        libc::ELOOP => StatusCode::SymlinkLoop,
        // Aliases on some platforms, so matched by guard rather than pattern.
        e if e == libc::EAGAIN || e == libc::EWOULDBLOCK => StatusCode::Delay,
        e if e == libc::ENOTSUP || e == libc::EOPNOTSUPP => StatusCode::NotSupported,
        _ => StatusCode::ServerFault,
    }
}
