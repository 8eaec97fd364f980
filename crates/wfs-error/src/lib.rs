#![forbid(unsafe_code)]
//! Error types for WrenFS.
//!
//! Defines `WfsError` and a `Result<T>` alias used throughout the workspace.
//! Includes errno mappings for kernel-adaptor response codes.

use thiserror::Error;
use wfs_types::ParseError;

/// Unified error type for all WrenFS operations.
#[derive(Debug, Error)]
pub enum WfsError {
    /// No free block or free inode, or a requested size above the file size
    /// limit.
    #[error("no space left on device")]
    NoSpace,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("file exists")]
    Exists,

    #[error("name too long")]
    NameTooLong,

    /// The operation is not valid for the inode's type (e.g. truncating a
    /// directory).
    #[error("operation not permitted")]
    NotPermitted,

    /// A structural invariant was violated mid-operation; the image is left
    /// as-is for inspection.
    #[error("I/O error: {0}")]
    Io(String),

    /// A user buffer could not be copied to or from.
    #[error("bad address in user buffer")]
    Fault,

    /// The host could not allocate an in-memory shadow structure.
    #[error("out of memory")]
    OutOfMemory,

    /// The image does not decode as a WrenFS volume.
    #[error("invalid on-disk format: {0}")]
    Format(#[from] ParseError),
}

impl WfsError {
    /// Convert this error into a POSIX errno suitable for adaptor replies.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::NoSpace => libc::ENOSPC,
            Self::NotFound(_) => libc::ENOENT,
            Self::Exists => libc::EEXIST,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::NotPermitted => libc::EPERM,
            Self::Io(_) => libc::EIO,
            Self::Fault => libc::EFAULT,
            Self::OutOfMemory => libc::ENOMEM,
            Self::Format(_) => libc::EINVAL,
        }
    }
}

/// Result alias using `WfsError`.
pub type Result<T> = std::result::Result<T, WfsError>;
