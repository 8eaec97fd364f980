#![forbid(unsafe_code)]
//! WrenFS public API facade.
//!
//! Re-exports the core functionality through a stable external interface.
//! This is the crate that downstream consumers (CLI, harness, adaptors)
//! depend on.

pub use wfs_error::{Result, WfsError};
pub use wfs_fs::{change_size, check, readdir, CheckReport, ReaddirEntry, SetAttr, Stat, WrenFs};
pub use wfs_image::{mkfs, DiskImage};
pub use wfs_ondisk::{DirEntry, FileType, Inode, InodeKind, Superblock};
pub use wfs_types::{
    BlockNo, InodeNo, BLKSIZE, MAXFILESIZE, MAXNAMELEN, MAXSYMLINKLEN, ROOT_INO,
};
