#![forbid(unsafe_code)]
//! Core types and on-image geometry for WrenFS.
//!
//! Everything here is shared vocabulary: block/inode id newtypes, the fixed
//! layout constants of the 1 KiB-block image format, and little-endian field
//! readers used by the on-disk parsers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ── Geometry constants ──────────────────────────────────────────────────────

/// Fixed block size in bytes.
pub const BLKSIZE: usize = 1024;
/// log2 of [`BLKSIZE`].
pub const BLKSIZE_BITS: u32 = 10;
/// Bits per bitmap block.
pub const BITS_PER_BLOCK: u32 = (BLKSIZE * 8) as u32;

/// Direct slots in an inode's block map.
pub const NDIRECT: usize = 10;
/// Block indices per indirect block (`BLKSIZE / 4`).
pub const NINDIRECT: usize = BLKSIZE / 4;
/// Largest block count a single file can map.
pub const MAXFILEBLKS: u32 = (NDIRECT + NINDIRECT + NINDIRECT * NINDIRECT) as u32;
/// Largest file size in bytes.
pub const MAXFILESIZE: u32 = MAXFILEBLKS * BLKSIZE as u32;

/// On-disk inode record size in bytes.
pub const INODE_SIZE: usize = 64;
/// Inode records per block.
pub const INODES_PER_BLOCK: usize = BLKSIZE / INODE_SIZE;

/// Longest directory-entry name, excluding the NUL terminator.
pub const MAXNAMELEN: usize = 27;
/// On-disk directory entry size (`4 + MAXNAMELEN + 1`).
pub const DIRENTRY_SIZE: usize = 32;
/// Directory entries per block.
pub const DIRENTRIES_PER_BLOCK: usize = BLKSIZE / DIRENTRY_SIZE;

/// Longest inline symlink target, excluding the NUL terminator.
/// Symlink inodes reuse the 52 bytes after `{size, ftype, nlink}`.
pub const MAXSYMLINKLEN: usize = 51;

/// Superblock magic: "wrfs" in little-endian payload.
pub const MAGIC: u32 = 0x7366_7277;

/// Block 0 is the boot sector; its contents are opaque to the core.
pub const BOOT_BLOCK: u32 = 0;
/// Block 1 holds the superblock.
pub const SUPER_BLOCK: u32 = 1;
/// The free-block bitmap starts at block 2.
pub const BITMAP_START_BLOCK: u32 = 2;

// ── Journal region layout ───────────────────────────────────────────────────

/// Data-block payloads per journal batch.
pub const JMAX: usize = 256;
/// Region-relative index of the journal header block.
pub const JOURNAL_HEADER_POS: u32 = 0;
/// Region-relative index of the affected-block list block.
pub const JOURNAL_LIST_POS: u32 = 1;
/// Region-relative index of the doubly-indirect snapshot block.
pub const JOURNAL_INDIR2_POS: u32 = 2;
/// Region-relative index of the indirect snapshot block.
pub const JOURNAL_INDIR_POS: u32 = 3;
/// Region-relative index of the first data payload block.
pub const JOURNAL_DATA_POS: u32 = 4;
/// Total journal region size: header + list + two snapshots + `JMAX` payloads.
pub const JOURNAL_NBLOCKS: u32 = JOURNAL_DATA_POS + JMAX as u32;

// ── Id newtypes ─────────────────────────────────────────────────────────────

/// Index of a block within the image. 0 doubles as the "no block" sentinel
/// in block maps (block 0 is the boot sector and never holds file data).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct BlockNo(pub u32);

impl BlockNo {
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Byte offset of this block within the image.
    #[must_use]
    pub fn byte_offset(self) -> usize {
        self.0 as usize * BLKSIZE
    }
}

impl fmt::Display for BlockNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of an inode within the inode table. 0 is reserved: directory
/// entries use inode number 0 as the tombstone sentinel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct InodeNo(pub u32);

impl fmt::Display for InodeNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The root directory's inode number.
pub const ROOT_INO: InodeNo = InodeNo(1);

// ── Size arithmetic ─────────────────────────────────────────────────────────

/// Number of blocks required to hold `size` bytes.
#[must_use]
pub fn size_to_blocks(size: u32) -> u32 {
    size.div_ceil(BLKSIZE as u32)
}

// ── Parse errors and LE field readers ───────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Interpret `bytes` as a NUL-terminated string, ignoring everything after
/// the first NUL. Non-UTF-8 bytes are replaced.
#[must_use]
pub fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// ── Tests ───────────────────────────────────────────────────────────────────
