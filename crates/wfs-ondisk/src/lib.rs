#![forbid(unsafe_code)]
//! On-disk record layouts for WrenFS.
//!
//! Byte-exact, little-endian packed parse/serialize for the superblock, the
//! 64-byte inode record, the 32-byte directory entry, and the journal
//! header. All multi-byte fields are `u32` LE; nothing here touches the
//! image itself.

use serde::Serialize;
use wfs_types::{
    BlockNo, InodeNo, ParseError, read_fixed, read_le_u32, DIRENTRY_SIZE, INODE_SIZE, MAGIC,
    MAXNAMELEN, MAXSYMLINKLEN, NDIRECT, NINDIRECT,
};

// ── Superblock ──────────────────────────────────────────────────────────────

/// Superblock record at block 1. Immutable after mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Superblock {
    pub magic: u32,
    /// Total blocks in the image.
    pub nblocks: u32,
    /// Inode records in the inode table.
    pub ninodes: u32,
    /// First block of the inode table.
    pub firstinob: u32,
    /// First block of the journal region.
    pub firstjournalb: u32,
    /// Blocks in the journal region.
    pub njournalb: u32,
    /// First block of the data region.
    pub firstdatab: u32,
}

impl Superblock {
    /// Serialized size in bytes.
    pub const SIZE: usize = 28;

    pub fn parse_from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(data, 0)?;
        if magic != MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: MAGIC,
                actual: magic,
            });
        }
        Ok(Self {
            magic,
            nblocks: read_le_u32(data, 4)?,
            ninodes: read_le_u32(data, 8)?,
            firstinob: read_le_u32(data, 12)?,
            firstjournalb: read_le_u32(data, 16)?,
            njournalb: read_le_u32(data, 20)?,
            firstdatab: read_le_u32(data, 24)?,
        })
    }

    /// Write the record at the start of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`Self::SIZE`].
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.nblocks.to_le_bytes());
        buf[8..12].copy_from_slice(&self.ninodes.to_le_bytes());
        buf[12..16].copy_from_slice(&self.firstinob.to_le_bytes());
        buf[16..20].copy_from_slice(&self.firstjournalb.to_le_bytes());
        buf[20..24].copy_from_slice(&self.njournalb.to_le_bytes());
        buf[24..28].copy_from_slice(&self.firstdatab.to_le_bytes());
    }
}

// ── File types and the block map ────────────────────────────────────────────

/// Inode type tag, stored as `u32` at offset 4 of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

impl FileType {
    #[must_use]
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Regular => 0,
            Self::Directory => 1,
            Self::Symlink => 2,
        }
    }

    pub fn from_raw(raw: u32) -> Result<Self, ParseError> {
        match raw {
            0 => Ok(Self::Regular),
            1 => Ok(Self::Directory),
            2 => Ok(Self::Symlink),
            _ => Err(ParseError::InvalidField {
                field: "ftype",
                reason: "unknown file type tag",
            }),
        }
    }
}

/// Per-file block map: `NDIRECT` direct slots, one indirect block index, one
/// doubly-indirect block index. Slot value 0 means "no block".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockMap {
    pub direct: [u32; NDIRECT],
    pub indirect: u32,
    pub indirect2: u32,
}

/// Where file-block index `n` lives within a block map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPath {
    /// `direct[slot]` in the inode itself.
    Direct { slot: usize },
    /// Slot `slot` of the block named by `indirect`.
    Indirect { slot: usize },
    /// Slot `slot` of the indirect block named by slot `islot` of the block
    /// named by `indirect2`.
    Indirect2 { islot: usize, slot: usize },
}

impl SlotPath {
    /// Classify file-block index `n`; `None` once the map is exhausted.
    #[must_use]
    pub fn of(n: u32) -> Option<Self> {
        let n = n as usize;
        if n < NDIRECT {
            return Some(Self::Direct { slot: n });
        }
        let n = n - NDIRECT;
        if n < NINDIRECT {
            return Some(Self::Indirect { slot: n });
        }
        let n = n - NINDIRECT;
        if n < NINDIRECT * NINDIRECT {
            return Some(Self::Indirect2 {
                islot: n / NINDIRECT,
                slot: n % NINDIRECT,
            });
        }
        None
    }

    /// True when index `n` is the first slot of an indirect meta-block, i.e.
    /// the step that allocates or vacates that meta-block.
    #[must_use]
    pub fn is_indirect_boundary(self) -> bool {
        matches!(
            self,
            Self::Indirect { slot: 0 } | Self::Indirect2 { slot: 0, .. }
        )
    }

    /// True when index `n` is the first slot of the doubly-indirect region.
    #[must_use]
    pub fn is_indirect2_boundary(self) -> bool {
        matches!(self, Self::Indirect2 { islot: 0, slot: 0 })
    }
}

// ── Inode ───────────────────────────────────────────────────────────────────

/// Type-specific payload of an inode record.
///
/// Regular files and directories carry a mode and a block map; symlinks
/// reinterpret the same bytes as an inline NUL-terminated target (stored
/// bytes may contain an embedded NUL for conditional targets).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeKind {
    Regular { mode: u32, map: BlockMap },
    Directory { mode: u32, map: BlockMap },
    Symlink { target: Vec<u8> },
}

/// In-memory form of the 64-byte on-disk inode record.
///
/// An inode is live iff `nlink != 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// File size in bytes; for symlinks, the target length.
    pub size: u32,
    pub nlink: u32,
    pub kind: InodeKind,
}

impl Inode {
    /// A zeroed (free) record: regular, size 0, nlink 0, empty map.
    #[must_use]
    pub fn blank() -> Self {
        Self {
            size: 0,
            nlink: 0,
            kind: InodeKind::Regular {
                mode: 0,
                map: BlockMap::default(),
            },
        }
    }

    #[must_use]
    pub fn file_type(&self) -> FileType {
        match self.kind {
            InodeKind::Regular { .. } => FileType::Regular,
            InodeKind::Directory { .. } => FileType::Directory,
            InodeKind::Symlink { .. } => FileType::Symlink,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.nlink != 0
    }

    /// Permission bits; 0 for symlinks (the record has no mode field).
    #[must_use]
    pub fn mode(&self) -> u32 {
        match self.kind {
            InodeKind::Regular { mode, .. } | InodeKind::Directory { mode, .. } => mode,
            InodeKind::Symlink { .. } => 0,
        }
    }

    /// The block map, for types that have one.
    #[must_use]
    pub fn map(&self) -> Option<&BlockMap> {
        match &self.kind {
            InodeKind::Regular { map, .. } | InodeKind::Directory { map, .. } => Some(map),
            InodeKind::Symlink { .. } => None,
        }
    }

    pub fn map_mut(&mut self) -> Option<&mut BlockMap> {
        match &mut self.kind {
            InodeKind::Regular { map, .. } | InodeKind::Directory { map, .. } => Some(map),
            InodeKind::Symlink { .. } => None,
        }
    }

    pub fn parse_from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let size = read_le_u32(data, 0)?;
        let ftype = FileType::from_raw(read_le_u32(data, 4)?)?;
        let nlink = read_le_u32(data, 8)?;

        let kind = match ftype {
            FileType::Symlink => {
                if size as usize > MAXSYMLINKLEN {
                    return Err(ParseError::InvalidField {
                        field: "size",
                        reason: "symlink target longer than MAXSYMLINKLEN",
                    });
                }
                let tail = wfs_types::ensure_slice(data, 12, MAXSYMLINKLEN + 1)?;
                InodeKind::Symlink {
                    target: tail[..size as usize].to_vec(),
                }
            }
            FileType::Regular | FileType::Directory => {
                let mode = read_le_u32(data, 12)?;
                let mut direct = [0_u32; NDIRECT];
                for (i, slot) in direct.iter_mut().enumerate() {
                    *slot = read_le_u32(data, 16 + i * 4)?;
                }
                let map = BlockMap {
                    direct,
                    indirect: read_le_u32(data, 56)?,
                    indirect2: read_le_u32(data, 60)?,
                };
                if ftype == FileType::Regular {
                    InodeKind::Regular { mode, map }
                } else {
                    InodeKind::Directory { mode, map }
                }
            }
        };

        Ok(Self { size, nlink, kind })
    }

    /// Serialize into a 64-byte record.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0_u8; INODE_SIZE];
        buf[0..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.file_type().to_raw().to_le_bytes());
        buf[8..12].copy_from_slice(&self.nlink.to_le_bytes());
        match &self.kind {
            InodeKind::Regular { mode, map } | InodeKind::Directory { mode, map } => {
                buf[12..16].copy_from_slice(&mode.to_le_bytes());
                for (i, slot) in map.direct.iter().enumerate() {
                    let off = 16 + i * 4;
                    buf[off..off + 4].copy_from_slice(&slot.to_le_bytes());
                }
                buf[56..60].copy_from_slice(&map.indirect.to_le_bytes());
                buf[60..64].copy_from_slice(&map.indirect2.to_le_bytes());
            }
            InodeKind::Symlink { target } => {
                buf[12..12 + target.len()].copy_from_slice(target);
            }
        }
        buf
    }
}

// ── Directory entry ─────────────────────────────────────────────────────────

/// On-disk directory entry: inode number + fixed-width NUL-terminated name.
/// Inode number 0 marks a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: InodeNo,
    pub name: String,
}

impl DirEntry {
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.ino.0 == 0
    }

    pub fn parse_from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let ino = InodeNo(read_le_u32(data, 0)?);
        let name_bytes: [u8; MAXNAMELEN + 1] = read_fixed(data, 4)?;
        Ok(Self {
            ino,
            name: wfs_types::trim_nul(&name_bytes),
        })
    }

    /// Serialize into a 32-byte record. The name is NUL-padded.
    ///
    /// # Panics
    ///
    /// Panics if the name exceeds [`MAXNAMELEN`] bytes; callers validate
    /// lengths before building entries.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; DIRENTRY_SIZE] {
        assert!(self.name.len() <= MAXNAMELEN);
        let mut buf = [0_u8; DIRENTRY_SIZE];
        buf[0..4].copy_from_slice(&self.ino.0.to_le_bytes());
        buf[4..4 + self.name.len()].copy_from_slice(self.name.as_bytes());
        buf
    }
}

// ── Journal header ──────────────────────────────────────────────────────────

/// Journal transaction kind, stored as `u32` at offset 0 of the header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalKind {
    Empty,
    Write,
    Free,
    Alloc,
    Create,
    HardLink,
}

impl JournalKind {
    #[must_use]
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Empty => 0,
            Self::Write => 1,
            Self::Free => 2,
            Self::Alloc => 3,
            Self::Create => 4,
            Self::HardLink => 5,
        }
    }

    pub fn from_raw(raw: u32) -> Result<Self, ParseError> {
        match raw {
            0 => Ok(Self::Empty),
            1 => Ok(Self::Write),
            2 => Ok(Self::Free),
            3 => Ok(Self::Alloc),
            4 => Ok(Self::Create),
            5 => Ok(Self::HardLink),
            _ => Err(ParseError::InvalidField {
                field: "execute_type",
                reason: "unknown journal kind",
            }),
        }
    }
}

/// Which meta-blocks a resize batch allocated or freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResizeTouch {
    pub indirect: bool,
    pub indirect2: bool,
}

impl ResizeTouch {
    const INDIRECT_BIT: u32 = 1;
    const INDIRECT2_BIT: u32 = 2;

    #[must_use]
    pub fn to_bits(self) -> u32 {
        u32::from(self.indirect) * Self::INDIRECT_BIT
            + u32::from(self.indirect2) * Self::INDIRECT2_BIT
    }

    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Self {
            indirect: bits & Self::INDIRECT_BIT != 0,
            indirect2: bits & Self::INDIRECT2_BIT != 0,
        }
    }
}

/// Journal header record at region-relative block 0.
///
/// The inode snapshot is the target inode *as it should read after apply*.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalHeader {
    pub kind: JournalKind,
    pub committed: bool,
    pub inode_num: InodeNo,
    pub n_blocks_affected: u32,
    pub indirect_blockno: BlockNo,
    pub indirect2_blockno: BlockNo,
    pub touched: ResizeTouch,
    pub dir_data_blockno: BlockNo,
    pub inode: Inode,
}

impl JournalHeader {
    /// Serialized size in bytes.
    pub const SIZE: usize = 32 + INODE_SIZE;
    /// Byte range of the `committed` word within the header block.
    pub const COMMITTED_OFFSET: usize = 4;

    /// An empty header (kind EMPTY, nothing committed).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            kind: JournalKind::Empty,
            committed: false,
            inode_num: InodeNo(0),
            n_blocks_affected: 0,
            indirect_blockno: BlockNo::NONE,
            indirect2_blockno: BlockNo::NONE,
            touched: ResizeTouch::default(),
            dir_data_blockno: BlockNo::NONE,
            inode: Inode::blank(),
        }
    }

    pub fn parse_from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            kind: JournalKind::from_raw(read_le_u32(data, 0)?)?,
            committed: read_le_u32(data, 4)? != 0,
            inode_num: InodeNo(read_le_u32(data, 8)?),
            n_blocks_affected: read_le_u32(data, 12)?,
            indirect_blockno: BlockNo(read_le_u32(data, 16)?),
            indirect2_blockno: BlockNo(read_le_u32(data, 20)?),
            touched: ResizeTouch::from_bits(read_le_u32(data, 24)?),
            dir_data_blockno: BlockNo(read_le_u32(data, 28)?),
            inode: Inode::parse_from_bytes(&data[32..32 + INODE_SIZE])?,
        })
    }

    /// Write the record at the start of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`Self::SIZE`].
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.kind.to_raw().to_le_bytes());
        buf[4..8].copy_from_slice(&u32::from(self.committed).to_le_bytes());
        buf[8..12].copy_from_slice(&self.inode_num.0.to_le_bytes());
        buf[12..16].copy_from_slice(&self.n_blocks_affected.to_le_bytes());
        buf[16..20].copy_from_slice(&self.indirect_blockno.0.to_le_bytes());
        buf[20..24].copy_from_slice(&self.indirect2_blockno.0.to_le_bytes());
        buf[24..28].copy_from_slice(&self.touched.to_bits().to_le_bytes());
        buf[28..32].copy_from_slice(&self.dir_data_blockno.0.to_le_bytes());
        buf[32..32 + INODE_SIZE].copy_from_slice(&self.inode.to_bytes());
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
