#![forbid(unsafe_code)]
//! In-memory disk image view.
//!
//! [`DiskImage`] owns the raw byte array and exposes typed accessors: block
//! slices, inode table I/O, and the block-map walk that turns a file offset
//! into a block number. The image is wholly in memory; there is no I/O
//! layer underneath.
//!
//! Also provides [`mkfs`], which lays out a fresh image.

use tracing::debug;
use wfs_error::{Result, WfsError};
use wfs_ondisk::{BlockMap, Inode, InodeKind, SlotPath, Superblock};
use wfs_types::{
    BlockNo, InodeNo, BITMAP_START_BLOCK, BITS_PER_BLOCK, BLKSIZE, INODES_PER_BLOCK, INODE_SIZE,
    JOURNAL_NBLOCKS, MAGIC, ROOT_INO, SUPER_BLOCK,
};

// ── Disk image ──────────────────────────────────────────────────────────────

/// A mounted view over a contiguous byte-array disk image.
///
/// The superblock is parsed and validated once at open; the image size is
/// fixed for the lifetime of the view.
#[derive(Debug, Clone)]
pub struct DiskImage {
    data: Vec<u8>,
    sb: Superblock,
}

impl DiskImage {
    /// Open an image, validating the superblock and region layout.
    pub fn open(data: Vec<u8>) -> Result<Self> {
        let super_off = SUPER_BLOCK as usize * BLKSIZE;
        if data.len() < super_off + Superblock::SIZE {
            return Err(WfsError::Io("image too small for a superblock".into()));
        }
        let sb = Superblock::parse_from_bytes(&data[super_off..super_off + Superblock::SIZE])?;
        validate_layout(&sb, data.len())?;
        Ok(Self { data, sb })
    }

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Borrow the raw image bytes (for persisting or snapshotting).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the view, returning the raw image bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Borrow a block's contents.
    pub fn block(&self, b: BlockNo) -> Result<&[u8]> {
        if b.0 >= self.sb.nblocks {
            return Err(WfsError::Io(format!(
                "block {b} out of range (nblocks {})",
                self.sb.nblocks
            )));
        }
        let off = b.byte_offset();
        Ok(&self.data[off..off + BLKSIZE])
    }

    /// Mutably borrow a block's contents.
    pub fn block_mut(&mut self, b: BlockNo) -> Result<&mut [u8]> {
        if b.0 >= self.sb.nblocks {
            return Err(WfsError::Io(format!(
                "block {b} out of range (nblocks {})",
                self.sb.nblocks
            )));
        }
        let off = b.byte_offset();
        Ok(&mut self.data[off..off + BLKSIZE])
    }

    /// Read slot `idx` of a block holding `u32` LE entries (an indirect or
    /// doubly-indirect block).
    pub fn u32_slot(&self, b: BlockNo, idx: usize) -> Result<u32> {
        let block = self.block(b)?;
        wfs_types::read_le_u32(block, idx * 4).map_err(WfsError::from)
    }

    /// Copy a whole indirect-style block into a `u32` slot array.
    pub fn u32_slots(&self, b: BlockNo) -> Result<[u32; wfs_types::NINDIRECT]> {
        let block = self.block(b)?;
        let mut out = [0_u32; wfs_types::NINDIRECT];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = u32::from_le_bytes([
                block[i * 4],
                block[i * 4 + 1],
                block[i * 4 + 2],
                block[i * 4 + 3],
            ]);
        }
        Ok(out)
    }

    // ── Inode table ─────────────────────────────────────────────────────

    fn inode_location(&self, ino: InodeNo) -> Result<(BlockNo, usize)> {
        if ino.0 >= self.sb.ninodes {
            return Err(WfsError::Io(format!(
                "inode {ino} out of range (ninodes {})",
                self.sb.ninodes
            )));
        }
        let block = BlockNo(self.sb.firstinob + ino.0 / INODES_PER_BLOCK as u32);
        let offset = (ino.0 as usize % INODES_PER_BLOCK) * INODE_SIZE;
        Ok((block, offset))
    }

    /// Read and parse an inode record.
    pub fn read_inode(&self, ino: InodeNo) -> Result<Inode> {
        let (block, offset) = self.inode_location(ino)?;
        let data = self.block(block)?;
        Inode::parse_from_bytes(&data[offset..offset + INODE_SIZE]).map_err(WfsError::from)
    }

    /// Serialize an inode record into the table.
    pub fn write_inode(&mut self, ino: InodeNo, inode: &Inode) -> Result<()> {
        let (block, offset) = self.inode_location(ino)?;
        let raw = inode.to_bytes();
        let data = self.block_mut(block)?;
        data[offset..offset + INODE_SIZE].copy_from_slice(&raw);
        Ok(())
    }

    /// Zero an inode record (destroy).
    pub fn clear_inode(&mut self, ino: InodeNo) -> Result<()> {
        self.write_inode(ino, &Inode::blank())
    }

    // ── Block-map walk ──────────────────────────────────────────────────

    /// Block number holding the `offset`th byte of `inode`'s contents.
    ///
    /// Returns [`BlockNo::NONE`] when `offset` is at or past end of file, or
    /// when the inode is a symlink (inline contents). A zero meta-block
    /// pointer where the size says one must exist is an I/O error.
    pub fn inode_blockno_at(&self, inode: &Inode, offset: u32) -> Result<BlockNo> {
        if offset >= inode.size {
            return Ok(BlockNo::NONE);
        }
        let Some(map) = inode.map() else {
            return Ok(BlockNo::NONE);
        };
        let n = offset / BLKSIZE as u32;
        match SlotPath::of(n) {
            Some(SlotPath::Direct { slot }) => Ok(BlockNo(map.direct[slot])),
            Some(SlotPath::Indirect { slot }) => {
                if map.indirect == 0 {
                    return Err(WfsError::Io(format!(
                        "indirect pointer missing for file block {n}"
                    )));
                }
                Ok(BlockNo(self.u32_slot(BlockNo(map.indirect), slot)?))
            }
            Some(SlotPath::Indirect2 { islot, slot }) => {
                if map.indirect2 == 0 {
                    return Err(WfsError::Io(format!(
                        "doubly-indirect pointer missing for file block {n}"
                    )));
                }
                let indirect = self.u32_slot(BlockNo(map.indirect2), islot)?;
                if indirect == 0 {
                    return Err(WfsError::Io(format!(
                        "indirect pointer missing for file block {n}"
                    )));
                }
                Ok(BlockNo(self.u32_slot(BlockNo(indirect), slot)?))
            }
            None => Ok(BlockNo::NONE),
        }
    }

    // ── Region predicates ───────────────────────────────────────────────

    /// Whether `b` lies in the data region.
    #[must_use]
    pub fn is_data_block(&self, b: BlockNo) -> bool {
        b.0 >= self.sb.firstdatab && b.0 < self.sb.nblocks
    }

    /// Absolute block number of a region-relative journal block.
    #[must_use]
    pub fn journal_block(&self, pos: u32) -> BlockNo {
        BlockNo(self.sb.firstjournalb + pos)
    }
}

fn validate_layout(sb: &Superblock, image_len: usize) -> Result<()> {
    let bitmap_blocks = sb.nblocks.div_ceil(BITS_PER_BLOCK);
    let expect_firstinob = BITMAP_START_BLOCK + bitmap_blocks;
    let inode_blocks = sb.ninodes.div_ceil(INODES_PER_BLOCK as u32);

    let bad = |reason: &str| Err(WfsError::Io(format!("superblock layout invalid: {reason}")));

    if sb.firstinob != expect_firstinob {
        return bad("inode table does not follow the bitmap");
    }
    if sb.firstjournalb != sb.firstinob + inode_blocks {
        return bad("journal region does not follow the inode table");
    }
    if sb.njournalb != JOURNAL_NBLOCKS {
        return bad("journal region has the wrong block count");
    }
    if sb.firstdatab != sb.firstjournalb + sb.njournalb {
        return bad("data region does not follow the journal");
    }
    if sb.firstdatab >= sb.nblocks {
        return bad("no data region");
    }
    if image_len < sb.nblocks as usize * BLKSIZE {
        return bad("image shorter than nblocks");
    }
    Ok(())
}

// ── mkfs ────────────────────────────────────────────────────────────────────

/// Lay out a fresh image with `nblocks` total blocks and `ninodes` inode
/// records, and a root directory at [`ROOT_INO`].
///
/// All non-data blocks are marked allocated in the bitmap; every data block
/// is free.
pub fn mkfs(nblocks: u32, ninodes: u32) -> Result<DiskImage> {
    if ninodes < 2 {
        return Err(WfsError::Io("need at least two inodes (0 is reserved)".into()));
    }
    let bitmap_blocks = nblocks.div_ceil(BITS_PER_BLOCK);
    let inode_blocks = ninodes.div_ceil(INODES_PER_BLOCK as u32);
    let firstinob = BITMAP_START_BLOCK + bitmap_blocks;
    let firstjournalb = firstinob + inode_blocks;
    let firstdatab = firstjournalb + JOURNAL_NBLOCKS;
    if firstdatab >= nblocks {
        return Err(WfsError::NoSpace);
    }

    let sb = Superblock {
        magic: MAGIC,
        nblocks,
        ninodes,
        firstinob,
        firstjournalb,
        njournalb: JOURNAL_NBLOCKS,
        firstdatab,
    };

    let mut data = vec![0_u8; nblocks as usize * BLKSIZE];
    sb.write_to(&mut data[SUPER_BLOCK as usize * BLKSIZE..]);

    // Bitmap: bit = 1 means free; only the data region starts free.
    for b in firstdatab..nblocks {
        let byte = BITMAP_START_BLOCK as usize * BLKSIZE + b as usize / 8;
        data[byte] |= 1 << (b % 8);
    }

    let mut img = DiskImage { data, sb };
    let root = Inode {
        size: 0,
        nlink: 1,
        kind: InodeKind::Directory {
            mode: 0o755,
            map: BlockMap::default(),
        },
    };
    img.write_inode(ROOT_INO, &root)?;

    debug!(
        nblocks,
        ninodes, firstinob, firstjournalb, firstdatab, "formatted fresh image"
    );
    Ok(img)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wfs_ondisk::FileType;

    fn small_image() -> DiskImage {
        mkfs(1024, 64).unwrap()
    }

    #[test]
    fn mkfs_lays_out_regions() {
        let img = small_image();
        let sb = img.superblock();
        assert_eq!(sb.magic, MAGIC);
        assert_eq!(sb.nblocks, 1024);
        assert_eq!(sb.firstinob, 3); // boot, super, one bitmap block
        assert_eq!(sb.firstjournalb, 3 + 4); // 64 inodes / 16 per block
        assert_eq!(sb.firstdatab, 7 + 260);
        assert!(sb.firstdatab < sb.nblocks);
    }

    #[test]
    fn mkfs_root_is_a_live_directory() {
        let img = small_image();
        let root = img.read_inode(ROOT_INO).unwrap();
        assert_eq!(root.file_type(), FileType::Directory);
        assert_eq!(root.nlink, 1);
        assert_eq!(root.size, 0);
        // Inode 0 stays blank.
        assert!(!img.read_inode(InodeNo(0)).unwrap().is_live());
    }

    #[test]
    fn mkfs_bitmap_frees_exactly_the_data_region() {
        let img = small_image();
        let sb = *img.superblock();
        let bitmap = img.block(BlockNo(BITMAP_START_BLOCK)).unwrap();
        for b in 0..sb.nblocks {
            let free = bitmap[b as usize / 8] & (1 << (b % 8)) != 0;
            assert_eq!(free, b >= sb.firstdatab, "block {b}");
        }
    }

    #[test]
    fn open_round_trips_mkfs_output() {
        let img = small_image();
        let reopened = DiskImage::open(img.into_bytes()).unwrap();
        assert_eq!(reopened.superblock().nblocks, 1024);
    }

    #[test]
    fn open_rejects_truncated_or_corrupt_images() {
        assert!(DiskImage::open(vec![0_u8; 100]).is_err());

        let mut bytes = small_image().into_bytes();
        bytes[SUPER_BLOCK as usize * BLKSIZE + 20] = 0xFF; // njournalb
        assert!(DiskImage::open(bytes).is_err());
    }

    #[test]
    fn inode_round_trip() {
        let mut img = small_image();
        let mut map = BlockMap::default();
        map.direct[0] = 270;
        let node = Inode {
            size: 512,
            nlink: 1,
            kind: InodeKind::Regular { mode: 0o644, map },
        };
        img.write_inode(InodeNo(5), &node).unwrap();
        assert_eq!(img.read_inode(InodeNo(5)).unwrap(), node);
        img.clear_inode(InodeNo(5)).unwrap();
        assert!(!img.read_inode(InodeNo(5)).unwrap().is_live());
    }

    #[test]
    fn inode_out_of_range_is_io() {
        let img = small_image();
        assert!(matches!(
            img.read_inode(InodeNo(64)),
            Err(WfsError::Io(_))
        ));
    }

    #[test]
    fn blockno_walk_direct_and_indirect() {
        let mut img = small_image();
        let first_data = img.superblock().firstdatab;

        // File: 11 blocks; block 10 goes through the indirect block.
        let indirect_blockno = first_data + 50;
        let mut map = BlockMap::default();
        for (i, slot) in map.direct.iter_mut().enumerate() {
            *slot = first_data + i as u32;
        }
        map.indirect = indirect_blockno;
        let node = Inode {
            size: 11 * BLKSIZE as u32,
            nlink: 1,
            kind: InodeKind::Regular { mode: 0o644, map },
        };
        let islot_value = first_data + 20;
        img.block_mut(BlockNo(indirect_blockno)).unwrap()[0..4]
            .copy_from_slice(&islot_value.to_le_bytes());

        assert_eq!(
            img.inode_blockno_at(&node, 0).unwrap(),
            BlockNo(first_data)
        );
        assert_eq!(
            img.inode_blockno_at(&node, 9 * BLKSIZE as u32 + 13).unwrap(),
            BlockNo(first_data + 9)
        );
        assert_eq!(
            img.inode_blockno_at(&node, 10 * BLKSIZE as u32).unwrap(),
            BlockNo(islot_value)
        );
        // Past EOF: sentinel, not an error.
        assert_eq!(
            img.inode_blockno_at(&node, 11 * BLKSIZE as u32).unwrap(),
            BlockNo::NONE
        );
    }

    #[test]
    fn blockno_walk_missing_indirect_is_io() {
        let img = small_image();
        let node = Inode {
            size: 11 * BLKSIZE as u32,
            nlink: 1,
            kind: InodeKind::Regular {
                mode: 0o644,
                map: BlockMap::default(),
            },
        };
        assert!(matches!(
            img.inode_blockno_at(&node, 10 * BLKSIZE as u32),
            Err(WfsError::Io(_))
        ));
    }

    #[test]
    fn symlink_contents_have_no_blocks() {
        let img = small_image();
        let node = Inode {
            size: 4,
            nlink: 1,
            kind: InodeKind::Symlink {
                target: b"/tmp".to_vec(),
            },
        };
        assert_eq!(img.inode_blockno_at(&node, 0).unwrap(), BlockNo::NONE);
    }
}
