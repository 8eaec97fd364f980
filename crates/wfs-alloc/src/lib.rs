#![forbid(unsafe_code)]
//! Free-block bitmap allocator.
//!
//! One bit per block, starting at block 2 of the image; bit value 1 means
//! free. Placement goes through [`FreeWindow`], a locality hint that biases
//! successive reservations within one journal batch toward a contiguous run.
//!
//! Reservation and allocation are split on purpose: the planner only
//! *records* chosen block numbers (so an abandoned batch needs no unwind),
//! and the journal apply path realises them with [`allocate_blockno`].

use tracing::{debug, trace};
use wfs_error::{Result, WfsError};
use wfs_image::DiskImage;
use wfs_ondisk::Superblock;
use wfs_types::{BlockNo, BITMAP_START_BLOCK, BITS_PER_BLOCK};

// ── Raw bit operations ──────────────────────────────────────────────────────

fn bit_location(b: BlockNo) -> (BlockNo, usize, u8) {
    let block = BITMAP_START_BLOCK + b.0 / BITS_PER_BLOCK;
    let bit_in_block = b.0 % BITS_PER_BLOCK;
    (
        BlockNo(block),
        (bit_in_block / 8) as usize,
        1 << (bit_in_block % 8),
    )
}

/// Whether block `b` is free (bit set).
pub fn block_is_free(img: &DiskImage, b: BlockNo) -> Result<bool> {
    if b.0 >= img.superblock().nblocks {
        return Err(WfsError::Io(format!("bitmap query for block {b} out of range")));
    }
    let (block, byte, mask) = bit_location(b);
    Ok(img.block(block)?[byte] & mask != 0)
}

/// Mark block `b` allocated (clear its bit), realising a reservation made by
/// the planner. Idempotent.
pub fn allocate_blockno(img: &mut DiskImage, b: BlockNo) -> Result<()> {
    if b.0 >= img.superblock().nblocks {
        return Err(WfsError::Io(format!("allocate of block {b} out of range")));
    }
    let (block, byte, mask) = bit_location(b);
    img.block_mut(block)?[byte] &= !mask;
    trace!(block = b.0, "allocated");
    Ok(())
}

/// Mark block `b` free (set its bit). Indices outside the data region are
/// ignored: the boot sector, superblock, bitmap, inode table, and journal
/// must never be marked free. Idempotent.
pub fn free_block(img: &mut DiskImage, b: BlockNo) -> Result<()> {
    if !img.is_data_block(b) {
        debug!(block = b.0, "ignoring free of non-data block");
        return Ok(());
    }
    let (block, byte, mask) = bit_location(b);
    img.block_mut(block)?[byte] |= mask;
    trace!(block = b.0, "freed");
    Ok(())
}

/// Smallest free block at or after `hi` (modulo `nblocks`), wrapping once
/// and stopping at `lo`. `None` means the disk is full.
pub fn find_free_block(img: &DiskImage, lo: u32, hi: u32) -> Result<Option<BlockNo>> {
    let nblocks = img.superblock().nblocks;
    let mut b = hi % nblocks;
    while b != lo {
        if block_is_free(img, BlockNo(b))? {
            return Ok(Some(BlockNo(b)));
        }
        b = (b + 1) % nblocks;
    }
    Ok(None)
}

/// Count free blocks in the whole image.
pub fn count_free(img: &DiskImage) -> Result<u32> {
    let nblocks = img.superblock().nblocks;
    let mut free = 0_u32;
    for b in 0..nblocks {
        if block_is_free(img, BlockNo(b))? {
            free += 1;
        }
    }
    Ok(free)
}

// ── Locality window ─────────────────────────────────────────────────────────

/// The `(lo, hi)` placement window for one journal batch.
///
/// A fresh window starts at `(firstdatab - 1, firstdatab)`, so the very
/// first reservation may pick `firstdatab` and the scan wraps through the
/// whole disk. The batch's first reservation pins `lo`; every reservation
/// advances `hi` past itself, so the region already handed out this batch is
/// never rescanned even though the bitmap bits are still set.
#[derive(Debug, Clone, Copy)]
pub struct FreeWindow {
    lo: u32,
    hi: u32,
    reserved: u32,
}

impl FreeWindow {
    #[must_use]
    pub fn new(sb: &Superblock) -> Self {
        Self {
            lo: sb.firstdatab - 1,
            hi: sb.firstdatab,
            reserved: 0,
        }
    }

    /// Number of reservations handed out from this window.
    #[must_use]
    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Reserve one free block near the previous reservation. The bitmap is
    /// not modified; the caller records the number and the journal apply
    /// realises it. `None` means no free block remains.
    pub fn reserve(&mut self, img: &DiskImage) -> Result<Option<BlockNo>> {
        let found = find_free_block(img, self.lo, self.hi)?;
        if let Some(b) = found {
            if self.reserved == 0 {
                self.lo = b.0;
            }
            self.hi = (b.0 + 1) % img.superblock().nblocks;
            self.reserved += 1;
        }
        Ok(found)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
