#![forbid(unsafe_code)]
//! Write-ahead journal for WrenFS.
//!
//! Every metadata-touching mutation is expressed as a [`StagedBatch`] value,
//! built off to the side by a planner; [`commit`] is the single point where
//! live structures change. Staging writes the batch into the fixed journal
//! region and sets the committed flag only after every payload byte is in
//! place; apply then copies the staged effects onto the live structures and
//! clears the flag. A crash between commit and clear is healed by
//! [`recover`] at the next mount — apply is idempotent.
//!
//! Region layout (region-relative): block 0 header, block 1 affected-block
//! list, block 2 doubly-indirect snapshot, block 3 indirect snapshot,
//! blocks 4.. data payloads (one per affected block, writes only).

use tracing::{debug, info, warn};
use wfs_alloc::{allocate_blockno, free_block};
use wfs_error::{Result, WfsError};
use wfs_image::DiskImage;
use wfs_ondisk::{Inode, JournalHeader, JournalKind, ResizeTouch};
use wfs_types::{
    BlockNo, InodeNo, BLKSIZE, JMAX, JOURNAL_DATA_POS, JOURNAL_HEADER_POS, JOURNAL_INDIR2_POS,
    JOURNAL_INDIR_POS, JOURNAL_LIST_POS, NINDIRECT,
};

// ── Staged batch ────────────────────────────────────────────────────────────

/// One atomic group of staged changes: an inode snapshot, up to [`JMAX`]
/// affected data blocks, at most one indirect and one doubly-indirect
/// meta-block edit, and (for writes and directory edits) data payloads.
///
/// The batch is a plain value; until [`commit`] nothing it describes has
/// touched the image, so abandoning one on an error path needs no unwind.
#[derive(Debug, Clone)]
pub struct StagedBatch {
    pub kind: JournalKind,
    pub inode_num: InodeNo,
    /// The target inode as it must read after apply.
    pub inode: Inode,
    /// Data blocks this batch allocates, frees, or rewrites.
    pub affected: Vec<BlockNo>,
    pub indirect_blockno: BlockNo,
    pub indirect2_blockno: BlockNo,
    pub touched: ResizeTouch,
    /// Post-apply contents of the indirect block, when one is in play.
    pub indirect: Option<Box<[u32; NINDIRECT]>>,
    /// Post-apply contents of the doubly-indirect block, when one is in play.
    pub indirect2: Option<Box<[u32; NINDIRECT]>>,
    /// Live block receiving the staged directory payload (CREATE/HARDLINK).
    pub dir_data_blockno: BlockNo,
    /// Full-block payloads: one per affected block for WRITE, exactly one
    /// (the rewritten directory block) for CREATE/HARDLINK, empty otherwise.
    pub data: Vec<Vec<u8>>,
}

impl StagedBatch {
    /// A grow/shrink batch (kind ALLOC or FREE).
    #[must_use]
    #[expect(clippy::too_many_arguments)]
    pub fn resize(
        kind: JournalKind,
        inode_num: InodeNo,
        inode: Inode,
        affected: Vec<BlockNo>,
        indirect_blockno: BlockNo,
        indirect2_blockno: BlockNo,
        touched: ResizeTouch,
        indirect: Option<Box<[u32; NINDIRECT]>>,
        indirect2: Option<Box<[u32; NINDIRECT]>>,
    ) -> Self {
        Self {
            kind,
            inode_num,
            inode,
            affected,
            indirect_blockno,
            indirect2_blockno,
            touched,
            indirect,
            indirect2,
            dir_data_blockno: BlockNo::NONE,
            data: Vec::new(),
        }
    }

    /// A byte-write batch: `data[i]` is the new full contents of
    /// `affected[i]`.
    #[must_use]
    pub fn write(inode_num: InodeNo, inode: Inode, affected: Vec<BlockNo>, data: Vec<Vec<u8>>) -> Self {
        Self {
            kind: JournalKind::Write,
            inode_num,
            inode,
            affected,
            indirect_blockno: BlockNo::NONE,
            indirect2_blockno: BlockNo::NONE,
            touched: ResizeTouch::default(),
            indirect: None,
            indirect2: None,
            dir_data_blockno: BlockNo::NONE,
            data,
        }
    }

    /// A directory-edit batch (kind CREATE or HARDLINK): the inode snapshot
    /// plus one rewritten directory block.
    #[must_use]
    pub fn dir_edit(
        kind: JournalKind,
        inode_num: InodeNo,
        inode: Inode,
        dir_data_blockno: BlockNo,
        dir_block: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            inode_num,
            inode,
            affected: Vec::new(),
            indirect_blockno: BlockNo::NONE,
            indirect2_blockno: BlockNo::NONE,
            touched: ResizeTouch::default(),
            indirect: None,
            indirect2: None,
            dir_data_blockno,
            data: vec![dir_block],
        }
    }

    fn validate(&self) -> Result<()> {
        if self.affected.len() > JMAX {
            return Err(WfsError::Io(format!(
                "batch affects {} blocks, journal holds {JMAX}",
                self.affected.len()
            )));
        }
        let expected_payloads = match self.kind {
            JournalKind::Write => self.affected.len(),
            JournalKind::Create | JournalKind::HardLink => 1,
            JournalKind::Empty | JournalKind::Free | JournalKind::Alloc => 0,
        };
        if self.data.len() != expected_payloads {
            return Err(WfsError::Io(format!(
                "batch kind {:?} staged {} payloads, expected {expected_payloads}",
                self.kind,
                self.data.len()
            )));
        }
        if self.data.iter().any(|d| d.len() != BLKSIZE) {
            return Err(WfsError::Io("staged payload is not block-sized".into()));
        }
        Ok(())
    }

    fn header(&self) -> JournalHeader {
        JournalHeader {
            kind: self.kind,
            committed: false,
            inode_num: self.inode_num,
            n_blocks_affected: self.affected.len() as u32,
            indirect_blockno: self.indirect_blockno,
            indirect2_blockno: self.indirect2_blockno,
            touched: self.touched,
            dir_data_blockno: self.dir_data_blockno,
            inode: self.inode.clone(),
        }
    }
}

// ── Staging ─────────────────────────────────────────────────────────────────

/// Read the current journal header.
pub fn read_header(img: &DiskImage) -> Result<JournalHeader> {
    let block = img.block(img.journal_block(JOURNAL_HEADER_POS))?;
    JournalHeader::parse_from_bytes(block).map_err(WfsError::from)
}

fn write_header(img: &mut DiskImage, header: &JournalHeader) -> Result<()> {
    let block = img.block_mut(img.journal_block(JOURNAL_HEADER_POS))?;
    block[..JournalHeader::SIZE].fill(0);
    header.write_to(block);
    Ok(())
}

fn set_committed(img: &mut DiskImage, committed: bool) -> Result<()> {
    let block = img.block_mut(img.journal_block(JOURNAL_HEADER_POS))?;
    let off = JournalHeader::COMMITTED_OFFSET;
    block[off..off + 4].copy_from_slice(&u32::from(committed).to_le_bytes());
    Ok(())
}

fn write_slots(img: &mut DiskImage, pos: u32, slots: &[u32; NINDIRECT]) -> Result<()> {
    let block = img.block_mut(img.journal_block(pos))?;
    for (i, slot) in slots.iter().enumerate() {
        block[i * 4..i * 4 + 4].copy_from_slice(&slot.to_le_bytes());
    }
    Ok(())
}

/// Write `batch` into the journal region and set the committed flag.
///
/// Every payload lands before the flag: a crash before the final step loses
/// the plan, never half-applies it.
pub fn stage(img: &mut DiskImage, batch: &StagedBatch) -> Result<()> {
    batch.validate()?;

    write_header(img, &batch.header())?;

    let list = img.block_mut(img.journal_block(JOURNAL_LIST_POS))?;
    list.fill(0);
    for (i, b) in batch.affected.iter().enumerate() {
        list[i * 4..i * 4 + 4].copy_from_slice(&b.0.to_le_bytes());
    }

    if let Some(slots) = &batch.indirect2 {
        write_slots(img, JOURNAL_INDIR2_POS, slots)?;
    }
    if let Some(slots) = &batch.indirect {
        write_slots(img, JOURNAL_INDIR_POS, slots)?;
    }
    for (i, payload) in batch.data.iter().enumerate() {
        let dst = img.block_mut(img.journal_block(JOURNAL_DATA_POS + i as u32))?;
        dst.copy_from_slice(payload);
    }

    set_committed(img, true)?;
    debug!(
        kind = ?batch.kind,
        inode = batch.inode_num.0,
        n_blocks = batch.affected.len(),
        "staged journal batch"
    );
    Ok(())
}

// ── Apply ───────────────────────────────────────────────────────────────────

fn read_affected(img: &DiskImage, n: u32) -> Result<Vec<BlockNo>> {
    if n as usize > JMAX {
        return Err(WfsError::Io(format!(
            "journal header claims {n} affected blocks, region holds {JMAX}"
        )));
    }
    let list = img.block(img.journal_block(JOURNAL_LIST_POS))?;
    Ok((0..n as usize)
        .map(|i| {
            BlockNo(u32::from_le_bytes([
                list[i * 4],
                list[i * 4 + 1],
                list[i * 4 + 2],
                list[i * 4 + 3],
            ]))
        })
        .collect())
}

fn copy_journal_block(img: &mut DiskImage, pos: u32, dst: BlockNo) -> Result<()> {
    let payload = img.block(img.journal_block(pos))?.to_vec();
    img.block_mut(dst)?.copy_from_slice(&payload);
    Ok(())
}

/// Apply whatever transaction the journal region currently describes, then
/// mark the journal empty.
///
/// Idempotent: re-copying a staged block is a no-op if already done, and the
/// bitmap bit operations converge on the same state.
pub fn apply(img: &mut DiskImage) -> Result<()> {
    let header = read_header(img)?;
    let affected = read_affected(img, header.n_blocks_affected)?;

    match header.kind {
        JournalKind::Empty => {}
        JournalKind::Free => {
            img.write_inode(header.inode_num, &header.inode)?;

            if header.touched.indirect2 {
                free_block(img, header.indirect2_blockno)?;
            }
            if !header.indirect2_blockno.is_none() {
                copy_journal_block(img, JOURNAL_INDIR2_POS, header.indirect2_blockno)?;
            }
            if header.touched.indirect {
                free_block(img, header.indirect_blockno)?;
            }
            if !header.indirect_blockno.is_none() {
                copy_journal_block(img, JOURNAL_INDIR_POS, header.indirect_blockno)?;
            }
            for b in &affected {
                free_block(img, *b)?;
            }
        }
        JournalKind::Alloc => {
            img.write_inode(header.inode_num, &header.inode)?;

            for b in &affected {
                allocate_blockno(img, *b)?;
            }
            if header.touched.indirect {
                allocate_blockno(img, header.indirect_blockno)?;
            }
            if !header.indirect_blockno.is_none() {
                copy_journal_block(img, JOURNAL_INDIR_POS, header.indirect_blockno)?;
            }
            if header.touched.indirect2 {
                allocate_blockno(img, header.indirect2_blockno)?;
            }
            if !header.indirect2_blockno.is_none() {
                copy_journal_block(img, JOURNAL_INDIR2_POS, header.indirect2_blockno)?;
            }
        }
        JournalKind::Write => {
            for (i, b) in affected.iter().enumerate() {
                copy_journal_block(img, JOURNAL_DATA_POS + i as u32, *b)?;
            }
        }
        JournalKind::Create | JournalKind::HardLink => {
            img.write_inode(header.inode_num, &header.inode)?;
            copy_journal_block(img, JOURNAL_DATA_POS, header.dir_data_blockno)?;
        }
    }

    write_header(img, &JournalHeader::empty())?;
    debug!(kind = ?header.kind, inode = header.inode_num.0, "applied journal batch");
    Ok(())
}

/// Stage and apply in one step: the single mutation point for all journaled
/// operations.
pub fn commit(img: &mut DiskImage, batch: &StagedBatch) -> Result<()> {
    stage(img, batch)?;
    apply(img)
}

// ── Recovery ────────────────────────────────────────────────────────────────

/// Mount-time recovery: replay a committed-but-unapplied transaction, and
/// leave the journal empty either way. Returns whether a replay happened.
///
/// The committed flag is set only after every payload byte, so an
/// unparseable header can only come from a crash mid-stage; the plan is
/// lost and the journal is cleared.
pub fn recover(img: &mut DiskImage) -> Result<bool> {
    let header = match read_header(img) {
        Ok(header) => header,
        Err(err) => {
            warn!(%err, "discarding torn journal header");
            write_header(img, &JournalHeader::empty())?;
            return Ok(false);
        }
    };
    if header.committed {
        info!(kind = ?header.kind, inode = header.inode_num.0, "replaying committed journal");
        apply(img)?;
        return Ok(true);
    }
    if header.kind != JournalKind::Empty {
        // Crash after the header landed but before commit: the plan is lost.
        write_header(img, &JournalHeader::empty())?;
    }
    Ok(false)
}

// ── Tests ───────────────────────────────────────────────────────────────────
