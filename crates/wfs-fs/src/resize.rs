//! Resize planning and the file size engine.
//!
//! [`ResizePlanner`] stages the effects of growing or shrinking a file by
//! one block at a time: which slot to write, which meta-blocks to reserve
//! or release, and which data blocks land in the affected list. It works on
//! copies (an inode shadow plus scratch indirect buffers) and never touches
//! the image; [`change_size`] drains it into journal batches.
//!
//! Batch boundaries: a batch ends when the target is reached, when `JMAX`
//! data blocks are planned, or right after a step that allocates or frees
//! an indirect or doubly-indirect meta-block. A meta-block may only ride
//! along with the batch's first data reservation; a later step that would
//! need one is deferred to open the next batch instead, which keeps every
//! batch to at most one indirect and one doubly-indirect edit.

use tracing::debug;
use wfs_alloc::FreeWindow;
use wfs_error::{Result, WfsError};
use wfs_image::DiskImage;
use wfs_journal::{commit, StagedBatch};
use wfs_ondisk::{BlockMap, Inode, InodeKind, JournalKind, ResizeTouch, SlotPath};
use wfs_types::{size_to_blocks, BlockNo, InodeNo, BLKSIZE, JMAX, MAXFILESIZE, NINDIRECT};

/// Result of planning one block-level step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlanOutcome {
    /// Step planned; the batch may continue.
    Planned,
    /// Step planned and a meta-block boundary was crossed; end the batch.
    Boundary,
    /// Nothing planned: the step needs a meta-block but the batch already
    /// holds reservations. End the batch and re-plan in the next one.
    Defer,
}

/// Plans one journal batch of grow or shrink steps against copies of the
/// target inode and its scratch indirect blocks.
pub(crate) struct ResizePlanner<'a> {
    img: &'a DiskImage,
    size: u32,
    map: BlockMap,
    nlink: u32,
    mode: u32,
    is_dir: bool,
    indirect: Box<[u32; NINDIRECT]>,
    indirect2: Box<[u32; NINDIRECT]>,
    indirect_blockno: u32,
    indirect2_blockno: u32,
    touched: ResizeTouch,
    affected: Vec<BlockNo>,
    window: FreeWindow,
}

impl<'a> ResizePlanner<'a> {
    /// Build a planner for one batch. Loads scratch copies of the indirect
    /// blocks containing the batch's working position: the next index when
    /// growing, the last index when shrinking.
    pub(crate) fn new(img: &'a DiskImage, inode: &Inode, growing: bool) -> Result<Self> {
        let (mode, map, is_dir) = match &inode.kind {
            InodeKind::Regular { mode, map } => (*mode, *map, false),
            InodeKind::Directory { mode, map } => (*mode, *map, true),
            InodeKind::Symlink { .. } => return Err(WfsError::NotPermitted),
        };

        let blocks = size_to_blocks(inode.size);
        let ctx = if growing { blocks } else { blocks.saturating_sub(1) };

        let mut indirect = Box::new([0_u32; NINDIRECT]);
        let mut indirect2 = Box::new([0_u32; NINDIRECT]);
        let mut indirect_blockno = 0_u32;
        let mut indirect2_blockno = 0_u32;

        match SlotPath::of(ctx) {
            Some(SlotPath::Indirect { .. }) => {
                indirect_blockno = map.indirect;
                if indirect_blockno != 0 {
                    *indirect = img.u32_slots(BlockNo(indirect_blockno))?;
                }
            }
            Some(SlotPath::Indirect2 { islot, .. }) => {
                indirect2_blockno = map.indirect2;
                if indirect2_blockno != 0 {
                    *indirect2 = img.u32_slots(BlockNo(indirect2_blockno))?;
                    indirect_blockno = indirect2[islot];
                    if indirect_blockno != 0 {
                        *indirect = img.u32_slots(BlockNo(indirect_blockno))?;
                    }
                }
            }
            Some(SlotPath::Direct { .. }) | None => {}
        }

        Ok(Self {
            img,
            size: inode.size,
            map,
            nlink: inode.nlink,
            mode,
            is_dir,
            indirect,
            indirect2,
            indirect_blockno,
            indirect2_blockno,
            touched: ResizeTouch::default(),
            affected: Vec::new(),
            window: FreeWindow::new(img.superblock()),
        })
    }

    pub(crate) fn size(&self) -> u32 {
        self.size
    }

    pub(crate) fn affected_len(&self) -> usize {
        self.affected.len()
    }

    /// Pin the exact byte size once the target block count is reached.
    pub(crate) fn set_size(&mut self, size: u32) {
        self.size = size;
    }

    /// Plan the addition of one data block at the end of the file.
    pub(crate) fn plan_add(&mut self) -> Result<PlanOutcome> {
        let n = size_to_blocks(self.size);
        let Some(path) = SlotPath::of(n) else {
            return Err(WfsError::NoSpace);
        };

        let crosses = path.is_indirect_boundary();
        if crosses && !self.affected.is_empty() {
            return Ok(PlanOutcome::Defer);
        }

        let Some(data_block) = self.window.reserve(self.img)? else {
            return Err(WfsError::NoSpace);
        };

        if path.is_indirect2_boundary() {
            let Some(meta2) = self.window.reserve(self.img)? else {
                return Err(WfsError::NoSpace);
            };
            self.touched.indirect2 = true;
            self.indirect2_blockno = meta2.0;
            self.map.indirect2 = meta2.0;
        }

        if crosses {
            let Some(meta) = self.window.reserve(self.img)? else {
                return Err(WfsError::NoSpace);
            };
            self.touched.indirect = true;
            self.indirect_blockno = meta.0;
            if let SlotPath::Indirect2 { islot, .. } = path {
                self.indirect2[islot] = meta.0;
            } else {
                self.map.indirect = meta.0;
            }
        }

        match path {
            SlotPath::Direct { slot } => self.map.direct[slot] = data_block.0,
            SlotPath::Indirect { slot } | SlotPath::Indirect2 { slot, .. } => {
                self.indirect[slot] = data_block.0;
            }
        }

        self.affected.push(data_block);
        self.size = (n + 1) * BLKSIZE as u32;
        Ok(if crosses {
            PlanOutcome::Boundary
        } else {
            PlanOutcome::Planned
        })
    }

    /// Plan the removal of the file's last data block.
    pub(crate) fn plan_free(&mut self) -> Result<PlanOutcome> {
        let n = size_to_blocks(self.size);
        let last = n.checked_sub(1).ok_or_else(|| {
            WfsError::Io("cannot free a block from an empty file".into())
        })?;
        let Some(path) = SlotPath::of(last) else {
            return Err(WfsError::Io(format!("file block {last} beyond the map")));
        };

        let mut boundary = false;
        let freed = match path {
            SlotPath::Direct { slot } => {
                let v = self.map.direct[slot];
                self.map.direct[slot] = 0;
                v
            }
            SlotPath::Indirect { slot } => {
                let v = self.indirect[slot];
                self.indirect[slot] = 0;
                if slot == 0 {
                    // The indirect block just emptied; release it too.
                    boundary = true;
                    self.touched.indirect = true;
                    self.map.indirect = 0;
                }
                v
            }
            SlotPath::Indirect2 { islot, slot } => {
                let v = self.indirect[slot];
                self.indirect[slot] = 0;
                if slot == 0 {
                    boundary = true;
                    self.touched.indirect = true;
                    self.indirect2[islot] = 0;
                    if islot == 0 {
                        // The whole doubly-indirect region collapsed.
                        self.touched.indirect2 = true;
                        self.map.indirect2 = 0;
                    }
                }
                v
            }
        };

        self.affected.push(BlockNo(freed));
        self.size = last * BLKSIZE as u32;
        Ok(if boundary {
            PlanOutcome::Boundary
        } else {
            PlanOutcome::Planned
        })
    }

    /// Finish the batch: the inode shadow plus staged meta/affected state
    /// become an immutable journal batch value.
    pub(crate) fn into_batch(self, kind: JournalKind, ino: InodeNo) -> StagedBatch {
        let inode_kind = if self.is_dir {
            InodeKind::Directory {
                mode: self.mode,
                map: self.map,
            }
        } else {
            InodeKind::Regular {
                mode: self.mode,
                map: self.map,
            }
        };
        let inode = Inode {
            size: self.size,
            nlink: self.nlink,
            kind: inode_kind,
        };
        let indirect = (self.indirect_blockno != 0).then_some(self.indirect);
        let indirect2 = (self.indirect2_blockno != 0).then_some(self.indirect2);
        StagedBatch::resize(
            kind,
            ino,
            inode,
            self.affected,
            BlockNo(self.indirect_blockno),
            BlockNo(self.indirect2_blockno),
            self.touched,
            indirect,
            indirect2,
        )
    }
}

// ── Size engine ─────────────────────────────────────────────────────────────

/// Grow or shrink a file to exactly `new_size` bytes, journaling the work in
/// batches of at most `JMAX` data blocks plus one indirect and one
/// doubly-indirect edit.
///
/// Atomicity is per batch: a crash mid-sequence leaves the file at an
/// intermediate but internally consistent size. A grow that runs out of
/// space is rolled back to the original size before the error surfaces.
pub fn change_size(img: &mut DiskImage, ino: InodeNo, new_size: u32) -> Result<()> {
    if new_size > MAXFILESIZE {
        return Err(WfsError::NoSpace);
    }
    let inode = img.read_inode(ino)?;
    if matches!(inode.kind, InodeKind::Symlink { .. }) {
        return Err(WfsError::NotPermitted);
    }

    debug!(ino = ino.0, from = inode.size, to = new_size, "change_size");
    match new_size.cmp(&inode.size) {
        std::cmp::Ordering::Less => shrink(img, ino, new_size),
        std::cmp::Ordering::Greater => {
            let original = inode.size;
            match grow(img, ino, new_size) {
                Err(WfsError::NoSpace) => {
                    // Undo already-applied batches so the caller observes
                    // the original size and blocks.
                    shrink(img, ino, original)?;
                    Err(WfsError::NoSpace)
                }
                other => other,
            }
        }
        std::cmp::Ordering::Equal => Ok(()),
    }
}

fn grow(img: &mut DiskImage, ino: InodeNo, new_size: u32) -> Result<()> {
    let target_blocks = size_to_blocks(new_size);
    loop {
        let inode = img.read_inode(ino)?;
        if inode.size >= new_size {
            return Ok(());
        }

        let mut planner = ResizePlanner::new(img, &inode, true)?;
        while planner.affected_len() < JMAX && size_to_blocks(planner.size()) < target_blocks {
            match planner.plan_add()? {
                PlanOutcome::Planned => {}
                PlanOutcome::Boundary | PlanOutcome::Defer => break,
            }
        }
        if size_to_blocks(planner.size()) >= target_blocks {
            planner.set_size(new_size);
        }

        let batch = planner.into_batch(JournalKind::Alloc, ino);
        commit(img, &batch)?;

        // Fresh data blocks must read as zeros.
        for b in &batch.affected {
            img.block_mut(*b)?.fill(0);
        }
    }
}

fn shrink(img: &mut DiskImage, ino: InodeNo, new_size: u32) -> Result<()> {
    let target_blocks = size_to_blocks(new_size);
    loop {
        let inode = img.read_inode(ino)?;
        if inode.size <= new_size {
            // Zero the cut-off tail of the surviving last block, so a later
            // grow over this range reads as zeros.
            let tail = new_size as usize % BLKSIZE;
            if tail != 0 {
                let blockno = img.inode_blockno_at(&inode, new_size - 1)?;
                if !blockno.is_none() {
                    img.block_mut(blockno)?[tail..].fill(0);
                }
            }
            return Ok(());
        }

        let mut planner = ResizePlanner::new(img, &inode, false)?;
        while planner.affected_len() < JMAX && size_to_blocks(planner.size()) > target_blocks {
            match planner.plan_free()? {
                PlanOutcome::Planned => {}
                PlanOutcome::Boundary | PlanOutcome::Defer => break,
            }
        }
        if size_to_blocks(planner.size()) <= target_blocks {
            planner.set_size(new_size);
        }

        let batch = planner.into_batch(JournalKind::Free, ino);
        commit(img, &batch)?;
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
