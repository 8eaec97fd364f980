//! Directory scanning and slot management.
//!
//! A directory's contents are a dense array of fixed-size entries; an entry
//! with inode number 0 is a tombstone. Scans are linear. When no blank slot
//! exists the directory grows by exactly one block, which is zeroed before
//! any slot in it is handed out.

use wfs_error::{Result, WfsError};
use wfs_image::DiskImage;
use wfs_ondisk::{DirEntry, FileType, Inode};
use wfs_types::{BlockNo, InodeNo, BLKSIZE, DIRENTRY_SIZE};

use crate::resize::change_size;

/// Parse the entry at byte offset `off` of the directory's contents.
pub(crate) fn read_entry_at(img: &DiskImage, dir: &Inode, off: u32) -> Result<DirEntry> {
    let blockno = img.inode_blockno_at(dir, off)?;
    if blockno.is_none() {
        return Err(WfsError::Io(format!("directory block missing at offset {off}")));
    }
    let block = img.block(blockno)?;
    let o = off as usize % BLKSIZE;
    DirEntry::parse_from_bytes(&block[o..o + DIRENTRY_SIZE]).map_err(WfsError::from)
}

/// Find the live entry named `name`. Returns its byte offset and contents.
pub(crate) fn find_direntry(
    img: &DiskImage,
    dir: &Inode,
    name: &str,
) -> Result<Option<(u32, DirEntry)>> {
    let mut off = 0_u32;
    while off < dir.size {
        let entry = read_entry_at(img, dir, off)?;
        if !entry.is_tombstone() && entry.name == name {
            return Ok(Some((off, entry)));
        }
        off += DIRENTRY_SIZE as u32;
    }
    Ok(None)
}

/// A blank entry slot: the live block holding it and the slot's byte offset
/// within that block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlankSlot {
    pub blockno: BlockNo,
    pub offset: usize,
}

/// Find a tombstone slot, growing the directory by one zeroed block when
/// the dense array is full. Growth failures propagate NO_SPACE.
pub(crate) fn find_blank_slot(img: &mut DiskImage, dir_ino: InodeNo) -> Result<BlankSlot> {
    let dir = img.read_inode(dir_ino)?;
    let mut off = 0_u32;
    while off < dir.size {
        let entry = read_entry_at(img, &dir, off)?;
        if entry.is_tombstone() {
            let blockno = img.inode_blockno_at(&dir, off)?;
            return Ok(BlankSlot {
                blockno,
                offset: off as usize % BLKSIZE,
            });
        }
        off += DIRENTRY_SIZE as u32;
    }

    let old_size = dir.size;
    change_size(img, dir_ino, old_size + BLKSIZE as u32)?;
    let dir = img.read_inode(dir_ino)?;
    let blockno = img.inode_blockno_at(&dir, old_size)?;
    if blockno.is_none() {
        return Err(WfsError::Io("directory grew without a block".into()));
    }
    img.block_mut(blockno)?.fill(0);
    Ok(BlankSlot { blockno, offset: 0 })
}

// ── readdir ─────────────────────────────────────────────────────────────────

/// One `readdir` emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaddirEntry {
    pub name: String,
    pub ino: InodeNo,
    pub kind: FileType,
    /// Cursor to pass for the next entry.
    pub next_cursor: u64,
}

/// Enumerate a directory. Cursor 0 and 1 emit synthetic `.` and `..`
/// (directories store neither on disk; the caller supplies the parent).
/// Positions from 2 map into the dense entry array, skipping tombstones.
/// Returns `None` at end of directory.
pub fn readdir(
    img: &DiskImage,
    dir_ino: InodeNo,
    parent_ino: InodeNo,
    cursor: u64,
) -> Result<Option<ReaddirEntry>> {
    let dir = img.read_inode(dir_ino)?;

    if cursor == 0 {
        return Ok(Some(ReaddirEntry {
            name: ".".to_owned(),
            ino: dir_ino,
            kind: FileType::Directory,
            next_cursor: 1,
        }));
    }
    if cursor == 1 {
        return Ok(Some(ReaddirEntry {
            name: "..".to_owned(),
            ino: parent_ino,
            kind: FileType::Directory,
            next_cursor: 2,
        }));
    }

    let mut cursor = cursor;
    loop {
        let off = (cursor - 2) * DIRENTRY_SIZE as u64;
        if off >= u64::from(dir.size) {
            return Ok(None);
        }
        let entry = read_entry_at(img, &dir, off as u32)?;
        if entry.is_tombstone() {
            cursor += 1;
            continue;
        }
        let kind = img.read_inode(entry.ino)?.file_type();
        return Ok(Some(ReaddirEntry {
            name: entry.name,
            ino: entry.ino,
            kind,
            next_cursor: cursor + 1,
        }));
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
