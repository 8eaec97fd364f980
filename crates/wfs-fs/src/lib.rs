#![forbid(unsafe_code)]
//! WrenFS core.
//!
//! [`WrenFs`] owns a mounted [`DiskImage`] and exposes the name-space
//! operations an adaptor dispatches into: lookup, readdir, read, write,
//! setattr, create, unlink, link, symlink, follow_symlink.
//!
//! `&self` methods only read the image. Every `&mut self` method is a
//! serialized mutator whose effects reach the live structures exclusively
//! through journal batches (directory tombstoning and symlink-inode
//! initialization excepted, matching the on-disk format's rules for
//! records that are unreachable or independently recoverable).

mod check;
mod dir;
mod file;
mod resize;
mod symlink;

pub use check::{check, CheckReport};
pub use dir::{readdir, ReaddirEntry};
pub use resize::change_size;

use serde::Serialize;
use tracing::info;
use wfs_error::{Result, WfsError};
use wfs_image::DiskImage;
use wfs_journal::StagedBatch;
use wfs_ondisk::{BlockMap, DirEntry, FileType, Inode, InodeKind, JournalKind};
use wfs_types::{InodeNo, BLKSIZE, DIRENTRY_SIZE, MAXNAMELEN};

use dir::BlankSlot;

/// Attribute changes for [`WrenFs::setattr`]. Size changes are valid only
/// for regular files; mode changes for regular files and directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetAttr {
    pub size: Option<u32>,
    pub mode: Option<u32>,
}

/// Snapshot of an inode's externally visible metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Stat {
    pub ino: InodeNo,
    pub size: u32,
    pub kind: FileType,
    pub nlink: u32,
    pub mode: u32,
}

/// A mounted WrenFS volume.
pub struct WrenFs {
    img: DiskImage,
}

impl WrenFs {
    /// Mount an image: validate the superblock and replay a committed
    /// journal left by a crashed session.
    pub fn mount(bytes: Vec<u8>) -> Result<Self> {
        let mut img = DiskImage::open(bytes)?;
        if wfs_journal::recover(&mut img)? {
            info!("mount: replayed a committed journal");
        }
        Ok(Self { img })
    }

    /// Create and mount a fresh volume.
    pub fn format(nblocks: u32, ninodes: u32) -> Result<Self> {
        Ok(Self {
            img: wfs_image::mkfs(nblocks, ninodes)?,
        })
    }

    #[must_use]
    pub fn image(&self) -> &DiskImage {
        &self.img
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.img.as_bytes()
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.img.into_bytes()
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Look up `name` in a directory.
    pub fn lookup(&self, dir: InodeNo, name: &str) -> Result<InodeNo> {
        let dir_inode = self.require_directory(dir)?;
        validate_name(name)?;
        match dir::find_direntry(&self.img, &dir_inode, name)? {
            Some((_, entry)) => Ok(entry.ino),
            None => Err(WfsError::NotFound(name.to_owned())),
        }
    }

    /// Enumerate a directory; see [`readdir`].
    pub fn readdir(
        &self,
        dir: InodeNo,
        parent: InodeNo,
        cursor: u64,
    ) -> Result<Option<ReaddirEntry>> {
        self.require_directory(dir)?;
        dir::readdir(&self.img, dir, parent, cursor)
    }

    /// Read file bytes; see [`file::read_at`] semantics.
    pub fn read(&self, ino: InodeNo, pos: u32, buf: &mut [u8]) -> Result<usize> {
        file::read_at(&self.img, ino, pos, buf)
    }

    /// Resolve a symlink for the given effective uid.
    pub fn follow_symlink(&self, ino: InodeNo, euid: u32) -> Result<String> {
        let inode = self.img.read_inode(ino)?;
        match &inode.kind {
            InodeKind::Symlink { target } => Ok(symlink::resolve_target(target, euid)),
            _ => Err(WfsError::Io(format!("inode {ino} is not a symlink"))),
        }
    }

    /// Externally visible metadata of a live inode.
    pub fn stat(&self, ino: InodeNo) -> Result<Stat> {
        let inode = self.img.read_inode(ino)?;
        if !inode.is_live() {
            return Err(WfsError::NotFound(format!("inode {ino}")));
        }
        Ok(Stat {
            ino,
            size: inode.size,
            kind: inode.file_type(),
            nlink: inode.nlink,
            mode: inode.mode(),
        })
    }

    /// Run the read-only integrity scan.
    pub fn check(&self) -> Result<CheckReport> {
        check::check(&self.img)
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Write file bytes, growing the file as needed; see [`file::write_at`].
    pub fn write(&mut self, ino: InodeNo, pos: u32, data: &[u8], append: bool) -> Result<usize> {
        file::write_at(&mut self.img, ino, pos, data, append)
    }

    /// Change size and/or mode.
    pub fn setattr(&mut self, ino: InodeNo, attr: SetAttr) -> Result<()> {
        if let Some(size) = attr.size {
            let inode = self.img.read_inode(ino)?;
            if !matches!(inode.kind, InodeKind::Regular { .. }) {
                return Err(WfsError::NotPermitted);
            }
            resize::change_size(&mut self.img, ino, size)?;
        }
        if let Some(mode) = attr.mode {
            let mut inode = self.img.read_inode(ino)?;
            match &mut inode.kind {
                InodeKind::Regular { mode: m, .. } | InodeKind::Directory { mode: m, .. } => {
                    *m = mode;
                }
                InodeKind::Symlink { .. } => return Err(WfsError::NotPermitted),
            }
            self.img.write_inode(ino, &inode)?;
        }
        Ok(())
    }

    /// Create a regular file.
    pub fn create(&mut self, dir: InodeNo, name: &str, mode: u32) -> Result<InodeNo> {
        let dir_inode = self.require_directory(dir)?;
        validate_name(name)?;
        if dir::find_direntry(&self.img, &dir_inode, name)?.is_some() {
            return Err(WfsError::Exists);
        }

        let slot = dir::find_blank_slot(&mut self.img, dir)?;
        let ino = self.find_free_inode()?;
        let entry = DirEntry {
            ino,
            name: name.to_owned(),
        };
        let block = self.staged_dir_block(slot, &entry)?;
        let inode = Inode {
            size: 0,
            nlink: 1,
            kind: InodeKind::Regular {
                mode,
                map: BlockMap::default(),
            },
        };

        let batch = StagedBatch::dir_edit(JournalKind::Create, ino, inode, slot.blockno, block);
        wfs_journal::commit(&mut self.img, &batch)?;
        info!(dir = dir.0, ino = ino.0, name, "created file");
        Ok(ino)
    }

    /// Add a hard link to `src` under `dir` as `name`.
    pub fn link(&mut self, src: InodeNo, dir: InodeNo, name: &str) -> Result<()> {
        let dir_inode = self.require_directory(dir)?;
        validate_name(name)?;

        let mut src_inode = self.img.read_inode(src)?;
        if !src_inode.is_live() {
            return Err(WfsError::Io(format!("link source inode {src} is not live")));
        }
        if src_inode.file_type() == FileType::Directory {
            return Err(WfsError::NotPermitted);
        }
        if dir::find_direntry(&self.img, &dir_inode, name)?.is_some() {
            return Err(WfsError::Exists);
        }

        let slot = dir::find_blank_slot(&mut self.img, dir)?;
        let entry = DirEntry {
            ino: src,
            name: name.to_owned(),
        };
        let block = self.staged_dir_block(slot, &entry)?;
        src_inode.nlink += 1;

        let batch =
            StagedBatch::dir_edit(JournalKind::HardLink, src, src_inode, slot.blockno, block);
        wfs_journal::commit(&mut self.img, &batch)?;
        info!(dir = dir.0, src = src.0, name, "hard link added");
        Ok(())
    }

    /// Remove the entry `name` from `dir`. The entry becomes a tombstone;
    /// an inode whose last link goes away has its blocks released and its
    /// record zeroed.
    pub fn unlink(&mut self, dir: InodeNo, name: &str) -> Result<()> {
        let dir_inode = self.require_directory(dir)?;
        validate_name(name)?;
        let Some((off, entry)) = dir::find_direntry(&self.img, &dir_inode, name)? else {
            return Err(WfsError::NotFound(name.to_owned()));
        };

        let mut target = self.img.read_inode(entry.ino)?;
        if target.file_type() == FileType::Directory {
            return Err(WfsError::NotPermitted);
        }

        // Tombstone the entry in place.
        let blockno = self.img.inode_blockno_at(&dir_inode, off)?;
        if blockno.is_none() {
            return Err(WfsError::Io(format!("directory block missing at offset {off}")));
        }
        let o = off as usize % BLKSIZE;
        self.img.block_mut(blockno)?[o..o + 4].copy_from_slice(&0_u32.to_le_bytes());

        target.nlink -= 1;
        if matches!(target.kind, InodeKind::Symlink { .. }) {
            if target.nlink == 0 {
                self.img.clear_inode(entry.ino)?;
            } else {
                self.img.write_inode(entry.ino, &target)?;
            }
        } else {
            self.img.write_inode(entry.ino, &target)?;
            if target.nlink == 0 {
                resize::change_size(&mut self.img, entry.ino, 0)?;
                self.img.clear_inode(entry.ino)?;
            }
        }
        info!(dir = dir.0, ino = entry.ino.0, name, "unlinked");
        Ok(())
    }

    /// Create a symbolic link named `name` pointing at `target`. Targets of
    /// the form `root?A:B` resolve conditionally on the follower's uid.
    pub fn symlink(&mut self, dir: InodeNo, name: &str, target: &str) -> Result<InodeNo> {
        let dir_inode = self.require_directory(dir)?;
        validate_name(name)?;
        let stored = symlink::encode_target(target)?;
        if dir::find_direntry(&self.img, &dir_inode, name)?.is_some() {
            return Err(WfsError::Exists);
        }

        let slot = dir::find_blank_slot(&mut self.img, dir)?;
        let ino = self.find_free_inode()?;
        let inode = Inode {
            size: stored.len() as u32,
            nlink: 1,
            kind: InodeKind::Symlink { target: stored },
        };
        // Written in place, un-journaled: the record is unreachable until
        // the directory entry naming it lands.
        self.img.write_inode(ino, &inode)?;

        let entry = DirEntry {
            ino,
            name: name.to_owned(),
        };
        let block = self.staged_dir_block(slot, &entry)?;
        let batch = StagedBatch::dir_edit(JournalKind::Create, ino, inode, slot.blockno, block);
        wfs_journal::commit(&mut self.img, &batch)?;
        info!(dir = dir.0, ino = ino.0, name, "symlink created");
        Ok(ino)
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn require_directory(&self, ino: InodeNo) -> Result<Inode> {
        let inode = self.img.read_inode(ino)?;
        if !inode.is_live() {
            return Err(WfsError::NotFound(format!("inode {ino}")));
        }
        if inode.file_type() != FileType::Directory {
            return Err(WfsError::NotPermitted);
        }
        Ok(inode)
    }

    /// Lowest-numbered free inode; 0 is reserved as the tombstone sentinel.
    fn find_free_inode(&self) -> Result<InodeNo> {
        for i in 1..self.img.superblock().ninodes {
            if !self.img.read_inode(InodeNo(i))?.is_live() {
                return Ok(InodeNo(i));
            }
        }
        Err(WfsError::NoSpace)
    }

    /// Copy the live block holding `slot` and patch `entry` into it.
    fn staged_dir_block(&self, slot: BlankSlot, entry: &DirEntry) -> Result<Vec<u8>> {
        let mut block = self.img.block(slot.blockno)?.to_vec();
        block[slot.offset..slot.offset + DIRENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        Ok(block)
    }
}

/// Names must be non-empty, fit the fixed-width NUL-terminated field, and
/// stay within one directory level.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAXNAMELEN || name.bytes().any(|b| b == 0 || b == b'/') {
        return Err(WfsError::NameTooLong);
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wfs_types::ROOT_INO;

    fn fs() -> WrenFs {
        WrenFs::format(1024, 64).unwrap()
    }

    #[test]
    fn create_then_lookup_and_stat() {
        let mut fs = fs();
        let ino = fs.create(ROOT_INO, "f", 0o644).unwrap();
        assert_eq!(fs.lookup(ROOT_INO, "f").unwrap(), ino);

        let stat = fs.stat(ino).unwrap();
        assert_eq!(stat.size, 0);
        assert_eq!(stat.kind, FileType::Regular);
        assert_eq!(stat.nlink, 1);
        assert_eq!(stat.mode, 0o644);
    }

    #[test]
    fn create_allocates_the_lowest_free_inode() {
        let mut fs = fs();
        // Root is inode 1; the first file takes 2.
        let a = fs.create(ROOT_INO, "a", 0o644).unwrap();
        let b = fs.create(ROOT_INO, "b", 0o644).unwrap();
        assert_eq!(a, InodeNo(2));
        assert_eq!(b, InodeNo(3));

        // Unlinking frees the inode for reuse.
        fs.unlink(ROOT_INO, "a").unwrap();
        let c = fs.create(ROOT_INO, "c", 0o644).unwrap();
        assert_eq!(c, InodeNo(2));
    }

    #[test]
    fn create_duplicate_name_is_exists() {
        let mut fs = fs();
        fs.create(ROOT_INO, "f", 0o644).unwrap();
        assert!(matches!(
            fs.create(ROOT_INO, "f", 0o600),
            Err(WfsError::Exists)
        ));
    }

    #[test]
    fn create_name_validation() {
        let mut fs = fs();
        let long = "n".repeat(MAXNAMELEN + 1);
        assert!(matches!(
            fs.create(ROOT_INO, &long, 0o644),
            Err(WfsError::NameTooLong)
        ));
        assert!(matches!(
            fs.create(ROOT_INO, "", 0o644),
            Err(WfsError::NameTooLong)
        ));
        assert!(matches!(
            fs.create(ROOT_INO, "a/b", 0o644),
            Err(WfsError::NameTooLong)
        ));

        let exact = "n".repeat(MAXNAMELEN);
        let ino = fs.create(ROOT_INO, &exact, 0o644).unwrap();
        assert_eq!(fs.lookup(ROOT_INO, &exact).unwrap(), ino);
    }

    #[test]
    fn create_with_no_free_inodes_is_no_space() {
        // ninodes = 2: inode 0 reserved, inode 1 is the root.
        let mut fs = WrenFs::format(1024, 2).unwrap();
        assert!(matches!(
            fs.create(ROOT_INO, "f", 0o644),
            Err(WfsError::NoSpace)
        ));
    }

    #[test]
    fn unlink_removes_and_releases() {
        let mut fs = fs();
        let ino = fs.create(ROOT_INO, "f", 0o644).unwrap();
        fs.write(ino, 0, &[7_u8; 5000], false).unwrap();

        fs.unlink(ROOT_INO, "f").unwrap();
        assert!(matches!(
            fs.lookup(ROOT_INO, "f"),
            Err(WfsError::NotFound(_))
        ));
        // The record is zeroed wholesale.
        assert!(matches!(fs.stat(ino), Err(WfsError::NotFound(_))));

        let report = fs.check().unwrap();
        assert!(report.is_clean(), "{:?}", report.errors);
    }

    #[test]
    fn unlink_missing_name_is_not_found() {
        let mut fs = fs();
        assert!(matches!(
            fs.unlink(ROOT_INO, "ghost"),
            Err(WfsError::NotFound(_))
        ));
    }

    #[test]
    fn unlink_of_a_directory_is_refused() {
        let mut fs = fs();
        let ino = fs.create(ROOT_INO, "d", 0o755).unwrap();
        // Retag the created inode as a directory; the entry now names one.
        let mut inode = fs.img.read_inode(ino).unwrap();
        inode.kind = InodeKind::Directory {
            mode: 0o755,
            map: BlockMap::default(),
        };
        fs.img.write_inode(ino, &inode).unwrap();

        assert!(matches!(
            fs.unlink(ROOT_INO, "d"),
            Err(WfsError::NotPermitted)
        ));
    }

    #[test]
    fn hard_link_shares_the_inode() {
        let mut fs = fs();
        let ino = fs.create(ROOT_INO, "f", 0o644).unwrap();
        fs.write(ino, 0, b"payload", false).unwrap();

        fs.link(ino, ROOT_INO, "g").unwrap();
        assert_eq!(fs.stat(ino).unwrap().nlink, 2);
        assert_eq!(fs.lookup(ROOT_INO, "g").unwrap(), ino);

        // Dropping the original name leaves the contents reachable via g.
        fs.unlink(ROOT_INO, "f").unwrap();
        assert_eq!(fs.stat(ino).unwrap().nlink, 1);
        let mut buf = [0_u8; 16];
        let n = fs.read(ino, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"payload");
    }

    #[test]
    fn hard_link_to_dead_inode_is_io() {
        let mut fs = fs();
        assert!(matches!(
            fs.link(InodeNo(9), ROOT_INO, "g"),
            Err(WfsError::Io(_))
        ));
    }

    #[test]
    fn hard_link_to_directory_is_refused() {
        let mut fs = fs();
        assert!(matches!(
            fs.link(ROOT_INO, ROOT_INO, "self"),
            Err(WfsError::NotPermitted)
        ));
    }

    #[test]
    fn symlink_store_and_follow() {
        let mut fs = fs();
        let ino = fs.symlink(ROOT_INO, "s", "/target/path").unwrap();
        assert_eq!(fs.stat(ino).unwrap().kind, FileType::Symlink);
        assert_eq!(fs.stat(ino).unwrap().size, 12);
        assert_eq!(fs.follow_symlink(ino, 0).unwrap(), "/target/path");
        assert_eq!(fs.follow_symlink(ino, 1000).unwrap(), "/target/path");
    }

    #[test]
    fn conditional_symlink_resolves_by_uid() {
        let mut fs = fs();
        let ino = fs.symlink(ROOT_INO, "s", "root?/a:/b").unwrap();
        assert_eq!(fs.follow_symlink(ino, 0).unwrap(), "/a");
        assert_eq!(fs.follow_symlink(ino, 1000).unwrap(), "/b");
        // Stored length covers the whole rewritten target.
        assert_eq!(fs.stat(ino).unwrap().size, 10);
    }

    #[test]
    fn malformed_conditional_symlink_is_rejected() {
        let mut fs = fs();
        assert!(matches!(
            fs.symlink(ROOT_INO, "s", "root?missing-colon"),
            Err(WfsError::NameTooLong)
        ));
        assert!(matches!(fs.lookup(ROOT_INO, "s"), Err(WfsError::NotFound(_))));
    }

    #[test]
    fn unlink_of_last_symlink_zeroes_the_record() {
        let mut fs = fs();
        let ino = fs.symlink(ROOT_INO, "s", "/x").unwrap();
        fs.unlink(ROOT_INO, "s").unwrap();
        assert!(matches!(fs.stat(ino), Err(WfsError::NotFound(_))));
        assert!(fs.check().unwrap().is_clean());
    }

    #[test]
    fn follow_on_non_symlink_is_io() {
        let mut fs = fs();
        let ino = fs.create(ROOT_INO, "f", 0o644).unwrap();
        assert!(matches!(fs.follow_symlink(ino, 0), Err(WfsError::Io(_))));
    }

    #[test]
    fn setattr_truncates_and_chmods() {
        let mut fs = fs();
        let ino = fs.create(ROOT_INO, "f", 0o644).unwrap();
        fs.write(ino, 0, &[1_u8; 3000], false).unwrap();

        fs.setattr(
            ino,
            SetAttr {
                size: Some(100),
                mode: Some(0o600),
            },
        )
        .unwrap();
        let stat = fs.stat(ino).unwrap();
        assert_eq!(stat.size, 100);
        assert_eq!(stat.mode, 0o600);
    }

    #[test]
    fn setattr_size_on_directory_is_refused() {
        let mut fs = fs();
        assert!(matches!(
            fs.setattr(
                ROOT_INO,
                SetAttr {
                    size: Some(0),
                    mode: None
                }
            ),
            Err(WfsError::NotPermitted)
        ));
    }

    #[test]
    fn setattr_on_symlink_is_refused() {
        let mut fs = fs();
        let ino = fs.symlink(ROOT_INO, "s", "/x").unwrap();
        assert!(matches!(
            fs.setattr(
                ino,
                SetAttr {
                    size: Some(0),
                    mode: None
                }
            ),
            Err(WfsError::NotPermitted)
        ));
        assert!(matches!(
            fs.setattr(
                ino,
                SetAttr {
                    size: None,
                    mode: Some(0o777)
                }
            ),
            Err(WfsError::NotPermitted)
        ));
    }

    #[test]
    fn readdir_walks_entries_and_skips_tombstones() {
        let mut fs = fs();
        fs.create(ROOT_INO, "a", 0o644).unwrap();
        fs.create(ROOT_INO, "b", 0o644).unwrap();
        fs.create(ROOT_INO, "c", 0o644).unwrap();
        fs.unlink(ROOT_INO, "b").unwrap();

        let mut names = Vec::new();
        let mut cursor = 0;
        while let Some(entry) = fs.readdir(ROOT_INO, ROOT_INO, cursor).unwrap() {
            names.push(entry.name);
            cursor = entry.next_cursor;
        }
        assert_eq!(names, vec![".", "..", "a", "c"]);
    }

    #[test]
    fn directory_grows_past_one_block_of_entries() {
        let mut fs = fs();
        for i in 0..33 {
            fs.create(ROOT_INO, &format!("f{i}"), 0o644).unwrap();
        }
        // 32 entries per block: the 33rd forces a second block.
        assert_eq!(fs.stat(ROOT_INO).unwrap().size, 2 * BLKSIZE as u32);
        for i in 0..33 {
            assert!(fs.lookup(ROOT_INO, &format!("f{i}")).is_ok());
        }
        assert!(fs.check().unwrap().is_clean());
    }

    #[test]
    fn tombstones_are_reused_before_growing() {
        let mut fs = fs();
        for i in 0..32 {
            fs.create(ROOT_INO, &format!("f{i}"), 0o644).unwrap();
        }
        fs.unlink(ROOT_INO, "f7").unwrap();
        fs.create(ROOT_INO, "again", 0o644).unwrap();
        // The tombstone absorbed the new entry: still one block.
        assert_eq!(fs.stat(ROOT_INO).unwrap().size, BLKSIZE as u32);
    }

    #[test]
    fn lookup_on_regular_file_is_refused() {
        let mut fs = fs();
        let ino = fs.create(ROOT_INO, "f", 0o644).unwrap();
        assert!(matches!(
            fs.lookup(ino, "x"),
            Err(WfsError::NotPermitted)
        ));
    }

    #[test]
    fn mount_round_trips_image_bytes() {
        let mut fs = fs();
        let ino = fs.create(ROOT_INO, "f", 0o644).unwrap();
        fs.write(ino, 0, b"persisted", false).unwrap();

        let remounted = WrenFs::mount(fs.into_bytes()).unwrap();
        let found = remounted.lookup(ROOT_INO, "f").unwrap();
        let mut buf = [0_u8; 16];
        let n = remounted.read(found, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"persisted");
    }

    #[test]
    fn check_is_clean_after_mixed_workload() {
        let mut fs = fs();
        let a = fs.create(ROOT_INO, "a", 0o644).unwrap();
        fs.write(a, 0, &vec![3_u8; 20_000], false).unwrap();
        let b = fs.create(ROOT_INO, "b", 0o600).unwrap();
        fs.write(b, 0, &vec![4_u8; 1_500], false).unwrap();
        fs.link(a, ROOT_INO, "a2").unwrap();
        fs.symlink(ROOT_INO, "s", "root?/p:/q").unwrap();
        fs.unlink(ROOT_INO, "b").unwrap();
        fs.setattr(
            a,
            SetAttr {
                size: Some(5_000),
                mode: None,
            },
        )
        .unwrap();

        let report = fs.check().unwrap();
        assert!(report.is_clean(), "{:?}", report.errors);
        assert!(report.live_inodes >= 3);
    }
}
