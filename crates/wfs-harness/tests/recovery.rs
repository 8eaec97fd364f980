#![forbid(unsafe_code)]
//! Crash-point recovery: a committed-but-unapplied journal replays at
//! mount; an uncommitted one is discarded; replaying is idempotent.

use wfs::{DiskImage, WrenFs, ROOT_INO};
use wfs_harness::{assert_clean, fresh_fs};
use wfs_journal::StagedBatch;
use wfs_ondisk::JournalHeader;
use wfs_types::{BLKSIZE, JOURNAL_HEADER_POS};

/// A volume with one file holding `old` as its first block's contents,
/// plus a WRITE batch staged (committed, not applied) that replaces it
/// with `new`.
fn staged_write_image(old: u8, new: u8) -> DiskImage {
    let mut fs = fresh_fs();
    let ino = fs.create(ROOT_INO, "f", 0o644).unwrap();
    fs.write(ino, 0, &vec![old; BLKSIZE], false).unwrap();

    let mut img = DiskImage::open(fs.into_bytes()).unwrap();
    let inode = img.read_inode(ino).unwrap();
    let blockno = img.inode_blockno_at(&inode, 0).unwrap();
    let batch = StagedBatch::write(ino, inode, vec![blockno], vec![vec![new; BLKSIZE]]);
    wfs_journal::stage(&mut img, &batch).unwrap();
    img
}

fn first_block_byte(fs: &WrenFs) -> u8 {
    let ino = fs.lookup(ROOT_INO, "f").unwrap();
    let mut buf = [0_u8; 1];
    assert_eq!(fs.read(ino, 0, &mut buf).unwrap(), 1);
    buf[0]
}

#[test]
fn committed_journal_replays_at_mount() {
    let img = staged_write_image(0x11, 0x22);

    // Crash after commit, before apply: mount must replay.
    let fs = WrenFs::mount(img.into_bytes()).unwrap();
    assert_eq!(first_block_byte(&fs), 0x22);
    assert_clean(&fs);
}

#[test]
fn uncommitted_journal_is_discarded_at_mount() {
    let mut img = staged_write_image(0x11, 0x22);

    // Crash before the flag landed: clear the committed word in place.
    let header_block = img.journal_block(JOURNAL_HEADER_POS);
    let off = JournalHeader::COMMITTED_OFFSET;
    img.block_mut(header_block).unwrap()[off..off + 4].copy_from_slice(&0_u32.to_le_bytes());

    let fs = WrenFs::mount(img.into_bytes()).unwrap();
    assert_eq!(first_block_byte(&fs), 0x11);
    assert_clean(&fs);
}

#[test]
fn replay_is_idempotent() {
    let staged = staged_write_image(0x33, 0x44).into_bytes();

    let mut img_a = DiskImage::open(staged.clone()).unwrap();
    wfs_journal::apply(&mut img_a).unwrap();
    let once = img_a.into_bytes();

    // Apply, then crash before the header clear reached the image:
    // restore the committed header from the staged snapshot and let
    // recovery replay the whole transaction a second time.
    let mut img_b = DiskImage::open(staged.clone()).unwrap();
    wfs_journal::apply(&mut img_b).unwrap();
    let header_block = img_b.journal_block(JOURNAL_HEADER_POS);
    let src = header_block.byte_offset();
    let committed_header = staged[src..src + BLKSIZE].to_vec();
    img_b
        .block_mut(header_block)
        .unwrap()
        .copy_from_slice(&committed_header);
    assert!(wfs_journal::recover(&mut img_b).unwrap());
    let twice = img_b.into_bytes();

    assert_eq!(once, twice);
}

#[test]
fn mount_is_clean_after_replay() {
    let img = staged_write_image(0x55, 0x66);
    let fs = WrenFs::mount(img.into_bytes()).unwrap();

    // A second mount finds an empty journal and changes nothing.
    let bytes = fs.into_bytes();
    let again = WrenFs::mount(bytes.clone()).unwrap();
    assert_eq!(again.into_bytes(), bytes);
}

#[test]
fn torn_header_does_not_block_mount() {
    let mut img = staged_write_image(0x77, 0x88);
    let header_block = img.journal_block(JOURNAL_HEADER_POS);
    // Garbage kind tag with the committed flag cleared: a torn pre-commit
    // header write.
    let block = img.block_mut(header_block).unwrap();
    block[0] = 0xFF;
    block[JournalHeader::COMMITTED_OFFSET] = 0;

    let fs = WrenFs::mount(img.into_bytes()).unwrap();
    assert_eq!(first_block_byte(&fs), 0x77);
    assert_clean(&fs);
}
