//! Byte-range file I/O.
//!
//! Reads walk the block map directly. Writes are journaled: each touched
//! block is read whole, patched, and staged; batches of up to `JMAX` blocks
//! commit as WRITE transactions, so a crash never leaves a block half
//! rewritten.

use tracing::trace;
use wfs_error::{Result, WfsError};
use wfs_image::DiskImage;
use wfs_journal::{commit, StagedBatch};
use wfs_ondisk::InodeKind;
use wfs_types::{BlockNo, InodeNo, BLKSIZE, JMAX, MAXFILESIZE};

use crate::resize::change_size;

/// Read up to `buf.len()` bytes starting at byte `pos`. Returns the byte
/// count, clamped to end of file; reading at or past the end returns 0.
pub fn read_at(img: &DiskImage, ino: InodeNo, pos: u32, buf: &mut [u8]) -> Result<usize> {
    let inode = img.read_inode(ino)?;
    if pos >= inode.size {
        return Ok(0);
    }
    let n = buf.len().min((inode.size - pos) as usize);

    let mut copied = 0_usize;
    while copied < n {
        let cur = pos + copied as u32;
        let blockno = img.inode_blockno_at(&inode, cur)?;
        if blockno.is_none() {
            return Err(WfsError::Io(format!(
                "inode {ino} has no block for offset {cur}"
            )));
        }
        let off = cur as usize % BLKSIZE;
        let take = (BLKSIZE - off).min(n - copied);
        let block = img.block(blockno)?;
        buf[copied..copied + take].copy_from_slice(&block[off..off + take]);
        copied += take;
    }
    Ok(n)
}

/// Write `data` starting at byte `pos` (or at end of file when `append`),
/// growing the file first if the range extends past the current size.
///
/// The data lands in journal batches of at most `JMAX` blocks; a large
/// write is atomic only at batch granularity.
pub fn write_at(
    img: &mut DiskImage,
    ino: InodeNo,
    pos: u32,
    data: &[u8],
    append: bool,
) -> Result<usize> {
    let inode = img.read_inode(ino)?;
    if !matches!(inode.kind, InodeKind::Regular { .. }) {
        return Err(WfsError::NotPermitted);
    }

    let pos = if append { inode.size } else { pos };
    let end = u64::from(pos) + data.len() as u64;
    if end > u64::from(MAXFILESIZE) {
        return Err(WfsError::NoSpace);
    }
    let end = end as u32;
    if end > inode.size {
        change_size(img, ino, end)?;
    }
    if data.is_empty() {
        return Ok(0);
    }

    // The map may have grown; reload before walking it.
    let inode = img.read_inode(ino)?;

    let mut affected: Vec<BlockNo> = Vec::new();
    let mut payloads: Vec<Vec<u8>> = Vec::new();
    let mut written = 0_usize;
    while written < data.len() {
        let cur = pos + written as u32;
        let blockno = img.inode_blockno_at(&inode, cur)?;
        if blockno.is_none() {
            return Err(WfsError::Io(format!(
                "inode {ino} has no block for offset {cur}"
            )));
        }

        let off = cur as usize % BLKSIZE;
        let take = (BLKSIZE - off).min(data.len() - written);
        let mut block = img.block(blockno)?.to_vec();
        block[off..off + take].copy_from_slice(&data[written..written + take]);
        affected.push(blockno);
        payloads.push(block);
        written += take;

        if affected.len() == JMAX {
            let batch = StagedBatch::write(
                ino,
                inode.clone(),
                std::mem::take(&mut affected),
                std::mem::take(&mut payloads),
            );
            commit(img, &batch)?;
        }
    }

    if !affected.is_empty() {
        let batch = StagedBatch::write(ino, inode, affected, payloads);
        commit(img, &batch)?;
    }

    trace!(ino = ino.0, pos, len = data.len(), "write complete");
    Ok(data.len())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wfs_image::mkfs;
    use wfs_ondisk::{BlockMap, Inode};

    const B: u32 = BLKSIZE as u32;

    fn image_with_file() -> (DiskImage, InodeNo) {
        let mut img = mkfs(1024, 64).unwrap();
        let ino = InodeNo(5);
        img.write_inode(
            ino,
            &Inode {
                size: 0,
                nlink: 1,
                kind: InodeKind::Regular {
                    mode: 0o644,
                    map: BlockMap::default(),
                },
            },
        )
        .unwrap();
        (img, ino)
    }

    #[test]
    fn write_then_read_round_trip() {
        let (mut img, ino) = image_with_file();
        let payload = b"Hello, world!\n";

        let written = write_at(&mut img, ino, 0, payload, false).unwrap();
        assert_eq!(written, 14);
        assert_eq!(img.read_inode(ino).unwrap().size, 14);

        let mut buf = [0_u8; 64];
        let read = read_at(&img, ino, 0, &mut buf).unwrap();
        assert_eq!(&buf[..read], payload);
    }

    #[test]
    fn read_clamps_to_end_of_file() {
        let (mut img, ino) = image_with_file();
        write_at(&mut img, ino, 0, b"abcdef", false).unwrap();

        let mut buf = [0_u8; 16];
        assert_eq!(read_at(&img, ino, 4, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(read_at(&img, ino, 6, &mut buf).unwrap(), 0);
        assert_eq!(read_at(&img, ino, 1000, &mut buf).unwrap(), 0);
    }

    #[test]
    fn write_past_end_grows_the_file() {
        let (mut img, ino) = image_with_file();
        write_at(&mut img, ino, 3000, b"xyz", false).unwrap();

        let inode = img.read_inode(ino).unwrap();
        assert_eq!(inode.size, 3003);

        // The gap reads as zeros.
        let mut buf = vec![0xFF_u8; 3003];
        read_at(&img, ino, 0, &mut buf).unwrap();
        assert!(buf[..3000].iter().all(|&b| b == 0));
        assert_eq!(&buf[3000..], b"xyz");
    }

    #[test]
    fn append_writes_at_end_regardless_of_pos() {
        let (mut img, ino) = image_with_file();
        write_at(&mut img, ino, 0, b"base", false).unwrap();
        write_at(&mut img, ino, 0, b"+tail", true).unwrap();

        let mut buf = [0_u8; 16];
        let read = read_at(&img, ino, 0, &mut buf).unwrap();
        assert_eq!(&buf[..read], b"base+tail");
    }

    #[test]
    fn overwrite_spanning_a_block_boundary() {
        let (mut img, ino) = image_with_file();
        write_at(&mut img, ino, 0, &vec![b'a'; 2048], false).unwrap();
        write_at(&mut img, ino, 1020, b"01234567", false).unwrap();

        let mut buf = vec![0_u8; 2048];
        read_at(&img, ino, 0, &mut buf).unwrap();
        assert!(buf[..1020].iter().all(|&b| b == b'a'));
        assert_eq!(&buf[1020..1028], b"01234567");
        assert!(buf[1028..].iter().all(|&b| b == b'a'));
        assert_eq!(img.read_inode(ino).unwrap().size, 2048);
    }

    #[test]
    fn large_append_crosses_the_indirect_region() {
        let (mut img, ino) = image_with_file();
        let payload = vec![0xAA_u8; 13_000];
        write_at(&mut img, ino, 0, &payload, true).unwrap();

        let inode = img.read_inode(ino).unwrap();
        assert_eq!(inode.size, 13_000);
        assert_ne!(inode.map().unwrap().indirect, 0);
        assert_eq!(inode.map().unwrap().indirect2, 0);

        let mut buf = vec![0_u8; 2000];
        let read = read_at(&img, ino, 10_000, &mut buf).unwrap();
        assert_eq!(read, 2000);
        assert!(buf.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn empty_write_is_a_no_op() {
        let (mut img, ino) = image_with_file();
        assert_eq!(write_at(&mut img, ino, 0, b"", false).unwrap(), 0);
        assert_eq!(img.read_inode(ino).unwrap().size, 0);
    }

    #[test]
    fn write_to_a_directory_is_refused() {
        let mut img = mkfs(1024, 64).unwrap();
        assert!(matches!(
            write_at(&mut img, wfs_types::ROOT_INO, 0, b"x", false),
            Err(WfsError::NotPermitted)
        ));
    }

    #[test]
    fn write_beyond_max_file_size_is_no_space() {
        let (mut img, ino) = image_with_file();
        assert!(matches!(
            write_at(&mut img, ino, MAXFILESIZE - 1, b"ab", false),
            Err(WfsError::NoSpace)
        ));
    }

    #[test]
    fn partial_block_tail_write() {
        let (mut img, ino) = image_with_file();
        write_at(&mut img, ino, 0, &vec![1_u8; (2 * B + 100) as usize], false).unwrap();
        assert_eq!(img.read_inode(ino).unwrap().size, 2 * B + 100);

        let mut buf = vec![0_u8; (2 * B + 100) as usize];
        assert_eq!(read_at(&img, ino, 0, &mut buf).unwrap(), buf.len());
        assert!(buf.iter().all(|&b| b == 1));
    }
}
