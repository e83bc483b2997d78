//! End-to-end tests over synthetic images.
//!
//! XTAF partitions live at multi-gigabyte offsets inside console disk
//! images, so the FAT tests run against a sparse in-memory image that
//! reports a large virtual size but only materialises the structures the
//! backend actually reads. Registry hives are small enough to build whole.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

use anyhow::Result;

use forensicfs::fs::fat::layout::ROOT_INODE;
use forensicfs::fs::fat::FatFilesystem;
use forensicfs::fs::regf::RegFilesystem;
use forensicfs::fs::{
    open_filesystem, BlockFlags, Filesystem, FsKind, InodeType, WalkAction, WalkFlags,
};
use forensicfs::FsError;

// ============================================================================
// Sparse image harness
// ============================================================================

/// A seekable byte source with a large virtual size. Reads return zeroes
/// except where a chunk has been overlaid.
#[derive(Debug)]
struct SparseImage {
    chunks: Vec<(u64, Vec<u8>)>,
    size: u64,
    pos: u64,
}

impl SparseImage {
    fn new(size: u64) -> Self {
        Self {
            chunks: Vec::new(),
            size,
            pos: 0,
        }
    }

    fn overlay(&mut self, offset: u64, bytes: Vec<u8>) {
        self.chunks.push((offset, bytes));
    }
}

impl Read for SparseImage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size {
            return Ok(0);
        }
        let n = buf.len().min((self.size - self.pos) as usize);
        buf[..n].fill(0);

        let read_start = self.pos;
        let read_end = self.pos + n as u64;
        for (chunk_off, data) in &self.chunks {
            let chunk_end = chunk_off + data.len() as u64;
            if *chunk_off >= read_end || chunk_end <= read_start {
                continue;
            }
            let from = read_start.max(*chunk_off);
            let to = read_end.min(chunk_end);
            let src = &data[(from - chunk_off) as usize..(to - chunk_off) as usize];
            buf[(from - read_start) as usize..(to - read_start) as usize].copy_from_slice(src);
        }

        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SparseImage {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.size as i64 + offset,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to negative position",
            ));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

fn xtaf_boot_sector(sectors_per_cluster: u32, num_fats: u32) -> Vec<u8> {
    let mut boot = vec![0u8; 512];
    boot[0..4].copy_from_slice(b"XTAF");
    boot[4..8].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    boot[8..12].copy_from_slice(&sectors_per_cluster.to_be_bytes());
    boot[12..16].copy_from_slice(&num_fats.to_be_bytes());
    boot
}

/// A small recognised partition: image size 216203264, root sector 64,
/// 56 sectors per FAT, clusters from sector 96, 13196 clusters.
fn small_xtaf_image(fat_entries: &[(u64, u16)]) -> SparseImage {
    let mut img = SparseImage::new(216203264);
    img.overlay(0, xtaf_boot_sector(1, 1));

    let mut fat = vec![0u8; 56 * 512];
    for &(cluster, value) in fat_entries {
        let off = (cluster * 2) as usize;
        fat[off..off + 2].copy_from_slice(&value.to_le_bytes());
    }
    img.overlay(8 * 512, fat);
    img
}

// ============================================================================
// Test Group A: XTAF open and geometry
// ============================================================================

#[test]
fn test_open_system_partition_by_offset() -> Result<()> {
    // The 256 MiB system partition at its fixed offset.
    let offset = 0x120EB0000u64;
    let mut raw = SparseImage::new(offset + 268435456);
    raw.overlay(offset, xtaf_boot_sector(1, 1));

    let fs = FatFilesystem::open(raw, offset, FsKind::FatDetect)?;
    let geo = fs.geometry();
    assert_eq!(geo.root_sector, 80);
    assert_eq!(geo.sectors_per_fat, 64);
    assert_eq!(geo.first_cluster_sector, 112);
    assert_eq!(geo.cluster_count, 16384);
    assert_eq!(geo.last_cluster, 16381);

    let info = fs.info();
    assert_eq!(info.block_size, 512);
    assert_eq!(info.kind, FsKind::Fat16);
    assert!(info.first_block <= info.last_block_actual);
    assert!(info.last_block_actual <= info.last_block);
    assert!(info.first_inode <= info.root_inode);
    assert!(info.root_inode <= info.last_inode);
    Ok(())
}

#[test]
fn test_system_partition_fsstat_fat_ranges() -> Result<()> {
    let offset = 0x120EB0000u64;
    let mut raw = SparseImage::new(offset + 268435456);
    raw.overlay(offset, xtaf_boot_sector(1, 1));

    let mut fs = open_filesystem(raw, offset, FsKind::FatDetect)?;
    let mut out = Vec::new();
    fs.fsstat(&mut out)?;
    let text = String::from_utf8(out)?;

    assert!(text.contains("* FAT 0: 8 - 71"), "missing FAT range in:\n{text}");
    assert!(text.contains("File System Type: FAT16"));
    assert!(text.contains("Total Cluster Range: 2 - 16381"));
    Ok(())
}

#[test]
fn test_unknown_geometry_fails_open() {
    let mut raw = SparseImage::new(1024 * 1024);
    raw.overlay(0, xtaf_boot_sector(1, 1));

    let err = FatFilesystem::open(raw, 0, FsKind::FatDetect).unwrap_err();
    assert!(matches!(err, FsError::Unsupported(_)));
    assert!(err.to_string().contains("unknown partition geometry"));
}

#[test]
fn test_backup_boot_sector_used_when_primary_zeroed() -> Result<()> {
    // Primary boot sector zeroed; backup lives at sector 6.
    let mut raw = SparseImage::new(216203264);
    raw.overlay(6 * 512, xtaf_boot_sector(1, 1));

    let fs = FatFilesystem::open(raw, 0, FsKind::FatDetect)?;
    assert_eq!(fs.geometry().root_sector, 64);
    Ok(())
}

#[test]
fn test_bad_magic_fails_open() {
    let mut raw = SparseImage::new(216203264);
    let mut boot = xtaf_boot_sector(1, 1);
    boot[0..4].copy_from_slice(b"FATX");
    raw.overlay(0, boot);

    assert!(matches!(
        FatFilesystem::open(raw, 0, FsKind::FatDetect),
        Err(FsError::FormatMagic(_))
    ));
}

// ============================================================================
// Test Group B: FAT chains, flags and walks
// ============================================================================

#[test]
fn test_chain_reflected_in_fsstat_runs() -> Result<()> {
    // Cluster 2 points to 3, cluster 3 ends the chain.
    let raw = small_xtaf_image(&[(2, 3), (3, 0xFFF8)]);
    let mut fs = open_filesystem(raw, 0, FsKind::FatDetect)?;

    let mut out = Vec::new();
    fs.fsstat(&mut out)?;
    let text = String::from_utf8(out)?;
    assert!(text.contains("96-97 (2) -> EOF"), "missing run in:\n{text}");
    Ok(())
}

#[test]
fn test_block_getflags_zones() -> Result<()> {
    let raw = small_xtaf_image(&[(2, 0xFFF8)]);
    let mut fs = open_filesystem(raw, 0, FsKind::FatDetect)?;

    // Reserved and FAT sectors are allocated metadata.
    let flags = fs.block_getflags(0)?;
    assert!(flags.contains(BlockFlags::META) && flags.contains(BlockFlags::ALLOC));
    // The fixed root directory is allocated content.
    let flags = fs.block_getflags(64)?;
    assert!(flags.contains(BlockFlags::CONT) && flags.contains(BlockFlags::ALLOC));
    // Cluster 2 is allocated, cluster 3 is free.
    assert!(fs.block_getflags(96)?.contains(BlockFlags::ALLOC));
    assert!(fs.block_getflags(97)?.contains(BlockFlags::UNALLOC));
    Ok(())
}

#[test]
fn test_block_walk_visits_every_sector_unfiltered() -> Result<()> {
    let raw = small_xtaf_image(&[(2, 3), (3, 0xFFF8)]);
    let mut fs = open_filesystem(raw, 0, FsKind::FatDetect)?;

    let mut visited = Vec::new();
    fs.block_walk(
        0,
        199,
        WalkFlags::default(),
        &mut |block: &forensicfs::fs::BlockView<'_>| {
            visited.push(block.addr);
            WalkAction::Continue
        },
    )?;

    assert_eq!(visited.len(), 200);
    assert_eq!(visited.first(), Some(&0));
    assert_eq!(visited.last(), Some(&199));
    // Strictly ascending.
    assert!(visited.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}

#[test]
fn test_block_walk_alloc_filter_in_data_area() -> Result<()> {
    let raw = small_xtaf_image(&[(2, 3), (3, 0xFFF8)]);
    let mut fs = open_filesystem(raw, 0, FsKind::FatDetect)?;

    let mut visited = Vec::new();
    fs.block_walk(
        96,
        101,
        WalkFlags::ALLOC,
        &mut |block: &forensicfs::fs::BlockView<'_>| {
            visited.push(block.addr);
            WalkAction::Continue
        },
    )?;

    // Only the two sectors of the allocated chain qualify.
    assert_eq!(visited, vec![96, 97]);
    Ok(())
}

#[test]
fn test_block_walk_stop_and_error() -> Result<()> {
    let raw = small_xtaf_image(&[]);
    let mut fs = open_filesystem(raw, 0, FsKind::FatDetect)?;

    let mut count = 0;
    fs.block_walk(
        0,
        199,
        WalkFlags::default(),
        &mut |_: &forensicfs::fs::BlockView<'_>| {
            count += 1;
            if count == 5 {
                WalkAction::Stop
            } else {
                WalkAction::Continue
            }
        },
    )?;
    assert_eq!(count, 5);

    let err = fs
        .block_walk(
            0,
            199,
            WalkFlags::default(),
            &mut |_: &forensicfs::fs::BlockView<'_>| WalkAction::Error,
        )
        .unwrap_err();
    assert!(matches!(err, FsError::WalkCallback));
    Ok(())
}

#[test]
fn test_walk_and_inode_range_errors() -> Result<()> {
    let raw = small_xtaf_image(&[]);
    let mut fs = open_filesystem(raw, 0, FsKind::FatDetect)?;
    let last_block = fs.info().last_block;

    let err = fs
        .block_walk(
            last_block + 1,
            last_block + 1,
            WalkFlags::default(),
            &mut |_: &forensicfs::fs::BlockView<'_>| WalkAction::Continue,
        )
        .unwrap_err();
    assert!(matches!(err, FsError::WalkRange(_)));

    // Inode 1 is below the reserved root inode.
    assert!(matches!(fs.inode_open(1), Err(FsError::InodeNumber(_))));
    assert!(matches!(
        fs.inode_open(fs.info().last_inode + 1),
        Err(FsError::InodeNumber(_))
    ));
    Ok(())
}

// ============================================================================
// Test Group C: FAT inodes and istat
// ============================================================================

/// Root directory sector with one file entry: HELLO.TXT, archive attribute,
/// start cluster 2, 600 bytes, written 2010-06-15 12:30:10.
fn small_xtaf_with_file() -> SparseImage {
    let mut img = small_xtaf_image(&[(2, 3), (3, 0xFFF8)]);

    let mut root = vec![0u8; 512];
    root[0..8].copy_from_slice(b"HELLO   ");
    root[8..11].copy_from_slice(b"TXT");
    root[11] = 0x20;
    let wdate: u16 = (30 << 9) | (6 << 5) | 15;
    let wtime: u16 = (12 << 11) | (30 << 5) | 5;
    root[22..24].copy_from_slice(&wtime.to_le_bytes());
    root[24..26].copy_from_slice(&wdate.to_le_bytes());
    root[26..28].copy_from_slice(&2u16.to_le_bytes());
    root[28..32].copy_from_slice(&600u32.to_le_bytes());
    img.overlay(64 * 512, root);
    img
}

#[test]
fn test_inode_open_root_and_file() -> Result<()> {
    let mut fs = open_filesystem(small_xtaf_with_file(), 0, FsKind::FatDetect)?;

    let root = fs.inode_open(ROOT_INODE)?;
    assert_eq!(root.itype, InodeType::Directory);
    assert!(root.allocated);
    // The fixed root region spans sectors 64..96.
    assert_eq!(root.size, 32 * 512);

    // First slot of the root directory.
    let file = fs.inode_open(3)?;
    assert_eq!(file.itype, InodeType::Regular);
    assert!(file.allocated);
    assert_eq!(file.size, 600);
    assert_eq!(file.location, 2);
    assert_eq!(file.name.as_deref(), Some("HELLO.TXT"));
    assert_ne!(file.mtime, 0);

    // Slot 1 was never used.
    let empty = fs.inode_open(4)?;
    assert!(!empty.allocated);
    assert_eq!(empty.itype, InodeType::Other);
    Ok(())
}

#[test]
fn test_istat_lists_file_sectors() -> Result<()> {
    let mut fs = open_filesystem(small_xtaf_with_file(), 0, FsKind::FatDetect)?;

    let mut out = Vec::new();
    fs.istat(&mut out, 3, 0, 0)?;
    let text = String::from_utf8(out)?;

    assert!(text.contains("Directory Entry: 3"));
    assert!(text.contains("Allocated"));
    assert!(!text.contains("Not Allocated"));
    assert!(text.contains("File Attributes: File, Archive"));
    assert!(text.contains("Size: 600"));
    assert!(text.contains("Name: HELLO.TXT"));
    assert!(text.contains("Written:\t2010-06-15 12:30:10 (UTC)"));
    // 600 bytes at cluster 2 covers sectors 96 and 97.
    assert!(text.contains("96 97"), "missing sectors in:\n{text}");
    Ok(())
}

#[test]
fn test_istat_time_skew_prints_both_sets() -> Result<()> {
    let mut fs = open_filesystem(small_xtaf_with_file(), 0, FsKind::FatDetect)?;

    let mut out = Vec::new();
    fs.istat(&mut out, 3, 0, 3600)?;
    let text = String::from_utf8(out)?;

    assert!(text.contains("Adjusted Directory Entry Times:"));
    assert!(text.contains("Original Directory Entry Times:"));
    assert!(text.contains("Written:\t2010-06-15 11:30:10 (UTC)"));
    assert!(text.contains("Written:\t2010-06-15 12:30:10 (UTC)"));
    Ok(())
}

#[test]
fn test_istat_forced_block_count() -> Result<()> {
    let mut fs = open_filesystem(small_xtaf_with_file(), 0, FsKind::FatDetect)?;

    // Force one block: only the first sector of the chain is listed.
    let mut out = Vec::new();
    fs.istat(&mut out, 3, 1, 0)?;
    let text = String::from_utf8(out)?;
    assert!(text.contains("96"));
    assert!(!text.contains("96 97"));
    Ok(())
}

#[test]
fn test_istat_on_looped_chain_terminates() -> Result<()> {
    // Clusters 2 and 3 point at each other; the sector listing must stop
    // once the loop is detected instead of spinning.
    let mut img = small_xtaf_image(&[(2, 3), (3, 2)]);
    let mut root = vec![0u8; 512];
    root[0..8].copy_from_slice(b"LOOPY   ");
    root[8..11].copy_from_slice(b"BIN");
    root[11] = 0x20;
    root[26..28].copy_from_slice(&2u16.to_le_bytes());
    root[28..32].copy_from_slice(&40960u32.to_le_bytes());
    img.overlay(64 * 512, root);

    let mut fs = open_filesystem(img, 0, FsKind::FatDetect)?;
    let mut out = Vec::new();
    fs.istat(&mut out, 3, 0, 0)?;
    let text = String::from_utf8(out)?;

    // Only the two looping clusters are listed, not the 80 sectors the
    // declared size would imply.
    assert!(text.contains("96 97"));
    assert!(!text.contains("96 97 96"));
    Ok(())
}

#[test]
fn test_inode_walk_allocated_only() -> Result<()> {
    let mut fs = open_filesystem(small_xtaf_with_file(), 0, FsKind::FatDetect)?;

    let mut names = Vec::new();
    fs.inode_walk(
        2,
        20,
        WalkFlags::ALLOC,
        &mut |meta: &forensicfs::fs::InodeMeta| {
            names.push(meta.name.clone().unwrap_or_default());
            WalkAction::Continue
        },
    )?;

    assert_eq!(names, vec!["/".to_string(), "HELLO.TXT".to_string()]);
    Ok(())
}

#[test]
fn test_special_inodes_are_virtual() -> Result<()> {
    let mut fs = open_filesystem(small_xtaf_image(&[]), 0, FsKind::FatDetect)?;

    let last = fs.info().last_inode;
    let mbr = fs.inode_open(last - 3)?;
    assert_eq!(mbr.itype, InodeType::Virtual);
    assert_eq!(mbr.name.as_deref(), Some("$MBR"));

    let orphans = fs.inode_open(last)?;
    assert_eq!(orphans.name.as_deref(), Some("$OrphanFiles"));
    Ok(())
}

// ============================================================================
// Test Group D: Registry hives
// ============================================================================

/// A two-hbin hive: an NK root key and a VK cell, each followed by a free
/// cell filling the rest of its page.
fn build_hive(seq1: u32, seq2: u32) -> Vec<u8> {
    let mut hive = vec![0u8; 0x3000];
    hive[0..4].copy_from_slice(b"regf");
    hive[0x04..0x08].copy_from_slice(&seq1.to_le_bytes());
    hive[0x08..0x0C].copy_from_slice(&seq2.to_le_bytes());
    hive[0x14..0x18].copy_from_slice(&1u32.to_le_bytes());
    hive[0x18..0x1C].copy_from_slice(&5u32.to_le_bytes());
    hive[0x24..0x28].copy_from_slice(&0x20u32.to_le_bytes());
    hive[0x28..0x2C].copy_from_slice(&0x2000u32.to_le_bytes());
    for (i, b) in b"SYSTEM".iter().enumerate() {
        hive[0x30 + i * 2] = *b;
    }

    for hbin_start in [0x1000usize, 0x2000] {
        hive[hbin_start..hbin_start + 4].copy_from_slice(b"hbin");
        hive[hbin_start + 4..hbin_start + 8]
            .copy_from_slice(&((hbin_start - 0x1000) as u32).to_le_bytes());
        hive[hbin_start + 8..hbin_start + 12].copy_from_slice(&0x1000u32.to_le_bytes());
    }

    // NK root key at 0x1020, 0xA0 bytes, allocated.
    let nk = 0x1020usize;
    hive[nk..nk + 4].copy_from_slice(&(-0xA0i32).to_le_bytes());
    hive[nk + 4..nk + 6].copy_from_slice(b"nk");
    hive[nk + 6..nk + 8].copy_from_slice(&0x2Cu16.to_le_bytes());
    // 2009-07-25 23:00:00 UTC as a FILETIME.
    hive[nk + 8..nk + 16].copy_from_slice(&128_930_364_000_000_000u64.to_le_bytes());
    hive[nk + 20..nk + 24].copy_from_slice(&0u32.to_le_bytes());
    hive[nk + 52..nk + 56].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    hive[nk + 76..nk + 78].copy_from_slice(&7u16.to_le_bytes());
    hive[nk + 80..nk + 87].copy_from_slice(b"TESTKEY");

    // Free cell covering the rest of the first page.
    let free1 = nk + 0xA0;
    hive[free1..free1 + 4].copy_from_slice(&0xF40u32.to_le_bytes());

    // VK cell at 0x2020, then a free cell to the end of the page.
    let vk = 0x2020usize;
    hive[vk..vk + 4].copy_from_slice(&(-0x20i32).to_le_bytes());
    hive[vk + 4..vk + 6].copy_from_slice(b"vk");
    let free2 = vk + 0x20;
    hive[free2..free2 + 4].copy_from_slice(&0xFC0u32.to_le_bytes());

    hive
}

#[test]
fn test_hive_open_and_layout() -> Result<()> {
    let fs = RegFilesystem::open(Cursor::new(build_hive(5, 5)), 0)?;

    let info = fs.info();
    assert_eq!(info.kind, FsKind::Reg);
    assert_eq!(info.block_size, 4096);
    assert_eq!(info.first_block, 0);
    assert_eq!(info.last_block, 0x2000);
    assert_eq!(info.last_block_actual, 3);
    assert_eq!(info.first_inode, 0x1000);
    assert_eq!(info.last_inode, 0x3000);
    assert_eq!(info.root_inode, 0x1020);
    assert!(info.first_inode <= info.root_inode && info.root_inode <= info.last_inode);
    Ok(())
}

#[test]
fn test_hive_fsstat_synchronized() -> Result<()> {
    let mut fs = open_filesystem(Cursor::new(build_hive(5, 5)), 0, FsKind::Reg)?;
    let mut out = Vec::new();
    fs.fsstat(&mut out)?;
    let text = String::from_utf8(out)?;
    assert!(text.contains("Synchronized: Yes"));
    assert!(text.contains("Hive name: SYSTEM"));
    assert!(text.contains("Major Version: 1"));
    assert!(text.contains("Minor Version: 5"));
    assert!(text.contains("Offset to first key: 32"));
    assert!(text.contains("Offset to last HBIN: 8192"));

    // A mismatched sequence pair reports an unsynchronised hive.
    let mut fs = open_filesystem(Cursor::new(build_hive(5, 6)), 0, FsKind::Reg)?;
    let mut out = Vec::new();
    fs.fsstat(&mut out)?;
    assert!(String::from_utf8(out)?.contains("Synchronized: No"));
    Ok(())
}

#[test]
fn test_hive_inode_open() -> Result<()> {
    let mut fs = open_filesystem(Cursor::new(build_hive(5, 5)), 0, FsKind::Reg)?;

    let nk = fs.inode_open(0x1020)?;
    assert_eq!(nk.itype, InodeType::Directory);
    assert!(nk.allocated);
    assert_eq!(nk.size, 0xA0);
    assert_eq!(nk.mode, 0o7777);
    assert_eq!(nk.nlink, 1);
    assert_eq!(nk.mtime, 1_248_562_800);
    assert_eq!(nk.content.len(), 0xA0);

    let vk = fs.inode_open(0x2020)?;
    assert_eq!(vk.itype, InodeType::Regular);
    assert_eq!(vk.size, 0x20);
    assert_eq!(vk.mtime, 0);

    let free = fs.inode_open(0x10C0)?;
    assert!(!free.allocated);
    assert_eq!(free.itype, InodeType::Virtual);

    assert!(matches!(fs.inode_open(0x800), Err(FsError::InodeNumber(_))));
    Ok(())
}

#[test]
fn test_hive_istat_nk() -> Result<()> {
    let mut fs = open_filesystem(Cursor::new(build_hive(5, 5)), 0, FsKind::Reg)?;

    let mut out = Vec::new();
    fs.istat(&mut out, 0x1020, 0, 0)?;
    let text = String::from_utf8(out)?;

    assert!(text.contains("Cell: 4128"));
    assert!(text.contains("Allocated: Yes"));
    assert!(text.contains("Cell Size: 160"));
    assert!(text.contains("Record Type: NK"));
    assert!(text.contains("Class Name: None"));
    assert!(text.contains("Key Name: TESTKEY"));
    assert!(text.contains("Root Record: Yes"));
    assert!(text.contains("Modified:\t2009-07-25 23:00:00 (UTC)"));
    assert!(text.contains("Parent Record: 4096"));
    Ok(())
}

#[test]
fn test_hive_istat_nk_class_name() -> Result<()> {
    // Point the root key's class name into the free space of the first
    // page: hbin-relative offset 0xC0 reads at 0x10C4, past that cell's
    // length word.
    let mut hive = build_hive(5, 5);
    let nk = 0x1020usize;
    hive[nk + 52..nk + 56].copy_from_slice(&0xC0u32.to_le_bytes());
    hive[nk + 78..nk + 80].copy_from_slice(&8u16.to_le_bytes());
    for (i, b) in b"CLSS".iter().enumerate() {
        hive[0x10C4 + i * 2] = *b;
    }

    let mut fs = open_filesystem(Cursor::new(hive), 0, FsKind::Reg)?;
    let mut out = Vec::new();
    fs.istat(&mut out, 0x1020, 0, 0)?;
    let text = String::from_utf8(out)?;
    assert!(text.contains("Class Name: CLSS"), "missing class name in:\n{text}");
    assert!(text.contains("Key Name: TESTKEY"));
    Ok(())
}

#[test]
fn test_hive_istat_other_kinds() -> Result<()> {
    let mut fs = open_filesystem(Cursor::new(build_hive(5, 5)), 0, FsKind::Reg)?;

    let mut out = Vec::new();
    fs.istat(&mut out, 0x2020, 0, 0)?;
    let text = String::from_utf8(out)?;
    assert!(text.contains("Record Type: VK"));

    // The free cell has no recognised signature.
    let mut out = Vec::new();
    fs.istat(&mut out, 0x10C0, 0, 0)?;
    let text = String::from_utf8(out)?;
    assert!(text.contains("Allocated: No"));
    assert!(text.contains("Record Type: Unknown (Data Record?)"));
    assert!(text.contains("Type identifier:"));
    Ok(())
}

#[test]
fn test_hive_block_walk_counts_pages() -> Result<()> {
    let mut fs = open_filesystem(Cursor::new(build_hive(5, 5)), 0, FsKind::Reg)?;

    let mut visited = Vec::new();
    fs.block_walk(
        0,
        0x2000,
        WalkFlags::default(),
        &mut |block: &forensicfs::fs::BlockView<'_>| {
            assert!(block.flags.contains(BlockFlags::ALLOC));
            assert!(block.flags.contains(BlockFlags::META));
            assert!(block.flags.contains(BlockFlags::CONT));
            assert_eq!(block.data.len(), 4096);
            visited.push(block.addr);
            WalkAction::Continue
        },
    )?;

    assert_eq!(visited, vec![0, 0x1000, 0x2000]);
    Ok(())
}

#[test]
fn test_hive_inode_walk_skips_page_headers() -> Result<()> {
    let mut fs = open_filesystem(Cursor::new(build_hive(5, 5)), 0, FsKind::Reg)?;

    let mut cells = Vec::new();
    fs.inode_walk(
        0x1000,
        0x3000,
        WalkFlags::default(),
        &mut |meta: &forensicfs::fs::InodeMeta| {
            cells.push((meta.addr, meta.allocated));
            WalkAction::Continue
        },
    )?;

    assert_eq!(
        cells,
        vec![
            (0x1020, true),
            (0x10C0, false),
            (0x2020, true),
            (0x2040, false),
        ]
    );

    // The allocation filter keeps only the live cells.
    let mut live = Vec::new();
    fs.inode_walk(
        0x1000,
        0x3000,
        WalkFlags::ALLOC,
        &mut |meta: &forensicfs::fs::InodeMeta| {
            live.push(meta.addr);
            WalkAction::Continue
        },
    )?;
    assert_eq!(live, vec![0x1020, 0x2020]);
    Ok(())
}

#[test]
fn test_hive_cell_at_first_inode() -> Result<()> {
    // A minimal hive whose first data bytes are a raw allocated cell word.
    let mut hive = vec![0u8; 0x2000];
    hive[0..4].copy_from_slice(b"regf");
    hive[0x28..0x2C].copy_from_slice(&0x1000u32.to_le_bytes());
    hive[0x1000..0x1004].copy_from_slice(&(-0x30i32).to_le_bytes());
    hive[0x1004..0x1006].copy_from_slice(b"nk");

    let mut fs = open_filesystem(Cursor::new(hive), 0, FsKind::Reg)?;
    let meta = fs.inode_open(0x1000)?;
    assert!(meta.allocated);
    assert_eq!(meta.size, 0x30);
    assert_eq!(meta.itype, InodeType::Directory);
    Ok(())
}

// ============================================================================
// Test Group E: cross-backend contract
// ============================================================================

#[test]
fn test_name_compare_is_case_insensitive() -> Result<()> {
    let mut raw = SparseImage::new(216203264);
    raw.overlay(0, xtaf_boot_sector(1, 1));
    let fat = open_filesystem(raw, 0, FsKind::FatDetect)?;
    assert_eq!(
        fat.name_compare("HELLO.TXT", "hello.txt"),
        std::cmp::Ordering::Equal
    );
    assert_eq!(
        fat.name_compare("alpha", "BETA"),
        std::cmp::Ordering::Less
    );

    let reg = open_filesystem(Cursor::new(build_hive(5, 5)), 0, FsKind::Reg)?;
    assert_eq!(
        reg.name_compare("ControlSet001", "CONTROLSET001"),
        std::cmp::Ordering::Equal
    );
    Ok(())
}

#[test]
fn test_journal_and_fscheck_are_unsupported() -> Result<()> {
    for mut fs in [
        open_filesystem(Cursor::new(build_hive(5, 5)), 0, FsKind::Reg)?,
        {
            let mut raw = SparseImage::new(216203264);
            raw.overlay(0, xtaf_boot_sector(1, 1));
            open_filesystem(raw, 0, FsKind::FatDetect)?
        },
    ] {
        assert!(matches!(
            fs.journal_open(2),
            Err(FsError::Unsupported(_))
        ));
        assert!(matches!(
            fs.journal_entry_walk(&mut |_: &forensicfs::fs::InodeMeta| WalkAction::Continue),
            Err(FsError::Unsupported(_))
        ));
        let mut out = Vec::new();
        assert!(matches!(
            fs.fscheck(&mut out),
            Err(FsError::Unsupported(_))
        ));
    }
    Ok(())
}
