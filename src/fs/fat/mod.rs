//! XTAF FAT12/16/32 backend.
//!
//! Blocks are sectors. Inodes are synthetic: the root directory holds the
//! reserved inode 2, every 32-byte directory entry slot in the data area
//! gets its own number after that, and the top of the range is reserved for
//! a few virtual special files. Not every inode is therefore a real file.

pub mod cache;
pub mod chain;
pub mod layout;

use std::collections::HashSet;
use std::io::{Read, Seek, Write};

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::endian::Endian;
use crate::error::FsError;
use crate::image::ImageReader;

use super::block::{
    BlockFlags, BlockView, BlockVisitor, FsInfo, FsKind, InodeMeta, InodeType, InodeVisitor,
    WalkAction, WalkFlags,
};
use super::filesystem::Filesystem;

use chain::{FatChain, FatEntry};
use layout::{
    known_geometry, BootSector, FatGeometry, DENTRY_SIZE, FIRST_INODE, NUM_SPECIAL_INODES,
    ROOT_INODE, SECTOR_SIZE,
};

const ATTR_READ_ONLY: u8 = 0x01;
const ATTR_HIDDEN: u8 = 0x02;
const ATTR_SYSTEM: u8 = 0x04;
const ATTR_VOLUME: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_ARCHIVE: u8 = 0x20;
const ATTR_LONG_NAME: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME;

/// Sectors read per chunk when walking the pre-cluster area.
const PREDATA_CHUNK_SECTORS: u64 = 8;

/// XTAF FAT filesystem reader.
#[derive(Debug)]
pub struct FatFilesystem<R> {
    img: ImageReader<R>,
    info: FsInfo,
    geo: FatGeometry,
    chain: FatChain,
    serial_number: [u8; 4],
}

impl<R: Read + Seek> FatFilesystem<R> {
    /// Open an XTAF FAT filesystem at the given offset within an image.
    ///
    /// The primary boot sector is tried first; when its magic field reads
    /// as all zeroes the backup copy at sector 6 is tried instead.
    pub fn open(reader: R, offset: u64, kind: FsKind) -> Result<Self, FsError> {
        if !kind.is_fat() {
            return Err(FsError::InvalidArgument(format!(
                "not a FAT type: {}",
                kind.name()
            )));
        }

        let mut img = ImageReader::new(reader, offset)?;

        let mut buf = [0u8; SECTOR_SIZE as usize];
        for attempt in 0..2 {
            let sb_off = if attempt == 0 {
                0
            } else {
                6 * SECTOR_SIZE as u64 // backup boot sector
            };
            img.read_at("fat open: boot sector", sb_off, &mut buf)?;

            if BootSector::has_magic(&buf) {
                break;
            }
            if attempt == 0 && BootSector::magic_is_zero(&buf) {
                continue;
            }
            return Err(FsError::FormatMagic("not an XTAF file system (magic)".into()));
        }
        let boot = BootSector::parse(&buf)?;

        let partition = known_geometry(img.size(), offset).ok_or_else(|| {
            FsError::Unsupported(format!(
                "unknown partition geometry (size {}, offset {:#x})",
                img.size(),
                offset
            ))
        })?;

        let total_sectors = img.size() / SECTOR_SIZE as u64;
        let geo = FatGeometry::build(kind, &boot, &partition, total_sectors)?;

        if geo.first_fat_sector == 0 || geo.first_fat_sector > total_sectors {
            return Err(FsError::FormatMagic(format!(
                "not an XTAF file system (invalid first FAT sector {})",
                geo.first_fat_sector
            )));
        }

        let last_block = total_sectors.saturating_sub(1);
        let last_block_actual = match img.size().checked_sub(offset) {
            Some(rest) if rest / (SECTOR_SIZE as u64) < total_sectors => {
                (rest / SECTOR_SIZE as u64).saturating_sub(1)
            }
            _ => last_block,
        };

        let last_inode =
            geo.sector_to_inode(last_block_actual + 1) - 1 + NUM_SPECIAL_INODES;

        let info = FsInfo {
            kind: geo.kind,
            endian: Endian::Little,
            offset,
            block_size: SECTOR_SIZE,
            first_block: 0,
            last_block,
            last_block_actual,
            first_inode: FIRST_INODE,
            last_inode,
            root_inode: ROOT_INODE,
        };

        Ok(Self {
            img,
            info,
            geo,
            chain: FatChain::new(),
            serial_number: boot.serial_number,
        })
    }

    /// Geometry of the opened filesystem.
    pub fn geometry(&self) -> &FatGeometry {
        &self.geo
    }

    fn first_special_inode(&self) -> u64 {
        self.info.last_inode - NUM_SPECIAL_INODES + 1
    }

    fn root_meta(&self) -> InodeMeta {
        let mut meta = InodeMeta::new(ROOT_INODE, InodeType::Directory);
        meta.allocated = true;
        meta.mode = 0o777;
        meta.nlink = 1;
        meta.size = (self.geo.first_cluster_sector - self.geo.first_data_sector)
            * self.geo.sector_size as u64;
        meta.name = Some("/".into());
        meta
    }

    fn special_meta(&self, inum: u64) -> InodeMeta {
        let first = self.first_special_inode();
        let mut meta = InodeMeta::new(inum, InodeType::Virtual);
        meta.allocated = true;
        meta.nlink = 1;
        let fat_bytes = self.geo.sectors_per_fat * self.geo.sector_size as u64;
        let (name, size) = match inum - first {
            0 => ("$MBR", self.geo.sector_size as u64),
            1 => ("$FAT1", fat_bytes),
            2 => ("$FAT2", fat_bytes),
            _ => ("$OrphanFiles", 0),
        };
        meta.name = Some(name.into());
        meta.size = size;
        meta
    }

    fn dentry_meta(&mut self, inum: u64) -> Result<InodeMeta, FsError> {
        let sect = self.geo.inode_to_sector(inum);
        let slot = self.geo.inode_slot(inum) as usize;

        let mut buf = vec![0u8; self.geo.sector_size as usize];
        self.img.read_at(
            "inode_open: directory entry",
            sect * self.geo.sector_size as u64,
            &mut buf,
        )?;
        let raw = &buf[slot * DENTRY_SIZE..(slot + 1) * DENTRY_SIZE];

        let mut meta = InodeMeta::new(inum, InodeType::Other);
        meta.content = raw.to_vec();
        meta.nlink = 1;

        if raw[0] == 0x00 {
            // Never-used slot.
            return Ok(meta);
        }

        let attrib = raw[11];
        meta.attributes = attrib;
        meta.allocated = raw[0] != 0xE5;
        meta.itype = if attrib & ATTR_LONG_NAME == ATTR_LONG_NAME {
            InodeType::Virtual
        } else if attrib & ATTR_VOLUME != 0 {
            InodeType::Virtual
        } else if attrib & ATTR_DIRECTORY != 0 {
            InodeType::Directory
        } else {
            InodeType::Regular
        };
        meta.mode = if attrib & ATTR_READ_ONLY != 0 {
            0o555
        } else {
            0o777
        };
        meta.size = u64::from(LittleEndian::read_u32(&raw[28..32]));

        let cluster_lo = u64::from(LittleEndian::read_u16(&raw[26..28]));
        meta.location = if self.geo.kind == FsKind::Fat32 {
            (u64::from(LittleEndian::read_u16(&raw[20..22])) << 16) | cluster_lo
        } else {
            cluster_lo
        };

        meta.mtime = fat_datetime_to_unix(
            LittleEndian::read_u16(&raw[24..26]),
            LittleEndian::read_u16(&raw[22..24]),
        );
        meta.atime = fat_datetime_to_unix(LittleEndian::read_u16(&raw[18..20]), 0);
        meta.crtime = fat_datetime_to_unix(
            LittleEndian::read_u16(&raw[16..18]),
            LittleEndian::read_u16(&raw[14..16]),
        );

        if meta.itype != InodeType::Virtual {
            meta.name = Some(build_short_name(&raw[0..8], &raw[8..11]));
        }

        Ok(meta)
    }

    /// Sector addresses backing an inode, in file order.
    ///
    /// The root directory and the special files map to fixed regions; files
    /// and subdirectories follow their cluster chain. A visited-set bounds
    /// chain traversal so a looped FAT cannot spin forever.
    fn file_sectors(&mut self, meta: &InodeMeta, size_override: u64) -> Result<Vec<u64>, FsError> {
        let size = if size_override > 0 {
            size_override
        } else {
            meta.size
        };

        if meta.addr == ROOT_INODE {
            return self.root_sectors();
        }
        if meta.addr >= self.first_special_inode() {
            let base = match meta.name.as_deref() {
                Some("$MBR") => return Ok(vec![0]),
                Some("$FAT1") => self.geo.first_fat_sector,
                Some("$FAT2") => self.geo.first_fat_sector + self.geo.sectors_per_fat,
                _ => return Ok(Vec::new()),
            };
            return Ok((base..base + self.geo.sectors_per_fat).collect());
        }

        let mut remaining = size.div_ceil(self.geo.sector_size as u64);
        let mut sectors = Vec::new();
        let mut seen = HashSet::new();
        let mut cluster = meta.location;

        while remaining > 0 && cluster >= 2 && cluster <= self.geo.last_cluster {
            if !seen.insert(cluster) {
                debug!("loop found while walking cluster chain of inode {}", meta.addr);
                break;
            }
            let base = self.geo.cluster_to_sector(cluster);
            for i in 0..self.geo.cluster_sectors {
                if remaining == 0 {
                    break;
                }
                sectors.push(base + i);
                remaining -= 1;
            }
            match self.chain.entry(&mut self.img, &self.geo, cluster)? {
                FatEntry::Next(next) => cluster = next,
                _ => break,
            }
        }
        Ok(sectors)
    }

    /// Sectors of the root directory region.
    ///
    /// XTAF places the root in a fixed region below the cluster area; a
    /// cluster-chained root (sector inside the cluster area) is chased
    /// through the FAT with cycle detection.
    fn root_sectors(&mut self) -> Result<Vec<u64>, FsError> {
        if self.geo.root_sector < self.geo.first_cluster_sector {
            return Ok((self.geo.root_sector..self.geo.first_cluster_sector).collect());
        }

        let mut sectors = Vec::new();
        let mut seen = HashSet::new();
        let mut cluster = self.geo.sector_to_cluster(self.geo.root_sector);
        while cluster >= 2 && cluster <= self.geo.last_cluster && seen.insert(cluster) {
            let base = self.geo.cluster_to_sector(cluster);
            sectors.extend(base..base + self.geo.cluster_sectors);
            match self.chain.entry(&mut self.img, &self.geo, cluster)? {
                FatEntry::Next(next) => cluster = next,
                _ => break,
            }
        }
        Ok(sectors)
    }

    /// Last sector of the root directory, for the FAT32-style layout report.
    fn root_chain_end(&mut self) -> Result<u64, FsError> {
        let sectors = self.root_sectors()?;
        Ok(sectors
            .last()
            .copied()
            .unwrap_or(self.geo.first_cluster_sector - 1))
    }

    fn sector_flags(&mut self, addr: u64) -> Result<BlockFlags, FsError> {
        if addr < self.geo.first_data_sector {
            // Reserved sectors and the FATs.
            Ok(BlockFlags::META | BlockFlags::ALLOC)
        } else if addr < self.geo.first_cluster_sector {
            // Fixed root directory region.
            Ok(BlockFlags::CONT | BlockFlags::ALLOC)
        } else if self
            .chain
            .is_sector_allocated(&mut self.img, &self.geo, addr)?
        {
            Ok(BlockFlags::CONT | BlockFlags::ALLOC)
        } else {
            Ok(BlockFlags::CONT | BlockFlags::UNALLOC)
        }
    }

    fn attribute_line(&self, meta: &InodeMeta) -> String {
        if meta.content.is_empty() {
            // Root or a special file: no backing directory entry.
            return match meta.itype {
                InodeType::Directory => "Directory".into(),
                InodeType::Virtual => "Virtual".into(),
                _ => "File".into(),
            };
        }
        let attrib = meta.attributes;
        if attrib & ATTR_LONG_NAME == ATTR_LONG_NAME {
            return "Long File Name".into();
        }
        let mut line = String::from(if attrib & ATTR_DIRECTORY != 0 {
            "Directory"
        } else if attrib & ATTR_VOLUME != 0 {
            "Volume Label"
        } else {
            "File"
        });
        if attrib & ATTR_READ_ONLY != 0 {
            line.push_str(", Read Only");
        }
        if attrib & ATTR_HIDDEN != 0 {
            line.push_str(", Hidden");
        }
        if attrib & ATTR_SYSTEM != 0 {
            line.push_str(", System");
        }
        if attrib & ATTR_ARCHIVE != 0 {
            line.push_str(", Archive");
        }
        line
    }
}

impl<R: Read + Seek> Filesystem for FatFilesystem<R> {
    fn info(&self) -> &FsInfo {
        &self.info
    }

    fn block_walk(
        &mut self,
        start: u64,
        end: u64,
        flags: WalkFlags,
        visitor: &mut dyn BlockVisitor,
    ) -> Result<(), FsError> {
        if start < self.info.first_block || start > self.info.last_block {
            return Err(FsError::WalkRange(format!("start block: {start}")));
        }
        if end < self.info.first_block || end > self.info.last_block {
            return Err(FsError::WalkRange(format!("end block: {end}")));
        }
        let flags = flags.normalized();

        debug!("fat block_walk: walking {start} to {end}");

        let block_size = self.geo.sector_size as u64;
        let mut addr = start;

        // The sectors before the cluster area (reserved, FATs, fixed root)
        // are always allocated, so they are only worth visiting when the
        // caller asked for allocated blocks. Read them in aggregate chunks.
        if start < self.geo.first_cluster_sector && flags.contains(WalkFlags::ALLOC) {
            let mut buf = vec![0u8; (block_size * PREDATA_CHUNK_SECTORS) as usize];
            while addr < self.geo.first_cluster_sector && addr <= end {
                let chunk = PREDATA_CHUNK_SECTORS.min(self.geo.first_cluster_sector - addr);
                let chunk_buf = &mut buf[..(chunk * block_size) as usize];
                self.img
                    .read_at("block_walk: pre-data area", addr * block_size, chunk_buf)?;

                for i in 0..chunk {
                    if addr > end || addr >= self.geo.first_cluster_sector {
                        break;
                    }
                    let myflags = if addr < self.geo.first_data_sector {
                        BlockFlags::ALLOC | BlockFlags::META
                    } else {
                        BlockFlags::ALLOC | BlockFlags::CONT
                    };
                    if flags.admits(myflags) {
                        let i = i as usize;
                        let block = BlockView {
                            addr,
                            flags: myflags | BlockFlags::RAW,
                            data: &buf[i * block_size as usize..(i + 1) * block_size as usize],
                        };
                        match visitor.visit(&block) {
                            WalkAction::Continue => {}
                            WalkAction::Stop => return Ok(()),
                            WalkAction::Error => return Err(FsError::WalkCallback),
                        }
                    }
                    addr += 1;
                }
            }

            if addr > end {
                return Ok(());
            }
        } else if addr < self.geo.first_cluster_sector {
            addr = self.geo.first_cluster_sector;
        }

        if addr > end {
            return Ok(());
        }

        // Data area: iterate cluster-sized chunks, deciding allocation once
        // per cluster. The final chunk may be partial.
        addr = self.geo.cluster_to_sector(self.geo.sector_to_cluster(addr));
        let csize = self.geo.cluster_sectors;
        let mut buf = vec![0u8; (block_size * csize) as usize];

        debug!("fat block_walk: walking data area ({addr} to {end})");

        while addr <= end {
            let allocated = self
                .chain
                .is_sector_allocated(&mut self.img, &self.geo, addr)?;
            let myflags = BlockFlags::CONT
                | if allocated {
                    BlockFlags::ALLOC
                } else {
                    BlockFlags::UNALLOC
                };

            if !flags.admits(myflags) {
                addr += csize;
                continue;
            }

            let read_size = csize.min(end - addr + 1);
            let chunk_buf = &mut buf[..(read_size * block_size) as usize];
            self.img
                .read_at("block_walk: data area", addr * block_size, chunk_buf)?;

            for i in 0..read_size {
                let sect = addr + i;
                if sect < start {
                    continue;
                }
                if sect > end {
                    break;
                }
                let i = i as usize;
                let block = BlockView {
                    addr: sect,
                    flags: myflags | BlockFlags::RAW,
                    data: &buf[i * block_size as usize..(i + 1) * block_size as usize],
                };
                match visitor.visit(&block) {
                    WalkAction::Continue => {}
                    WalkAction::Stop => return Ok(()),
                    WalkAction::Error => return Err(FsError::WalkCallback),
                }
            }
            addr += csize;
        }

        Ok(())
    }

    fn block_getflags(&mut self, addr: u64) -> Result<BlockFlags, FsError> {
        if addr < self.info.first_block || addr > self.info.last_block {
            return Err(FsError::BlockNumber(format!("block address: {addr}")));
        }
        self.sector_flags(addr)
    }

    fn inode_open(&mut self, inum: u64) -> Result<InodeMeta, FsError> {
        if inum < self.info.first_inode || inum > self.info.last_inode {
            return Err(FsError::InodeNumber(format!(
                "inode_open: {inum} too large/small"
            )));
        }
        if inum == ROOT_INODE {
            return Ok(self.root_meta());
        }
        if inum >= self.first_special_inode() {
            return Ok(self.special_meta(inum));
        }
        self.dentry_meta(inum)
    }

    fn inode_walk(
        &mut self,
        start: u64,
        end: u64,
        flags: WalkFlags,
        visitor: &mut dyn InodeVisitor,
    ) -> Result<(), FsError> {
        if start < self.info.first_inode || start > self.info.last_inode {
            return Err(FsError::WalkRange(format!("start inode: {start}")));
        }
        if end < self.info.first_inode || end > self.info.last_inode {
            return Err(FsError::WalkRange(format!("end inode: {end}")));
        }
        let flags = flags.normalized();

        debug!("fat inode_walk: walking {start} to {end}");

        for inum in start..=end {
            let meta = self.inode_open(inum)?;
            let admitted = if meta.allocated {
                flags.contains(WalkFlags::ALLOC)
            } else {
                flags.contains(WalkFlags::UNALLOC)
            };
            if !admitted {
                continue;
            }
            match visitor.visit(&meta) {
                WalkAction::Continue => {}
                WalkAction::Stop => return Ok(()),
                WalkAction::Error => return Err(FsError::WalkCallback),
            }
        }
        Ok(())
    }

    fn fsstat(&mut self, out: &mut dyn Write) -> Result<(), FsError> {
        let geo = self.geo.clone();
        let info = self.info.clone();

        // The volume label lives in a directory entry in the first sector
        // of the root directory.
        let mut root_buf = vec![0u8; geo.sector_size as usize];
        self.img.read_at(
            "fsstat: root directory",
            geo.root_sector * geo.sector_size as u64,
            &mut root_buf,
        )?;
        let label = root_buf
            .chunks_exact(DENTRY_SIZE)
            .find(|slot| slot[11] == ATTR_VOLUME)
            .map(|slot| slot[0..8].iter().map(|&b| b as char).collect::<String>());

        writeln!(out, "FILE SYSTEM INFORMATION")?;
        writeln!(out, "--------------------------------------------")?;
        writeln!(out, "File System Type: {}", info.kind.name())?;
        writeln!(
            out,
            "Serial number: 0x{:x}",
            LittleEndian::read_u32(&self.serial_number)
        )?;
        match label {
            Some(label) => writeln!(out, "Volume Label (Root Directory): {label}")?,
            None => writeln!(out, "Volume Label (Root Directory):")?,
        }

        writeln!(out)?;
        writeln!(out, "File System Layout (in sectors)")?;
        writeln!(
            out,
            "Total Range: {} - {}",
            info.first_block, info.last_block
        )?;
        if info.last_block != info.last_block_actual {
            writeln!(
                out,
                "Total Range in Image: {} - {}",
                info.first_block, info.last_block_actual
            )?;
        }

        writeln!(out, "* Reserved: 0 - {}", geo.first_fat_sector - 1)?;
        writeln!(out, "** Boot Sector: 0")?;
        for i in 0..geo.num_fats {
            let base = geo.first_fat_sector + u64::from(i) * geo.sectors_per_fat;
            writeln!(
                out,
                "* FAT {i}: {} - {}",
                base,
                base + geo.sectors_per_fat - 1
            )?;
        }
        writeln!(
            out,
            "* Data Area: {} - {}",
            geo.first_data_sector, info.last_block
        )?;

        if info.kind != FsKind::Fat32 {
            let cluster_area = geo.cluster_sectors * geo.cluster_count;
            writeln!(
                out,
                "** Root Directory: {} - {}",
                geo.first_data_sector,
                geo.first_cluster_sector - 1
            )?;
            writeln!(
                out,
                "** Cluster Area: {} - {}",
                geo.first_cluster_sector,
                geo.first_cluster_sector + cluster_area - 1
            )?;
            if geo.first_cluster_sector + cluster_area - 1 != info.last_block {
                writeln!(
                    out,
                    "** Non-clustered: {} - {}",
                    geo.first_cluster_sector + cluster_area,
                    info.last_block
                )?;
            }
        } else {
            let cluster_area = geo.cluster_sectors * (geo.last_cluster - 1);
            writeln!(
                out,
                "** Cluster Area: {} - {}",
                geo.first_cluster_sector,
                geo.first_cluster_sector + cluster_area - 1
            )?;
            let root_end = self.root_chain_end()?;
            writeln!(
                out,
                "*** Root Directory: {} - {}",
                geo.root_sector, root_end
            )?;
            if geo.first_cluster_sector + cluster_area - 1 != info.last_block {
                writeln!(
                    out,
                    "** Non-clustered: {} - {}",
                    geo.first_cluster_sector + cluster_area,
                    info.last_block
                )?;
            }
        }

        writeln!(out)?;
        writeln!(out, "METADATA INFORMATION")?;
        writeln!(out, "--------------------------------------------")?;
        writeln!(out, "Range: {} - {}", info.first_inode, info.last_inode)?;
        writeln!(out, "Root Directory: {}", info.root_inode)?;

        writeln!(out)?;
        writeln!(out, "CONTENT INFORMATION")?;
        writeln!(out, "--------------------------------------------")?;
        writeln!(out, "Sector Size: {}", geo.sector_size)?;
        writeln!(out, "Cluster Size: {}", geo.cluster_bytes())?;
        writeln!(out, "Total Cluster Range: 2 - {}", geo.last_cluster)?;

        // Clusters whose entry carries the bad marker.
        let mut printed = 0u64;
        for cluster in 2..=geo.last_cluster {
            let entry = match self.chain.entry(&mut self.img, &geo, cluster) {
                Ok(entry) => entry,
                Err(_) => break,
            };
            if entry != FatEntry::Bad {
                continue;
            }
            if printed == 0 {
                write!(out, "Bad Sectors: ")?;
            }
            let base = geo.cluster_to_sector(cluster);
            for i in 0..geo.cluster_sectors {
                write!(out, "{} ", base + i)?;
                printed += 1;
                if printed % 8 == 0 {
                    writeln!(out)?;
                }
            }
        }
        if printed > 0 && printed % 8 != 0 {
            writeln!(out)?;
        }

        // Contiguous next-pointer runs of the FAT.
        writeln!(out)?;
        writeln!(out, "FAT CONTENTS (in sectors)")?;
        writeln!(out, "--------------------------------------------")?;

        let mut run_start = geo.first_cluster_sector;
        for cluster in 2..=geo.last_cluster {
            let run_end = geo.cluster_to_sector(cluster + 1) - 1;
            let entry = match self.chain.entry(&mut self.img, &geo, cluster) {
                Ok(entry) => entry,
                Err(_) => break,
            };

            match entry {
                FatEntry::Next(next) if next == cluster + 1 => continue,
                FatEntry::Next(next) => {
                    writeln!(
                        out,
                        "{}-{} ({}) -> {}",
                        run_start,
                        run_end,
                        run_end - run_start + 1,
                        geo.cluster_to_sector(next)
                    )?;
                }
                FatEntry::Eof => {
                    writeln!(
                        out,
                        "{}-{} ({}) -> EOF",
                        run_start,
                        run_end,
                        run_end - run_start + 1
                    )?;
                }
                FatEntry::Bad => {
                    writeln!(
                        out,
                        "{}-{} ({}) -> BAD",
                        run_start,
                        run_end,
                        run_end - run_start + 1
                    )?;
                }
                FatEntry::Free => {}
            }
            run_start = run_end + 1;
        }

        Ok(())
    }

    fn istat(
        &mut self,
        out: &mut dyn Write,
        inum: u64,
        forced_block_count: u64,
        time_skew: i32,
    ) -> Result<(), FsError> {
        let meta = self.inode_open(inum)?;

        writeln!(out, "Directory Entry: {inum}")?;
        writeln!(
            out,
            "{}Allocated",
            if meta.allocated { "" } else { "Not " }
        )?;
        writeln!(out, "File Attributes: {}", self.attribute_line(&meta))?;
        writeln!(out, "Size: {}", meta.size)?;
        if let Some(name) = &meta.name {
            writeln!(out, "Name: {name}")?;
        }

        let skew = i64::from(time_skew);
        if skew != 0 {
            writeln!(out)?;
            writeln!(out, "Adjusted Directory Entry Times:")?;
            writeln!(out, "Written:\t{}", format_time(meta.mtime - skew))?;
            writeln!(out, "Accessed:\t{}", format_time(meta.atime - skew))?;
            writeln!(out, "Created:\t{}", format_time(meta.crtime - skew))?;
            writeln!(out)?;
            writeln!(out, "Original Directory Entry Times:")?;
        } else {
            writeln!(out)?;
            writeln!(out, "Directory Entry Times:")?;
        }
        writeln!(out, "Written:\t{}", format_time(meta.mtime))?;
        writeln!(out, "Accessed:\t{}", format_time(meta.atime))?;
        writeln!(out, "Created:\t{}", format_time(meta.crtime))?;

        writeln!(out)?;
        writeln!(out, "Sectors:")?;

        let size_override = forced_block_count * self.geo.sector_size as u64;
        let sectors = self.file_sectors(&meta, size_override)?;
        for (idx, sect) in sectors.iter().enumerate() {
            write!(out, "{sect} ")?;
            if (idx + 1) % 8 == 0 {
                writeln!(out)?;
            }
        }
        if sectors.len() % 8 != 0 {
            writeln!(out)?;
        }

        Ok(())
    }
}

/// Convert a FAT date/time pair to seconds since the Unix epoch.
///
/// A zero date means the field was never set.
fn fat_datetime_to_unix(date: u16, time: u16) -> i64 {
    if date == 0 {
        return 0;
    }
    let day = u32::from(date & 0x1F);
    let month = u32::from((date >> 5) & 0x0F);
    let year = i32::from((date >> 9) & 0x7F) + 1980;
    let second = u32::from(time & 0x1F) * 2;
    let minute = u32::from((time >> 5) & 0x3F);
    let hour = u32::from((time >> 11) & 0x1F);

    chrono::NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}

/// Render a Unix timestamp for istat output.
fn format_time(ts: i64) -> String {
    if ts == 0 {
        return "0000-00-00 00:00:00 (UTC)".into();
    }
    match chrono::DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S (UTC)").to_string(),
        None => "0000-00-00 00:00:00 (UTC)".into(),
    }
}

/// Build a DOS 8.3 short filename from the name and extension bytes.
fn build_short_name(name: &[u8], ext: &[u8]) -> String {
    let name_str: String = name.iter().map(|&b| b as char).collect();
    let ext_str: String = ext.iter().map(|&b| b as char).collect();
    let name_trimmed = name_str.trim_end();
    let ext_trimmed = ext_str.trim_end();

    if ext_trimmed.is_empty() {
        name_trimmed.to_string()
    } else {
        format!("{name_trimmed}.{ext_trimmed}")
    }
}
