//! Windows Registry hive backend.
//!
//! Blocks are hbin pages; inodes are cell byte offsets within the image.
//! Value payloads are never interpreted and security descriptors are not
//! parsed; every key and value reports mode 0o7777.

pub mod cell;
pub mod layout;

use std::io::{Read, Seek, Write};

use log::{debug, warn};

use crate::endian::Endian;
use crate::error::FsError;
use crate::image::ImageReader;

use super::block::{
    BlockFlags, BlockView, BlockVisitor, FsInfo, FsKind, InodeMeta, InodeType, InodeVisitor,
    WalkAction, WalkFlags,
};
use super::filesystem::Filesystem;

use cell::{Cell, RecordType};
use layout::{
    utf16le_to_string, RegfHeader, FIRST_HBIN_OFFSET, HBIN_HEADER_SIZE, HBIN_SIZE, REGF_HEADER_LEN,
};

/// Offset of the FILETIME epoch (1601) from the Unix epoch, in 100ns units.
const FILETIME_UNIX_DELTA: u64 = 116_444_736_000_000_000;

const NK_FLAG_ROOT_RECORD: u16 = 0x2C;
const CLASSNAME_NONE: u32 = 0xFFFF_FFFF;
const NAME_LEN_MAX: u16 = 512;

/// Windows Registry hive reader.
pub struct RegFilesystem<R> {
    img: ImageReader<R>,
    info: FsInfo,
    header: RegfHeader,
}

impl<R: Read + Seek> RegFilesystem<R> {
    /// Open a Registry hive at the given offset within an image.
    pub fn open(reader: R, offset: u64) -> Result<Self, FsError> {
        let mut img = ImageReader::new(reader, offset)?;

        let mut buf = [0u8; REGF_HEADER_LEN];
        img.read_at("regf open: header", 0, &mut buf)?;
        let header = RegfHeader::parse(&buf, Endian::Little)?;

        let last_hbin = u64::from(header.last_hbin_offset);
        let info = FsInfo {
            kind: FsKind::Reg,
            endian: Endian::Little,
            offset,
            block_size: HBIN_SIZE as u32,
            first_block: 0,
            last_block: last_hbin,
            last_block_actual: img.size() / HBIN_SIZE,
            first_inode: FIRST_HBIN_OFFSET,
            last_inode: last_hbin + HBIN_SIZE,
            root_inode: FIRST_HBIN_OFFSET + u64::from(header.first_key_offset),
        };

        Ok(Self { img, info, header })
    }

    /// The parsed REGF header.
    pub fn header(&self) -> &RegfHeader {
        &self.header
    }

    fn load_cell(&mut self, inum: u64) -> Result<Cell, FsError> {
        Cell::load(
            &mut self.img,
            self.info.endian,
            self.info.first_inode,
            self.info.last_inode,
            inum,
        )
    }

    /// Read the full backing bytes of a cell.
    fn cell_bytes(&mut self, cell: &Cell) -> Result<Vec<u8>, FsError> {
        let mut buf = vec![0u8; cell.length as usize];
        self.img.read_at("regf: cell", cell.inum, &mut buf)?;
        Ok(buf)
    }

    fn cell_meta(&mut self, cell: &Cell) -> Result<InodeMeta, FsError> {
        let itype = match cell.record_type {
            RecordType::Vk => InodeType::Regular,
            RecordType::Nk => InodeType::Directory,
            _ => InodeType::Virtual,
        };

        let mut meta = InodeMeta::new(cell.inum, itype);
        meta.allocated = cell.is_allocated;
        // Security info is not parsed; keys and values are wide open.
        meta.mode = 0o7777;
        meta.nlink = 1;
        meta.size = u64::from(cell.length);
        meta.location = cell.inum;
        meta.content = self.cell_bytes(cell)?;

        // Only key records carry a timestamp.
        if cell.record_type == RecordType::Nk && meta.content.len() >= 16 {
            let nttime = self.info.endian.read_u64(&meta.content[8..16]);
            meta.mtime = filetime_to_unix(nttime);
            meta.mtime_nano = filetime_nanos(nttime);
        }

        Ok(meta)
    }

    fn istat_nk(&mut self, out: &mut dyn Write, cell: &Cell, time_skew: i32) -> Result<(), FsError> {
        let buf = self.cell_bytes(cell)?;
        if buf.len() < 80 {
            return Err(FsError::InodeCorrupt(format!(
                "NK record at {:#x} truncated",
                cell.inum
            )));
        }

        writeln!(out)?;
        writeln!(out, "RECORD INFORMATION")?;
        writeln!(out, "--------------------------------------------")?;
        writeln!(out, "Record Type: NK")?;

        let classname_offset = self.info.endian.read_u32(&buf[52..56]);
        if classname_offset == CLASSNAME_NONE {
            writeln!(out, "Class Name: None")?;
        } else {
            let classname_length = self.info.endian.read_u16(&buf[78..80]);
            if classname_length > NAME_LEN_MAX {
                return Err(FsError::InodeCorrupt(
                    "NK classname string too long".into(),
                ));
            }
            let mut raw = vec![0u8; classname_length as usize];
            self.img.read_at(
                "istat: NK classname",
                FIRST_HBIN_OFFSET + u64::from(classname_offset) + 4,
                &mut raw,
            )?;
            let classname = utf16le_to_string(&raw).unwrap_or_else(|err| {
                warn!("failed to convert NK classname to UTF-8: {err}");
                String::new()
            });
            writeln!(out, "Class Name: {classname}")?;
        }

        let name_length = self.info.endian.read_u16(&buf[76..78]);
        if name_length > NAME_LEN_MAX || 80 + usize::from(name_length) > buf.len() {
            return Err(FsError::InodeCorrupt("NK key name string too long".into()));
        }
        let name = String::from_utf8_lossy(&buf[80..80 + usize::from(name_length)]);
        writeln!(out, "Key Name: {name}")?;

        let flags = self.info.endian.read_u16(&buf[6..8]);
        writeln!(
            out,
            "Root Record: {}",
            if flags == NK_FLAG_ROOT_RECORD {
                "Yes"
            } else {
                "No"
            }
        )?;

        let nttime = self.info.endian.read_u64(&buf[8..16]);
        let mtime = filetime_to_unix(nttime);
        let skew = i64::from(time_skew);
        if skew != 0 {
            writeln!(out)?;
            writeln!(out, "Adjusted Entry Times:")?;
            writeln!(out, "Modified:\t{}", format_time(mtime - skew))?;
            writeln!(out)?;
            writeln!(out, "Original Entry Times:")?;
        } else {
            writeln!(out)?;
            writeln!(out, "Entry Times:")?;
        }
        writeln!(out, "Modified:\t{}", format_time(mtime))?;

        let parent = self.info.endian.read_u32(&buf[20..24]);
        writeln!(
            out,
            "Parent Record: {}",
            FIRST_HBIN_OFFSET + u64::from(parent)
        )?;

        Ok(())
    }

    fn istat_unknown(&mut self, out: &mut dyn Write, cell: &Cell) -> Result<(), FsError> {
        let buf = self.cell_bytes(cell)?;

        writeln!(out)?;
        writeln!(out, "RECORD INFORMATION")?;
        writeln!(out, "--------------------------------------------")?;
        writeln!(out, "Record Type: Unknown (Data Record?)")?;
        if buf.len() >= 6 {
            writeln!(out, "Type identifier: 0x{:02x}{:02x}", buf[4], buf[5])?;
        }
        Ok(())
    }

    fn istat_tag_only(&self, out: &mut dyn Write, record_type: RecordType) -> Result<(), FsError> {
        writeln!(out)?;
        writeln!(out, "RECORD INFORMATION")?;
        writeln!(out, "--------------------------------------------")?;
        writeln!(out, "Record Type: {}", record_type.name())?;
        Ok(())
    }
}

impl<R: Read + Seek> Filesystem for RegFilesystem<R> {
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

        debug!("regf block_walk: walking {start} to {end}");

        // Hbins are always allocated and may hold both key structures and
        // value content, so every block carries the same flag set.
        let myflags = BlockFlags::ALLOC | BlockFlags::META | BlockFlags::CONT;

        let mut buf = vec![0u8; HBIN_SIZE as usize];
        let mut addr = start;
        while addr <= end {
            if flags.admits(myflags) {
                self.img.read_at("block_walk: hbin", addr, &mut buf)?;
                let block = BlockView {
                    addr,
                    flags: myflags | BlockFlags::RAW,
                    data: &buf,
                };
                match visitor.visit(&block) {
                    WalkAction::Continue => {}
                    WalkAction::Stop => return Ok(()),
                    WalkAction::Error => return Err(FsError::WalkCallback),
                }
            }
            addr += HBIN_SIZE;
        }
        Ok(())
    }

    fn block_getflags(&mut self, addr: u64) -> Result<BlockFlags, FsError> {
        if addr < self.info.first_block || addr > self.info.last_block {
            return Err(FsError::BlockNumber(format!("block address: {addr}")));
        }
        Ok(BlockFlags::ALLOC | BlockFlags::META | BlockFlags::CONT)
    }

    fn inode_open(&mut self, inum: u64) -> Result<InodeMeta, FsError> {
        if inum < self.info.first_inode || inum > self.info.last_inode {
            return Err(FsError::InodeNumber(format!(
                "inode_open: {inum} too large/small"
            )));
        }
        let cell = self.load_cell(inum)?;
        self.cell_meta(&cell)
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

        debug!("regf inode_walk: walking {start} to {end}");

        let mut hbin_start = start - (start % HBIN_SIZE);
        let mut addr = start;
        // Cells never live inside an hbin header.
        if addr % HBIN_SIZE < HBIN_HEADER_SIZE {
            addr = hbin_start + HBIN_HEADER_SIZE;
        }

        while addr <= end && addr < self.info.last_inode {
            let cell = self.load_cell(addr)?;
            if cell.length == 0 {
                return Err(FsError::InodeCorrupt(format!(
                    "zero-length cell at {addr:#x}"
                )));
            }
            if addr + u64::from(cell.length) > hbin_start + HBIN_SIZE {
                return Err(FsError::InodeCorrupt(format!(
                    "cell at {addr:#x} overran into the subsequent hbin header"
                )));
            }

            let mut cell_flags = if cell.is_allocated {
                BlockFlags::ALLOC
            } else {
                BlockFlags::UNALLOC
            };
            cell_flags = cell_flags
                | if cell.record_type.is_known() {
                    BlockFlags::META
                } else {
                    BlockFlags::CONT
                };

            if flags.admits(cell_flags) {
                let meta = self.cell_meta(&cell)?;
                match visitor.visit(&meta) {
                    WalkAction::Continue => {}
                    WalkAction::Stop => return Ok(()),
                    WalkAction::Error => return Err(FsError::WalkCallback),
                }
            }

            addr += u64::from(cell.length);
            if addr >= hbin_start + HBIN_SIZE {
                hbin_start += HBIN_SIZE;
                addr = hbin_start + HBIN_HEADER_SIZE;
            }
        }

        Ok(())
    }

    fn fsstat(&mut self, out: &mut dyn Write) -> Result<(), FsError> {
        writeln!(out)?;
        writeln!(out, "FILE SYSTEM INFORMATION")?;
        writeln!(out, "--------------------------------------------")?;
        writeln!(out, "File System Type: Windows Registry")?;
        writeln!(out, "Major Version: {}", self.header.major_version)?;
        writeln!(out, "Minor Version: {}", self.header.minor_version)?;
        writeln!(
            out,
            "Synchronized: {}",
            if self.header.synchronized() {
                "Yes"
            } else {
                "No"
            }
        )?;
        writeln!(out, "Hive name: {}", self.header.hive_name())?;

        writeln!(out)?;
        writeln!(out, "METADATA INFORMATION")?;
        writeln!(out, "--------------------------------------------")?;
        writeln!(out, "Offset to first key: {}", self.header.first_key_offset)?;
        writeln!(out, "Offset to last HBIN: {}", self.header.last_hbin_offset)?;
        Ok(())
    }

    fn istat(
        &mut self,
        out: &mut dyn Write,
        inum: u64,
        _forced_block_count: u64,
        time_skew: i32,
    ) -> Result<(), FsError> {
        writeln!(out)?;
        writeln!(out, "CELL INFORMATION")?;
        writeln!(out, "--------------------------------------------")?;

        let cell = self.load_cell(inum)?;

        writeln!(out, "Cell: {inum}")?;
        writeln!(
            out,
            "Allocated: {}",
            if cell.is_allocated { "Yes" } else { "No" }
        )?;
        writeln!(out, "Cell Size: {}", cell.length)?;

        match cell.record_type {
            RecordType::Nk => self.istat_nk(out, &cell, time_skew),
            RecordType::Unknown => self.istat_unknown(out, &cell),
            other => self.istat_tag_only(out, other),
        }
    }
}

/// Convert a Windows FILETIME to seconds since the Unix epoch.
fn filetime_to_unix(nttime: u64) -> i64 {
    (nttime.saturating_sub(FILETIME_UNIX_DELTA) / 10_000_000) as i64
}

/// Sub-second remainder of a FILETIME, in nanoseconds.
fn filetime_nanos(nttime: u64) -> u32 {
    ((nttime % 10_000_000) * 100) as u32
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
