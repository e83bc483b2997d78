//! REGF header parsing and hbin page geometry.

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::endian::Endian;
use crate::error::FsError;

/// Size of one hbin page. Hives are carved into 4 KiB pages, each starting
/// with a 32-byte header followed by a run of cells.
pub const HBIN_SIZE: u64 = 4096;

/// Byte offset of the first hbin, directly after the REGF header block.
pub const FIRST_HBIN_OFFSET: u64 = 4096;

/// Size of the header at the start of every hbin page.
pub const HBIN_HEADER_SIZE: u64 = 0x20;

/// Bytes of the REGF header the backend consumes.
pub const REGF_HEADER_LEN: usize = 0x70;

const REGF_MAGIC: &[u8; 4] = b"regf";
const HIVE_NAME_LEN: usize = 64;

/// Fields parsed from the REGF header at offset 0 of a hive.
#[derive(Debug, Clone)]
pub struct RegfHeader {
    /// Write sequence numbers; equal when the hive was cleanly flushed.
    pub seq1: u32,
    pub seq2: u32,
    pub major_version: u32,
    pub minor_version: u32,
    /// Offset of the root key cell, relative to the first hbin.
    pub first_key_offset: u32,
    /// Offset of the last hbin page.
    pub last_hbin_offset: u32,
    hive_name_raw: [u8; HIVE_NAME_LEN],
}

impl RegfHeader {
    pub fn parse(buf: &[u8], endian: Endian) -> Result<Self, FsError> {
        if buf.len() < REGF_HEADER_LEN {
            return Err(FsError::FormatMagic("REGF header too short".into()));
        }
        if &buf[0..4] != REGF_MAGIC {
            return Err(FsError::FormatMagic(
                "REGF header has an invalid magic header".into(),
            ));
        }

        let mut hive_name_raw = [0u8; HIVE_NAME_LEN];
        hive_name_raw.copy_from_slice(&buf[0x30..0x30 + HIVE_NAME_LEN]);

        Ok(Self {
            seq1: endian.read_u32(&buf[0x04..0x08]),
            seq2: endian.read_u32(&buf[0x08..0x0C]),
            major_version: endian.read_u32(&buf[0x14..0x18]),
            minor_version: endian.read_u32(&buf[0x18..0x1C]),
            first_key_offset: endian.read_u32(&buf[0x24..0x28]),
            last_hbin_offset: endian.read_u32(&buf[0x28..0x2C]),
            hive_name_raw,
        })
    }

    /// Whether the two write sequence numbers agree.
    pub fn synchronized(&self) -> bool {
        self.seq1 == self.seq2
    }

    /// The hive name, transcoded from UTF-16LE. A failed transcode is
    /// logged and yields an empty string.
    pub fn hive_name(&self) -> String {
        match utf16le_to_string(&self.hive_name_raw) {
            Ok(name) => name,
            Err(err) => {
                warn!("failed to convert REGF hive name to UTF-8: {err}");
                String::new()
            }
        }
    }
}

/// Decode a NUL-terminated UTF-16LE byte buffer.
pub fn utf16le_to_string(bytes: &[u8]) -> Result<String, FsError> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16(&units).map_err(|e| FsError::Unicode(e.to_string()))
}
