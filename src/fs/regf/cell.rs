//! Registry cell headers.
//!
//! A cell starts with a signed 32-bit length word: negative means the cell
//! is allocated and the magnitude is its length. The next two bytes are the
//! record signature.

use std::io::{Read, Seek};

use crate::endian::Endian;
use crate::error::FsError;
use crate::image::ImageReader;

use super::layout::HBIN_SIZE;

/// Record kind of a cell, from its 16-bit signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Vk,
    Nk,
    Lf,
    Lh,
    Li,
    Ri,
    Sk,
    Db,
    Unknown,
}

impl RecordType {
    pub fn from_signature(sig: u16) -> Self {
        match sig {
            0x6B76 => RecordType::Vk,
            0x6B6E => RecordType::Nk,
            0x666C => RecordType::Lf,
            0x686C => RecordType::Lh,
            0x696C => RecordType::Li,
            0x6972 => RecordType::Ri,
            0x6B73 => RecordType::Sk,
            0x6264 => RecordType::Db,
            _ => RecordType::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordType::Vk => "VK",
            RecordType::Nk => "NK",
            RecordType::Lf => "LF",
            RecordType::Lh => "LH",
            RecordType::Li => "LI",
            RecordType::Ri => "RI",
            RecordType::Sk => "SK",
            RecordType::Db => "DB",
            RecordType::Unknown => "Unknown",
        }
    }

    /// Whether the signature names a known record structure.
    pub fn is_known(self) -> bool {
        self != RecordType::Unknown
    }
}

/// Header of a single cell.
#[derive(Debug, Clone, Copy)]
pub struct Cell {
    /// Byte offset of the cell within the image.
    pub inum: u64,
    /// Cell length including the length word.
    pub length: u32,
    pub is_allocated: bool,
    pub record_type: RecordType,
}

impl Cell {
    /// Load the cell header at `inum`, which must lie in `[first, last]`.
    pub fn load<R: Read + Seek>(
        img: &mut ImageReader<R>,
        endian: Endian,
        first: u64,
        last: u64,
        inum: u64,
    ) -> Result<Self, FsError> {
        if inum < first || inum > last {
            return Err(FsError::BlockNumber(format!(
                "invalid cell address to load: {inum}"
            )));
        }

        let mut buf = [0u8; 6];
        img.read_at("reg_load_cell", inum, &mut buf)?;

        let raw = endian.read_u32(&buf[0..4]);
        let (is_allocated, length) = if raw & (1 << 31) != 0 {
            (true, (raw as i32).unsigned_abs())
        } else {
            (false, raw)
        };

        if u64::from(length) >= HBIN_SIZE {
            return Err(FsError::InodeCorrupt(format!(
                "registry cell corrupt: size too large ({length})"
            )));
        }
        if (inum % HBIN_SIZE) + u64::from(length) > HBIN_SIZE {
            return Err(FsError::InodeCorrupt(format!(
                "registry cell at {inum:#x} crosses an hbin boundary"
            )));
        }

        Ok(Self {
            inum,
            length,
            is_allocated,
            record_type: RecordType::from_signature(endian.read_u16(&buf[4..6])),
        })
    }
}
