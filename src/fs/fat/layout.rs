//! XTAF boot sector parsing and sector/cluster geometry.
//!
//! XTAF boot sectors carry almost no layout information, so the geometry of
//! recognised partitions is table-driven: a small mapping from the image
//! size or partition offset to the root sector, FAT size and cluster range.
//! Unrecognised partitions fail open rather than guessing.

use byteorder::{BigEndian, ByteOrder};
use log::warn;

use crate::error::FsError;
use crate::fs::block::FsKind;

/// XTAF sector size. The format carries no field for it; 512 matches every
/// known image, although it is not confirmed by any format document.
pub const SECTOR_SIZE: u32 = 512;

/// First sector of the first FAT copy on every known XTAF partition.
pub const FIRST_FAT_SECTOR: u64 = 8;

/// Size of one directory entry slot.
pub const DENTRY_SIZE: usize = 32;

/// Reserved inode number of the root directory.
pub const ROOT_INODE: u64 = 2;

/// First valid inode number. Inodes 0 and 1 are unused.
pub const FIRST_INODE: u64 = 2;

/// Reserved virtual inodes at the top of the inode range.
pub const NUM_SPECIAL_INODES: u64 = 4;

pub const FAT12_MASK: u32 = 0x0FFF;
pub const FAT16_MASK: u32 = 0xFFFF;
pub const FAT32_MASK: u32 = 0x0FFF_FFFF;

const BOOT_SECTOR_LEN: usize = 16;

/// Fields parsed from an XTAF boot sector.
///
/// Layout: magic "XTAF" at 0, serial number bytes at 4, sectors-per-cluster
/// as a big-endian u32 at 8, number of FATs as a big-endian u32 at 12.
#[derive(Debug, Clone, Copy)]
pub struct BootSector {
    pub serial_number: [u8; 4],
    pub sectors_per_cluster: u32,
    pub num_fats: u8,
}

impl BootSector {
    pub fn has_magic(buf: &[u8]) -> bool {
        buf.len() >= 4 && &buf[0..4] == b"XTAF"
    }

    /// Whether the magic field reads as all zeroes, which is the cue to try
    /// the backup boot sector.
    pub fn magic_is_zero(buf: &[u8]) -> bool {
        buf.len() >= 4 && buf[0..4] == [0, 0, 0, 0]
    }

    pub fn parse(buf: &[u8]) -> Result<Self, FsError> {
        if buf.len() < BOOT_SECTOR_LEN {
            return Err(FsError::FormatMagic("boot sector too short".into()));
        }
        if !Self::has_magic(buf) {
            return Err(FsError::FormatMagic("not an XTAF file system (magic)".into()));
        }

        let mut serial_number = [0u8; 4];
        serial_number.copy_from_slice(&buf[4..8]);

        let sectors_per_cluster = BigEndian::read_u32(&buf[8..12]);
        if sectors_per_cluster > 128 {
            warn!("sectors per cluster is more than 128: {sectors_per_cluster}");
        }
        if !matches!(sectors_per_cluster, 1 | 2 | 4 | 8 | 16 | 32 | 64 | 128) {
            return Err(FsError::FormatMagic(format!(
                "not an XTAF file system (cluster size {sectors_per_cluster})"
            )));
        }

        let num_fats = BigEndian::read_u32(&buf[12..16]);
        if num_fats > 256 {
            warn!("number of FATs is more than 256: {num_fats}");
        }
        if num_fats == 0 || num_fats > 8 {
            return Err(FsError::FormatMagic(format!(
                "not an XTAF file system (number of FATs {num_fats})"
            )));
        }

        Ok(Self {
            serial_number,
            sectors_per_cluster,
            num_fats: num_fats as u8,
        })
    }
}

/// Table-driven geometry for one recognised XTAF partition.
#[derive(Debug, Clone, Copy)]
pub struct PartitionGeometry {
    pub root_sector: u64,
    pub sectors_per_fat: u64,
    pub first_cluster_sector: u64,
    pub cluster_count: u64,
    pub last_cluster: u64,
}

/// Known (image size, partition offset) combinations. A row matches when
/// either key matches; `None` offsets never match by offset.
const KNOWN_PARTITIONS: &[(&[u64], Option<u64>, PartitionGeometry)] = &[
    (
        &[146413464, 4712496640, 4846714880],
        None,
        PartitionGeometry {
            root_sector: 1176,
            sectors_per_fat: 1160,
            first_cluster_sector: 1240,
            cluster_count: 147910,
            last_cluster: 147891,
        },
    ),
    (
        &[2147483648],
        Some(0x80000),
        PartitionGeometry {
            root_sector: 528,
            sectors_per_fat: 512,
            first_cluster_sector: 592,
            cluster_count: 65536,
            last_cluster: 65527,
        },
    ),
    (
        &[2348810240],
        Some(0x80080000),
        PartitionGeometry {
            root_sector: 2248,
            sectors_per_fat: 2240,
            first_cluster_sector: 2264,
            cluster_count: 65536,
            last_cluster: 65527,
        },
    ),
    (
        &[216203264],
        Some(0x10C080000),
        PartitionGeometry {
            root_sector: 64,
            sectors_per_fat: 56,
            first_cluster_sector: 96,
            cluster_count: 13196,
            last_cluster: 13194,
        },
    ),
    (
        &[134217728],
        Some(0x118EB0000),
        PartitionGeometry {
            root_sector: 48,
            sectors_per_fat: 40,
            first_cluster_sector: 80,
            cluster_count: 8192,
            last_cluster: 8190,
        },
    ),
    (
        &[268435456],
        Some(0x120EB0000),
        PartitionGeometry {
            root_sector: 80,
            sectors_per_fat: 64,
            first_cluster_sector: 112,
            cluster_count: 16384,
            last_cluster: 16381,
        },
    ),
    (
        &[244943674880],
        Some(0x130EB0000),
        PartitionGeometry {
            root_sector: 116808,
            sectors_per_fat: 116800,
            first_cluster_sector: 116840,
            cluster_count: 14950175,
            last_cluster: 14946525,
        },
    ),
];

/// Look up the geometry for a partition by image size or offset.
pub fn known_geometry(image_size: u64, offset: u64) -> Option<PartitionGeometry> {
    KNOWN_PARTITIONS
        .iter()
        .find(|(sizes, off, _)| sizes.contains(&image_size) || *off == Some(offset))
        .map(|(_, _, geometry)| *geometry)
}

/// Complete sector/cluster geometry of an opened FAT filesystem.
///
/// Built once at open time from the boot sector and the partition table
/// entry; immutable afterwards.
#[derive(Debug, Clone)]
pub struct FatGeometry {
    /// Resolved FAT width.
    pub kind: FsKind,
    pub sector_size: u32,
    /// log2 of the sector size.
    pub sector_shift: u32,
    /// Sectors per cluster.
    pub cluster_sectors: u64,
    pub num_fats: u8,
    pub first_fat_sector: u64,
    pub sectors_per_fat: u64,
    /// First sector past the FATs: the fixed root directory region.
    pub first_data_sector: u64,
    /// First sector addressable by a cluster number.
    pub first_cluster_sector: u64,
    pub root_sector: u64,
    pub cluster_count: u64,
    /// Clusters are numbered from 2, so this is `1 + cluster_count`, or the
    /// table-provided value when the partition does not use its full range.
    pub last_cluster: u64,
    pub total_sectors: u64,
    /// Entry mask for the resolved FAT width.
    pub mask: u32,
    pub dentry_per_sector: u64,
    pub dentry_per_cluster: u64,
}

impl FatGeometry {
    pub fn build(
        kind: FsKind,
        boot: &BootSector,
        partition: &PartitionGeometry,
        total_sectors: u64,
    ) -> Result<Self, FsError> {
        let sector_shift = match SECTOR_SIZE {
            512 => 9,
            1024 => 10,
            2048 => 11,
            4096 => 12,
            other => {
                return Err(FsError::FormatMagic(format!(
                    "unsupported sector size {other}"
                )))
            }
        };

        // The FAT width determination is from the MS FAT overview doc; a
        // filesystem made by another OS could use different thresholds.
        let kind = match kind {
            FsKind::FatDetect => {
                if partition.cluster_count < 0xFFF4 {
                    FsKind::Fat16
                } else {
                    FsKind::Fat32
                }
            }
            FsKind::Fat12 if partition.cluster_count >= 4085 => {
                return Err(FsError::FormatMagic(
                    "too many clusters for FAT12: try auto-detect mode".into(),
                ));
            }
            other => other,
        };

        let mask = match kind {
            FsKind::Fat12 => FAT12_MASK,
            FsKind::Fat16 => FAT16_MASK,
            FsKind::Fat32 => FAT32_MASK,
            _ => {
                return Err(FsError::InvalidArgument(format!(
                    "not a FAT type: {}",
                    kind.name()
                )))
            }
        };

        let dentry_per_sector = SECTOR_SIZE as u64 / DENTRY_SIZE as u64;

        Ok(Self {
            kind,
            sector_size: SECTOR_SIZE,
            sector_shift,
            cluster_sectors: boot.sectors_per_cluster as u64,
            num_fats: boot.num_fats,
            first_fat_sector: FIRST_FAT_SECTOR,
            sectors_per_fat: partition.sectors_per_fat,
            first_data_sector: partition.root_sector,
            first_cluster_sector: partition.first_cluster_sector,
            root_sector: partition.root_sector,
            cluster_count: partition.cluster_count,
            last_cluster: partition.last_cluster,
            total_sectors,
            mask,
            dentry_per_sector,
            dentry_per_cluster: dentry_per_sector * boot.sectors_per_cluster as u64,
        })
    }

    /// First sector of a cluster. `cluster` must be at least 2.
    pub fn cluster_to_sector(&self, cluster: u64) -> u64 {
        self.first_cluster_sector + (cluster - 2) * self.cluster_sectors
    }

    /// Cluster containing a data-area sector.
    pub fn sector_to_cluster(&self, sector: u64) -> u64 {
        2 + (sector - self.first_cluster_sector) / self.cluster_sectors
    }

    /// Inode number of the first directory entry slot in a sector.
    pub fn sector_to_inode(&self, sector: u64) -> u64 {
        (sector - self.first_data_sector) * self.dentry_per_sector + ROOT_INODE + 1
    }

    /// Sector containing a directory entry inode.
    pub fn inode_to_sector(&self, inum: u64) -> u64 {
        self.first_data_sector + (inum - ROOT_INODE - 1) / self.dentry_per_sector
    }

    /// Slot index of a directory entry inode within its sector.
    pub fn inode_slot(&self, inum: u64) -> u64 {
        (inum - ROOT_INODE - 1) % self.dentry_per_sector
    }

    /// One sector past the cluster area; the non-clustered tail starts here.
    pub fn end_of_cluster_area(&self) -> u64 {
        self.first_cluster_sector + self.cluster_sectors * self.cluster_count
    }

    pub fn cluster_bytes(&self) -> u64 {
        self.cluster_sectors << self.sector_shift
    }

    pub fn eof_marker(&self) -> u32 {
        0x0FFF_FFF8 & self.mask
    }

    pub fn bad_marker(&self) -> u32 {
        0x0FFF_FFF7 & self.mask
    }

    pub fn is_eof(&self, value: u32) -> bool {
        value >= self.eof_marker()
    }

    pub fn is_bad(&self, value: u32) -> bool {
        value == self.bad_marker()
    }
}
