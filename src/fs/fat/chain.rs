//! FAT entry decoding and allocation queries.

use std::io::{Read, Seek};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::error::FsError;
use crate::image::ImageReader;

use super::cache::{FatCache, FAT_CACHE_BYTES};
use super::layout::FatGeometry;

/// Decoded FAT entry for one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    /// Cluster is unallocated.
    Free,
    /// Cluster is allocated and chains to the given cluster.
    Next(u64),
    /// Cluster is allocated and ends its chain.
    Eof,
    /// Cluster is marked bad.
    Bad,
}

/// FAT traversal state: the sector-window cache plus the entry decoders.
#[derive(Debug)]
pub struct FatChain {
    cache: FatCache,
}

impl FatChain {
    pub fn new() -> Self {
        Self {
            cache: FatCache::new(),
        }
    }

    #[cfg(test)]
    pub(super) fn cache(&self) -> &FatCache {
        &self.cache
    }

    /// Decode the FAT entry for `cluster`.
    ///
    /// Entries whose value lands past the last cluster but below the bad
    /// marker are corrupt; they are coerced to free so a walk over a damaged
    /// FAT keeps going.
    pub fn entry<R: Read + Seek>(
        &mut self,
        img: &mut ImageReader<R>,
        geo: &FatGeometry,
        cluster: u64,
    ) -> Result<FatEntry, FsError> {
        if cluster < 2 || cluster > geo.last_cluster {
            // Requests for the cluster just past the end are lookups into
            // the non-clustered trailing sectors; ignore them.
            if cluster == geo.last_cluster + 1
                && geo.end_of_cluster_area() - 1 != geo.total_sectors - 1
            {
                debug!("ignoring FAT request for non-clustered sector (cluster {cluster})");
                return Ok(FatEntry::Free);
            }
            return Err(FsError::InvalidArgument(format!(
                "invalid cluster address: {cluster}"
            )));
        }

        let value = match geo.mask {
            super::layout::FAT12_MASK => self.entry12(img, geo, cluster)?,
            super::layout::FAT16_MASK => self.entry16(img, geo, cluster)?,
            _ => self.entry32(img, geo, cluster)?,
        };

        // Out of range but not a marker: corrupt entry, coerce to free.
        let value = if u64::from(value) > geo.last_cluster && value < geo.bad_marker() {
            warn!("FAT entry for cluster {cluster} too large ({value:#x}), resetting");
            0
        } else {
            value
        };

        if value == 0 {
            Ok(FatEntry::Free)
        } else if geo.is_bad(value) {
            Ok(FatEntry::Bad)
        } else if geo.is_eof(value) {
            Ok(FatEntry::Eof)
        } else {
            Ok(FatEntry::Next(u64::from(value)))
        }
    }

    fn entry12<R: Read + Seek>(
        &mut self,
        img: &mut ImageReader<R>,
        geo: &FatGeometry,
        cluster: u64,
    ) -> Result<u32, FsError> {
        if cluster & 0xF000 != 0 {
            return Err(FsError::InvalidArgument(format!(
                "FAT12 cluster {cluster} too large"
            )));
        }

        let byte_off = cluster + (cluster >> 1);
        let sect = geo.first_fat_sector + (byte_off >> geo.sector_shift);
        let idx = self.cache.load(img, sect, geo.sector_size)?;

        let mut offs = (((sect - self.cache.slot_base(idx)) << geo.sector_shift)
            + byte_off % geo.sector_size as u64) as usize;

        // A 12-bit entry in the window's last byte straddles the window end;
        // re-read the window starting at this sector. The window size is at
        // least two sectors, so the entry is then fully covered.
        if offs == FAT_CACHE_BYTES - 1 {
            self.cache.rebase(img, idx, sect, geo.sector_size)?;
            offs = (byte_off % geo.sector_size as u64) as usize;
        }

        let mut word = LittleEndian::read_u16(&self.cache.slot_buf(idx)[offs..offs + 2]);
        if cluster & 1 == 1 {
            word >>= 4;
        }
        Ok(u32::from(word) & geo.mask)
    }

    fn entry16<R: Read + Seek>(
        &mut self,
        img: &mut ImageReader<R>,
        geo: &FatGeometry,
        cluster: u64,
    ) -> Result<u32, FsError> {
        let byte_off = cluster << 1;
        let sect = geo.first_fat_sector + (byte_off >> geo.sector_shift);
        let idx = self.cache.load(img, sect, geo.sector_size)?;

        let offs = (((sect - self.cache.slot_base(idx)) << geo.sector_shift)
            + byte_off % geo.sector_size as u64) as usize;
        let word = LittleEndian::read_u16(&self.cache.slot_buf(idx)[offs..offs + 2]);
        Ok(u32::from(word) & geo.mask)
    }

    fn entry32<R: Read + Seek>(
        &mut self,
        img: &mut ImageReader<R>,
        geo: &FatGeometry,
        cluster: u64,
    ) -> Result<u32, FsError> {
        let byte_off = cluster << 2;
        let sect = geo.first_fat_sector + (byte_off >> geo.sector_shift);
        let idx = self.cache.load(img, sect, geo.sector_size)?;

        let offs = (((sect - self.cache.slot_base(idx)) << geo.sector_shift)
            + byte_off % geo.sector_size as u64) as usize;
        let word = LittleEndian::read_u32(&self.cache.slot_buf(idx)[offs..offs + 4]);
        Ok(word & geo.mask)
    }

    /// Whether a cluster is allocated, per its FAT entry.
    pub fn is_cluster_allocated<R: Read + Seek>(
        &mut self,
        img: &mut ImageReader<R>,
        geo: &FatGeometry,
        cluster: u64,
    ) -> Result<bool, FsError> {
        Ok(self.entry(img, geo, cluster)? != FatEntry::Free)
    }

    /// Whether a sector is allocated.
    ///
    /// Everything before the cluster area (reserved sectors, FATs and the
    /// fixed root directory) is always allocated; the non-clustered tail is
    /// always unallocated; in between, the FAT decides.
    pub fn is_sector_allocated<R: Read + Seek>(
        &mut self,
        img: &mut ImageReader<R>,
        geo: &FatGeometry,
        sector: u64,
    ) -> Result<bool, FsError> {
        if sector < geo.first_cluster_sector {
            return Ok(true);
        }
        if sector < geo.total_sectors && sector >= geo.end_of_cluster_area() {
            return Ok(false);
        }
        self.is_cluster_allocated(img, geo, geo.sector_to_cluster(sector))
    }
}

impl Default for FatChain {
    fn default() -> Self {
        Self::new()
    }
}
