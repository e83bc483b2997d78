//! Fixed-capacity LRU cache of FAT sector windows.
//!
//! Recency is tracked with a small integer per slot instead of a list: 0
//! means empty, 1 most recently used, and `FAT_CACHE_SLOTS` least recently
//! used. A hit promotes the slot to 1 and ages every slot that was more
//! recent; a miss evicts the first empty or aged-out slot.

use std::io::{Read, Seek};

use log::debug;

use crate::error::FsError;
use crate::image::ImageReader;

/// Number of cache slots.
pub const FAT_CACHE_SLOTS: usize = 4;

/// Bytes per cached window. Must be at least two sectors so a 12-bit entry
/// that straddles the window end can always be re-read from its own sector.
pub const FAT_CACHE_BYTES: usize = 4096;

#[derive(Debug)]
struct CacheSlot {
    base_sector: u64,
    /// 0 = empty, 1 = most recent, `FAT_CACHE_SLOTS` = least recent.
    ttl: u32,
    buf: Vec<u8>,
}

/// LRU cache of FAT sector windows.
#[derive(Debug)]
pub struct FatCache {
    slots: Vec<CacheSlot>,
    hits: u64,
    misses: u64,
}

impl FatCache {
    pub fn new() -> Self {
        Self {
            slots: (0..FAT_CACHE_SLOTS)
                .map(|_| CacheSlot {
                    base_sector: 0,
                    ttl: 0,
                    buf: vec![0u8; FAT_CACHE_BYTES],
                })
                .collect(),
            hits: 0,
            misses: 0,
        }
    }

    /// Sectors covered by one cached window.
    pub fn window_sectors(block_size: u32) -> u64 {
        FAT_CACHE_BYTES as u64 / block_size as u64
    }

    /// Return the index of a slot whose window covers `sector`, reading the
    /// window from the image on a miss.
    pub fn load<R: Read + Seek>(
        &mut self,
        img: &mut ImageReader<R>,
        sector: u64,
        block_size: u32,
    ) -> Result<usize, FsError> {
        let window = Self::window_sectors(block_size);

        // Hit: promote to most recent, aging only the slots that were more
        // recent than this one.
        for i in 0..self.slots.len() {
            let slot = &self.slots[i];
            if slot.ttl > 0 && sector >= slot.base_sector && sector < slot.base_sector + window {
                let old_ttl = slot.ttl;
                for (a, other) in self.slots.iter_mut().enumerate() {
                    if a != i && other.ttl > 0 && other.ttl < old_ttl {
                        other.ttl += 1;
                    }
                }
                self.slots[i].ttl = 1;
                self.hits += 1;
                return Ok(i);
            }
        }

        self.misses += 1;

        // Miss: evict the first empty or least-recent slot. Read into a
        // scratch buffer first so a failed read leaves the cache untouched.
        let victim = self
            .slots
            .iter()
            .position(|s| s.ttl == 0 || s.ttl >= FAT_CACHE_SLOTS as u32)
            .unwrap_or(0);

        let mut scratch = vec![0u8; FAT_CACHE_BYTES];
        img.read_at("fat cache", sector * block_size as u64, &mut scratch)?;

        debug!(
            "FAT cache miss: window at sector {sector} replaces sector {}",
            self.slots[victim].base_sector
        );

        if self.slots[victim].ttl == 0 {
            self.slots[victim].ttl = FAT_CACHE_SLOTS as u32 + 1;
        }
        let victim_ttl = self.slots[victim].ttl;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if i != victim && slot.ttl > 0 && slot.ttl < victim_ttl {
                slot.ttl += 1;
            }
        }

        let slot = &mut self.slots[victim];
        slot.buf = scratch;
        slot.base_sector = sector;
        slot.ttl = 1;
        Ok(victim)
    }

    /// Re-read the window of an already-loaded slot so it starts exactly at
    /// `sector`. Recency is untouched; the slot was just promoted.
    pub fn rebase<R: Read + Seek>(
        &mut self,
        img: &mut ImageReader<R>,
        idx: usize,
        sector: u64,
        block_size: u32,
    ) -> Result<(), FsError> {
        let mut scratch = vec![0u8; FAT_CACHE_BYTES];
        img.read_at("fat cache", sector * block_size as u64, &mut scratch)?;
        self.slots[idx].buf = scratch;
        self.slots[idx].base_sector = sector;
        Ok(())
    }

    pub fn slot_base(&self, idx: usize) -> u64 {
        self.slots[idx].base_sector
    }

    pub fn slot_buf(&self, idx: usize) -> &[u8] {
        &self.slots[idx].buf
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

impl Default for FatCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn image_with_pattern(sectors: u64) -> ImageReader<Cursor<Vec<u8>>> {
        // Every sector is filled with its own low byte.
        let mut data = vec![0u8; (sectors * 512) as usize];
        for s in 0..sectors {
            let start = (s * 512) as usize;
            data[start..start + 512].fill(s as u8);
        }
        ImageReader::new(Cursor::new(data), 0).unwrap()
    }

    #[test]
    fn test_miss_then_hit() {
        let mut img = image_with_pattern(64);
        let mut cache = FatCache::new();

        let idx = cache.load(&mut img, 8, 512).unwrap();
        assert_eq!(cache.slot_base(idx), 8);
        assert_eq!(cache.slot_buf(idx)[0], 8);
        assert_eq!((cache.hits(), cache.misses()), (0, 1));

        // Any sector inside the 8-sector window hits the same slot.
        let idx2 = cache.load(&mut img, 15, 512).unwrap();
        assert_eq!(idx2, idx);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn test_most_recent_slot_has_ttl_one() {
        let mut img = image_with_pattern(256);
        let mut cache = FatCache::new();

        for sector in [0u64, 8, 16, 24, 32, 0, 16] {
            let idx = cache.load(&mut img, sector, 512).unwrap();
            assert_eq!(cache.slots[idx].ttl, 1, "after loading sector {sector}");
        }
        assert_eq!(cache.hits() + cache.misses(), 7);
    }

    #[test]
    fn test_eviction_prefers_oldest() {
        let mut img = image_with_pattern(256);
        let mut cache = FatCache::new();

        // Fill all four slots, then touch the first window again so the
        // second-loaded window becomes the oldest.
        for sector in [0u64, 8, 16, 24] {
            cache.load(&mut img, sector, 512).unwrap();
        }
        cache.load(&mut img, 0, 512).unwrap();

        // A fifth window must evict the slot holding sector 8.
        cache.load(&mut img, 32, 512).unwrap();
        let bases: Vec<u64> = (0..FAT_CACHE_SLOTS).map(|i| cache.slot_base(i)).collect();
        assert!(bases.contains(&0));
        assert!(bases.contains(&16));
        assert!(bases.contains(&24));
        assert!(bases.contains(&32));
        assert!(!bases.contains(&8));
    }

    #[test]
    fn test_failed_read_leaves_cache_untouched() {
        let mut img = image_with_pattern(16);
        let mut cache = FatCache::new();
        cache.load(&mut img, 8, 512).unwrap();

        // Sector 100 is past the end of the image.
        assert!(cache.load(&mut img, 100, 512).is_err());
        assert_eq!(cache.slot_base(0), 8);
        assert_eq!(cache.slots[0].ttl, 1);
        assert_eq!(cache.slot_buf(0)[0], 8);
    }

    #[test]
    fn test_rebase_moves_window() {
        let mut img = image_with_pattern(64);
        let mut cache = FatCache::new();
        let idx = cache.load(&mut img, 8, 512).unwrap();
        cache.rebase(&mut img, idx, 15, 512).unwrap();
        assert_eq!(cache.slot_base(idx), 15);
        assert_eq!(cache.slot_buf(idx)[0], 15);
    }
}
