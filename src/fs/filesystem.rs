use std::cmp::Ordering;
use std::io::Write;

use crate::error::FsError;

use super::block::{BlockFlags, BlockVisitor, FsInfo, InodeMeta, InodeVisitor, WalkFlags};

/// Uniform interface over an opened filesystem image.
///
/// Every backend presents the image as a run of fixed-size blocks plus a set
/// of metadata records addressed by inode number. Walks stream records to a
/// visitor in ascending address order on the caller's thread; a handle must
/// not be shared across threads. Dropping the handle releases its caches.
pub trait Filesystem {
    /// Layout summary captured at open time.
    fn info(&self) -> &FsInfo;

    /// Invoke `visitor` on every block in `[start, end]` admitted by
    /// `flags`, passing the flag-decorated block and its raw bytes.
    fn block_walk(
        &mut self,
        start: u64,
        end: u64,
        flags: WalkFlags,
        visitor: &mut dyn BlockVisitor,
    ) -> Result<(), FsError>;

    /// Classify one block without reading its contents.
    fn block_getflags(&mut self, addr: u64) -> Result<BlockFlags, FsError>;

    /// Load the metadata record for one inode.
    fn inode_open(&mut self, inum: u64) -> Result<InodeMeta, FsError>;

    /// Invoke `visitor` on every metadata record in `[start, end]` admitted
    /// by the allocation bits of `flags`.
    fn inode_walk(
        &mut self,
        start: u64,
        end: u64,
        flags: WalkFlags,
        visitor: &mut dyn InodeVisitor,
    ) -> Result<(), FsError>;

    /// Render the filesystem layout summary to `out`.
    fn fsstat(&mut self, out: &mut dyn Write) -> Result<(), FsError>;

    /// Render per-inode detail to `out`.
    ///
    /// A non-zero `forced_block_count` overrides the size-derived block
    /// count; a non-zero `time_skew` (seconds) additionally prints
    /// skew-adjusted timestamps.
    fn istat(
        &mut self,
        out: &mut dyn Write,
        inum: u64,
        forced_block_count: u64,
        time_skew: i32,
    ) -> Result<(), FsError>;

    /// Case-insensitive name comparison.
    fn name_compare(&self, a: &str, b: &str) -> Ordering {
        a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase())
    }

    fn fscheck(&mut self, _out: &mut dyn Write) -> Result<(), FsError> {
        Err(FsError::Unsupported(format!(
            "fscheck not implemented for {}",
            self.info().kind.name()
        )))
    }

    fn journal_open(&mut self, _inum: u64) -> Result<(), FsError> {
        Err(self.no_journal())
    }

    fn journal_block_walk(
        &mut self,
        _start: u64,
        _end: u64,
        _visitor: &mut dyn BlockVisitor,
    ) -> Result<(), FsError> {
        Err(self.no_journal())
    }

    fn journal_entry_walk(&mut self, _visitor: &mut dyn InodeVisitor) -> Result<(), FsError> {
        Err(self.no_journal())
    }

    #[doc(hidden)]
    fn no_journal(&self) -> FsError {
        FsError::Unsupported(format!(
            "{} does not have a journal",
            self.info().kind.name()
        ))
    }
}
