//! Positioned byte access over a disk image.
//!
//! An [`ImageReader`] wraps any seekable byte source and serves reads at
//! addresses relative to a fixed base offset, which is where the filesystem
//! begins inside the image. Backends never touch the underlying reader
//! directly.

use std::io::{Read, Seek, SeekFrom};

use crate::error::FsError;

/// A filesystem's window into a disk image.
#[derive(Debug)]
pub struct ImageReader<R> {
    inner: R,
    /// Byte offset of the filesystem within the image.
    base: u64,
    /// Total image size in bytes (the whole image, not the window).
    size: u64,
}

impl<R: Read + Seek> ImageReader<R> {
    /// Wrap a reader, fixing the filesystem base offset. The image size is
    /// taken from the reader's end position.
    pub fn new(mut inner: R, base: u64) -> Result<Self, FsError> {
        let size = inner.seek(SeekFrom::End(0))?;
        Ok(Self { inner, base, size })
    }

    /// Total image size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Base offset of the filesystem within the image.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Fill `buf` from the image at `addr` bytes past the filesystem base.
    ///
    /// Short reads are errors; `op` names the calling operation for
    /// diagnostics.
    pub fn read_at(&mut self, op: &'static str, addr: u64, buf: &mut [u8]) -> Result<(), FsError> {
        self.inner
            .seek(SeekFrom::Start(self.base + addr))
            .and_then(|_| self.inner.read_exact(buf))
            .map_err(|source| FsError::Read { op, addr, source })
    }
}
