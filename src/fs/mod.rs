pub mod block;
pub mod fat;
pub mod filesystem;
pub mod regf;

use std::io::{Read, Seek};

pub use block::{
    BlockFlags, BlockView, BlockVisitor, FsInfo, FsKind, InodeMeta, InodeType, InodeVisitor,
    WalkAction, WalkFlags,
};
pub use filesystem::Filesystem;

use crate::error::FsError;

/// Open part of a disk image as a filesystem of the declared type.
///
/// `reader` must be seekable; `offset` is the byte position of the
/// filesystem within the image. Fails with a magic or geometry diagnostic
/// when the bytes at `offset` do not match the declared type.
pub fn open_filesystem<R: Read + Seek + 'static>(
    reader: R,
    offset: u64,
    kind: FsKind,
) -> Result<Box<dyn Filesystem>, FsError> {
    match kind {
        FsKind::Fat12 | FsKind::Fat16 | FsKind::Fat32 | FsKind::FatDetect => Ok(Box::new(
            fat::FatFilesystem::open(reader, offset, kind)?,
        )),
        FsKind::Reg => Ok(Box::new(regf::RegFilesystem::open(reader, offset)?)),
    }
}
