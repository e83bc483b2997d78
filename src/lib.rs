//! Forensic reader for two dissimilar on-disk formats: the XTAF FAT variant
//! used by game-console partitions, and Windows Registry hives.
//!
//! Both formats are exposed through one uniform interface that treats an
//! image as an addressable sequence of blocks, a set of metadata records
//! (inodes), and a name tree. All access is read-only; allocation status is
//! reported but deleted content is never reconstructed.

pub mod endian;
pub mod error;
pub mod fs;
pub mod image;

pub use error::FsError;
pub use fs::open_filesystem;
