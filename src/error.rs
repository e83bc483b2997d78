use thiserror::Error;

/// Errors from filesystem operations.
///
/// Every fallible operation on a backend returns one of these. Corrupt FAT
/// entries encountered mid-walk are coerced to free rather than surfaced
/// here; read failures always abort the current walk.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bad magic: {0}")]
    FormatMagic(String),

    #[error("walk range: {0}")]
    WalkRange(String),

    #[error("invalid block address: {0}")]
    BlockNumber(String),

    #[error("invalid inode number: {0}")]
    InodeNumber(String),

    #[error("read failed in {op} at offset {addr:#x}: {source}")]
    Read {
        op: &'static str,
        addr: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt metadata: {0}")]
    InodeCorrupt(String),

    #[error("unicode conversion: {0}")]
    Unicode(String),

    #[error("walk callback signaled an error")]
    WalkCallback,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
