use std::io;

use thiserror::Error;

/// Reasons an allocation request can fail.
///
/// The C-style surface ([`crate::MemAlloc::malloc`] and friends) collapses every
/// variant into a null pointer; the `try_*` methods hand it back as is.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("zero-sized allocation request")]
    ZeroSize,

    #[error("allocation of {size} bytes cannot be represented")]
    SizeOverflow { size: usize },

    #[error("mmap of {size} bytes failed: {source}")]
    MapFailed {
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("munmap of {size} bytes at {addr:#x} failed: {source}")]
    UnmapFailed {
        addr: usize,
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("heap corruption: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, AllocError>;
