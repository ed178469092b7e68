//! The error taxonomy a caller must be able to distinguish.

use std::fmt;

/// Kinds of failure the log, file and directory layers can surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Path resolution failed.
    #[error("not found")]
    NotFound,
    /// `rmdir` on a directory holding more than `.` and `..`.
    #[error("directory not empty")]
    NotEmpty,
    /// The underlying flash device failed a read, write or erase.
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
    /// A structural invariant is violated (stale summary entry, malformed address,
    /// read of a never-written block, unknown file-type tag).
    #[error("corruption: {0}")]
    Corruption(String),
    /// No clean segment was available when one was needed.
    #[error("flash full")]
    FlashFull,
    /// A permission check against uid/gid/mode failed.
    #[error("permission denied")]
    PermissionDenied,
    /// A programmer-visible invariant violation (freeing the iFile, reading outside
    /// its range, a cleaner encountering an out-of-range block number).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn corruption(msg: impl fmt::Display) -> Self {
        Self::Corruption(msg.to_string())
    }

    pub fn fatal(msg: impl fmt::Display) -> Self {
        Self::Fatal(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
