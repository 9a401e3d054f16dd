use std::fmt;

use thiserror::Error;

/// A fixed-capacity table that can run out of room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    Inodes,
    Blocks,
    DirectoryEntries,
    Descriptors,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Inodes => "inodes",
            Resource::Blocks => "data blocks",
            Resource::DirectoryEntries => "directory entries",
            Resource::Descriptors => "file descriptors",
        };

        f.write_str(name)
    }
}

/// Errors returned by file system operations.
#[derive(Debug, Error)]
pub enum SfsError {
    /// A name, handle or inode doesn't exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no more free {0}")]
    Exhausted(Resource),

    /// The operation doesn't apply to the current state of its target, e.g. reading through a
    /// closed handle.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The on-disk structures are inconsistent or were not written by this crate.
    #[error("corrupted volume: {0}")]
    Corrupted(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

pub type Result<T, E = SfsError> = std::result::Result<T, E>;
