use std::fs::Metadata;
use std::os::linux::fs::MetadataExt;
use std::time::SystemTime;

/// Timestamps reported for every file. SFS keeps none of its own, so front-ends borrow them from
/// the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeMetadata {
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub crtime: SystemTime,
}

impl Default for TimeMetadata {
    fn default() -> Self {
        Self {
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            crtime: SystemTime::UNIX_EPOCH,
        }
    }
}

impl From<&Metadata> for TimeMetadata {
    /// Timestamps the host can't provide fall back to the modification time (or the epoch).
    fn from(metadata: &Metadata) -> Self {
        let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        Self {
            atime: metadata.accessed().unwrap_or(mtime),
            mtime,
            crtime: metadata.created().unwrap_or(mtime),
        }
    }
}

/// Ownership reported for every file, borrowed from the backing store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OwnershipMetadata {
    pub uid: u32,
    pub gid: u32,
}

impl From<&Metadata> for OwnershipMetadata {
    fn from(metadata: &Metadata) -> Self {
        Self {
            uid: metadata.st_uid(),
            gid: metadata.st_gid(),
        }
    }
}
