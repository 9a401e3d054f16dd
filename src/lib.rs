pub mod disk_format;
pub mod error;
pub mod fs;
pub mod sfs;
pub mod storage;

pub use error::{Resource, Result, SfsError};
pub use sfs::{DirectoryCursor, FileHandle, Sfs, VolumeStatistics};
