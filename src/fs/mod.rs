/// An implementation of a FUSE filesystem around SFS.
mod fuse;
/// Filesystem metadata structures.
mod metadata;

pub use fuse::SfsFs;
pub use metadata::{OwnershipMetadata, TimeMetadata};
