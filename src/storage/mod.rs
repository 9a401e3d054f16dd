/// The block storage abstraction.
mod block_storage;
/// File-backed storage.
mod file;
/// Memory-backed storage.
mod memory;
/// Moving typed objects between memory and spans of blocks.
pub mod transfer;

pub use block_storage::*;
pub use file::*;
pub use memory::*;
