/// Perform a const assertion.
macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    }
}

/// SFS blocks and block pointers.
pub mod block;
/// Directory entries and entry names.
pub mod directory_entry;
/// Inodes and indirect blocks.
pub mod inode;
/// The partition of the volume into regions.
pub mod layout;
/// The superblock.
pub mod superblock;
