use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::sfs::InodeIndex;

use super::{
    block::BLOCK_SIZE,
    inode::ROOT_INODE,
    layout::{INODE_TABLE_BLOCKS, NUM_BLOCKS},
};

/// Identifies a volume formatted by this crate.
pub const SFS_MAGIC: u32 = 0xacbd_0005;

/// The superblock. Written once when the volume is formatted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Superblock {
    /// Always [`SFS_MAGIC`].
    pub magic: u32,
    /// The size of a block in bytes.
    pub block_size: u32,
    /// The number of blocks on the backing store.
    pub num_blocks: u32,
    /// The number of blocks occupied by the inode table.
    pub num_inode_blocks: u32,
    /// The inode of the directory.
    pub root_inode: u32,
}

impl Superblock {
    /// The superblock describing this build's volume geometry.
    pub const fn new() -> Self {
        Superblock {
            magic: SFS_MAGIC,
            block_size: BLOCK_SIZE as u32,
            num_blocks: NUM_BLOCKS as u32,
            num_inode_blocks: INODE_TABLE_BLOCKS as u32,
            root_inode: ROOT_INODE as u32,
        }
    }

    /// Checks that a superblock read from disk describes a volume we can mount.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.magic == SFS_MAGIC,
            "bad magic number: {:#x}",
            self.magic
        );
        ensure!(
            self.block_size as usize == BLOCK_SIZE,
            "unsupported block size: {}",
            self.block_size
        );
        ensure!(
            self.num_blocks as usize == NUM_BLOCKS,
            "unsupported number of blocks: {}",
            self.num_blocks
        );
        ensure!(
            self.num_inode_blocks as usize == INODE_TABLE_BLOCKS,
            "unsupported number of inode blocks: {}",
            self.num_inode_blocks
        );
        ensure!(
            self.root_inode as InodeIndex == ROOT_INODE,
            "unsupported root inode: {}",
            self.root_inode
        );

        Ok(())
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superblock_fits_in_a_block() {
        let bytes = bincode::serialize(&Superblock::new()).unwrap();
        assert_eq!(bytes.len(), 20);
    }

    #[test]
    fn test_validate_rejects_foreign_volume() {
        assert!(Superblock::new().validate().is_ok());

        let zeroed: Superblock = bincode::deserialize(&[0; 20]).unwrap();
        assert!(zeroed.validate().is_err());

        let other_geometry = Superblock {
            num_blocks: 100,
            ..Superblock::new()
        };
        assert!(other_geometry.validate().is_err());
    }
}
