use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::sfs::{BlockIndex, InodeIndex};

use super::block::{BlockPointer, BLOCK_SIZE};

/// The number of bytes an inode occupies on disk.
pub const INODE_SIZE: usize = 64;

/// The capacity of the inode table, including the root inode.
pub const NUM_INODES: usize = 100;

pub const NUM_DIRECT: usize = 12;

const_assert!(BLOCK_SIZE % 4 == 0);
pub const NUM_INDIRECT: usize = BLOCK_SIZE / 4;

/// The maximum number of content blocks a file can reference.
pub const MAX_FILE_BLOCKS: usize = NUM_DIRECT + NUM_INDIRECT;

pub const MAX_FILE_SIZE: usize = MAX_FILE_BLOCKS * BLOCK_SIZE;
const_assert!(MAX_FILE_SIZE < u32::MAX as usize);

/// The inode describing the directory. No directory entry may refer to it.
pub const ROOT_INODE: InodeIndex = 0;

/// An inode that isn't in use.
pub const FREE_INODE: Inode = Inode {
    mode: InodeMode::Unused,
    link_count: 0,
    size: 0,
    direct: [BlockPointer::ABSENT; NUM_DIRECT],
    indirect: BlockPointer::ABSENT,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Inode {
    /// whether the inode describes a file
    pub mode: InodeMode,
    /// number of names referring to the inode (not maintained beyond creation)
    pub link_count: u32,
    /// file size in bytes
    pub size: u32,
    /// block #s for 1st NUM_DIRECT blocks
    pub direct: [BlockPointer; NUM_DIRECT],
    /// block number of indirect block
    pub indirect: BlockPointer,
}

impl Inode {
    /// An empty, in-use inode.
    pub const fn new() -> Self {
        Inode {
            mode: InodeMode::Used,
            link_count: 1,
            ..FREE_INODE
        }
    }

    pub fn is_used(&self) -> bool {
        self.mode == InodeMode::Used
    }

    /// The file size in bytes.
    pub fn size(&self) -> usize {
        self.size as usize
    }
}

impl Default for Inode {
    fn default() -> Self {
        FREE_INODE
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u32)]
pub enum InodeMode {
    /// This inode is not in use for any file.
    Unused = 0,
    /// This inode describes a file (or, for the root inode, the directory).
    Used = 1,
}

/// The list of block pointers stored in a file's indirect block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndirectBlock(pub [BlockPointer; NUM_INDIRECT]);

impl IndirectBlock {
    /// An indirect block with no pointers.
    pub const fn empty() -> Self {
        IndirectBlock([BlockPointer::ABSENT; NUM_INDIRECT])
    }

    /// Builds an indirect block listing `blocks`, in order.
    pub fn from_blocks(blocks: &[BlockIndex]) -> Result<Self> {
        ensure!(
            blocks.len() <= NUM_INDIRECT,
            "{} blocks do not fit in an indirect block",
            blocks.len()
        );

        let mut indirect = Self::empty();
        for (pointer, &block) in indirect.0.iter_mut().zip(blocks) {
            *pointer = BlockPointer::to(block);
        }

        Ok(indirect)
    }

    /// Decodes the content of an indirect block.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= NUM_INDIRECT * 4,
            "indirect block is truncated: {} bytes",
            bytes.len()
        );

        let mut indirect = Self::empty();
        for (pointer, raw) in indirect.0.iter_mut().zip(bytes.chunks_exact(4)) {
            *pointer = bincode::deserialize(raw)?;
        }

        Ok(indirect)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self
            .0
            .iter()
            .map(bincode::serialize)
            .collect::<Result<Vec<_>, _>>()?
            .concat())
    }

    /// The referenced blocks, up to the first absent pointer.
    pub fn blocks(&self) -> impl Iterator<Item = BlockIndex> + '_ {
        self.0.iter().map_while(|pointer| pointer.get())
    }
}
