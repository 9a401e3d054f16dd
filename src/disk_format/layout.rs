//! The volume is split into four consecutive regions:
//!
//! ```text
//! [superblock (1)] [inode table (K)] [data region (M)] [free block bitmap (J)]
//! ```
//!
//! Block indices stored in inodes, indirect blocks and the bitmap are relative to the start of the
//! data region.

use crate::sfs::{BlockIndex, BlockNumber};

use super::{
    block::BLOCK_SIZE,
    inode::{INODE_SIZE, NUM_INODES},
};

/// The number of blocks on the backing store.
pub const NUM_BLOCKS: usize = 26835;

/// A contiguous span of blocks on the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    /// The first block of the span.
    pub start: BlockNumber,
    /// The number of blocks in the span.
    pub len: usize,
}

impl Region {
    pub const fn new(start: BlockNumber, len: usize) -> Self {
        Region { start, len }
    }

    /// The first block past the span.
    pub const fn end(&self) -> BlockNumber {
        self.start + self.len
    }

    /// The number of bytes the span holds.
    pub const fn byte_len(&self) -> usize {
        self.len * BLOCK_SIZE
    }
}

pub const SUPERBLOCK_REGION: Region = Region::new(0, 1);

pub const INODE_TABLE_BLOCKS: usize = (NUM_INODES * INODE_SIZE).div_ceil(BLOCK_SIZE);
pub const INODE_TABLE_REGION: Region = Region::new(SUPERBLOCK_REGION.end(), INODE_TABLE_BLOCKS);

// the bitmap is sized for everything after the inode table, which slightly over-provisions it
// since the bitmap blocks themselves need no bits
const UNRESERVED_BLOCKS: usize = NUM_BLOCKS - INODE_TABLE_REGION.end();
pub const BITMAP_BLOCKS: usize = UNRESERVED_BLOCKS.div_ceil(BLOCK_SIZE * 8);

/// The number of blocks available for file content, indirect blocks and the directory.
pub const NUM_DATA_BLOCKS: usize = UNRESERVED_BLOCKS - BITMAP_BLOCKS;
pub const DATA_REGION: Region = Region::new(INODE_TABLE_REGION.end(), NUM_DATA_BLOCKS);

pub const BITMAP_REGION: Region = Region::new(DATA_REGION.end(), BITMAP_BLOCKS);

const_assert!(BITMAP_REGION.end() == NUM_BLOCKS);
const_assert!(BITMAP_BLOCKS * BLOCK_SIZE * 8 >= NUM_DATA_BLOCKS);
// block pointers are stored as `u32`s, with `u32::MAX` reserved
const_assert!(NUM_DATA_BLOCKS < u32::MAX as usize);

/// The single-block region holding data block `block`.
pub const fn data_block(block: BlockIndex) -> Region {
    Region::new(DATA_REGION.start + block, 1)
}
