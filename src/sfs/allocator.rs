use bitvec::prelude::*;
use log::{debug, warn};

use crate::{
    disk_format::layout::{data_block, BITMAP_REGION, NUM_DATA_BLOCKS},
    error::{Resource, Result, SfsError},
    storage::{transfer, BlockStorage},
};

use super::BlockIndex;

/// Tracks the allocation status of data blocks.
/// A value of `true` represents "occupied".
///
/// Every change is written through to the bitmap region before returning.
pub struct FreeBlockMap {
    bits: BitVec<u8, Lsb0>,
}

impl FreeBlockMap {
    /// A map of `num_blocks` free blocks.
    pub fn new(num_blocks: usize) -> Self {
        FreeBlockMap {
            bits: bitvec![u8, Lsb0; 0; num_blocks],
        }
    }

    /// Reads the bitmap of a volume.
    pub fn load<S: BlockStorage>(storage: &S) -> Result<Self> {
        let bytes = transfer::load(storage, BITMAP_REGION)?;

        let mut bits = BitVec::<u8, Lsb0>::from_vec(bytes);
        bits.truncate(NUM_DATA_BLOCKS);

        Ok(FreeBlockMap { bits })
    }

    pub fn sync<S: BlockStorage>(&self, storage: &mut S) -> Result<()> {
        transfer::store(storage, BITMAP_REGION, self.bits.as_raw_slice())?;
        Ok(())
    }

    /// The number of blocks the map covers.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn is_allocated(&self, block: BlockIndex) -> bool {
        self.bits.get(block).is_some_and(|bit| *bit)
    }

    pub fn free_count(&self) -> usize {
        self.bits.count_zeros()
    }

    pub fn allocated_count(&self) -> usize {
        self.bits.count_ones()
    }

    /// The allocated blocks, in ascending order.
    pub fn allocated(&self) -> impl Iterator<Item = BlockIndex> + '_ {
        self.bits.iter_ones()
    }

    /// Allocates the `n` lowest-numbered free blocks, in ascending order.
    ///
    /// Allocates nothing if fewer than `n` blocks are free.
    pub fn allocate<S: BlockStorage>(&mut self, n: usize, storage: &mut S) -> Result<Vec<BlockIndex>> {
        if n == 0 {
            return Ok(vec![]);
        }

        if self.free_count() < n {
            return Err(SfsError::Exhausted(Resource::Blocks));
        }

        let blocks = self.bits.iter_zeros().take(n).collect::<Vec<_>>();
        for &block in &blocks {
            self.bits.set(block, true);
        }

        self.sync(storage)?;

        debug!("allocated blocks {blocks:?}");
        Ok(blocks)
    }

    pub fn allocate_one<S: BlockStorage>(&mut self, storage: &mut S) -> Result<BlockIndex> {
        let blocks = self.allocate(1, storage)?;
        Ok(blocks[0])
    }

    /// Zero-fills each block and marks it free.
    pub fn free<S: BlockStorage>(&mut self, blocks: &[BlockIndex], storage: &mut S) -> Result<()> {
        if blocks.is_empty() {
            return Ok(());
        }

        if let Some(block) = blocks.iter().find(|&&block| block >= self.len()) {
            return Err(SfsError::Corrupted(format!(
                "cannot free block {block}: out of range"
            )));
        }

        for &block in blocks {
            if !self.bits[block] {
                warn!("freeing block {block}, which is not allocated");
            }

            transfer::store(storage, data_block(block), &[])?;
            self.bits.set(block, false);
        }

        self.sync(storage)?;

        debug!("freed blocks {blocks:?}");
        Ok(())
    }
}
