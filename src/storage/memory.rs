use anyhow::Result;

use crate::{disk_format::block::BLOCK_SIZE, disk_format::layout::NUM_BLOCKS, sfs::BlockNumber};

use super::block_storage::{check_buffer, check_span, BlockStorage};

/// Storage that keeps every block in memory. Starts out zeroed.
pub struct MemoryStorage {
    bytes: Vec<u8>,
}

impl MemoryStorage {
    /// Constructs a zeroed storage large enough for an SFS volume.
    pub fn new() -> Self {
        Self::with_blocks(NUM_BLOCKS)
    }

    /// Constructs a zeroed storage of `num_blocks` blocks.
    pub fn with_blocks(num_blocks: usize) -> Self {
        MemoryStorage {
            bytes: vec![0; num_blocks * BLOCK_SIZE],
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStorage for MemoryStorage {
    fn num_blocks(&self) -> usize {
        self.bytes.len() / BLOCK_SIZE
    }

    fn read_blocks(&self, start: BlockNumber, count: usize) -> Result<Vec<u8>> {
        check_span(self.num_blocks(), start, count)?;

        let position = start * BLOCK_SIZE;
        Ok(self.bytes[position..position + count * BLOCK_SIZE].to_vec())
    }

    fn write_blocks(&mut self, start: BlockNumber, count: usize, data: &[u8]) -> Result<()> {
        check_span(self.num_blocks(), start, count)?;
        check_buffer(count, data)?;

        let position = start * BLOCK_SIZE;
        self.bytes[position..position + data.len()].copy_from_slice(data);

        Ok(())
    }
}
