use anyhow::{ensure, Result};

use crate::disk_format::block::BLOCK_SIZE;
use crate::fs::{OwnershipMetadata, TimeMetadata};
use crate::sfs::BlockNumber;

/// A fixed-size array of blocks that SFS volumes live on.
pub trait BlockStorage {
    /// The number of blocks the storage holds.
    fn num_blocks(&self) -> usize;

    /// Reads `count` consecutive blocks starting at `start`.
    fn read_blocks(&self, start: BlockNumber, count: usize) -> Result<Vec<u8>>;

    /// Writes `count` consecutive blocks starting at `start`. `data` must be exactly `count`
    /// blocks long.
    fn write_blocks(&mut self, start: BlockNumber, count: usize, data: &[u8]) -> Result<()>;

    fn time_metadata(&self) -> Result<TimeMetadata> {
        Ok(TimeMetadata::default())
    }

    fn ownership_metadata(&self) -> Result<OwnershipMetadata> {
        Ok(OwnershipMetadata::default())
    }
}

/// Checks that a transfer of `count` blocks at `start` stays within `num_blocks` blocks.
pub(crate) fn check_span(num_blocks: usize, start: BlockNumber, count: usize) -> Result<()> {
    ensure!(
        start
            .checked_add(count)
            .is_some_and(|end| end <= num_blocks),
        "blocks {start}..{} out of bounds (storage has {num_blocks} blocks)",
        start.saturating_add(count)
    );

    Ok(())
}

/// Checks that a write buffer holds exactly `count` blocks.
pub(crate) fn check_buffer(count: usize, data: &[u8]) -> Result<()> {
    ensure!(
        data.len() == count * BLOCK_SIZE,
        "buffer of {} bytes does not hold exactly {count} blocks",
        data.len()
    );

    Ok(())
}
