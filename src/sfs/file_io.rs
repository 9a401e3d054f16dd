use log::info;

use crate::{
    disk_format::{
        block::{Block, BLOCK_SIZE},
        inode::{MAX_FILE_SIZE, NUM_DIRECT},
        layout::data_block,
    },
    error::{Resource, Result, SfsError},
    storage::{transfer, BlockStorage},
};

use super::{BlockIndex, FileHandle, Sfs};

impl<S: BlockStorage> Sfs<S> {
    /// Writes `data` at the cursor of `handle` and advances the cursor past it.
    ///
    /// The file ends where the write ends: overwriting the start of a longer file cuts off the
    /// rest, and the blocks past the new end are freed. The write is cut short where it would grow
    /// the file beyond [`MAX_FILE_SIZE`]; the number of bytes actually written is returned.
    /// Writing past the end of the file fills the gap with zeros. If the volume doesn't have
    /// enough free blocks for the whole write, nothing is written.
    pub fn write(&mut self, handle: FileHandle, data: &[u8]) -> Result<usize> {
        let (inum, cursor) = self.descriptors.get_open(handle)?;

        if data.is_empty() {
            return Err(SfsError::InvalidArgument("cannot write zero bytes".to_string()));
        }

        let inode = *self.inodes.get_used(inum)?;

        info!(
            "[inode #{inum}] writing file (offset = {cursor}; data.len() = {})",
            data.len()
        );

        let write_len = data.len().min(MAX_FILE_SIZE.saturating_sub(cursor));
        if write_len == 0 {
            info!("[inode #{inum}] file is at its maximum size");
            return Ok(0);
        }

        let end = cursor + write_len;

        let mut blocks = self.inodes.block_list(inum, &self.storage)?;
        let num_old_blocks = blocks.len();
        let num_new_blocks = end.div_ceil(BLOCK_SIZE).saturating_sub(num_old_blocks);

        let needs_indirect = num_old_blocks + num_new_blocks > NUM_DIRECT && inode.indirect.is_absent();
        if num_new_blocks + usize::from(needs_indirect) > self.bitmap.free_count() {
            return Err(SfsError::Exhausted(Resource::Blocks));
        }

        blocks.extend(self.bitmap.allocate(num_new_blocks, &mut self.storage)?);

        // blocks between the old end of the file and the start of the write
        for n in num_old_blocks..(cursor / BLOCK_SIZE).min(blocks.len()) {
            self.write_data_block(blocks[n], &[0; BLOCK_SIZE])?;
        }

        let mut position = cursor;
        while position < end {
            let start_offset = position % BLOCK_SIZE;
            let block_start = position - start_offset;
            let end_position = (block_start + BLOCK_SIZE).min(end);

            let n = position / BLOCK_SIZE;
            let source = &data[(position - cursor)..(end_position - cursor)];

            if source.len() == BLOCK_SIZE {
                self.write_data_block(blocks[n], source)?;
            } else {
                // partial block: keep the bytes before the written range
                let mut block = if n < num_old_blocks {
                    self.read_data_block(blocks[n])?
                } else {
                    [0; BLOCK_SIZE]
                };

                block[start_offset..start_offset + source.len()].copy_from_slice(source);
                if end_position == end {
                    // past the new end of the file
                    block[start_offset + source.len()..].fill(0);
                }
                self.write_data_block(blocks[n], &block)?;
            }

            position = end_position;
        }

        self.inodes.get_mut(inum)?.size = end as u32;

        // both of these also sync the inode table
        if num_new_blocks > 0 {
            self.inodes
                .rebuild_block_list(inum, &blocks, &mut self.storage, &mut self.bitmap)?;
        } else {
            self.inodes.truncate_block_list(
                inum,
                end.div_ceil(BLOCK_SIZE),
                &mut self.storage,
                &mut self.bitmap,
            )?;
        }

        if end < inode.size() {
            info!("[inode #{inum}] file shrank from {} to {end} bytes", inode.size());
        }

        self.descriptors.seek(handle, end)?;

        if write_len < data.len() {
            info!("[inode #{inum}] write clamped at the maximum file size");
        }

        info!("[inode #{inum}] wrote {write_len} bytes");
        Ok(write_len)
    }

    /// Reads into `buf` from the cursor of `handle` and advances the cursor.
    ///
    /// Reads stop at the end of the file; the number of bytes read is returned, which is zero at
    /// (or past) the end of the file.
    pub fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize> {
        let (inum, cursor) = self.descriptors.get_open(handle)?;
        let size = self.inodes.get_used(inum)?.size();

        info!(
            "[inode #{inum}] reading file (offset = {cursor}; size = {})",
            buf.len()
        );

        let end = cursor.saturating_add(buf.len()).min(size);
        let start = cursor.min(end);

        let blocks = self.inodes.block_list(inum, &self.storage)?;

        let mut position = start;
        while position < end {
            let start_offset = position % BLOCK_SIZE;
            let block_start = position - start_offset;
            let end_position = (block_start + BLOCK_SIZE).min(end);

            let n = position / BLOCK_SIZE;
            let block_number = *blocks.get(n).ok_or_else(|| {
                SfsError::Corrupted(format!(
                    "inode #{inum} of size {size} has only {} blocks",
                    blocks.len()
                ))
            })?;
            let block = self.read_data_block(block_number)?;

            buf[(position - start)..(end_position - start)]
                .copy_from_slice(&block[start_offset..(end_position - block_start)]);

            position = end_position;
        }

        self.descriptors.seek(handle, end)?;

        Ok(end - start)
    }

    fn read_data_block(&self, block: BlockIndex) -> Result<Block> {
        let bytes = transfer::load(&self.storage, data_block(block))?;

        bytes.try_into().map_err(|bytes: Vec<u8>| {
            SfsError::Corrupted(format!("data block {block} read back {} bytes", bytes.len()))
        })
    }

    fn write_data_block(&mut self, block: BlockIndex, bytes: &[u8]) -> Result<()> {
        transfer::store(&mut self.storage, data_block(block), bytes)?;
        Ok(())
    }
}
