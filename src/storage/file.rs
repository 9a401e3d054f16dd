use std::fs::File;
use std::os::unix::prelude::FileExt;
use std::path::Path;

use anyhow::{ensure, Context, Result};

use crate::disk_format::{block::BLOCK_SIZE, layout::NUM_BLOCKS};
use crate::fs::{OwnershipMetadata, TimeMetadata};
use crate::sfs::BlockNumber;

use super::block_storage::{check_buffer, check_span, BlockStorage};

/// Storage backed by a disk image on the host file system.
pub struct FileBackedStorage {
    file: File,
    num_blocks: usize,
}

impl FileBackedStorage {
    /// Wraps an already opened disk image. The image must hold at least one block.
    pub fn new(file: File) -> Result<Self> {
        let len = file.metadata().context("reading disk image metadata")?.len() as usize;
        let num_blocks = len / BLOCK_SIZE;
        ensure!(num_blocks > 0, "disk image is smaller than a block");

        Ok(FileBackedStorage { file, num_blocks })
    }

    /// Creates (or truncates) a zeroed disk image large enough for an SFS volume.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("unable to create disk image {}", path.display()))?;

        file.set_len((NUM_BLOCKS * BLOCK_SIZE) as u64)
            .context("sizing disk image")?;

        Self::new(file)
    }

    /// Opens an existing disk image in read-write mode.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("unable to open disk image {} in read-write mode", path.display()))?;

        Self::new(file)
    }
}

impl BlockStorage for FileBackedStorage {
    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn read_blocks(&self, start: BlockNumber, count: usize) -> Result<Vec<u8>> {
        check_span(self.num_blocks, start, count)?;

        let mut buf = vec![0; count * BLOCK_SIZE];
        let position = start * BLOCK_SIZE;

        self.file
            .read_exact_at(&mut buf, position as u64)
            .with_context(|| format!("reading blocks {start}..{}", start + count))?;

        Ok(buf)
    }

    fn write_blocks(&mut self, start: BlockNumber, count: usize, data: &[u8]) -> Result<()> {
        check_span(self.num_blocks, start, count)?;
        check_buffer(count, data)?;

        let position = start * BLOCK_SIZE;

        self.file
            .write_all_at(data, position as u64)
            .with_context(|| format!("writing blocks {start}..{}", start + count))?;

        Ok(())
    }

    fn time_metadata(&self) -> Result<TimeMetadata> {
        let metadata = self.file.metadata().context("reading disk image metadata")?;
        Ok((&metadata).into())
    }

    fn ownership_metadata(&self) -> Result<OwnershipMetadata> {
        let metadata = self.file.metadata().context("reading disk image metadata")?;
        Ok((&metadata).into())
    }
}
