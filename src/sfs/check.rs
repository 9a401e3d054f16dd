use std::collections::HashSet;

use anyhow::{bail, ensure};
use log::{debug, warn};

use crate::{
    disk_format::{
        block::BLOCK_SIZE,
        directory_entry::DIRECTORY_BLOCKS,
        inode::{MAX_FILE_SIZE, ROOT_INODE},
    },
    error::{Result, SfsError},
    storage::BlockStorage,
};

use super::Sfs;

impl<S: BlockStorage> Sfs<S> {
    /// Verifies that the cached structures agree with each other.
    ///
    /// Every used inode other than the root must be named by exactly one directory entry, every
    /// block must belong to at most one inode, and the bitmap must mark exactly the blocks that
    /// some inode refers to.
    pub fn check(&self) -> Result<()> {
        self.check_consistency()
            .map_err(|err| SfsError::Corrupted(format!("{err:#}")))
    }

    fn check_consistency(&self) -> anyhow::Result<()> {
        let root = self.inodes.get(ROOT_INODE)?;
        ensure!(root.is_used(), "root inode is not in use");

        let directory_blocks = self.inodes.block_list(ROOT_INODE, &self.storage)?;
        ensure!(
            directory_blocks.len() == DIRECTORY_BLOCKS && directory_blocks == self.directory.blocks(),
            "root inode holds blocks {directory_blocks:?}, expected the directory blocks {:?}",
            self.directory.blocks()
        );
        ensure!(
            root.size() == self.directory.len(),
            "root inode has size {} with {} directory entries",
            root.size(),
            self.directory.len()
        );

        let mut names = HashSet::new();
        let mut named = HashSet::new();
        for entry in self.directory.entries() {
            ensure!(names.insert(entry.name), "{} is listed twice", entry.name);
            ensure!(
                named.insert(entry.inode),
                "inode #{} has more than one name",
                entry.inode
            );
            ensure!(
                self.inodes.get(entry.inode)?.is_used(),
                "{} refers to unused inode #{}",
                entry.name,
                entry.inode
            );
        }

        let mut referenced = HashSet::new();
        for (index, inode) in self.inodes.iter() {
            if !inode.is_used() {
                continue;
            }

            if index != ROOT_INODE {
                ensure!(named.contains(&index), "inode #{index} is not named");
                ensure!(
                    inode.size() <= MAX_FILE_SIZE,
                    "inode #{index} has size {} over the maximum",
                    inode.size()
                );
            }

            let mut blocks = self.inodes.block_list(index, &self.storage)?;
            if index != ROOT_INODE {
                ensure!(
                    blocks.len() >= inode.size().div_ceil(BLOCK_SIZE),
                    "inode #{index} has size {} but only {} blocks",
                    inode.size(),
                    blocks.len()
                );
            }
            blocks.extend(inode.indirect.get());

            for block in blocks {
                if block >= self.bitmap.len() {
                    bail!("inode #{index} refers to block {block}, which is out of range");
                }
                ensure!(
                    referenced.insert(block),
                    "block {block} is used more than once (again by inode #{index})"
                );
                if !self.bitmap.is_allocated(block) {
                    bail!("block {block} of inode #{index} is marked free");
                }
            }
        }

        let leaked = self
            .bitmap
            .allocated()
            .filter(|block| !referenced.contains(block))
            .collect::<Vec<_>>();
        if !leaked.is_empty() {
            warn!("allocated blocks {leaked:?} belong to no inode");
            bail!("{} allocated blocks belong to no inode", leaked.len());
        }

        debug!(
            "volume is consistent: {} files, {} blocks in use",
            self.directory.len(),
            referenced.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        disk_format::{block::BlockPointer, inode::NUM_DIRECT},
        storage::MemoryStorage,
    };

    use super::*;

    fn format() -> Sfs<MemoryStorage> {
        Sfs::format(MemoryStorage::new()).unwrap()
    }

    fn populated() -> Sfs<MemoryStorage> {
        let mut sfs = format();

        for (name, len) in [("a", 10), ("b", (NUM_DIRECT + 4) * BLOCK_SIZE), ("c", 0)] {
            let handle = sfs.open(name).unwrap();
            if len > 0 {
                sfs.write(handle, &vec![7; len]).unwrap();
            }
            sfs.close(handle).unwrap();
        }

        sfs
    }

    #[test]
    fn test_fresh_volume_is_consistent() {
        format().check().unwrap();
    }

    #[test]
    fn test_populated_volume_is_consistent() {
        let mut sfs = populated();
        sfs.check().unwrap();

        sfs.remove("b").unwrap();
        sfs.check().unwrap();
    }

    #[test]
    fn test_leaked_block() {
        let mut sfs = populated();
        sfs.bitmap.allocate_one(&mut sfs.storage).unwrap();

        assert!(matches!(sfs.check(), Err(SfsError::Corrupted(_))));
    }

    #[test]
    fn test_block_marked_free() {
        let mut sfs = populated();
        let block = sfs.inodes.block_list(1, &sfs.storage).unwrap()[0];
        sfs.bitmap.free(&[block], &mut sfs.storage).unwrap();

        assert!(matches!(sfs.check(), Err(SfsError::Corrupted(_))));
    }

    #[test]
    fn test_shared_block() {
        let mut sfs = populated();
        let block = sfs.inodes.block_list(1, &sfs.storage).unwrap()[0];
        sfs.inodes.get_mut(3).unwrap().direct[0] = BlockPointer::to(block);

        assert!(matches!(sfs.check(), Err(SfsError::Corrupted(_))));
    }

    #[test]
    fn test_unnamed_inode() {
        let mut sfs = populated();
        sfs.inodes.create().unwrap();

        assert!(matches!(sfs.check(), Err(SfsError::Corrupted(_))));
    }

    #[test]
    fn test_size_not_covered_by_blocks() {
        let mut sfs = populated();
        sfs.inodes.get_mut(1).unwrap().size = 2 * BLOCK_SIZE as u32;

        assert!(matches!(sfs.check(), Err(SfsError::Corrupted(_))));
    }
}
