use log::debug;

use crate::{
    disk_format::{
        block::BlockPointer,
        inode::{
            IndirectBlock, Inode, FREE_INODE, INODE_SIZE, MAX_FILE_BLOCKS, NUM_DIRECT, NUM_INODES,
        },
        layout::{data_block, INODE_TABLE_REGION},
    },
    error::{Resource, Result, SfsError},
    storage::{transfer, BlockStorage},
};

use super::{allocator::FreeBlockMap, BlockIndex, InodeIndex};

/// The in-memory copy of the inode table.
pub struct InodeTable {
    inodes: Vec<Inode>,
}

impl InodeTable {
    /// A table of unused inodes.
    pub fn new() -> Self {
        InodeTable {
            inodes: vec![FREE_INODE; NUM_INODES],
        }
    }

    pub fn load<S: BlockStorage>(storage: &S) -> Result<Self> {
        let bytes = transfer::load(storage, INODE_TABLE_REGION)?;

        let inodes = bytes
            .chunks_exact(INODE_SIZE)
            .take(NUM_INODES)
            .map(bincode::deserialize::<Inode>)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(InodeTable { inodes })
    }

    pub fn sync<S: BlockStorage>(&self, storage: &mut S) -> Result<()> {
        let bytes = serialize_inodes(&self.inodes)?;
        transfer::store(storage, INODE_TABLE_REGION, &bytes)?;

        Ok(())
    }

    pub fn get(&self, index: InodeIndex) -> Result<&Inode> {
        self.inodes
            .get(index)
            .ok_or_else(|| SfsError::NotFound(format!("inode #{index}")))
    }

    pub fn get_mut(&mut self, index: InodeIndex) -> Result<&mut Inode> {
        self.inodes
            .get_mut(index)
            .ok_or_else(|| SfsError::NotFound(format!("inode #{index}")))
    }

    /// Like [`Self::get`], but fails for unused inodes.
    pub fn get_used(&self, index: InodeIndex) -> Result<&Inode> {
        let inode = self.get(index)?;

        if !inode.is_used() {
            return Err(SfsError::InvalidState(format!("inode #{index} is not in use")));
        }

        Ok(inode)
    }

    /// Iterates over all inodes along with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (InodeIndex, &Inode)> {
        self.inodes.iter().enumerate()
    }

    pub fn free_count(&self) -> usize {
        self.inodes.iter().filter(|inode| !inode.is_used()).count()
    }

    /// Claims the first unused inode. The caller is responsible for syncing the table.
    pub fn create(&mut self) -> Result<InodeIndex> {
        let index = self
            .inodes
            .iter()
            .position(|inode| !inode.is_used())
            .ok_or(SfsError::Exhausted(Resource::Inodes))?;

        self.inodes[index] = Inode::new();

        debug!("[inode #{index}] created");
        Ok(index)
    }

    /// Frees all of the inode's blocks (including the indirect block) and marks it unused.
    pub fn delete<S: BlockStorage>(
        &mut self,
        index: InodeIndex,
        storage: &mut S,
        bitmap: &mut FreeBlockMap,
    ) -> Result<()> {
        let indirect = self.get_used(index)?.indirect;

        let mut blocks = self.block_list(index, storage)?;
        blocks.extend(indirect.get());

        bitmap.free(&blocks, storage)?;

        self.inodes[index] = FREE_INODE;
        self.sync(storage)?;

        debug!("[inode #{index}] deleted, freed {} blocks", blocks.len());
        Ok(())
    }

    /// The content blocks of the inode, in file order.
    pub fn block_list<S: BlockStorage>(&self, index: InodeIndex, storage: &S) -> Result<Vec<BlockIndex>> {
        let inode = self.get(index)?;

        let mut blocks = inode
            .direct
            .iter()
            .map_while(|pointer| pointer.get())
            .collect::<Vec<_>>();

        if blocks.len() < NUM_DIRECT {
            return Ok(blocks);
        }

        if let Some(indirect) = inode.indirect.get() {
            blocks.extend(read_indirect_block(storage, indirect)?.blocks());
        }

        Ok(blocks)
    }

    /// Points the inode at `blocks`, its complete list of content blocks in file order.
    ///
    /// The first [`NUM_DIRECT`] blocks go in the direct list, the rest in the indirect block,
    /// which is allocated if the inode doesn't have one yet.
    pub fn rebuild_block_list<S: BlockStorage>(
        &mut self,
        index: InodeIndex,
        blocks: &[BlockIndex],
        storage: &mut S,
        bitmap: &mut FreeBlockMap,
    ) -> Result<()> {
        if blocks.len() > MAX_FILE_BLOCKS {
            return Err(SfsError::InvalidArgument(format!(
                "{} blocks exceed the maximum of {MAX_FILE_BLOCKS} per file",
                blocks.len()
            )));
        }

        let (direct, rest) = blocks.split_at(blocks.len().min(NUM_DIRECT));

        let indirect = match (rest.is_empty(), self.get(index)?.indirect.get()) {
            (true, _) => None,
            (false, Some(indirect)) => Some(indirect),
            (false, None) => Some(bitmap.allocate_one(storage)?),
        };

        let inode = self.get_mut(index)?;
        for (i, pointer) in inode.direct.iter_mut().enumerate() {
            *pointer = direct.get(i).copied().into();
        }

        if let Some(indirect) = indirect {
            inode.indirect = BlockPointer::to(indirect);
        }

        self.sync(storage)?;

        if let Some(indirect) = indirect {
            let bytes = IndirectBlock::from_blocks(rest)?.to_bytes()?;
            transfer::store(storage, data_block(indirect), &bytes)?;
        }

        Ok(())
    }

    /// Keeps the first `len` content blocks of the inode and frees the rest, along with the
    /// indirect block once the direct list can hold everything that's left.
    pub fn truncate_block_list<S: BlockStorage>(
        &mut self,
        index: InodeIndex,
        len: usize,
        storage: &mut S,
        bitmap: &mut FreeBlockMap,
    ) -> Result<()> {
        let blocks = self.block_list(index, storage)?;
        if blocks.len() <= len {
            return self.sync(storage);
        }

        let (kept, dropped) = blocks.split_at(len);
        let mut freed = dropped.to_vec();

        let indirect = self.get(index)?.indirect.get().filter(|_| len > NUM_DIRECT);

        let inode = self.get_mut(index)?;
        for (i, pointer) in inode.direct.iter_mut().enumerate() {
            *pointer = kept.get(i).copied().into();
        }

        if indirect.is_none() {
            freed.extend(inode.indirect.get());
            inode.indirect = BlockPointer::ABSENT;
        }

        self.sync(storage)?;

        if let Some(indirect) = indirect {
            let bytes = IndirectBlock::from_blocks(&kept[NUM_DIRECT..])?.to_bytes()?;
            transfer::store(storage, data_block(indirect), &bytes)?;
        }

        bitmap.free(&freed, storage)?;

        debug!("[inode #{index}] truncated to {len} blocks, freed {}", freed.len());
        Ok(())
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn read_indirect_block<S: BlockStorage>(storage: &S, block: BlockIndex) -> Result<IndirectBlock> {
    let bytes = transfer::load(storage, data_block(block))?;
    Ok(IndirectBlock::from_bytes(&bytes)?)
}

/// Serialize a slice of inodes.
fn serialize_inodes(inodes: &[Inode]) -> Result<Vec<u8>> {
    Ok(inodes
        .iter()
        .map(bincode::serialize)
        .collect::<Result<Vec<_>, _>>()?
        .concat())
}

#[cfg(test)]
mod tests {
    use crate::{
        disk_format::{block::BLOCK_SIZE, inode::NUM_INDIRECT, layout::NUM_DATA_BLOCKS},
        storage::MemoryStorage,
    };

    use super::*;

    fn setup() -> (MemoryStorage, FreeBlockMap, InodeTable) {
        (
            MemoryStorage::new(),
            FreeBlockMap::new(NUM_DATA_BLOCKS),
            InodeTable::new(),
        )
    }

    #[test]
    fn test_create_claims_first_unused_inode() {
        let mut table = InodeTable::new();

        assert_eq!(table.create().unwrap(), 0);
        assert_eq!(table.create().unwrap(), 1);
        table.inodes[0] = FREE_INODE;
        assert_eq!(table.create().unwrap(), 0);

        let inode = table.get(1).unwrap();
        assert!(inode.is_used());
        assert_eq!(inode.size(), 0);
        assert!(inode.indirect.is_absent());
    }

    #[test]
    fn test_create_exhausts_table() {
        let mut table = InodeTable::new();

        for _ in 0..NUM_INODES {
            table.create().unwrap();
        }

        assert!(matches!(
            table.create(),
            Err(SfsError::Exhausted(Resource::Inodes))
        ));
        assert_eq!(table.free_count(), 0);
    }

    #[test]
    fn test_out_of_range_inode() {
        let table = InodeTable::new();

        assert!(matches!(table.get(NUM_INODES), Err(SfsError::NotFound(_))));
        assert!(matches!(table.get_used(3), Err(SfsError::InvalidState(_))));
    }

    #[test]
    fn test_direct_blocks_only() {
        let (mut storage, mut bitmap, mut table) = setup();
        let inum = table.create().unwrap();

        table
            .rebuild_block_list(inum, &[4, 2, 9], &mut storage, &mut bitmap)
            .unwrap();

        assert_eq!(table.block_list(inum, &storage).unwrap(), vec![4, 2, 9]);
        assert!(table.get(inum).unwrap().indirect.is_absent());
        assert_eq!(bitmap.allocated_count(), 0);
    }

    #[test]
    fn test_indirect_block_is_allocated_on_overflow() {
        let (mut storage, mut bitmap, mut table) = setup();
        let inum = table.create().unwrap();

        let blocks = bitmap.allocate(NUM_DIRECT + 3, &mut storage).unwrap();
        table
            .rebuild_block_list(inum, &blocks, &mut storage, &mut bitmap)
            .unwrap();

        let indirect = table.get(inum).unwrap().indirect.get().unwrap();
        assert_eq!(indirect, NUM_DIRECT + 3);
        assert!(bitmap.is_allocated(indirect));
        assert_eq!(table.block_list(inum, &storage).unwrap(), blocks);

        // growing again reuses the same indirect block
        let mut more = blocks.clone();
        more.extend(bitmap.allocate(2, &mut storage).unwrap());
        table
            .rebuild_block_list(inum, &more, &mut storage, &mut bitmap)
            .unwrap();

        assert_eq!(table.get(inum).unwrap().indirect.get(), Some(indirect));
        assert_eq!(table.block_list(inum, &storage).unwrap(), more);
    }

    #[test]
    fn test_rebuild_rejects_oversized_list() {
        let (mut storage, mut bitmap, mut table) = setup();
        let inum = table.create().unwrap();
        let blocks = (0..=NUM_DIRECT + NUM_INDIRECT).collect::<Vec<_>>();

        assert!(matches!(
            table.rebuild_block_list(inum, &blocks, &mut storage, &mut bitmap),
            Err(SfsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_delete_frees_all_blocks() {
        let (mut storage, mut bitmap, mut table) = setup();
        let inum = table.create().unwrap();

        let blocks = bitmap.allocate(NUM_DIRECT + 1, &mut storage).unwrap();
        transfer::store(&mut storage, data_block(blocks[0]), &[0xaa; BLOCK_SIZE]).unwrap();
        table
            .rebuild_block_list(inum, &blocks, &mut storage, &mut bitmap)
            .unwrap();
        assert_eq!(bitmap.allocated_count(), NUM_DIRECT + 2);

        table.delete(inum, &mut storage, &mut bitmap).unwrap();

        assert_eq!(bitmap.allocated_count(), 0);
        assert_eq!(*table.get(inum).unwrap(), FREE_INODE);
        assert_eq!(
            transfer::load(&storage, data_block(blocks[0])).unwrap(),
            vec![0; BLOCK_SIZE]
        );
    }

    #[test]
    fn test_truncate_frees_tail_and_indirect_block() {
        let (mut storage, mut bitmap, mut table) = setup();
        let inum = table.create().unwrap();

        let blocks = bitmap.allocate(NUM_DIRECT + 4, &mut storage).unwrap();
        table
            .rebuild_block_list(inum, &blocks, &mut storage, &mut bitmap)
            .unwrap();

        table
            .truncate_block_list(inum, NUM_DIRECT + 1, &mut storage, &mut bitmap)
            .unwrap();
        assert_eq!(table.block_list(inum, &storage).unwrap(), blocks[..NUM_DIRECT + 1]);
        assert_eq!(bitmap.allocated_count(), NUM_DIRECT + 2);

        table
            .truncate_block_list(inum, 2, &mut storage, &mut bitmap)
            .unwrap();
        assert_eq!(table.block_list(inum, &storage).unwrap(), blocks[..2]);
        assert!(table.get(inum).unwrap().indirect.is_absent());
        assert_eq!(bitmap.allocated_count(), 2);

        // nothing to drop
        table
            .truncate_block_list(inum, 5, &mut storage, &mut bitmap)
            .unwrap();
        assert_eq!(bitmap.allocated_count(), 2);
    }

    #[test]
    fn test_table_survives_reload() {
        let (mut storage, mut bitmap, mut table) = setup();
        let inum = table.create().unwrap();
        table.get_mut(inum).unwrap().size = 1234;

        let blocks = bitmap.allocate(NUM_DIRECT + 5, &mut storage).unwrap();
        table
            .rebuild_block_list(inum, &blocks, &mut storage, &mut bitmap)
            .unwrap();

        let loaded = InodeTable::load(&storage).unwrap();
        assert_eq!(loaded.get(inum).unwrap(), table.get(inum).unwrap());
        assert_eq!(loaded.get(inum).unwrap().size(), 1234);
        assert_eq!(loaded.block_list(inum, &storage).unwrap(), blocks);
        assert_eq!(loaded.free_count(), NUM_INODES - 1);
    }
}
