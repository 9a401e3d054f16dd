use log::debug;

use crate::{
    disk_format::{
        directory_entry::{
            DirectoryEntry, DirectoryEntryName, DIRECTORY_BLOCKS, DIRECTORY_ENTRIES_PER_BLOCK,
            DIRECTORY_ENTRY_SIZE, MAX_DIRECTORY_ENTRIES,
        },
        inode::{NUM_INODES, ROOT_INODE},
        layout::data_block,
    },
    error::{Resource, Result, SfsError},
    storage::{transfer, BlockStorage},
};

use super::{BlockIndex, InodeIndex};

/// A live directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: DirectoryEntryName,
    /// Never [`ROOT_INODE`].
    pub inode: InodeIndex,
}

/// The in-memory copy of the (only) directory.
///
/// The directory lives in blocks reserved when the volume is formatted. On disk, live entries are
/// packed at the front; in memory, a removed entry leaves a hole that the next insertion fills.
pub struct Directory {
    slots: Vec<Option<Entry>>,
    blocks: Vec<BlockIndex>,
}

impl Directory {
    /// An empty directory stored in `blocks`.
    pub fn new(blocks: Vec<BlockIndex>) -> Self {
        Directory {
            slots: vec![None; MAX_DIRECTORY_ENTRIES],
            blocks,
        }
    }

    /// Reads the directory stored in `blocks`.
    pub fn load<S: BlockStorage>(storage: &S, blocks: Vec<BlockIndex>) -> Result<Self> {
        check_blocks(&blocks)?;

        let mut slots = Vec::with_capacity(MAX_DIRECTORY_ENTRIES);
        for &block in &blocks {
            let bytes = transfer::load(storage, data_block(block))?;

            for chunk in bytes
                .chunks_exact(DIRECTORY_ENTRY_SIZE)
                .take(DIRECTORY_ENTRIES_PER_BLOCK)
            {
                let entry: DirectoryEntry = bincode::deserialize(chunk)?;
                slots.push(to_slot(entry)?);
            }
        }
        slots.truncate(MAX_DIRECTORY_ENTRIES);

        Ok(Directory { slots, blocks })
    }

    /// Writes the live entries, packed in slot order, over the directory blocks.
    pub fn sync<S: BlockStorage>(&self, storage: &mut S) -> Result<()> {
        check_blocks(&self.blocks)?;

        let entries = self
            .entries()
            .map(|entry| DirectoryEntry {
                name: entry.name,
                inode: entry.inode as u32,
            })
            .collect::<Vec<_>>();

        let mut chunks = entries.chunks(DIRECTORY_ENTRIES_PER_BLOCK);
        for &block in &self.blocks {
            let bytes = chunks
                .next()
                .unwrap_or_default()
                .iter()
                .map(bincode::serialize)
                .collect::<Result<Vec<_>, _>>()?
                .concat();

            transfer::store(storage, data_block(block), &bytes)?;
        }

        debug!("synced directory ({} entries)", entries.len());
        Ok(())
    }

    /// The blocks holding the directory.
    pub fn blocks(&self) -> &[BlockIndex] {
        &self.blocks
    }

    /// Finds the live entry called `name`, along with its slot.
    pub fn find(&self, name: &DirectoryEntryName) -> Option<(usize, &Entry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| Some((slot, entry.as_ref()?)))
            .find(|(_, entry)| entry.name == *name)
    }

    /// Finds the live entry referring to `inode`.
    pub fn find_inode(&self, inode: InodeIndex) -> Option<&Entry> {
        self.entries().find(|entry| entry.inode == inode)
    }

    /// The first live entry at or after `slot`, along with its slot.
    pub fn next_entry(&self, slot: usize) -> Option<(usize, &Entry)> {
        self.slots
            .iter()
            .enumerate()
            .skip(slot)
            .find_map(|(slot, entry)| Some((slot, entry.as_ref()?)))
    }

    /// The live entries, in slot order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.slots.iter().flatten()
    }

    /// The number of live entries.
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_free_slot(&self) -> bool {
        self.slots.iter().any(Option::is_none)
    }

    /// Puts a new entry in the first free slot. The caller is responsible for syncing.
    pub fn insert(&mut self, name: DirectoryEntryName, inode: InodeIndex) -> Result<usize> {
        if inode == ROOT_INODE || inode >= NUM_INODES {
            return Err(SfsError::InvalidArgument(format!(
                "inode #{inode} cannot be named"
            )));
        }

        if self.find(&name).is_some() {
            return Err(SfsError::InvalidArgument(format!("{name} already exists")));
        }

        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SfsError::Exhausted(Resource::DirectoryEntries))?;

        self.slots[slot] = Some(Entry { name, inode });

        Ok(slot)
    }

    /// Clears a slot, returning the entry it held. The caller is responsible for syncing.
    pub fn remove(&mut self, slot: usize) -> Option<Entry> {
        self.slots.get_mut(slot)?.take()
    }
}

fn check_blocks(blocks: &[BlockIndex]) -> Result<()> {
    if blocks.len() != DIRECTORY_BLOCKS {
        return Err(SfsError::Corrupted(format!(
            "directory has {} blocks instead of {DIRECTORY_BLOCKS}",
            blocks.len()
        )));
    }

    Ok(())
}

fn to_slot(entry: DirectoryEntry) -> Result<Option<Entry>> {
    let inode = entry.inode as InodeIndex;

    if inode == 0 {
        return Ok(None);
    }

    if inode >= NUM_INODES {
        return Err(SfsError::Corrupted(format!(
            "directory entry {} refers to invalid inode #{inode}",
            entry.name
        )));
    }

    Ok(Some(Entry {
        name: entry.name,
        inode,
    }))
}
