use crate::{
    disk_format::directory_entry::MAX_DIRECTORY_ENTRIES,
    error::{Resource, Result, SfsError},
};

use super::{FileHandle, InodeIndex};

/// The maximum number of simultaneously open files.
pub const MAX_OPEN_FILES: usize = MAX_DIRECTORY_ENTRIES;

/// A slot of the descriptor table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Descriptor {
    #[default]
    Free,
    /// An open file and the position of the next read or write.
    Open { inode: InodeIndex, cursor: usize },
    /// The file was removed while open. The handle stays reserved until it is closed.
    Orphaned,
}

/// The table of open files. Lives in memory only.
pub struct DescriptorTable {
    slots: Vec<Descriptor>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        DescriptorTable {
            slots: vec![Descriptor::Free; MAX_OPEN_FILES],
        }
    }

    pub fn get(&self, handle: FileHandle) -> Result<Descriptor> {
        self.slots
            .get(handle)
            .copied()
            .ok_or_else(|| SfsError::NotFound(format!("file handle {handle}")))
    }

    /// The inode and cursor of an open handle.
    pub fn get_open(&self, handle: FileHandle) -> Result<(InodeIndex, usize)> {
        match self.get(handle)? {
            Descriptor::Open { inode, cursor } => Ok((inode, cursor)),
            Descriptor::Free => Err(SfsError::InvalidState(format!(
                "file handle {handle} is not open"
            ))),
            Descriptor::Orphaned => Err(SfsError::InvalidState(format!(
                "file handle {handle} refers to a removed file"
            ))),
        }
    }

    pub fn has_free_slot(&self) -> bool {
        self.slots.contains(&Descriptor::Free)
    }

    /// Opens `inode` with the cursor at `size`.
    ///
    /// An inode is open through at most one handle: opening it again moves the existing handle's
    /// cursor to `size` and returns that handle.
    pub fn open(&mut self, inode: InodeIndex, size: usize) -> Result<FileHandle> {
        let existing = self.slots.iter().position(
            |descriptor| matches!(descriptor, Descriptor::Open { inode: open, .. } if *open == inode),
        );

        let handle = existing
            .or_else(|| self.slots.iter().position(|d| *d == Descriptor::Free))
            .ok_or(SfsError::Exhausted(Resource::Descriptors))?;

        self.slots[handle] = Descriptor::Open {
            inode,
            cursor: size,
        };

        Ok(handle)
    }

    pub fn close(&mut self, handle: FileHandle) -> Result<()> {
        if self.get(handle)? == Descriptor::Free {
            return Err(SfsError::InvalidState(format!(
                "file handle {handle} is already closed"
            )));
        }

        self.slots[handle] = Descriptor::Free;

        Ok(())
    }

    /// Moves the cursor of an open handle. The offset isn't checked against the file size.
    pub fn seek(&mut self, handle: FileHandle, offset: usize) -> Result<()> {
        let (inode, _) = self.get_open(handle)?;

        self.slots[handle] = Descriptor::Open {
            inode,
            cursor: offset,
        };

        Ok(())
    }

    /// Marks every handle open on `inode` as orphaned, returning how many there were.
    pub fn orphan(&mut self, inode: InodeIndex) -> usize {
        let mut count = 0;

        for descriptor in &mut self.slots {
            if matches!(descriptor, Descriptor::Open { inode: open, .. } if *open == inode) {
                *descriptor = Descriptor::Orphaned;
                count += 1;
            }
        }

        count
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}
