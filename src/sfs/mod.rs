use log::{info, warn};

use crate::{
    disk_format::{
        directory_entry::{DirectoryEntryName, DIRECTORY_BLOCKS},
        inode::{NUM_INODES, ROOT_INODE},
        layout::{NUM_BLOCKS, NUM_DATA_BLOCKS, SUPERBLOCK_REGION},
        superblock::Superblock,
    },
    error::{Resource, Result, SfsError},
    storage::{transfer, BlockStorage},
};

use self::{
    allocator::FreeBlockMap, descriptor::DescriptorTable, directory::Directory,
    inode_table::InodeTable,
};

/// The free block bitmap.
pub mod allocator;
/// Volume consistency checks.
mod check;
/// The open file table.
pub mod descriptor;
/// The directory cache.
pub mod directory;
/// Reading and writing file content.
mod file_io;
/// The inode table cache.
pub mod inode_table;

/// An index into the inode table.
pub type InodeIndex = usize;

/// A block number relative to the start of the data region.
pub type BlockIndex = usize;

/// An absolute block number on the backing store.
pub type BlockNumber = usize;

/// Identifies an open file.
pub type FileHandle = usize;

/// A mounted SFS volume.
///
/// All on-disk structures except file content are cached here, and every change to them is
/// written through to `storage` before the call that made it returns.
pub struct Sfs<S: BlockStorage> {
    storage: S,
    bitmap: FreeBlockMap,
    inodes: InodeTable,
    directory: Directory,
    descriptors: DescriptorTable,
}

/// Usage figures for a mounted volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeStatistics {
    pub total_blocks: usize,
    pub free_blocks: usize,
    pub total_inodes: usize,
    pub free_inodes: usize,
    pub files: usize,
}

/// A position in an enumeration of the directory, see [`Sfs::list_next`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirectoryCursor {
    next_slot: usize,
}

impl DirectoryCursor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: BlockStorage> Sfs<S> {
    /// Formats `storage` if `fresh` is set, otherwise mounts the volume already on it.
    pub fn new(storage: S, fresh: bool) -> Result<Self> {
        if fresh {
            Self::format(storage)
        } else {
            Self::mount(storage)
        }
    }

    /// Writes an empty volume to `storage` and mounts it.
    pub fn format(mut storage: S) -> Result<Self> {
        check_capacity(&storage)?;

        transfer::store_object(&mut storage, SUPERBLOCK_REGION, &Superblock::new())?;

        let mut bitmap = FreeBlockMap::new(NUM_DATA_BLOCKS);
        bitmap.sync(&mut storage)?;

        let mut inodes = InodeTable::new();
        let root = inodes.create()?;
        debug_assert_eq!(root, ROOT_INODE);

        let directory_blocks = bitmap.allocate(DIRECTORY_BLOCKS, &mut storage)?;
        inodes.rebuild_block_list(ROOT_INODE, &directory_blocks, &mut storage, &mut bitmap)?;

        let directory = Directory::new(directory_blocks);
        directory.sync(&mut storage)?;

        info!("formatted volume: {NUM_BLOCKS} blocks, {NUM_DATA_BLOCKS} data blocks, {NUM_INODES} inodes");

        Ok(Sfs {
            storage,
            bitmap,
            inodes,
            directory,
            descriptors: DescriptorTable::new(),
        })
    }

    /// Mounts the volume on `storage`.
    pub fn mount(storage: S) -> Result<Self> {
        check_capacity(&storage)?;

        let superblock: Superblock = transfer::load_object(&storage, SUPERBLOCK_REGION)?;
        superblock
            .validate()
            .map_err(|err| SfsError::Corrupted(format!("invalid superblock: {err}")))?;

        let bitmap = FreeBlockMap::load(&storage)?;
        let inodes = InodeTable::load(&storage)?;

        if !inodes.get(ROOT_INODE)?.is_used() {
            return Err(SfsError::Corrupted("root inode is not in use".to_string()));
        }

        let directory_blocks = inodes.block_list(ROOT_INODE, &storage)?;
        let directory = Directory::load(&storage, directory_blocks)?;

        for (index, inode) in inodes.iter() {
            if !inode.is_used() && (inode.size != 0 || !inode.direct[0].is_absent()) {
                warn!("[inode #{index}] unused inode has content");
            }
        }

        info!(
            "mounted volume: {} files, {} free blocks, {} free inodes",
            directory.len(),
            bitmap.free_count(),
            inodes.free_count()
        );

        Ok(Sfs {
            storage,
            bitmap,
            inodes,
            directory,
            descriptors: DescriptorTable::new(),
        })
    }

    /// Gives back the backing store. Open handles are dropped.
    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Opens the file called `name`, creating it if it doesn't exist.
    ///
    /// An existing file is opened with the cursor at its end; if it is already open, its handle
    /// is returned with the cursor moved there. A new file is opened at offset 0. Creation either
    /// fully succeeds or changes nothing.
    pub fn open(&mut self, name: &str) -> Result<FileHandle> {
        let name = DirectoryEntryName::try_from(name)?;

        if let Some((_, entry)) = self.directory.find(&name) {
            let inum = entry.inode;
            let size = self.inodes.get_used(inum)?.size();

            return self.descriptors.open(inum, size);
        }

        if !self.directory.has_free_slot() {
            return Err(SfsError::Exhausted(Resource::DirectoryEntries));
        }

        if !self.descriptors.has_free_slot() {
            return Err(SfsError::Exhausted(Resource::Descriptors));
        }

        let inum = self.inodes.create()?;
        self.directory.insert(name, inum)?;
        // the root inode's size counts directory entries
        self.inodes.get_mut(ROOT_INODE)?.size += 1;

        self.directory.sync(&mut self.storage)?;
        self.inodes.sync(&mut self.storage)?;

        info!("[inode #{inum}] created {name}");
        self.descriptors.open(inum, 0)
    }

    pub fn close(&mut self, handle: FileHandle) -> Result<()> {
        self.descriptors.close(handle)
    }

    /// Moves the cursor of `handle`. Offsets past the end of the file are allowed.
    pub fn seek(&mut self, handle: FileHandle, offset: usize) -> Result<()> {
        self.descriptors.seek(handle, offset)
    }

    /// Removes the file called `name` and frees its blocks.
    ///
    /// Handles still open on the file are orphaned: reads, writes and seeks through them fail
    /// until they are closed.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let not_found = || SfsError::NotFound(format!("no file named {name:?}"));

        let entry_name = DirectoryEntryName::try_from(name).map_err(|_| not_found())?;
        let (slot, inum) = self
            .directory
            .find(&entry_name)
            .map(|(slot, entry)| (slot, entry.inode))
            .ok_or_else(not_found)?;

        let root = self.inodes.get_mut(ROOT_INODE)?;
        root.size = root.size.saturating_sub(1);

        self.inodes
            .delete(inum, &mut self.storage, &mut self.bitmap)?;

        self.directory.remove(slot);
        self.directory.sync(&mut self.storage)?;

        let orphaned = self.descriptors.orphan(inum);
        if orphaned > 0 {
            warn!("[inode #{inum}] removed {name} while open ({orphaned} handles orphaned)");
        } else {
            info!("[inode #{inum}] removed {name}");
        }

        Ok(())
    }

    /// The size in bytes of the file called `name`.
    pub fn file_size(&self, name: &str) -> Result<usize> {
        let inum = self
            .lookup(name)
            .ok_or_else(|| SfsError::NotFound(format!("no file named {name:?}")))?;

        Ok(self.inodes.get_used(inum)?.size())
    }

    /// Returns the next file name after `cursor`, advancing it.
    ///
    /// Once every name has been returned, yields `None` and rewinds the cursor, so the next call
    /// starts a new pass.
    pub fn list_next(&self, cursor: &mut DirectoryCursor) -> Option<String> {
        match self.directory.next_entry(cursor.next_slot) {
            Some((slot, entry)) => {
                cursor.next_slot = slot + 1;
                Some(entry.name.to_string())
            }
            None => {
                cursor.next_slot = 0;
                None
            }
        }
    }

    /// The names of all files, in directory order.
    pub fn file_names(&self) -> impl Iterator<Item = String> + '_ {
        self.directory.entries().map(|entry| entry.name.to_string())
    }

    /// The inode of the file called `name`.
    pub fn lookup(&self, name: &str) -> Option<InodeIndex> {
        let name = DirectoryEntryName::try_from(name).ok()?;
        self.directory.find(&name).map(|(_, entry)| entry.inode)
    }

    /// The name of the file described by `inode`.
    pub fn name_of(&self, inode: InodeIndex) -> Option<String> {
        self.directory
            .find_inode(inode)
            .map(|entry| entry.name.to_string())
    }

    /// The size in bytes of the file described by `inode`.
    pub fn inode_size(&self, inode: InodeIndex) -> Result<usize> {
        Ok(self.inodes.get_used(inode)?.size())
    }

    pub fn statistics(&self) -> VolumeStatistics {
        VolumeStatistics {
            total_blocks: self.bitmap.len(),
            free_blocks: self.bitmap.free_count(),
            total_inodes: NUM_INODES,
            free_inodes: self.inodes.free_count(),
            files: self.directory.len(),
        }
    }
}

fn check_capacity<S: BlockStorage>(storage: &S) -> Result<()> {
    if storage.num_blocks() < NUM_BLOCKS {
        return Err(SfsError::InvalidArgument(format!(
            "backing store has {} blocks, {NUM_BLOCKS} are needed",
            storage.num_blocks()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::{
        disk_format::{block::BLOCK_SIZE, directory_entry::MAX_DIRECTORY_ENTRIES, inode::MAX_FILE_SIZE},
        storage::{FileBackedStorage, MemoryStorage},
    };

    use super::*;

    fn format() -> Sfs<MemoryStorage> {
        Sfs::format(MemoryStorage::new()).unwrap()
    }

    fn list(sfs: &Sfs<MemoryStorage>) -> Vec<String> {
        let mut cursor = DirectoryCursor::new();
        let mut names = vec![];
        while let Some(name) = sfs.list_next(&mut cursor) {
            names.push(name);
        }
        names
    }

    #[test]
    fn test_fresh_volume() {
        let sfs = format();
        let statistics = sfs.statistics();

        assert_eq!(statistics.files, 0);
        assert_eq!(statistics.free_inodes, NUM_INODES - 1);
        assert_eq!(statistics.total_blocks, NUM_DATA_BLOCKS);
        assert_eq!(statistics.free_blocks, NUM_DATA_BLOCKS - DIRECTORY_BLOCKS);
        assert!(list(&sfs).is_empty());
    }

    #[test]
    fn test_open_creates_file() {
        let mut sfs = format();

        let handle = sfs.open("a").unwrap();

        assert_eq!(sfs.file_size("a").unwrap(), 0);
        assert_eq!(sfs.lookup("a"), Some(1));
        assert_eq!(sfs.name_of(1).as_deref(), Some("a"));
        assert_eq!(sfs.inode_size(ROOT_INODE).unwrap(), 1);
        sfs.close(handle).unwrap();
    }

    #[test]
    fn test_invalid_names() {
        let mut sfs = format();

        for name in ["", "a\0b", "twenty-characters!!!"] {
            assert!(matches!(sfs.open(name), Err(SfsError::InvalidArgument(_))));
        }
        assert!(sfs.open("nineteen-characters").is_ok());

        assert!(matches!(sfs.remove(""), Err(SfsError::NotFound(_))));
        assert!(matches!(sfs.file_size("missing"), Err(SfsError::NotFound(_))));
    }

    #[test]
    fn test_list_next_wraps_around() {
        let mut sfs = format();
        for name in ["a", "b", "c"] {
            sfs.open(name).unwrap();
        }

        let mut cursor = DirectoryCursor::new();
        assert_eq!(sfs.list_next(&mut cursor).as_deref(), Some("a"));
        assert_eq!(sfs.list_next(&mut cursor).as_deref(), Some("b"));
        assert_eq!(sfs.list_next(&mut cursor).as_deref(), Some("c"));
        assert_eq!(sfs.list_next(&mut cursor), None);
        assert_eq!(sfs.list_next(&mut cursor).as_deref(), Some("a"));

        assert_eq!(sfs.file_names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove_then_recreate() {
        let mut sfs = format();
        let handle = sfs.open("a").unwrap();
        sfs.write(handle, &[1; 3000]).unwrap();
        sfs.close(handle).unwrap();
        sfs.open("b").unwrap();

        let free_blocks = sfs.statistics().free_blocks;
        sfs.remove("a").unwrap();

        assert_eq!(list(&sfs), vec!["b"]);
        assert_eq!(sfs.statistics().free_blocks, free_blocks + 3);
        assert_eq!(sfs.inode_size(ROOT_INODE).unwrap(), 1);
        assert!(matches!(sfs.remove("a"), Err(SfsError::NotFound(_))));

        sfs.open("a").unwrap();
        assert_eq!(sfs.file_size("a").unwrap(), 0);
        sfs.check().unwrap();
    }

    #[test]
    fn test_directory_exhaustion_is_atomic() {
        let mut sfs = format();

        for i in 0..MAX_DIRECTORY_ENTRIES {
            let handle = sfs.open(&format!("f{i}")).unwrap();
            sfs.close(handle).unwrap();
        }

        let free_inodes = sfs.statistics().free_inodes;
        assert_eq!(free_inodes, 0);

        assert!(matches!(
            sfs.open("overflow"),
            Err(SfsError::Exhausted(Resource::DirectoryEntries))
        ));
        assert_eq!(sfs.statistics().free_inodes, free_inodes);
        assert_eq!(sfs.lookup("overflow"), None);

        sfs.remove("f0").unwrap();
        sfs.open("overflow").unwrap();
        sfs.check().unwrap();
    }

    #[test]
    fn test_descriptor_exhaustion_is_atomic() {
        let mut sfs = format();

        for i in 0..MAX_DIRECTORY_ENTRIES - 1 {
            sfs.open(&format!("f{i}")).unwrap();
        }
        // orphans hold on to their slot
        sfs.open("last").unwrap();
        sfs.remove("last").unwrap();

        assert!(matches!(
            sfs.open("new"),
            Err(SfsError::Exhausted(Resource::Descriptors))
        ));
        assert_eq!(sfs.lookup("new"), None);
        assert_eq!(sfs.statistics().files, MAX_DIRECTORY_ENTRIES - 1);
        sfs.check().unwrap();
    }

    #[test]
    fn test_remount_preserves_content() {
        let mut sfs = format();
        let data = (0..2000).map(|i| i as u8).collect::<Vec<_>>();

        let handle = sfs.open("x").unwrap();
        sfs.write(handle, &data).unwrap();
        sfs.open("y").unwrap();
        sfs.remove("y").unwrap();
        sfs.open("z").unwrap();

        let mut sfs = Sfs::new(sfs.into_storage(), false).unwrap();

        assert_eq!(list(&sfs), vec!["x", "z"]);
        assert_eq!(sfs.file_size("x").unwrap(), 2000);

        let handle = sfs.open("x").unwrap();
        sfs.seek(handle, 500).unwrap();
        let mut buf = vec![0; 1000];
        assert_eq!(sfs.read(handle, &mut buf).unwrap(), 1000);
        assert_eq!(buf, data[500..1500]);
        sfs.check().unwrap();
    }

    #[test]
    fn test_mount_rejects_unformatted_storage() {
        assert!(matches!(
            Sfs::mount(MemoryStorage::new()),
            Err(SfsError::Corrupted(_))
        ));
        assert!(matches!(
            Sfs::format(MemoryStorage::with_blocks(NUM_BLOCKS - 1)),
            Err(SfsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_file_backed_volume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");

        {
            let mut sfs = Sfs::new(FileBackedStorage::create(&path).unwrap(), true).unwrap();
            let handle = sfs.open("notes").unwrap();
            sfs.write(handle, b"persisted").unwrap();
        }

        let mut sfs = Sfs::new(FileBackedStorage::open(&path).unwrap(), false).unwrap();
        let handle = sfs.open("notes").unwrap();
        sfs.seek(handle, 0).unwrap();

        let mut buf = [0; 16];
        let len = sfs.read(handle, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"persisted");
        sfs.check().unwrap();
    }

    /// xorshift64, so a failing sequence can be replayed from its seed.
    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        fn below(&mut self, n: usize) -> usize {
            (self.next() % n as u64) as usize
        }
    }

    fn handle_for(
        sfs: &mut Sfs<MemoryStorage>,
        handles: &mut HashMap<String, FileHandle>,
        files: &mut HashMap<String, Vec<u8>>,
        name: &str,
    ) -> FileHandle {
        if let Some(&handle) = handles.get(name) {
            return handle;
        }

        let handle = sfs.open(name).unwrap();
        handles.insert(name.to_string(), handle);
        files.entry(name.to_string()).or_default();
        handle
    }

    fn read_all(sfs: &mut Sfs<MemoryStorage>, handle: FileHandle) -> Vec<u8> {
        let mut buf = vec![0; MAX_FILE_SIZE + 1];
        sfs.seek(handle, 0).unwrap();
        let len = sfs.read(handle, &mut buf).unwrap();
        buf.truncate(len);
        buf
    }

    #[test]
    fn test_random_operations_keep_volume_consistent() {
        let mut rng = Rng(0x5eed_0123_4567_89ab);
        let mut sfs = format();
        let mut files: HashMap<String, Vec<u8>> = HashMap::new();
        let mut handles: HashMap<String, FileHandle> = HashMap::new();
        let names = ["a", "b", "c", "d", "e", "f"];

        for step in 0..400 {
            let name = names[rng.below(names.len())];

            match rng.below(10) {
                0..=4 => {
                    let handle = handle_for(&mut sfs, &mut handles, &mut files, name);
                    let content = files.get_mut(name).unwrap();

                    let offset = rng.below(content.len() + 2 * BLOCK_SIZE);
                    let len = 1 + rng.below(16 * BLOCK_SIZE);
                    let data = (0..len).map(|_| rng.next() as u8).collect::<Vec<_>>();
                    let expected = len.min(MAX_FILE_SIZE.saturating_sub(offset));

                    sfs.seek(handle, offset).unwrap();
                    assert_eq!(sfs.write(handle, &data).unwrap(), expected, "step {step}");

                    if expected > 0 {
                        content.resize(offset, 0);
                        content.extend_from_slice(&data[..expected]);
                    }
                }
                5 | 6 => {
                    let handle = handle_for(&mut sfs, &mut handles, &mut files, name);
                    assert_eq!(read_all(&mut sfs, handle), files[name], "step {step}");
                }
                7 => {
                    if files.remove(name).is_some() {
                        sfs.remove(name).unwrap();
                        if let Some(handle) = handles.remove(name) {
                            sfs.close(handle).unwrap();
                        }
                    } else {
                        assert!(matches!(sfs.remove(name), Err(SfsError::NotFound(_))));
                    }
                }
                8 => {
                    if let Some(handle) = handles.remove(name) {
                        sfs.close(handle).unwrap();
                    }
                }
                _ => {
                    sfs = Sfs::mount(sfs.into_storage()).unwrap();
                    handles.clear();
                }
            }

            sfs.check()
                .unwrap_or_else(|err| panic!("step {step}: {err}"));
            assert_eq!(sfs.statistics().files, files.len());
            assert_eq!(sfs.inode_size(ROOT_INODE).unwrap(), files.len());
        }

        let mut sfs = Sfs::mount(sfs.into_storage()).unwrap();
        sfs.check().unwrap();
        for (name, content) in &files {
            let handle = sfs.open(name).unwrap();
            assert_eq!(read_all(&mut sfs, handle), *content, "{name}");
            sfs.close(handle).unwrap();
        }
    }
}
