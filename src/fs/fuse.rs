use std::collections::HashMap;
use std::ffi::OsStr;
use std::ops::ControlFlow;
use std::time::Duration;

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
};
use libc::{EBADF, EFBIG, EINVAL, EIO, EMFILE, ENOENT, ENOSPC, ENOTSUP};
use log::warn;

use crate::{
    disk_format::{
        block::BLOCK_SIZE,
        directory_entry::{DIRECTORY_ENTRY_SIZE, MAX_NAME_LEN},
        inode::ROOT_INODE,
    },
    error::{Resource, Result, SfsError},
    sfs::{FileHandle, InodeIndex, Sfs},
    storage::BlockStorage,
};

/// FUSE reserves inode number 0, so SFS inode `n` is reported as `n + 1`.
const ROOT_INO: u64 = ROOT_INODE as u64 + 1;

/// Exposes an SFS volume through FUSE, as a single directory of regular files.
pub struct SfsFs<S: BlockStorage> {
    sfs: Sfs<S>,
    /// Opening an already open file shares its handle, so handles are closed once the last
    /// FUSE file handle referring to them is released.
    open_counts: HashMap<FileHandle, usize>,
}

impl<S: BlockStorage> SfsFs<S> {
    const TTL: Duration = Duration::new(1, 0);
    const GENERATION: u64 = 1;

    pub fn new(sfs: Sfs<S>) -> SfsFs<S> {
        SfsFs {
            sfs,
            open_counts: HashMap::new(),
        }
    }

    /// Sets permissions to 644 for files and 755 for the directory. Timestamps and ownership come
    /// from the backing store.
    fn get_attributes(&self, ino: u64) -> Result<FileAttr> {
        let inum = to_inode(ino)?;
        let size = self.sfs.inode_size(inum)?;

        if inum != ROOT_INODE && self.sfs.name_of(inum).is_none() {
            return Err(SfsError::NotFound(format!("inode #{inum} has no name")));
        }

        let storage = self.sfs.storage();
        let time_metadata = storage.time_metadata().unwrap_or_default();
        let ownership_metadata = storage.ownership_metadata().unwrap_or_default();

        // the root inode's size is its number of entries
        let (kind, perm, nlink, size) = if inum == ROOT_INODE {
            (FileType::Directory, 0o755, 2, size * DIRECTORY_ENTRY_SIZE)
        } else {
            (FileType::RegularFile, 0o644, 1, size)
        };

        Ok(FileAttr {
            ino,
            size: size as u64,
            blocks: size.div_ceil(BLOCK_SIZE) as u64,
            atime: time_metadata.atime,
            mtime: time_metadata.mtime,
            ctime: time_metadata.mtime,
            crtime: time_metadata.crtime,
            kind,
            perm,
            nlink,
            uid: ownership_metadata.uid,
            gid: ownership_metadata.gid,
            rdev: 0,
            flags: 0,
            blksize: BLOCK_SIZE as u32,
        })
    }

    fn lookup_entry(&self, parent: u64, name: &OsStr) -> Result<FileAttr> {
        check_parent(parent)?;

        let inum = name
            .to_str()
            .and_then(|name| self.sfs.lookup(name))
            .ok_or_else(|| SfsError::NotFound(format!("no file named {name:?}")))?;

        self.get_attributes(to_ino(inum))
    }

    fn open_file(&mut self, ino: u64) -> Result<FileHandle> {
        let inum = to_inode(ino)?;
        if inum == ROOT_INODE {
            return Err(SfsError::InvalidArgument("cannot open the directory as a file".to_string()));
        }

        let name = self
            .sfs
            .name_of(inum)
            .ok_or_else(|| SfsError::NotFound(format!("inode #{inum} has no name")))?;

        let handle = self.sfs.open(&name)?;
        *self.open_counts.entry(handle).or_default() += 1;

        Ok(handle)
    }

    fn create_file(&mut self, parent: u64, name: &OsStr) -> Result<(FileAttr, FileHandle)> {
        check_parent(parent)?;

        let name = to_name(name)?;
        let handle = self.sfs.open(name)?;
        *self.open_counts.entry(handle).or_default() += 1;

        let inum = self
            .sfs
            .lookup(name)
            .ok_or_else(|| SfsError::NotFound(format!("no file named {name:?}")))?;

        Ok((self.get_attributes(to_ino(inum))?, handle))
    }

    fn release_file(&mut self, handle: FileHandle) -> Result<()> {
        let count = self
            .open_counts
            .get_mut(&handle)
            .ok_or_else(|| SfsError::NotFound(format!("file handle {handle}")))?;

        *count -= 1;
        if *count == 0 {
            self.open_counts.remove(&handle);
            self.sfs.close(handle)?;
        }

        Ok(())
    }

    fn read_file(&mut self, handle: FileHandle, offset: usize, size: usize) -> Result<Vec<u8>> {
        self.sfs.seek(handle, offset)?;

        let mut buf = vec![0; size];
        let read_len = self.sfs.read(handle, &mut buf)?;
        buf.truncate(read_len);

        Ok(buf)
    }

    fn write_file(&mut self, handle: FileHandle, offset: usize, data: &[u8]) -> Result<u32> {
        self.sfs.seek(handle, offset)?;

        let write_len = self.sfs.write(handle, data)?;
        Ok(write_len as u32)
    }

    fn remove_file(&mut self, parent: u64, name: &OsStr) -> Result<()> {
        check_parent(parent)?;

        self.sfs.remove(to_name(name)?)
    }

    fn read_directory(&self, ino: u64) -> Result<Vec<(u64, FileType, String)>> {
        check_parent(ino)?;

        let mut entries = vec![
            (ROOT_INO, FileType::Directory, ".".to_string()),
            (ROOT_INO, FileType::Directory, "..".to_string()),
        ];

        for name in self.sfs.file_names() {
            let Some(inum) = self.sfs.lookup(&name) else {
                warn!("directory entry {name} vanished while listing");
                continue;
            };

            entries.push((to_ino(inum), FileType::RegularFile, name));
        }

        Ok(entries)
    }
}

impl<S: BlockStorage> Filesystem for SfsFs<S> {
    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let statistics = self.sfs.statistics();

        reply.statfs(
            statistics.total_blocks as u64,
            statistics.free_blocks as u64,
            statistics.free_blocks as u64,
            statistics.total_inodes as u64,
            statistics.free_inodes as u64,
            BLOCK_SIZE as u32,
            MAX_NAME_LEN as u32,
            BLOCK_SIZE as u32,
        );
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.lookup_entry(parent, name) {
            Ok(attr) => reply.entry(&Self::TTL, &attr, Self::GENERATION),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        match self.get_attributes(ino) {
            Ok(attr) => reply.attr(&Self::TTL, &attr),
            Err(err) => reply.error(errno(&err)),
        }
    }

    /// Only reports the current attributes; changing the size is not supported.
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        match self.get_attributes(ino) {
            Ok(attr) if size.is_some_and(|size| size != attr.size) => reply.error(ENOTSUP),
            Ok(attr) => reply.attr(&Self::TTL, &attr),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.open_file(ino) {
            Ok(handle) => reply.opened(handle as u64, flags as u32),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.release_file(fh as FileHandle) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        match self.read_file(fh as FileHandle, offset as usize, size as usize) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let entries = match self.read_directory(ino) {
            Ok(entries) => entries,
            Err(err) => {
                reply.error(errno(&err));
                return;
            }
        };

        entries
            .into_iter()
            .enumerate()
            .skip(offset.max(0) as usize)
            .try_for_each(|(i, (entry_ino, file_type, name))| {
                let is_buffer_full = reply.add(entry_ino, (i + 1) as i64, file_type, name);

                if is_buffer_full {
                    return ControlFlow::Break(());
                }

                ControlFlow::Continue(())
            });

        reply.ok();
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        match self.write_file(fh as FileHandle, offset as usize, data) {
            Ok(0) if !data.is_empty() => reply.error(EFBIG),
            Ok(write_len) => reply.written(write_len),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        match self.create_file(parent, name) {
            Ok((attr, handle)) => reply.created(
                &Self::TTL,
                &attr,
                Self::GENERATION,
                handle as u64,
                flags as u32,
            ),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.remove_file(parent, name) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno(&err)),
        }
    }
}

fn to_inode(ino: u64) -> Result<InodeIndex> {
    ino.checked_sub(1)
        .map(|inum| inum as InodeIndex)
        .ok_or_else(|| SfsError::NotFound(format!("inode number {ino}")))
}

fn to_ino(inum: InodeIndex) -> u64 {
    inum as u64 + 1
}

fn to_name(name: &OsStr) -> Result<&str> {
    name.to_str()
        .ok_or_else(|| SfsError::InvalidArgument(format!("{name:?} is not valid UTF-8")))
}

fn check_parent(ino: u64) -> Result<()> {
    if ino != ROOT_INO {
        return Err(SfsError::NotFound(format!("inode number {ino} is not a directory")));
    }

    Ok(())
}

/// The errno reported to the kernel for `err`.
fn errno(err: &SfsError) -> i32 {
    match err {
        SfsError::NotFound(_) => ENOENT,
        SfsError::InvalidArgument(_) => EINVAL,
        SfsError::Exhausted(Resource::Descriptors) => EMFILE,
        SfsError::Exhausted(_) => ENOSPC,
        SfsError::InvalidState(_) => EBADF,
        SfsError::Corrupted(_) | SfsError::Storage(_) | SfsError::Encoding(_) => {
            warn!("{err}");
            EIO
        }
    }
}
