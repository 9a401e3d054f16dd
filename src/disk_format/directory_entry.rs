use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};

use crate::error::SfsError;

use super::{block::BLOCK_SIZE, inode::NUM_INODES};

/// The number of bytes occupied by a directory entry.
pub const DIRECTORY_ENTRY_SIZE: usize = 24;

/// The number of bytes reserved for a name, including the nul-terminator.
pub const NAME_CAPACITY: usize = 20;

/// The maximum supported length of a file name, excluding the nul-terminator.
pub const MAX_NAME_LEN: usize = NAME_CAPACITY - 1;

/// The number of directory entries stored in each directory block. The tail of each block is
/// unused.
pub const DIRECTORY_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIRECTORY_ENTRY_SIZE;

/// Every inode except the root one can be named exactly once.
pub const MAX_DIRECTORY_ENTRIES: usize = NUM_INODES - 1;

/// The number of data blocks reserved for the directory when the volume is formatted.
pub const DIRECTORY_BLOCKS: usize = MAX_DIRECTORY_ENTRIES.div_ceil(DIRECTORY_ENTRIES_PER_BLOCK);
const_assert!(DIRECTORY_BLOCKS <= super::inode::NUM_DIRECT);

/// A free directory entry.
pub const FREE_DIRECTORY_ENTRY: DirectoryEntry = DirectoryEntry {
    name: DirectoryEntryName([0; NAME_CAPACITY]),
    inode: 0,
};

/// A directory entry, as stored on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(C)]
pub struct DirectoryEntry {
    /// The name of the entry.
    pub name: DirectoryEntryName,
    /// The inode number. Zero marks a free entry.
    pub inode: u32,
}

/// A name, as used in [`DirectoryEntry`].
///
/// Names are 1 to [`MAX_NAME_LEN`] bytes long, contain no nul bytes, and are stored nul-padded.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(C)]
pub struct DirectoryEntryName([u8; NAME_CAPACITY]);

impl DirectoryEntryName {
    /// The bytes of the name, without padding.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self
            .0
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_CAPACITY);

        &self.0[..len]
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl TryFrom<&str> for DirectoryEntryName {
    type Error = SfsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let bytes = value.as_bytes();

        if bytes.is_empty() {
            return Err(SfsError::InvalidArgument("empty file name".to_string()));
        }

        if bytes.len() > MAX_NAME_LEN {
            return Err(SfsError::InvalidArgument(format!(
                "file name is more than {MAX_NAME_LEN} bytes long: {value:?}"
            )));
        }

        if bytes.contains(&0) {
            return Err(SfsError::InvalidArgument(format!(
                "file name contains a nul byte: {value:?}"
            )));
        }

        let mut converted = [0; NAME_CAPACITY];
        converted[..bytes.len()].copy_from_slice(bytes);

        Ok(DirectoryEntryName(converted))
    }
}

impl Debug for DirectoryEntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DirectoryEntryName")
            .field(&String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

impl fmt::Display for DirectoryEntryName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_size() {
        let entry = DirectoryEntry {
            name: "hello.txt".try_into().unwrap(),
            inode: 3,
        };

        let bytes = bincode::serialize(&entry).unwrap();
        assert_eq!(bytes.len(), DIRECTORY_ENTRY_SIZE);
        assert_eq!(&bytes[..9], b"hello.txt");
        assert_eq!(&bytes[9..NAME_CAPACITY], &[0; NAME_CAPACITY - 9]);
    }

    #[test]
    fn test_directory_geometry() {
        assert_eq!(DIRECTORY_ENTRIES_PER_BLOCK, 42);
        assert_eq!(DIRECTORY_BLOCKS, 3);
    }

    #[test]
    fn test_name_length_limits() {
        let longest = "a".repeat(MAX_NAME_LEN);
        let name = DirectoryEntryName::try_from(longest.as_str()).unwrap();
        assert_eq!(name.as_bytes(), longest.as_bytes());
        assert_eq!(name.to_string(), longest);

        let too_long = "a".repeat(NAME_CAPACITY);
        assert!(matches!(
            DirectoryEntryName::try_from(too_long.as_str()),
            Err(SfsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_invalid_names() {
        assert!(DirectoryEntryName::try_from("").is_err());
        assert!(DirectoryEntryName::try_from("a\0b").is_err());
    }

    #[test]
    fn test_free_entry_is_zeroed() {
        let bytes = bincode::serialize(&FREE_DIRECTORY_ENTRY).unwrap();
        assert_eq!(bytes, vec![0; DIRECTORY_ENTRY_SIZE]);
        assert!(FREE_DIRECTORY_ENTRY.name.is_empty());
    }
}
