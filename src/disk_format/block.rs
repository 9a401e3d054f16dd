use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::sfs::BlockIndex;

/// size of a block in bytes
pub const BLOCK_SIZE: usize = 1024;

pub type Block = [u8; BLOCK_SIZE];

/// The on-disk encoding of an absent block pointer.
const ABSENT: u32 = u32::MAX;

/// A reference to a data block, or nothing.
///
/// On disk this occupies a little-endian `u32`, where [`u32::MAX`] stands for "no block". Block
/// zero is a valid data block, so zero cannot serve as the marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockPointer(Option<BlockIndex>);

impl BlockPointer {
    /// A pointer to no block.
    pub const ABSENT: BlockPointer = BlockPointer(None);

    /// Constructs a pointer to `block`.
    pub const fn to(block: BlockIndex) -> Self {
        BlockPointer(Some(block))
    }

    /// The referenced block, if any.
    pub const fn get(self) -> Option<BlockIndex> {
        self.0
    }

    pub const fn is_absent(self) -> bool {
        self.0.is_none()
    }
}

impl From<Option<BlockIndex>> for BlockPointer {
    fn from(value: Option<BlockIndex>) -> Self {
        BlockPointer(value)
    }
}

impl Serialize for BlockPointer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = match self.0 {
            Some(block) => block as u32,
            None => ABSENT,
        };

        serializer.serialize_u32(raw)
    }
}

impl<'de> Deserialize<'de> for BlockPointer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u32::deserialize(deserializer)?;

        Ok(BlockPointer((raw != ABSENT).then_some(raw as BlockIndex)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_pointer_encoding() {
        let bytes = bincode::serialize(&BlockPointer::ABSENT).unwrap();
        assert_eq!(bytes, vec![0xff; 4]);
    }

    #[test]
    fn test_block_zero_is_present() {
        let bytes = bincode::serialize(&BlockPointer::to(0)).unwrap();
        assert_eq!(bytes, vec![0; 4]);

        let pointer: BlockPointer = bincode::deserialize(&bytes).unwrap();
        assert_eq!(pointer.get(), Some(0));
    }
}
