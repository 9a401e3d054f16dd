//! Every access to the backing store goes through here: an object is copied into (or out of) a
//! zero-filled buffer spanning a whole [`Region`], which is moved in a single transfer.

use anyhow::{ensure, Context, Result};
use serde::{de::DeserializeOwned, Serialize};

use crate::disk_format::layout::Region;

use super::BlockStorage;

/// Reads every block of `region`.
pub fn load<S: BlockStorage + ?Sized>(storage: &S, region: Region) -> Result<Vec<u8>> {
    let bytes = storage.read_blocks(region.start, region.len)?;
    ensure!(
        bytes.len() == region.byte_len(),
        "short read of blocks {}..{}",
        region.start,
        region.end()
    );

    Ok(bytes)
}

/// Writes `bytes` to the start of `region`, zero-filling the rest of it.
pub fn store<S: BlockStorage + ?Sized>(storage: &mut S, region: Region, bytes: &[u8]) -> Result<()> {
    ensure!(
        bytes.len() <= region.byte_len(),
        "{} bytes do not fit in {} blocks",
        bytes.len(),
        region.len
    );

    let mut buf = vec![0; region.byte_len()];
    buf[..bytes.len()].copy_from_slice(bytes);

    storage.write_blocks(region.start, region.len, &buf)
}

/// Decodes an object from the start of `region`.
pub fn load_object<T, S>(storage: &S, region: Region) -> Result<T>
where
    T: DeserializeOwned,
    S: BlockStorage + ?Sized,
{
    let bytes = load(storage, region)?;
    bincode::deserialize(&bytes).with_context(|| format!("decoding object at block {}", region.start))
}

/// Encodes an object into `region`.
pub fn store_object<T, S>(storage: &mut S, region: Region, object: &T) -> Result<()>
where
    T: Serialize,
    S: BlockStorage + ?Sized,
{
    let bytes = bincode::serialize(object).context("encoding object")?;
    store(storage, region, &bytes)
}
