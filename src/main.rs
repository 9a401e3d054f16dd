use anyhow::{Context, Result};
use clap::Parser;
use fuser::MountOption;
use log::info;
use std::path::PathBuf;

use sfs::fs::SfsFs;
use sfs::storage::FileBackedStorage;
use sfs::Sfs;

#[derive(Parser)]
struct Args {
    /// SFS disk file
    disk_file: PathBuf,
    /// FUSE mountpoint
    mountpoint: PathBuf,
    /// Create a fresh volume, overwriting the disk file
    #[arg(long)]
    format: bool,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let storage = if args.format {
        FileBackedStorage::create(&args.disk_file)?
    } else {
        FileBackedStorage::open(&args.disk_file)?
    };

    let sfs = Sfs::new(storage, args.format).context("unable to mount volume")?;

    info!("mounting {} at {}", args.disk_file.display(), args.mountpoint.display());
    fuser::mount2(
        SfsFs::new(sfs),
        &args.mountpoint,
        &[MountOption::FSName("sfs".to_string())],
    )
    .context("FUSE session failed")?;

    Ok(())
}
