use std::{fs::File, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use sfs::{storage::FileBackedStorage, Sfs};

#[derive(Parser)]
struct Args {
    /// SFS disk file
    disk_file: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let disk_file = File::options()
        .read(true)
        .open(&args.disk_file)
        .context("unable to open disk file")?;
    let storage = FileBackedStorage::new(disk_file)?;

    let sfs = Sfs::mount(storage)?;
    sfs.check()?;

    let statistics = sfs.statistics();
    println!(
        "{}: clean, {}/{} inodes, {}/{} blocks",
        args.disk_file.display(),
        statistics.total_inodes - statistics.free_inodes,
        statistics.total_inodes,
        statistics.total_blocks - statistics.free_blocks,
        statistics.total_blocks,
    );

    for name in sfs.file_names() {
        println!("{name}");
    }

    Ok(())
}
