//! `lfs-fuse` serves an already-formatted flash image over FUSE until unmounted.
//!
//! The one binary in this workspace that reaches for `clap`: it is a thin translation
//! shim over `lfs_core::DirectoryLayer`/`FileLayer`, not core filesystem logic, and is
//! grounded in the FUSE-backed example manifests in the retrieval pack rather than in
//! the distilled utility's manual argument parsing.

mod filesystem;

use clap::Parser;
use filesystem::LfsFuse;
use lfs_core::{Log, MountOptions, Volume};
use lfs_flash::FileFlash;
use lfs_utils::clock::SystemClock;
use std::path::PathBuf;
use std::process::exit;

#[derive(Parser)]
#[command(name = "lfs-fuse", about = "Serve a log-structured filesystem image over FUSE")]
struct Cli {
    /// Number of sealed segments kept in the read cache.
    #[arg(long, default_value_t = 16)]
    cache: usize,

    /// Segment seals between automatic checkpoints.
    #[arg(long, default_value_t = 10)]
    interval: u32,

    /// Clean-segment count below which the cleaner starts running.
    #[arg(long, default_value_t = 4)]
    start: u32,

    /// Clean-segment count the cleaner runs until.
    #[arg(long, default_value_t = 8)]
    stop: u32,

    /// Path to a flash image previously created with `mklfs`.
    flash_file: PathBuf,

    /// Directory to mount the filesystem on.
    mountpoint: PathBuf,
}

fn fail<M: std::fmt::Display>(msg: M) -> ! {
    eprintln!("lfs-fuse: {msg}");
    exit(1);
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    // The real `block_size_in_sectors` is only known once the superblock is read, so
    // peek sector 0 with a permissive geometry first, the same bootstrap `lfsck` uses.
    let mut probe = FileFlash::open(&cli.flash_file, 1, 0)
        .unwrap_or_else(|e| fail(format!("{}: {e}", cli.flash_file.display())));
    let superblock = Log::<FileFlash, SystemClock>::read_superblock(&mut probe)
        .unwrap_or_else(|e| fail(format!("failed to read superblock: {e}")));
    drop(probe);

    let flash = FileFlash::open(&cli.flash_file, superblock.block_size_in_sectors, 0)
        .unwrap_or_else(|e| fail(format!("{}: {e}", cli.flash_file.display())));

    let volume = Volume::mount(
        flash,
        SystemClock,
        MountOptions {
            cache_capacity: cli.cache,
            checkpoint_interval: cli.interval,
            cleaning_start_threshold: cli.start,
            cleaning_end_threshold: cli.stop,
        },
    )
    .unwrap_or_else(|e| fail(format!("mount/recovery failed: {e}")));

    let fs = LfsFuse::new(volume);
    let options = [
        fuser::MountOption::FSName("lfs".to_owned()),
        fuser::MountOption::DefaultPermissions,
    ];

    if let Err(e) = fuser::mount2(fs, &cli.mountpoint, &options) {
        fail(format!("{}: {e}", cli.mountpoint.display()));
    }
}
