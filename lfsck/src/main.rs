//! `lfsck` mounts a flash image read-only (beyond the recovery mount already performs)
//! and reports on its structural health: superblock geometry, segment usage, and a walk
//! of the directory tree. It repairs nothing past what recovery already does — see
//! `fdisk`'s posture, which this mirrors.

use lfs_core::data::FileType;
use lfs_core::{Log, MountOptions, Volume};
use lfs_flash::FileFlash;
use lfs_utils::clock::SystemClock;
use std::env;
use std::path::PathBuf;
use std::process::exit;

#[derive(Default)]
struct Args {
    prog: String,
    help: bool,
    file: Option<PathBuf>,
}

fn error<M: std::fmt::Display>(prog: &str, msg: M) -> ! {
    eprintln!("{prog}: error: {msg}");
    exit(1);
}

fn parse_args() -> Args {
    let mut args: Args = Default::default();
    let mut iter = env::args();
    args.prog = iter.next().unwrap_or_else(|| "lfsck".to_owned());
    for arg in iter {
        match arg.as_str() {
            "-h" | "--help" => args.help = true,
            _ => args.file = Some(PathBuf::from(arg)),
        }
    }
    args
}

fn print_help(prog: &str) {
    println!("Usage: {prog} file");
    println!();
    println!("Reports on the structural health of a log-structured filesystem image.");
}

struct Report {
    dirs: u32,
    files: u32,
    symlinks: u32,
    errors: Vec<String>,
}

fn walk(volume: &mut Volume<FileFlash, SystemClock>, path: &str, report: &mut Report) {
    let names = match volume.directory_mut().readdir(path) {
        Ok(names) => names,
        Err(e) => {
            report.errors.push(format!("{path}: readdir failed: {e}"));
            return;
        }
    };
    report.dirs += 1;

    if !names.contains(&".".to_owned()) || !names.contains(&"..".to_owned()) {
        report.errors.push(format!("{path}: missing '.' or '..' entry"));
    }

    for name in &names {
        if name == "." || name == ".." {
            continue;
        }
        let child_path = if path == "/" {
            format!("/{name}")
        } else {
            format!("{path}/{name}")
        };

        let inum = match volume.directory_mut().resolve(&child_path) {
            Ok(inum) => inum,
            Err(e) => {
                report.errors.push(format!("{child_path}: resolve failed: {e}"));
                continue;
            }
        };
        let file_type = match volume.directory_mut().files_mut().get_file_type(inum) {
            Ok(ft) => ft,
            Err(e) => {
                report.errors.push(format!("{child_path}: get_file_type failed: {e}"));
                continue;
            }
        };

        match file_type {
            FileType::Directory => walk(volume, &child_path, report),
            FileType::File => report.files += 1,
            FileType::Symlink => report.symlinks += 1,
        }

        if let Err(e) = volume.directory_mut().getattr(&child_path) {
            report.errors.push(format!("{child_path}: getattr failed: {e}"));
        }
    }
}

fn main() {
    env_logger::init();
    let args = parse_args();

    if args.help {
        print_help(&args.prog);
        return;
    }
    let file = args.file.clone().unwrap_or_else(|| error(&args.prog, "specify path to a flash image"));

    // Bootstrap: the real `block_size_in_sectors` is only known once the superblock is
    // read, so peek sector 0 with a permissive geometry first.
    let mut probe = FileFlash::open(&file, 1, 0).unwrap_or_else(|e| error(&args.prog, format!("{}: {e}", file.display())));
    let superblock = Log::<FileFlash, SystemClock>::read_superblock(&mut probe)
        .unwrap_or_else(|e| error(&args.prog, format!("failed to read superblock: {e}")));
    drop(probe);

    println!(
        "{}: block={} sectors, segment={} blocks, flash={} segments, wearLimit={}, totalBlocks={}",
        args.prog,
        superblock.block_size_in_sectors,
        superblock.segment_size_in_blocks,
        superblock.flash_size_in_segments,
        superblock.wear_limit,
        superblock.total_blocks,
    );

    let flash = FileFlash::open(&file, superblock.block_size_in_sectors, 0)
        .unwrap_or_else(|e| error(&args.prog, format!("{}: {e}", file.display())));
    let mut volume = Volume::mount(flash, SystemClock, MountOptions::default())
        .unwrap_or_else(|e| error(&args.prog, format!("mount/recovery failed: {e}")));

    let log = volume.directory_mut().files_mut().log();
    let usage = log.read_segment_usage_table();
    let block_size_bytes = log.block_size_bytes() as u64;
    let total_live: u64 = usage.iter().map(|e| e.live_bytes as u64).sum();
    let clean_segments = usage.iter().filter(|e| e.live_bytes == 0).count();
    println!(
        "{}: tail segment = {}, {} of {} segments clean, {} live bytes ({} blocks)",
        args.prog,
        log.tail_index(),
        clean_segments,
        usage.len(),
        total_live,
        total_live / block_size_bytes.max(1),
    );

    let mut report = Report {
        dirs: 0,
        files: 0,
        symlinks: 0,
        errors: Vec::new(),
    };
    walk(&mut volume, "/", &mut report);

    println!(
        "{}: {} directories, {} files, {} symlinks, {} errors",
        args.prog,
        report.dirs,
        report.files,
        report.symlinks,
        report.errors.len(),
    );
    for err in &report.errors {
        eprintln!("{}: {err}", args.prog);
    }

    volume.close().unwrap_or_else(|e| error(&args.prog, format!("clean unmount failed: {e}")));

    if !report.errors.is_empty() {
        exit(1);
    }
}
