//! `mklfs` formats a flash image file with a fresh, empty log-structured filesystem.

use lfs_core::Volume;
use lfs_core::volume::FormatParams;
use lfs_flash::{FileFlash, FLASH_SECTOR_SIZE};
use lfs_utils::clock::SystemClock;
use lfs_utils::size::ByteSize;
use std::env;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// The name of the current program used in command line.
    prog: String,
    /// If true, print command line help.
    help: bool,
    /// Sectors per logical block (`-b`/`--block`).
    block_size_in_sectors: Option<u32>,
    /// Blocks per segment (`-l`/`--segment`).
    segment_size_in_blocks: Option<u32>,
    /// Segments on the device (`-s`/`--segments`).
    flash_size_in_segments: Option<u32>,
    /// Maximum erase-cycle count (`-w`/`--wearLimit`).
    wear_limit: Option<u32>,
    /// The path to the flash image to create.
    file: Option<PathBuf>,
}

fn error<M: std::fmt::Display>(prog: &str, msg: M) -> ! {
    eprintln!("{prog}: error: {msg}");
    exit(1);
}

/// Splits `--flag=value` into `value`, or falls back to the next positional argument
/// for `-f value`/`--flag value`.
fn take_value(prog: &str, flag: &str, arg: &str, iter: &mut env::Args) -> u32 {
    let raw = match arg.split_once('=') {
        Some((_, v)) => v.to_owned(),
        None => iter.next().unwrap_or_else(|| error(prog, format!("{flag}: missing value"))),
    };
    raw.parse().unwrap_or_else(|_| error(prog, format!("{flag}: invalid value `{raw}`")))
}

fn parse_args() -> Args {
    let mut args: Args = Default::default();
    let mut iter = env::args();
    args.prog = iter.next().unwrap_or_else(|| "mklfs".to_owned());

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => args.help = true,
            _ if arg == "-b" || arg.starts_with("--block") => {
                args.block_size_in_sectors = Some(take_value(&args.prog, "-b", &arg, &mut iter));
            }
            _ if arg == "-l" || arg.starts_with("--segment=") || arg == "--segment" => {
                args.segment_size_in_blocks = Some(take_value(&args.prog, "-l", &arg, &mut iter));
            }
            _ if arg == "-s" || arg.starts_with("--segments") => {
                args.flash_size_in_segments = Some(take_value(&args.prog, "-s", &arg, &mut iter));
            }
            _ if arg == "-w" || arg.starts_with("--wearLimit") => {
                args.wear_limit = Some(take_value(&args.prog, "-w", &arg, &mut iter));
            }
            _ => args.file = Some(PathBuf::from(arg)),
        }
    }

    args
}

fn print_help(prog: &str) {
    println!("Usage: {prog} [-b|--block=N] [-l|--segment=N] [-s|--segments=N] [-w|--wearLimit=N] file");
    println!();
    println!("Formats `file` as a fresh, empty log-structured filesystem image.");
    println!();
    println!("  -b, --block=N       sectors per logical block (default 2)");
    println!("  -l, --segment=N     blocks per segment (default 32)");
    println!("  -s, --segments=N    segments on the device (default 100)");
    println!("  -w, --wearLimit=N   maximum erase-cycle count (default 1000)");
}

fn main() {
    env_logger::init();
    let args = parse_args();

    if args.help {
        print_help(&args.prog);
        return;
    }

    let file = args.file.clone().unwrap_or_else(|| error(&args.prog, "specify path to a flash image"));

    let params = FormatParams {
        block_size_in_sectors: args.block_size_in_sectors.unwrap_or(2),
        segment_size_in_blocks: args.segment_size_in_blocks.unwrap_or(32),
        flash_size_in_segments: args.flash_size_in_segments.unwrap_or(100),
        wear_limit: args.wear_limit.unwrap_or(1000),
    };

    if params.segment_size_in_blocks == 0 || params.block_size_in_sectors == 0 {
        error(&args.prog, "segment and block sizes must be nonzero");
    }

    let total_blocks = params.segment_size_in_blocks * params.flash_size_in_segments;
    let flash_size =
        ByteSize::from_sectors_count((total_blocks * params.block_size_in_sectors) as u64, FLASH_SECTOR_SIZE as u64);

    println!(
        "{}: block={} sectors, segment={} blocks, flash={} segments, wearLimit={}, size={flash_size}",
        args.prog,
        params.block_size_in_sectors,
        params.segment_size_in_blocks,
        params.flash_size_in_segments,
        params.wear_limit,
    );

    let flash = FileFlash::create(&file, params.block_size_in_sectors, params.wear_limit, total_blocks)
        .unwrap_or_else(|e| error(&args.prog, format!("{}: {e}", file.display())));

    Volume::format(flash, SystemClock, params)
        .unwrap_or_else(|e| error(&args.prog, format!("failed to format: {e}")));

    println!("{}: formatted {}", args.prog, file.display());
}
