//! The mounted volume: the one owning object a host binds its lifetime to.
//!
//! Replaces the original's process-wide global filesystem handle (see DESIGN.md,
//! "Global state"): `Volume` is constructed once at mount, passed by `&mut` to every
//! caller, and consumed by `close` at unmount. There is exactly one in flight per
//! backing device, matching the single-threaded, single-writer model of §5.

use crate::data::FlashData;
use crate::directory_layer::DirectoryLayer;
use crate::error::Result;
use crate::file_layer::{CleanerThresholds, FileLayer};
use crate::log_layer::Log;
use lfs_flash::Flash;
use lfs_utils::clock::Clock;

/// Parameters for [`Volume::format`], mirroring `mklfs`'s CLI flags.
#[derive(Clone, Copy, Debug)]
pub struct FormatParams {
    pub block_size_in_sectors: u32,
    pub segment_size_in_blocks: u32,
    pub flash_size_in_segments: u32,
    pub wear_limit: u32,
}

/// Runtime parameters for [`Volume::mount`], mirroring the filesystem binary's
/// `--cache=N --interval=N --start=N --stop=N` flags.
#[derive(Clone, Copy, Debug)]
pub struct MountOptions {
    pub cache_capacity: usize,
    pub checkpoint_interval: u32,
    pub cleaning_start_threshold: u32,
    pub cleaning_end_threshold: u32,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            cache_capacity: 16,
            checkpoint_interval: 10,
            cleaning_start_threshold: 4,
            cleaning_end_threshold: 8,
        }
    }
}

pub struct Volume<F: Flash, C: Clock> {
    directory: DirectoryLayer<F, C>,
}

impl<F: Flash, C: Clock> Volume<F, C> {
    /// Formats a fresh volume on `flash` according to `params`.
    pub fn format(flash: F, clock: C, params: FormatParams) -> Result<()> {
        let total_blocks = params.segment_size_in_blocks * params.flash_size_in_segments;
        let superblock = FlashData {
            block_size_in_sectors: params.block_size_in_sectors,
            segment_size_in_blocks: params.segment_size_in_blocks,
            flash_size_in_segments: params.flash_size_in_segments,
            wear_limit: params.wear_limit,
            total_blocks,
            // Segment 0 holds the superblock and segment `USAGE_TABLE_SEGMENT` the
            // segment usage table (§6 on-flash layout); the checkpoint region sits
            // right after, so data starts at `checkpoint_segment_index + 1`.
            checkpoint_segment_index: crate::log_layer::USAGE_TABLE_SEGMENT + 1,
        };
        Log::format(flash, clock, superblock)
    }

    /// Mounts an already-formatted volume, recovering to its last consistent state.
    pub fn mount(flash: F, clock: C, opts: MountOptions) -> Result<Self> {
        let log = Log::open(flash, clock, opts.cache_capacity, opts.checkpoint_interval)?;
        let files = FileLayer::new(
            log,
            CleanerThresholds {
                start: opts.cleaning_start_threshold,
                end: opts.cleaning_end_threshold,
            },
        );
        Ok(Self {
            directory: DirectoryLayer::new(files),
        })
    }

    pub fn directory(&self) -> &DirectoryLayer<F, C> {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut DirectoryLayer<F, C> {
        &mut self.directory
    }

    /// Clean shutdown: writes a final checkpoint and releases the flash handle.
    pub fn close(self) -> Result<()> {
        self.directory.into_files().into_log().close()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::FileType;
    use lfs_flash::FileFlash;
    use lfs_utils::clock::SystemClock;

    fn params() -> FormatParams {
        FormatParams {
            block_size_in_sectors: 2,
            segment_size_in_blocks: 32,
            flash_size_in_segments: 100,
            wear_limit: 1000,
        }
    }

    fn format_and_mount(path: &std::path::Path) -> Volume<FileFlash, SystemClock> {
        let flash = FileFlash::create(path, params().block_size_in_sectors, params().wear_limit, params().segment_size_in_blocks * params().flash_size_in_segments).unwrap();
        Volume::format(flash, SystemClock, params()).unwrap();
        let flash = FileFlash::open(path, params().block_size_in_sectors, 0).unwrap();
        Volume::mount(flash, SystemClock, MountOptions::default()).unwrap()
    }

    #[test]
    fn s5_directory_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.img");
        let mut volume = format_and_mount(&path);
        let d = volume.directory_mut();

        d.mkdir("/a", 0o755, 0, 0).unwrap();
        d.create("/a/f", 0o644, 0, 0).unwrap();

        let names = d.readdir("/a").unwrap();
        assert_eq!(names, vec![".".to_owned(), "..".to_owned(), "f".to_owned()]);

        assert!(matches!(d.rmdir("/a"), Err(crate::error::Error::NotEmpty)));
        d.unlink("/a/f").unwrap();
        d.rmdir("/a").unwrap();
        assert!(d.resolve("/a").is_err());
    }

    #[test]
    fn s6_symlink_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.img");
        let mut volume = format_and_mount(&path);
        let d = volume.directory_mut();

        d.create("/file1.txt", 0o644, 0, 0).unwrap();
        d.write("/file1.txt", 0, b"hello world").unwrap();
        d.symlink("/file1.txt", "/ln", 0, 0).unwrap();

        let target = d.readlink("/ln", 10).unwrap();
        assert_eq!(target, "/file1.txt"[..10]);

        let attr = d.getattr("/file1.txt").unwrap();
        assert_eq!(attr.nlinks, 1);
        assert_eq!(d.files_mut().get_file_type(d.resolve("/ln").unwrap()).unwrap(), FileType::Symlink);
    }

    #[test]
    fn link_count_law() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.img");
        let mut volume = format_and_mount(&path);
        let d = volume.directory_mut();

        d.create("/a", 0o644, 0, 0).unwrap();
        let before = d.getattr("/a").unwrap().nlinks;
        d.link("/a", "/b").unwrap();
        let a_after = d.getattr("/a").unwrap();
        let b_after = d.getattr("/b").unwrap();
        assert_eq!(a_after.nlinks, before + 1);
        assert_eq!(a_after.nlinks, b_after.nlinks);
    }

    #[test]
    fn round_trip_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.img");
        let mut volume = format_and_mount(&path);
        let d = volume.directory_mut();

        d.create("/f", 0o644, 0, 0).unwrap();
        d.write("/f", 0, b"some bytes").unwrap();
        let mut buf = vec![0u8; b"some bytes".len()];
        d.read("/f", 0, &mut buf).unwrap();
        assert_eq!(&buf, b"some bytes");
    }

    #[test]
    fn truncate_grow_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.img");
        let mut volume = format_and_mount(&path);
        let d = volume.directory_mut();

        d.create("/f", 0o644, 0, 0).unwrap();
        d.truncate("/f", 100).unwrap();
        let size_after_first = d.getattr("/f").unwrap().size;
        d.truncate("/f", 100).unwrap();
        let size_after_second = d.getattr("/f").unwrap().size;
        assert_eq!(size_after_first, 100);
        assert_eq!(size_after_second, 100);
    }
}
