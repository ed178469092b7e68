//! The simulated flash device: the boundary the log layer is built on top of.
//!
//! This is deliberately a thin contract (§6 of the design document): sector-granular
//! read/write, erase-block granular erase, and a handful of constants. Two
//! implementations are provided: [`FileFlash`], which backs the image with a regular
//! file the way a real flash translation layer would, and [`MemFlash`], an in-memory
//! stand-in used by the inline tests in `lfs-core` so they can drive full mount/format/
//! recover cycles without touching the filesystem.

mod file_flash;
mod mem_flash;

pub use file_flash::FileFlash;
pub use mem_flash::MemFlash;

use std::io;

/// Size, in bytes, of one sector. Fixed by the simulator.
pub const FLASH_SECTOR_SIZE: u32 = 512;

/// Open the device without printing diagnostics to stderr.
pub const FLASH_SILENT: u32 = 1 << 0;
/// Open the device for non-blocking I/O.
pub const FLASH_ASYNC: u32 = 1 << 1;

/// A handle to a flash-backed device.
///
/// An LFS "block" (see `lfs_core::data::FlashData::block_size_in_sectors`) is defined to
/// be exactly one erase block: `erase_segment` always erases whole segments, which is
/// the only granularity the log layer ever needs, so `FLASH_SECTORS_PER_BLOCK` and
/// `block_size_in_sectors` are the same number by construction.
pub trait Flash {
    /// Number of sectors per erase block (`FLASH_SECTORS_PER_BLOCK`).
    fn sectors_per_block(&self) -> u32;

    /// Total number of erase blocks on the device.
    fn block_count(&self) -> u32;

    /// Reads `sector_count` sectors starting at `first_sector` into `buf`.
    fn read(&mut self, first_sector: u32, sector_count: u32, buf: &mut [u8]) -> io::Result<()>;

    /// Writes `sector_count` sectors starting at `first_sector` from `buf`.
    ///
    /// It is an error to write into an erase block that has been written since its last
    /// erase; real NAND flash cannot be rewritten in place.
    fn write(&mut self, first_sector: u32, sector_count: u32, buf: &[u8]) -> io::Result<()>;

    /// Erases `count` consecutive erase blocks starting at `first_erase_block`.
    fn erase(&mut self, first_erase_block: u32, count: u32) -> io::Result<()>;

    /// Flushes and releases the handle.
    fn close(&mut self) -> io::Result<()>;
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) fn exercise<F: Flash>(flash: &mut F) {
        let spb = flash.sectors_per_block();
        flash.erase(0, 1).unwrap();
        let data = vec![0xAB; (spb * FLASH_SECTOR_SIZE) as usize];
        flash.write(0, spb, &data).unwrap();

        let mut out = vec![0u8; (spb * FLASH_SECTOR_SIZE) as usize];
        flash.read(0, spb, &mut out).unwrap();
        assert_eq!(out, data);

        // Rewriting without erasing first must fail.
        assert!(flash.write(0, spb, &data).is_err());

        flash.erase(0, 1).unwrap();
        flash.write(0, spb, &data).unwrap();
    }
}
