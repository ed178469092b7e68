use crate::{Flash, FLASH_SECTOR_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{self, Error, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A [`Flash`] device backed by a regular file, the shape the on-flash layout in §6
/// targets. Mirrors the `write`-must-be-erased-first restriction of real flash.
pub struct FileFlash {
    file: File,
    sectors_per_block: u32,
    block_count: u32,
    /// Whether each sector has been written since its erase block was last erased.
    written: Vec<bool>,
}

impl FileFlash {
    /// Pre-formats a fresh image at `path`.
    ///
    /// Fails if `wear_limit` exceeds 100,000 or `block_count` exceeds 1,000,000, matching
    /// the flash contract's stated limits.
    pub fn create(
        path: &Path,
        sectors_per_block: u32,
        wear_limit: u32,
        block_count: u32,
    ) -> io::Result<Self> {
        if wear_limit > 100_000 {
            return Err(Error::new(ErrorKind::InvalidInput, "wear_limit too large"));
        }
        if block_count > 1_000_000 {
            return Err(Error::new(ErrorKind::InvalidInput, "block_count too large"));
        }

        let total_sectors = sectors_per_block as u64 * block_count as u64;
        let total_bytes = total_sectors * FLASH_SECTOR_SIZE as u64;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total_bytes)?;

        log::info!(
            "created flash image at {} ({} blocks x {} sectors)",
            path.display(),
            block_count,
            sectors_per_block
        );

        Ok(Self {
            file,
            sectors_per_block,
            block_count,
            written: vec![false; total_sectors as usize],
        })
    }

    /// Opens an existing image. `flags` is `FLASH_SILENT | FLASH_ASYNC`, of which this
    /// implementation only honors `FLASH_SILENT` (it is synchronous by construction).
    pub fn open(path: &Path, sectors_per_block: u32, _flags: u32) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let block_bytes = sectors_per_block as u64 * FLASH_SECTOR_SIZE as u64;
        if len % block_bytes != 0 {
            return Err(Error::new(ErrorKind::InvalidData, "image size is not block-aligned"));
        }
        let block_count = (len / block_bytes) as u32;
        let total_sectors = sectors_per_block as usize * block_count as usize;
        Ok(Self {
            file,
            sectors_per_block,
            block_count,
            // An opened image may hold data anywhere; conservatively assume every sector
            // has been written, so the first write anywhere requires an explicit erase.
            written: vec![true; total_sectors],
        })
    }

}

impl Flash for FileFlash {
    fn sectors_per_block(&self) -> u32 {
        self.sectors_per_block
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn read(&mut self, first_sector: u32, sector_count: u32, buf: &mut [u8]) -> io::Result<()> {
        let len = sector_count as usize * FLASH_SECTOR_SIZE as usize;
        self.file
            .seek(SeekFrom::Start(first_sector as u64 * FLASH_SECTOR_SIZE as u64))?;
        self.file.read_exact(&mut buf[..len])
    }

    fn write(&mut self, first_sector: u32, sector_count: u32, buf: &[u8]) -> io::Result<()> {
        for sector in first_sector..first_sector + sector_count {
            if self.written[sector as usize] {
                return Err(Error::new(
                    ErrorKind::Other,
                    format!("sector {sector} written without erase"),
                ));
            }
        }

        let len = sector_count as usize * FLASH_SECTOR_SIZE as usize;
        self.file
            .seek(SeekFrom::Start(first_sector as u64 * FLASH_SECTOR_SIZE as u64))?;
        self.file.write_all(&buf[..len])?;

        for sector in first_sector..first_sector + sector_count {
            self.written[sector as usize] = true;
        }
        Ok(())
    }

    fn erase(&mut self, first_erase_block: u32, count: u32) -> io::Result<()> {
        if first_erase_block + count > self.block_count {
            return Err(Error::new(ErrorKind::UnexpectedEof, "erase out of bounds"));
        }
        let block_bytes = self.sectors_per_block as u64 * FLASH_SECTOR_SIZE as u64;
        let zeros = vec![0u8; block_bytes as usize];
        let first_sector = first_erase_block * self.sectors_per_block;
        for block in first_erase_block..first_erase_block + count {
            self.file.seek(SeekFrom::Start(block as u64 * block_bytes))?;
            self.file.write_all(&zeros)?;
        }
        let sector_count = count * self.sectors_per_block;
        for sector in first_sector..first_sector + sector_count {
            self.written[sector as usize] = false;
        }
        log::trace!(
            "erased blocks {}..{}",
            first_erase_block,
            first_erase_block + count
        );
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::exercise;

    #[test]
    fn file_flash_contract() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.img");
        let mut flash = FileFlash::create(&path, 2, 1000, 16).unwrap();
        exercise(&mut flash);
    }

    #[test]
    fn create_rejects_huge_wear_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.img");
        assert!(FileFlash::create(&path, 2, 200_000, 16).is_err());
    }
}
