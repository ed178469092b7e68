use crate::{Flash, FLASH_SECTOR_SIZE};
use std::io::{self, Error, ErrorKind};

/// An in-memory [`Flash`] implementation, used by `lfs-core`'s inline tests.
pub struct MemFlash {
    sectors_per_block: u32,
    block_count: u32,
    data: Vec<u8>,
    /// Whether each *sector* has been written since its erase block was last erased.
    /// Tracked per-sector (not per-block) so a reserved region such as the checkpoint
    /// area can fill successive never-before-written sectors of the same erase block
    /// across several writes, the way NAND page programming actually behaves; only a
    /// rewrite of an already-written sector is rejected.
    written: Vec<bool>,
}

impl MemFlash {
    /// Creates a fresh, fully-erased image of `block_count` erase blocks, each
    /// `sectors_per_block` sectors.
    pub fn new(sectors_per_block: u32, block_count: u32) -> Self {
        let total_sectors = sectors_per_block as usize * block_count as usize;
        Self {
            sectors_per_block,
            block_count,
            data: vec![0u8; total_sectors * FLASH_SECTOR_SIZE as usize],
            written: vec![false; total_sectors],
        }
    }

}

impl Flash for MemFlash {
    fn sectors_per_block(&self) -> u32 {
        self.sectors_per_block
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn read(&mut self, first_sector: u32, sector_count: u32, buf: &mut [u8]) -> io::Result<()> {
        let start = first_sector as usize * FLASH_SECTOR_SIZE as usize;
        let len = sector_count as usize * FLASH_SECTOR_SIZE as usize;
        if start + len > self.data.len() || buf.len() < len {
            return Err(Error::new(ErrorKind::UnexpectedEof, "read out of bounds"));
        }
        buf[..len].copy_from_slice(&self.data[start..start + len]);
        Ok(())
    }

    fn write(&mut self, first_sector: u32, sector_count: u32, buf: &[u8]) -> io::Result<()> {
        let start = first_sector as usize * FLASH_SECTOR_SIZE as usize;
        let len = sector_count as usize * FLASH_SECTOR_SIZE as usize;
        if start + len > self.data.len() || buf.len() < len {
            return Err(Error::new(ErrorKind::UnexpectedEof, "write out of bounds"));
        }

        for sector in first_sector..first_sector + sector_count {
            if self.written[sector as usize] {
                return Err(Error::new(
                    ErrorKind::Other,
                    format!("sector {sector} written without erase"),
                ));
            }
        }

        self.data[start..start + len].copy_from_slice(&buf[..len]);
        for sector in first_sector..first_sector + sector_count {
            self.written[sector as usize] = true;
        }
        Ok(())
    }

    fn erase(&mut self, first_erase_block: u32, count: u32) -> io::Result<()> {
        if first_erase_block + count > self.block_count {
            return Err(Error::new(ErrorKind::UnexpectedEof, "erase out of bounds"));
        }
        let first_sector = first_erase_block * self.sectors_per_block;
        let sector_count = count * self.sectors_per_block;
        let start = first_sector as usize * FLASH_SECTOR_SIZE as usize;
        let len = sector_count as usize * FLASH_SECTOR_SIZE as usize;
        self.data[start..start + len].fill(0);
        for sector in first_sector..first_sector + sector_count {
            self.written[sector as usize] = false;
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::exercise;

    #[test]
    fn mem_flash_contract() {
        let mut flash = MemFlash::new(2, 16);
        exercise(&mut flash);
    }

    #[test]
    fn sequential_sub_block_writes_allowed() {
        // Two distinct sectors of the same erase block, written without an
        // intervening erase, must both succeed exactly once.
        let mut flash = MemFlash::new(4, 4);
        flash.erase(0, 1).unwrap();
        let buf = vec![1u8; FLASH_SECTOR_SIZE as usize];
        flash.write(0, 1, &buf).unwrap();
        flash.write(1, 1, &buf).unwrap();
        assert!(flash.write(0, 1, &buf).is_err());
    }
}
