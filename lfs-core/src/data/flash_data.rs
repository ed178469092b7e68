//! The superblock, written once at format time and immutable afterward.

/// Per-volume parameters, persisted at sector 0 of segment 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C, packed)]
pub struct FlashData {
    /// Sectors per logical block (equal to the flash's erase-block size).
    pub block_size_in_sectors: u32,
    /// Blocks per segment.
    pub segment_size_in_blocks: u32,
    /// Segments on the whole device.
    pub flash_size_in_segments: u32,
    /// Maximum erase-cycle count the underlying flash is rated for.
    pub wear_limit: u32,
    /// `segment_size_in_blocks * flash_size_in_segments`, cached for convenience.
    pub total_blocks: u32,
    /// Index of the segment holding the checkpoint region (`K` in §6).
    pub checkpoint_segment_index: u32,
}

impl FlashData {
    /// Bytes in one logical block.
    pub fn block_size_bytes(&self) -> u32 {
        self.block_size_in_sectors * lfs_flash::FLASH_SECTOR_SIZE
    }

    /// Bytes of *data* in one segment: block 0 is the summary, not data.
    pub fn segment_data_bytes(&self) -> u32 {
        (self.segment_size_in_blocks - 1) * self.block_size_bytes()
    }

    /// The first segment usable for log data (right after the checkpoint region).
    pub fn first_data_segment(&self) -> u32 {
        self.checkpoint_segment_index + 1
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> FlashData {
        FlashData {
            block_size_in_sectors: 2,
            segment_size_in_blocks: 32,
            flash_size_in_segments: 100,
            wear_limit: 1000,
            total_blocks: 3200,
            checkpoint_segment_index: 1,
        }
    }

    #[test]
    fn derived_sizes() {
        let fd = sample();
        assert_eq!(fd.block_size_bytes(), 1024);
        assert_eq!(fd.segment_data_bytes(), 31 * 1024);
        assert_eq!(fd.first_data_segment(), 2);
    }
}
