//! The recovery anchor: a small record written round-robin into a reserved segment.

use super::inode::Inode;

/// One checkpoint slot. The newest valid one (by `timestamp_ns`, ties broken by sector
/// order — i.e. whichever was read first while scanning the region in order) wins on
/// recovery.
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct Checkpoint {
    pub valid: u8,
    pub timestamp_ns: u64,
    pub segment_usage_table_location: u32,
    pub last_sealed_segment: u32,
    pub ifile_inode: Inode,
}

impl Checkpoint {
    pub fn is_valid(&self) -> bool {
        self.valid != 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::inode::FileType;

    #[test]
    fn validity_flag() {
        let cp = Checkpoint {
            valid: 1,
            timestamp_ns: 42,
            segment_usage_table_location: 1,
            last_sealed_segment: 2,
            ifile_inode: Inode::new(0, FileType::File, 0o600, 0, 0, 0),
        };
        assert!(cp.is_valid());
    }
}
