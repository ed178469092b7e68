//! The inode record and its file-type tag.

use super::log_address::{LogAddress, EMPTY_ADDRESS};
use crate::error::Error;

/// Number of direct block pointers carried in every inode.
pub const DIRECT_BLOCKS: usize = 4;

/// The kind of file an inode describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    File = 0,
    Directory = 1,
    Symlink = 2,
}

impl TryFrom<u8> for FileType {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(FileType::File),
            1 => Ok(FileType::Directory),
            2 => Ok(FileType::Symlink),
            other => Err(Error::corruption(format!("unknown file type tag {other}"))),
        }
    }
}

/// A fixed-size inode record. `inum == 0` denotes the iFile and never appears stored
/// inside the iFile itself (see the bootstrap note in `file_layer`); `inum == 1` is
/// always the root directory.
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct Inode {
    pub in_use: u8,
    pub inum: u32,
    pub file_type: u8,
    pub file_size: u64,
    pub nlinks: u32,
    pub uid: u32,
    pub gid: u32,
    /// 9-bit POSIX permission triple, stored in the low bits.
    pub mode: u16,
    pub direct_blocks: [LogAddress; DIRECT_BLOCKS],
    pub indirect_block: LogAddress,
    pub atime_ns: u64,
    pub mtime_ns: u64,
    pub ctime_ns: u64,
}

impl Inode {
    /// A fresh, empty inode for `inum`, as `file_layer::create` builds it.
    pub fn new(inum: u32, file_type: FileType, mode: u16, uid: u32, gid: u32, now_ns: u64) -> Self {
        Self {
            in_use: 1,
            inum,
            file_type: file_type as u8,
            file_size: 0,
            nlinks: 1,
            uid,
            gid,
            mode,
            direct_blocks: [EMPTY_ADDRESS; DIRECT_BLOCKS],
            indirect_block: EMPTY_ADDRESS,
            atime_ns: now_ns,
            mtime_ns: now_ns,
            ctime_ns: now_ns,
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use != 0
    }

    pub fn file_type(&self) -> Result<FileType, Error> {
        FileType::try_from(self.file_type)
    }

    /// Number of `file_size`-sized blocks the file currently spans, rounded up.
    pub fn block_count(&self, block_size_bytes: u64) -> u64 {
        self.file_size.div_ceil(block_size_bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_inode_is_empty() {
        let inode = Inode::new(2, FileType::File, 0o644, 0, 0, 1000);
        assert!(inode.is_in_use());
        assert_eq!(inode.file_size, 0);
        assert_eq!(inode.nlinks, 1);
        assert!(inode.direct_blocks.iter().all(|a| a.is_empty()));
        assert!(inode.indirect_block.is_empty());
    }

    #[test]
    fn unknown_file_type_is_corruption() {
        assert!(FileType::try_from(42).is_err());
    }
}
