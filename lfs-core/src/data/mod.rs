//! On-disk and in-memory data structures.
//!
//! None of these contain cycles: the iFile refers to inodes by numeric inum, directories
//! refer to files by inum, blocks refer to data by [`log_address::LogAddress`]. Everything
//! here is a value-owning container; the one "back-pointer" relation (a segment summary
//! slot saying "I belong to inum I, file-block B") is explicit data consulted only by the
//! cleaner, never a structural pointer.

pub mod checkpoint;
pub mod directory_list;
pub mod flash_data;
pub mod inode;
pub mod log_address;
pub mod segment;
pub mod usage_table;

pub use checkpoint::Checkpoint;
pub use directory_list::{DirectoryEntry, DirectoryList, MAX_FILE_NAME_LENGTH};
pub use flash_data::FlashData;
pub use inode::{FileType, Inode, DIRECT_BLOCKS};
pub use log_address::{LogAddress, EMPTY_ADDRESS};
pub use segment::{InMemorySegment, SegmentSummary, INDIRECT_BLOCK, NO_BLOCK, NO_INUM};
pub use usage_table::SegmentUsageTableEntry;
