//! The iFile, block indexing over direct/indirect pointers, and the segment cleaner.
//!
//! Every inode but the iFile's own (`inum == 0`) lives *inside* the iFile, itself a
//! regular file whose blocks hold `Inode` records; see the bootstrap note below for how
//! the recursion through `inum == 0` is broken.

use crate::data::{
    FileType, Inode, LogAddress, DIRECT_BLOCKS, EMPTY_ADDRESS, INDIRECT_BLOCK, NO_INUM,
};
use crate::error::{Error, Result};
use crate::log_layer::Log;
use lfs_flash::Flash;
use lfs_utils::clock::Clock;
use std::mem::size_of;

/// POSIX `struct stat`-equivalent attributes a caller can retrieve for an inum.
#[derive(Clone, Copy, Debug)]
pub struct Attr {
    pub inum: u32,
    pub file_type: FileType,
    pub mode: u16,
    pub nlinks: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime_ns: u64,
    pub mtime_ns: u64,
    pub ctime_ns: u64,
}

impl Attr {
    fn from_inode(inode: &Inode) -> Result<Self> {
        Ok(Self {
            inum: inode.inum,
            file_type: inode.file_type()?,
            mode: inode.mode,
            nlinks: inode.nlinks,
            size: inode.file_size,
            uid: inode.uid,
            gid: inode.gid,
            atime_ns: inode.atime_ns,
            mtime_ns: inode.mtime_ns,
            ctime_ns: inode.ctime_ns,
        })
    }
}

/// How many segments must read `live_bytes == 0` before the cleaner considers itself
/// to have made enough progress to stop.
#[derive(Clone, Copy, Debug)]
pub struct CleanerThresholds {
    pub start: u32,
    pub end: u32,
}

pub struct FileLayer<F: Flash, C: Clock> {
    log: Log<F, C>,
    thresholds: CleanerThresholds,
}

impl<F: Flash, C: Clock> FileLayer<F, C> {
    pub fn new(log: Log<F, C>, thresholds: CleanerThresholds) -> Self {
        Self { log, thresholds }
    }

    pub fn log(&self) -> &Log<F, C> {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut Log<F, C> {
        &mut self.log
    }

    pub fn into_log(self) -> Log<F, C> {
        self.log
    }

    fn block_size_bytes(&self) -> u32 {
        self.log.block_size_bytes()
    }

    /// Number of `LogAddress`es that fit in one indirect block.
    fn addrs_per_block(&self) -> u32 {
        self.block_size_bytes() / size_of::<LogAddress>() as u32
    }

    fn max_file_blocks(&self) -> u32 {
        DIRECT_BLOCKS as u32 + self.addrs_per_block()
    }

    fn ifile_size_in_inodes(&self) -> u32 {
        (self.log.ifile_inode().file_size / size_of::<Inode>() as u64) as u32
    }

    // -- inode access (bootstrap recursion) ---------------------------------------

    /// Reads inode `inum`. `inum == 0` (the iFile) is special-cased: its record is held
    /// out-of-band (in memory, persisted via the checkpoint), never stored inside the
    /// iFile itself.
    fn get_inode(&mut self, inum: u32) -> Result<Inode> {
        if inum == 0 {
            return Ok(*self.log.ifile_inode());
        }
        if inum > self.ifile_size_in_inodes() {
            return Err(Error::corruption(format!("inum {inum} out of range")));
        }

        let offset = (inum as u64 - 1) * size_of::<Inode>() as u64;
        let mut buf = vec![0u8; size_of::<Inode>()];
        self.read(0, offset, &mut buf)?;
        Ok(unsafe { lfs_utils::bytes::from_bytes(&buf) })
    }

    /// Persists `inode` by writing it back through the file layer, unless it's the
    /// iFile's own inode, in which case the in-memory copy (and eventually the
    /// checkpoint) is updated directly.
    fn update_ifile(&mut self, inode: &Inode) -> Result<()> {
        if inode.inum == 0 {
            *self.log.ifile_inode_mut() = *inode;
            return Ok(());
        }
        let offset = (inode.inum as u64 - 1) * size_of::<Inode>() as u64;
        let bytes = unsafe { lfs_utils::bytes::as_bytes(inode) }.to_vec();
        self.write(0, offset, &bytes)
    }

    // -- block indexing ------------------------------------------------------------

    fn read_indirect_block(&mut self, addr: LogAddress) -> Result<Vec<LogAddress>> {
        let n = self.addrs_per_block() as usize;
        let mut buf = vec![0u8; self.block_size_bytes() as usize];
        self.log.read(addr, &mut buf)?;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let off = i * size_of::<LogAddress>();
            out.push(unsafe { lfs_utils::bytes::from_bytes(&buf[off..]) });
        }
        Ok(out)
    }

    fn get_block_address(&mut self, inode: &Inode, file_block: u32) -> Result<LogAddress> {
        if (file_block as usize) < DIRECT_BLOCKS {
            return Ok(inode.direct_blocks[file_block as usize]);
        }
        if file_block >= self.max_file_blocks() {
            return Err(Error::fatal("block number beyond maximum file blocks"));
        }
        if inode.indirect_block.is_empty() {
            return Ok(EMPTY_ADDRESS);
        }
        let indirect = self.read_indirect_block(inode.indirect_block)?;
        Ok(indirect[file_block as usize - DIRECT_BLOCKS])
    }

    /// Updates `inode`'s pointer for `file_block` to `addr`, rewriting the whole
    /// indirect block (with a fresh log address) when `file_block` falls in it.
    fn update_inode_block(&mut self, inode: &mut Inode, file_block: u32, addr: LogAddress) -> Result<()> {
        if (file_block as usize) < DIRECT_BLOCKS {
            inode.direct_blocks[file_block as usize] = addr;
            return Ok(());
        }

        let mut indirect = if inode.indirect_block.is_empty() {
            vec![EMPTY_ADDRESS; self.addrs_per_block() as usize]
        } else {
            self.read_indirect_block(inode.indirect_block)?
        };
        indirect[file_block as usize - DIRECT_BLOCKS] = addr;
        self.write_indirect_block(inode, &indirect)
    }

    fn write_indirect_block(&mut self, inode: &mut Inode, indirect: &[LogAddress]) -> Result<()> {
        if !inode.indirect_block.is_empty() {
            self.log.free(inode.indirect_block)?;
        }
        let mut buf = vec![0u8; self.block_size_bytes() as usize];
        for (i, a) in indirect.iter().enumerate() {
            let off = i * size_of::<LogAddress>();
            unsafe { lfs_utils::bytes::write_into(a, &mut buf[off..]) };
        }
        let new_addr = self.log.write(inode.inum, INDIRECT_BLOCK as u32, &buf)?;
        inode.indirect_block = new_addr;
        Ok(())
    }

    // -- public file operations ------------------------------------------------------

    pub fn create(&mut self, file_type: FileType, mode: u16, uid: u32, gid: u32) -> Result<u32> {
        let inum = self.unused_inum()?;
        log::debug!("file layer: creating inum {inum} ({file_type:?})");

        let now_ns = self.now_ns();
        let inode = Inode::new(inum, file_type, mode, uid, gid, now_ns);

        if inum == self.ifile_size_in_inodes() + 1 {
            // Growing the iFile: bump its size in inodes by writing past its old end.
            let grown_size = (inum as u64) * size_of::<Inode>() as u64;
            let mut ifile = *self.log.ifile_inode();
            ifile.file_size = grown_size;
            *self.log.ifile_inode_mut() = ifile;
        }

        self.update_ifile(&inode)?;
        Ok(inum)
    }

    fn unused_inum(&mut self) -> Result<u32> {
        let size = self.ifile_size_in_inodes();
        for inum in 1..=size {
            if !self.get_inode(inum)?.is_in_use() {
                return Ok(inum);
            }
        }
        Ok(size + 1)
    }

    fn now_ns(&self) -> u64 {
        // Every caller of `now_ns` also touches the log right after, so routing the
        // clock through a log accessor avoids a second `Clock` handle in this layer.
        self.log.clock_now_ns()
    }

    pub fn read(&mut self, inum: u32, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let inode = self.get_inode(inum)?;
        if !inode.is_in_use() && inum != 0 {
            return Err(Error::corruption(format!("inum {inum} is not in use")));
        }

        let length = if offset >= inode.file_size {
            0
        } else {
            (buf.len() as u64).min(inode.file_size - offset) as usize
        };
        if length == 0 {
            return Ok(0);
        }

        let block_size = self.block_size_bytes() as u64;
        let start_block = (offset / block_size) as u32;
        let end_block = ((offset + length as u64 - 1) / block_size) as u32;

        let mut block_buf = vec![0u8; block_size as usize];
        let mut written = 0usize;
        for block in start_block..=end_block {
            if block >= self.max_file_blocks() {
                break;
            }
            let addr = self.get_block_address(&inode, block)?;
            validate_address_pair(addr)?;
            if addr.is_empty() {
                return Err(Error::corruption(format!(
                    "inum {inum}: read of never-written block {block}"
                )));
            }
            self.log.read(addr, &mut block_buf)?;

            let block_start = block as u64 * block_size;
            let copy_from = offset.max(block_start) - block_start;
            let copy_to_end = (offset + length as u64).min(block_start + block_size) - block_start;
            let copy_len = (copy_to_end - copy_from) as usize;
            buf[written..written + copy_len]
                .copy_from_slice(&block_buf[copy_from as usize..copy_from as usize + copy_len]);
            written += copy_len;
        }

        Ok(written)
    }

    pub fn write(&mut self, inum: u32, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut inode = self.get_inode(inum)?;
        if offset > inode.file_size {
            return Err(Error::fatal(format!(
                "inum {inum}: write beyond end of file (offset {offset}, size {})",
                inode.file_size
            )));
        }

        let block_size = self.block_size_bytes() as u64;
        let start_block = (offset / block_size) as u32;
        let end_block = ((offset + data.len() as u64 - 1) / block_size) as u32;

        let mut consumed = 0usize;
        for block in start_block..=end_block {
            if block >= self.max_file_blocks() {
                log::warn!("inum {inum}: write beyond maximum file blocks, truncated");
                break;
            }

            let old_addr = self.get_block_address(&inode, block)?;
            validate_address_pair(old_addr)?;

            let mut block_buf = vec![0u8; block_size as usize];
            if !old_addr.is_empty() {
                self.log.read(old_addr, &mut block_buf)?;
                self.log.free(old_addr)?;
            }

            let block_start = block as u64 * block_size;
            let copy_from = offset.max(block_start) - block_start;
            let copy_to_end =
                (offset + data.len() as u64).min(block_start + block_size) - block_start;
            let copy_len = (copy_to_end - copy_from) as usize;
            block_buf[copy_from as usize..copy_from as usize + copy_len]
                .copy_from_slice(&data[consumed..consumed + copy_len]);
            consumed += copy_len;

            let new_addr = self.log.write(inum, block, &block_buf)?;
            self.update_inode_block(&mut inode, block, new_addr)?;
        }

        let now_ns = self.now_ns();
        inode.file_size = inode.file_size.max(offset + data.len() as u64);
        inode.atime_ns = now_ns;
        inode.mtime_ns = now_ns;
        self.update_ifile(&inode)
    }

    /// Preserves the prefix of `min(old_size, new_size)` bytes; frees every block and
    /// rewrites. A crash mid-truncate can leave the file readable only up to the first
    /// stale block — the pre-truncate contents remain on the log until the cleaner
    /// reclaims them (see DESIGN.md, Open Question 5).
    pub fn truncate(&mut self, inum: u32, new_size: u64) -> Result<()> {
        let inode = self.get_inode(inum)?;
        let old_size = inode.file_size;

        let mut old_contents = vec![0u8; old_size as usize];
        if old_size > 0 {
            self.read(inum, 0, &mut old_contents)?;
        }

        let mut inode = self.get_inode(inum)?;
        for b in &mut inode.direct_blocks {
            self.log.free(*b)?;
            *b = EMPTY_ADDRESS;
        }
        self.log.free(inode.indirect_block)?;
        inode.indirect_block = EMPTY_ADDRESS;
        inode.file_size = 0;
        self.update_ifile(&inode)?;

        if new_size == 0 {
            return Ok(());
        }

        let mut new_contents = vec![0u8; new_size as usize];
        let copy_len = old_size.min(new_size) as usize;
        new_contents[..copy_len].copy_from_slice(&old_contents[..copy_len]);
        self.write(inum, 0, &new_contents)
    }

    /// Frees `inum`: every block pointer is released to the log and the inode is
    /// marked unused. Freeing the iFile itself is a programmer error.
    pub fn free(&mut self, inum: u32) -> Result<()> {
        if inum == 0 {
            return Err(Error::fatal("attempted to free the iFile"));
        }

        let mut inode = self.get_inode(inum)?;
        inode.in_use = 0;
        for b in &mut inode.direct_blocks {
            self.log.free(*b)?;
            *b = EMPTY_ADDRESS;
        }
        self.log.free(inode.indirect_block)?;
        inode.indirect_block = EMPTY_ADDRESS;
        self.update_ifile(&inode)
    }

    pub fn get_attr(&mut self, inum: u32) -> Result<Attr> {
        let inode = self.get_inode(inum)?;
        Attr::from_inode(&inode)
    }

    pub fn chmod(&mut self, inum: u32, mode: u16) -> Result<()> {
        let mut inode = self.get_inode(inum)?;
        inode.mode = mode;
        inode.ctime_ns = self.now_ns();
        self.update_ifile(&inode)
    }

    pub fn chown(&mut self, inum: u32, uid: u32, gid: u32) -> Result<()> {
        let mut inode = self.get_inode(inum)?;
        inode.uid = uid;
        inode.gid = gid;
        inode.ctime_ns = self.now_ns();
        self.update_ifile(&inode)
    }

    pub fn add_link(&mut self, inum: u32) -> Result<()> {
        let mut inode = self.get_inode(inum)?;
        inode.nlinks += 1;
        self.update_ifile(&inode)
    }

    /// Decrements `nlinks`; frees the file once it reaches zero.
    pub fn remove_link(&mut self, inum: u32) -> Result<()> {
        let mut inode = self.get_inode(inum)?;
        inode.nlinks = inode.nlinks.saturating_sub(1);
        self.update_ifile(&inode)?;
        if inode.nlinks == 0 {
            self.free(inum)?;
        }
        Ok(())
    }

    pub fn get_file_type(&mut self, inum: u32) -> Result<FileType> {
        self.get_inode(inum)?.file_type()
    }

    // -- cleaner -----------------------------------------------------------------

    /// The Sprite LFS cost-benefit cleaner: see §4.3. Invoked as the first action of
    /// every directory-layer operation.
    pub fn run_cleaner(&mut self) -> Result<()> {
        let superblock = *self.log.superblock();
        let first = superblock.first_data_segment();
        let flash_size = superblock.flash_size_in_segments;

        let table = self.log.read_segment_usage_table().to_vec();
        let clean_count = (first..flash_size).filter(|&s| table[s as usize].is_clean()).count() as u32;

        if clean_count > self.thresholds.start {
            return Ok(());
        }

        log::info!(
            "cleaner: {clean_count} clean segments (start threshold {}), cleaning",
            self.thresholds.start
        );

        let segment_data_bytes = superblock.segment_data_bytes() as f64;
        let mut scored: Vec<(f64, u32)> = Vec::new();
        for seg in first..flash_size {
            let entry = table[seg as usize];
            let u = entry.live_bytes as f64 / segment_data_bytes;
            let age = entry.age_of_youngest_block_ns as f64 * 1e-14;
            let score = ((1.0 - u) * age) / (1.0 + u);
            if score == 0.0 {
                continue;
            }
            scored.push((score, seg));
        }
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut clean_count = clean_count;
        while let Some((_, segment)) = scored.pop() {
            if clean_count >= self.thresholds.end {
                break;
            }
            self.clean_segment(segment)?;
            self.log.erase_segment(segment)?;
            let table = self.log.usage_table_mut();
            table[segment as usize] = Default::default();
            self.log.persist_usage_table()?;
            clean_count += 1;
        }

        log::info!("cleaner: done, {clean_count} clean segments");
        Ok(())
    }

    /// Relocates every still-live block out of `segment`, leaving it free to erase.
    fn clean_segment(&mut self, segment: u32) -> Result<()> {
        let in_memory = self.log.read_segment(segment)?;
        let block_size = self.block_size_bytes() as usize;

        for block in 1..in_memory.summary.block_inums.len() {
            let inum = in_memory.summary.block_inums[block];
            if inum == NO_INUM {
                continue;
            }
            let file_block = in_memory.summary.inode_block_numbers[block];
            let inum = inum as u32;

            let mut inode = self.get_inode(inum)?;
            let current = if file_block >= 0 {
                self.get_block_address(&inode, file_block as u32)?
            } else if file_block == INDIRECT_BLOCK {
                inode.indirect_block
            } else {
                return Err(Error::fatal(format!(
                    "cleaner: invalid file block number {file_block} in segment {segment}"
                )));
            };

            let here = LogAddress::new(segment, block as u32);
            if current != here {
                // Stale: the summary says inum/file_block, but the inode has since
                // moved on; this slot is already excluded from live_bytes.
                continue;
            }

            let bytes = in_memory.block(block, block_size as u32).to_vec();
            let new_addr = self.log.write(inum, file_block.max(0) as u32, &bytes)?;
            if file_block >= 0 {
                self.update_inode_block(&mut inode, file_block as u32, new_addr)?;
            } else {
                inode.indirect_block = new_addr;
            }
            self.update_ifile(&inode)?;
        }

        Ok(())
    }
}

fn validate_address_pair(addr: LogAddress) -> Result<()> {
    let seg_empty = addr.segment == u32::MAX;
    let block_empty = addr.block == u32::MAX;
    if seg_empty != block_empty {
        return Err(Error::corruption("malformed direct block log address"));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::FlashData;
    use lfs_flash::FileFlash;
    use lfs_utils::clock::SystemClock;

    fn small_superblock() -> FlashData {
        FlashData {
            block_size_in_sectors: 2,
            segment_size_in_blocks: 32,
            flash_size_in_segments: 100,
            wear_limit: 1000,
            total_blocks: 3200,
            checkpoint_segment_index: crate::log_layer::USAGE_TABLE_SEGMENT + 1,
        }
    }

    fn fresh_file_layer(path: &std::path::Path) -> FileLayer<FileFlash, SystemClock> {
        let sb = small_superblock();
        let flash = FileFlash::create(path, sb.block_size_in_sectors, sb.wear_limit, sb.total_blocks).unwrap();
        Log::format(flash, SystemClock, sb).unwrap();
        let flash = FileFlash::open(path, sb.block_size_in_sectors, 0).unwrap();
        let log = Log::open(flash, SystemClock, 16, 10).unwrap();
        FileLayer::new(log, CleanerThresholds { start: 4, end: 8 })
    }

    #[test]
    fn s1_tail_fill_and_seal() {
        let dir = tempfile::tempdir().unwrap();
        let mut fl = fresh_file_layer(&dir.path().join("flash.img"));

        let inum = fl.create(FileType::File, 0o644, 0, 0).unwrap();
        assert_eq!(inum, 2); // inum 1 is the root directory

        let block_size = fl.block_size_bytes() as usize;
        for i in 0..25 {
            let data = vec![i as u8; block_size];
            fl.write(inum, i as u64 * block_size as u64, &data).unwrap();
        }

        let attr = fl.get_attr(inum).unwrap();
        assert_eq!(attr.size, 25 * block_size as u64);
    }

    #[test]
    fn s2_stale_block_skip_then_clean() {
        let dir = tempfile::tempdir().unwrap();
        let mut fl = fresh_file_layer(&dir.path().join("flash.img"));

        let inum = fl.create(FileType::File, 0o644, 0, 0).unwrap();
        let block_size = fl.block_size_bytes() as usize;

        fl.write(inum, 0, &vec![1u8; block_size]).unwrap();
        fl.write(inum, 0, &vec![2u8; block_size]).unwrap();
        fl.write(inum, 0, &vec![3u8; block_size]).unwrap();

        let mut buf = vec![0u8; block_size];
        fl.read(inum, 0, &mut buf).unwrap();
        assert_eq!(buf, vec![3u8; block_size]);

        fl.run_cleaner().unwrap();

        let mut buf = vec![0u8; block_size];
        fl.read(inum, 0, &mut buf).unwrap();
        assert_eq!(buf, vec![3u8; block_size]);
    }

    #[test]
    fn s3_round_trip_via_indirect_block() {
        let dir = tempfile::tempdir().unwrap();
        let sb = FlashData {
            block_size_in_sectors: 2,
            segment_size_in_blocks: 32,
            flash_size_in_segments: 200,
            wear_limit: 1000,
            total_blocks: 6400,
            checkpoint_segment_index: crate::log_layer::USAGE_TABLE_SEGMENT + 1,
        };
        let flash = FileFlash::create(&dir.path().join("flash.img"), sb.block_size_in_sectors, sb.wear_limit, sb.total_blocks).unwrap();
        Log::format(flash, SystemClock, sb).unwrap();
        let flash = FileFlash::open(&dir.path().join("flash.img"), sb.block_size_in_sectors, 0).unwrap();
        let log = Log::open(flash, SystemClock, 16, 10).unwrap();
        let mut fl = FileLayer::new(log, CleanerThresholds { start: 4, end: 8 });

        let inum = fl.create(FileType::File, 0o644, 0, 0).unwrap();
        let block_size = fl.block_size_bytes() as usize;
        for block in 0..100u64 {
            let data = vec![(block % 251) as u8; block_size];
            fl.write(inum, block * block_size as u64, &data).unwrap();
        }

        for block in 0..100u64 {
            let mut buf = vec![0u8; block_size];
            fl.read(inum, block * block_size as u64, &mut buf).unwrap();
            assert_eq!(buf, vec![(block % 251) as u8; block_size], "block {block}");
        }
    }
}
