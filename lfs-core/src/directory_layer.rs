//! Path resolution and directory semantics layered on top of the file layer.
//!
//! Every operation here invokes the cleaner first (`run_cleaner`), matching the
//! original's practice of cleaning opportunistically before any path-based operation.

use crate::data::{DirectoryList, FileType};
use crate::error::{Error, Result};
use crate::file_layer::{Attr, FileLayer};
use lfs_flash::Flash;
use lfs_utils::clock::Clock;

pub const ROOT_INUM: u32 = 1;
const IFILE_INUM: u32 = 0;

/// Standard POSIX access-check flags, named the way `Directory_CheckPermissions` takes
/// them (`R_OK`/`W_OK`/`X_OK` from `unistd.h`).
pub const R_OK: u8 = 0b100;
pub const W_OK: u8 = 0b010;
pub const X_OK: u8 = 0b001;

pub struct DirectoryLayer<F: Flash, C: Clock> {
    files: FileLayer<F, C>,
}

impl<F: Flash, C: Clock> DirectoryLayer<F, C> {
    pub fn new(files: FileLayer<F, C>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &FileLayer<F, C> {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut FileLayer<F, C> {
        &mut self.files
    }

    pub fn into_files(self) -> FileLayer<F, C> {
        self.files
    }

    // -- path resolution -------------------------------------------------------

    /// Walks `path` from the root directory, returning the final inum, or
    /// `Error::NotFound` if any component is missing. `..` aliases the directory's own
    /// inum rather than its true parent (see DESIGN.md, Open Question 1) — path
    /// resolution works only because `..` is never chased past a single hop here.
    pub fn resolve(&mut self, path: &str) -> Result<u32> {
        let mut components = path.split('/').filter(|c| !c.is_empty());
        let Some(mut token) = components.next() else {
            return Ok(ROOT_INUM);
        };

        let mut dir = self.read_directory(ROOT_INUM)?;
        loop {
            let inum = dir.get_inum(token).ok_or(Error::NotFound)?;
            match components.next() {
                None => return Ok(inum),
                Some(next) => {
                    dir = self.read_directory(inum)?;
                    token = next;
                }
            }
        }
    }

    fn split_path(path: &str) -> (String, String) {
        match path.trim_end_matches('/').rsplit_once('/') {
            Some((dir, name)) => {
                let dir = if dir.is_empty() { "/" } else { dir };
                (dir.to_owned(), name.to_owned())
            }
            None => ("/".to_owned(), path.to_owned()),
        }
    }

    fn read_directory(&mut self, inum: u32) -> Result<DirectoryList> {
        match self.files.get_file_type(inum)? {
            FileType::Directory => {}
            _ => return Err(Error::corruption(format!("inum {inum} is not a directory"))),
        }
        let attr = self.files.get_attr(inum)?;
        let mut buf = vec![0u8; attr.size as usize];
        self.files.read(inum, 0, &mut buf)?;
        Ok(DirectoryList::from_bytes(&buf))
    }

    fn write_directory(&mut self, dir: &DirectoryList) -> Result<()> {
        let bytes = dir.to_bytes();
        self.files.truncate(dir.own_inum, 0)?;
        self.files.write(dir.own_inum, 0, &bytes)
    }

    fn create_entry(&mut self, path: &str, file_type: FileType, mode: u16, uid: u32, gid: u32) -> Result<u32> {
        let (parent_path, name) = Self::split_path(path);
        reject_reserved_name(&name)?;

        let parent_inum = self.resolve(&parent_path)?;
        let inum = self.files.create(file_type, mode, uid, gid)?;

        let mut parent = self.read_directory(parent_inum)?;
        parent.add_file(&name, inum);
        self.write_directory(&parent)?;
        Ok(inum)
    }

    // -- public operations -------------------------------------------------------

    pub fn mkdir(&mut self, path: &str, mode: u16, uid: u32, gid: u32) -> Result<()> {
        self.files.run_cleaner()?;
        let (_, name) = Self::split_path(path);
        let inum = self.create_entry(path, FileType::Directory, mode, uid, gid)?;
        let dir = DirectoryList::new(&name, inum);
        self.write_directory(&dir)
    }

    pub fn create(&mut self, path: &str, mode: u16, uid: u32, gid: u32) -> Result<u32> {
        self.files.run_cleaner()?;
        self.create_entry(path, FileType::File, mode, uid, gid)
    }

    pub fn symlink(&mut self, target: &str, link_path: &str, uid: u32, gid: u32) -> Result<()> {
        self.files.run_cleaner()?;
        let inum = self.create_entry(link_path, FileType::Symlink, 0o777, uid, gid)?;
        self.files.write(inum, 0, target.as_bytes())
    }

    pub fn readlink(&mut self, path: &str, max_len: usize) -> Result<String> {
        self.files.run_cleaner()?;
        let inum = self.resolve(path)?;
        let attr = self.files.get_attr(inum)?;
        let len = (attr.size as usize).min(max_len);
        let mut buf = vec![0u8; len];
        self.files.read(inum, 0, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn readdir(&mut self, path: &str) -> Result<Vec<String>> {
        self.files.run_cleaner()?;
        let inum = self.resolve(path)?;
        Ok(self.read_directory(inum)?.names())
    }

    pub fn read(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.files.run_cleaner()?;
        let inum = self.resolve(path)?;
        self.files.read(inum, offset, buf)
    }

    pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        self.files.run_cleaner()?;
        let inum = self.resolve(path)?;
        if inum == IFILE_INUM {
            return Err(Error::fatal("attempted to write the iFile through a path"));
        }
        self.files.write(inum, offset, data)
    }

    pub fn getattr(&mut self, path: &str) -> Result<Attr> {
        self.files.run_cleaner()?;
        let inum = self.resolve(path)?;
        self.files.get_attr(inum)
    }

    pub fn exists(&mut self, path: &str) -> Result<bool> {
        self.files.run_cleaner()?;
        Ok(self.resolve(path).is_ok())
    }

    pub fn truncate(&mut self, path: &str, size: u64) -> Result<()> {
        self.files.run_cleaner()?;
        let inum = self.resolve(path)?;
        self.files.truncate(inum, size)
    }

    pub fn chmod(&mut self, path: &str, mode: u16) -> Result<()> {
        self.files.run_cleaner()?;
        let inum = self.resolve(path)?;
        self.files.chmod(inum, mode)
    }

    pub fn chown(&mut self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.files.run_cleaner()?;
        let inum = self.resolve(path)?;
        self.files.chown(inum, uid, gid)
    }

    pub fn link(&mut self, from: &str, to: &str) -> Result<()> {
        self.files.run_cleaner()?;
        let from_inum = self.resolve(from)?;

        let (to_parent_path, to_name) = Self::split_path(to);
        reject_reserved_name(&to_name)?;
        let to_parent_inum = self.resolve(&to_parent_path)?;

        let mut to_dir = self.read_directory(to_parent_inum)?;
        to_dir.add_file(&to_name, from_inum);
        self.write_directory(&to_dir)?;

        self.files.add_link(from_inum)
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        self.files.run_cleaner()?;
        self.unlink_entry(path)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        self.files.run_cleaner()?;
        let inum = self.resolve(path)?;
        let dir = self.read_directory(inum)?;
        if !dir.is_empty() {
            return Err(Error::NotEmpty);
        }
        self.unlink_entry(path)
    }

    /// Shared body of `unlink`/`rmdir`: remove the directory entry, then free or
    /// decrement the target depending on its type. Callers are responsible for
    /// running the cleaner first.
    fn unlink_entry(&mut self, path: &str) -> Result<()> {
        let inum = self.resolve(path)?;
        let (parent_path, name) = Self::split_path(path);
        reject_reserved_name(&name)?;
        let parent_inum = self.resolve(&parent_path)?;

        let mut parent = self.read_directory(parent_inum)?;
        if !parent.remove_file(&name) {
            return Err(Error::NotFound);
        }
        self.write_directory(&parent)?;

        if self.files.get_file_type(inum)? == FileType::Symlink {
            self.files.free(inum)
        } else {
            self.files.remove_link(inum)
        }
    }

    /// Removes the entry from the source parent and adds it to the destination
    /// parent, both referencing the same inum. Not atomic: a crash between the two
    /// steps loses the entry (see DESIGN.md, Open Question 3 — documented, not fixed).
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.files.run_cleaner()?;
        let inum = self.resolve(from)?;

        let (from_parent_path, from_name) = Self::split_path(from);
        reject_reserved_name(&from_name)?;
        let from_parent_inum = self.resolve(&from_parent_path)?;
        let mut from_parent = self.read_directory(from_parent_inum)?;
        if !from_parent.remove_file(&from_name) {
            return Err(Error::NotFound);
        }
        self.write_directory(&from_parent)?;

        let (to_parent_path, to_name) = Self::split_path(to);
        reject_reserved_name(&to_name)?;
        let to_parent_inum = self.resolve(&to_parent_path)?;
        let mut to_dir = self.read_directory(to_parent_inum)?;
        to_dir.add_file(&to_name, inum);
        self.write_directory(&to_dir)
    }

    /// Standard POSIX access check: root (uid 0) always succeeds; otherwise the
    /// owner/group/other permission triple is checked against `flags`.
    pub fn check_permissions(&mut self, path: &str, uid: u32, gid: u32, flags: u8) -> Result<()> {
        self.files.run_cleaner()?;
        let inum = self.resolve(path)?;
        let attr = self.files.get_attr(inum)?;

        if uid == 0 {
            return Ok(());
        }

        let shift = if uid == attr.uid {
            6
        } else if gid == attr.gid {
            3
        } else {
            0
        };
        let granted = ((attr.mode >> shift) & 0b111) as u8;
        if granted & flags == flags {
            Ok(())
        } else {
            Err(Error::PermissionDenied)
        }
    }
}

fn reject_reserved_name(name: &str) -> Result<()> {
    if name == "." || name == ".." || name == ".ifile" {
        return Err(Error::fatal(format!("{name} is not a valid target for this operation")));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_path_basic() {
        assert_eq!(
            DirectoryLayer::<lfs_flash::MemFlash, lfs_utils::clock::FakeClock>::split_path("/a/b"),
            ("/a".to_owned(), "b".to_owned())
        );
        assert_eq!(
            DirectoryLayer::<lfs_flash::MemFlash, lfs_utils::clock::FakeClock>::split_path("/a"),
            ("/".to_owned(), "a".to_owned())
        );
    }

    #[test]
    fn reserved_names_rejected() {
        assert!(reject_reserved_name(".").is_err());
        assert!(reject_reserved_name("..").is_err());
        assert!(reject_reserved_name(".ifile").is_err());
        assert!(reject_reserved_name("f").is_ok());
    }
}
