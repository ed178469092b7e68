//! Translates `fuser::Filesystem` calls into `lfs_core::DirectoryLayer`/`FileLayer`
//! calls. A pure shim: every operation resolves a kernel inode number to a path (via
//! `paths`, populated by `lookup`/`readdir`) and defers to the path-based directory
//! layer API that the rest of this crate already tests.

use fuser::{
    FileAttr, FileType as FuseFileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use lfs_core::data::FileType;
use lfs_core::file_layer::Attr;
use lfs_core::{Error, Volume};
use lfs_flash::FileFlash;
use lfs_utils::clock::SystemClock;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;

fn to_errno(err: &Error) -> i32 {
    match err {
        Error::NotFound => libc::ENOENT,
        Error::NotEmpty => libc::ENOTEMPTY,
        Error::IOError(e) => e.raw_os_error().unwrap_or(libc::EIO),
        Error::Corruption(_) => libc::EIO,
        Error::FlashFull => libc::ENOSPC,
        Error::PermissionDenied => libc::EACCES,
        Error::Fatal(_) => libc::EIO,
    }
}

fn ns_to_systime(ns: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(ns)
}

fn to_fuse_kind(file_type: FileType) -> FuseFileType {
    match file_type {
        FileType::File => FuseFileType::RegularFile,
        FileType::Directory => FuseFileType::Directory,
        FileType::Symlink => FuseFileType::Symlink,
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

pub struct LfsFuse {
    volume: Volume<FileFlash, SystemClock>,
    block_size_bytes: u32,
    /// Kernel inode number (== lfs inum) -> the path it was last reached by.
    paths: HashMap<u64, String>,
}

impl LfsFuse {
    pub fn new(volume: Volume<FileFlash, SystemClock>) -> Self {
        let block_size_bytes = volume.directory().files().log().block_size_bytes();
        let mut paths = HashMap::new();
        paths.insert(ROOT_INO, "/".to_owned());
        Self {
            volume,
            block_size_bytes,
            paths,
        }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.paths.get(&ino).cloned()
    }

    fn to_file_attr(&self, attr: &Attr) -> FileAttr {
        FileAttr {
            ino: attr.inum as u64,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: ns_to_systime(attr.atime_ns),
            mtime: ns_to_systime(attr.mtime_ns),
            ctime: ns_to_systime(attr.ctime_ns),
            crtime: ns_to_systime(attr.ctime_ns),
            kind: to_fuse_kind(attr.file_type),
            perm: attr.mode,
            nlink: attr.nlinks,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: self.block_size_bytes,
            flags: 0,
        }
    }

    /// Does a final synchronous checkpoint before the process exits, the closest thing
    /// to a clean unmount `destroy` (which only gets `&mut self`) can do.
    fn final_checkpoint(&mut self) {
        if let Err(e) = self.volume.directory_mut().files_mut().log_mut().checkpoint_now() {
            log::error!("final checkpoint failed: {e}");
        }
    }
}

impl Filesystem for LfsFuse {
    fn destroy(&mut self) {
        self.final_checkpoint();
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let (Some(parent_path), Some(name)) = (self.path_of(parent), name.to_str()) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = join(&parent_path, name);
        match self.volume.directory_mut().getattr(&path) {
            Ok(attr) => {
                self.paths.insert(attr.inum as u64, path);
                reply.entry(&TTL, &self.to_file_attr(&attr), 0);
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.volume.directory_mut().getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &self.to_file_attr(&attr)),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let dir = self.volume.directory_mut();
        if let Some(mode) = mode {
            if let Err(e) = dir.chmod(&path, mode as u16) {
                reply.error(to_errno(&e));
                return;
            }
        }
        if uid.is_some() || gid.is_some() {
            let current = match dir.getattr(&path) {
                Ok(a) => a,
                Err(e) => {
                    reply.error(to_errno(&e));
                    return;
                }
            };
            let new_uid = uid.unwrap_or(current.uid);
            let new_gid = gid.unwrap_or(current.gid);
            if let Err(e) = dir.chown(&path, new_uid, new_gid) {
                reply.error(to_errno(&e));
                return;
            }
        }
        if let Some(size) = size {
            if let Err(e) = dir.truncate(&path, size) {
                reply.error(to_errno(&e));
                return;
            }
        }
        match dir.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &self.to_file_attr(&attr)),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.volume.directory_mut().readlink(&path, 4096) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let (Some(parent_path), Some(name)) = (self.path_of(parent), name.to_str()) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = join(&parent_path, name);
        if let Err(e) = self
            .volume
            .directory_mut()
            .mkdir(&path, mode as u16, req.uid(), req.gid())
        {
            reply.error(to_errno(&e));
            return;
        }
        match self.volume.directory_mut().getattr(&path) {
            Ok(attr) => {
                self.paths.insert(attr.inum as u64, path);
                reply.entry(&TTL, &self.to_file_attr(&attr), 0);
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let (Some(parent_path), Some(name)) = (self.path_of(parent), name.to_str()) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = join(&parent_path, name);
        match self
            .volume
            .directory_mut()
            .create(&path, mode as u16, req.uid(), req.gid())
        {
            Ok(inum) => {
                self.paths.insert(inum as u64, path.clone());
                match self.volume.directory_mut().getattr(&path) {
                    Ok(attr) => reply.created(&TTL, &self.to_file_attr(&attr), 0, inum as u64, 0),
                    Err(e) => reply.error(to_errno(&e)),
                }
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &std::path::Path,
        reply: ReplyEntry,
    ) {
        let (Some(parent_path), Some(link_name), Some(target)) =
            (self.path_of(parent), link_name.to_str(), target.to_str())
        else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = join(&parent_path, link_name);
        if let Err(e) = self
            .volume
            .directory_mut()
            .symlink(target, &path, req.uid(), req.gid())
        {
            reply.error(to_errno(&e));
            return;
        }
        match self.volume.directory_mut().getattr(&path) {
            Ok(attr) => {
                self.paths.insert(attr.inum as u64, path);
                reply.entry(&TTL, &self.to_file_attr(&attr), 0);
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let (Some(parent_path), Some(name)) = (self.path_of(parent), name.to_str()) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = join(&parent_path, name);
        if let Ok(inum) = self.volume.directory_mut().resolve(&path) {
            self.paths.remove(&(inum as u64));
        }
        match self.volume.directory_mut().unlink(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let (Some(parent_path), Some(name)) = (self.path_of(parent), name.to_str()) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = join(&parent_path, name);
        if let Ok(inum) = self.volume.directory_mut().resolve(&path) {
            self.paths.remove(&(inum as u64));
        }
        match self.volume.directory_mut().rmdir(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    /// Renames within the flat path cache. Subtree entries beneath a renamed directory
    /// keep their old cached path until the kernel looks them up again.
    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(parent_path), Some(name), Some(newparent_path), Some(newname)) = (
            self.path_of(parent),
            name.to_str(),
            self.path_of(newparent),
            newname.to_str(),
        ) else {
            reply.error(libc::ENOENT);
            return;
        };
        let from = join(&parent_path, name);
        let to = join(&newparent_path, newname);
        match self.volume.directory_mut().rename(&from, &to) {
            Ok(()) => {
                if let Ok(inum) = self.volume.directory_mut().resolve(&to) {
                    self.paths.insert(inum as u64, to);
                }
                reply.ok();
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let (Some(from_path), Some(newparent_path), Some(newname)) =
            (self.path_of(ino), self.path_of(newparent), newname.to_str())
        else {
            reply.error(libc::ENOENT);
            return;
        };
        let to = join(&newparent_path, newname);
        if let Err(e) = self.volume.directory_mut().link(&from_path, &to) {
            reply.error(to_errno(&e));
            return;
        }
        self.paths.insert(ino, to.clone());
        match self.volume.directory_mut().getattr(&to) {
            Ok(attr) => reply.entry(&TTL, &self.to_file_attr(&attr), 0),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(ino, 0);
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(ino, 0);
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut buf = vec![0u8; size as usize];
        match self.volume.directory_mut().read(&path, offset as u64, &mut buf) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.volume.directory_mut().write(&path, offset as u64, data) {
            Ok(()) => reply.written(data.len() as u32),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let names = match self.volume.directory_mut().readdir(&path) {
            Ok(names) => names,
            Err(e) => {
                reply.error(to_errno(&e));
                return;
            }
        };
        for (i, name) in names.iter().enumerate().skip(offset as usize) {
            let child_path = join(&path, name);
            let inum = match self.volume.directory_mut().resolve(&child_path) {
                Ok(inum) => inum,
                Err(_) => continue,
            };
            let file_type = match self.volume.directory_mut().files_mut().get_file_type(inum) {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            self.paths.insert(inum as u64, child_path);
            let full = reply.add(inum as u64, (i + 1) as i64, to_fuse_kind(file_type), name);
            if full {
                break;
            }
        }
        reply.ok();
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if mask == libc::F_OK {
            match self.volume.directory_mut().exists(&path) {
                Ok(true) => reply.ok(),
                Ok(false) => reply.error(libc::ENOENT),
                Err(e) => reply.error(to_errno(&e)),
            }
            return;
        }
        match self
            .volume
            .directory_mut()
            .check_permissions(&path, req.uid(), req.gid(), mask as u8 & 0b111)
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(&e)),
        }
    }
}
