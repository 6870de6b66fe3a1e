//! FUSE adapter for the passthrough core.
//!
//! Translates the kernel's inode-addressed dispatch into the core's
//! path-addressed operations: the inode registry supplies the virtual
//! path, the handle registry supplies the open backing descriptor, and
//! every reply carries the backing filesystem's own result. The
//! session summary is written from `destroy`, once, at unmount.

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod impl_fuse {
    use std::ffi::OsStr;
    use std::fs::Metadata;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::{FileTypeExt, MetadataExt};
    use std::path::Path;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use fuser::{
        FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
        ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
        TimeOrNow,
    };

    use crate::handle::HandleTable;
    use crate::inode::{InodeId, InodeTable};
    use crate::options::MountOptions;
    use crate::passthrough::WorkloadFs;

    /// Map an I/O failure to the errno handed back to the kernel.
    fn errno(err: &io::Error) -> libc::c_int {
        err.raw_os_error().unwrap_or(libc::EIO)
    }

    /// Convert a backing file type to the FUSE representation.
    fn kind_of(file_type: std::fs::FileType) -> FileType {
        if file_type.is_dir() {
            FileType::Directory
        } else if file_type.is_symlink() {
            FileType::Symlink
        } else if file_type.is_fifo() {
            FileType::NamedPipe
        } else if file_type.is_char_device() {
            FileType::CharDevice
        } else if file_type.is_block_device() {
            FileType::BlockDevice
        } else if file_type.is_socket() {
            FileType::Socket
        } else {
            FileType::RegularFile
        }
    }

    /// Convert a backing timestamp (seconds, nanoseconds) to SystemTime.
    fn timestamp(secs: i64, nsecs: i64) -> SystemTime {
        if secs >= 0 {
            UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
        } else {
            UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
        }
    }

    /// Resolve a `TimeOrNow` to a concrete timestamp.
    fn time_from(time: TimeOrNow) -> SystemTime {
        match time {
            TimeOrNow::SpecificTime(time) => time,
            TimeOrNow::Now => SystemTime::now(),
        }
    }

    /// Workload-tracing FUSE filesystem.
    ///
    /// Wraps the passthrough core with the inode and handle registries
    /// the kernel ABI requires.
    pub struct WorkloadFuse {
        core: WorkloadFs,
        inodes: InodeTable,
        handles: HandleTable,
        attr_ttl: Duration,
    }

    impl WorkloadFuse {
        /// Create the adapter for one mount session.
        ///
        /// # Arguments
        /// * `core` - Passthrough core owning counters and journal
        /// * `options` - Mount configuration
        pub fn new(core: WorkloadFs, options: &MountOptions) -> Self {
            Self {
                core,
                inodes: InodeTable::new(),
                handles: HandleTable::new(),
                attr_ttl: Duration::from_secs(options.attr_ttl_secs),
            }
        }

        /// Convert backing metadata to FUSE file attributes.
        ///
        /// # Arguments
        /// * `ino` - Inode number the kernel knows the file by
        /// * `md` - Metadata from the backing filesystem
        fn to_file_attr(&self, ino: InodeId, md: &Metadata) -> FileAttr {
            FileAttr {
                ino,
                size: md.size(),
                blocks: md.blocks(),
                atime: timestamp(md.atime(), md.atime_nsec()),
                mtime: timestamp(md.mtime(), md.mtime_nsec()),
                ctime: timestamp(md.ctime(), md.ctime_nsec()),
                crtime: UNIX_EPOCH,
                kind: kind_of(md.file_type()),
                perm: (md.mode() & 0o7777) as u16,
                nlink: md.nlink() as u32,
                uid: md.uid(),
                gid: md.gid(),
                rdev: md.rdev() as u32,
                blksize: md.blksize() as u32,
                flags: 0,
            }
        }

        /// Stat a virtual path and register its inode.
        fn attr_of(&self, vpath: &str) -> io::Result<FileAttr> {
            let md: Metadata = self.core.getattr(vpath)?;
            let ino: InodeId = self.inodes.get_or_assign(vpath);
            Ok(self.to_file_attr(ino, &md))
        }

        /// Virtual path of the parent directory of a registered path.
        fn parent_of(&self, vpath: &str) -> String {
            match vpath.rfind('/') {
                Some(0) | None => "/".to_string(),
                Some(idx) => vpath[..idx].to_string(),
            }
        }
    }

    impl Filesystem for WorkloadFuse {
        fn destroy(&mut self) {
            if let Err(e) = self.core.write_summary() {
                tracing::error!("Summary write failed: {}", e);
            }
        }

        fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
            let name_str: &str = match name.to_str() {
                Some(n) => n,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            let vpath: String = match self.inodes.child_of(parent, name_str) {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self.attr_of(&vpath) {
                Ok(attr) => reply.entry(&self.attr_ttl, &attr, 0),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn getattr(&mut self, _req: &Request, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
            // Prefer the open descriptor when the kernel supplies one;
            // the path may already have been unlinked.
            if let Some(file) = fh.and_then(|fh| self.handles.file(fh)) {
                match file.metadata() {
                    Ok(md) => reply.attr(&self.attr_ttl, &self.to_file_attr(ino, &md)),
                    Err(e) => reply.error(errno(&e)),
                }
                return;
            }

            let vpath: String = match self.inodes.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self.core.getattr(&vpath) {
                Ok(md) => reply.attr(&self.attr_ttl, &self.to_file_attr(ino, &md)),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn setattr(
            &mut self,
            _req: &Request,
            ino: u64,
            mode: Option<u32>,
            uid: Option<u32>,
            gid: Option<u32>,
            size: Option<u64>,
            atime: Option<TimeOrNow>,
            mtime: Option<TimeOrNow>,
            _ctime: Option<SystemTime>,
            fh: Option<u64>,
            _crtime: Option<SystemTime>,
            _chgtime: Option<SystemTime>,
            _bkuptime: Option<SystemTime>,
            _flags: Option<u32>,
            reply: ReplyAttr,
        ) {
            let vpath: String = match self.inodes.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            let result: io::Result<()> = (|| {
                if let Some(mode) = mode {
                    self.core.chmod(&vpath, mode)?;
                }
                if uid.is_some() || gid.is_some() {
                    self.core.chown(&vpath, uid, gid)?;
                }
                if let Some(size) = size {
                    match fh.and_then(|fh| self.handles.file(fh)) {
                        Some(file) => self.core.truncate_handle(&file, size)?,
                        None => self.core.truncate(&vpath, size)?,
                    }
                }
                if atime.is_some() || mtime.is_some() {
                    self.core
                        .utimens(&vpath, atime.map(time_from), mtime.map(time_from))?;
                }
                Ok(())
            })();

            match result.and_then(|()| self.core.getattr(&vpath)) {
                Ok(md) => reply.attr(&self.attr_ttl, &self.to_file_attr(ino, &md)),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
            let vpath: String = match self.inodes.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self.core.readlink(&vpath) {
                Ok(target) => reply.data(target.as_os_str().as_bytes()),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn mknod(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            umask: u32,
            rdev: u32,
            reply: ReplyEntry,
        ) {
            let vpath: String = match name
                .to_str()
                .and_then(|n| self.inodes.child_of(parent, n))
            {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            let masked: u32 = (mode & libc::S_IFMT) | (mode & 0o7777 & !umask);
            match self
                .core
                .mknod(&vpath, masked, u64::from(rdev))
                .and_then(|()| self.attr_of(&vpath))
            {
                Ok(attr) => reply.entry(&self.attr_ttl, &attr, 0),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn mkdir(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            umask: u32,
            reply: ReplyEntry,
        ) {
            let vpath: String = match name
                .to_str()
                .and_then(|n| self.inodes.child_of(parent, n))
            {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self
                .core
                .mkdir(&vpath, mode & 0o7777 & !umask)
                .and_then(|()| self.attr_of(&vpath))
            {
                Ok(attr) => reply.entry(&self.attr_ttl, &attr, 0),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
            let vpath: String = match name
                .to_str()
                .and_then(|n| self.inodes.child_of(parent, n))
            {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self.core.unlink(&vpath) {
                Ok(()) => {
                    self.inodes.forget_path(&vpath);
                    reply.ok();
                }
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
            let vpath: String = match name
                .to_str()
                .and_then(|n| self.inodes.child_of(parent, n))
            {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self.core.rmdir(&vpath) {
                Ok(()) => {
                    self.inodes.forget_path(&vpath);
                    reply.ok();
                }
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn symlink(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            link: &Path,
            reply: ReplyEntry,
        ) {
            let vpath: String = match name
                .to_str()
                .and_then(|n| self.inodes.child_of(parent, n))
            {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self
                .core
                .symlink(link, &vpath)
                .and_then(|()| self.attr_of(&vpath))
            {
                Ok(attr) => reply.entry(&self.attr_ttl, &attr, 0),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn rename(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            newparent: u64,
            newname: &OsStr,
            _flags: u32,
            reply: ReplyEmpty,
        ) {
            let from: Option<String> = name
                .to_str()
                .and_then(|n| self.inodes.child_of(parent, n));
            let to: Option<String> = newname
                .to_str()
                .and_then(|n| self.inodes.child_of(newparent, n));
            let (from, to) = match (from, to) {
                (Some(from), Some(to)) => (from, to),
                _ => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self.core.rename(&from, &to) {
                Ok(()) => {
                    self.inodes.rename_path(&from, &to);
                    reply.ok();
                }
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn link(
            &mut self,
            _req: &Request,
            ino: u64,
            newparent: u64,
            newname: &OsStr,
            reply: ReplyEntry,
        ) {
            let existing: Option<String> = self.inodes.path_of(ino);
            let new: Option<String> = newname
                .to_str()
                .and_then(|n| self.inodes.child_of(newparent, n));
            let (existing, new) = match (existing, new) {
                (Some(existing), Some(new)) => (existing, new),
                _ => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self
                .core
                .link(&existing, &new)
                .and_then(|()| self.attr_of(&new))
            {
                Ok(attr) => reply.entry(&self.attr_ttl, &attr, 0),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
            let vpath: String = match self.inodes.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self.core.open(&vpath, flags) {
                Ok(file) => reply.opened(self.handles.insert_file(file), 0),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn create(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            umask: u32,
            flags: i32,
            reply: ReplyCreate,
        ) {
            let vpath: String = match name
                .to_str()
                .and_then(|n| self.inodes.child_of(parent, n))
            {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            let file = match self.core.create(&vpath, flags, mode & !umask) {
                Ok(file) => file,
                Err(e) => {
                    reply.error(errno(&e));
                    return;
                }
            };

            match self.attr_of(&vpath) {
                Ok(attr) => {
                    let fh: u64 = self.handles.insert_file(file);
                    reply.created(&self.attr_ttl, &attr, 0, fh, 0);
                }
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn read(
            &mut self,
            _req: &Request,
            ino: u64,
            fh: u64,
            offset: i64,
            size: u32,
            _flags: i32,
            _lock_owner: Option<u64>,
            reply: ReplyData,
        ) {
            let file = match self.handles.file(fh) {
                Some(file) => file,
                None => {
                    reply.error(libc::EBADF);
                    return;
                }
            };
            let vpath: String = self.inodes.path_of(ino).unwrap_or_else(|| "?".to_string());

            match self.core.read(&file, &vpath, offset.max(0) as u64, size) {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn write(
            &mut self,
            _req: &Request,
            ino: u64,
            fh: u64,
            offset: i64,
            data: &[u8],
            _write_flags: u32,
            _flags: i32,
            _lock_owner: Option<u64>,
            reply: ReplyWrite,
        ) {
            let file = match self.handles.file(fh) {
                Some(file) => file,
                None => {
                    reply.error(libc::EBADF);
                    return;
                }
            };
            let vpath: String = self.inodes.path_of(ino).unwrap_or_else(|| "?".to_string());

            match self.core.write(&file, &vpath, offset.max(0) as u64, data) {
                Ok(written) => reply.written(written as u32),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn flush(
            &mut self,
            _req: &Request,
            _ino: u64,
            _fh: u64,
            _lock_owner: u64,
            reply: ReplyEmpty,
        ) {
            match self.core.flush() {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn release(
            &mut self,
            _req: &Request,
            _ino: u64,
            fh: u64,
            _flags: i32,
            _lock_owner: Option<u64>,
            _flush: bool,
            reply: ReplyEmpty,
        ) {
            // Dropping the handle closes the backing descriptor.
            self.handles.remove(fh);
            reply.ok();
        }

        fn fsync(&mut self, _req: &Request, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
            let file = match self.handles.file(fh) {
                Some(file) => file,
                None => {
                    reply.error(libc::EBADF);
                    return;
                }
            };

            match self.core.fsync(&file, datasync) {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
            let vpath: String = match self.inodes.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self.core.read_dir_snapshot(&vpath) {
                Ok(entries) => reply.opened(self.handles.insert_dir(entries), 0),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn readdir(
            &mut self,
            _req: &Request,
            ino: u64,
            fh: u64,
            offset: i64,
            mut reply: ReplyDirectory,
        ) {
            let snapshot = match self.handles.dir(fh) {
                Some(entries) => entries,
                None => {
                    reply.error(libc::EBADF);
                    return;
                }
            };
            let vpath: String = match self.inodes.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            let parent_ino: InodeId = self.inodes.get_or_assign(&self.parent_of(&vpath));
            let mut entries: Vec<(InodeId, FileType, String)> = vec![
                (ino, FileType::Directory, ".".to_string()),
                (parent_ino, FileType::Directory, "..".to_string()),
            ];
            for entry in snapshot.iter() {
                let name: String = entry.name.to_string_lossy().into_owned();
                let child: InodeId = self
                    .inodes
                    .get_or_assign(&crate::inode::child_path(&vpath, &name));
                entries.push((child, kind_of(entry.kind), name));
            }

            for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
                if reply.add(*entry_ino, (i + 1) as i64, *kind, name) {
                    break;
                }
            }
            reply.ok();
        }

        fn releasedir(&mut self, _req: &Request, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
            self.handles.remove(fh);
            reply.ok();
        }

        fn fsyncdir(
            &mut self,
            _req: &Request,
            _ino: u64,
            _fh: u64,
            _datasync: bool,
            reply: ReplyEmpty,
        ) {
            reply.ok();
        }

        fn statfs(&mut self, _req: &Request, ino: u64, reply: ReplyStatfs) {
            let vpath: String = match self.inodes.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self.core.statfs(&vpath) {
                Ok(stat) => reply.statfs(
                    stat.f_blocks,
                    stat.f_bfree,
                    stat.f_bavail,
                    stat.f_files,
                    stat.f_ffree,
                    stat.f_bsize as u32,
                    stat.f_namemax as u32,
                    stat.f_frsize as u32,
                ),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
            let vpath: String = match self.inodes.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };

            match self.core.access(&vpath, mask) {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno(&e)),
            }
        }
    }

    fn assemble_mount_options(options: &MountOptions) -> Vec<MountOption> {
        let mut mount_options: Vec<MountOption> = vec![MountOption::FSName("iolens".into())];
        if options.allow_other {
            mount_options.push(MountOption::AllowOther);
        }
        if options.auto_unmount {
            mount_options.push(MountOption::AutoUnmount);
        }
        mount_options
    }

    /// Mount a workload-tracing session, blocking until unmount.
    ///
    /// # Arguments
    /// * `fs` - The adapter to mount
    /// * `mountpoint` - Path to mount at
    /// * `options` - Mount configuration
    pub fn mount_workload(
        fs: WorkloadFuse,
        mountpoint: &Path,
        options: &MountOptions,
    ) -> io::Result<()> {
        fuser::mount2(fs, mountpoint, &assemble_mount_options(options))
    }

    /// Spawn a workload-tracing mount in the background.
    ///
    /// # Arguments
    /// * `fs` - The adapter to mount
    /// * `mountpoint` - Path to mount at
    /// * `options` - Mount configuration
    ///
    /// # Returns
    /// Background session handle.
    pub fn spawn_mount_workload(
        fs: WorkloadFuse,
        mountpoint: &Path,
        options: &MountOptions,
    ) -> io::Result<fuser::BackgroundSession> {
        fuser::spawn_mount2(fs, mountpoint, &assemble_mount_options(options))
    }
}

#[cfg(all(feature = "fuse", target_os = "linux"))]
pub use impl_fuse::{mount_workload, spawn_mount_workload, WorkloadFuse};
