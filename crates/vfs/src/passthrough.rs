//! Passthrough operation core.
//!
//! One method per filesystem operation, each resolving the virtual
//! path against the backing root and delegating to the backing
//! filesystem's equivalent primitive. The filesystem adds no semantics
//! of its own: results, including errors, surface to the caller
//! untouched and are never retried.
//!
//! Read and write are the only instrumented operations. The kernel
//! fragments one application-level request into bounded fixed-size
//! calls; a fragment arriving at offset 0 is taken as the start of a
//! new logical transaction and is counted and journaled. Every
//! fragment adds its requested size to the byte counters.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use iolens_common::{resolve_backing, PathError};

use crate::handle::DirEntryInfo;
use crate::journal::{JournalError, TraceJournal};
use crate::report;
use crate::stats::WorkloadStats;

/// Convert a resolved path to a C string for direct syscalls.
fn to_cstring(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

/// Convert an optional timestamp to a timespec, omitting when absent.
fn to_timespec(time: Option<SystemTime>) -> libc::timespec {
    match time {
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        Some(time) => match time.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(since) => libc::timespec {
                tv_sec: since.as_secs() as libc::time_t,
                tv_nsec: since.subsec_nanos() as libc::c_long,
            },
            Err(before) => libc::timespec {
                tv_sec: -(before.duration().as_secs() as libc::time_t),
                tv_nsec: 0,
            },
        },
    }
}

/// Workload-tracing passthrough over a backing directory tree.
///
/// Owns the session state: the immutable backing root, the shared
/// counters and the trace journal. All methods take `&self`; the
/// kernel may dispatch them from one thread or many.
pub struct WorkloadFs {
    backing_root: PathBuf,
    stats: Arc<WorkloadStats>,
    journal: Arc<TraceJournal>,
}

impl WorkloadFs {
    /// Create the passthrough core for one mount session.
    ///
    /// # Arguments
    /// * `backing_root` - Canonicalized directory the mount overlays
    /// * `stats` - Zero-initialized session counters
    /// * `journal` - Already-open session journal
    pub fn new(
        backing_root: PathBuf,
        stats: Arc<WorkloadStats>,
        journal: Arc<TraceJournal>,
    ) -> Self {
        Self {
            backing_root,
            stats,
            journal,
        }
    }

    /// The backing root this session overlays.
    pub fn backing_root(&self) -> &Path {
        &self.backing_root
    }

    /// Shared session counters.
    pub fn stats(&self) -> &Arc<WorkloadStats> {
        &self.stats
    }

    /// Session trace journal.
    pub fn journal(&self) -> &Arc<TraceJournal> {
        &self.journal
    }

    /// Resolve a virtual path to its backing path.
    ///
    /// # Errors
    /// An over-long result maps to `ENAMETOOLONG`.
    pub fn resolve(&self, vpath: &str) -> io::Result<PathBuf> {
        resolve_backing(&self.backing_root, vpath).map_err(|e: PathError| match e {
            PathError::PathTooLong { .. } => io::Error::from_raw_os_error(libc::ENAMETOOLONG),
            other => io::Error::new(io::ErrorKind::InvalidInput, other.to_string()),
        })
    }

    // ------------------------------------------------------------------
    // Instrumented transfers
    // ------------------------------------------------------------------

    /// Read one fragment from an open backing file.
    ///
    /// Positioned read: the shared file position never moves, so one
    /// handle can serve concurrent fragments at different offsets.
    ///
    /// # Arguments
    /// * `file` - Backing descriptor for the open file
    /// * `vpath` - Virtual path, used for the journal line
    /// * `offset` - Fragment offset within the file
    /// * `size` - Requested fragment size
    pub fn read(&self, file: &File, vpath: &str, offset: u64, size: u32) -> io::Result<Vec<u8>> {
        if offset == 0 {
            self.stats.count_read_op();
            self.journal_event(&format!(
                "read(path=\"{vpath}\", size={size}, offset={offset})"
            ));
        }
        // Requested size is counted, transferred size is not.
        self.stats.add_read_bytes(u64::from(size));

        let mut buf: Vec<u8> = vec![0u8; size as usize];
        let n: usize = file.read_at(&mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Write one fragment to an open backing file.
    ///
    /// # Arguments
    /// * `file` - Backing descriptor for the open file
    /// * `vpath` - Virtual path, used for the journal line
    /// * `offset` - Fragment offset within the file
    /// * `data` - Fragment payload
    pub fn write(&self, file: &File, vpath: &str, offset: u64, data: &[u8]) -> io::Result<usize> {
        let size: usize = data.len();
        if offset == 0 {
            self.stats.count_write_op();
            self.journal_event(&format!(
                "write(path=\"{vpath}\", size={size}, offset={offset})"
            ));
        }
        self.stats.add_write_bytes(size as u64);

        file.write_at(data, offset)
    }

    fn journal_event(&self, event: &str) {
        if let Err(e) = self.journal.emit_event(event) {
            tracing::warn!("Trace journal write failed: {e}");
        }
    }

    // ------------------------------------------------------------------
    // Open file lifecycle
    // ------------------------------------------------------------------

    /// Open a backing file with the caller's flags.
    ///
    /// # Arguments
    /// * `vpath` - Virtual path of the file
    /// * `flags` - Open flags as dispatched by the kernel
    pub fn open(&self, vpath: &str, flags: i32) -> io::Result<File> {
        let path: PathBuf = self.resolve(vpath)?;
        let mut options: OpenOptions = OpenOptions::new();
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => {
                options.read(true);
            }
            libc::O_WRONLY => {
                options.write(true);
            }
            libc::O_RDWR => {
                options.read(true).write(true);
            }
            _ => return Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
        options.custom_flags(flags & !libc::O_ACCMODE);
        options.open(&path)
    }

    /// Create and open a backing file.
    ///
    /// # Arguments
    /// * `vpath` - Virtual path of the new file
    /// * `flags` - Open flags as dispatched by the kernel
    /// * `mode` - Permission bits for the new file
    pub fn create(&self, vpath: &str, flags: i32, mode: u32) -> io::Result<File> {
        let path: PathBuf = self.resolve(vpath)?;
        let mut options: OpenOptions = OpenOptions::new();
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => {
                options.read(true);
            }
            libc::O_WRONLY => {
                options.write(true);
            }
            libc::O_RDWR => {
                options.read(true).write(true);
            }
            _ => return Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
        options.create(true).mode(mode & 0o7777);
        options.custom_flags(flags & !(libc::O_ACCMODE | libc::O_CREAT));
        options.open(&path)
    }

    /// Synchronize an open backing file.
    ///
    /// # Arguments
    /// * `file` - Backing descriptor
    /// * `datasync` - Skip metadata when true
    pub fn fsync(&self, file: &File, datasync: bool) -> io::Result<()> {
        if datasync {
            file.sync_data()
        } else {
            file.sync_all()
        }
    }

    /// Flush on close: nothing to do, data already sits in the backing
    /// filesystem.
    pub fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    /// Change the size of an open backing file.
    ///
    /// # Arguments
    /// * `file` - Backing descriptor
    /// * `size` - New file size
    pub fn truncate_handle(&self, file: &File, size: u64) -> io::Result<()> {
        file.set_len(size)
    }

    // ------------------------------------------------------------------
    // Metadata passthrough
    // ------------------------------------------------------------------

    /// Get attributes without following a final symlink.
    pub fn getattr(&self, vpath: &str) -> io::Result<fs::Metadata> {
        fs::symlink_metadata(self.resolve(vpath)?)
    }

    /// Read the target of a symbolic link.
    pub fn readlink(&self, vpath: &str) -> io::Result<PathBuf> {
        fs::read_link(self.resolve(vpath)?)
    }

    /// Create a file node.
    ///
    /// Regular files are created exclusively; FIFOs and device nodes
    /// go through the matching syscall.
    ///
    /// # Arguments
    /// * `vpath` - Virtual path of the node
    /// * `mode` - File type and permission bits
    /// * `rdev` - Device number for device nodes
    pub fn mknod(&self, vpath: &str, mode: u32, rdev: u64) -> io::Result<()> {
        let path: PathBuf = self.resolve(vpath)?;
        match mode & libc::S_IFMT {
            libc::S_IFREG => {
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(mode & 0o7777)
                    .open(&path)?;
                Ok(())
            }
            libc::S_IFIFO => {
                let c_path: CString = to_cstring(&path)?;
                let ret: libc::c_int =
                    unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
                if ret == 0 {
                    Ok(())
                } else {
                    Err(io::Error::last_os_error())
                }
            }
            _ => {
                let c_path: CString = to_cstring(&path)?;
                let ret: libc::c_int = unsafe {
                    libc::mknod(c_path.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t)
                };
                if ret == 0 {
                    Ok(())
                } else {
                    Err(io::Error::last_os_error())
                }
            }
        }
    }

    /// Create a directory.
    pub fn mkdir(&self, vpath: &str, mode: u32) -> io::Result<()> {
        let path: PathBuf = self.resolve(vpath)?;
        fs::DirBuilder::new().mode(mode).create(&path)
    }

    /// Remove a file.
    pub fn unlink(&self, vpath: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(vpath)?)
    }

    /// Remove a directory.
    pub fn rmdir(&self, vpath: &str) -> io::Result<()> {
        fs::remove_dir(self.resolve(vpath)?)
    }

    /// Create a symbolic link at `vpath` pointing at `target`.
    ///
    /// The target is stored verbatim; only the link location is
    /// resolved against the backing root.
    ///
    /// # Arguments
    /// * `target` - Link target, kept as given
    /// * `vpath` - Virtual path where the link is created
    pub fn symlink(&self, target: &Path, vpath: &str) -> io::Result<()> {
        std::os::unix::fs::symlink(target, self.resolve(vpath)?)
    }

    /// Rename a file or directory.
    pub fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.resolve(from)?, self.resolve(to)?)
    }

    /// Create a hard link.
    ///
    /// # Arguments
    /// * `existing` - Virtual path of the existing file
    /// * `new` - Virtual path of the new link
    pub fn link(&self, existing: &str, new: &str) -> io::Result<()> {
        fs::hard_link(self.resolve(existing)?, self.resolve(new)?)
    }

    /// Change permission bits.
    pub fn chmod(&self, vpath: &str, mode: u32) -> io::Result<()> {
        fs::set_permissions(self.resolve(vpath)?, fs::Permissions::from_mode(mode))
    }

    /// Change owner and group.
    pub fn chown(&self, vpath: &str, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        std::os::unix::fs::chown(self.resolve(vpath)?, uid, gid)
    }

    /// Change the size of a file by path.
    pub fn truncate(&self, vpath: &str, size: u64) -> io::Result<()> {
        let file: File = OpenOptions::new().write(true).open(self.resolve(vpath)?)?;
        file.set_len(size)
    }

    /// Change access and modification times.
    ///
    /// # Arguments
    /// * `vpath` - Virtual path of the file
    /// * `atime` - New access time, untouched when `None`
    /// * `mtime` - New modification time, untouched when `None`
    pub fn utimens(
        &self,
        vpath: &str,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> io::Result<()> {
        let c_path: CString = to_cstring(&self.resolve(vpath)?)?;
        let times: [libc::timespec; 2] = [to_timespec(atime), to_timespec(mtime)];
        let ret: libc::c_int =
            unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Get statistics of the backing filesystem.
    pub fn statfs(&self, vpath: &str) -> io::Result<libc::statvfs> {
        let c_path: CString = to_cstring(&self.resolve(vpath)?)?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let ret: libc::c_int = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if ret == 0 {
            Ok(stat)
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Check access permissions.
    ///
    /// # Arguments
    /// * `vpath` - Virtual path of the file
    /// * `mask` - Access mask as dispatched by the kernel
    pub fn access(&self, vpath: &str, mask: i32) -> io::Result<()> {
        let c_path: CString = to_cstring(&self.resolve(vpath)?)?;
        let ret: libc::c_int = unsafe { libc::access(c_path.as_ptr(), mask) };
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Snapshot the entries of a backing directory.
    ///
    /// Taken once at opendir time; readdir serves from the snapshot.
    pub fn read_dir_snapshot(&self, vpath: &str) -> io::Result<Vec<DirEntryInfo>> {
        let path: PathBuf = self.resolve(vpath)?;
        let mut entries: Vec<DirEntryInfo> = Vec::new();
        for entry in fs::read_dir(&path)? {
            let entry: fs::DirEntry = entry?;
            entries.push(DirEntryInfo {
                name: entry.file_name(),
                kind: entry.file_type()?,
            });
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Write the session summary through the journal.
    ///
    /// Called exactly once, at unmount; no counters are accepted after
    /// this point.
    pub fn write_summary(&self) -> Result<(), JournalError> {
        report::write_summary(&self.journal, &self.stats.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_fs(backing: &Path, journal_dir: &Path) -> WorkloadFs {
        WorkloadFs::new(
            backing.to_path_buf(),
            Arc::new(WorkloadStats::new()),
            Arc::new(TraceJournal::create(&journal_dir.join("trace.log")).unwrap()),
        )
    }

    #[test]
    fn test_over_long_path_maps_to_enametoolong() {
        let dir = tempfile::tempdir().unwrap();
        let fs: WorkloadFs = test_fs(dir.path(), dir.path());

        let long: String = format!("/{}", "x".repeat(8192));
        let err: io::Error = fs.getattr(&long).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENAMETOOLONG));
    }

    #[test]
    fn test_backing_errors_surface_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let fs: WorkloadFs = test_fs(dir.path(), dir.path());

        let err: io::Error = fs.getattr("/missing").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_open_honors_access_mode() {
        let dir = tempfile::tempdir().unwrap();
        let journal_dir = tempfile::tempdir().unwrap();
        let fs: WorkloadFs = test_fs(dir.path(), journal_dir.path());

        std::fs::write(dir.path().join("f"), b"content").unwrap();

        let read_only: File = fs.open("/f", libc::O_RDONLY).unwrap();
        assert!(fs.write(&read_only, "/f", 0, b"x").is_err());

        let writable: File = fs.open("/f", libc::O_WRONLY).unwrap();
        assert_eq!(fs.write(&writable, "/f", 0, b"x").unwrap(), 1);
    }

    #[test]
    fn test_read_is_positioned() {
        let dir = tempfile::tempdir().unwrap();
        let journal_dir = tempfile::tempdir().unwrap();
        let fs: WorkloadFs = test_fs(dir.path(), journal_dir.path());

        std::fs::write(dir.path().join("f"), b"0123456789").unwrap();
        let file: File = fs.open("/f", libc::O_RDONLY).unwrap();

        // Out-of-order offsets work because the file position never moves.
        assert_eq!(fs.read(&file, "/f", 5, 5).unwrap(), b"56789");
        assert_eq!(fs.read(&file, "/f", 0, 5).unwrap(), b"01234");
        assert_eq!(fs.read(&file, "/f", 5, 5).unwrap(), b"56789");
    }

    #[test]
    fn test_metadata_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let journal_dir = tempfile::tempdir().unwrap();
        let fs: WorkloadFs = test_fs(dir.path(), journal_dir.path());

        fs.mkdir("/d", 0o755).unwrap();
        assert!(fs.getattr("/d").unwrap().is_dir());

        fs.create("/d/f", libc::O_WRONLY, 0o644).unwrap();
        fs.rename("/d/f", "/d/g").unwrap();
        assert!(fs.getattr("/d/f").is_err());
        fs.truncate("/d/g", 42).unwrap();
        assert_eq!(fs.getattr("/d/g").unwrap().len(), 42);

        let names: Vec<_> = fs
            .read_dir_snapshot("/d")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("g")]);

        fs.unlink("/d/g").unwrap();
        fs.rmdir("/d").unwrap();
        assert!(fs.getattr("/d").is_err());
    }

    #[test]
    fn test_symlink_target_kept_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let journal_dir = tempfile::tempdir().unwrap();
        let fs: WorkloadFs = test_fs(dir.path(), journal_dir.path());

        fs.symlink(Path::new("../outside/target"), "/l").unwrap();
        assert_eq!(
            fs.readlink("/l").unwrap(),
            PathBuf::from("../outside/target")
        );
    }
}
