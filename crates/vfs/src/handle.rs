//! Open-handle registry.
//!
//! Every FUSE open/opendir allocates a handle id from a monotonic
//! counter; release/releasedir retires it. A file handle owns the open
//! backing descriptor; a directory handle owns the entry snapshot
//! taken at opendir time. Exactly one release pairs with each open.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{File, FileType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Handle identifier as seen by the kernel (`fh`).
pub type HandleId = u64;

/// One directory entry captured in an opendir snapshot.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    /// Entry name within the directory.
    pub name: OsString,
    /// Entry type as reported by the backing filesystem.
    pub kind: FileType,
}

/// Resource owned by an open handle.
#[derive(Debug, Clone)]
pub enum Handle {
    /// Open backing file; shared so positioned I/O can run while the
    /// table lock is released.
    File(Arc<File>),
    /// Directory entry snapshot taken at opendir time.
    Dir(Arc<Vec<DirEntryInfo>>),
}

/// fh -> open resource registry for one session.
#[derive(Debug)]
pub struct HandleTable {
    next_handle: AtomicU64,
    open: RwLock<HashMap<HandleId, Handle>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            open: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, handle: Handle) -> HandleId {
        let fh: HandleId = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.open
            .write()
            .expect("handle table poisoned")
            .insert(fh, handle);
        fh
    }

    /// Register an open backing file.
    ///
    /// # Arguments
    /// * `file` - Backing descriptor returned by open/create
    pub fn insert_file(&self, file: File) -> HandleId {
        self.insert(Handle::File(Arc::new(file)))
    }

    /// Register a directory entry snapshot.
    ///
    /// # Arguments
    /// * `entries` - Entries captured at opendir time
    pub fn insert_dir(&self, entries: Vec<DirEntryInfo>) -> HandleId {
        self.insert(Handle::Dir(Arc::new(entries)))
    }

    /// Get the backing file behind a handle.
    ///
    /// # Arguments
    /// * `fh` - Handle id from the kernel
    pub fn file(&self, fh: HandleId) -> Option<Arc<File>> {
        match self.open.read().expect("handle table poisoned").get(&fh) {
            Some(Handle::File(file)) => Some(file.clone()),
            _ => None,
        }
    }

    /// Get the directory snapshot behind a handle.
    ///
    /// # Arguments
    /// * `fh` - Handle id from the kernel
    pub fn dir(&self, fh: HandleId) -> Option<Arc<Vec<DirEntryInfo>>> {
        match self.open.read().expect("handle table poisoned").get(&fh) {
            Some(Handle::Dir(entries)) => Some(entries.clone()),
            _ => None,
        }
    }

    /// Retire a handle, dropping its resource.
    ///
    /// # Arguments
    /// * `fh` - Handle id from the kernel
    pub fn remove(&self, fh: HandleId) -> Option<Handle> {
        self.open.write().expect("handle table poisoned").remove(&fh)
    }
}
