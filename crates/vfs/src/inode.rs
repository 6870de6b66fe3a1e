//! Inode registry mapping FUSE inode numbers to virtual paths.
//!
//! The kernel addresses files by inode number while the passthrough
//! core works on virtual paths, so the adapter keeps a bidirectional
//! registry. It is purely a translation layer: entries carry no file
//! state, and the backing filesystem remains the source of truth for
//! existence and attributes.

use std::collections::HashMap;
use std::sync::RwLock;

/// Inode identifier as seen by the kernel.
pub type InodeId = u64;

/// Inode number of the mount root, fixed by the FUSE protocol.
pub const ROOT_INODE: InodeId = 1;

/// Build the virtual path of a directory entry.
///
/// # Arguments
/// * `parent_path` - Virtual path of the containing directory
/// * `name` - Entry name within the directory
pub fn child_path(parent_path: &str, name: &str) -> String {
    if parent_path == "/" {
        format!("/{name}")
    } else {
        format!("{parent_path}/{name}")
    }
}

#[derive(Debug)]
struct Inner {
    by_id: HashMap<InodeId, String>,
    by_path: HashMap<String, InodeId>,
    next_id: InodeId,
}

/// Bidirectional ino <-> virtual path registry.
///
/// The root inode is pre-registered as `/`. Inode numbers are stable
/// for the lifetime of a path: looking the same path up twice yields
/// the same number.
#[derive(Debug)]
pub struct InodeTable {
    inner: RwLock<Inner>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut by_id: HashMap<InodeId, String> = HashMap::new();
        let mut by_path: HashMap<String, InodeId> = HashMap::new();
        by_id.insert(ROOT_INODE, "/".to_string());
        by_path.insert("/".to_string(), ROOT_INODE);

        Self {
            inner: RwLock::new(Inner {
                by_id,
                by_path,
                next_id: ROOT_INODE + 1,
            }),
        }
    }

    /// Get the virtual path registered for an inode.
    ///
    /// # Arguments
    /// * `ino` - Inode number from the kernel
    pub fn path_of(&self, ino: InodeId) -> Option<String> {
        self.inner.read().expect("inode table poisoned").by_id.get(&ino).cloned()
    }

    /// Build the virtual path of a child of a registered directory.
    ///
    /// # Arguments
    /// * `parent` - Inode of the containing directory
    /// * `name` - Entry name within the directory
    ///
    /// # Returns
    /// The child's virtual path, or `None` if the parent is unknown.
    pub fn child_of(&self, parent: InodeId, name: &str) -> Option<String> {
        self.path_of(parent).map(|p: String| child_path(&p, name))
    }

    /// Register a virtual path, reusing its inode if already known.
    ///
    /// # Arguments
    /// * `path` - Virtual path to register
    pub fn get_or_assign(&self, path: &str) -> InodeId {
        let mut inner = self.inner.write().expect("inode table poisoned");
        if let Some(id) = inner.by_path.get(path) {
            return *id;
        }
        let id: InodeId = inner.next_id;
        inner.next_id += 1;
        inner.by_id.insert(id, path.to_string());
        inner.by_path.insert(path.to_string(), id);
        id
    }

    /// Drop the registration for a removed path, if any.
    ///
    /// # Arguments
    /// * `path` - Virtual path that was unlinked or removed
    pub fn forget_path(&self, path: &str) {
        let mut inner = self.inner.write().expect("inode table poisoned");
        if let Some(id) = inner.by_path.remove(path) {
            inner.by_id.remove(&id);
        }
    }

    /// Re-register a renamed path, carrying descendants along.
    ///
    /// Inode numbers survive the rename; only the path side of the
    /// mapping changes. A pre-existing registration at the destination
    /// is dropped, matching rename-over semantics.
    ///
    /// # Arguments
    /// * `from` - Old virtual path
    /// * `to` - New virtual path
    pub fn rename_path(&self, from: &str, to: &str) {
        let mut inner = self.inner.write().expect("inode table poisoned");

        if let Some(id) = inner.by_path.remove(to) {
            inner.by_id.remove(&id);
        }

        let prefix: String = format!("{from}/");
        let moved: Vec<(String, InodeId)> = inner
            .by_path
            .iter()
            .filter(|(path, _)| path.as_str() == from || path.starts_with(&prefix))
            .map(|(path, id)| (path.clone(), *id))
            .collect();

        for (old_path, id) in moved {
            let new_path: String = format!("{to}{}", &old_path[from.len()..]);
            inner.by_path.remove(&old_path);
            inner.by_path.insert(new_path.clone(), id);
            inner.by_id.insert(id, new_path);
        }
    }
}
