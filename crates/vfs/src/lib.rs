//! Workload-tracing passthrough filesystem for iolens.
//!
//! This crate mirrors a backing directory tree through a virtual mount
//! point, forwarding every operation unchanged while reconstructing
//! the logical I/O transactions applications requested from the
//! kernel's fragmented call stream. The trace ends with an aggregate
//! workload summary at unmount.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: FUSE Interface (fuser::Filesystem impl, `fuse` feature)
//! Layer 2: Passthrough operations (WorkloadFs)
//! Layer 1: Primitives (InodeTable, HandleTable, WorkloadStats, TraceJournal)
//! ```

pub mod fuse_host;
pub mod handle;
pub mod inode;
pub mod journal;
pub mod options;
pub mod passthrough;
pub mod report;
pub mod stats;

pub use handle::{DirEntryInfo, Handle, HandleTable};
pub use inode::{InodeId, InodeTable, ROOT_INODE};
pub use journal::{JournalError, TraceJournal};
pub use options::MountOptions;
pub use passthrough::WorkloadFs;
pub use report::{format_summary, write_summary};
pub use stats::{WorkloadSnapshot, WorkloadStats};

#[cfg(all(feature = "fuse", target_os = "linux"))]
pub use fuse_host::{mount_workload, spawn_mount_workload, WorkloadFuse};
