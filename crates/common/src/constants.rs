//! Shared constants used across iolens crates.

/// Largest read fragment the kernel dispatches per call (32 * 4096 bytes).
/// One application-level read arrives as a sequence of calls no larger
/// than this.
pub const READ_CHUNK_CEILING: u64 = 131072;

/// Largest write fragment the kernel dispatches per call.
pub const WRITE_CHUNK_CEILING: u64 = 4096;

/// Upper bound for a resolved backing path, in bytes.
/// Resolution fails with `PathError::PathTooLong` beyond this.
pub const MAX_RESOLVED_PATH_BYTES: usize = 4096;

/// Default trace journal file name, created in the working directory.
pub const DEFAULT_JOURNAL_NAME: &str = "analysis.log";
