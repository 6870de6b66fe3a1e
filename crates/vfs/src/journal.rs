//! Append-only trace journal.
//!
//! One journal exists per mount session. It is opened before the first
//! operation is served and every line is flushed as it is written, so
//! a crash loses at most the line being formatted. Event lines carry a
//! local-time prefix; the summary block at teardown goes through the
//! same sink.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use thiserror::Error;

/// Format of the local-time prefix on event lines.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors from the trace journal.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The journal file could not be created at session start.
    /// Fatal: the session must not serve operations without a sink.
    #[error("Cannot create trace journal at {path}: {message}")]
    Create {
        /// Requested journal path.
        path: String,
        /// Error message.
        message: String,
    },

    /// A line could not be written or flushed.
    #[error("Cannot write to trace journal: {message}")]
    Write {
        /// Error message.
        message: String,
    },
}

/// Line-flushed append-only text sink for one session.
///
/// Emission is serialized through a mutex so concurrent callers never
/// interleave within a line.
#[derive(Debug)]
pub struct TraceJournal {
    sink: Mutex<File>,
}

impl TraceJournal {
    /// Open the journal sink, truncating any previous session's file.
    ///
    /// Called exactly once per session, before any operation is served.
    ///
    /// # Arguments
    /// * `path` - Journal file location
    ///
    /// # Errors
    /// Returns `JournalError::Create` if the file cannot be created;
    /// the caller must treat this as fatal.
    pub fn create(path: &Path) -> Result<Self, JournalError> {
        let file: File = File::create(path).map_err(|e| JournalError::Create {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            sink: Mutex::new(file),
        })
    }

    /// Append one line and flush it immediately.
    ///
    /// # Arguments
    /// * `line` - Line content without trailing newline
    pub fn emit(&self, line: &str) -> Result<(), JournalError> {
        let mut sink = self.sink.lock().expect("journal mutex poisoned");
        writeln!(sink, "{line}").map_err(|e| JournalError::Write {
            message: e.to_string(),
        })?;
        sink.flush().map_err(|e| JournalError::Write {
            message: e.to_string(),
        })
    }

    /// Append one operation event line with a local-time prefix.
    ///
    /// # Arguments
    /// * `event` - Event description, e.g. `read(path="/f", size=4096, offset=0)`
    pub fn emit_event(&self, event: &str) -> Result<(), JournalError> {
        let stamp = Local::now().format(TIMESTAMP_FORMAT);
        self.emit(&format!("{stamp} : {event}"))
    }
}
