//! Mount configuration.

use std::path::PathBuf;

use serde::Deserialize;

use iolens_common::DEFAULT_JOURNAL_NAME;

/// Configuration options for a mount session.
///
/// Deserializable so the CLI can load it from a JSON file; flags given
/// on the command line override file values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    /// Trace journal location. The session refuses to start if this
    /// file cannot be created.
    pub journal_path: PathBuf,

    /// Attribute cache timeout handed to the kernel, in seconds.
    /// Attributes come straight from the backing filesystem, so a
    /// short timeout keeps them honest.
    pub attr_ttl_secs: u64,

    /// Allow other users to access the mounted view.
    pub allow_other: bool,

    /// Unmount automatically when the process exits.
    pub auto_unmount: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            journal_path: PathBuf::from(DEFAULT_JOURNAL_NAME),
            attr_ttl_secs: 1,
            allow_other: false,
            auto_unmount: true,
        }
    }
}

impl MountOptions {
    /// Set the trace journal location.
    ///
    /// # Arguments
    /// * `journal_path` - File the session journal is written to
    pub fn with_journal_path(mut self, journal_path: impl Into<PathBuf>) -> Self {
        self.journal_path = journal_path.into();
        self
    }

    /// Set the kernel attribute cache timeout.
    ///
    /// # Arguments
    /// * `attr_ttl_secs` - Timeout in seconds
    pub fn with_attr_ttl_secs(mut self, attr_ttl_secs: u64) -> Self {
        self.attr_ttl_secs = attr_ttl_secs;
        self
    }

    /// Allow other users to access the mounted view.
    pub fn with_allow_other(mut self, allow_other: bool) -> Self {
        self.allow_other = allow_other;
        self
    }

    /// Unmount automatically when the process exits.
    pub fn with_auto_unmount(mut self, auto_unmount: bool) -> Self {
        self.auto_unmount = auto_unmount;
        self
    }
}
