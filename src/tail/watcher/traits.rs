// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("watcher initialization failed: {0}")]
    Init(#[source] notify::Error),

    #[error("cannot watch {path:?}: {reason}")]
    Watch { path: PathBuf, reason: String },

    #[error("notification channel disconnected")]
    Disconnected,
}

/// What a backend saw happen to the watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// The path appeared, or now names a different file than before
    Created,
    /// Content or size changed
    Written,
    /// The path no longer exists
    Removed,
    /// Anything else, e.g. a metadata update
    Other,
}

/// Wakes a tailer when its file may have changed.
///
/// Changes are hints only. The tailer re-reads the file after every wakeup, so
/// a backend may report spurious or coalesced changes.
pub trait FileWatcher {
    /// The watched file
    fn path(&self) -> &Path;

    /// Block for at most `timeout` waiting for changes. Returns an empty vector
    /// on timeout.
    fn wait(&mut self, timeout: Duration) -> Result<Vec<Change>, WatcherError>;

    /// True for inotify/kqueue/FSEvents backends
    fn is_native(&self) -> bool;

    fn backend_name(&self) -> &'static str;
}
