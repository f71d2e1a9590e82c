// SPDX-License-Identifier: Apache-2.0

//! Backend driven by OS change notifications through `notify` (inotify,
//! FSEvents, ReadDirectoryChangesW).
//!
//! The parent directory is watched rather than the file so that a file which
//! is deleted or rotated away and then recreated keeps producing events.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

use super::traits::{Change, FileWatcher, WatcherError};

pub struct NativeWatcher {
    path: PathBuf,
    /// Directory as registered and as canonicalized; event paths may use either
    dir: PathBuf,
    canonical_dir: Option<PathBuf>,
    name: OsString,
    events: Receiver<notify::Result<Event>>,
    // Dropping the watcher stops notifications
    _watcher: RecommendedWatcher,
}

impl NativeWatcher {
    pub fn new(path: impl Into<PathBuf>, debounce: Duration) -> Result<Self, WatcherError> {
        let path = path.into();
        let name = path
            .file_name()
            .ok_or_else(|| WatcherError::Watch {
                path: path.clone(),
                reason: "path has no file name".into(),
            })?
            .to_os_string();
        let dir = parent_dir(&path);

        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default().with_poll_interval(debounce),
        )
        .map_err(WatcherError::Init)?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatcherError::Watch {
                path: dir.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            canonical_dir: dir.canonicalize().ok(),
            path,
            dir,
            name,
            events: rx,
            _watcher: watcher,
        })
    }

    fn is_watched_file(&self, path: &Path) -> bool {
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            return false;
        };
        if name != self.name {
            return false;
        }
        dir == self.dir
            || (self.canonical_dir.is_some()
                && dir.canonicalize().ok() == self.canonical_dir)
    }

    fn classify(&self, event: Event) -> Option<Change> {
        if !event.paths.iter().any(|p| self.is_watched_file(p)) {
            return None;
        }
        match event.kind {
            EventKind::Create(_) => Some(Change::Created),
            EventKind::Modify(_) => Some(Change::Written),
            EventKind::Remove(_) => Some(Change::Removed),
            EventKind::Access(_) => None,
            EventKind::Any | EventKind::Other => Some(Change::Other),
        }
    }
}

/// Directory to register for a file path. A bare file name lives in the
/// current directory.
pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl FileWatcher for NativeWatcher {
    fn path(&self) -> &Path {
        &self.path
    }

    fn wait(&mut self, timeout: Duration) -> Result<Vec<Change>, WatcherError> {
        let first = match self.events.recv_timeout(timeout) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => return Err(WatcherError::Disconnected),
        };

        let mut changes = Vec::new();
        for res in std::iter::once(first).chain(self.events.try_iter()) {
            match res {
                Ok(event) => changes.extend(self.classify(event)),
                Err(e) => warn!(path = ?self.path, error = %e, "File watcher error"),
            }
        }
        Ok(changes)
    }

    fn is_native(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        if cfg!(target_os = "linux") {
            "inotify"
        } else if cfg!(target_os = "macos") {
            "FSEvents"
        } else if cfg!(target_os = "windows") {
            "ReadDirectoryChangesW"
        } else {
            "native"
        }
    }
}
