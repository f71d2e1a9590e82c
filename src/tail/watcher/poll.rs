// SPDX-License-Identifier: Apache-2.0

//! Stat-based backend for file systems without change notifications (NFS,
//! SMB, some container overlays).

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use super::traits::{Change, FileWatcher, WatcherError};
use crate::tail::input::FileId;

/// What one `stat` of the watched path returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    id: FileId,
    len: u64,
    modified: Option<SystemTime>,
}

impl Snapshot {
    fn take(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        Some(Self {
            id: FileId::from_metadata(&metadata),
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

pub struct PollWatcher {
    path: PathBuf,
    interval: Duration,
    last: Option<Snapshot>,
    next_scan: Instant,
}

impl PollWatcher {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        let path = path.into();
        let last = Snapshot::take(&path);
        Self {
            path,
            interval,
            last,
            next_scan: Instant::now() + interval,
        }
    }

    fn scan(&mut self) -> Option<Change> {
        let current = Snapshot::take(&self.path);
        let change = match (self.last, current) {
            (None, None) => None,
            (None, Some(_)) => Some(Change::Created),
            (Some(_), None) => Some(Change::Removed),
            (Some(old), Some(new)) if old.id != new.id => Some(Change::Created),
            (Some(old), Some(new)) if old != new => Some(Change::Written),
            _ => None,
        };
        self.last = current;
        change
    }
}

impl FileWatcher for PollWatcher {
    fn path(&self) -> &Path {
        &self.path
    }

    fn wait(&mut self, timeout: Duration) -> Result<Vec<Change>, WatcherError> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= self.next_scan {
                self.next_scan = now + self.interval;
                if let Some(change) = self.scan() {
                    return Ok(vec![change]);
                }
            }
            if now >= deadline {
                return Ok(Vec::new());
            }
            thread::sleep(self.next_scan.min(deadline).saturating_duration_since(now));
        }
    }

    fn is_native(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "poll"
    }
}
