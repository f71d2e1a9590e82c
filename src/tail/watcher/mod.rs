// SPDX-License-Identifier: Apache-2.0

//! Change-notification backends that wake a tailer when its file changes.
//!
//! A native backend reacts to OS notifications within milliseconds. The poll
//! backend stats the file on an interval and is the fallback for network file
//! systems and platforms where notifications cannot be set up.

mod native;
mod poll;
mod traits;

pub use native::NativeWatcher;
pub use poll::PollWatcher;
pub use traits::{Change, FileWatcher, WatcherError};

use std::path::Path;
use std::time::Duration;

use tracing::warn;

/// A boxed backend that can be moved onto a tailer thread
pub type AnyWatcher = Box<dyn FileWatcher + Send>;

/// Which backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchMode {
    /// Native notifications, polling if they cannot be set up
    #[default]
    Auto,
    /// Native notifications only; creating a tailer fails without them
    Native,
    /// Stat the file every poll interval
    Poll,
}

/// Configuration for the file watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Watch mode: auto, native, or poll
    pub mode: WatchMode,
    /// Poll interval when using poll mode
    pub poll_interval: Duration,
    /// Debounce interval for native events to batch rapid changes
    pub debounce_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Auto,
            poll_interval: Duration::from_millis(250),
            debounce_interval: Duration::from_millis(100),
        }
    }
}

/// Create the backend for one file.
///
/// `Auto` falls back to polling when the native backend cannot initialize or
/// cannot watch the file's directory.
pub fn create_watcher(config: &WatcherConfig, path: &Path) -> Result<AnyWatcher, WatcherError> {
    let poll = || Box::new(PollWatcher::new(path, config.poll_interval)) as AnyWatcher;
    match config.mode {
        WatchMode::Native => Ok(Box::new(NativeWatcher::new(path, config.debounce_interval)?)),
        WatchMode::Poll => Ok(poll()),
        WatchMode::Auto => match NativeWatcher::new(path, config.debounce_interval) {
            Ok(watcher) => Ok(Box::new(watcher)),
            Err(e) => {
                warn!(path = ?path, error = %e, "Native file watching unavailable, falling back to polling");
                Ok(poll())
            }
        },
    }
}
