// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::tail::watcher::WatcherError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("namespace {namespace} is unreadable: {source}")]
    NamespaceUnreadable {
        namespace: String,
        #[source]
        source: io::Error,
    },

    #[error("transient read error on {path:?}: {source}")]
    TransientRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("file gone: {0:?}")]
    FileGone(PathBuf),

    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("tail engine is shutting down")]
    Shutdown,
}

impl Error {
    /// Whether the failure is scoped to one poll cycle and should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientRead { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
