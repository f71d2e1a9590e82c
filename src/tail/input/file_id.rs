// SPDX-License-Identifier: Apache-2.0

//! File identity based on device and inode.
//!
//! A path whose identity changes between two polls was deleted and recreated
//! (or rotated away and replaced), even when its size alone looks plausible.

use std::fs::{File, Metadata};
use std::io;
use std::path::Path;

/// Device ID + inode number of a file.
///
/// On platforms without inodes both fields are zero, so identity changes are
/// never reported and rotation detection relies on size regression alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> Self {
        Self { dev: 0, ino: 0 }
    }

    /// Create a FileId from an open file handle.
    pub fn from_file(file: &File) -> io::Result<Self> {
        Ok(Self::from_metadata(&file.metadata()?))
    }

    /// Create a FileId from a path without opening the file.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::from_metadata(&std::fs::metadata(path)?))
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}
