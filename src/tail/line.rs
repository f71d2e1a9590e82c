// SPDX-License-Identifier: Apache-2.0

//! Namespace and line types shared by every part of the tail engine.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Routing key for one watched file. The path is used verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self(namespace.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The file this namespace refers to.
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Namespace {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One complete line read from a file, without its terminator.
///
/// Cloning is cheap: fan-out to many subscribers shares the same allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Line(Arc<str>);

impl Line {
    pub fn new(line: impl Into<Arc<str>>) -> Self {
        Self(line.into())
    }

    /// Build a line from raw bytes. Invalid UTF-8 is replaced and a trailing
    /// carriage return is dropped.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        Self(Arc::from(String::from_utf8_lossy(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Line {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq<&str> for Line {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_from_bytes_strips_carriage_return() {
        assert_eq!(Line::from_bytes(b"hello\r"), "hello");
        assert_eq!(Line::from_bytes(b"hello"), "hello");
        assert_eq!(Line::from_bytes(b""), "");
    }

    #[test]
    fn test_line_from_bytes_lossy() {
        let line = Line::from_bytes(&[b'a', 0xff, b'b']);
        assert_eq!(line.as_str(), "a\u{fffd}b");
    }

    #[test]
    fn test_line_serializes_as_string() {
        let json = serde_json::to_string(&Line::from("GET /index.html")).unwrap();
        assert_eq!(json, "\"GET /index.html\"");
    }

    #[test]
    fn test_namespace_path() {
        let ns = Namespace::from("/var/log/app.log");
        assert_eq!(ns.as_path(), Path::new("/var/log/app.log"));
        assert_eq!(ns.to_string(), "/var/log/app.log");
    }
}
