// SPDX-License-Identifier: Apache-2.0

//! Newline-delimited JSON messages exchanged with tail clients.
//!
//! Every message is one JSON object on its own line with a `type` field.
//! The client sends a single `subscribe`; the server answers with `options`,
//! then `backlog`, then `line` events until it sends `closed` or `error`.

use serde::{Deserialize, Serialize};

use crate::server::error::{Result, ServerError};
use crate::tail::{CloseReason, Line, Namespace};

/// Client → server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { namespace: Namespace },
}

/// Server → client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Greeting; how many lines the client should keep on screen
    Options { lines: usize },
    /// Buffered lines at subscribe time, oldest first. Sent once.
    Backlog {
        namespace: Namespace,
        lines: Vec<Line>,
    },
    Line { namespace: Namespace, line: Line },
    Heartbeat,
    /// The request failed; the connection is closed afterwards
    Error { message: String },
    /// The subscription ended; the connection is closed afterwards
    Closed { reason: CloseReason },
}

impl ServerMessage {
    /// Serialize as a single newline-terminated JSON line
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(buf)
    }
}

impl ClientMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(buf)
    }

    /// Parse one line, with or without its terminator
    pub fn decode(line: &[u8]) -> Result<Self> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return Err(ServerError::Protocol("empty message".into()));
        }
        Ok(serde_json::from_slice(line)?)
    }
}
