// SPDX-License-Identifier: Apache-2.0

use std::io;
use thiserror::Error;

use crate::tail;

#[derive(Error, Debug)]
pub enum ServerError {
    /// Socket read or write failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed client message
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Tail(#[from] tail::Error),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ServerError>;
