// SPDX-License-Identifier: Apache-2.0

//! Tail engine: follows files and streams their new lines to subscribers.
//!
//! Features:
//! - One tail thread per watched file, created on first subscription
//! - Backlog replay from a fixed-size ring buffer of recent lines
//! - Truncation and rotation handling based on file identity
//! - Non-blocking fan-out; subscribers that fall behind are disconnected

pub mod config;
pub mod error;
pub mod input;
pub mod line;
pub mod registry;
pub mod ring_buffer;
pub mod router;
pub mod subscriber;
pub mod tailer;
pub mod watcher;

pub use config::{SeedPolicy, TailConfig};
pub use error::{Error, Result};
pub use input::{FileId, LineReader, PollOutcome};
pub use line::{Line, Namespace};
pub use registry::TailRegistry;
pub use ring_buffer::RingBuffer;
pub use router::{Subscription, TailRouter};
pub use subscriber::{CloseReason, SubscriberId, TailEvent};
pub use tailer::{FileTailer, TailerState};
pub use watcher::{FileWatcher, WatchMode, WatcherConfig};
