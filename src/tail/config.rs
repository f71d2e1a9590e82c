// SPDX-License-Identifier: Apache-2.0

//! Configuration for the tail engine.

use std::time::Duration;

use crate::tail::ring_buffer::{DEFAULT_CAPACITY, MAX_CAPACITY};
use crate::tail::watcher::{WatchMode, WatcherConfig};

/// How the ring buffer of a newly watched file is populated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeedPolicy {
    /// Seed with the last `buffer_lines` lines already in the file (`tail -n`)
    #[default]
    Tail,
    /// Start empty and buffer only lines written after the watch starts
    Empty,
}

/// Configuration consumed when a tailer is created
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Number of lines to keep and replay to new subscribers
    pub buffer_lines: usize,
    /// How to populate the buffer of a newly watched file
    pub seed_policy: SeedPolicy,
    /// Watch mode: auto, native, or poll
    pub watch_mode: WatchMode,
    /// Upper bound between two polls of the file
    pub poll_interval: Duration,
    /// Debounce interval for native events to batch rapid changes
    pub debounce_interval: Duration,
    /// How long a watched path may stay missing before the tailer fails
    pub file_gone_grace: Duration,
    /// Maximum line size in bytes, longer lines are truncated
    pub max_line_size: usize,
    /// Capacity of each subscriber's live event queue
    pub subscriber_queue_size: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            buffer_lines: DEFAULT_CAPACITY,
            seed_policy: SeedPolicy::Tail,
            watch_mode: WatchMode::Auto,
            poll_interval: Duration::from_millis(250),
            debounce_interval: Duration::from_millis(100),
            file_gone_grace: Duration::from_secs(30),
            max_line_size: 65536,
            subscriber_queue_size: 1024,
        }
    }
}

impl TailConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_lines > MAX_CAPACITY {
            return Err(format!(
                "buffer lines must be at most {}, got {}",
                MAX_CAPACITY, self.buffer_lines
            ));
        }

        if self.poll_interval.is_zero() {
            return Err("poll interval must be positive".to_string());
        }

        if self.max_line_size == 0 {
            return Err("max line size must be positive".to_string());
        }

        if self.subscriber_queue_size == 0 {
            return Err("subscriber queue size must be positive".to_string());
        }

        Ok(())
    }

    pub(crate) fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            mode: self.watch_mode,
            poll_interval: self.poll_interval,
            debounce_interval: self.debounce_interval,
        }
    }
}
