// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity store of the most recent lines of one watched file.
//!
//! New subscribers receive a snapshot of this buffer as their backlog before
//! live lines start flowing. The buffer carries no lock of its own: it lives
//! inside the tailer's shared state so that pushes and snapshots are ordered
//! with subscriber registration.

use std::collections::VecDeque;

use crate::tail::line::Line;

/// Default number of lines kept per file
pub const DEFAULT_CAPACITY: usize = 10;

/// Upper bound on the configured capacity
pub const MAX_CAPACITY: usize = 100_000;

/// Slots allocated up front; larger buffers grow as lines arrive
const PREALLOCATE_LIMIT: usize = 1024;

#[derive(Debug)]
pub struct RingBuffer {
    lines: VecDeque<Line>,
    capacity: usize,
    /// Total lines ever pushed
    total_pushed: u64,
}

impl RingBuffer {
    /// Create a buffer holding at most `capacity` lines. Callers keep
    /// `capacity` within [`MAX_CAPACITY`], see `TailConfig::validate`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(PREALLOCATE_LIMIT)),
            capacity,
            total_pushed: 0,
        }
    }

    /// Append a line, evicting the oldest one when full.
    pub fn push(&mut self, line: Line) {
        self.total_pushed += 1;
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Line> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}
