// SPDX-License-Identifier: Apache-2.0

//! Subscriber bookkeeping and fan-out for one namespace.
//!
//! Every subscriber owns a bounded queue. Delivery never waits: a subscriber
//! whose queue is full is told it lagged and is dropped, one whose receiver is
//! gone is removed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bounded_channel::{BoundedReceiver, BoundedSender, TrySendError, bounded};
use crate::tail::line::Line;

/// Counter for generating unique subscriber IDs
static SUBSCRIBER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn next() -> Self {
        Self(SUBSCRIBER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a subscription ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The watched file disappeared for longer than the grace period
    FileGone,
    /// The tail engine is shutting down
    Shutdown,
    /// The subscriber did not keep up and its queue filled
    Lagged,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::FileGone => "file_gone",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Lagged => "lagged",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live event delivered to a subscriber after its backlog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    Line(Line),
    /// Terminal; nothing follows it
    Closed(CloseReason),
}

#[derive(Debug)]
struct Subscriber {
    id: SubscriberId,
    sender: BoundedSender<TailEvent>,
}

/// Subscribers of a single namespace.
///
/// Queues are created with one slot more than `queue_size` so that the
/// terminal [`TailEvent::Closed`] always fits behind a full run of lines.
#[derive(Debug)]
pub(crate) struct SubscriberSet {
    subscribers: Vec<Subscriber>,
    queue_size: usize,
}

impl SubscriberSet {
    pub(crate) fn new(queue_size: usize) -> Self {
        Self {
            subscribers: Vec::new(),
            queue_size: queue_size.max(1),
        }
    }

    /// Register a new subscriber and return the receiving end of its queue
    pub(crate) fn add(&mut self) -> (SubscriberId, BoundedReceiver<TailEvent>) {
        let (sender, receiver) = bounded(self.queue_size + 1);
        let id = SubscriberId::next();
        self.subscribers.push(Subscriber { id, sender });
        (id, receiver)
    }

    /// Returns false if the subscriber was not registered
    pub(crate) fn remove(&mut self, id: SubscriberId) -> bool {
        let original_len = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != original_len
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver `line` to every subscriber.
    ///
    /// Returns the number of subscribers that received it.
    pub(crate) fn broadcast(&mut self, line: &Line) -> usize {
        let queue_size = self.queue_size;
        let mut delivered = 0;

        self.subscribers.retain(|subscriber| {
            if subscriber.sender.len() >= queue_size {
                warn!(subscriber_id = %subscriber.id, queue_size, "Subscriber lagged, disconnecting");
                let _ = subscriber
                    .sender
                    .try_send(TailEvent::Closed(CloseReason::Lagged));
                return false;
            }

            match subscriber.sender.try_send(TailEvent::Line(line.clone())) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber_id = %subscriber.id, queue_size, "Subscriber lagged, disconnecting");
                    false
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!(subscriber_id = %subscriber.id, "Subscriber receiver dropped, removing");
                    false
                }
            }
        });

        delivered
    }

    /// Send `reason` to every subscriber and drop them all
    pub(crate) fn close_all(&mut self, reason: CloseReason) {
        for subscriber in self.subscribers.drain(..) {
            let _ = subscriber.sender.try_send(TailEvent::Closed(reason));
        }
    }
}
