// SPDX-License-Identifier: Apache-2.0

//! Bounded queue connecting tailer threads to subscribers.
//!
//! The producing side never blocks: tailer threads call
//! [`BoundedSender::try_send`] and decide themselves what a full queue means.
//! The consuming side can be drained from async tasks with
//! [`BoundedReceiver::next`] or from plain threads with
//! [`BoundedReceiver::recv_timeout`].

use std::fmt;
use std::time::Duration;

use flume::{Receiver, Sender};

/// Error from [`BoundedSender::try_send`]. The rejected item is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError<T> {
    Full(T),
    Disconnected(T),
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("queue full"),
            TrySendError::Disconnected(_) => f.write_str("receiver dropped"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TrySendError<T> {}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(item) | TrySendError::Disconnected(item) => item,
        }
    }
}

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

impl<T> BoundedSender<T> {
    pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        self.tx.try_send(item).map_err(|e| match e {
            flume::TrySendError::Full(item) => TrySendError::Full(item),
            flume::TrySendError::Disconnected(item) => TrySendError::Disconnected(item),
        })
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.is_disconnected()
    }

    /// Items queued and not yet received
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for BoundedSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedSender")
            .field("len", &self.tx.len())
            .field("capacity", &self.tx.capacity())
            .finish()
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Wait for the next item. Returns None once every sender is gone and the
    /// queue is drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Returns None when the queue is empty or disconnected
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Block the current thread for at most `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn is_disconnected(&self) -> bool {
        self.rx.is_disconnected()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> fmt::Debug for BoundedReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedReceiver")
            .field("len", &self.rx.len())
            .finish()
    }
}

pub fn bounded<T>(capacity: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded(capacity);
    (BoundedSender { tx }, BoundedReceiver { rx })
}
