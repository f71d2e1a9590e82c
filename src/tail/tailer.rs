// SPDX-License-Identifier: Apache-2.0

//! A `FileTailer` follows one file on its own thread.
//!
//! The thread waits for change notifications (or the poll interval), reads
//! whatever was appended, pushes each line into the ring buffer and fans it
//! out to subscribers. Buffer and subscribers live behind one lock, which
//! `subscribe` also takes while it snapshots the buffer, so every line ends up
//! either in a subscriber's backlog or in its live queue, never both.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::bounded_channel::BoundedReceiver;
use crate::tail::config::{SeedPolicy, TailConfig};
use crate::tail::error::{Error, Result};
use crate::tail::input::LineReader;
use crate::tail::line::{Line, Namespace};
use crate::tail::ring_buffer::RingBuffer;
use crate::tail::subscriber::{CloseReason, SubscriberId, SubscriberSet, TailEvent};
use crate::tail::watcher::{AnyWatcher, create_watcher};

/// Lifecycle of a tailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerState {
    /// Seeded, thread not yet running
    Created,
    /// Following the file
    Active,
    /// The last poll failed; retried on the next cycle
    Degraded,
    /// The file is gone or the tailer was stopped. Terminal.
    Failed,
}

impl fmt::Display for TailerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TailerState::Created => "created",
            TailerState::Active => "active",
            TailerState::Degraded => "degraded",
            TailerState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct TailShared {
    buffer: RingBuffer,
    subscribers: SubscriberSet,
    state: TailerState,
}

fn lock(shared: &Mutex<TailShared>) -> MutexGuard<'_, TailShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Follows a single file and broadcasts its new lines.
#[derive(Debug)]
pub struct FileTailer {
    namespace: Namespace,
    shared: Arc<Mutex<TailShared>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FileTailer {
    /// Open the namespace's file, seed the buffer and start the tail thread.
    ///
    /// The thread stops when `cancel` (or a parent of it) is cancelled.
    pub fn spawn(
        namespace: Namespace,
        config: &TailConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let seed_lines = match config.seed_policy {
            SeedPolicy::Tail => config.buffer_lines,
            SeedPolicy::Empty => 0,
        };

        let (reader, backlog) =
            LineReader::open_with_backlog(namespace.as_path(), seed_lines, config.max_line_size)
                .map_err(|source| Error::NamespaceUnreadable {
                    namespace: namespace.to_string(),
                    source,
                })?;

        let watcher = create_watcher(&config.watcher_config(), namespace.as_path())?;

        let mut buffer = RingBuffer::with_capacity(config.buffer_lines);
        for line in backlog {
            buffer.push(line);
        }

        info!(
            namespace = %namespace,
            file_id = %reader.file_id(),
            offset = reader.offset(),
            seeded = buffer.len(),
            backend = watcher.backend_name(),
            "Started tailing file"
        );

        let shared = Arc::new(Mutex::new(TailShared {
            buffer,
            subscribers: SubscriberSet::new(config.subscriber_queue_size),
            state: TailerState::Created,
        }));

        let worker = TailWorker {
            namespace: namespace.clone(),
            reader,
            watcher,
            shared: Arc::clone(&shared),
            poll_interval: config.poll_interval,
            file_gone_grace: config.file_gone_grace,
            missing_since: None,
        };

        let thread_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name(format!("tail:{}", namespace))
            .spawn(move || worker.run(thread_cancel))?;

        Ok(Self {
            namespace,
            shared,
            cancel,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn state(&self) -> TailerState {
        lock(&self.shared).state
    }

    pub fn is_failed(&self) -> bool {
        self.state() == TailerState::Failed
    }

    /// Register a subscriber and return its id, the current buffer contents
    /// and the receiver for everything pushed afterwards.
    pub fn subscribe(&self) -> Result<(SubscriberId, Vec<Line>, BoundedReceiver<TailEvent>)> {
        if self.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }

        let mut shared = lock(&self.shared);
        if shared.state == TailerState::Failed {
            return Err(Error::FileGone(self.namespace.as_path().to_path_buf()));
        }

        let backlog = shared.buffer.snapshot();
        let (id, receiver) = shared.subscribers.add();
        debug!(
            namespace = %self.namespace,
            subscriber_id = %id,
            backlog = backlog.len(),
            "Subscriber added"
        );

        Ok((id, backlog, receiver))
    }

    /// Returns false if the subscriber was not registered here
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = lock(&self.shared).subscribers.remove(id);
        if removed {
            debug!(namespace = %self.namespace, subscriber_id = %id, "Subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared).subscribers.len()
    }

    /// Current buffer contents, oldest first
    pub fn buffered_lines(&self) -> Vec<Line> {
        lock(&self.shared).buffer.snapshot()
    }

    /// Cancel the tail thread and wait for it to exit.
    pub fn stop(&self) {
        self.cancel.cancel();

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(namespace = %self.namespace, "Tail thread panicked");
            }
        }
    }
}

impl Drop for FileTailer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Granularity at which a sleeping tail thread notices cancellation
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Sleep for `duration`, returning early once `cancel` fires.
fn sleep_unless_cancelled(cancel: &CancellationToken, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(CANCEL_CHECK_INTERVAL));
    }
}

/// State owned by the tail thread
struct TailWorker {
    namespace: Namespace,
    reader: LineReader,
    watcher: AnyWatcher,
    shared: Arc<Mutex<TailShared>>,
    poll_interval: Duration,
    file_gone_grace: Duration,
    missing_since: Option<Instant>,
}

impl TailWorker {
    fn run(mut self, cancel: CancellationToken) {
        lock(&self.shared).state = TailerState::Active;

        loop {
            if cancel.is_cancelled() {
                debug!(namespace = %self.namespace, "Cancellation received, stopping tail thread");
                self.finish(CloseReason::Shutdown);
                return;
            }

            match self.watcher.wait(self.poll_interval) {
                Ok(changes) if !changes.is_empty() => {
                    trace!(namespace = %self.namespace, ?changes, "File changed");
                }
                Ok(_) => {}
                Err(e) => {
                    // Polling below still picks up changes
                    warn!(namespace = %self.namespace, error = %e, "Watcher error");
                    sleep_unless_cancelled(&cancel, self.poll_interval);
                }
            }

            if cancel.is_cancelled() {
                continue;
            }

            match self.poll() {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    let mut shared = lock(&self.shared);
                    if shared.state != TailerState::Degraded {
                        warn!(namespace = %self.namespace, error = %e, "Read failed, will retry");
                        shared.state = TailerState::Degraded;
                    }
                }
                Err(e) => {
                    error!(namespace = %self.namespace, error = %e, "Tailer failed");
                    self.finish(CloseReason::FileGone);
                    return;
                }
            }
        }
    }

    fn poll(&mut self) -> Result<()> {
        let outcome = self
            .reader
            .poll()
            .map_err(|source| Error::TransientRead {
                path: self.reader.path().to_path_buf(),
                source,
            })?;

        self.publish(outcome.lines);

        if !outcome.path_missing {
            self.missing_since = None;
            return Ok(());
        }

        let since = *self.missing_since.get_or_insert_with(|| {
            debug!(namespace = %self.namespace, "File missing, waiting for it to reappear");
            Instant::now()
        });
        if since.elapsed() >= self.file_gone_grace {
            return Err(Error::FileGone(self.reader.path().to_path_buf()));
        }

        Ok(())
    }

    fn publish(&self, lines: Vec<Line>) {
        let mut shared = lock(&self.shared);

        if shared.state == TailerState::Degraded {
            info!(namespace = %self.namespace, "Read recovered");
        }
        shared.state = TailerState::Active;

        for line in lines {
            shared.subscribers.broadcast(&line);
            shared.buffer.push(line);
        }
    }

    fn finish(&self, reason: CloseReason) {
        let mut shared = lock(&self.shared);
        shared.state = TailerState::Failed;
        let subscribers = shared.subscribers.len();
        shared.subscribers.close_all(reason);
        info!(
            namespace = %self.namespace,
            %reason,
            subscribers,
            "Stopped tailing file"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tail::watcher::WatchMode;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_config() -> TailConfig {
        TailConfig {
            watch_mode: WatchMode::Poll,
            poll_interval: Duration::from_millis(10),
            file_gone_grace: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn append(path: &Path, content: &str) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    fn recv(rx: &BoundedReceiver<TailEvent>) -> Option<TailEvent> {
        rx.recv_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_seeds_from_tail_of_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let content: String = (1..=15).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(&path, content).unwrap();

        let tailer = FileTailer::spawn(
            Namespace::new(path.to_string_lossy()),
            &test_config(),
            CancellationToken::new(),
        )
        .unwrap();

        let buffered = tailer.buffered_lines();
        assert_eq!(buffered.len(), 10);
        assert_eq!(buffered[0], "line 6");
        assert_eq!(buffered[9], "line 15");
        tailer.stop();
    }

    #[test]
    fn test_empty_seed_policy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old\n").unwrap();

        let config = TailConfig {
            seed_policy: SeedPolicy::Empty,
            ..test_config()
        };
        let tailer = FileTailer::spawn(
            Namespace::new(path.to_string_lossy()),
            &config,
            CancellationToken::new(),
        )
        .unwrap();

        assert!(tailer.buffered_lines().is_empty());
        tailer.stop();
    }

    #[test]
    fn test_live_lines_reach_subscriber() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "before\n").unwrap();

        let tailer = FileTailer::spawn(
            Namespace::new(path.to_string_lossy()),
            &test_config(),
            CancellationToken::new(),
        )
        .unwrap();

        let (_, backlog, rx) = tailer.subscribe().unwrap();
        assert_eq!(backlog, vec![Line::from("before")]);

        append(&path, "after\n");
        assert_eq!(recv(&rx), Some(TailEvent::Line(Line::from("after"))));
        tailer.stop();
    }

    #[test]
    fn test_unknown_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let err = FileTailer::spawn(
            Namespace::new(dir.path().join("nope.log").to_string_lossy()),
            &test_config(),
            CancellationToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::NamespaceUnreadable { .. }));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let config = TailConfig {
            subscriber_queue_size: 0,
            ..test_config()
        };
        let err = FileTailer::spawn(
            Namespace::new(path.to_string_lossy()),
            &config,
            CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_file_gone_fails_tailer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let tailer = FileTailer::spawn(
            Namespace::new(path.to_string_lossy()),
            &test_config(),
            CancellationToken::new(),
        )
        .unwrap();
        let (_, _, rx) = tailer.subscribe().unwrap();

        std::fs::remove_file(&path).unwrap();

        assert_eq!(recv(&rx), Some(TailEvent::Closed(CloseReason::FileGone)));
        assert_eq!(recv(&rx), None);
        assert!(tailer.is_failed());
        assert!(matches!(tailer.subscribe(), Err(Error::FileGone(_))));
    }

    #[test]
    fn test_file_reappearing_within_grace_keeps_tailing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let config = TailConfig {
            file_gone_grace: Duration::from_secs(30),
            ..test_config()
        };
        let tailer = FileTailer::spawn(
            Namespace::new(path.to_string_lossy()),
            &config,
            CancellationToken::new(),
        )
        .unwrap();
        let (_, _, rx) = tailer.subscribe().unwrap();

        std::fs::remove_file(&path).unwrap();
        thread::sleep(Duration::from_millis(50));
        std::fs::write(&path, "reborn\n").unwrap();

        assert_eq!(recv(&rx), Some(TailEvent::Line(Line::from("reborn"))));
        assert!(!tailer.is_failed());
        tailer.stop();
    }

    #[test]
    fn test_stop_closes_subscribers_with_shutdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let tailer = FileTailer::spawn(
            Namespace::new(path.to_string_lossy()),
            &test_config(),
            CancellationToken::new(),
        )
        .unwrap();
        let (_, _, rx) = tailer.subscribe().unwrap();

        tailer.stop();
        assert_eq!(rx.try_recv(), Some(TailEvent::Closed(CloseReason::Shutdown)));
        assert!(matches!(tailer.subscribe(), Err(Error::Shutdown)));
    }

    #[test]
    fn test_unsubscribe() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let tailer = FileTailer::spawn(
            Namespace::new(path.to_string_lossy()),
            &test_config(),
            CancellationToken::new(),
        )
        .unwrap();
        let (id, _, _rx) = tailer.subscribe().unwrap();
        assert_eq!(tailer.subscriber_count(), 1);

        assert!(tailer.unsubscribe(id));
        assert!(!tailer.unsubscribe(id));
        assert_eq!(tailer.subscriber_count(), 0);
        tailer.stop();
    }

    #[test]
    fn test_sleep_returns_early_on_cancel() {
        let cancel = CancellationToken::new();
        let sleeper = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                let start = Instant::now();
                sleep_unless_cancelled(&cancel, Duration::from_secs(30));
                start.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert!(sleeper.join().unwrap() < Duration::from_secs(5));
    }

    #[test]
    fn test_sleep_runs_full_duration_without_cancel() {
        let start = Instant::now();
        sleep_unless_cancelled(&CancellationToken::new(), Duration::from_millis(30));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
