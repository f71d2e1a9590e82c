// SPDX-License-Identifier: Apache-2.0

//! Namespace to tailer map.
//!
//! The map lock is only held long enough to find or insert a namespace's slot.
//! Creating the tailer happens under the slot's own lock, so concurrent first
//! requests for one namespace create a single tailer while other namespaces
//! are not held up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::tail::config::TailConfig;
use crate::tail::error::{Error, Result};
use crate::tail::line::Namespace;
use crate::tail::tailer::FileTailer;

type Slot = Arc<Mutex<Option<Arc<FileTailer>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct TailRegistry {
    config: TailConfig,
    slots: Mutex<HashMap<Namespace, Slot>>,
    created: AtomicU64,
    cancel: CancellationToken,
}

impl TailRegistry {
    pub fn new(config: TailConfig) -> Self {
        Self::with_cancel(config, CancellationToken::new())
    }

    /// Tail threads are stopped when `cancel` fires.
    pub fn with_cancel(config: TailConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
            created: AtomicU64::new(0),
            cancel,
        }
    }

    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    /// Return the tailer for `namespace`, creating it on first use.
    ///
    /// A tailer that has failed is replaced by a freshly seeded one. If
    /// creation fails nothing is left behind for the namespace.
    pub fn get_or_create(&self, namespace: &Namespace) -> Result<Arc<FileTailer>> {
        if self.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }

        let slot = Arc::clone(lock(&self.slots).entry(namespace.clone()).or_default());

        let mut tailer = lock(&slot);
        if let Some(existing) = tailer.as_ref() {
            if !existing.is_failed() {
                return Ok(Arc::clone(existing));
            }
            info!(namespace = %namespace, "Replacing failed tailer");
            existing.stop();
        }

        match FileTailer::spawn(namespace.clone(), &self.config, self.cancel.child_token()) {
            Ok(created) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                let created = Arc::new(created);
                *tailer = Some(Arc::clone(&created));
                Ok(created)
            }
            Err(e) => {
                *tailer = None;
                drop(tailer);
                self.remove_empty_slot(namespace, &slot);
                debug!(namespace = %namespace, error = %e, "Failed to create tailer");
                Err(e)
            }
        }
    }

    // Callers waiting on the slot hold their own reference to it and retry
    // creation themselves, so the slot is only removed when nobody else has it.
    fn remove_empty_slot(&self, namespace: &Namespace, slot: &Slot) {
        let mut slots = lock(&self.slots);
        let Some(current) = slots.get(namespace) else {
            return;
        };
        if Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2 && lock(slot).is_none() {
            slots.remove(namespace);
        }
    }

    /// The tailer for `namespace`, if one has been created
    pub fn get(&self, namespace: &Namespace) -> Option<Arc<FileTailer>> {
        let slot = lock(&self.slots).get(namespace).cloned()?;
        lock(&slot).clone()
    }

    /// Namespaces that currently have a tailer
    pub fn namespaces(&self) -> Vec<Namespace> {
        let slots: Vec<(Namespace, Slot)> = lock(&self.slots)
            .iter()
            .map(|(ns, slot)| (ns.clone(), Arc::clone(slot)))
            .collect();

        let mut namespaces: Vec<Namespace> = slots
            .into_iter()
            .filter(|(_, slot)| lock(slot).is_some())
            .map(|(ns, _)| ns)
            .collect();
        namespaces.sort();
        namespaces
    }

    /// Number of namespaces that currently have a tailer
    pub fn len(&self) -> usize {
        self.namespaces().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tailers created over the registry's lifetime
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Stop every tail thread. Later `get_or_create` calls fail.
    pub fn shutdown(&self) {
        self.cancel.cancel();

        let slots: Vec<Slot> = lock(&self.slots).drain().map(|(_, slot)| slot).collect();
        let count = slots.len();
        for slot in slots {
            if let Some(tailer) = lock(&slot).take() {
                tailer.stop();
            }
        }

        info!(tailers = count, "Tail registry shut down");
    }
}

impl Drop for TailRegistry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tail::line::Line;
    use crate::tail::watcher::WatchMode;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config() -> TailConfig {
        TailConfig {
            watch_mode: WatchMode::Poll,
            poll_interval: Duration::from_millis(10),
            file_gone_grace: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn namespace(dir: &TempDir, name: &str) -> Namespace {
        Namespace::new(dir.path().join(name).to_string_lossy())
    }

    #[test]
    fn test_get_or_create_reuses_tailer() {
        let dir = TempDir::new().unwrap();
        let ns = namespace(&dir, "app.log");
        std::fs::write(ns.as_path(), "").unwrap();

        let registry = TailRegistry::new(test_config());
        let first = registry.get_or_create(&ns).unwrap();
        let second = registry.get_or_create(&ns).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.created_count(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&ns).is_some());
        registry.shutdown();
    }

    #[test]
    fn test_failed_creation_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        let ns = namespace(&dir, "missing.log");

        let registry = TailRegistry::new(test_config());
        let err = registry.get_or_create(&ns).unwrap_err();

        assert!(matches!(err, Error::NamespaceUnreadable { .. }));
        assert!(registry.is_empty());
        assert!(lock(&registry.slots).is_empty());
        assert_eq!(registry.created_count(), 0);
    }

    #[test]
    fn test_failed_tailer_is_replaced() {
        let dir = TempDir::new().unwrap();
        let ns = namespace(&dir, "app.log");
        std::fs::write(ns.as_path(), "one\n").unwrap();

        let registry = TailRegistry::new(test_config());
        let first = registry.get_or_create(&ns).unwrap();

        std::fs::remove_file(ns.as_path()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !first.is_failed() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(first.is_failed());

        std::fs::write(ns.as_path(), "two\n").unwrap();
        let second = registry.get_or_create(&ns).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.created_count(), 2);
        assert_eq!(second.buffered_lines(), vec![Line::from("two")]);
        registry.shutdown();
    }

    #[test]
    fn test_shutdown_rejects_new_tailers() {
        let dir = TempDir::new().unwrap();
        let ns = namespace(&dir, "app.log");
        std::fs::write(ns.as_path(), "").unwrap();

        let registry = TailRegistry::new(test_config());
        let tailer = registry.get_or_create(&ns).unwrap();
        registry.shutdown();

        assert!(tailer.is_failed());
        assert!(registry.is_empty());
        assert!(matches!(registry.get_or_create(&ns), Err(Error::Shutdown)));
    }
}
