// SPDX-License-Identifier: Apache-2.0

//! Entry point for clients: subscribe to a namespace, receive its backlog and
//! live lines, unsubscribe when done.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::bounded_channel::BoundedReceiver;
use crate::tail::config::TailConfig;
use crate::tail::error::{Error, Result};
use crate::tail::line::{Line, Namespace};
use crate::tail::registry::TailRegistry;
use crate::tail::subscriber::{SubscriberId, TailEvent};
use crate::tail::tailer::FileTailer;

/// A live subscription to one namespace
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub namespace: Namespace,
    /// Buffered lines at subscribe time, oldest first
    pub backlog: Vec<Line>,
    /// Lines pushed after the backlog snapshot, then a terminal `Closed`
    /// event if the tailer ends the subscription
    pub events: BoundedReceiver<TailEvent>,
}

#[derive(Debug)]
pub struct TailRouter {
    registry: Arc<TailRegistry>,
    routes: Mutex<HashMap<SubscriberId, Arc<FileTailer>>>,
}

impl TailRouter {
    pub fn new(config: TailConfig) -> Self {
        Self::with_registry(Arc::new(TailRegistry::new(config)))
    }

    pub fn with_registry(registry: Arc<TailRegistry>) -> Self {
        Self {
            registry,
            routes: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<TailRegistry> {
        &self.registry
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<SubscriberId, Arc<FileTailer>>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to `namespace`, starting a tailer for it if needed.
    ///
    /// Blocks while a new tailer opens and seeds its file.
    pub fn subscribe(&self, namespace: impl Into<Namespace>) -> Result<Subscription> {
        let namespace = namespace.into();
        let mut retried = false;

        loop {
            let tailer = self.registry.get_or_create(&namespace)?;

            match tailer.subscribe() {
                Ok((id, backlog, events)) => {
                    info!(
                        namespace = %namespace,
                        subscriber_id = %id,
                        backlog = backlog.len(),
                        "Client subscribed"
                    );
                    self.routes().insert(id, tailer);
                    return Ok(Subscription {
                        id,
                        namespace,
                        backlog,
                        events,
                    });
                }
                // Failed between lookup and subscribe; the registry replaces it
                Err(Error::FileGone(_)) if !retried => retried = true,
                Err(e) => return Err(e),
            }
        }
    }

    /// Remove a subscriber. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let Some(tailer) = self.routes().remove(&id) else {
            return;
        };
        tailer.unsubscribe(id);
        info!(namespace = %tailer.namespace(), subscriber_id = %id, "Client unsubscribed");
    }

    /// Number of subscriptions that have not been unsubscribed
    pub fn subscription_count(&self) -> usize {
        self.routes().len()
    }

    /// Stop all tailers. Their subscribers receive `Closed(Shutdown)`.
    pub fn shutdown(&self) {
        self.registry.shutdown();
        self.routes().clear();
    }
}
