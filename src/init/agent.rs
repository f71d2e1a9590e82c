// SPDX-License-Identifier: Apache-2.0

use crate::init::args::AgentRun;
use crate::init::wait;
use crate::listener::Listener;
use crate::server::TailServer;
use crate::tail::{Namespace, TailRegistry, TailRouter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info, warn};

pub struct Agent {
    config: Box<AgentRun>,
    listener: Listener,
}

impl Agent {
    /// `listener` is bound by the caller so that an unusable endpoint is
    /// reported before anything starts.
    pub fn new(config: Box<AgentRun>, listener: Listener) -> Self {
        Self { config, listener }
    }

    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        let config = self.config;

        info!("Starting tailstream.");

        let tail_config = config.tail_config();
        tail_config.validate()?;
        let server_config = config.server_config();
        server_config.validate()?;

        let registry = Arc::new(TailRegistry::with_cancel(
            tail_config,
            CancellationToken::new(),
        ));
        let router = Arc::new(TailRouter::with_registry(registry));

        // Files named on the command line must be readable at startup
        {
            let router = Arc::clone(&router);
            let files = config.files.clone();
            tokio::task::spawn_blocking(move || preload(&router, &files)).await??;
        }

        let mut server_task_set = JoinSet::new();
        let server_cancel = CancellationToken::new();
        {
            let server = TailServer::new(Arc::clone(&router), server_config);
            let listener = self.listener;
            let server_cancel = server_cancel.clone();
            server_task_set.spawn(async move { server.serve(listener, server_cancel).await });
        }

        let mut result = Ok(());
        select! {
            _ = agent_cancel.cancelled() => {
                debug!("Agent cancellation signaled.");
            },
            e = wait::wait_for_any_task(&mut server_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of server."),
                    Err(e) => result = Err(e),
                }
            },
        }

        // Stop the tail threads first, subscribed clients are sent a closed message
        {
            let router = Arc::clone(&router);
            tokio::task::spawn_blocking(move || router.shutdown()).await?;
        }

        server_cancel.cancel();
        let res =
            wait::wait_for_tasks_with_timeout(&mut server_task_set, Duration::from_secs(2)).await;
        result?;
        if let Err(e) = res {
            return Err(format!("timed out waiting for server exit: {}", e).into());
        }

        Ok(())
    }
}

fn preload(router: &TailRouter, files: &[PathBuf]) -> Result<(), BoxError> {
    for file in files {
        let namespace = Namespace::new(file.to_string_lossy());
        router
            .registry()
            .get_or_create(&namespace)
            .map_err(|e| format!("unable to tail {}: {}", file.display(), e))?;
    }

    if !files.is_empty() {
        info!(files = files.len(), "Preloaded files");
    }
    Ok(())
}
