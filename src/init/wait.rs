// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tower::BoxError;
use tracing::error;

type Tasks = JoinSet<Result<(), BoxError>>;

/// Wait for the first task to finish and return its result. An empty set
/// counts as success.
pub async fn wait_for_any_task(tasks: &mut Tasks) -> Result<(), BoxError> {
    match tasks.join_next().await {
        Some(res) => res?,
        None => Ok(()),
    }
}

/// Drain `tasks`, returning the last task error seen, or an error if they are
/// not all done within `timeout`.
pub async fn wait_for_tasks_with_timeout(tasks: &mut Tasks, timeout: Duration) -> Result<(), BoxError> {
    let deadline = Instant::now() + timeout;
    let mut result = Ok(());
    loop {
        let joined = match timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(joined)) => joined,
            Ok(None) => return result,
            Err(_) => {
                return Err(format!("{} task(s) still running after {:?}", tasks.len(), timeout).into());
            }
        };
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => result = Err(e),
            Err(e) => error!(error = %e, "Failed to join task"),
        }
    }
}
