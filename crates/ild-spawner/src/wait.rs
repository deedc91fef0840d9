use std::time::Duration;

use ild_db::{Server, ServerStatus};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result, Spawner};

#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    /// Overall deadline.
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Poll `spawner.status` until it reports `target` or `Error`.
///
/// The poll interval doubles from `initial_backoff` up to `max_backoff`.
/// Returns the last observed status, `Error::Timeout` once the deadline
/// passes, or `Error::Cancelled` when `cancel` fires.
pub async fn wait_for_status(
    spawner: &dyn Spawner,
    server: &Server,
    target: ServerStatus,
    options: WaitOptions,
    cancel: &CancellationToken,
) -> Result<ServerStatus> {
    let deadline = Instant::now() + options.timeout;
    let mut backoff = options.initial_backoff;

    loop {
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            status = spawner.status(server) => status,
        };
        if status == target || status == ServerStatus::Error {
            return Ok(status);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout {
                operation: "wait for status",
            });
        }
        debug!(server_id = %server.id, %status, %target, ?backoff, "waiting for status");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(backoff.min(deadline - now)) => {}
        }
        backoff = (backoff * 2).min(options.max_backoff);
    }
}
