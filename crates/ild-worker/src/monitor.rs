use std::sync::Arc;
use std::time::Duration;

use ild_db::{ServerStatus, ServerStore};
use ild_spawner::Orchestrator;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Servers whose backend state can move without us.
const WATCHED: &[ServerStatus] = &[ServerStatus::Launching, ServerStatus::Running];

/// Spawn the background status reconciler.
pub fn spawn_monitor(
    store: Arc<dyn ServerStore>,
    orchestrator: Arc<Orchestrator>,
    interval_secs: u64,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = reconcile(store.as_ref(), &orchestrator).await {
                tracing::error!(error = %e, "status reconcile failed");
            }
        }
        tracing::info!("monitor stopped");
    })
}

async fn reconcile(store: &dyn ServerStore, orchestrator: &Orchestrator) -> ild_db::Result<()> {
    let ids = store.list_servers_by_status(WATCHED).await?;
    tracing::debug!(servers = ids.len(), "reconciling server statuses");

    for id in ids {
        if let Err(e) = orchestrator.refresh_status(id).await {
            tracing::error!(server_id = %id, error = %e, "failed to refresh server status");
        }
    }
    Ok(())
}
