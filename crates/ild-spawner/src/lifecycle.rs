use std::sync::Arc;

use ild_db::{ServerLocks, ServerStatus, ServerStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::lambda::LambdaDeployer;
use crate::wait::{WaitOptions, wait_for_status};
use crate::{Result, Spawner, graph};

/// Runs spawner operations by server id.
///
/// Every operation holds the server's lock from reload to persisted status,
/// so concurrent calls for one server cannot both provision it. `start`
/// brings up linked servers first.
pub struct Orchestrator {
    spawner: Arc<dyn Spawner>,
    store: Arc<dyn ServerStore>,
    locks: Arc<dyn ServerLocks>,
    max_dependency_depth: usize,
}

impl Orchestrator {
    pub fn new(
        spawner: Arc<dyn Spawner>,
        store: Arc<dyn ServerStore>,
        locks: Arc<dyn ServerLocks>,
        max_dependency_depth: usize,
    ) -> Self {
        Self {
            spawner,
            store,
            locks,
            max_dependency_depth,
        }
    }

    pub fn spawner(&self) -> &Arc<dyn Spawner> {
        &self.spawner
    }

    /// Start a server after every server it links to.
    pub async fn start(&self, id: Uuid) -> Result<ServerStatus> {
        let root = self.store.get_server(id).await?;
        let order = graph::start_order(self.store.as_ref(), &root, self.max_dependency_depth).await?;

        for dependency in order {
            info!(server_id = %id, dependency = %dependency, "starting dependency");
            self.start_one(dependency).await?;
        }
        self.start_one(id).await
    }

    async fn start_one(&self, id: Uuid) -> Result<ServerStatus> {
        let _guard = self.locks.acquire(id).await?;
        let mut server = self.store.get_server(id).await?;

        let result = self.spawner.start(&mut server).await;
        self.store.save_server_config(&server).await?;

        match result {
            Ok(()) => {
                self.store
                    .set_server_status(id, ServerStatus::Launching)
                    .await?;
                info!(server_id = %id, spawner = %self.spawner.kind(), "server launching");
                Ok(ServerStatus::Launching)
            }
            Err(e) => {
                error!(server_id = %id, error = %e, "server failed to start");
                self.store.set_server_status(id, ServerStatus::Error).await?;
                Err(e)
            }
        }
    }

    pub async fn stop(&self, id: Uuid) -> Result<ServerStatus> {
        let _guard = self.locks.acquire(id).await?;
        let mut server = self.store.get_server(id).await?;

        let result = self.spawner.stop(&mut server).await;
        self.store.save_server_config(&server).await?;
        result?;

        self.store.set_server_status(id, ServerStatus::Stopped).await?;
        info!(server_id = %id, "server stopped");
        Ok(ServerStatus::Stopped)
    }

    pub async fn terminate(&self, id: Uuid) -> Result<ServerStatus> {
        let _guard = self.locks.acquire(id).await?;
        let mut server = self.store.get_server(id).await?;

        let result = self.spawner.terminate(&mut server).await;
        self.store.save_server_config(&server).await?;
        result?;

        self.store.set_server_status(id, ServerStatus::Stopped).await?;
        info!(server_id = %id, "server terminated");
        Ok(ServerStatus::Stopped)
    }

    /// Query the backend and persist the observed status if it changed.
    pub async fn refresh_status(&self, id: Uuid) -> Result<ServerStatus> {
        let _guard = self.locks.acquire(id).await?;
        let server = self.store.get_server(id).await?;

        let status = self.spawner.status(&server).await;
        if status != server.status {
            self.store.set_server_status(id, status).await?;
            info!(server_id = %id, from = %server.status, to = %status, "server status changed");
        }
        Ok(status)
    }

    /// Wait until the backend reports `target`, then persist it.
    pub async fn wait_until(
        &self,
        id: Uuid,
        target: ServerStatus,
        options: WaitOptions,
        cancel: &CancellationToken,
    ) -> Result<ServerStatus> {
        let server = self.store.get_server(id).await?;
        let status = wait_for_status(self.spawner.as_ref(), &server, target, options, cancel).await?;
        if status != server.status {
            self.store.set_server_status(id, status).await?;
        }
        Ok(status)
    }
}

/// Runs deployer operations by deployment id under the same locks.
pub struct DeploymentRunner {
    deployer: LambdaDeployer,
    store: Arc<dyn ServerStore>,
    locks: Arc<dyn ServerLocks>,
}

impl DeploymentRunner {
    pub fn new(
        deployer: LambdaDeployer,
        store: Arc<dyn ServerStore>,
        locks: Arc<dyn ServerLocks>,
    ) -> Self {
        Self {
            deployer,
            store,
            locks,
        }
    }

    /// Returns the public endpoint.
    pub async fn deploy(&self, id: Uuid) -> Result<String> {
        let _guard = self.locks.acquire(id).await?;
        let mut deployment = self.store.get_deployment(id).await?;
        let result = self.deployer.deploy(&mut deployment).await;
        self.store.save_deployment_config(&deployment).await?;
        result
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let _guard = self.locks.acquire(id).await?;
        let mut deployment = self.store.get_deployment(id).await?;
        let result = self.deployer.delete(&mut deployment).await;
        self.store.save_deployment_config(&deployment).await?;
        result
    }
}
