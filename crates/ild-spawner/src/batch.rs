use std::sync::Arc;

use async_trait::async_trait;
use aws_api::{
    BatchClient, ContainerProperties, DescribeJobsResponse, HostVolumeProperties, JobDependency,
    KeyValuePair, MountPoint, RegisterJobDefinitionRequest, RegisterJobDefinitionResponse,
    RetryStrategy, SubmitJobRequest, SubmitJobResponse, Volume,
};
use ild_db::{Server, ServerStatus, ServerStore};
use tracing::{info, warn};

use crate::builder;
use crate::config::SpawnerSettings;
use crate::ecs::ignore_not_found;
use crate::{Result, Spawner, SpawnerKind, status, within};

const RETRY_ATTEMPTS: i32 = 3;

/// AWS Batch operations.
#[async_trait]
pub trait BatchApi: Send + Sync + 'static {
    async fn register_job_definition(
        &self,
        req: &RegisterJobDefinitionRequest,
    ) -> aws_api::Result<RegisterJobDefinitionResponse>;

    async fn deregister_job_definition(&self, job_definition: &str) -> aws_api::Result<()>;

    async fn submit_job(&self, req: &SubmitJobRequest) -> aws_api::Result<SubmitJobResponse>;

    async fn cancel_job(&self, job_id: &str, reason: &str) -> aws_api::Result<()>;

    async fn terminate_job(&self, job_id: &str, reason: &str) -> aws_api::Result<()>;

    async fn describe_jobs(&self, job_ids: &[String]) -> aws_api::Result<DescribeJobsResponse>;
}

#[async_trait]
impl BatchApi for BatchClient {
    async fn register_job_definition(
        &self,
        req: &RegisterJobDefinitionRequest,
    ) -> aws_api::Result<RegisterJobDefinitionResponse> {
        BatchClient::register_job_definition(self, req).await
    }

    async fn deregister_job_definition(&self, job_definition: &str) -> aws_api::Result<()> {
        BatchClient::deregister_job_definition(self, job_definition).await
    }

    async fn submit_job(&self, req: &SubmitJobRequest) -> aws_api::Result<SubmitJobResponse> {
        BatchClient::submit_job(self, req).await
    }

    async fn cancel_job(&self, job_id: &str, reason: &str) -> aws_api::Result<()> {
        BatchClient::cancel_job(self, job_id, reason).await
    }

    async fn terminate_job(&self, job_id: &str, reason: &str) -> aws_api::Result<()> {
        BatchClient::terminate_job(self, job_id, reason).await
    }

    async fn describe_jobs(&self, job_ids: &[String]) -> aws_api::Result<DescribeJobsResponse> {
        BatchClient::describe_jobs(self, job_ids).await
    }
}

/// Submits servers as AWS Batch jobs on the configured queue.
pub struct BatchSpawner {
    batch: Arc<dyn BatchApi>,
    settings: Arc<SpawnerSettings>,
    store: Arc<dyn ServerStore>,
}

impl BatchSpawner {
    pub fn new(
        batch: Arc<dyn BatchApi>,
        settings: Arc<SpawnerSettings>,
        store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            batch,
            settings,
            store,
        }
    }

    pub fn job_definition(&self, server: &Server, ssh_present: bool) -> RegisterJobDefinitionRequest {
        let settings = &self.settings;
        let mounts = builder::mounts(server, settings, ssh_present);

        RegisterJobDefinitionRequest {
            job_definition_name: server.container_name(),
            kind: "container".into(),
            container_properties: ContainerProperties {
                image: server.image_name.clone(),
                vcpus: (server.server_size.cpu.ceil() as i32).max(1),
                memory: server.server_size.memory,
                command: builder::command(server, settings),
                environment: builder::environment(server)
                    .into_iter()
                    .map(|(name, value)| KeyValuePair { name, value })
                    .collect(),
                mount_points: mounts
                    .iter()
                    .map(|m| MountPoint {
                        source_volume: m.name.clone(),
                        container_path: m.container_path.clone(),
                        read_only: m.read_only,
                    })
                    .collect(),
                volumes: mounts
                    .iter()
                    .map(|m| Volume {
                        name: m.name.clone(),
                        host: HostVolumeProperties {
                            source_path: m.host_path.to_string_lossy().into_owned(),
                        },
                    })
                    .collect(),
            },
            retry_strategy: Some(RetryStrategy {
                attempts: RETRY_ATTEMPTS,
            }),
        }
    }

    async fn job_status(&self, job_id: &str) -> Result<Option<String>> {
        let resp = within(
            self.settings.call_timeout,
            "describe jobs",
            self.batch.describe_jobs(&[job_id.to_string()]),
        )
        .await?;
        Ok(resp.jobs.into_iter().next().map(|j| j.status))
    }
}

#[async_trait]
impl Spawner for BatchSpawner {
    async fn start(&self, server: &mut Server) -> Result<()> {
        let timeout = self.settings.call_timeout;

        let job_definition = match &server.config.batch.job_definition_arn {
            Some(arn) => arn.clone(),
            None => {
                let ssh = builder::ssh_present(server, &self.settings).await;
                let req = self.job_definition(server, ssh);
                let resp = within(
                    timeout,
                    "register job definition",
                    self.batch.register_job_definition(&req),
                )
                .await?;
                server.config.batch.job_definition_arn = Some(resp.job_definition_arn.clone());
                self.store.save_server_config(server).await?;
                info!(server_id = %server.id, job_definition = %resp.job_definition_arn, "batch: job definition registered");
                resp.job_definition_arn
            }
        };

        if let Some(job_id) = &server.config.batch.job_id {
            if let Some(current) = self.job_status(job_id).await? {
                if matches!(
                    status::from_batch(&current),
                    ServerStatus::Launching | ServerStatus::Running
                ) {
                    info!(server_id = %server.id, job_id = %job_id, "batch: job already submitted");
                    return Ok(());
                }
            }
        }

        let resp = within(
            timeout,
            "submit job",
            self.batch.submit_job(&SubmitJobRequest {
                job_name: server.container_name(),
                job_queue: self.settings.batch_queue.clone(),
                job_definition,
                depends_on: server
                    .config
                    .depends_on
                    .iter()
                    .map(|job_id| JobDependency {
                        job_id: job_id.clone(),
                    })
                    .collect(),
                retry_strategy: Some(RetryStrategy {
                    attempts: RETRY_ATTEMPTS,
                }),
            }),
        )
        .await?;

        server.config.batch.job_id = Some(resp.job_id.clone());
        self.store.save_server_config(server).await?;
        info!(server_id = %server.id, job_id = %resp.job_id, "batch: job submitted");
        Ok(())
    }

    async fn stop(&self, server: &mut Server) -> Result<()> {
        let Some(job_id) = server.config.batch.job_id.clone() else {
            return Ok(());
        };

        let result = within(
            self.settings.call_timeout,
            "cancel job",
            self.batch.cancel_job(&job_id, "Stopped by user request"),
        )
        .await;
        ignore_not_found(result, "job", server)?;

        server.config.batch.job_id = None;
        self.store.save_server_config(server).await?;
        info!(server_id = %server.id, job_id = %job_id, "batch: job cancelled");
        Ok(())
    }

    async fn terminate(&self, server: &mut Server) -> Result<()> {
        let timeout = self.settings.call_timeout;

        if let Some(job_id) = server.config.batch.job_id.clone() {
            let result = within(
                timeout,
                "terminate job",
                self.batch.terminate_job(&job_id, "Terminated by user request"),
            )
            .await;
            ignore_not_found(result, "job", server)?;

            server.config.batch.job_id = None;
            self.store.save_server_config(server).await?;
            info!(server_id = %server.id, job_id = %job_id, "batch: job terminated");
        }

        if let Some(arn) = server.config.batch.job_definition_arn.clone() {
            let result = within(
                timeout,
                "deregister job definition",
                self.batch.deregister_job_definition(&arn),
            )
            .await;
            ignore_not_found(result, "job definition", server)?;

            server.config.batch.job_definition_arn = None;
            self.store.save_server_config(server).await?;
            info!(server_id = %server.id, job_definition = %arn, "batch: job definition deregistered");
        }

        Ok(())
    }

    async fn status(&self, server: &Server) -> ServerStatus {
        let Some(job_id) = &server.config.batch.job_id else {
            return ServerStatus::Stopped;
        };

        match self.job_status(job_id).await {
            Ok(Some(current)) => status::from_batch(&current),
            Ok(None) => ServerStatus::Stopped,
            Err(e) => {
                warn!(server_id = %server.id, error = %e, "batch: status check failed");
                ServerStatus::Error
            }
        }
    }

    fn kind(&self) -> SpawnerKind {
        SpawnerKind::Batch
    }
}
