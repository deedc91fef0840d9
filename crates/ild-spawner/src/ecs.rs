use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_api::{
    ContainerDefinition, DescribeTasksRequest, DescribeTasksResponse, Device, EcsClient,
    HostVolumeProperties, KeyValuePair, LinuxParameters, LogConfiguration, MountPoint,
    PortMapping, RegisterTaskDefinitionRequest, RegisterTaskDefinitionResponse, RunTaskRequest,
    RunTaskResponse, StopTaskRequest, StopTaskResponse, Volume,
};
use ild_db::{Server, ServerStatus, ServerStore};
use tracing::{info, warn};

use crate::builder;
use crate::config::SpawnerSettings;
use crate::devices::{DeviceBuilder, NoDevices};
use crate::labels::{LabelBuilder, TraefikLabels};
use crate::{Error, Result, Spawner, SpawnerKind, status, within};

const STOP_REASON: &str = "Server stopped by user request";

/// ECS operations used by the task-based spawners.
#[async_trait]
pub trait EcsApi: Send + Sync + 'static {
    fn region(&self) -> &str;

    async fn register_task_definition(
        &self,
        req: &RegisterTaskDefinitionRequest,
    ) -> aws_api::Result<RegisterTaskDefinitionResponse>;

    async fn deregister_task_definition(&self, task_definition: &str) -> aws_api::Result<()>;

    async fn run_task(&self, req: &RunTaskRequest) -> aws_api::Result<RunTaskResponse>;

    async fn stop_task(&self, req: &StopTaskRequest) -> aws_api::Result<StopTaskResponse>;

    async fn describe_tasks(&self, req: &DescribeTasksRequest)
    -> aws_api::Result<DescribeTasksResponse>;
}

#[async_trait]
impl EcsApi for EcsClient {
    fn region(&self) -> &str {
        EcsClient::region(self)
    }

    async fn register_task_definition(
        &self,
        req: &RegisterTaskDefinitionRequest,
    ) -> aws_api::Result<RegisterTaskDefinitionResponse> {
        EcsClient::register_task_definition(self, req).await
    }

    async fn deregister_task_definition(&self, task_definition: &str) -> aws_api::Result<()> {
        EcsClient::deregister_task_definition(self, task_definition).await
    }

    async fn run_task(&self, req: &RunTaskRequest) -> aws_api::Result<RunTaskResponse> {
        EcsClient::run_task(self, req).await
    }

    async fn stop_task(&self, req: &StopTaskRequest) -> aws_api::Result<StopTaskResponse> {
        EcsClient::stop_task(self, req).await
    }

    async fn describe_tasks(
        &self,
        req: &DescribeTasksRequest,
    ) -> aws_api::Result<DescribeTasksResponse> {
        EcsClient::describe_tasks(self, req).await
    }
}

/// Tolerate "already gone" on teardown calls.
pub(crate) fn ignore_not_found(result: Result<()>, what: &str, server: &Server) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            warn!(server_id = %server.id, resource = what, "already gone");
            Ok(())
        }
        other => other,
    }
}

/// Runs each server as a single-container ECS task.
pub struct EcsSpawner {
    ecs: Arc<dyn EcsApi>,
    settings: Arc<SpawnerSettings>,
    store: Arc<dyn ServerStore>,
    labels: Arc<dyn LabelBuilder>,
    devices: Arc<dyn DeviceBuilder>,
}

impl EcsSpawner {
    pub fn new(
        ecs: Arc<dyn EcsApi>,
        settings: Arc<SpawnerSettings>,
        store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            ecs,
            settings,
            store,
            labels: Arc::new(TraefikLabels::default()),
            devices: Arc::new(NoDevices),
        }
    }

    pub fn with_labels(mut self, labels: Arc<dyn LabelBuilder>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_devices(mut self, devices: Arc<dyn DeviceBuilder>) -> Self {
        self.devices = devices;
        self
    }

    pub fn region(&self) -> &str {
        self.ecs.region()
    }

    /// Task definition for a server; the family is its container name.
    pub fn task_definition(&self, server: &Server, ssh_present: bool) -> RegisterTaskDefinitionRequest {
        let settings = &self.settings;
        let name = server.container_name();
        let memory = server.server_size.memory;

        let mounts = builder::mounts(server, settings, ssh_present);
        let volumes = mounts
            .iter()
            .map(|m| Volume {
                name: m.name.clone(),
                host: HostVolumeProperties {
                    source_path: m.host_path.to_string_lossy().into_owned(),
                },
            })
            .collect();
        let mount_points = mounts
            .iter()
            .map(|m| MountPoint {
                source_volume: m.name.clone(),
                container_path: m.container_path.clone(),
                read_only: m.read_only,
            })
            .collect();

        let devices: Vec<Device> = self
            .devices
            .devices(server)
            .iter()
            .map(|d| Device {
                host_path: d.host_path.clone(),
                container_path: d.container_path.clone(),
                permissions: d.ecs_permissions(),
            })
            .collect();

        let log_configuration = settings.ecs_log_group.as_ref().map(|group| LogConfiguration {
            log_driver: "awslogs".into(),
            options: HashMap::from([
                ("awslogs-group".to_string(), group.clone()),
                ("awslogs-region".to_string(), self.region().to_string()),
                ("awslogs-stream-prefix".to_string(), "servers".to_string()),
            ]),
        });

        let routes = builder::routes(server, settings);

        RegisterTaskDefinitionRequest {
            family: name.clone(),
            container_definitions: vec![ContainerDefinition {
                name,
                image: server.image_name.clone(),
                cpu: (server.server_size.cpu * 1024.0) as i32,
                memory: Some(memory),
                memory_reservation: Some(memory / 2),
                essential: true,
                port_mappings: settings
                    .server_ports
                    .keys()
                    .map(|port| PortMapping {
                        container_port: *port,
                        protocol: "tcp".into(),
                    })
                    .collect(),
                links: builder::links(server),
                command: builder::command(server, settings),
                environment: builder::environment(server)
                    .into_iter()
                    .map(|(name, value)| KeyValuePair { name, value })
                    .collect(),
                mount_points,
                docker_labels: self.labels.labels(server, &routes).into_iter().collect(),
                linux_parameters: (!devices.is_empty()).then_some(LinuxParameters { devices }),
                log_configuration,
            }],
            volumes,
            network_mode: Some("bridge".into()),
        }
    }

    /// Register the server's task definition unless one is recorded.
    pub async fn ensure_task_definition(&self, server: &mut Server) -> Result<String> {
        if let Some(arn) = &server.config.ecs.task_definition_arn {
            return Ok(arn.clone());
        }

        let ssh = builder::ssh_present(server, &self.settings).await;
        let req = self.task_definition(server, ssh);
        let resp = within(
            self.settings.call_timeout,
            "register task definition",
            self.ecs.register_task_definition(&req),
        )
        .await?;

        let arn = resp.task_definition.task_definition_arn;
        server.config.ecs.task_definition_arn = Some(arn.clone());
        self.store.save_server_config(server).await?;
        info!(server_id = %server.id, task_definition = %arn, "ecs: task definition registered");
        Ok(arn)
    }

    /// Deregister the recorded task definition, if any, and forget it.
    pub async fn deregister(&self, server: &mut Server) -> Result<()> {
        let Some(arn) = server.config.ecs.task_definition_arn.clone() else {
            return Ok(());
        };

        let result = within(
            self.settings.call_timeout,
            "deregister task definition",
            self.ecs.deregister_task_definition(&arn),
        )
        .await;
        ignore_not_found(result, "task definition", server)?;

        server.config.ecs.task_definition_arn = None;
        self.store.save_server_config(server).await?;
        info!(server_id = %server.id, task_definition = %arn, "ecs: task definition deregistered");
        Ok(())
    }

    async fn describe_task(&self, task_arn: &str) -> Result<Option<String>> {
        let resp = within(
            self.settings.call_timeout,
            "describe tasks",
            self.ecs.describe_tasks(&DescribeTasksRequest {
                cluster: self.settings.ecs_cluster.clone(),
                tasks: vec![task_arn.to_string()],
            }),
        )
        .await?;
        Ok(resp.tasks.into_iter().next().and_then(|t| t.last_status))
    }
}

#[async_trait]
impl Spawner for EcsSpawner {
    async fn start(&self, server: &mut Server) -> Result<()> {
        let task_definition = self.ensure_task_definition(server).await?;

        if let Some(task_arn) = &server.config.ecs.task_arn {
            if let Some(last) = self.describe_task(task_arn).await? {
                if matches!(
                    status::from_ecs(&last),
                    ServerStatus::Launching | ServerStatus::Running
                ) {
                    info!(server_id = %server.id, task_arn = %task_arn, "ecs: task already running");
                    return Ok(());
                }
            }
        }

        let resp = within(
            self.settings.call_timeout,
            "run task",
            self.ecs.run_task(&RunTaskRequest {
                cluster: self.settings.ecs_cluster.clone(),
                task_definition: task_definition.clone(),
                count: 1,
                started_by: Some(server.id.simple().to_string()),
            }),
        )
        .await?;

        let Some(task) = resp.tasks.into_iter().next() else {
            let reason = resp
                .failures
                .iter()
                .filter_map(|f| f.reason.as_deref())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::TaskNotStarted {
                family: task_definition,
                reason,
            });
        };

        server.config.ecs.task_arn = Some(task.task_arn.clone());
        self.store.save_server_config(server).await?;
        info!(server_id = %server.id, task_arn = %task.task_arn, "ecs: task started");
        Ok(())
    }

    async fn stop(&self, server: &mut Server) -> Result<()> {
        let Some(task_arn) = server.config.ecs.task_arn.clone() else {
            return Ok(());
        };

        let result = within(
            self.settings.call_timeout,
            "stop task",
            self.ecs.stop_task(&StopTaskRequest {
                cluster: self.settings.ecs_cluster.clone(),
                task: task_arn.clone(),
                reason: STOP_REASON.into(),
            }),
        )
        .await
        .map(|_| ());
        ignore_not_found(result, "task", server)?;

        server.config.ecs.task_arn = None;
        self.store.save_server_config(server).await?;
        info!(server_id = %server.id, task_arn = %task_arn, "ecs: task stopped");
        Ok(())
    }

    async fn terminate(&self, server: &mut Server) -> Result<()> {
        self.stop(server).await?;
        self.deregister(server).await
    }

    async fn status(&self, server: &Server) -> ServerStatus {
        let ecs = &server.config.ecs;
        let (Some(_), Some(task_arn)) = (&ecs.task_definition_arn, &ecs.task_arn) else {
            return ServerStatus::Stopped;
        };

        match self.describe_task(task_arn).await {
            Ok(Some(last)) => status::from_ecs(&last),
            Ok(None) => ServerStatus::Stopped,
            Err(e) => {
                warn!(server_id = %server.id, error = %e, "ecs: status check failed");
                ServerStatus::Error
            }
        }
    }

    fn kind(&self) -> SpawnerKind {
        SpawnerKind::Ecs
    }
}
