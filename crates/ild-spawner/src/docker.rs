use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{DeviceMapping as DockerDevice, EndpointSettings, HostConfig, LocalNodeState};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use futures_util::StreamExt;
use ild_db::{Server, ServerStatus, ServerStore};
use tracing::{info, warn};

use crate::builder;
use crate::config::SpawnerSettings;
use crate::devices::{DeviceBuilder, DeviceMapping, NoDevices};
use crate::labels::{LabelBuilder, TraefikLabels};
use crate::{Result, Spawner, SpawnerKind, status, within};

/// What the spawner needs to know about an existing container.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    pub id: String,
    /// `KEY=value` entries, image-defined ones included.
    pub env: Vec<String>,
    /// `State.Status`, e.g. `running`.
    pub state: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// Everything needed to create a server container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub binds: Vec<String>,
    pub links: Vec<String>,
    pub devices: Vec<DeviceMapping>,
    pub network: String,
    pub network_aliases: Vec<String>,
}

/// The slice of the Docker Engine API the spawner uses.
///
/// Removal and stop report whether the container existed instead of
/// failing on a missing one.
#[async_trait]
pub trait DockerEngine: Send + Sync + 'static {
    async fn swarm_active(&self) -> Result<bool>;

    async fn network_exists(&self, name: &str) -> Result<bool>;

    async fn create_network(&self, name: &str, driver: &str) -> Result<()>;

    /// Look a container up by name or id.
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Create a named container, pulling the image first if it is missing.
    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String>;

    /// Start a container; already running counts as started.
    async fn start_container(&self, id: &str) -> Result<()>;

    async fn stop_container(&self, name: &str) -> Result<bool>;

    /// Force-remove a container.
    async fn remove_container(&self, name: &str) -> Result<bool>;
}

// ── Bollard engine ──────────────────────────────────────────────────

fn has_status(err: &BollardError, code: u16) -> bool {
    matches!(err, BollardError::DockerResponseServerError { status_code, .. } if *status_code == code)
}

/// Split `repo[:tag]` so a bare repo pulls `latest` instead of every tag.
fn split_image(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}

/// [`DockerEngine`] over the local Docker daemon.
pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    /// Connect using `DOCKER_HOST` or the platform socket.
    pub fn connect() -> Result<Self> {
        Ok(Self {
            docker: Docker::connect_with_local_defaults()?,
        })
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let (repo, tag) = split_image(image);
        info!(image, "docker: pulling image");

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: repo,
                tag,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress?;
        }
        Ok(())
    }

    fn config(spec: &ContainerSpec) -> Config<String> {
        let devices = spec
            .devices
            .iter()
            .map(|d| DockerDevice {
                path_on_host: Some(d.host_path.clone()),
                path_in_container: Some(d.container_path.clone()),
                cgroup_permissions: Some(d.permissions.clone()),
            })
            .collect();

        Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone().into_iter().collect()),
            host_config: Some(HostConfig {
                memory: Some(spec.memory_bytes),
                nano_cpus: Some(spec.nano_cpus),
                binds: Some(spec.binds.clone()),
                links: Some(spec.links.clone()),
                devices: Some(devices),
                network_mode: Some(spec.network.clone()),
                ..Default::default()
            }),
            networking_config: Some(NetworkingConfig {
                endpoints_config: HashMap::from([(
                    spec.network.clone(),
                    EndpointSettings {
                        aliases: Some(spec.network_aliases.clone()),
                        ..Default::default()
                    },
                )]),
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl DockerEngine for BollardEngine {
    async fn swarm_active(&self) -> Result<bool> {
        let info = self.docker.info().await?;
        Ok(matches!(
            info.swarm.and_then(|s| s.local_node_state),
            Some(LocalNodeState::ACTIVE)
        ))
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if has_status(&e, 404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_network(&self, name: &str, driver: &str) -> Result<()> {
        let options = CreateNetworkOptions {
            name,
            driver,
            check_duplicate: true,
            attachable: driver == "overlay",
            ..Default::default()
        };
        match self.docker.create_network(options).await {
            Ok(_) => Ok(()),
            // Created concurrently by another spawner.
            Err(e) if has_status(&e, 409) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let container = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(c) => c,
            Err(e) if has_status(&e, 404) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (env, labels) = container
            .config
            .map(|c| (c.env.unwrap_or_default(), c.labels.unwrap_or_default()))
            .unwrap_or_default();

        Ok(Some(ContainerInfo {
            id: container.id.unwrap_or_default(),
            env,
            labels: labels.into_iter().collect(),
            state: container
                .state
                .and_then(|s| s.status)
                .map(|s| s.to_string()),
        }))
    }

    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        let options = || {
            Some(CreateContainerOptions {
                name: name.to_string(),
                platform: None,
            })
        };

        let created = match self
            .docker
            .create_container(options(), Self::config(spec))
            .await
        {
            Err(e) if has_status(&e, 404) => {
                self.pull(&spec.image).await?;
                self.docker
                    .create_container(options(), Self::config(spec))
                    .await?
            }
            other => other?,
        };

        for warning in &created.warnings {
            warn!(container = name, warning = %warning, "docker: create warning");
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        match self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if has_status(&e, 304) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop_container(&self, name: &str) -> Result<bool> {
        match self
            .docker
            .stop_container(name, None::<StopContainerOptions>)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) if has_status(&e, 304) => Ok(true),
            Err(e) if has_status(&e, 404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<bool> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(true),
            Err(e) if has_status(&e, 404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Spawner ─────────────────────────────────────────────────────────

/// Container label holding the comma-separated keys the spawner set.
pub const ENV_KEYS_LABEL: &str = "ild.env-keys";

fn env_keys(env: &BTreeMap<String, String>) -> String {
    env.keys().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Whether `container`'s environment differs from `desired`.
///
/// Desired values must all be present. A key recorded in
/// [`ENV_KEYS_LABEL`] but no longer desired is drift too; extra variables
/// baked into the image are not. Containers without the label are
/// compared by value only.
pub fn env_drift(container: &ContainerInfo, desired: &BTreeMap<String, String>) -> bool {
    if let Some(keys) = container.labels.get(ENV_KEYS_LABEL) {
        if *keys != env_keys(desired) {
            return true;
        }
    }

    let current: HashMap<&str, &str> = container
        .env
        .iter()
        .map(|entry| entry.split_once('=').unwrap_or((entry.as_str(), "")))
        .collect();

    desired
        .iter()
        .any(|(key, value)| current.get(key.as_str()) != Some(&value.as_str()))
}

/// Runs servers as containers on a single Docker host or swarm.
pub struct DockerSpawner {
    engine: Arc<dyn DockerEngine>,
    settings: Arc<SpawnerSettings>,
    store: Arc<dyn ServerStore>,
    labels: Arc<dyn LabelBuilder>,
    devices: Arc<dyn DeviceBuilder>,
}

impl DockerSpawner {
    pub fn new(
        engine: Arc<dyn DockerEngine>,
        settings: Arc<SpawnerSettings>,
        store: Arc<dyn ServerStore>,
    ) -> Self {
        let labels = Arc::new(TraefikLabels::new(Some(settings.docker_network.clone())));
        Self {
            engine,
            settings,
            store,
            labels,
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

    async fn ensure_network(&self) -> Result<()> {
        let timeout = self.settings.call_timeout;
        let network = self.settings.docker_network.as_str();

        if within(timeout, "inspect network", self.engine.network_exists(network)).await? {
            return Ok(());
        }

        let driver = if within(timeout, "docker info", self.engine.swarm_active()).await? {
            "overlay"
        } else {
            "bridge"
        };
        within(timeout, "create network", self.engine.create_network(network, driver)).await?;
        info!(network, driver, "docker: network created");
        Ok(())
    }

    /// Full container spec for a server.
    pub async fn container_spec(
        &self,
        server: &Server,
        env: &BTreeMap<String, String>,
    ) -> ContainerSpec {
        let settings = &self.settings;
        let ssh = builder::ssh_present(server, settings).await;
        let routes = builder::routes(server, settings);

        let mut labels = self.labels.labels(server, &routes);
        labels.insert(ENV_KEYS_LABEL.to_string(), env_keys(env));

        ContainerSpec {
            image: server.image_name.clone(),
            command: builder::command(server, settings),
            env: builder::environment_pairs(env),
            labels,
            memory_bytes: i64::from(server.server_size.memory) * 1024 * 1024,
            nano_cpus: (server.server_size.cpu * 1_000_000_000.0) as i64,
            binds: builder::mounts(server, settings, ssh)
                .iter()
                .map(builder::Mount::bind)
                .collect(),
            links: builder::links(server),
            devices: self.devices.devices(server),
            network: settings.docker_network.clone(),
            network_aliases: vec![builder::alias(&server.name)],
        }
    }

    async fn create(&self, server: &Server, env: &BTreeMap<String, String>) -> Result<String> {
        let name = server.container_name();
        let spec = self.container_spec(server, env).await;
        let id = within(
            self.settings.call_timeout,
            "create container",
            self.engine.create_container(&name, &spec),
        )
        .await?;
        info!(server_id = %server.id, container_id = %id, "docker: container created");
        Ok(id)
    }
}

#[async_trait]
impl Spawner for DockerSpawner {
    async fn start(&self, server: &mut Server) -> Result<()> {
        let timeout = self.settings.call_timeout;
        self.ensure_network().await?;

        let name = server.container_name();
        let env = builder::environment(server);

        let existing = within(timeout, "inspect container", self.engine.inspect_container(&name)).await?;
        let container_id = match existing {
            Some(container) if !env_drift(&container, &env) => container.id,
            Some(_) => {
                info!(server_id = %server.id, "docker: environment changed, recreating container");
                within(timeout, "remove container", self.engine.remove_container(&name)).await?;
                self.create(server, &env).await?
            }
            None => self.create(server, &env).await?,
        };

        if server.config.docker.container_id.as_deref() != Some(container_id.as_str()) {
            server.config.docker.container_id = Some(container_id.clone());
            self.store.save_server_config(server).await?;
        }

        within(timeout, "start container", self.engine.start_container(&container_id)).await?;
        info!(server_id = %server.id, container_id = %container_id, "docker: container started");
        Ok(())
    }

    async fn stop(&self, server: &mut Server) -> Result<()> {
        let Some(container_id) = server.config.docker.container_id.clone() else {
            return Ok(());
        };
        let existed = within(
            self.settings.call_timeout,
            "stop container",
            self.engine.stop_container(&container_id),
        )
        .await?;

        if existed {
            info!(server_id = %server.id, "docker: container stopped");
        } else {
            warn!(server_id = %server.id, "docker: no container to stop");
        }
        Ok(())
    }

    async fn terminate(&self, server: &mut Server) -> Result<()> {
        // By name, so a container whose id was never checkpointed goes too.
        let name = server.container_name();
        let existed = within(
            self.settings.call_timeout,
            "remove container",
            self.engine.remove_container(&name),
        )
        .await?;

        if existed {
            info!(server_id = %server.id, "docker: container removed");
        } else {
            warn!(server_id = %server.id, "docker: no container to remove");
        }

        if server.config.docker.container_id.take().is_some() {
            self.store.save_server_config(server).await?;
        }
        Ok(())
    }

    async fn status(&self, server: &Server) -> ServerStatus {
        let Some(container_id) = server.config.docker.container_id.as_deref() else {
            return ServerStatus::Stopped;
        };
        match within(
            self.settings.call_timeout,
            "inspect container",
            self.engine.inspect_container(container_id),
        )
        .await
        {
            Ok(Some(container)) => container
                .state
                .as_deref()
                .map(status::from_docker)
                .unwrap_or(ServerStatus::Error),
            Ok(None) => ServerStatus::Stopped,
            Err(e) => {
                warn!(server_id = %server.id, error = %e, "docker: status check failed");
                ServerStatus::Error
            }
        }
    }

    fn kind(&self) -> SpawnerKind {
        SpawnerKind::Docker
    }
}
