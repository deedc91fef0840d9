pub mod batch;
pub mod builder;
pub mod config;
pub mod devices;
pub mod docker;
pub mod ecs;
pub mod graph;
pub mod labels;
pub mod lambda;
pub mod lifecycle;
pub mod scheduler;
pub mod status;
pub mod wait;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_api::{AwsClient, AwsConfig};
use ild_db::{Server, ServerStatus, ServerStore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use config::{LambdaSettings, SpawnerSettings};
pub use lambda::LambdaDeployer;
pub use lifecycle::{DeploymentRunner, Orchestrator};
pub use wait::{WaitOptions, wait_for_status};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("aws error: {0}")]
    Aws(#[from] aws_api::Error),

    #[error("store error: {0}")]
    Store(#[from] ild_db::Error),

    #[error("dependency cycle: {}", cycle_path(.0))]
    DependencyCycle(Vec<Uuid>),

    #[error("dependencies of {root} nest deeper than {max} levels")]
    DependencyDepth { root: Uuid, max: usize },

    #[error("failed to remove targets {} from rule {rule}", .failed.join(", "))]
    TargetRemoval { rule: String, failed: Vec<String> },

    #[error("task for {family} did not start: {reason}")]
    TaskNotStarted { family: String, reason: String },

    #[error("api gateway: {0}")]
    Gateway(String),

    #[error("missing config key: {0}")]
    MissingConfig(&'static str),

    #[error("invalid project path: {0}")]
    InvalidPath(String),

    #[error("missing env var: {0}")]
    MissingEnv(String),

    #[error("invalid env var {name}: {reason}")]
    InvalidEnv { name: String, reason: String },

    #[error("unknown spawner: {0}")]
    UnknownSpawner(String),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("cancelled")]
    Cancelled,

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// The backend reports the addressed resource as already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Aws(e) if e.is_not_found())
    }
}

fn cycle_path(ids: &[Uuid]) -> String {
    ids.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, Error>;

/// Bound one outbound call by `timeout`, converting the elapsed case into
/// `Error::Timeout`.
pub(crate) async fn within<T, E, F>(timeout: Duration, operation: &'static str, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<Error>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(Error::Timeout { operation }),
    }
}

// ── SpawnerKind ─────────────────────────────────────────────────────

/// Compute backends a server can be placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnerKind {
    Docker,
    Ecs,
    Scheduler,
    Batch,
}

impl SpawnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Ecs => "ecs",
            Self::Scheduler => "scheduler",
            Self::Batch => "batch",
        }
    }
}

impl fmt::Display for SpawnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpawnerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(Self::Docker),
            "ecs" => Ok(Self::Ecs),
            "scheduler" => Ok(Self::Scheduler),
            "batch" => Ok(Self::Batch),
            other => Err(Error::UnknownSpawner(other.to_string())),
        }
    }
}

// ── Spawner ─────────────────────────────────────────────────────────

/// Backend-agnostic lifecycle of one server.
///
/// Implementations write backend identifiers into `server.config` and
/// checkpoint them through the store after every step, so a failed `start`
/// can be retried without leaking resources. `stop` and `terminate` on a
/// server whose identifiers are absent succeed without touching the config.
#[async_trait]
pub trait Spawner: Send + Sync + 'static {
    async fn start(&self, server: &mut Server) -> Result<()>;

    /// Halt the workload, keeping anything `start` can reuse.
    async fn stop(&self, server: &mut Server) -> Result<()>;

    /// Release every backend resource and clear its identifiers.
    async fn terminate(&self, server: &mut Server) -> Result<()>;

    /// Current backend state. Never fails: unreachable backends report `Error`.
    async fn status(&self, server: &Server) -> ServerStatus;

    fn kind(&self) -> SpawnerKind;
}

// ── Factory ─────────────────────────────────────────────────────────

fn aws_client(settings: &SpawnerSettings) -> Result<AwsClient> {
    let mut config = AwsConfig::from_env()?;
    config.timeout = Some(settings.call_timeout);
    Ok(AwsClient::new(config)?)
}

fn device_builder(settings: &SpawnerSettings) -> Arc<dyn devices::DeviceBuilder> {
    if settings.gpu {
        Arc::new(devices::NvidiaDevices)
    } else {
        Arc::new(devices::NoDevices)
    }
}

/// Build the spawner for `kind` with real backend clients.
pub fn build_spawner(
    kind: SpawnerKind,
    settings: Arc<SpawnerSettings>,
    store: Arc<dyn ServerStore>,
) -> Result<Arc<dyn Spawner>> {
    let devices = device_builder(&settings);

    let spawner: Arc<dyn Spawner> = match kind {
        SpawnerKind::Docker => {
            let engine = docker::BollardEngine::connect()?;
            Arc::new(
                docker::DockerSpawner::new(Arc::new(engine), settings, store).with_devices(devices),
            )
        }
        SpawnerKind::Ecs => {
            let client = aws_api::EcsClient::new(aws_client(&settings)?);
            Arc::new(ecs::EcsSpawner::new(Arc::new(client), settings, store).with_devices(devices))
        }
        SpawnerKind::Scheduler => {
            let aws = aws_client(&settings)?;
            let ecs = ecs::EcsSpawner::new(
                Arc::new(aws_api::EcsClient::new(aws.clone())),
                settings.clone(),
                store.clone(),
            )
            .with_devices(devices);
            let events = aws_api::EventsClient::new(aws);
            Arc::new(scheduler::JobScheduler::new(ecs, Arc::new(events), settings, store))
        }
        SpawnerKind::Batch => {
            let client = aws_api::BatchClient::new(aws_client(&settings)?);
            Arc::new(batch::BatchSpawner::new(Arc::new(client), settings, store))
        }
    };

    tracing::info!(spawner = %kind, "spawner ready");
    Ok(spawner)
}

/// Build the Lambda + API Gateway deployer with real clients.
pub fn build_deployer(
    settings: Arc<SpawnerSettings>,
    store: Arc<dyn ServerStore>,
) -> Result<LambdaDeployer> {
    let aws = aws_client(&settings)?;
    let http = reqwest::Client::builder()
        .timeout(settings.call_timeout)
        .build()?;

    Ok(LambdaDeployer::new(
        Arc::new(aws_api::LambdaClient::new(aws.clone())),
        Arc::new(aws_api::ApiGatewayClient::new(aws)),
        Arc::new(lambda::HttpFrameworkSource::new(http)),
        settings,
        store,
    ))
}
