use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use crate::{Error, Result};

const DEFAULT_JUPYTER_COMMAND: &str = "start-notebook.sh --NotebookApp.token='' \
     --NotebookApp.base_url={base_url} --NotebookApp.allow_origin=*";

/// Lambda + API Gateway deployment settings.
#[derive(Debug, Clone, Default)]
pub struct LambdaSettings {
    /// Execution role assumed by deployed functions.
    pub role_arn: Option<String>,
    /// Lambda function backing the per-API request authorizer.
    pub authorizer_arn: Option<String>,
    /// Needed to build `execute-api` source ARNs.
    pub account_id: Option<String>,
    pub timeout_secs: i32,
    pub memory_size: i32,
}

/// Process-wide spawner settings shared by every backend.
#[derive(Debug, Clone)]
pub struct SpawnerSettings {
    /// Leading segment of every route path, e.g. `v1`.
    pub api_version: String,
    /// Base URL the in-container runner reports back to.
    pub webhook_root: String,
    pub secret_key: String,
    /// Host directory holding `{namespace}/{project_id}` resource trees.
    pub resource_root: PathBuf,
    pub docker_network: String,
    /// ECS cluster name or ARN.
    pub ecs_cluster: String,
    pub ecs_log_group: Option<String>,
    pub batch_queue: String,
    /// Role EventBridge assumes to run scheduled tasks.
    pub events_role_arn: Option<String>,
    /// Server type to command template.
    pub server_commands: BTreeMap<String, String>,
    /// Container port to endpoint name.
    pub server_ports: BTreeMap<u16, String>,
    pub call_timeout: Duration,
    pub max_dependency_depth: usize,
    pub gpu: bool,
    pub lambda: LambdaSettings,
}

impl Default for SpawnerSettings {
    fn default() -> Self {
        Self {
            api_version: "v1".into(),
            webhook_root: String::new(),
            secret_key: String::new(),
            resource_root: PathBuf::from("/workspaces"),
            docker_network: "illumidesk".into(),
            ecs_cluster: "default".into(),
            ecs_log_group: None,
            batch_queue: "default".into(),
            events_role_arn: None,
            server_commands: BTreeMap::from([(
                "jupyter".to_string(),
                DEFAULT_JUPYTER_COMMAND.to_string(),
            )]),
            server_ports: BTreeMap::from([
                (8888, "jupyter".to_string()),
                (8000, "restful".to_string()),
                (6006, "tensorboard".to_string()),
            ]),
            call_timeout: Duration::from_secs(30),
            max_dependency_depth: 8,
            gpu: false,
            lambda: LambdaSettings {
                timeout_secs: 30,
                memory_size: 512,
                ..Default::default()
            },
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.parse().map_err(|e: T::Err| Error::InvalidEnv {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn json_var<T: serde::de::DeserializeOwned>(name: &str) -> Result<Option<T>> {
    var(name)
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|e| Error::InvalidEnv {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

impl SpawnerSettings {
    /// Load from `ILD_*` env vars; only `ILD_SECRET_KEY` is required.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let secret_key =
            var("ILD_SECRET_KEY").ok_or_else(|| Error::MissingEnv("ILD_SECRET_KEY".into()))?;

        let server_ports = match json_var::<BTreeMap<String, String>>("ILD_SERVER_PORTS")? {
            Some(raw) => raw
                .into_iter()
                .map(|(port, name)| {
                    port.parse::<u16>()
                        .map(|port| (port, name))
                        .map_err(|e| Error::InvalidEnv {
                            name: "ILD_SERVER_PORTS".into(),
                            reason: format!("{port}: {e}"),
                        })
                })
                .collect::<Result<_>>()?,
            None => defaults.server_ports,
        };

        Ok(Self {
            api_version: var("ILD_API_VERSION").unwrap_or(defaults.api_version),
            webhook_root: var("ILD_WEBHOOK_ROOT").unwrap_or_default(),
            secret_key,
            resource_root: var("ILD_RESOURCE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.resource_root),
            docker_network: var("ILD_DOCKER_NETWORK").unwrap_or(defaults.docker_network),
            ecs_cluster: var("ILD_ECS_CLUSTER").unwrap_or(defaults.ecs_cluster),
            ecs_log_group: var("ILD_ECS_LOG_GROUP"),
            batch_queue: var("ILD_BATCH_QUEUE").unwrap_or(defaults.batch_queue),
            events_role_arn: var("ILD_EVENTS_ROLE_ARN"),
            server_commands: json_var("ILD_SERVER_COMMANDS")?.unwrap_or(defaults.server_commands),
            server_ports,
            call_timeout: parse_var::<u64>("ILD_CALL_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            max_dependency_depth: parse_var("ILD_MAX_DEPENDENCY_DEPTH")?
                .unwrap_or(defaults.max_dependency_depth),
            gpu: parse_var("ILD_GPU")?.unwrap_or(false),
            lambda: LambdaSettings {
                role_arn: var("ILD_LAMBDA_ROLE_ARN"),
                authorizer_arn: var("ILD_LAMBDA_AUTHORIZER_ARN"),
                account_id: var("ILD_AWS_ACCOUNT_ID"),
                timeout_secs: parse_var("ILD_LAMBDA_TIMEOUT_SECS")?
                    .unwrap_or(defaults.lambda.timeout_secs),
                memory_size: parse_var("ILD_LAMBDA_MEMORY_MB")?
                    .unwrap_or(defaults.lambda.memory_size),
            },
        })
    }

    /// Host directory holding a project's files.
    pub fn project_dir(&self, namespace: &str, project_id: Uuid) -> PathBuf {
        self.resource_root
            .join(namespace)
            .join(project_id.to_string())
    }

    pub fn account_id(&self) -> Result<&str> {
        self.lambda
            .account_id
            .as_deref()
            .ok_or_else(|| Error::MissingEnv("ILD_AWS_ACCOUNT_ID".into()))
    }

    /// Cluster ARN, as EventBridge targets require one.
    pub fn ecs_cluster_arn(&self, region: &str) -> Result<String> {
        if self.ecs_cluster.starts_with("arn:") {
            return Ok(self.ecs_cluster.clone());
        }
        Ok(format!(
            "arn:aws:ecs:{region}:{}:cluster/{}",
            self.account_id()?,
            self.ecs_cluster
        ))
    }
}
