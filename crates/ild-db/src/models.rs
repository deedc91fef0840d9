use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::Error;

// ── ServerStatus ────────────────────────────────────────────────────

/// Canonical lifecycle status shared by every backend.
///
/// `Scheduled` is only reported for cron workloads whose rule is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerStatus {
    Launching,
    Running,
    Stopped,
    Error,
    Scheduled,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Launching => "Launching",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
            Self::Scheduled => "Scheduled",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "Launching" => Ok(Self::Launching),
            "Running" => Ok(Self::Running),
            "Stopped" => Ok(Self::Stopped),
            "Error" => Ok(Self::Error),
            "Scheduled" => Ok(Self::Scheduled),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

// ── ServerSize ──────────────────────────────────────────────────────

/// CPU/memory/cost descriptor attached to a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSize {
    pub id: Uuid,
    pub name: String,
    /// Number of vCPUs; fractional values are allowed.
    pub cpu: f64,
    /// Memory in MiB.
    pub memory: i32,
    pub cost_per_second: f64,
}

// ── Typed config states ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcsState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_arn: Option<String>,
}

/// A rule target EventBridge refused to attach or detach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailedTarget {
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_definition_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// The server's persisted `config` JSON object.
///
/// Backend states are flattened so the stored shape stays a single flat
/// object; keys this crate does not know about are carried in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub server_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Cron expression for scheduled workloads, e.g. `cron(0 12 * * ? *)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(flatten)]
    pub docker: DockerState,
    #[serde(flatten)]
    pub ecs: EcsState,
    #[serde(flatten)]
    pub rule: RuleState,
    #[serde(flatten)]
    pub batch: BatchState,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServerConfig {
    pub fn is_type(&self, server_type: &str) -> bool {
        self.server_type.as_deref() == Some(server_type)
    }
}

// ── Server ──────────────────────────────────────────────────────────

/// Another server this one links to; it must be started first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedServer {
    pub id: Uuid,
    pub name: String,
}

/// A provisioned compute workload as loaded from the web layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub project_id: Uuid,
    /// Owner's username; namespaces routes and resource paths.
    pub namespace: String,
    pub image_name: String,
    pub server_size: ServerSize,
    pub config: ServerConfig,
    pub env_vars: BTreeMap<String, String>,
    pub startup_script: Option<String>,
    pub connected: Vec<ConnectedServer>,
    pub status: ServerStatus,
    /// Owner profile timezone, `None` when the profile is missing.
    pub timezone: Option<String>,
    pub access_token: String,
}

impl Server {
    /// Deterministic backend-side name for a server id.
    pub fn container_name_for(id: Uuid) -> String {
        format!("server-{}", id.simple())
    }

    pub fn container_name(&self) -> String {
        Self::container_name_for(self.id)
    }
}

// ── Deployment ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framework {
    pub name: String,
    pub version: String,
    /// Zip archive merged into the function package.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LambdaState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_api_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    /// Project-relative paths packaged into the function.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,

    #[serde(flatten)]
    pub lambda: LambdaState,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A serverless function deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub name: String,
    pub project_id: Uuid,
    pub namespace: String,
    /// Lambda runtime identifier, e.g. `python3.12`.
    pub runtime: String,
    pub framework: Option<Framework>,
    pub http_method: String,
    pub access_token: String,
    pub config: DeploymentConfig,
}

impl Deployment {
    pub fn function_name(&self) -> String {
        format!("deployment-{}", self.id.simple())
    }
}
