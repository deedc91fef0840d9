//! Pure derivations shared by every container backend: the launch command,
//! environment, host mounts, links and route paths of a server.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ild_db::Server;

use crate::config::SpawnerSettings;

/// Prefix binary baked into every non-Jupyter image.
pub const RUNNER: &str = "runner";

const JUPYTER: &str = "jupyter";
const RESOURCES_PATH: &str = "/resources";
const SSH_PATH: &str = "/home/jovyan/.ssh";
const STARTUP_PATH: &str = "/home/jovyan/.ipython/profile_default/startup";

// ── Command ─────────────────────────────────────────────────────────

/// Command vector for a server.
///
/// Non-Jupyter servers run under the runner, which reports back to the
/// webhook root; Jupyter servers only run their type's command template.
pub fn command(server: &Server, settings: &SpawnerSettings) -> Vec<String> {
    let config = &server.config;
    let server_type = config.server_type.as_deref().unwrap_or_default();
    let template = settings
        .server_commands
        .get(server_type)
        .map(|t| render(t, server, settings));

    if server_type == JUPYTER {
        return template.map(|t| split(&t)).unwrap_or_default();
    }

    let mut cmd = vec![
        RUNNER.to_string(),
        format!("--key={}", server.access_token),
        format!("--ns={}", server.namespace),
        format!("--projectID={}", server.project_id),
        format!("--serverID={}", server.id),
        format!("--root={}", settings.webhook_root),
        format!("--secret={}", settings.secret_key),
    ];
    if let Some(script) = &config.script {
        cmd.push(format!("--script={script}"));
    }
    if let Some(function) = &config.function {
        cmd.push(format!("--function={function}"));
    }
    if let Some(template) = template {
        cmd.extend(split(&template));
    }
    if let Some(user) = &config.command {
        cmd.extend(split(user));
    }
    cmd
}

fn split(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(String::from).collect()
}

/// Substitute `{server_id}`, `{project_id}`, `{namespace}`, `{version}`
/// and `{base_url}` in a command template.
fn render(template: &str, server: &Server, settings: &SpawnerSettings) -> String {
    let server_type = server.config.server_type.as_deref().unwrap_or(JUPYTER);
    template
        .replace("{server_id}", &server.id.to_string())
        .replace("{project_id}", &server.project_id.to_string())
        .replace("{namespace}", &server.namespace)
        .replace("{version}", &settings.api_version)
        .replace("{base_url}", &route_path(server, settings, server_type))
}

// ── Environment ─────────────────────────────────────────────────────

/// User env vars plus the derived `TZ`.
pub fn environment(server: &Server) -> BTreeMap<String, String> {
    let mut env = server.env_vars.clone();
    env.insert(
        "TZ".into(),
        server.timezone.clone().unwrap_or_else(|| "UTC".into()),
    );
    env
}

/// `KEY=value` strings in key order.
pub fn environment_pairs(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

// ── Mounts ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Volume name for backends that declare volumes separately.
    pub name: String,
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl Mount {
    /// Docker `-v` form: `host:container:rw|ro`.
    pub fn bind(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            if self.read_only { "ro" } else { "rw" }
        )
    }
}

pub fn resource_dir(server: &Server, settings: &SpawnerSettings) -> PathBuf {
    settings.project_dir(&server.namespace, server.project_id)
}

/// `.ssh` directory one level above the resource dir.
pub fn ssh_dir(server: &Server, settings: &SpawnerSettings) -> PathBuf {
    settings
        .resource_root
        .join(&server.namespace)
        .join(".ssh")
}

/// Host mounts for a server. `ssh_present` says whether [`ssh_dir`] exists
/// on the host; callers check it so this stays pure.
pub fn mounts(server: &Server, settings: &SpawnerSettings, ssh_present: bool) -> Vec<Mount> {
    let resources = resource_dir(server, settings);
    let mut mounts = vec![Mount {
        name: "resources".into(),
        host_path: resources.clone(),
        container_path: RESOURCES_PATH.into(),
        read_only: false,
    }];

    if ssh_present {
        mounts.push(Mount {
            name: "ssh".into(),
            host_path: ssh_dir(server, settings),
            container_path: SSH_PATH.into(),
            read_only: true,
        });
    }

    if let Some(script) = &server.startup_script {
        let file = Path::new(script)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "startup.py".into());
        mounts.push(Mount {
            name: "startup".into(),
            host_path: resources.join(script.trim_start_matches('/')),
            container_path: format!("{STARTUP_PATH}/{file}"),
            read_only: true,
        });
    }

    mounts
}

/// Probe the host for the server's `.ssh` directory.
pub async fn ssh_present(server: &Server, settings: &SpawnerSettings) -> bool {
    tokio::fs::try_exists(ssh_dir(server, settings))
        .await
        .unwrap_or(false)
}

// ── Links ───────────────────────────────────────────────────────────

/// `container:alias` links to every connected server.
pub fn links(server: &Server) -> Vec<String> {
    server
        .connected
        .iter()
        .map(|c| format!("{}:{}", Server::container_name_for(c.id), alias(&c.name)))
        .collect()
}

/// Hostname-safe form of a server name.
pub fn alias(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    slug.trim_matches('-').to_string()
}

// ── Routes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub port: u16,
    pub endpoint: String,
    pub path: String,
}

/// `/{version}/{namespace}/projects/{project}/servers/{server}/endpoint/{endpoint}`
pub fn route_path(server: &Server, settings: &SpawnerSettings, endpoint: &str) -> String {
    format!(
        "/{}/{}/projects/{}/servers/{}/endpoint/{}",
        settings.api_version, server.namespace, server.project_id, server.id, endpoint
    )
}

pub fn routes(server: &Server, settings: &SpawnerSettings) -> Vec<Route> {
    settings
        .server_ports
        .iter()
        .map(|(port, endpoint)| Route {
            port: *port,
            endpoint: endpoint.clone(),
            path: route_path(server, settings, endpoint),
        })
        .collect()
}
