use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::{
    ConnectedServer, Deployment, DeploymentConfig, Framework, Server, ServerConfig, ServerSize,
    ServerStatus,
};
use crate::{Error, Result};

/// Persistence seam between spawners and the web layer's records.
///
/// Spawners call the `save_*` methods after every provisioning step so a
/// retried call resumes from the last completed step.
#[async_trait]
pub trait ServerStore: Send + Sync + 'static {
    async fn get_server(&self, id: Uuid) -> Result<Server>;

    /// Persist only the `config` column of a server.
    async fn save_server_config(&self, server: &Server) -> Result<()>;

    async fn set_server_status(&self, id: Uuid, status: ServerStatus) -> Result<()>;

    async fn list_servers_by_status(&self, statuses: &[ServerStatus]) -> Result<Vec<Uuid>>;

    async fn get_deployment(&self, id: Uuid) -> Result<Deployment>;

    /// Persist only the `config` column of a deployment.
    async fn save_deployment_config(&self, deployment: &Deployment) -> Result<()>;
}

/// `ServerStore` over the web application's PostgreSQL tables.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ── Row types ───────────────────────────────────────────────────────

#[derive(FromRow)]
struct ServerRow {
    id: Uuid,
    name: String,
    project_id: Uuid,
    namespace: String,
    image_name: String,
    config: Option<Json<ServerConfig>>,
    env_vars: Option<Json<BTreeMap<String, String>>>,
    startup_script: Option<String>,
    status: String,
    access_token: String,
    timezone: Option<String>,
    size_id: Uuid,
    size_name: String,
    cpu: f64,
    memory: i32,
    cost_per_second: f64,
}

#[derive(FromRow)]
struct DeploymentRow {
    id: Uuid,
    name: String,
    project_id: Uuid,
    namespace: String,
    runtime: String,
    http_method: String,
    access_token: String,
    config: Option<Json<DeploymentConfig>>,
    framework_name: Option<String>,
    framework_version: Option<String>,
    framework_url: Option<String>,
}

#[async_trait]
impl ServerStore for PgStore {
    async fn get_server(&self, id: Uuid) -> Result<Server> {
        let row: Option<ServerRow> = sqlx::query_as(
            r#"SELECT s.id, s.name, s.project_id, u.username AS namespace, s.image_name,
                      s.config, s.env_vars, s.startup_script, s.status, s.access_token,
                      p.timezone,
                      z.id AS size_id, z.name AS size_name,
                      CAST(z.cpu AS float8) AS cpu, z.memory,
                      CAST(z.cost_per_second AS float8) AS cost_per_second
               FROM servers_server s
               JOIN projects_project pr ON pr.id = s.project_id
               JOIN auth_user u ON u.id = pr.owner_id
               JOIN servers_serversize z ON z.id = s.server_size_id
               LEFT JOIN users_userprofile p ON p.user_id = u.id
               WHERE s.id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(Error::NotFound { kind: "server", id })?;

        let connected: Vec<(Uuid, String)> = sqlx::query_as(
            r#"SELECT c.id, c.name
               FROM servers_server_connected sc
               JOIN servers_server c ON c.id = sc.to_server_id
               WHERE sc.from_server_id = $1
               ORDER BY c.name"#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Server {
            id: row.id,
            name: row.name,
            project_id: row.project_id,
            namespace: row.namespace,
            image_name: row.image_name,
            server_size: ServerSize {
                id: row.size_id,
                name: row.size_name,
                cpu: row.cpu,
                memory: row.memory,
                cost_per_second: row.cost_per_second,
            },
            config: row.config.map(|c| c.0).unwrap_or_default(),
            env_vars: row.env_vars.map(|e| e.0).unwrap_or_default(),
            startup_script: row.startup_script.filter(|s| !s.is_empty()),
            connected: connected
                .into_iter()
                .map(|(id, name)| ConnectedServer { id, name })
                .collect(),
            status: row.status.parse()?,
            timezone: row.timezone.filter(|tz| !tz.is_empty()),
            access_token: row.access_token,
        })
    }

    async fn save_server_config(&self, server: &Server) -> Result<()> {
        sqlx::query("UPDATE servers_server SET config = $1 WHERE id = $2")
            .bind(Json(&server.config))
            .bind(server.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_server_status(&self, id: Uuid, status: ServerStatus) -> Result<()> {
        sqlx::query("UPDATE servers_server SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_servers_by_status(&self, statuses: &[ServerStatus]) -> Result<Vec<Uuid>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM servers_server WHERE status = ANY($1) ORDER BY created_at",
        )
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn get_deployment(&self, id: Uuid) -> Result<Deployment> {
        let row: Option<DeploymentRow> = sqlx::query_as(
            r#"SELECT d.id, d.name, d.project_id, u.username AS namespace,
                      r.name AS runtime, d.http_method, d.access_token, d.config,
                      f.name AS framework_name, f.version AS framework_version,
                      f.url AS framework_url
               FROM servers_deployment d
               JOIN projects_project pr ON pr.id = d.project_id
               JOIN auth_user u ON u.id = pr.owner_id
               JOIN servers_runtime r ON r.id = d.runtime_id
               LEFT JOIN servers_framework f ON f.id = d.framework_id
               WHERE d.id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(Error::NotFound {
            kind: "deployment",
            id,
        })?;

        let framework = match (row.framework_name, row.framework_version) {
            (Some(name), Some(version)) => Some(Framework {
                name,
                version,
                url: row.framework_url.filter(|u| !u.is_empty()),
            }),
            _ => None,
        };

        Ok(Deployment {
            id: row.id,
            name: row.name,
            project_id: row.project_id,
            namespace: row.namespace,
            runtime: row.runtime,
            framework,
            http_method: row.http_method,
            access_token: row.access_token,
            config: row.config.map(|c| c.0).unwrap_or_default(),
        })
    }

    async fn save_deployment_config(&self, deployment: &Deployment) -> Result<()> {
        sqlx::query("UPDATE servers_deployment SET config = $1 WHERE id = $2")
            .bind(Json(&deployment.config))
            .bind(deployment.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
