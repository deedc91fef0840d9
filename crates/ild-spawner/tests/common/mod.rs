//! In-memory stand-ins for the store and every backend API.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_api::*;
use ild_db::{
    ConnectedServer, Deployment, DeploymentConfig, Framework, Server, ServerConfig, ServerSize,
    ServerStatus, ServerStore,
};
use ild_spawner::batch::BatchApi;
use ild_spawner::docker::{ContainerInfo, ContainerSpec, DockerEngine};
use ild_spawner::ecs::EcsApi;
use ild_spawner::lambda::{ApiGatewayApi, FrameworkSource, LambdaApi};
use ild_spawner::scheduler::EventsApi;
use ild_spawner::{Spawner, SpawnerKind, SpawnerSettings};
use uuid::Uuid;

pub const REGION: &str = "us-east-1";
pub const ACCOUNT: &str = "123456789012";

// ── Fixtures ────────────────────────────────────────────────────────

pub fn id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn server(n: u128) -> Server {
    Server {
        id: id(n),
        name: format!("server {n}"),
        project_id: id(1000),
        namespace: "alice".into(),
        image_name: "illumidesk/runner:latest".into(),
        server_size: ServerSize {
            id: id(2000),
            name: "small".into(),
            cpu: 1.0,
            memory: 512,
            cost_per_second: 0.0,
        },
        config: ServerConfig {
            server_type: Some("restful".into()),
            ..Default::default()
        },
        env_vars: BTreeMap::from([("A".to_string(), "1".to_string())]),
        startup_script: None,
        connected: Vec::new(),
        status: ServerStatus::Stopped,
        timezone: None,
        access_token: "token".into(),
    }
}

pub fn connect(server: &mut Server, to: u128) {
    server.connected.push(ConnectedServer {
        id: id(to),
        name: format!("server {to}"),
    });
}

pub fn deployment(n: u128) -> Deployment {
    Deployment {
        id: id(n),
        name: "predict".into(),
        project_id: id(1000),
        namespace: "alice".into(),
        runtime: "python3.12".into(),
        framework: None,
        http_method: "post".into(),
        access_token: "dtoken".into(),
        config: DeploymentConfig {
            handler: Some("app.handler".into()),
            ..Default::default()
        },
    }
}

pub fn framework() -> Framework {
    Framework {
        name: "flask".into(),
        version: "3".into(),
        url: Some("https://frameworks.example/flask.zip".into()),
    }
}

pub fn settings() -> Arc<SpawnerSettings> {
    let mut settings = SpawnerSettings {
        webhook_root: "https://hooks.example".into(),
        secret_key: "secret".into(),
        resource_root: std::env::temp_dir().join("ild-spawner-tests"),
        ecs_cluster: "servers".into(),
        ecs_log_group: Some("/ild/servers".into()),
        batch_queue: "jobs".into(),
        events_role_arn: Some("arn:aws:iam::123456789012:role/events".into()),
        ..Default::default()
    };
    settings.lambda.role_arn = Some("arn:aws:iam::123456789012:role/lambda".into());
    settings.lambda.authorizer_arn =
        Some("arn:aws:lambda:us-east-1:123456789012:function:authorizer".into());
    settings.lambda.account_id = Some(ACCOUNT.into());
    Arc::new(settings)
}

pub fn aws_error(status: u16, code: &str) -> aws_api::Error {
    aws_api::Error::Api {
        service: "fake",
        operation: "Fake",
        status: reqwest::StatusCode::from_u16(status).unwrap(),
        code: Some(code.to_string()),
        message: "injected".into(),
    }
}

pub fn not_found() -> aws_api::Error {
    aws_error(400, "ResourceNotFoundException")
}

fn failed_entries(ids: &[String]) -> Vec<FailedEntry> {
    ids.iter()
        .map(|id| FailedEntry {
            target_id: id.clone(),
            error_code: Some("ConcurrentModificationException".into()),
            error_message: Some("try again".into()),
        })
        .collect()
}

fn targets_response(failed: Vec<FailedEntry>) -> TargetsResponse {
    TargetsResponse {
        failed_entry_count: failed.len() as i32,
        failed_entries: failed,
    }
}

// ── Store ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    servers: Mutex<HashMap<Uuid, Server>>,
    deployments: Mutex<HashMap<Uuid, Deployment>>,
    pub config_saves: AtomicUsize,
}

impl MemoryStore {
    pub fn with_servers(servers: impl IntoIterator<Item = Server>) -> Arc<Self> {
        let store = Self::default();
        for server in servers {
            store.insert(server);
        }
        Arc::new(store)
    }

    pub fn insert(&self, server: Server) {
        self.servers.lock().unwrap().insert(server.id, server);
    }

    pub fn insert_deployment(&self, deployment: Deployment) {
        self.deployments
            .lock()
            .unwrap()
            .insert(deployment.id, deployment);
    }

    pub fn server(&self, id: Uuid) -> Server {
        self.servers.lock().unwrap()[&id].clone()
    }

    pub fn deployment(&self, id: Uuid) -> Deployment {
        self.deployments.lock().unwrap()[&id].clone()
    }

    pub fn saves(&self) -> usize {
        self.config_saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerStore for MemoryStore {
    async fn get_server(&self, id: Uuid) -> ild_db::Result<Server> {
        self.servers
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(ild_db::Error::NotFound { kind: "server", id })
    }

    async fn save_server_config(&self, server: &Server) -> ild_db::Result<()> {
        self.config_saves.fetch_add(1, Ordering::SeqCst);
        self.servers
            .lock()
            .unwrap()
            .entry(server.id)
            .and_modify(|s| s.config = server.config.clone())
            .or_insert_with(|| server.clone());
        Ok(())
    }

    async fn set_server_status(&self, id: Uuid, status: ServerStatus) -> ild_db::Result<()> {
        match self.servers.lock().unwrap().get_mut(&id) {
            Some(server) => {
                server.status = status;
                Ok(())
            }
            None => Err(ild_db::Error::NotFound { kind: "server", id }),
        }
    }

    async fn list_servers_by_status(
        &self,
        statuses: &[ServerStatus],
    ) -> ild_db::Result<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self
            .servers
            .lock()
            .unwrap()
            .values()
            .filter(|s| statuses.contains(&s.status))
            .map(|s| s.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_deployment(&self, id: Uuid) -> ild_db::Result<Deployment> {
        self.deployments
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(ild_db::Error::NotFound {
                kind: "deployment",
                id,
            })
    }

    async fn save_deployment_config(&self, deployment: &Deployment) -> ild_db::Result<()> {
        self.config_saves.fetch_add(1, Ordering::SeqCst);
        self.deployments
            .lock()
            .unwrap()
            .entry(deployment.id)
            .and_modify(|d| d.config = deployment.config.clone())
            .or_insert_with(|| deployment.clone());
        Ok(())
    }
}

// ── Docker ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeDocker {
    /// Containers by name.
    pub containers: Mutex<HashMap<String, ContainerInfo>>,
    pub networks: Mutex<HashMap<String, String>>,
    pub swarm: AtomicBool,
    pub created: Mutex<Vec<ContainerSpec>>,
    pub removed: Mutex<Vec<String>>,
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
}

impl FakeDocker {
    pub fn add_container(&self, name: &str, id: &str, env: &[&str], state: &str) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            ContainerInfo {
                id: id.to_string(),
                env: env.iter().map(|e| e.to_string()).collect(),
                state: Some(state.to_string()),
                labels: Default::default(),
            },
        );
    }

    fn key_for(&self, name_or_id: &str) -> Option<String> {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|(name, c)| name.as_str() == name_or_id || c.id == name_or_id)
            .map(|(name, _)| name.clone())
    }

    fn set_state(&self, name_or_id: &str, state: &str) -> bool {
        match self.key_for(name_or_id) {
            Some(key) => {
                if let Some(c) = self.containers.lock().unwrap().get_mut(&key) {
                    c.state = Some(state.to_string());
                }
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl DockerEngine for FakeDocker {
    async fn swarm_active(&self) -> ild_spawner::Result<bool> {
        Ok(self.swarm.load(Ordering::SeqCst))
    }

    async fn network_exists(&self, name: &str) -> ild_spawner::Result<bool> {
        Ok(self.networks.lock().unwrap().contains_key(name))
    }

    async fn create_network(&self, name: &str, driver: &str) -> ild_spawner::Result<()> {
        self.networks
            .lock()
            .unwrap()
            .insert(name.to_string(), driver.to_string());
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> ild_spawner::Result<Option<ContainerInfo>> {
        let key = self.key_for(name);
        Ok(key.and_then(|k| self.containers.lock().unwrap().get(&k).cloned()))
    }

    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> ild_spawner::Result<String> {
        let mut created = self.created.lock().unwrap();
        created.push(spec.clone());
        let id = format!("cid-{}", created.len());
        self.containers.lock().unwrap().insert(
            name.to_string(),
            ContainerInfo {
                id: id.clone(),
                env: spec.env.clone(),
                state: Some("created".into()),
                labels: spec.labels.clone(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> ild_spawner::Result<()> {
        self.started.lock().unwrap().push(id.to_string());
        self.set_state(id, "running");
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> ild_spawner::Result<bool> {
        self.stopped.lock().unwrap().push(name.to_string());
        Ok(self.set_state(name, "exited"))
    }

    async fn remove_container(&self, name: &str) -> ild_spawner::Result<bool> {
        self.removed.lock().unwrap().push(name.to_string());
        match self.key_for(name) {
            Some(key) => {
                self.containers.lock().unwrap().remove(&key);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ── ECS ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeEcs {
    pub registered: Mutex<Vec<RegisterTaskDefinitionRequest>>,
    pub runs: Mutex<Vec<RunTaskRequest>>,
    pub stopped: Mutex<Vec<String>>,
    pub deregistered: Mutex<Vec<String>>,
    /// `lastStatus` reported by DescribeTasks; `None` means no task.
    pub task_status: Mutex<Option<String>>,
    pub stop_not_found: AtomicBool,
}

#[async_trait]
impl EcsApi for FakeEcs {
    fn region(&self) -> &str {
        REGION
    }

    async fn register_task_definition(
        &self,
        req: &RegisterTaskDefinitionRequest,
    ) -> aws_api::Result<RegisterTaskDefinitionResponse> {
        self.registered.lock().unwrap().push(req.clone());
        Ok(RegisterTaskDefinitionResponse {
            task_definition: TaskDefinition {
                task_definition_arn: format!(
                    "arn:aws:ecs:{REGION}:{ACCOUNT}:task-definition/{}:1",
                    req.family
                ),
                family: Some(req.family.clone()),
                revision: Some(1),
            },
        })
    }

    async fn deregister_task_definition(&self, task_definition: &str) -> aws_api::Result<()> {
        self.deregistered
            .lock()
            .unwrap()
            .push(task_definition.to_string());
        Ok(())
    }

    async fn run_task(&self, req: &RunTaskRequest) -> aws_api::Result<RunTaskResponse> {
        let mut runs = self.runs.lock().unwrap();
        runs.push(req.clone());
        *self.task_status.lock().unwrap() = Some("PROVISIONING".into());
        Ok(RunTaskResponse {
            tasks: vec![Task {
                task_arn: format!("arn:aws:ecs:{REGION}:{ACCOUNT}:task/servers/{}", runs.len()),
                last_status: Some("PROVISIONING".into()),
                desired_status: Some("RUNNING".into()),
            }],
            failures: Vec::new(),
        })
    }

    async fn stop_task(&self, req: &StopTaskRequest) -> aws_api::Result<StopTaskResponse> {
        self.stopped.lock().unwrap().push(req.task.clone());
        if self.stop_not_found.load(Ordering::SeqCst) {
            return Err(not_found());
        }
        *self.task_status.lock().unwrap() = Some("STOPPED".into());
        Ok(StopTaskResponse { task: None })
    }

    async fn describe_tasks(
        &self,
        req: &DescribeTasksRequest,
    ) -> aws_api::Result<DescribeTasksResponse> {
        let tasks = match self.task_status.lock().unwrap().clone() {
            Some(status) => req
                .tasks
                .iter()
                .map(|arn| Task {
                    task_arn: arn.clone(),
                    last_status: Some(status.clone()),
                    desired_status: None,
                })
                .collect(),
            None => Vec::new(),
        };
        Ok(DescribeTasksResponse {
            tasks,
            failures: Vec::new(),
        })
    }
}

// ── EventBridge ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeEvents {
    /// Rule name to state.
    pub rules: Mutex<HashMap<String, String>>,
    pub targets: Mutex<Vec<PutTargetsRequest>>,
    pub removals: Mutex<Vec<RemoveTargetsRequest>>,
    pub deleted: Mutex<Vec<String>>,
    /// Target ids PutTargets reports as failed.
    pub failing_puts: Mutex<Vec<String>>,
    /// Target ids RemoveTargets reports as failed.
    pub failing_removals: Mutex<Vec<String>>,
}

#[async_trait]
impl EventsApi for FakeEvents {
    async fn put_rule(&self, req: &PutRuleRequest) -> aws_api::Result<PutRuleResponse> {
        self.rules
            .lock()
            .unwrap()
            .insert(req.name.clone(), req.state.clone());
        Ok(PutRuleResponse {
            rule_arn: format!("arn:aws:events:{REGION}:{ACCOUNT}:rule/{}", req.name),
        })
    }

    async fn describe_rule(&self, name: &str) -> aws_api::Result<DescribeRuleResponse> {
        let state = self.rules.lock().unwrap().get(name).cloned();
        match state {
            Some(state) => Ok(DescribeRuleResponse {
                name: name.to_string(),
                arn: None,
                state: Some(state),
                schedule_expression: None,
            }),
            None => Err(not_found()),
        }
    }

    async fn disable_rule(&self, name: &str) -> aws_api::Result<()> {
        match self.rules.lock().unwrap().get_mut(name) {
            Some(state) => {
                *state = "DISABLED".into();
                Ok(())
            }
            None => Err(not_found()),
        }
    }

    async fn delete_rule(&self, name: &str) -> aws_api::Result<()> {
        self.deleted.lock().unwrap().push(name.to_string());
        self.rules.lock().unwrap().remove(name);
        Ok(())
    }

    async fn put_targets(&self, req: &PutTargetsRequest) -> aws_api::Result<TargetsResponse> {
        self.targets.lock().unwrap().push(req.clone());
        Ok(targets_response(failed_entries(
            &self.failing_puts.lock().unwrap(),
        )))
    }

    async fn remove_targets(&self, req: &RemoveTargetsRequest) -> aws_api::Result<TargetsResponse> {
        self.removals.lock().unwrap().push(req.clone());
        Ok(targets_response(failed_entries(
            &self.failing_removals.lock().unwrap(),
        )))
    }
}

// ── Batch ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeBatch {
    pub registered: Mutex<Vec<RegisterJobDefinitionRequest>>,
    pub submitted: Mutex<Vec<SubmitJobRequest>>,
    pub cancelled: Mutex<Vec<(String, String)>>,
    pub terminated: Mutex<Vec<(String, String)>>,
    pub deregistered: Mutex<Vec<String>>,
    /// Status DescribeJobs reports; `None` means no such job.
    pub job_status: Mutex<Option<String>>,
}

#[async_trait]
impl BatchApi for FakeBatch {
    async fn register_job_definition(
        &self,
        req: &RegisterJobDefinitionRequest,
    ) -> aws_api::Result<RegisterJobDefinitionResponse> {
        self.registered.lock().unwrap().push(req.clone());
        Ok(RegisterJobDefinitionResponse {
            job_definition_name: req.job_definition_name.clone(),
            job_definition_arn: format!(
                "arn:aws:batch:{REGION}:{ACCOUNT}:job-definition/{}:1",
                req.job_definition_name
            ),
            revision: Some(1),
        })
    }

    async fn deregister_job_definition(&self, job_definition: &str) -> aws_api::Result<()> {
        self.deregistered
            .lock()
            .unwrap()
            .push(job_definition.to_string());
        Ok(())
    }

    async fn submit_job(&self, req: &SubmitJobRequest) -> aws_api::Result<SubmitJobResponse> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(req.clone());
        *self.job_status.lock().unwrap() = Some("SUBMITTED".into());
        Ok(SubmitJobResponse {
            job_name: req.job_name.clone(),
            job_id: format!("job{}", submitted.len()),
        })
    }

    async fn cancel_job(&self, job_id: &str, reason: &str) -> aws_api::Result<()> {
        self.cancelled
            .lock()
            .unwrap()
            .push((job_id.to_string(), reason.to_string()));
        Ok(())
    }

    async fn terminate_job(&self, job_id: &str, reason: &str) -> aws_api::Result<()> {
        self.terminated
            .lock()
            .unwrap()
            .push((job_id.to_string(), reason.to_string()));
        Ok(())
    }

    async fn describe_jobs(&self, job_ids: &[String]) -> aws_api::Result<DescribeJobsResponse> {
        let jobs = match self.job_status.lock().unwrap().clone() {
            Some(status) => job_ids
                .iter()
                .map(|id| JobDetail {
                    job_id: id.clone(),
                    job_name: None,
                    status: status.clone(),
                    status_reason: None,
                })
                .collect(),
            None => Vec::new(),
        };
        Ok(DescribeJobsResponse { jobs })
    }
}

// ── Lambda & API Gateway ────────────────────────────────────────────

#[derive(Default)]
pub struct FakeLambda {
    pub created: Mutex<Vec<CreateFunctionRequest>>,
    pub updated: Mutex<Vec<String>>,
    pub permissions: Mutex<Vec<(String, AddPermissionRequest)>>,
    pub deleted: Mutex<Vec<String>>,
    pub delete_not_found: AtomicBool,
}

#[async_trait]
impl LambdaApi for FakeLambda {
    fn region(&self) -> &str {
        REGION
    }

    async fn create_function(
        &self,
        req: &CreateFunctionRequest,
    ) -> aws_api::Result<FunctionConfiguration> {
        self.created.lock().unwrap().push(req.clone());
        Ok(FunctionConfiguration {
            function_name: req.function_name.clone(),
            function_arn: format!(
                "arn:aws:lambda:{REGION}:{ACCOUNT}:function:{}",
                req.function_name
            ),
            runtime: Some(req.runtime.clone()),
            handler: Some(req.handler.clone()),
        })
    }

    async fn update_function_code(
        &self,
        function_name: &str,
        _req: &UpdateFunctionCodeRequest,
    ) -> aws_api::Result<FunctionConfiguration> {
        self.updated.lock().unwrap().push(function_name.to_string());
        Ok(FunctionConfiguration {
            function_name: function_name.to_string(),
            function_arn: format!("arn:aws:lambda:{REGION}:{ACCOUNT}:function:{function_name}"),
            runtime: None,
            handler: None,
        })
    }

    async fn add_permission(
        &self,
        function_name: &str,
        req: &AddPermissionRequest,
    ) -> aws_api::Result<AddPermissionResponse> {
        self.permissions
            .lock()
            .unwrap()
            .push((function_name.to_string(), req.clone()));
        Ok(AddPermissionResponse { statement: None })
    }

    async fn delete_function(&self, function_name: &str) -> aws_api::Result<()> {
        self.deleted.lock().unwrap().push(function_name.to_string());
        if self.delete_not_found.load(Ordering::SeqCst) {
            return Err(aws_error(404, "ResourceNotFoundException"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeGateway {
    pub apis: Mutex<Vec<RestApi>>,
    pub authorizers: Mutex<HashMap<String, Vec<Authorizer>>>,
    pub resources: Mutex<HashMap<String, Vec<Resource>>>,
    /// APIs whose CreateResource fails with LimitExceeded.
    pub full: Mutex<HashSet<String>>,
    pub methods: Mutex<Vec<(String, String, String, PutMethodRequest)>>,
    pub integrations: Mutex<Vec<(String, String, String, PutIntegrationRequest)>>,
    pub deployments: Mutex<Vec<String>>,
    pub deleted_resources: Mutex<Vec<(String, String)>>,
}

impl FakeGateway {
    pub fn api_names(&self) -> Vec<String> {
        self.apis
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.name.clone())
            .collect()
    }
}

#[async_trait]
impl ApiGatewayApi for FakeGateway {
    async fn create_rest_api(&self, req: &CreateRestApiRequest) -> aws_api::Result<RestApi> {
        let mut apis = self.apis.lock().unwrap();
        let api = RestApi {
            id: format!("api{}", apis.len() + 1),
            name: req.name.clone(),
        };
        apis.push(api.clone());
        self.resources.lock().unwrap().insert(
            api.id.clone(),
            vec![Resource {
                id: format!("root-{}", api.id),
                parent_id: None,
                path_part: None,
                path: Some("/".into()),
            }],
        );
        Ok(api)
    }

    async fn get_rest_apis(&self) -> aws_api::Result<RestApis> {
        Ok(RestApis {
            items: self.apis.lock().unwrap().clone(),
        })
    }

    async fn create_authorizer(
        &self,
        rest_api_id: &str,
        req: &CreateAuthorizerRequest,
    ) -> aws_api::Result<Authorizer> {
        let mut authorizers = self.authorizers.lock().unwrap();
        let list = authorizers.entry(rest_api_id.to_string()).or_default();
        let authorizer = Authorizer {
            id: format!("auth-{rest_api_id}-{}", list.len() + 1),
            name: req.name.clone(),
        };
        list.push(authorizer.clone());
        Ok(authorizer)
    }

    async fn get_authorizers(&self, rest_api_id: &str) -> aws_api::Result<Authorizers> {
        Ok(Authorizers {
            items: self
                .authorizers
                .lock()
                .unwrap()
                .get(rest_api_id)
                .cloned()
                .unwrap_or_default(),
        })
    }

    async fn get_resources(&self, rest_api_id: &str) -> aws_api::Result<Resources> {
        match self.resources.lock().unwrap().get(rest_api_id) {
            Some(items) => Ok(Resources {
                items: items.clone(),
            }),
            None => Err(aws_error(404, "NotFoundException")),
        }
    }

    async fn create_resource(
        &self,
        rest_api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> aws_api::Result<Resource> {
        if self.full.lock().unwrap().contains(rest_api_id) {
            return Err(aws_error(400, "LimitExceededException"));
        }
        let mut resources = self.resources.lock().unwrap();
        let list = resources.entry(rest_api_id.to_string()).or_default();
        let resource = Resource {
            id: format!("res-{rest_api_id}-{}", list.len()),
            parent_id: Some(parent_id.to_string()),
            path_part: Some(path_part.to_string()),
            path: Some(format!("/{path_part}")),
        };
        list.push(resource.clone());
        Ok(resource)
    }

    async fn delete_resource(&self, rest_api_id: &str, resource_id: &str) -> aws_api::Result<()> {
        self.deleted_resources
            .lock()
            .unwrap()
            .push((rest_api_id.to_string(), resource_id.to_string()));
        Ok(())
    }

    async fn put_method(
        &self,
        rest_api_id: &str,
        resource_id: &str,
        http_method: &str,
        req: &PutMethodRequest,
    ) -> aws_api::Result<()> {
        self.methods.lock().unwrap().push((
            rest_api_id.to_string(),
            resource_id.to_string(),
            http_method.to_string(),
            req.clone(),
        ));
        Ok(())
    }

    async fn put_integration(
        &self,
        rest_api_id: &str,
        resource_id: &str,
        http_method: &str,
        req: &PutIntegrationRequest,
    ) -> aws_api::Result<()> {
        self.integrations.lock().unwrap().push((
            rest_api_id.to_string(),
            resource_id.to_string(),
            http_method.to_string(),
            req.clone(),
        ));
        Ok(())
    }

    async fn create_deployment(
        &self,
        rest_api_id: &str,
        _stage_name: &str,
    ) -> aws_api::Result<ApiDeployment> {
        let mut deployments = self.deployments.lock().unwrap();
        deployments.push(rest_api_id.to_string());
        Ok(ApiDeployment {
            id: format!("dep{}", deployments.len()),
        })
    }
}

/// Serves one fixed framework archive.
pub struct StaticFramework(pub Option<Vec<u8>>);

#[async_trait]
impl FrameworkSource for StaticFramework {
    async fn fetch(&self, _framework: &Framework) -> ild_spawner::Result<Option<Vec<u8>>> {
        Ok(self.0.clone())
    }
}

// ── Spawner ─────────────────────────────────────────────────────────

/// Spawner that records calls and replays a queue of statuses.
#[derive(Default)]
pub struct ScriptedSpawner {
    pub calls: Mutex<Vec<(&'static str, Uuid)>>,
    /// Statuses returned in order; the last one repeats.
    pub statuses: Mutex<VecDeque<ServerStatus>>,
    pub status_calls: AtomicUsize,
    pub fail_start: Mutex<HashSet<Uuid>>,
}

impl ScriptedSpawner {
    pub fn with_statuses(statuses: &[ServerStatus]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            ..Default::default()
        }
    }

    pub fn started(&self) -> Vec<Uuid> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| *op == "start")
            .map(|(_, id)| *id)
            .collect()
    }
}

#[async_trait]
impl Spawner for ScriptedSpawner {
    async fn start(&self, server: &mut Server) -> ild_spawner::Result<()> {
        self.calls.lock().unwrap().push(("start", server.id));
        if self.fail_start.lock().unwrap().contains(&server.id) {
            return Err(ild_spawner::Error::MissingConfig("image"));
        }
        server.config.docker.container_id = Some(format!("cid-{}", server.id.simple()));
        Ok(())
    }

    async fn stop(&self, server: &mut Server) -> ild_spawner::Result<()> {
        self.calls.lock().unwrap().push(("stop", server.id));
        Ok(())
    }

    async fn terminate(&self, server: &mut Server) -> ild_spawner::Result<()> {
        self.calls.lock().unwrap().push(("terminate", server.id));
        server.config.docker.container_id = None;
        Ok(())
    }

    async fn status(&self, _server: &Server) -> ServerStatus {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap_or(ServerStatus::Error)
        } else {
            statuses.front().copied().unwrap_or(ServerStatus::Stopped)
        }
    }

    fn kind(&self) -> SpawnerKind {
        SpawnerKind::Docker
    }
}
