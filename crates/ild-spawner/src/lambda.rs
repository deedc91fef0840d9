//! Serverless deployments: a Lambda function per deployment, exposed through
//! a shared API Gateway REST API guarded by a request authorizer.
//!
//! REST APIs are named `deploymentApi-{n}` and each carries one authorizer
//! `deploymentAuthorizer-{n}`. When an API runs out of resources the next
//! number is created and used from then on.

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Component, Path};
use std::sync::Arc;

use async_trait::async_trait;
use aws_api::{
    AddPermissionRequest, AddPermissionResponse, ApiDeployment, ApiGatewayClient, Authorizer,
    Authorizers, CreateAuthorizerRequest, CreateFunctionRequest, CreateRestApiRequest,
    FunctionCode, FunctionConfiguration, LambdaClient, PutIntegrationRequest, PutMethodRequest,
    Resource, Resources, RestApi, RestApis, UpdateFunctionCodeRequest,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ild_db::{Deployment, Framework, ServerStore};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::SpawnerSettings;
use crate::{Error, Result, within};

const API_PREFIX: &str = "deploymentApi-";
const AUTHORIZER_PREFIX: &str = "deploymentAuthorizer-";
const STAGE: &str = "prod";
const LAMBDA_API_VERSION: &str = "2015-03-31";

// ── Backend seams ───────────────────────────────────────────────────

#[async_trait]
pub trait LambdaApi: Send + Sync + 'static {
    fn region(&self) -> &str;

    async fn create_function(
        &self,
        req: &CreateFunctionRequest,
    ) -> aws_api::Result<FunctionConfiguration>;

    async fn update_function_code(
        &self,
        function_name: &str,
        req: &UpdateFunctionCodeRequest,
    ) -> aws_api::Result<FunctionConfiguration>;

    async fn add_permission(
        &self,
        function_name: &str,
        req: &AddPermissionRequest,
    ) -> aws_api::Result<AddPermissionResponse>;

    async fn delete_function(&self, function_name: &str) -> aws_api::Result<()>;
}

#[async_trait]
impl LambdaApi for LambdaClient {
    fn region(&self) -> &str {
        LambdaClient::region(self)
    }

    async fn create_function(
        &self,
        req: &CreateFunctionRequest,
    ) -> aws_api::Result<FunctionConfiguration> {
        LambdaClient::create_function(self, req).await
    }

    async fn update_function_code(
        &self,
        function_name: &str,
        req: &UpdateFunctionCodeRequest,
    ) -> aws_api::Result<FunctionConfiguration> {
        LambdaClient::update_function_code(self, function_name, req).await
    }

    async fn add_permission(
        &self,
        function_name: &str,
        req: &AddPermissionRequest,
    ) -> aws_api::Result<AddPermissionResponse> {
        LambdaClient::add_permission(self, function_name, req).await
    }

    async fn delete_function(&self, function_name: &str) -> aws_api::Result<()> {
        LambdaClient::delete_function(self, function_name).await
    }
}

#[async_trait]
pub trait ApiGatewayApi: Send + Sync + 'static {
    async fn create_rest_api(&self, req: &CreateRestApiRequest) -> aws_api::Result<RestApi>;

    async fn get_rest_apis(&self) -> aws_api::Result<RestApis>;

    async fn create_authorizer(
        &self,
        rest_api_id: &str,
        req: &CreateAuthorizerRequest,
    ) -> aws_api::Result<Authorizer>;

    async fn get_authorizers(&self, rest_api_id: &str) -> aws_api::Result<Authorizers>;

    async fn get_resources(&self, rest_api_id: &str) -> aws_api::Result<Resources>;

    async fn create_resource(
        &self,
        rest_api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> aws_api::Result<Resource>;

    async fn delete_resource(&self, rest_api_id: &str, resource_id: &str) -> aws_api::Result<()>;

    async fn put_method(
        &self,
        rest_api_id: &str,
        resource_id: &str,
        http_method: &str,
        req: &PutMethodRequest,
    ) -> aws_api::Result<()>;

    async fn put_integration(
        &self,
        rest_api_id: &str,
        resource_id: &str,
        http_method: &str,
        req: &PutIntegrationRequest,
    ) -> aws_api::Result<()>;

    async fn create_deployment(
        &self,
        rest_api_id: &str,
        stage_name: &str,
    ) -> aws_api::Result<ApiDeployment>;
}

#[async_trait]
impl ApiGatewayApi for ApiGatewayClient {
    async fn create_rest_api(&self, req: &CreateRestApiRequest) -> aws_api::Result<RestApi> {
        ApiGatewayClient::create_rest_api(self, req).await
    }

    async fn get_rest_apis(&self) -> aws_api::Result<RestApis> {
        ApiGatewayClient::get_rest_apis(self).await
    }

    async fn create_authorizer(
        &self,
        rest_api_id: &str,
        req: &CreateAuthorizerRequest,
    ) -> aws_api::Result<Authorizer> {
        ApiGatewayClient::create_authorizer(self, rest_api_id, req).await
    }

    async fn get_authorizers(&self, rest_api_id: &str) -> aws_api::Result<Authorizers> {
        ApiGatewayClient::get_authorizers(self, rest_api_id).await
    }

    async fn get_resources(&self, rest_api_id: &str) -> aws_api::Result<Resources> {
        ApiGatewayClient::get_resources(self, rest_api_id).await
    }

    async fn create_resource(
        &self,
        rest_api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> aws_api::Result<Resource> {
        ApiGatewayClient::create_resource(self, rest_api_id, parent_id, path_part).await
    }

    async fn delete_resource(&self, rest_api_id: &str, resource_id: &str) -> aws_api::Result<()> {
        ApiGatewayClient::delete_resource(self, rest_api_id, resource_id).await
    }

    async fn put_method(
        &self,
        rest_api_id: &str,
        resource_id: &str,
        http_method: &str,
        req: &PutMethodRequest,
    ) -> aws_api::Result<()> {
        ApiGatewayClient::put_method(self, rest_api_id, resource_id, http_method, req).await
    }

    async fn put_integration(
        &self,
        rest_api_id: &str,
        resource_id: &str,
        http_method: &str,
        req: &PutIntegrationRequest,
    ) -> aws_api::Result<()> {
        ApiGatewayClient::put_integration(self, rest_api_id, resource_id, http_method, req).await
    }

    async fn create_deployment(
        &self,
        rest_api_id: &str,
        stage_name: &str,
    ) -> aws_api::Result<ApiDeployment> {
        ApiGatewayClient::create_deployment(self, rest_api_id, stage_name).await
    }
}

/// Supplies a framework's zip archive.
#[async_trait]
pub trait FrameworkSource: Send + Sync + 'static {
    /// `None` when the framework ships no archive.
    async fn fetch(&self, framework: &Framework) -> Result<Option<Vec<u8>>>;
}

/// Downloads framework archives from their URL.
pub struct HttpFrameworkSource {
    http: reqwest::Client,
}

impl HttpFrameworkSource {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl FrameworkSource for HttpFrameworkSource {
    async fn fetch(&self, framework: &Framework) -> Result<Option<Vec<u8>>> {
        let Some(url) = &framework.url else {
            return Ok(None);
        };
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(Some(resp.bytes().await?.to_vec()))
    }
}

// ── Packaging ───────────────────────────────────────────────────────

/// Zip project files, then merge in the framework archive.
///
/// Framework entries are copied without recompression; a project file
/// with the same name wins.
pub fn build_package(files: &[(String, Vec<u8>)], framework: Option<&[u8]>) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut buffer);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut written = HashSet::new();
        for (name, bytes) in files {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
            written.insert(name.as_str());
        }

        if let Some(archive) = framework {
            let mut archive = ZipArchive::new(Cursor::new(archive))?;
            for i in 0..archive.len() {
                let entry = archive.by_index_raw(i)?;
                if written.contains(entry.name()) {
                    continue;
                }
                zip.raw_copy_file(entry)?;
            }
        }

        zip.finish()?;
    }
    Ok(buffer.into_inner())
}

/// Project-relative paths only; no absolute paths or `..`.
fn checked_relative(path: &str) -> Result<&Path> {
    let p = Path::new(path);
    if path.is_empty() || !p.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(p)
}

fn invocation_uri(region: &str, function_arn: &str) -> String {
    format!(
        "arn:aws:apigateway:{region}:lambda:path/{LAMBDA_API_VERSION}/functions/{function_arn}/invocations"
    )
}

fn api_number(name: &str) -> Option<u32> {
    name.strip_prefix(API_PREFIX)?.parse().ok()
}

/// A numbered REST API ready to take deployment resources.
#[derive(Debug, Clone)]
struct GatewayApi {
    id: String,
    number: u32,
    authorizer_id: String,
    root_id: String,
}

// ── Deployer ────────────────────────────────────────────────────────

pub struct LambdaDeployer {
    lambda: Arc<dyn LambdaApi>,
    gateway: Arc<dyn ApiGatewayApi>,
    frameworks: Arc<dyn FrameworkSource>,
    settings: Arc<SpawnerSettings>,
    store: Arc<dyn ServerStore>,
}

impl LambdaDeployer {
    pub fn new(
        lambda: Arc<dyn LambdaApi>,
        gateway: Arc<dyn ApiGatewayApi>,
        frameworks: Arc<dyn FrameworkSource>,
        settings: Arc<SpawnerSettings>,
        store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            lambda,
            gateway,
            frameworks,
            settings,
            store,
        }
    }

    fn region(&self) -> &str {
        self.lambda.region()
    }

    fn execute_api_arn(&self, rest_api_id: &str, suffix: &str) -> Result<String> {
        Ok(format!(
            "arn:aws:execute-api:{}:{}:{rest_api_id}/{suffix}",
            self.region(),
            self.settings.account_id()?,
        ))
    }

    /// Public URL of a deployed function.
    pub fn endpoint(&self, rest_api_id: &str, deployment: &Deployment) -> String {
        format!(
            "https://{rest_api_id}.execute-api.{}.amazonaws.com/{STAGE}/{}?access_token={}",
            self.region(),
            deployment.id,
            deployment.access_token
        )
    }

    /// Zip the deployment's project files together with its framework.
    pub async fn package(&self, deployment: &Deployment) -> Result<Vec<u8>> {
        let root = self
            .settings
            .project_dir(&deployment.namespace, deployment.project_id);

        let mut files = Vec::with_capacity(deployment.config.files.len());
        for name in &deployment.config.files {
            let bytes = tokio::fs::read(root.join(checked_relative(name)?)).await?;
            files.push((name.clone(), bytes));
        }

        let framework = match &deployment.framework {
            Some(framework) => self.frameworks.fetch(framework).await?,
            None => None,
        };

        build_package(&files, framework.as_deref())
    }

    /// Deploy or redeploy, returning the public endpoint.
    ///
    /// A deployment that already has an endpoint only gets its code
    /// replaced. Otherwise every completed step is checkpointed, so a
    /// failed call can be retried.
    pub async fn deploy(&self, deployment: &mut Deployment) -> Result<String> {
        let timeout = self.settings.call_timeout;
        let function_name = deployment.function_name();
        let zip_file = BASE64.encode(self.package(deployment).await?);

        if let Some(endpoint) = deployment.config.lambda.endpoint.clone() {
            self.update_code(&function_name, zip_file).await?;
            info!(deployment_id = %deployment.id, function = %function_name, "lambda: code updated");
            return Ok(endpoint);
        }

        let function_arn = match deployment.config.lambda.function_arn.clone() {
            // Resuming: the function exists but may hold an older package.
            Some(arn) => {
                self.update_code(&function_name, zip_file).await?;
                arn
            }
            None => {
                let arn = self.create_function(deployment, zip_file).await?;
                deployment.config.lambda.function_arn = Some(arn.clone());
                self.store.save_deployment_config(deployment).await?;
                arn
            }
        };

        let (api, resource_id) = match (
            deployment.config.lambda.rest_api_id.clone(),
            deployment.config.lambda.resource_id.clone(),
        ) {
            (Some(api_id), Some(resource_id)) => (self.api_by_id(&api_id).await?, resource_id),
            _ => {
                let (api, resource_id) = self.create_resource(deployment).await?;
                deployment.config.lambda.rest_api_id = Some(api.id.clone());
                deployment.config.lambda.resource_id = Some(resource_id.clone());
                self.store.save_deployment_config(deployment).await?;
                (api, resource_id)
            }
        };

        let http_method = deployment.http_method.to_uppercase();
        within(
            timeout,
            "put method",
            self.gateway.put_method(
                &api.id,
                &resource_id,
                &http_method,
                &PutMethodRequest {
                    authorization_type: "CUSTOM".into(),
                    authorizer_id: Some(api.authorizer_id.clone()),
                },
            ),
        )
        .await?;

        within(
            timeout,
            "put integration",
            self.gateway.put_integration(
                &api.id,
                &resource_id,
                &http_method,
                &PutIntegrationRequest {
                    kind: "AWS_PROXY".into(),
                    integration_http_method: "POST".into(),
                    uri: invocation_uri(self.region(), &function_arn),
                },
            ),
        )
        .await?;

        let source_arn =
            self.execute_api_arn(&api.id, &format!("*/{http_method}/{}", deployment.id))?;
        self.grant_invoke(&function_name, &format!("apigateway-{}", api.id), source_arn)
            .await?;

        let api_deployment = within(
            timeout,
            "create deployment",
            self.gateway.create_deployment(&api.id, STAGE),
        )
        .await?;

        let endpoint = self.endpoint(&api.id, deployment);
        deployment.config.lambda.endpoint = Some(endpoint.clone());
        self.store.save_deployment_config(deployment).await?;
        info!(
            deployment_id = %deployment.id,
            rest_api_id = %api.id,
            api_deployment = %api_deployment.id,
            "lambda: deployed"
        );
        Ok(endpoint)
    }

    /// Remove the function and its API resource, forgetting both.
    pub async fn delete(&self, deployment: &mut Deployment) -> Result<()> {
        let timeout = self.settings.call_timeout;
        let state = deployment.config.lambda.clone();

        if state.function_arn.is_some() {
            let name = deployment.function_name();
            match within(timeout, "delete function", self.lambda.delete_function(&name)).await {
                Err(e) if e.is_not_found() => {
                    warn!(deployment_id = %deployment.id, "lambda: function already gone")
                }
                other => other?,
            }
        }

        if let (Some(api_id), Some(resource_id)) = (&state.rest_api_id, &state.resource_id) {
            match within(
                timeout,
                "delete resource",
                self.gateway.delete_resource(api_id, resource_id),
            )
            .await
            {
                Err(e) if e.is_not_found() => {
                    warn!(deployment_id = %deployment.id, "lambda: resource already gone")
                }
                other => other?,
            }
        }

        let lambda = &mut deployment.config.lambda;
        let changed = lambda.function_arn.take().is_some()
            | lambda.resource_id.take().is_some()
            | lambda.rest_api_id.take().is_some()
            | lambda.endpoint.take().is_some();
        if changed {
            self.store.save_deployment_config(deployment).await?;
        }
        info!(deployment_id = %deployment.id, "lambda: deployment deleted");
        Ok(())
    }

    async fn create_function(&self, deployment: &Deployment, zip_file: String) -> Result<String> {
        let timeout = self.settings.call_timeout;
        let function_name = deployment.function_name();
        let role = self
            .settings
            .lambda
            .role_arn
            .clone()
            .ok_or_else(|| Error::MissingEnv("ILD_LAMBDA_ROLE_ARN".into()))?;
        let handler = deployment
            .config
            .handler
            .clone()
            .ok_or(Error::MissingConfig("handler"))?;

        let req = CreateFunctionRequest {
            function_name: function_name.clone(),
            runtime: deployment.runtime.clone(),
            role,
            handler,
            code: FunctionCode {
                zip_file: zip_file.clone(),
            },
            timeout: Some(self.settings.lambda.timeout_secs),
            memory_size: Some(self.settings.lambda.memory_size),
            publish: true,
        };

        let function = match within(timeout, "create function", self.lambda.create_function(&req)).await
        {
            // Created by an earlier attempt that failed before checkpointing.
            Err(Error::Aws(e)) if e.code() == Some("ResourceConflictException") => {
                self.update_code(&function_name, zip_file).await?
            }
            other => other?,
        };

        info!(deployment_id = %deployment.id, function_arn = %function.function_arn, "lambda: function created");
        Ok(function.function_arn)
    }

    async fn update_code(&self, function_name: &str, zip_file: String) -> Result<FunctionConfiguration> {
        within(
            self.settings.call_timeout,
            "update function code",
            self.lambda.update_function_code(
                function_name,
                &UpdateFunctionCodeRequest {
                    zip_file,
                    publish: true,
                },
            ),
        )
        .await
    }

    /// Attach the deployment's resource to the newest API, moving on to a
    /// fresh API once the current one is full.
    async fn create_resource(&self, deployment: &Deployment) -> Result<(GatewayApi, String)> {
        let timeout = self.settings.call_timeout;
        let path_part = deployment.id.to_string();
        let api = self.latest_api().await?;

        let created = within(
            timeout,
            "create resource",
            self.gateway.create_resource(&api.id, &api.root_id, &path_part),
        )
        .await;

        let (api, resource) = match created {
            Ok(resource) => (api, resource),
            Err(Error::Aws(e)) if e.is_limit_exceeded() => {
                info!(rest_api_id = %api.id, "lambda: api full, creating the next one");
                let api = self.create_api(api.number + 1).await?;
                let resource = within(
                    timeout,
                    "create resource",
                    self.gateway.create_resource(&api.id, &api.root_id, &path_part),
                )
                .await?;
                (api, resource)
            }
            Err(e) => return Err(e),
        };

        info!(deployment_id = %deployment.id, rest_api_id = %api.id, resource_id = %resource.id, "lambda: resource created");
        Ok((api, resource.id))
    }

    async fn latest_api(&self) -> Result<GatewayApi> {
        let apis = within(
            self.settings.call_timeout,
            "get rest apis",
            self.gateway.get_rest_apis(),
        )
        .await?;

        let latest = apis
            .items
            .into_iter()
            .filter_map(|api| api_number(&api.name).map(|n| (n, api)))
            .max_by_key(|(n, _)| *n);

        match latest {
            Some((number, api)) => self.prepare_api(api.id, number).await,
            None => self.create_api(1).await,
        }
    }

    async fn api_by_id(&self, id: &str) -> Result<GatewayApi> {
        let apis = within(
            self.settings.call_timeout,
            "get rest apis",
            self.gateway.get_rest_apis(),
        )
        .await?;

        let number = apis
            .items
            .iter()
            .find(|api| api.id == id)
            .and_then(|api| api_number(&api.name))
            .unwrap_or(1);
        self.prepare_api(id.to_string(), number).await
    }

    async fn create_api(&self, number: u32) -> Result<GatewayApi> {
        let api = within(
            self.settings.call_timeout,
            "create rest api",
            self.gateway.create_rest_api(&CreateRestApiRequest {
                name: format!("{API_PREFIX}{number}"),
                description: Some("Project deployments".into()),
            }),
        )
        .await?;
        info!(rest_api_id = %api.id, name = %api.name, "lambda: rest api created");
        self.prepare_api(api.id, number).await
    }

    /// Resolve the API's root resource and make sure its authorizer exists.
    async fn prepare_api(&self, id: String, number: u32) -> Result<GatewayApi> {
        let timeout = self.settings.call_timeout;

        let resources = within(timeout, "get resources", self.gateway.get_resources(&id)).await?;
        let root_id = resources
            .items
            .into_iter()
            .find(|r| r.path.as_deref() == Some("/"))
            .map(|r| r.id)
            .ok_or_else(|| Error::Gateway(format!("rest api {id} has no root resource")))?;

        let authorizer_name = format!("{AUTHORIZER_PREFIX}{number}");
        let authorizers =
            within(timeout, "get authorizers", self.gateway.get_authorizers(&id)).await?;
        let existing = authorizers
            .items
            .into_iter()
            .find(|a| a.name == authorizer_name)
            .map(|a| a.id);

        let authorizer_id = match existing {
            Some(authorizer_id) => authorizer_id,
            None => self.create_authorizer(&id, &authorizer_name).await?,
        };

        Ok(GatewayApi {
            id,
            number,
            authorizer_id,
            root_id,
        })
    }

    async fn create_authorizer(&self, api_id: &str, name: &str) -> Result<String> {
        let authorizer_arn = self
            .settings
            .lambda
            .authorizer_arn
            .clone()
            .ok_or_else(|| Error::MissingEnv("ILD_LAMBDA_AUTHORIZER_ARN".into()))?;

        let authorizer = within(
            self.settings.call_timeout,
            "create authorizer",
            self.gateway.create_authorizer(
                api_id,
                &CreateAuthorizerRequest {
                    name: name.to_string(),
                    kind: "REQUEST".into(),
                    authorizer_uri: invocation_uri(self.region(), &authorizer_arn),
                    identity_source: "method.request.querystring.access_token".into(),
                    authorizer_result_ttl_in_seconds: 300,
                },
            ),
        )
        .await?;

        let source_arn = self.execute_api_arn(api_id, &format!("authorizers/{}", authorizer.id))?;
        self.grant_invoke(
            &authorizer_arn,
            &format!("authorizer-{api_id}-{}", authorizer.id),
            source_arn,
        )
        .await?;

        info!(rest_api_id = %api_id, authorizer_id = %authorizer.id, "lambda: authorizer created");
        Ok(authorizer.id)
    }

    /// Let API Gateway invoke `function`; an existing grant is kept.
    async fn grant_invoke(&self, function: &str, statement_id: &str, source_arn: String) -> Result<()> {
        let result = within(
            self.settings.call_timeout,
            "add permission",
            self.lambda.add_permission(
                function,
                &AddPermissionRequest {
                    statement_id: statement_id.to_string(),
                    action: "lambda:InvokeFunction".into(),
                    principal: "apigateway.amazonaws.com".into(),
                    source_arn: Some(source_arn),
                },
            ),
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(Error::Aws(e)) if e.code() == Some("ResourceConflictException") => Ok(()),
            Err(e) => Err(e),
        }
    }
}
