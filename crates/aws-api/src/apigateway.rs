use reqwest::Method;

use crate::types::*;
use crate::{AwsClient, Result, Service};

const APIGATEWAY: Service = Service {
    name: "apigateway",
    endpoint_prefix: "apigateway",
    signing_name: "apigateway",
    target_prefix: None,
};

/// Page size for list calls; API Gateway caps it at 500.
const LIST_LIMIT: &str = "500";

/// Client for the API Gateway (v1, REST APIs) control plane.
#[derive(Clone)]
pub struct ApiGatewayClient {
    inner: AwsClient,
}

impl ApiGatewayClient {
    pub fn new(inner: AwsClient) -> Self {
        Self { inner }
    }

    pub fn region(&self) -> &str {
        self.inner.region()
    }

    fn limit() -> Vec<(String, String)> {
        vec![("limit".to_string(), LIST_LIMIT.to_string())]
    }

    // ── REST APIs ────────────────────────────────────────────────────

    pub async fn create_rest_api(&self, req: &CreateRestApiRequest) -> Result<RestApi> {
        self.inner
            .call_rest(&APIGATEWAY, "CreateRestApi", Method::POST, "/restapis", &[], Some(req))
            .await
    }

    pub async fn get_rest_apis(&self) -> Result<RestApis> {
        self.inner
            .call_rest::<(), _>(
                &APIGATEWAY,
                "GetRestApis",
                Method::GET,
                "/restapis",
                &Self::limit(),
                None,
            )
            .await
    }

    // ── Authorizers ──────────────────────────────────────────────────

    pub async fn create_authorizer(
        &self,
        rest_api_id: &str,
        req: &CreateAuthorizerRequest,
    ) -> Result<Authorizer> {
        self.inner
            .call_rest(
                &APIGATEWAY,
                "CreateAuthorizer",
                Method::POST,
                &format!("/restapis/{rest_api_id}/authorizers"),
                &[],
                Some(req),
            )
            .await
    }

    pub async fn get_authorizers(&self, rest_api_id: &str) -> Result<Authorizers> {
        self.inner
            .call_rest::<(), _>(
                &APIGATEWAY,
                "GetAuthorizers",
                Method::GET,
                &format!("/restapis/{rest_api_id}/authorizers"),
                &Self::limit(),
                None,
            )
            .await
    }

    // ── Resources ────────────────────────────────────────────────────

    pub async fn get_resources(&self, rest_api_id: &str) -> Result<Resources> {
        self.inner
            .call_rest::<(), _>(
                &APIGATEWAY,
                "GetResources",
                Method::GET,
                &format!("/restapis/{rest_api_id}/resources"),
                &Self::limit(),
                None,
            )
            .await
    }

    pub async fn create_resource(
        &self,
        rest_api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<Resource> {
        self.inner
            .call_rest(
                &APIGATEWAY,
                "CreateResource",
                Method::POST,
                &format!("/restapis/{rest_api_id}/resources/{parent_id}"),
                &[],
                Some(&CreateResourceRequest {
                    path_part: path_part.to_string(),
                }),
            )
            .await
    }

    pub async fn delete_resource(&self, rest_api_id: &str, resource_id: &str) -> Result<()> {
        self.inner
            .call_rest_empty::<()>(
                &APIGATEWAY,
                "DeleteResource",
                Method::DELETE,
                &format!("/restapis/{rest_api_id}/resources/{resource_id}"),
                None,
            )
            .await
    }

    // ── Methods & integrations ───────────────────────────────────────

    pub async fn put_method(
        &self,
        rest_api_id: &str,
        resource_id: &str,
        http_method: &str,
        req: &PutMethodRequest,
    ) -> Result<()> {
        self.inner
            .call_rest_empty(
                &APIGATEWAY,
                "PutMethod",
                Method::PUT,
                &format!("/restapis/{rest_api_id}/resources/{resource_id}/methods/{http_method}"),
                Some(req),
            )
            .await
    }

    pub async fn put_integration(
        &self,
        rest_api_id: &str,
        resource_id: &str,
        http_method: &str,
        req: &PutIntegrationRequest,
    ) -> Result<()> {
        self.inner
            .call_rest_empty(
                &APIGATEWAY,
                "PutIntegration",
                Method::PUT,
                &format!(
                    "/restapis/{rest_api_id}/resources/{resource_id}/methods/{http_method}/integration"
                ),
                Some(req),
            )
            .await
    }

    // ── Deployments ──────────────────────────────────────────────────

    pub async fn create_deployment(&self, rest_api_id: &str, stage_name: &str) -> Result<ApiDeployment> {
        self.inner
            .call_rest(
                &APIGATEWAY,
                "CreateDeployment",
                Method::POST,
                &format!("/restapis/{rest_api_id}/deployments"),
                &[],
                Some(&CreateDeploymentRequest {
                    stage_name: stage_name.to_string(),
                }),
            )
            .await
    }
}
