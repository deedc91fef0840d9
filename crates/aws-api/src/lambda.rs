use reqwest::Method;

use crate::types::*;
use crate::{AwsClient, Result, Service};

const LAMBDA: Service = Service {
    name: "lambda",
    endpoint_prefix: "lambda",
    signing_name: "lambda",
    target_prefix: None,
};

const API_VERSION: &str = "2015-03-31";

/// Client for the Lambda function API.
#[derive(Clone)]
pub struct LambdaClient {
    inner: AwsClient,
}

impl LambdaClient {
    pub fn new(inner: AwsClient) -> Self {
        Self { inner }
    }

    pub fn region(&self) -> &str {
        self.inner.region()
    }

    pub async fn create_function(&self, req: &CreateFunctionRequest) -> Result<FunctionConfiguration> {
        self.inner
            .call_rest(
                &LAMBDA,
                "CreateFunction",
                Method::POST,
                &format!("/{API_VERSION}/functions"),
                &[],
                Some(req),
            )
            .await
    }

    pub async fn update_function_code(
        &self,
        function_name: &str,
        req: &UpdateFunctionCodeRequest,
    ) -> Result<FunctionConfiguration> {
        self.inner
            .call_rest(
                &LAMBDA,
                "UpdateFunctionCode",
                Method::PUT,
                &format!("/{API_VERSION}/functions/{function_name}/code"),
                &[],
                Some(req),
            )
            .await
    }

    pub async fn add_permission(
        &self,
        function_name: &str,
        req: &AddPermissionRequest,
    ) -> Result<AddPermissionResponse> {
        self.inner
            .call_rest(
                &LAMBDA,
                "AddPermission",
                Method::POST,
                &format!("/{API_VERSION}/functions/{function_name}/policy"),
                &[],
                Some(req),
            )
            .await
    }

    pub async fn delete_function(&self, function_name: &str) -> Result<()> {
        self.inner
            .call_rest_empty::<()>(
                &LAMBDA,
                "DeleteFunction",
                Method::DELETE,
                &format!("/{API_VERSION}/functions/{function_name}"),
                None,
            )
            .await
    }
}
