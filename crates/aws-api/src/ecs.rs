use crate::types::*;
use crate::{AwsClient, Result, Service};

const ECS: Service = Service {
    name: "ecs",
    endpoint_prefix: "ecs",
    signing_name: "ecs",
    target_prefix: Some("AmazonEC2ContainerServiceV20141113"),
};

/// Client for the ECS task API.
#[derive(Clone)]
pub struct EcsClient {
    inner: AwsClient,
}

impl EcsClient {
    pub fn new(inner: AwsClient) -> Self {
        Self { inner }
    }

    pub fn region(&self) -> &str {
        self.inner.region()
    }

    // ── Task definitions ─────────────────────────────────────────────

    pub async fn register_task_definition(
        &self,
        req: &RegisterTaskDefinitionRequest,
    ) -> Result<RegisterTaskDefinitionResponse> {
        self.inner
            .call_target(&ECS, "RegisterTaskDefinition", req)
            .await
    }

    pub async fn deregister_task_definition(&self, task_definition: &str) -> Result<()> {
        let _: Empty = self
            .inner
            .call_target(
                &ECS,
                "DeregisterTaskDefinition",
                &DeregisterTaskDefinitionRequest {
                    task_definition: task_definition.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    // ── Tasks ────────────────────────────────────────────────────────

    pub async fn run_task(&self, req: &RunTaskRequest) -> Result<RunTaskResponse> {
        self.inner.call_target(&ECS, "RunTask", req).await
    }

    pub async fn stop_task(&self, req: &StopTaskRequest) -> Result<StopTaskResponse> {
        self.inner.call_target(&ECS, "StopTask", req).await
    }

    pub async fn describe_tasks(&self, req: &DescribeTasksRequest) -> Result<DescribeTasksResponse> {
        self.inner.call_target(&ECS, "DescribeTasks", req).await
    }
}
