use reqwest::Method;

use crate::types::*;
use crate::{AwsClient, Result, Service};

const BATCH: Service = Service {
    name: "batch",
    endpoint_prefix: "batch",
    signing_name: "batch",
    target_prefix: None,
};

/// Client for the AWS Batch job API.
#[derive(Clone)]
pub struct BatchClient {
    inner: AwsClient,
}

impl BatchClient {
    pub fn new(inner: AwsClient) -> Self {
        Self { inner }
    }

    async fn post<Req, Resp>(&self, operation: &'static str, path: &str, req: &Req) -> Result<Resp>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        self.inner
            .call_rest(&BATCH, operation, Method::POST, path, &[], Some(req))
            .await
    }

    // ── Job definitions ──────────────────────────────────────────────

    pub async fn register_job_definition(
        &self,
        req: &RegisterJobDefinitionRequest,
    ) -> Result<RegisterJobDefinitionResponse> {
        self.post("RegisterJobDefinition", "/v1/registerjobdefinition", req)
            .await
    }

    pub async fn deregister_job_definition(&self, job_definition: &str) -> Result<()> {
        let _: Empty = self
            .post(
                "DeregisterJobDefinition",
                "/v1/deregisterjobdefinition",
                &DeregisterJobDefinitionRequest {
                    job_definition: job_definition.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    // ── Jobs ─────────────────────────────────────────────────────────

    pub async fn submit_job(&self, req: &SubmitJobRequest) -> Result<SubmitJobResponse> {
        self.post("SubmitJob", "/v1/submitjob", req).await
    }

    pub async fn cancel_job(&self, job_id: &str, reason: &str) -> Result<()> {
        let _: Empty = self
            .post("CancelJob", "/v1/canceljob", &job_reason(job_id, reason))
            .await?;
        Ok(())
    }

    pub async fn terminate_job(&self, job_id: &str, reason: &str) -> Result<()> {
        let _: Empty = self
            .post("TerminateJob", "/v1/terminatejob", &job_reason(job_id, reason))
            .await?;
        Ok(())
    }

    pub async fn describe_jobs(&self, job_ids: &[String]) -> Result<DescribeJobsResponse> {
        self.post(
            "DescribeJobs",
            "/v1/describejobs",
            &DescribeJobsRequest {
                jobs: job_ids.to_vec(),
            },
        )
        .await
    }
}

fn job_reason(job_id: &str, reason: &str) -> JobReason {
    JobReason {
        job_id: job_id.to_string(),
        reason: reason.to_string(),
    }
}
