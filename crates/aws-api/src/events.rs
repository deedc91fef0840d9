use crate::types::*;
use crate::{AwsClient, Result, Service};

const EVENTS: Service = Service {
    name: "events",
    endpoint_prefix: "events",
    signing_name: "events",
    target_prefix: Some("AWSEvents"),
};

/// Client for EventBridge (CloudWatch Events) scheduled rules.
#[derive(Clone)]
pub struct EventsClient {
    inner: AwsClient,
}

impl EventsClient {
    pub fn new(inner: AwsClient) -> Self {
        Self { inner }
    }

    // ── Rules ────────────────────────────────────────────────────────

    pub async fn put_rule(&self, req: &PutRuleRequest) -> Result<PutRuleResponse> {
        self.inner.call_target(&EVENTS, "PutRule", req).await
    }

    pub async fn describe_rule(&self, name: &str) -> Result<DescribeRuleResponse> {
        self.inner
            .call_target(&EVENTS, "DescribeRule", &rule_name(name))
            .await
    }

    pub async fn disable_rule(&self, name: &str) -> Result<()> {
        let _: Empty = self
            .inner
            .call_target(&EVENTS, "DisableRule", &rule_name(name))
            .await?;
        Ok(())
    }

    pub async fn delete_rule(&self, name: &str) -> Result<()> {
        let _: Empty = self
            .inner
            .call_target(&EVENTS, "DeleteRule", &rule_name(name))
            .await?;
        Ok(())
    }

    // ── Targets ──────────────────────────────────────────────────────

    pub async fn put_targets(&self, req: &PutTargetsRequest) -> Result<TargetsResponse> {
        self.inner.call_target(&EVENTS, "PutTargets", req).await
    }

    pub async fn remove_targets(&self, req: &RemoveTargetsRequest) -> Result<TargetsResponse> {
        self.inner.call_target(&EVENTS, "RemoveTargets", req).await
    }
}

fn rule_name(name: &str) -> RuleName {
    RuleName {
        name: name.to_string(),
    }
}
