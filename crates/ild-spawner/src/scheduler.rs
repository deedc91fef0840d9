use std::sync::Arc;

use async_trait::async_trait;
use aws_api::{
    DescribeRuleResponse, EcsParameters, EventsClient, FailedEntry, PutRuleRequest,
    PutRuleResponse, PutTargetsRequest, RemoveTargetsRequest, Target, TargetsResponse,
};
use ild_db::{FailedTarget, Server, ServerStatus, ServerStore};
use tracing::{info, warn};

use crate::config::SpawnerSettings;
use crate::ecs::{EcsSpawner, ignore_not_found};
use crate::{Error, Result, Spawner, SpawnerKind, status, within};

/// EventBridge rule operations.
#[async_trait]
pub trait EventsApi: Send + Sync + 'static {
    async fn put_rule(&self, req: &PutRuleRequest) -> aws_api::Result<PutRuleResponse>;

    async fn describe_rule(&self, name: &str) -> aws_api::Result<DescribeRuleResponse>;

    async fn disable_rule(&self, name: &str) -> aws_api::Result<()>;

    async fn delete_rule(&self, name: &str) -> aws_api::Result<()>;

    async fn put_targets(&self, req: &PutTargetsRequest) -> aws_api::Result<TargetsResponse>;

    async fn remove_targets(&self, req: &RemoveTargetsRequest) -> aws_api::Result<TargetsResponse>;
}

#[async_trait]
impl EventsApi for EventsClient {
    async fn put_rule(&self, req: &PutRuleRequest) -> aws_api::Result<PutRuleResponse> {
        EventsClient::put_rule(self, req).await
    }

    async fn describe_rule(&self, name: &str) -> aws_api::Result<DescribeRuleResponse> {
        EventsClient::describe_rule(self, name).await
    }

    async fn disable_rule(&self, name: &str) -> aws_api::Result<()> {
        EventsClient::disable_rule(self, name).await
    }

    async fn delete_rule(&self, name: &str) -> aws_api::Result<()> {
        EventsClient::delete_rule(self, name).await
    }

    async fn put_targets(&self, req: &PutTargetsRequest) -> aws_api::Result<TargetsResponse> {
        EventsClient::put_targets(self, req).await
    }

    async fn remove_targets(&self, req: &RemoveTargetsRequest) -> aws_api::Result<TargetsResponse> {
        EventsClient::remove_targets(self, req).await
    }
}

fn failed_targets(entries: Vec<FailedEntry>) -> Vec<FailedTarget> {
    entries
        .into_iter()
        .map(|e| FailedTarget {
            target_id: e.target_id,
            error_code: e.error_code,
            error_message: e.error_message,
        })
        .collect()
}

/// Runs a server's ECS task on a cron schedule through an EventBridge rule.
///
/// The rule and its single target are both keyed by the server.
pub struct JobScheduler {
    ecs: EcsSpawner,
    events: Arc<dyn EventsApi>,
    settings: Arc<SpawnerSettings>,
    store: Arc<dyn ServerStore>,
}

impl JobScheduler {
    pub fn new(
        ecs: EcsSpawner,
        events: Arc<dyn EventsApi>,
        settings: Arc<SpawnerSettings>,
        store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            ecs,
            events,
            settings,
            store,
        }
    }

    pub fn rule_name(server: &Server) -> String {
        server.container_name()
    }

    async fn put_target(&self, server: &mut Server, task_definition: String) -> Result<()> {
        let rule = Self::rule_name(server);
        let target = Target {
            id: server.id.to_string(),
            arn: self.settings.ecs_cluster_arn(self.ecs.region())?,
            role_arn: self.settings.events_role_arn.clone(),
            ecs_parameters: Some(EcsParameters {
                task_definition_arn: task_definition,
                task_count: 1,
            }),
        };

        let resp = within(
            self.settings.call_timeout,
            "put targets",
            self.events.put_targets(&PutTargetsRequest {
                rule: rule.clone(),
                targets: vec![target],
            }),
        )
        .await?;

        let failed = failed_targets(resp.failed_entries);
        if !failed.is_empty() {
            warn!(
                server_id = %server.id,
                rule = %rule,
                failed = failed.len(),
                "scheduler: some targets were not attached"
            );
        }
        if server.config.rule.failed != failed {
            server.config.rule.failed = failed;
            self.store.save_server_config(server).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Spawner for JobScheduler {
    async fn start(&self, server: &mut Server) -> Result<()> {
        let task_definition = self.ecs.ensure_task_definition(server).await?;
        let schedule = server
            .config
            .schedule
            .clone()
            .ok_or(Error::MissingConfig("schedule"))?;
        let rule = Self::rule_name(server);

        let resp = within(
            self.settings.call_timeout,
            "put rule",
            self.events.put_rule(&PutRuleRequest {
                name: rule.clone(),
                schedule_expression: schedule,
                state: "ENABLED".into(),
                description: Some(format!("Scheduled run of server {}", server.id)),
            }),
        )
        .await?;

        if server.config.rule.rule_arn.as_deref() != Some(resp.rule_arn.as_str()) {
            server.config.rule.rule_arn = Some(resp.rule_arn.clone());
            self.store.save_server_config(server).await?;
        }
        info!(server_id = %server.id, rule_arn = %resp.rule_arn, "scheduler: rule enabled");

        self.put_target(server, task_definition).await
    }

    async fn stop(&self, server: &mut Server) -> Result<()> {
        if server.config.rule.rule_arn.is_none() {
            return Ok(());
        }

        let rule = Self::rule_name(server);
        let result = within(
            self.settings.call_timeout,
            "disable rule",
            self.events.disable_rule(&rule),
        )
        .await;
        ignore_not_found(result, "rule", server)?;
        info!(server_id = %server.id, rule = %rule, "scheduler: rule disabled");
        Ok(())
    }

    async fn terminate(&self, server: &mut Server) -> Result<()> {
        if server.config.rule.rule_arn.is_some() {
            let rule = Self::rule_name(server);
            let resp = within(
                self.settings.call_timeout,
                "remove targets",
                self.events.remove_targets(&RemoveTargetsRequest {
                    rule: rule.clone(),
                    ids: vec![server.id.to_string()],
                }),
            )
            .await;

            match resp {
                Ok(resp) if !resp.failed_entries.is_empty() => {
                    let failed = failed_targets(resp.failed_entries);
                    let ids = failed.iter().map(|f| f.target_id.clone()).collect();
                    server.config.rule.failed = failed;
                    self.store.save_server_config(server).await?;
                    return Err(Error::TargetRemoval { rule, failed: ids });
                }
                Ok(_) => {}
                Err(e) => ignore_not_found(Err(e), "rule targets", server)?,
            }

            let result = within(
                self.settings.call_timeout,
                "delete rule",
                self.events.delete_rule(&rule),
            )
            .await;
            ignore_not_found(result, "rule", server)?;

            server.config.rule.rule_arn = None;
            server.config.rule.failed.clear();
            self.store.save_server_config(server).await?;
            info!(server_id = %server.id, rule = %rule, "scheduler: rule deleted");
        }

        self.ecs.deregister(server).await
    }

    async fn status(&self, server: &Server) -> ServerStatus {
        if server.config.ecs.task_definition_arn.is_none() || server.config.rule.rule_arn.is_none()
        {
            return ServerStatus::Stopped;
        }

        let rule = Self::rule_name(server);
        match within(
            self.settings.call_timeout,
            "describe rule",
            self.events.describe_rule(&rule),
        )
        .await
        {
            Ok(resp) => resp
                .state
                .as_deref()
                .map(status::from_rule)
                .unwrap_or(ServerStatus::Error),
            Err(e) if e.is_not_found() => ServerStatus::Stopped,
            Err(e) => {
                warn!(server_id = %server.id, error = %e, "scheduler: status check failed");
                ServerStatus::Error
            }
        }
    }

    fn kind(&self) -> SpawnerKind {
        SpawnerKind::Scheduler
    }
}
