use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::Arc;

use super::client::{AzureDevOpsClient, BuildDefinition, BuildDto};
use crate::auth::Token;
use crate::error::{DoraError, Result};
use crate::models::{EventKind, EventStatus, Platform, ProjectSettings, RawEvent};
use crate::providers::http::UpstreamClient;
use crate::providers::Provider;

/// Azure DevOps has no incident feed; restore time is derived from failed
/// and recovering builds into the production resource group.
pub struct AzureDevOpsProvider {
    client: AzureDevOpsClient,
    settings: ProjectSettings,
}

impl AzureDevOpsProvider {
    pub fn new(
        upstream: Arc<UpstreamClient>,
        base_url: &str,
        settings: ProjectSettings,
        token: Token,
    ) -> Result<Self> {
        let client = AzureDevOpsClient::new(upstream, base_url, token)?;
        Ok(Self { client, settings })
    }

    fn organization(&self) -> &str {
        &self.settings.project.organization_or_owner
    }

    fn project(&self) -> &str {
        &self.settings.project.project_or_repo
    }

    fn definition(&self) -> BuildDefinition<'_> {
        if self.settings.build_or_workflow_id.trim().is_empty() {
            BuildDefinition::Name(&self.settings.build_or_workflow_name)
        } else {
            BuildDefinition::Id(&self.settings.build_or_workflow_id)
        }
    }
}

fn deployment_status(result: Option<&str>) -> Option<EventStatus> {
    match result? {
        "succeeded" => Some(EventStatus::Success),
        "failed" | "partiallySucceeded" => Some(EventStatus::Failure),
        _ => None,
    }
}

fn deployment_event(build: BuildDto, resource_group: &str) -> Option<RawEvent> {
    Some(RawEvent {
        kind: EventKind::Deployment,
        timestamp: build.finish_time?,
        status: deployment_status(build.result.as_deref())?,
        platform: Platform::AzureDevOps,
        correlation_id: build
            .source_version
            .unwrap_or_else(|| build.id.to_string()),
        resource_group: Some(resource_group.to_string()),
    })
}

#[async_trait]
impl Provider for AzureDevOpsProvider {
    fn platform(&self) -> Platform {
        Platform::AzureDevOps
    }

    async fn fetch_deployments(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        let builds = self
            .client
            .fetch_builds(
                self.organization(),
                self.project(),
                self.definition(),
                &self.settings.branch,
                since,
            )
            .await?;
        let total = builds.len();

        let scope = self.settings.incident_scope();
        let events: Vec<RawEvent> = builds
            .into_iter()
            .filter(|b| b.status.as_deref().map_or(true, |s| s == "completed"))
            .filter_map(|b| deployment_event(b, &scope))
            .collect();

        if events.is_empty() {
            warn!("No completed builds found for {}", self.settings.key());
        }
        info!(
            "Fetched {} deployments from {total} builds for {}",
            events.len(),
            self.settings.key()
        );
        Ok(events)
    }

    async fn fetch_commits(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        let repository = self.settings.project.repository.as_deref().ok_or_else(|| {
            DoraError::Validation(format!("{} has no repository", self.settings.key()))
        })?;

        let commits = self
            .client
            .fetch_commits(
                self.organization(),
                self.project(),
                repository,
                &self.settings.branch,
                since,
            )
            .await?;

        Ok(commits
            .into_iter()
            .filter_map(|commit| {
                Some(RawEvent {
                    kind: EventKind::Commit,
                    timestamp: commit.committed_at()?,
                    status: EventStatus::Success,
                    platform: Platform::AzureDevOps,
                    correlation_id: commit.commit_id,
                    resource_group: None,
                })
            })
            .collect())
    }
}
