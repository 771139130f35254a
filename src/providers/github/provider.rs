use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::Arc;

use super::client::{GitHubClient, WorkflowRunDto};
use crate::auth::Token;
use crate::error::Result;
use crate::models::{EventKind, EventStatus, Platform, ProjectSettings, RawEvent};
use crate::providers::http::UpstreamClient;
use crate::providers::Provider;

pub struct GitHubProvider {
    client: GitHubClient,
    settings: ProjectSettings,
}

impl GitHubProvider {
    pub fn new(
        upstream: Arc<UpstreamClient>,
        base_url: &str,
        settings: ProjectSettings,
        token: Option<Token>,
    ) -> Result<Self> {
        let client = GitHubClient::new(upstream, base_url, token)?;
        Ok(Self { client, settings })
    }

    fn owner(&self) -> &str {
        &self.settings.project.organization_or_owner
    }

    fn repo(&self) -> &str {
        &self.settings.project.project_or_repo
    }
}

/// Map a run conclusion to a deployment outcome; `None` means the run is not counted.
fn deployment_status(conclusion: Option<&str>) -> Option<EventStatus> {
    match conclusion? {
        "success" => Some(EventStatus::Success),
        "failure" | "timed_out" | "startup_failure" => Some(EventStatus::Failure),
        _ => None,
    }
}

fn deployment_event(run: &WorkflowRunDto, resource_group: &str) -> Option<RawEvent> {
    if !run.is_completed() {
        return None;
    }

    Some(RawEvent {
        kind: EventKind::Deployment,
        timestamp: run.updated_at,
        status: deployment_status(run.conclusion.as_deref())?,
        platform: Platform::GitHub,
        correlation_id: run.head_sha.clone(),
        resource_group: Some(resource_group.to_string()),
    })
}

#[async_trait]
impl Provider for GitHubProvider {
    fn platform(&self) -> Platform {
        Platform::GitHub
    }

    async fn fetch_deployments(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        let runs = self
            .client
            .fetch_workflow_runs(
                self.owner(),
                self.repo(),
                self.settings.build_or_workflow(),
                &self.settings.branch,
                since,
            )
            .await?;

        let scope = self.settings.incident_scope();
        let events: Vec<RawEvent> = runs
            .iter()
            .filter_map(|run| deployment_event(run, &scope))
            .collect();

        if events.is_empty() {
            warn!("No completed workflow runs found for {}", self.settings.key());
        }
        info!(
            "Fetched {} deployments from {} workflow runs for {}",
            events.len(),
            runs.len(),
            self.settings.key()
        );
        Ok(events)
    }

    async fn fetch_commits(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        let commits = self
            .client
            .fetch_commits(self.owner(), self.repo(), &self.settings.branch, since)
            .await?;

        Ok(commits
            .into_iter()
            .filter_map(|commit| {
                Some(RawEvent {
                    kind: EventKind::Commit,
                    timestamp: commit.committed_at()?,
                    status: EventStatus::Success,
                    platform: Platform::GitHub,
                    correlation_id: commit.sha,
                    resource_group: None,
                })
            })
            .collect())
    }

    /// Each incident issue opens a failure on the production resource group
    /// and, once closed, restores it.
    async fn fetch_incidents(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        let issues = self
            .client
            .fetch_incident_issues(self.owner(), self.repo(), since)
            .await?;

        let scope = self.settings.incident_scope();
        let mut events = Vec::with_capacity(issues.len() * 2);
        for issue in issues {
            let id = format!("issue-{}", issue.number);
            events.push(RawEvent {
                kind: EventKind::Incident,
                timestamp: issue.created_at,
                status: EventStatus::Failure,
                platform: Platform::GitHub,
                correlation_id: id.clone(),
                resource_group: Some(scope.clone()),
            });
            if let Some(closed_at) = issue.closed_at {
                events.push(RawEvent {
                    kind: EventKind::Incident,
                    timestamp: closed_at,
                    status: EventStatus::Success,
                    platform: Platform::GitHub,
                    correlation_id: id,
                    resource_group: Some(scope.clone()),
                });
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::MetricKind;
    use crate::metrics::{aggregate, Window};
    use crate::providers::http::testing;
    use crate::settings::fixtures;
    use mockito::Matcher;

    fn provider(server: &mockito::ServerGuard) -> GitHubProvider {
        GitHubProvider::new(
            Arc::new(testing::client(Platform::GitHub)),
            &server.url(),
            fixtures::github("acme", "widgets"),
            None,
        )
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        "2024-06-01T00:00:00Z".parse().unwrap()
    }

    fn run(id: u64, sha: &str, conclusion: &str, day: u32) -> String {
        format!(
            r#"{{"id": {id}, "head_sha": "{sha}", "status": "completed", "conclusion": "{conclusion}",
                "created_at": "2024-05-{day:02}T10:00:00Z", "updated_at": "2024-05-{day:02}T10:30:00Z"}}"#
        )
    }

    #[test]
    fn test_conclusions_map_to_outcomes() {
        assert_eq!(deployment_status(Some("success")), Some(EventStatus::Success));
        assert_eq!(deployment_status(Some("failure")), Some(EventStatus::Failure));
        assert_eq!(deployment_status(Some("timed_out")), Some(EventStatus::Failure));
        assert_eq!(deployment_status(Some("cancelled")), None);
        assert_eq!(deployment_status(Some("skipped")), None);
        assert_eq!(deployment_status(None), None);
    }

    #[tokio::test]
    async fn test_nine_successes_and_one_failure_is_ten_percent() {
        let mut server = mockito::Server::new_async().await;
        let runs: Vec<String> = (11..=20)
            .map(|day| {
                let conclusion = if day == 14 { "failure" } else { "success" };
                run(u64::from(day), &format!("sha{day}"), conclusion, day)
            })
            .collect();
        server
            .mock("GET", "/repos/acme/widgets/actions/workflows/deploy.yml/runs")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"workflow_runs": [{}]}}"#, runs.join(",")))
            .create_async()
            .await;

        let provider = GitHubProvider::new(
            Arc::new(
                UpstreamClient::new(
                    Platform::GitHub,
                    crate::config::UpstreamConfig {
                        page_size: 100,
                        ..testing::fast_config()
                    },
                )
                .unwrap(),
            ),
            &server.url(),
            fixtures::github("acme", "widgets"),
            None,
        )
        .unwrap();
        let window = Window::trailing(30, now());

        let events = provider
            .fetch_events(&window, MetricKind::ChangeFailureRate)
            .await
            .unwrap();
        let measurement = aggregate(MetricKind::ChangeFailureRate, &events, &window);

        assert_eq!(events.len(), 10);
        assert_eq!(measurement.value, 10.0);
    }

    #[tokio::test]
    async fn test_cancelled_runs_are_not_deployments() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/actions/workflows/deploy.yml/runs")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"workflow_runs": [{}]}}"#,
                run(1, "a", "cancelled", 2)
            ))
            .create_async()
            .await;

        let events = provider(&server).fetch_deployments(now()).await.unwrap();

        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_deployments_carry_head_sha_and_resource_group() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/actions/workflows/deploy.yml/runs")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"workflow_runs": [{}]}}"#, run(1, "abc", "success", 2)))
            .create_async()
            .await;

        let events = provider(&server).fetch_deployments(now()).await.unwrap();

        assert_eq!(events[0].correlation_id, "abc");
        assert_eq!(events[0].resource_group.as_deref(), Some("rg-widgets-prod"));
        assert_eq!(events[0].timestamp.to_rfc3339(), "2024-05-02T10:30:00+00:00");
    }

    #[tokio::test]
    async fn test_closed_incident_yields_failure_and_recovery() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/issues")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"number": 1, "created_at": "2024-05-10T10:00:00Z", "closed_at": "2024-05-10T11:00:00Z"},
                    {"number": 2, "created_at": "2024-05-20T10:00:00Z", "closed_at": null}
                ]"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/widgets/issues")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let events = provider(&server).fetch_incidents(now()).await.unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].status, EventStatus::Failure);
        assert_eq!(events[1].status, EventStatus::Success);
        assert!(events
            .iter()
            .all(|e| e.resource_group.as_deref() == Some("rg-widgets-prod")));

        let window = Window::trailing(30, now());
        let measurement = aggregate(MetricKind::MeanTimeToRestore, &events, &window);
        assert_eq!(measurement.event_count, 1);
        assert_eq!(measurement.value, 1.0);
    }

    #[tokio::test]
    async fn test_missing_workflow_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/actions/workflows/deploy.yml/runs")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let err = provider(&server).fetch_deployments(now()).await.unwrap_err();

        assert!(matches!(err, crate::error::DoraError::NotFound(_)));
    }
}
