pub mod azure_devops;
pub mod github;
pub mod http;
pub mod sample;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::error::{DoraError, Result};
use crate::insights::MetricKind;
use crate::metrics::Window;
use crate::models::{Platform, ProjectSettings, RawEvent};

use azure_devops::AzureDevOpsProvider;
use github::GitHubProvider;
use http::UpstreamClient;

/// Commits are fetched this far before the window so that changes deployed
/// early in the window still find their commit.
pub const COMMIT_LOOKBACK_DAYS: i64 = 14;

/// Source of normalized events for one configured project.
#[async_trait]
pub trait Provider: Send + Sync {
    fn platform(&self) -> Platform;

    async fn fetch_deployments(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>>;

    async fn fetch_commits(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>>;

    /// Platforms without an incident feed report none.
    async fn fetch_incidents(&self, _since: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        Ok(Vec::new())
    }

    /// Fetch only the streams `kind` needs, ordered by timestamp.
    async fn fetch_events(&self, window: &Window, kind: MetricKind) -> Result<Vec<RawEvent>> {
        let since = window.start;

        let (deployments, commits, incidents) = match kind {
            MetricKind::DeploymentFrequency | MetricKind::ChangeFailureRate => {
                (self.fetch_deployments(since).await?, Vec::new(), Vec::new())
            }
            MetricKind::LeadTimeForChanges => {
                let (deployments, commits) = futures::try_join!(
                    self.fetch_deployments(since),
                    self.fetch_commits(since - Duration::days(COMMIT_LOOKBACK_DAYS)),
                )?;
                (deployments, commits, Vec::new())
            }
            MetricKind::MeanTimeToRestore => {
                let (deployments, incidents) = futures::try_join!(
                    self.fetch_deployments(since),
                    self.fetch_incidents(since),
                )?;
                (deployments, Vec::new(), incidents)
            }
        };

        let mut events = deployments;
        events.extend(commits);
        events.extend(incidents);
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

/// Builds the provider for a project's platform.
pub trait ProviderFactory: Send + Sync {
    fn provider(&self, settings: &ProjectSettings) -> Result<Box<dyn Provider>>;
}

/// Providers backed by the real platform APIs.
///
/// Each platform has one shared [`UpstreamClient`], so its rate limit holds
/// across every project on that platform.
pub struct LiveProviders {
    github: Arc<UpstreamClient>,
    azure: Arc<UpstreamClient>,
    github_api_url: String,
    azure_devops_url: String,
}

impl LiveProviders {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            github: Arc::new(UpstreamClient::new(
                Platform::GitHub,
                config.upstream.clone(),
            )?),
            azure: Arc::new(UpstreamClient::new(
                Platform::AzureDevOps,
                config.upstream.clone(),
            )?),
            github_api_url: config.github_api_url.clone(),
            azure_devops_url: config.azure_devops_url.clone(),
        })
    }
}

impl ProviderFactory for LiveProviders {
    fn provider(&self, settings: &ProjectSettings) -> Result<Box<dyn Provider>> {
        let token = settings.credential.resolve()?;

        match settings.platform() {
            Platform::GitHub => Ok(Box::new(GitHubProvider::new(
                Arc::clone(&self.github),
                &self.github_api_url,
                settings.clone(),
                token,
            )?)),
            Platform::AzureDevOps => {
                let token = token.ok_or_else(|| {
                    DoraError::Authentication(format!(
                        "{} requires a personal access token",
                        settings.key()
                    ))
                })?;
                Ok(Box::new(AzureDevOpsProvider::new(
                    Arc::clone(&self.azure),
                    &self.azure_devops_url,
                    settings.clone(),
                    token,
                )?))
            }
        }
    }
}
