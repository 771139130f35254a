use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::CredentialRef;

const KEY_SEPARATOR: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "azure-devops")]
    AzureDevOps,
    #[serde(rename = "github")]
    GitHub,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AzureDevOps => write!(f, "Azure DevOps"),
            Self::GitHub => write!(f, "GitHub"),
        }
    }
}

/// The fields that identify one monitored project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectRef {
    pub platform: Platform,
    pub organization_or_owner: String,
    pub project_or_repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

impl ProjectRef {
    pub fn azure(organization: &str, project: &str, repository: &str) -> Self {
        Self {
            platform: Platform::AzureDevOps,
            organization_or_owner: organization.to_string(),
            project_or_repo: project.to_string(),
            repository: Some(repository.to_string()),
        }
    }

    pub fn github(owner: &str, repo: &str) -> Self {
        Self {
            platform: Platform::GitHub,
            organization_or_owner: owner.to_string(),
            project_or_repo: repo.to_string(),
            repository: None,
        }
    }

    /// `org_project_repo` for Azure DevOps, `owner_repo` for GitHub.
    pub fn partition_key(&self) -> String {
        match self.platform {
            Platform::AzureDevOps => format!(
                "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
                self.organization_or_owner,
                self.project_or_repo,
                self.repository.as_deref().unwrap_or_default()
            ),
            Platform::GitHub => format!(
                "{}{KEY_SEPARATOR}{}",
                self.organization_or_owner, self.project_or_repo
            ),
        }
    }

    pub fn describe(&self) -> String {
        match &self.repository {
            Some(repo) => format!(
                "{} {} {}",
                self.organization_or_owner, self.project_or_repo, repo
            ),
            None => format!("{} {}", self.organization_or_owner, self.project_or_repo),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(flatten)]
    pub project: ProjectRef,
    pub branch: String,
    pub build_or_workflow_name: String,
    #[serde(default)]
    pub build_or_workflow_id: String,
    #[serde(default)]
    pub production_resource_group: String,
    #[serde(default)]
    pub credential: CredentialRef,
    #[serde(default)]
    pub item_order: i32,
    #[serde(default = "default_show_setting")]
    pub show_setting: bool,
}

fn default_show_setting() -> bool {
    true
}

impl ProjectSettings {
    pub fn key(&self) -> String {
        self.project.partition_key()
    }

    pub fn platform(&self) -> Platform {
        self.project.platform
    }

    /// Resource group that production incidents are attributed to.
    pub fn incident_scope(&self) -> String {
        if self.production_resource_group.trim().is_empty() {
            self.key()
        } else {
            self.production_resource_group.clone()
        }
    }

    /// Azure build definitions and GitHub workflows are addressed by id when known.
    pub fn build_or_workflow(&self) -> &str {
        if self.build_or_workflow_id.trim().is_empty() {
            &self.build_or_workflow_name
        } else {
            &self.build_or_workflow_id
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Deployment,
    Commit,
    Incident,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Success,
    Failure,
}

/// A deployment, commit or incident normalized from either platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub status: EventStatus,
    pub platform: Platform,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
}

impl RawEvent {
    pub fn is_success(&self) -> bool {
        self.status == EventStatus::Success
    }

    pub fn is_deployment(&self) -> bool {
        self.kind == EventKind::Deployment
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectLog {
    pub project_key: String,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub success: bool,
    pub message: String,
}
