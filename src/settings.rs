use indexmap::IndexMap;
use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::error::{DoraError, Result};
use crate::models::{Platform, ProjectSettings};

/// Durable per-project connection settings, keyed by partition key.
pub struct SettingsStore {
    path: PathBuf,
    entries: RwLock<IndexMap<String, ProjectSettings>>,
}

impl SettingsStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let settings: Vec<ProjectSettings> = serde_json::from_slice(&bytes)?;
                settings.into_iter().map(|s| (s.key(), s)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("Loaded {} project settings from {}", entries.len(), path.display());

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Settings for one platform, ordered by display order then insertion.
    pub async fn get_settings(&self, platform: Platform) -> Vec<ProjectSettings> {
        let entries = self.entries.read().await;
        let mut settings: Vec<ProjectSettings> = entries
            .values()
            .filter(|s| s.platform() == platform)
            .cloned()
            .collect();
        settings.sort_by_key(|s| s.item_order);
        settings
    }

    pub async fn all(&self) -> Vec<ProjectSettings> {
        let mut settings: Vec<ProjectSettings> =
            self.entries.read().await.values().cloned().collect();
        settings.sort_by_key(|s| s.item_order);
        settings
    }

    pub async fn find(&self, key: &str) -> Option<ProjectSettings> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn upsert_setting(&self, settings: ProjectSettings) -> Result<()> {
        validate(&settings)?;

        let mut entries = self.entries.write().await;
        let key = settings.key();
        let previous = entries.insert(key.clone(), settings);

        if let Err(e) = persist(&self.path, &entries).await {
            // Keep memory consistent with disk when the write fails.
            match previous {
                Some(old) => {
                    entries.insert(key, old);
                }
                None => {
                    entries.shift_remove(&key);
                }
            }
            return Err(e);
        }

        info!("Saved settings for project: {key}");
        Ok(())
    }
}

async fn persist(path: &Path, entries: &IndexMap<String, ProjectSettings>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let settings: Vec<&ProjectSettings> = entries.values().collect();
    let json = serde_json::to_vec_pretty(&settings)?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn validate(settings: &ProjectSettings) -> Result<()> {
    let project = &settings.project;

    let mut required: Vec<(&str, &str)> = match project.platform {
        Platform::AzureDevOps => vec![
            ("organization", project.organization_or_owner.as_str()),
            ("project", project.project_or_repo.as_str()),
            ("repository", project.repository.as_deref().unwrap_or_default()),
        ],
        Platform::GitHub => vec![
            ("owner", project.organization_or_owner.as_str()),
            ("repo", project.project_or_repo.as_str()),
        ],
    };

    for (field, value) in &required {
        if value.trim().is_empty() {
            return Err(DoraError::Validation(format!(
                "{} settings require a {field}",
                project.platform
            )));
        }
    }

    if project.platform == Platform::GitHub && project.repository.is_some() {
        return Err(DoraError::Validation(
            "GitHub settings do not take a separate repository".into(),
        ));
    }

    required = vec![
        ("branch", settings.branch.as_str()),
        ("build or workflow name", settings.build_or_workflow_name.as_str()),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(DoraError::Validation(format!(
                "{} settings require a {field}",
                project.platform
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::auth::CredentialRef;
    use crate::models::{ProjectRef, ProjectSettings};

    pub fn github(owner: &str, repo: &str) -> ProjectSettings {
        ProjectSettings {
            project: ProjectRef::github(owner, repo),
            branch: "main".into(),
            build_or_workflow_name: "deploy.yml".into(),
            build_or_workflow_id: String::new(),
            production_resource_group: format!("rg-{repo}-prod"),
            credential: CredentialRef::default(),
            item_order: 0,
            show_setting: true,
        }
    }

    pub fn azure(organization: &str, project: &str, repository: &str) -> ProjectSettings {
        ProjectSettings {
            project: ProjectRef::azure(organization, project, repository),
            branch: "main".into(),
            build_or_workflow_name: "CI".into(),
            build_or_workflow_id: "42".into(),
            production_resource_group: format!("rg-{project}-prod"),
            credential: CredentialRef::new("AZURE_DEVOPS_PAT"),
            item_order: 0,
            show_setting: true,
        }
    }
}
