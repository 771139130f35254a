use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::error::{DoraError, Result};

/// An operator-set change failure rate for one build or workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeFailureRateOverride {
    pub organization_or_owner: String,
    pub project_or_repo: String,
    pub build_or_workflow_name: String,
    pub percent: u8,
    pub window_days: u32,
    pub set_at: DateTime<Utc>,
}

impl ChangeFailureRateOverride {
    pub fn key(&self) -> String {
        override_key(
            &self.organization_or_owner,
            &self.project_or_repo,
            &self.build_or_workflow_name,
        )
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.set_at + Duration::days(i64::from(self.window_days))
    }

    /// Rolling window starting when the override was set.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.set_at <= now && now < self.expires_at()
    }
}

pub fn override_key(organization_or_owner: &str, project_or_repo: &str, build: &str) -> String {
    format!("{organization_or_owner}_{project_or_repo}_{build}")
}

pub struct OverrideStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, ChangeFailureRateOverride>>,
}

impl OverrideStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let overrides: Vec<ChangeFailureRateOverride> = serde_json::from_slice(&bytes)?;
                overrides.into_iter().map(|o| (o.key(), o)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub async fn set(&self, entry: ChangeFailureRateOverride) -> Result<()> {
        if entry.percent > 100 {
            return Err(DoraError::Validation(format!(
                "change failure rate must be between 0 and 100, got {}",
                entry.percent
            )));
        }
        if entry.window_days == 0 {
            return Err(DoraError::Validation(
                "override window must be at least one day".into(),
            ));
        }
        for (field, value) in [
            ("organization or owner", &entry.organization_or_owner),
            ("project or repo", &entry.project_or_repo),
            ("build or workflow name", &entry.build_or_workflow_name),
        ] {
            if value.trim().is_empty() {
                return Err(DoraError::Validation(format!("override requires a {field}")));
            }
        }

        let mut entries = self.entries.write().await;
        let key = entry.key();
        let (percent, window_days) = (entry.percent, entry.window_days);
        let previous = entries.insert(key.clone(), entry);

        if let Err(e) = persist(&self.path, &entries).await {
            match previous {
                Some(old) => entries.insert(key, old),
                None => entries.remove(&key),
            };
            return Err(e);
        }

        info!("Change failure rate for {key} set to {percent}% for {window_days} days");
        Ok(())
    }

    pub async fn active(&self, key: &str, now: DateTime<Utc>) -> Option<ChangeFailureRateOverride> {
        self.entries
            .read()
            .await
            .get(key)
            .filter(|o| o.is_active(now))
            .cloned()
    }
}

async fn persist(path: &Path, entries: &HashMap<String, ChangeFailureRateOverride>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let overrides: Vec<&ChangeFailureRateOverride> = entries.values().collect();
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(&overrides)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
