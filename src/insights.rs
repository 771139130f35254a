use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ProjectRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    DeploymentFrequency,
    LeadTimeForChanges,
    MeanTimeToRestore,
    ChangeFailureRate,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::DeploymentFrequency,
        MetricKind::LeadTimeForChanges,
        MetricKind::MeanTimeToRestore,
        MetricKind::ChangeFailureRate,
    ];

    pub fn unit(self) -> MetricUnit {
        match self {
            Self::DeploymentFrequency => MetricUnit::PerDay,
            Self::LeadTimeForChanges | Self::MeanTimeToRestore => MetricUnit::Hours,
            Self::ChangeFailureRate => MetricUnit::Percent,
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeploymentFrequency => write!(f, "deployment frequency"),
            Self::LeadTimeForChanges => write!(f, "lead time for changes"),
            Self::MeanTimeToRestore => write!(f, "mean time to restore"),
            Self::ChangeFailureRate => write!(f, "change failure rate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    PerDay,
    Hours,
    Percent,
}

/// DORA benchmark classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Elite,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub kind: MetricKind,
    pub project_key: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub tier: Tier,
    pub window_days: u32,
    pub computed_at: DateTime<Utc>,
    pub item_order: i32,
    pub is_project_view: bool,
    pub event_count: usize,
    pub overridden: bool,
    pub samples: Vec<MetricSample>,
}

impl MetricResult {
    /// Keep only the `max_items` most recent samples.
    pub fn truncate_samples(&mut self, max_items: usize) {
        if self.samples.len() > max_items {
            let excess = self.samples.len() - max_items;
            self.samples.drain(..excess);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub status: bool,
    pub message: String,
    pub duration_seconds: f64,
}

/// One project's row in a multi-project summary.
#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    pub project: ProjectRef,
    pub item_order: i32,
    pub metrics: Vec<MetricResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DoraSummary {
    pub collected_at: DateTime<Utc>,
    pub window_days: u32,
    pub total_projects: usize,
    pub failed_projects: usize,
    pub projects: Vec<ProjectSummary>,
}
