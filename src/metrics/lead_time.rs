use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::{deployments_in, hours, Measurement, Window};
use crate::insights::{MetricKind, MetricSample};
use crate::models::{EventKind, RawEvent};

/// Median hours from commit to successful deployment.
///
/// Deployments whose source commit is not among the fetched commits are
/// excluded rather than counted as zero.
pub fn lead_time_for_changes(events: &[&RawEvent], window: &Window) -> Measurement {
    let commit_times = index_commits(events);

    let samples: Vec<MetricSample> = deployments_in(events, window)
        .filter(|d| d.is_success())
        .filter_map(|deployment| {
            let committed_at = commit_times.get(deployment.correlation_id.as_str())?;
            let delta = deployment.timestamp - *committed_at;
            (delta.num_seconds() >= 0).then(|| MetricSample {
                timestamp: deployment.timestamp,
                value: hours(delta),
            })
        })
        .collect();

    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();

    Measurement::new(
        MetricKind::LeadTimeForChanges,
        median(&values),
        samples.len(),
        samples,
    )
}

fn index_commits<'a>(events: &[&'a RawEvent]) -> HashMap<&'a str, DateTime<Utc>> {
    let mut commits = HashMap::new();
    for event in events.iter().filter(|e| e.kind == EventKind::Commit) {
        commits
            .entry(event.correlation_id.as_str())
            .or_insert(event.timestamp);
    }
    commits
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
