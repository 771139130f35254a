use super::{day_start, deployments_in, group_by_day, Measurement, Window};
use crate::insights::{MetricKind, MetricSample};
use crate::models::RawEvent;

/// Successful deployments per day, bucketed by UTC day.
pub fn deployment_frequency(events: &[&RawEvent], window: &Window) -> Measurement {
    let days = group_by_day(deployments_in(events, window).filter(|e| e.is_success()));

    let total: usize = days.values().map(Vec::len).sum();

    #[allow(clippy::cast_precision_loss)]
    let per_day = total as f64 / f64::from(window.days.max(1));

    #[allow(clippy::cast_precision_loss)]
    let samples = days
        .into_iter()
        .map(|(date, deployments)| MetricSample {
            timestamp: day_start(date),
            value: deployments.len() as f64,
        })
        .collect();

    Measurement::new(MetricKind::DeploymentFrequency, per_day, total, samples)
}
