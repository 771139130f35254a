use super::{day_start, deployments_in, group_by_day, Measurement, Window};
use crate::insights::{MetricKind, MetricSample};
use crate::models::RawEvent;

/// Percentage of deployments in the window that failed.
pub fn change_failure_rate(events: &[&RawEvent], window: &Window) -> Measurement {
    let deployments: Vec<&RawEvent> = deployments_in(events, window).collect();
    let failed = deployments.iter().filter(|d| !d.is_success()).count();

    let samples = group_by_day(deployments.iter().copied())
        .into_iter()
        .map(|(date, daily)| {
            let daily_failed = daily.iter().filter(|d| !d.is_success()).count();
            MetricSample {
                timestamp: day_start(date),
                value: failure_percentage(daily_failed, daily.len()),
            }
        })
        .collect();

    Measurement::new(
        MetricKind::ChangeFailureRate,
        failure_percentage(failed, deployments.len()),
        deployments.len(),
        samples,
    )
}

fn failure_percentage(failed: usize, total: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let rate = (failed as f64 * 100.0) / total.max(1) as f64;
    rate
}
