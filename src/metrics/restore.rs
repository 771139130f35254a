use chrono::{DateTime, Duration, Utc};

use super::{hours, Measurement, Window};
use crate::insights::{MetricKind, MetricSample};
use crate::models::{EventKind, RawEvent};

/// Mean hours from a production failure to its restore on the same
/// resource group.
pub fn mean_time_to_restore(events: &[&RawEvent], window: &Window) -> Measurement {
    let restores = restore_durations(events, window);

    let samples: Vec<MetricSample> = restores
        .iter()
        .map(|(failed_at, duration)| MetricSample {
            timestamp: *failed_at,
            value: hours(*duration),
        })
        .collect();

    #[allow(clippy::cast_precision_loss)]
    let mean = if samples.is_empty() {
        0.0
    } else {
        samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64
    };

    Measurement::new(MetricKind::MeanTimeToRestore, mean, samples.len(), samples)
}

/// Pair each in-window production failure with its restore.
///
/// `events` must already be in chronological order. A failed deployment is
/// restored by the next successful deployment on its resource group. An
/// incident is restored only by its own resolution, so incidents still open
/// at the end of the fetched range produce no pair.
pub fn restore_durations(
    events: &[&RawEvent],
    window: &Window,
) -> Vec<(DateTime<Utc>, Duration)> {
    events
        .iter()
        .enumerate()
        .filter(|(_, e)| is_production(e) && !e.is_success() && window.contains(e.timestamp))
        .filter_map(|(i, failure)| {
            let restored = events[i + 1..]
                .iter()
                .find(|candidate| restores(failure, candidate))?;
            Some((failure.timestamp, restored.timestamp - failure.timestamp))
        })
        .collect()
}

fn is_production(event: &RawEvent) -> bool {
    event.kind != EventKind::Commit && event.resource_group.is_some()
}

fn restores(failure: &RawEvent, candidate: &RawEvent) -> bool {
    let same_target = candidate.kind == failure.kind
        && candidate.is_success()
        && candidate.resource_group == failure.resource_group;

    match failure.kind {
        EventKind::Incident => same_target && candidate.correlation_id == failure.correlation_id,
        _ => same_target,
    }
}
