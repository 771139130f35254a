mod failure_rate;
mod frequency;
mod lead_time;
mod restore;
mod tiers;

pub use tiers::classify;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::BTreeMap;

use crate::insights::{MetricKind, MetricSample, Tier};
use crate::models::RawEvent;

/// Trailing period `[end - days, end]` a metric is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub days: u32,
}

impl Window {
    pub fn trailing(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::days(i64::from(days)),
            end: now,
            days,
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// Aggregator output before it is attached to a project.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub tier: Tier,
    pub event_count: usize,
    pub samples: Vec<MetricSample>,
}

impl Measurement {
    fn new(kind: MetricKind, value: f64, event_count: usize, samples: Vec<MetricSample>) -> Self {
        Self {
            value,
            tier: classify(kind, value, event_count > 0),
            event_count,
            samples,
        }
    }
}

/// Compute one DORA metric from normalized events.
///
/// Events are stable-sorted by timestamp first, so events sharing a timestamp
/// are processed in the order they were fetched.
pub fn aggregate(kind: MetricKind, events: &[RawEvent], window: &Window) -> Measurement {
    let ordered = chronological(events);

    match kind {
        MetricKind::DeploymentFrequency => frequency::deployment_frequency(&ordered, window),
        MetricKind::LeadTimeForChanges => lead_time::lead_time_for_changes(&ordered, window),
        MetricKind::MeanTimeToRestore => restore::mean_time_to_restore(&ordered, window),
        MetricKind::ChangeFailureRate => failure_rate::change_failure_rate(&ordered, window),
    }
}

fn chronological(events: &[RawEvent]) -> Vec<&RawEvent> {
    let mut ordered: Vec<&RawEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.timestamp);
    ordered
}

fn deployments_in<'a>(
    events: &'a [&'a RawEvent],
    window: &'a Window,
) -> impl Iterator<Item = &'a RawEvent> + 'a {
    events
        .iter()
        .copied()
        .filter(move |e| e.is_deployment() && window.contains(e.timestamp))
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn group_by_day<'a>(
    events: impl Iterator<Item = &'a RawEvent>,
) -> BTreeMap<NaiveDate, Vec<&'a RawEvent>> {
    let mut days: BTreeMap<NaiveDate, Vec<&RawEvent>> = BTreeMap::new();
    for event in events {
        days.entry(event.timestamp.date_naive())
            .or_default()
            .push(event);
    }
    days
}

fn hours(delta: Duration) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let hours = delta.num_seconds() as f64 / 3600.0;
    hours
}
