use crate::insights::{MetricKind, Tier};

const HOURS_PER_DAY: f64 = 24.0;
const HOURS_PER_WEEK: f64 = 7.0 * HOURS_PER_DAY;
const HOURS_PER_MONTH: f64 = 30.0 * HOURS_PER_DAY;

/// Classify a metric value against the DORA benchmarks.
///
/// `has_data` is false when nothing qualified in the window; such results are
/// always `Low`, including a 0% change failure rate.
pub fn classify(kind: MetricKind, value: f64, has_data: bool) -> Tier {
    if !has_data {
        return Tier::Low;
    }

    match kind {
        MetricKind::DeploymentFrequency => deployment_frequency_tier(value),
        MetricKind::LeadTimeForChanges => lead_time_tier(value),
        MetricKind::MeanTimeToRestore => restore_time_tier(value),
        MetricKind::ChangeFailureRate => failure_rate_tier(value),
    }
}

fn deployment_frequency_tier(per_day: f64) -> Tier {
    if per_day >= 1.0 {
        Tier::Elite
    } else if per_day >= 1.0 / 7.0 {
        Tier::High
    } else if per_day >= 1.0 / 30.0 {
        Tier::Medium
    } else {
        Tier::Low
    }
}

fn lead_time_tier(hours: f64) -> Tier {
    if hours < HOURS_PER_DAY {
        Tier::Elite
    } else if hours < HOURS_PER_WEEK {
        Tier::High
    } else if hours < HOURS_PER_MONTH {
        Tier::Medium
    } else {
        Tier::Low
    }
}

fn restore_time_tier(hours: f64) -> Tier {
    if hours < 1.0 {
        Tier::Elite
    } else if hours < HOURS_PER_DAY {
        Tier::High
    } else if hours < HOURS_PER_WEEK {
        Tier::Medium
    } else {
        Tier::Low
    }
}

fn failure_rate_tier(percent: f64) -> Tier {
    if percent <= 15.0 {
        Tier::Elite
    } else if percent <= 30.0 {
        Tier::High
    } else if percent <= 45.0 {
        Tier::Medium
    } else {
        Tier::Low
    }
}
