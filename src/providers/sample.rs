use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::Result;
use crate::models::{EventKind, EventStatus, Platform, RawEvent};
use crate::providers::Provider;

/// Days of history the sample generator covers.
const SAMPLE_DAYS: i64 = 400;
const SAMPLE_RESOURCE_GROUP: &str = "sample-production";

/// Deterministic demo events that never touch the network.
pub struct SampleProvider {
    platform: Platform,
}

impl SampleProvider {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Fixed instant every sample window ends at.
    pub fn reference_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }

    fn event(
        &self,
        kind: EventKind,
        timestamp: DateTime<Utc>,
        status: EventStatus,
        correlation_id: String,
    ) -> RawEvent {
        RawEvent {
            kind,
            timestamp,
            status,
            platform: self.platform,
            correlation_id,
            resource_group: (kind != EventKind::Commit).then(|| SAMPLE_RESOURCE_GROUP.to_string()),
        }
    }

    fn deployed_at(day: i64) -> DateTime<Utc> {
        Self::reference_time() - Duration::days(day) - Duration::hours(6)
    }
}

#[async_trait]
impl Provider for SampleProvider {
    fn platform(&self) -> Platform {
        self.platform
    }

    /// One deployment a day. Every eighth one fails and is fixed forward
    /// half an hour later.
    async fn fetch_deployments(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        let mut events = Vec::new();
        for day in (0..SAMPLE_DAYS).rev() {
            let deployed_at = Self::deployed_at(day);
            if deployed_at < since {
                continue;
            }
            let sha = format!("sample-{day:03}");

            if day % 8 == 5 {
                events.push(self.event(
                    EventKind::Deployment,
                    deployed_at,
                    EventStatus::Failure,
                    sha.clone(),
                ));
                events.push(self.event(
                    EventKind::Deployment,
                    deployed_at + Duration::minutes(30),
                    EventStatus::Success,
                    format!("{sha}-fix"),
                ));
            } else {
                events.push(self.event(
                    EventKind::Deployment,
                    deployed_at,
                    EventStatus::Success,
                    sha,
                ));
            }
        }
        Ok(events)
    }

    /// Each deployed change was committed between two and six hours earlier.
    async fn fetch_commits(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        Ok((0..SAMPLE_DAYS)
            .rev()
            .map(|day| (day, Self::deployed_at(day) - Duration::hours(2 + day % 5)))
            .filter(|(_, committed_at)| *committed_at >= since)
            .map(|(day, committed_at)| {
                self.event(
                    EventKind::Commit,
                    committed_at,
                    EventStatus::Success,
                    format!("sample-{day:03}"),
                )
            })
            .collect())
    }

    /// An incident every ten days, resolved 45 minutes later.
    async fn fetch_incidents(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        let mut events = Vec::new();
        for day in (0..SAMPLE_DAYS).rev().filter(|day| day % 10 == 7) {
            let opened_at = Self::reference_time() - Duration::days(day) - Duration::hours(3);
            if opened_at < since {
                continue;
            }
            let id = format!("sample-incident-{day:03}");
            events.push(self.event(
                EventKind::Incident,
                opened_at,
                EventStatus::Failure,
                id.clone(),
            ));
            events.push(self.event(
                EventKind::Incident,
                opened_at + Duration::minutes(45),
                EventStatus::Success,
                id,
            ));
        }
        Ok(events)
    }
}
