use chrono::{DateTime, Utc};
use futures::future::{join_all, try_join_all};
use log::{debug, info, warn};

use crate::cache::{CacheKey, MetricCache};
use crate::config::ServiceConfig;
use crate::error::{DoraError, Result};
use crate::insights::{DoraSummary, MetricKind, MetricResult, ProcessingResult, ProjectSummary};
use crate::logs::{LogRecorder, RunOutcome};
use crate::metrics::{aggregate, classify, Window};
use crate::models::{Platform, ProjectLog, ProjectRef, ProjectSettings};
use crate::overrides::{override_key, ChangeFailureRateOverride, OverrideStore};
use crate::providers::sample::SampleProvider;
use crate::providers::{Provider, ProviderFactory};
use crate::settings::SettingsStore;

const PROJECT_NOT_FOUND: &str = "Project not found";

#[derive(Debug, Clone)]
pub struct MetricRequest {
    pub kind: MetricKind,
    pub project: ProjectRef,
    pub window_days: u32,
    pub max_items: usize,
    pub use_cache: bool,
    pub sample_data: bool,
    pub is_project_view: bool,
}

/// The operations exposed to callers: settings, metrics, overrides and logs.
pub struct DoraService<F: ProviderFactory> {
    config: ServiceConfig,
    settings: SettingsStore,
    cache: MetricCache,
    logs: LogRecorder,
    overrides: OverrideStore,
    providers: F,
}

impl<F: ProviderFactory> DoraService<F> {
    pub async fn open(config: ServiceConfig, providers: F) -> Result<Self> {
        let settings = SettingsStore::open(config.settings_path()).await?;
        let overrides = OverrideStore::open(config.overrides_path()).await?;
        let logs = LogRecorder::new(config.logs_path());

        let cache = MetricCache::new(config.cache_capacity);
        cache.load(&config.cache_path(), config.cache_ttl).await?;

        Ok(Self {
            config,
            settings,
            cache,
            logs,
            overrides,
            providers,
        })
    }

    /// Write the cache snapshot so the next process starts warm.
    pub async fn persist_cache(&self) -> Result<()> {
        self.cache.save(&self.config.cache_path()).await
    }

    pub async fn get_settings(&self, platform: Platform) -> Vec<ProjectSettings> {
        self.settings.get_settings(platform).await
    }

    /// Settings for the project stored under a partition key.
    pub async fn find_project(&self, key: &str) -> Option<ProjectSettings> {
        self.settings.find(key).await
    }

    pub async fn update_setting(&self, settings: ProjectSettings) -> Result<()> {
        let key = settings.key();
        self.settings.upsert_setting(settings).await?;

        let dropped = self.cache.invalidate_project(&key).await;
        if dropped > 0 {
            debug!("Dropped {dropped} cached metrics for {key}");
        }
        Ok(())
    }

    /// One metric for one project; `None` when the project is not configured.
    pub async fn get_metric(&self, request: &MetricRequest) -> Result<Option<MetricResult>> {
        validate_request(request.window_days, request.max_items)?;

        let key = request.project.partition_key();
        let Some(settings) = self.settings.find(&key).await else {
            debug!("No settings for {key}");
            return Ok(None);
        };

        let mut result = if request.sample_data {
            let provider = SampleProvider::new(settings.platform());
            let window = Window::trailing(request.window_days, SampleProvider::reference_time());
            self.compute(&provider, &settings, request.kind, window)
                .await?
        } else {
            let mut result = self
                .cached_metric(&settings, request.kind, request.window_days, request.use_cache, true)
                .await?;
            self.apply_override(&settings, &mut result).await;
            result
        };

        result.item_order = settings.item_order;
        result.is_project_view = request.is_project_view;
        result.truncate_samples(request.max_items);
        Ok(Some(result))
    }

    /// All four metrics for one project.
    pub async fn get_project_metrics(
        &self,
        project: &ProjectRef,
        window_days: u32,
        max_items: usize,
        use_cache: bool,
        sample_data: bool,
    ) -> Result<Option<Vec<MetricResult>>> {
        self.project_metrics(project, window_days, max_items, use_cache, sample_data, true)
            .await
    }

    async fn project_metrics(
        &self,
        project: &ProjectRef,
        window_days: u32,
        max_items: usize,
        use_cache: bool,
        sample_data: bool,
        is_project_view: bool,
    ) -> Result<Option<Vec<MetricResult>>> {
        let requests = MetricKind::ALL.map(|kind| MetricRequest {
            kind,
            project: project.clone(),
            window_days,
            max_items,
            use_cache,
            sample_data,
            is_project_view,
        });

        let results = try_join_all(requests.iter().map(|r| self.get_metric(r))).await?;
        Ok(results.into_iter().collect())
    }

    /// Every visible project on both platforms, computed concurrently.
    ///
    /// A project that fails carries its error; the others are unaffected.
    pub async fn get_summary(
        &self,
        window_days: u32,
        max_items: usize,
        use_cache: bool,
        sample_data: bool,
    ) -> Result<DoraSummary> {
        validate_request(window_days, max_items)?;

        let visible: Vec<ProjectSettings> = self
            .settings
            .all()
            .await
            .into_iter()
            .filter(|s| s.show_setting)
            .collect();
        info!("Computing summary for {} projects", visible.len());

        let projects = join_all(visible.iter().map(|settings| async move {
            let outcome = self
                .project_metrics(
                    &settings.project,
                    window_days,
                    max_items,
                    use_cache,
                    sample_data,
                    false,
                )
                .await;

            let (metrics, error) = match outcome {
                Ok(Some(metrics)) => (metrics, None),
                Ok(None) => (Vec::new(), Some(PROJECT_NOT_FOUND.to_string())),
                Err(e) => {
                    warn!("Failed to compute metrics for {}: {e}", settings.key());
                    (Vec::new(), Some(e.to_string()))
                }
            };

            ProjectSummary {
                project: settings.project.clone(),
                item_order: settings.item_order,
                metrics,
                error,
            }
        }))
        .await;

        Ok(DoraSummary {
            collected_at: Utc::now(),
            window_days,
            total_projects: projects.len(),
            failed_projects: projects.iter().filter(|p| p.error.is_some()).count(),
            projects,
        })
    }

    pub async fn update_change_failure_rate(
        &self,
        organization_or_owner: &str,
        project_or_repo: &str,
        build_or_workflow_name: &str,
        percent: u8,
        window_days: u32,
    ) -> Result<ChangeFailureRateOverride> {
        let entry = ChangeFailureRateOverride {
            organization_or_owner: organization_or_owner.to_string(),
            project_or_repo: project_or_repo.to_string(),
            build_or_workflow_name: build_or_workflow_name.to_string(),
            percent,
            window_days,
            set_at: Utc::now(),
        };

        self.overrides.set(entry.clone()).await?;
        Ok(entry)
    }

    pub async fn get_project_logs(&self, project: &ProjectRef) -> Result<Vec<ProjectLog>> {
        self.logs.list_logs(&project.partition_key()).await
    }

    /// Recompute all four metrics from upstream and record one log entry.
    pub async fn run_summary_update(
        &self,
        project: &ProjectRef,
        window_days: u32,
        max_items: usize,
    ) -> Result<ProcessingResult> {
        validate_request(window_days, max_items)?;

        let key = project.partition_key();
        let Some(settings) = self.settings.find(&key).await else {
            warn!("Refresh requested for unknown project {key}");
            return Ok(ProcessingResult {
                status: false,
                message: PROJECT_NOT_FOUND.to_string(),
                duration_seconds: 0.0,
            });
        };

        let started = Utc::now();
        let outcomes = join_all(
            MetricKind::ALL
                .map(|kind| self.cached_metric(&settings, kind, window_days, false, false)),
        )
        .await;
        let ended = Utc::now();

        let failures: Vec<String> = MetricKind::ALL
            .iter()
            .zip(&outcomes)
            .filter_map(|(kind, outcome)| outcome.as_ref().err().map(|e| format!("{kind}: {e}")))
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let secs = (ended - started).num_milliseconds().max(0) as f64 / 1000.0;
        let outcome = if failures.is_empty() {
            RunOutcome::Succeeded(format!(
                "Successfully refreshed {} in {secs:.2} seconds",
                project.describe()
            ))
        } else {
            RunOutcome::Failed(format!(
                "Failed to refresh {}: {}",
                project.describe(),
                failures.join("; ")
            ))
        };

        let log = self.logs.record_run(&key, started, ended, outcome).await?;
        info!("{}", log.message);

        Ok(ProcessingResult {
            status: log.success,
            message: log.message,
            duration_seconds: log.duration_seconds,
        })
    }

    async fn cached_metric(
        &self,
        settings: &ProjectSettings,
        kind: MetricKind,
        window_days: u32,
        use_cache: bool,
        record_run: bool,
    ) -> Result<MetricResult> {
        let key = CacheKey {
            project_key: settings.key(),
            kind,
            window_days,
        };

        self.cache
            .get_or_compute(&key, self.config.cache_ttl, use_cache, || async {
                let started = Utc::now();
                let outcome = self.compute_live(settings, kind, window_days).await;
                if record_run {
                    self.record(settings, kind, started, &outcome).await;
                }
                outcome
            })
            .await
    }

    async fn compute_live(
        &self,
        settings: &ProjectSettings,
        kind: MetricKind,
        window_days: u32,
    ) -> Result<MetricResult> {
        let provider = self.providers.provider(settings)?;
        let window = Window::trailing(window_days, Utc::now());
        self.compute(provider.as_ref(), settings, kind, window).await
    }

    async fn compute(
        &self,
        provider: &dyn Provider,
        settings: &ProjectSettings,
        kind: MetricKind,
        window: Window,
    ) -> Result<MetricResult> {
        let events = tokio::time::timeout(
            self.config.fetch_timeout,
            provider.fetch_events(&window, kind),
        )
        .await
        .map_err(|_| {
            DoraError::UpstreamUnavailable(format!(
                "fetching {} events for {} timed out after {:?}",
                provider.platform(),
                settings.key(),
                self.config.fetch_timeout
            ))
        })??;

        let measurement = aggregate(kind, &events, &window);
        debug!(
            "{kind} for {} over {} days: {:.2} ({:?})",
            settings.key(),
            window.days,
            measurement.value,
            measurement.tier
        );

        Ok(MetricResult {
            kind,
            project_key: settings.key(),
            value: measurement.value,
            unit: kind.unit(),
            tier: measurement.tier,
            window_days: window.days,
            computed_at: Utc::now(),
            item_order: settings.item_order,
            is_project_view: false,
            event_count: measurement.event_count,
            overridden: false,
            samples: measurement.samples,
        })
    }

    async fn apply_override(&self, settings: &ProjectSettings, result: &mut MetricResult) {
        if result.kind != MetricKind::ChangeFailureRate {
            return;
        }

        let key = override_key(
            &settings.project.organization_or_owner,
            &settings.project.project_or_repo,
            &settings.build_or_workflow_name,
        );
        if let Some(active) = self.overrides.active(&key, Utc::now()).await {
            debug!("Using change failure rate override for {key}");
            result.value = f64::from(active.percent);
            result.tier = classify(MetricKind::ChangeFailureRate, result.value, true);
            result.overridden = true;
        }
    }

    async fn record(
        &self,
        settings: &ProjectSettings,
        kind: MetricKind,
        started: DateTime<Utc>,
        outcome: &Result<MetricResult>,
    ) {
        let outcome = match outcome {
            Ok(result) => RunOutcome::Succeeded(format!(
                "Computed {kind} for {} from {} events",
                settings.project.describe(),
                result.event_count
            )),
            Err(e) => RunOutcome::Failed(format!(
                "Failed to compute {kind} for {}: {e}",
                settings.project.describe()
            )),
        };

        if let Err(e) = self
            .logs
            .record_run(&settings.key(), started, Utc::now(), outcome)
            .await
        {
            warn!("Failed to record run for {}: {e}", settings.key());
        }
    }
}

fn validate_request(window_days: u32, max_items: usize) -> Result<()> {
    if window_days == 0 {
        return Err(DoraError::Validation(
            "window must be at least one day".into(),
        ));
    }
    if max_items == 0 {
        return Err(DoraError::Validation(
            "max items must be at least one".into(),
        ));
    }
    Ok(())
}
