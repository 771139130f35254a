use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use serde::Serialize;
use std::path::PathBuf;

use crate::auth::CredentialRef;
use crate::config::{ConfigArgs, ServiceConfig};
use crate::insights::MetricKind;
use crate::models::{Platform, ProjectRef, ProjectSettings};
use crate::providers::LiveProviders;
use crate::service::{DoraService, MetricRequest};

#[derive(Parser)]
#[command(name = "dorametrics")]
#[command(author, version, about = "DORA metrics for Azure DevOps and GitHub", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output file path (defaults to stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Pretty print JSON output
    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    /// Serve deterministic sample data instead of calling upstream
    #[arg(long, global = true, default_value_t = false)]
    sample: bool,

    /// Ignore cached metrics and recompute
    #[arg(long, global = true, default_value_t = false)]
    no_cache: bool,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args, Clone, Copy)]
struct WindowArgs {
    /// Trailing window in days
    #[arg(short, long, default_value_t = 30)]
    days: u32,

    /// Maximum number of samples per metric
    #[arg(short, long, default_value_t = 100)]
    max_items: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage monitored projects
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
    /// Compute one metric for one project
    Metric {
        kind: KindArg,

        /// Project key as listed by `settings list` (`org_project_repo` or `owner_repo`)
        #[arg(short = 'P', long)]
        project: String,

        #[command(flatten)]
        window: WindowArgs,
    },
    /// Compute all four metrics for one project
    Project {
        #[arg(short = 'P', long)]
        project: String,

        #[command(flatten)]
        window: WindowArgs,
    },
    /// Compute all metrics for every visible project
    Summary {
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Recompute a project's metrics from upstream and log the run
    Refresh {
        #[arg(short = 'P', long)]
        project: String,

        #[command(flatten)]
        window: WindowArgs,
    },
    /// Pin a project's change failure rate for a number of days
    OverrideCfr {
        #[arg(short = 'P', long)]
        project: String,

        /// Change failure rate in percent (0-100)
        #[arg(long)]
        percent: u8,

        /// Days the override stays in effect
        #[arg(short, long, default_value_t = 30)]
        days: u32,
    },
    /// Show a project's processing history, most recent first
    Logs {
        #[arg(short = 'P', long)]
        project: String,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// List configured projects
    List {
        /// Only list projects on this platform
        #[arg(long)]
        platform: Option<PlatformArg>,
    },
    /// Add or update an Azure DevOps project
    AddAzure {
        #[arg(long)]
        organization: String,

        #[arg(long)]
        project: String,

        #[arg(long)]
        repository: String,

        /// Build definition name
        #[arg(long)]
        build: String,

        /// Build definition id; preferred over the name when set
        #[arg(long, default_value = "")]
        build_id: String,

        #[command(flatten)]
        common: CommonSettings,

        /// Environment variable holding the personal access token
        #[arg(long, default_value = "AZURE_DEVOPS_PAT")]
        credential: String,
    },
    /// Add or update a GitHub repository
    AddGithub {
        #[arg(long)]
        owner: String,

        #[arg(long)]
        repo: String,

        /// Workflow file name (e.g. deploy.yml)
        #[arg(long)]
        workflow: String,

        /// Workflow id; preferred over the name when set
        #[arg(long, default_value = "")]
        workflow_id: String,

        #[command(flatten)]
        common: CommonSettings,

        /// Environment variable holding the token (empty for public repos)
        #[arg(long, default_value = "GITHUB_TOKEN")]
        credential: String,
    },
}

#[derive(Args)]
struct CommonSettings {
    #[arg(long, default_value = "main")]
    branch: String,

    /// Resource group production incidents are attributed to
    #[arg(long, default_value = "")]
    resource_group: String,

    /// Display order in listings and summaries
    #[arg(long, default_value_t = 0)]
    item_order: i32,

    /// Leave the project out of summaries
    #[arg(long, default_value_t = false)]
    hidden: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    DeploymentFrequency,
    LeadTime,
    Mttr,
    ChangeFailureRate,
}

impl From<KindArg> for MetricKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::DeploymentFrequency => MetricKind::DeploymentFrequency,
            KindArg::LeadTime => MetricKind::LeadTimeForChanges,
            KindArg::Mttr => MetricKind::MeanTimeToRestore,
            KindArg::ChangeFailureRate => MetricKind::ChangeFailureRate,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    Azure,
    Github,
}

impl From<PlatformArg> for Platform {
    fn from(platform: PlatformArg) -> Self {
        match platform {
            PlatformArg::Azure => Platform::AzureDevOps,
            PlatformArg::Github => Platform::GitHub,
        }
    }
}

impl CommonSettings {
    fn to_settings(
        &self,
        project: ProjectRef,
        build_or_workflow_name: &str,
        build_or_workflow_id: &str,
        credential: &str,
    ) -> ProjectSettings {
        ProjectSettings {
            project,
            branch: self.branch.clone(),
            build_or_workflow_name: build_or_workflow_name.to_string(),
            build_or_workflow_id: build_or_workflow_id.to_string(),
            production_resource_group: self.resource_group.clone(),
            credential: CredentialRef::new(credential),
            item_order: self.item_order,
            show_setting: !self.hidden,
        }
    }
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let config = ServiceConfig::try_from(&self.config)?;
        let providers = LiveProviders::new(&config)?;
        let service = DoraService::open(config, providers).await?;

        self.run(&service).await?;
        service.persist_cache().await?;
        Ok(())
    }

    async fn run(&self, service: &DoraService<LiveProviders>) -> Result<()> {
        let use_cache = !self.no_cache;

        match &self.command {
            Commands::Settings { action } => self.run_settings(service, action).await?,
            Commands::Metric {
                kind,
                project,
                window,
            } => {
                let request = MetricRequest {
                    kind: (*kind).into(),
                    project: resolve(service, project).await?.project,
                    window_days: window.days,
                    max_items: window.max_items,
                    use_cache,
                    sample_data: self.sample,
                    is_project_view: false,
                };
                let result = service
                    .get_metric(&request)
                    .await?
                    .ok_or_else(|| not_configured(project))?;
                self.emit(&result)?;
            }
            Commands::Project { project, window } => {
                let project = resolve(service, project).await?.project;
                let metrics = service
                    .get_project_metrics(
                        &project,
                        window.days,
                        window.max_items,
                        use_cache,
                        self.sample,
                    )
                    .await?
                    .ok_or_else(|| not_configured(&project.partition_key()))?;
                self.emit(&metrics)?;
            }
            Commands::Summary { window } => {
                let summary = service
                    .get_summary(window.days, window.max_items, use_cache, self.sample)
                    .await?;
                info!(
                    "Summary covers {} projects ({} failed)",
                    summary.total_projects, summary.failed_projects
                );
                self.emit(&summary)?;
            }
            Commands::Refresh { project, window } => {
                let project = resolve(service, project).await?.project;
                let result = service
                    .run_summary_update(&project, window.days, window.max_items)
                    .await?;
                self.emit(&result)?;
            }
            Commands::OverrideCfr {
                project,
                percent,
                days,
            } => {
                let settings = resolve(service, project).await?;
                let entry = service
                    .update_change_failure_rate(
                        &settings.project.organization_or_owner,
                        &settings.project.project_or_repo,
                        &settings.build_or_workflow_name,
                        *percent,
                        *days,
                    )
                    .await?;
                self.emit(&entry)?;
            }
            Commands::Logs { project } => {
                let project = resolve(service, project).await?.project;
                let logs = service.get_project_logs(&project).await?;
                self.emit(&logs)?;
            }
        }

        Ok(())
    }

    async fn run_settings(
        &self,
        service: &DoraService<LiveProviders>,
        action: &SettingsCommand,
    ) -> Result<()> {
        let settings = match action {
            SettingsCommand::List { platform } => {
                let platforms = match platform {
                    Some(p) => vec![Platform::from(*p)],
                    None => vec![Platform::AzureDevOps, Platform::GitHub],
                };
                let mut settings = Vec::new();
                for platform in platforms {
                    settings.extend(service.get_settings(platform).await);
                }
                return self.emit(&settings);
            }
            SettingsCommand::AddAzure {
                organization,
                project,
                repository,
                build,
                build_id,
                common,
                credential,
            } => common.to_settings(
                ProjectRef::azure(organization, project, repository),
                build,
                build_id,
                credential,
            ),
            SettingsCommand::AddGithub {
                owner,
                repo,
                workflow,
                workflow_id,
                common,
                credential,
            } => common.to_settings(
                ProjectRef::github(owner, repo),
                workflow,
                workflow_id,
                credential,
            ),
        };

        service.update_setting(settings.clone()).await?;
        info!("Saved settings for {}", settings.key());
        self.emit(&settings)
    }

    fn emit<T: Serialize>(&self, value: &T) -> Result<()> {
        let json_output = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, json_output)
                .with_context(|| format!("Failed to write {}", output_path.display()))?;
            info!("Output written to: {}", output_path.display());
        } else {
            println!("{json_output}");
        }

        Ok(())
    }
}

async fn resolve(service: &DoraService<LiveProviders>, key: &str) -> Result<ProjectSettings> {
    service
        .find_project(key)
        .await
        .ok_or_else(|| not_configured(key))
}

fn not_configured(key: &str) -> anyhow::Error {
    anyhow!("Project {key} is not configured; see `dorametrics settings list`")
}
