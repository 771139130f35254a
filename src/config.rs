use clap::Args;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DoraError, Result};

pub const GITHUB_API_URL: &str = "https://api.github.com";
pub const AZURE_DEVOPS_URL: &str = "https://dev.azure.com";

/// Service knobs; every flag falls back to a `DORA_*` environment variable.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Directory holding settings, overrides, logs and the cache snapshot
    #[arg(long, global = true, env = "DORA_DATA_DIR", default_value = ".dorametrics")]
    pub data_dir: PathBuf,

    /// How long a cached metric stays fresh, in seconds
    #[arg(long, global = true, env = "DORA_CACHE_TTL_SECS", default_value_t = 4 * 60 * 60)]
    pub cache_ttl_secs: u64,

    /// Upper bound on one project's upstream fetch, in seconds
    #[arg(long, global = true, env = "DORA_FETCH_TIMEOUT_SECS", default_value_t = 60)]
    pub fetch_timeout_secs: u64,

    /// Attempts per upstream request before giving up
    #[arg(long, global = true, env = "DORA_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    /// First retry delay in milliseconds; doubles on each attempt
    #[arg(long, global = true, env = "DORA_RETRY_BASE_MS", default_value_t = 500)]
    pub retry_base_ms: u64,

    /// Sustained upstream request rate per platform
    #[arg(long, global = true, env = "DORA_REQUESTS_PER_SECOND", default_value_t = 5)]
    pub requests_per_second: u32,

    /// Concurrent upstream requests per platform
    #[arg(long, global = true, env = "DORA_MAX_CONCURRENT_REQUESTS", default_value_t = 4)]
    pub max_concurrent_requests: usize,

    /// GitHub REST API base URL
    #[arg(long, global = true, env = "DORA_GITHUB_API_URL", default_value = GITHUB_API_URL)]
    pub github_api_url: String,

    /// Azure DevOps base URL
    #[arg(long, global = true, env = "DORA_AZURE_DEVOPS_URL", default_value = AZURE_DEVOPS_URL)]
    pub azure_devops_url: String,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub requests_per_second: NonZeroU32,
    pub burst: NonZeroU32,
    pub max_concurrent_requests: usize,
    pub max_pages: u32,
    pub page_size: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            requests_per_second: NonZeroU32::MIN.saturating_add(4),
            burst: NonZeroU32::MIN.saturating_add(9),
            max_concurrent_requests: 4,
            max_pages: 10,
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    pub fetch_timeout: Duration,
    pub github_api_url: String,
    pub azure_devops_url: String,
    pub upstream: UpstreamConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".dorametrics"),
            cache_ttl: Duration::from_secs(4 * 60 * 60),
            cache_capacity: 10_000,
            fetch_timeout: Duration::from_secs(60),
            github_api_url: GITHUB_API_URL.to_string(),
            azure_devops_url: AZURE_DEVOPS_URL.to_string(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn overrides_path(&self) -> PathBuf {
        self.data_dir.join("overrides.json")
    }

    pub fn logs_path(&self) -> PathBuf {
        self.data_dir.join("logs.jsonl")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("cache.json")
    }
}

impl TryFrom<&ConfigArgs> for ServiceConfig {
    type Error = DoraError;

    fn try_from(args: &ConfigArgs) -> Result<Self> {
        if args.max_attempts == 0 {
            return Err(DoraError::Config("max attempts must be at least 1".into()));
        }
        if args.max_concurrent_requests == 0 {
            return Err(DoraError::Config(
                "max concurrent requests must be at least 1".into(),
            ));
        }
        if args.fetch_timeout_secs == 0 {
            return Err(DoraError::Config("fetch timeout must be positive".into()));
        }

        let requests_per_second = NonZeroU32::new(args.requests_per_second)
            .ok_or_else(|| DoraError::Config("requests per second must be positive".into()))?;

        for url in [&args.github_api_url, &args.azure_devops_url] {
            url::Url::parse(url)
                .map_err(|e| DoraError::Config(format!("Invalid base URL '{url}': {e}")))?;
        }

        let defaults = UpstreamConfig::default();

        Ok(Self {
            data_dir: args.data_dir.clone(),
            cache_ttl: Duration::from_secs(args.cache_ttl_secs),
            fetch_timeout: Duration::from_secs(args.fetch_timeout_secs),
            github_api_url: args.github_api_url.clone(),
            azure_devops_url: args.azure_devops_url.clone(),
            upstream: UpstreamConfig {
                max_attempts: args.max_attempts,
                retry_base_delay: Duration::from_millis(args.retry_base_ms),
                requests_per_second,
                burst: requests_per_second.saturating_mul(NonZeroU32::MIN.saturating_add(1)),
                max_concurrent_requests: args.max_concurrent_requests,
                ..defaults
            },
            ..Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ConfigArgs {
        ConfigArgs {
            data_dir: PathBuf::from("/tmp/dora"),
            cache_ttl_secs: 60,
            fetch_timeout_secs: 5,
            max_attempts: 3,
            retry_base_ms: 10,
            requests_per_second: 2,
            max_concurrent_requests: 1,
            github_api_url: GITHUB_API_URL.to_string(),
            azure_devops_url: AZURE_DEVOPS_URL.to_string(),
        }
    }

    #[test]
    fn test_args_convert_to_service_config() {
        let config = ServiceConfig::try_from(&args()).unwrap();

        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.upstream.retry_base_delay, Duration::from_millis(10));
        assert_eq!(config.upstream.requests_per_second.get(), 2);
        assert_eq!(config.settings_path(), PathBuf::from("/tmp/dora/settings.json"));
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let mut invalid = args();
        invalid.requests_per_second = 0;

        let err = ServiceConfig::try_from(&invalid).unwrap_err();

        assert!(matches!(err, DoraError::Config(_)));
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let mut invalid = args();
        invalid.github_api_url = "not a url".to_string();

        assert!(ServiceConfig::try_from(&invalid).is_err());
    }

    #[test]
    fn test_default_ttl_is_four_hours() {
        assert_eq!(ServiceConfig::default().cache_ttl.as_secs(), 14_400);
    }
}
