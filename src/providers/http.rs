use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use log::{debug, warn};
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_retry::strategy::ExponentialBackoff;
use url::Url;

use crate::auth::Token;
use crate::config::UpstreamConfig;
use crate::error::{DoraError, Result};
use crate::models::Platform;

pub enum Auth {
    Anonymous,
    Bearer(Token),
    /// Azure DevOps PATs go in the password half of basic auth.
    Basic(Token),
}

#[derive(Debug)]
pub struct Page<T> {
    pub body: T,
    pub headers: HeaderMap,
}

enum Attempt {
    Retry {
        reason: String,
        wait: Option<Duration>,
    },
    Fatal(DoraError),
}

/// HTTP access to one upstream platform.
///
/// Shared by every project on that platform so the rate limit and the
/// concurrency bound apply platform-wide.
pub struct UpstreamClient {
    client: Client,
    platform: Platform,
    limiter: DefaultDirectRateLimiter,
    permits: Semaphore,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(platform: Platform, config: UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("dorametrics/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DoraError::Config(format!("Failed to create HTTP client: {e}")))?;

        let quota = Quota::per_second(config.requests_per_second).allow_burst(config.burst);

        Ok(Self {
            client,
            platform,
            limiter: RateLimiter::direct(quota),
            permits: Semaphore::new(config.max_concurrent_requests),
            config,
        })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// GET a JSON document, retrying transient failures with exponential backoff.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url, auth: &Auth) -> Result<Page<T>> {
        let mut delays = self.backoff();
        let mut attempt = 1;

        loop {
            match self.send_once(url, auth).await {
                Ok(page) => return Ok(page),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retry { reason, wait }) => {
                    let Some(backoff) = delays.next() else {
                        return Err(DoraError::UpstreamUnavailable(format!(
                            "{} request to {} failed after {attempt} attempts: {reason}",
                            self.platform,
                            url.path()
                        )));
                    };

                    let delay = wait.unwrap_or(backoff).min(self.config.retry_max_delay);
                    warn!(
                        "{} request to {} failed ({reason}), retrying in {delay:?}",
                        self.platform,
                        url.path()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Delays between attempts: the base delay, doubling, capped, one per retry.
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        let base_ms = u64::try_from(self.config.retry_base_delay.as_millis()).unwrap_or(u64::MAX);
        ExponentialBackoff::from_millis(2)
            .factor(base_ms / 2)
            .max_delay(self.config.retry_max_delay)
            .take(self.config.max_attempts.saturating_sub(1) as usize)
    }

    fn authorize(request: RequestBuilder, auth: &Auth) -> RequestBuilder {
        match auth {
            Auth::Anonymous => request,
            Auth::Bearer(token) => request.bearer_auth(token.as_str()),
            Auth::Basic(token) => request.basic_auth("", Some(token.as_str())),
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        url: &Url,
        auth: &Auth,
    ) -> std::result::Result<Page<T>, Attempt> {
        let _permit = self.permits.acquire().await.map_err(|_| {
            Attempt::Fatal(DoraError::UpstreamUnavailable(format!(
                "{} client is shut down",
                self.platform
            )))
        })?;
        self.limiter.until_ready().await;

        debug!("GET {url}");
        let request = Self::authorize(self.client.get(url.clone()), auth)
            .header(reqwest::header::ACCEPT, "application/json");

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let err = DoraError::from(e);
                return Err(if err.is_transient() {
                    Attempt::Retry {
                        reason: err.to_string(),
                        wait: None,
                    }
                } else {
                    Attempt::Fatal(err)
                });
            }
        };

        let status = response.status();
        // Azure DevOps answers a rejected PAT with a 203 sign-in page.
        if status.is_success() && status != StatusCode::NON_AUTHORITATIVE_INFORMATION {
            let headers = response.headers().clone();
            let body = response
                .json::<T>()
                .await
                .map_err(|e| Attempt::Fatal(e.into()))?;
            return Ok(Page { body, headers });
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify(self.platform, status, &headers, &body))
    }
}

fn classify(platform: Platform, status: StatusCode, headers: &HeaderMap, body: &str) -> Attempt {
    let wait = retry_after(headers);

    match status.as_u16() {
        401 | 203 => Attempt::Fatal(DoraError::Authentication(format!(
            "{platform} rejected the configured credential"
        ))),
        403 if wait.is_some()
            || header_str(headers, "x-ratelimit-remaining") == Some("0")
            || body.to_lowercase().contains("rate limit") =>
        {
            Attempt::Retry {
                reason: format!("rate limited ({status})"),
                wait,
            }
        }
        403 => Attempt::Fatal(DoraError::Authentication(format!(
            "{platform} denied access: {}",
            body.trim()
        ))),
        404 => Attempt::Fatal(DoraError::NotFound(format!(
            "{platform} resource not found"
        ))),
        408 | 429 | 500..=599 => Attempt::Retry {
            reason: status.to_string(),
            wait,
        },
        _ => Attempt::Fatal(DoraError::Validation(format!(
            "{platform} rejected the request with {status}: {}",
            body.trim()
        ))),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `Retry-After` seconds, or the time until `x-ratelimit-reset` when exhausted.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = header_str(headers, "retry-after").and_then(|v| v.trim().parse().ok()) {
        return Some(Duration::from_secs(secs));
    }

    if header_str(headers, "x-ratelimit-remaining") == Some("0") {
        let reset: i64 = header_str(headers, "x-ratelimit-reset")?.trim().parse().ok()?;
        let secs = (reset - Utc::now().timestamp()).max(0);
        return u64::try_from(secs).ok().map(Duration::from_secs);
    }

    None
}
