use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::error::Result;
use crate::insights::{MetricKind, MetricResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub project_key: String,
    pub kind: MetricKind,
    pub window_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: MetricResult,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(ttl).is_ok_and(|ttl| now - self.cached_at <= ttl)
    }
}

type InFlight = Arc<tokio::sync::Mutex<()>>;

/// One caller's claim on a key. Dropping it unlocks the key and releases the
/// marker, also when the caller's future is cancelled mid-computation.
struct Flight<'a> {
    cache: &'a MetricCache,
    key: &'a CacheKey,
    marker: InFlight,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        // The guard holds its own reference to the marker.
        self.guard.take();
        self.cache.release(self.key, &self.marker);
    }
}

/// Memoizes metric results with single-flight computation per key.
pub struct MetricCache {
    entries: Cache<CacheKey, CacheEntry>,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
}

impl MetricCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Return a fresh cached result or compute, store and return a new one.
    ///
    /// At most one computation per key runs at a time. Callers queued behind an
    /// in-flight computation receive its result when `use_cache` is set; with
    /// `use_cache` unset every call computes exactly once.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        use_cache: bool,
        compute: F,
    ) -> Result<MetricResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<MetricResult>>,
    {
        if use_cache {
            if let Some(result) = self.fresh(key, ttl).await {
                debug!("Cache hit for {key:?}");
                return Ok(result);
            }
        }

        let mut flight = Flight {
            cache: self,
            key,
            marker: self.marker(key),
            guard: None,
        };
        flight.guard = Some(Arc::clone(&flight.marker).lock_owned().await);

        if use_cache {
            if let Some(result) = self.fresh(key, ttl).await {
                debug!("Joined in-flight computation for {key:?}");
                return Ok(result);
            }
        }

        debug!("Computing {key:?}");
        let outcome = compute().await;

        if let Ok(result) = &outcome {
            let entry = CacheEntry {
                result: result.clone(),
                cached_at: Utc::now(),
            };
            self.entries.insert(key.clone(), entry).await;
        }

        outcome
    }

    #[cfg(test)]
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).await
    }

    /// Drop every cached metric of one project, for all kinds and windows.
    pub async fn invalidate_project(&self, project_key: &str) -> usize {
        let stale: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, _)| key.project_key == project_key)
            .map(|(key, _)| key.as_ref().clone())
            .collect();

        for key in &stale {
            self.entries.invalidate(key).await;
        }
        stale.len()
    }

    async fn fresh(&self, key: &CacheKey, ttl: Duration) -> Option<MetricResult> {
        self.entries
            .get(key)
            .await
            .filter(|entry| entry.is_fresh(ttl, Utc::now()))
            .map(|entry| entry.result)
    }

    fn marker(&self, key: &CacheKey) -> InFlight {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(in_flight.entry(key.clone()).or_default())
    }

    /// Drop the marker once no other caller holds or awaits it.
    fn release(&self, key: &CacheKey, marker: &InFlight) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference lives in the map and one is ours.
        if Arc::strong_count(marker) <= 2 {
            in_flight.remove(key);
        }
    }

    /// Load a snapshot written by [`MetricCache::save`]; stale entries are skipped.
    pub async fn load(&self, path: &Path, ttl: Duration) -> Result<usize> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let snapshot: Vec<(CacheKey, CacheEntry)> = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring unreadable cache snapshot {}: {e}", path.display());
                return Ok(0);
            }
        };

        let now = Utc::now();
        let mut loaded = 0;
        for (key, entry) in snapshot {
            if entry.is_fresh(ttl, now) {
                self.entries.insert(key, entry).await;
                loaded += 1;
            }
        }

        debug!("Loaded {loaded} cached metrics from {}", path.display());
        Ok(loaded)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.entries.run_pending_tasks().await;
        let snapshot: Vec<(CacheKey, CacheEntry)> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.as_ref().clone(), entry))
            .collect();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&snapshot)?).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!("Saved {} cached metrics", snapshot.len());
        Ok(())
    }
}
