//! Single-slot, short-TTL memoization for expensive aggregates
//!
//! One [`StatsCache`] holds one payload. Callers that need several
//! independent aggregates create one cache per aggregate family.
//!
//! The slot is an `ArcSwapOption`, so readers never block and no lock is
//! held while the compute function runs. Two callers racing past an expired
//! entry may both compute; whichever stores last wins.
//!
//! When a recompute fails the slot is left untouched. If a previous payload
//! exists it is returned flagged [`CacheStatus::Stale`]; otherwise the error
//! propagates as [`CacheError::ComputeFailure`]. The untouched slot keeps its
//! old `computed_at`, so the next call tries to compute again.

use arc_swap::ArcSwapOption;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CacheError<E> {
    #[error("failed to compute cached value: {0}")]
    ComputeFailure(#[source] E),
}

#[derive(Debug)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub computed_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a fresh entry without computing
    Hit,
    /// Freshly computed by this call
    Miss,
    /// Recompute failed; last good payload served
    Stale,
}

#[derive(Debug)]
pub struct CachedValue<T> {
    entry: Arc<CacheEntry<T>>,
    status: CacheStatus,
}

impl<T> CachedValue<T> {
    pub fn payload(&self) -> &T {
        &self.entry.payload
    }

    pub fn status(&self) -> CacheStatus {
        self.status
    }

    pub fn computed_at(&self) -> Instant {
        self.entry.computed_at
    }
}

pub struct StatsCache<T> {
    ttl: Duration,
    slot: ArcSwapOption<CacheEntry<T>>,
}

impl<T> StatsCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: ArcSwapOption::from(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current entry, fresh or not
    pub fn peek(&self) -> Option<Arc<CacheEntry<T>>> {
        self.slot.load_full()
    }

    pub fn invalidate(&self) {
        self.slot.store(None);
    }

    fn is_fresh(&self, entry: &CacheEntry<T>, now: Instant) -> bool {
        now.saturating_duration_since(entry.computed_at) < self.ttl
    }

    /// Return the cached payload if fresh, otherwise compute and store it.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        compute: F,
    ) -> Result<CachedValue<T>, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.get_or_compute_at(Instant::now(), compute).await
    }

    /// Same as [`StatsCache::get_or_compute`] with an explicit clock reading.
    pub async fn get_or_compute_at<F, Fut, E>(
        &self,
        now: Instant,
        compute: F,
    ) -> Result<CachedValue<T>, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let previous = self.slot.load_full();
        if let Some(entry) = &previous {
            if self.is_fresh(entry, now) {
                return Ok(CachedValue {
                    entry: Arc::clone(entry),
                    status: CacheStatus::Hit,
                });
            }
        }

        match compute().await {
            Ok(payload) => {
                let entry = Arc::new(CacheEntry {
                    payload,
                    computed_at: now,
                });
                self.slot.store(Some(Arc::clone(&entry)));
                Ok(CachedValue {
                    entry,
                    status: CacheStatus::Miss,
                })
            }
            Err(err) => match previous {
                Some(entry) => {
                    warn!(
                        error = %err,
                        age_ms = now.saturating_duration_since(entry.computed_at).as_millis() as u64,
                        "stats recompute failed, serving last good payload"
                    );
                    Ok(CachedValue {
                        entry,
                        status: CacheStatus::Stale,
                    })
                }
                None => Err(CacheError::ComputeFailure(err)),
            },
        }
    }
}
