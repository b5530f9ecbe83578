//! Admin dashboard aggregates over the view table

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::models::view::VIEWED_DATE_FORMAT;
use crate::models::PropertyViewCount;
use crate::stats::cache::{CacheError, CachedValue, StatsCache};
use crate::storage::{Storage, StorageError, StorageResult};

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_views: i64,
    pub views_today: i64,
    pub unique_viewers_today: i64,
    pub properties_viewed: i64,
    pub top_properties: Vec<PropertyViewCount>,
    /// Calendar day the "today" counters refer to
    pub today: String,
    /// Unix timestamp the aggregate was computed at
    pub generated_at: i64,
}

/// Run the dashboard count queries concurrently.
pub async fn compute_dashboard_stats(
    storage: &dyn Storage,
    now: DateTime<Utc>,
    offset: FixedOffset,
    top_properties: i64,
) -> StorageResult<DashboardStats> {
    let today = now.with_timezone(&offset).date_naive();

    let (total_views, views_today, unique_viewers_today, properties_viewed, top_properties) = tokio::try_join!(
        storage.count_all_views(),
        storage.count_views_on(today),
        storage.count_unique_viewers_on(today),
        storage.count_viewed_properties(),
        storage.top_properties(top_properties),
    )?;

    Ok(DashboardStats {
        total_views,
        views_today,
        unique_viewers_today,
        properties_viewed,
        top_properties,
        today: today.format(VIEWED_DATE_FORMAT).to_string(),
        generated_at: now.timestamp(),
    })
}

/// Dashboard statistics served through a shared [`StatsCache`].
pub struct DashboardService {
    storage: Arc<dyn Storage>,
    cache: Arc<StatsCache<DashboardStats>>,
    offset: FixedOffset,
    top_properties: i64,
}

impl DashboardService {
    pub fn new(
        storage: Arc<dyn Storage>,
        cache: Arc<StatsCache<DashboardStats>>,
        offset: FixedOffset,
        top_properties: i64,
    ) -> Self {
        Self {
            storage,
            cache,
            offset,
            top_properties,
        }
    }

    pub async fn stats(&self) -> Result<CachedValue<DashboardStats>, CacheError<StorageError>> {
        self.cache
            .get_or_compute(|| async {
                debug!("recomputing dashboard stats");
                compute_dashboard_stats(
                    self.storage.as_ref(),
                    Utc::now(),
                    self.offset,
                    self.top_properties,
                )
                .await
            })
            .await
    }
}
