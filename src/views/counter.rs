//! Per-IP, per-day unique property view counter
//!
//! A view is keyed by `(property_id, viewer_ip, viewed_date)` where the date
//! is the calendar day of the view in the configured offset. Deduplication
//! relies on the storage layer's unique index; a duplicate insert comes back
//! as [`InsertOutcome::Duplicate`] and is not treated as a failure.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::models::{NewPropertyView, PropertyView};
use crate::storage::{InsertOutcome, Storage, StorageError};

const MAX_PROPERTY_ID_LEN: usize = 128;
const MAX_VIEWER_IP_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("invalid view request: {0}")]
    Validation(String),
    #[error("view store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),
}

/// Outcome of [`ViewCounter::record_view`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedView {
    /// Total stored views for the property after this call
    pub view_count: i64,
    /// False when the view was already counted for this IP today
    pub recorded: bool,
}

pub struct ViewCounter {
    storage: Arc<dyn Storage>,
    offset: FixedOffset,
}

impl ViewCounter {
    pub fn new(storage: Arc<dyn Storage>, offset: FixedOffset) -> Self {
        Self { storage, offset }
    }

    /// Calendar day of `at` in the counter's offset
    pub fn viewed_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// Record a view and return the property's total view count.
    ///
    /// A second view from the same IP on the same day is absorbed and still
    /// returns `Ok`. The count is read after the insert without a spanning
    /// transaction, so it may already include concurrent views by others.
    pub async fn record_view(
        &self,
        property_id: &str,
        viewer_ip: &str,
        viewer_profile_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RecordedView, ViewError> {
        let property_id = validate_property_id(property_id)?;
        let viewer_ip = validate_viewer_ip(viewer_ip)?;
        let viewer_profile_id = viewer_profile_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let view = NewPropertyView {
            property_id: property_id.to_string(),
            viewer_ip: viewer_ip.to_string(),
            viewer_profile_id,
            viewed_at: now.timestamp(),
            viewed_date: self.viewed_date(now),
        };

        let outcome = self.storage.insert_view(&view).await?;
        let recorded = outcome == InsertOutcome::Inserted;
        if !recorded {
            debug!(
                property_id = %view.property_id,
                viewer_ip = %view.viewer_ip,
                viewed_date = %view.viewed_date,
                "view already counted today"
            );
        }

        let view_count = self.storage.count_views(property_id).await?;

        Ok(RecordedView {
            view_count,
            recorded,
        })
    }

    /// Total stored views for a property. Read-only.
    pub async fn get_view_count(&self, property_id: &str) -> Result<i64, ViewError> {
        let property_id = validate_property_id(property_id)?;
        Ok(self.storage.count_views(property_id).await?)
    }

    /// Stored views of a property, newest first
    pub async fn list_views(
        &self,
        property_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PropertyView>, ViewError> {
        let property_id = validate_property_id(property_id)?;
        Ok(self
            .storage
            .list_views(property_id, limit.clamp(1, 1000), offset.max(0))
            .await?)
    }
}

fn validate_property_id(property_id: &str) -> Result<&str, ViewError> {
    let property_id = property_id.trim();
    if property_id.is_empty() {
        return Err(ViewError::Validation(
            "property id cannot be empty".to_string(),
        ));
    }
    if property_id.len() > MAX_PROPERTY_ID_LEN {
        return Err(ViewError::Validation(format!(
            "property id must be at most {MAX_PROPERTY_ID_LEN} characters"
        )));
    }
    if property_id
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '/')
    {
        return Err(ViewError::Validation(
            "property id contains invalid characters".to_string(),
        ));
    }
    Ok(property_id)
}

fn validate_viewer_ip(viewer_ip: &str) -> Result<&str, ViewError> {
    let viewer_ip = viewer_ip.trim();
    if viewer_ip.is_empty() {
        return Err(ViewError::Validation("viewer IP is required".to_string()));
    }
    if viewer_ip.len() > MAX_VIEWER_IP_LEN {
        return Err(ViewError::Validation("viewer IP is too long".to_string()));
    }
    Ok(viewer_ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PropertyViewCount;
    use crate::storage::{SqliteStorage, StorageResult};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn setup_counter(offset: FixedOffset) -> ViewCounter {
        let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
        storage.init().await.unwrap();
        ViewCounter::new(Arc::new(storage), offset)
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    /// Store that counts calls and always fails
    #[derive(Default)]
    struct UnavailableStorage {
        calls: AtomicUsize,
    }

    impl UnavailableStorage {
        fn fail<T>(&self) -> StorageResult<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Other(anyhow::anyhow!("connection refused")))
        }
    }

    #[async_trait]
    impl Storage for UnavailableStorage {
        async fn init(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn insert_view(&self, _view: &NewPropertyView) -> StorageResult<InsertOutcome> {
            self.fail()
        }
        async fn count_views(&self, _property_id: &str) -> StorageResult<i64> {
            self.fail()
        }
        async fn count_all_views(&self) -> StorageResult<i64> {
            self.fail()
        }
        async fn count_views_on(&self, _date: NaiveDate) -> StorageResult<i64> {
            self.fail()
        }
        async fn count_unique_viewers_on(&self, _date: NaiveDate) -> StorageResult<i64> {
            self.fail()
        }
        async fn count_viewed_properties(&self) -> StorageResult<i64> {
            self.fail()
        }
        async fn top_properties(&self, _limit: i64) -> StorageResult<Vec<PropertyViewCount>> {
            self.fail()
        }
        async fn list_views(
            &self,
            _property_id: &str,
            _limit: i64,
            _offset: i64,
        ) -> StorageResult<Vec<PropertyView>> {
            self.fail()
        }
    }

    #[tokio::test]
    async fn test_repeat_view_same_day_is_not_an_error() {
        let counter = setup_counter(utc()).await;

        let first = counter
            .record_view("prop-1", "1.2.3.4", None, at(2024, 1, 1, 10, 0))
            .await
            .unwrap();
        let second = counter
            .record_view("prop-1", "1.2.3.4", None, at(2024, 1, 1, 11, 0))
            .await
            .unwrap();

        assert!(first.recorded);
        assert!(!second.recorded);
        assert_eq!(first.view_count, 1);
        assert!(second.view_count >= first.view_count);
        assert_eq!(counter.get_view_count("prop-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_day_boundary_counts_again() {
        let counter = setup_counter(utc()).await;

        counter
            .record_view("prop-1", "1.2.3.4", None, at(2024, 1, 1, 10, 0))
            .await
            .unwrap();
        counter
            .record_view("prop-1", "1.2.3.4", None, at(2024, 1, 1, 23, 59))
            .await
            .unwrap();
        let third = counter
            .record_view("prop-1", "1.2.3.4", None, at(2024, 1, 2, 0, 1))
            .await
            .unwrap();

        assert!(third.recorded);
        assert_eq!(third.view_count, 2);
        assert_eq!(counter.get_view_count("prop-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_offset_moves_day_boundary() {
        // 23:30 UTC on Jan 1 is already Jan 2 at +02:00
        let counter = setup_counter(FixedOffset::east_opt(2 * 3600).unwrap()).await;

        assert_eq!(
            counter.viewed_date(at(2024, 1, 1, 23, 30)),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );

        counter
            .record_view("prop-1", "1.2.3.4", None, at(2024, 1, 1, 21, 0))
            .await
            .unwrap();
        let late = counter
            .record_view("prop-1", "1.2.3.4", None, at(2024, 1, 1, 23, 30))
            .await
            .unwrap();

        assert!(late.recorded);
        assert_eq!(late.view_count, 2);
    }

    #[tokio::test]
    async fn test_different_ips_and_properties_are_independent() {
        let counter = setup_counter(utc()).await;
        let now = at(2024, 3, 10, 12, 0);

        counter.record_view("prop-1", "1.2.3.4", None, now).await.unwrap();
        counter.record_view("prop-1", "5.6.7.8", None, now).await.unwrap();
        let other = counter
            .record_view("prop-2", "1.2.3.4", Some("profile-9"), now)
            .await
            .unwrap();

        assert_eq!(counter.get_view_count("prop-1").await.unwrap(), 2);
        assert_eq!(other.view_count, 1);
        assert_eq!(counter.get_view_count("prop-3").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_profile_id_is_not_part_of_dedup_key() {
        let counter = setup_counter(utc()).await;
        let now = at(2024, 3, 10, 12, 0);

        counter
            .record_view("prop-1", "1.2.3.4", Some("alice"), now)
            .await
            .unwrap();
        let again = counter
            .record_view("prop-1", "1.2.3.4", Some("bob"), now)
            .await
            .unwrap();

        assert!(!again.recorded);
        assert_eq!(again.view_count, 1);
    }

    #[tokio::test]
    async fn test_validation_never_reaches_store() {
        let storage = Arc::new(UnavailableStorage::default());
        let counter = ViewCounter::new(storage.clone(), utc());
        let now = at(2024, 1, 1, 10, 0);

        for (property_id, ip) in [("", "1.2.3.4"), ("   ", "1.2.3.4"), ("prop-1", ""), ("a/b", "1.2.3.4")] {
            let err = counter
                .record_view(property_id, ip, None, now)
                .await
                .unwrap_err();
            assert!(matches!(err, ViewError::Validation(_)), "got {err:?}");
        }
        let too_long = "p".repeat(MAX_PROPERTY_ID_LEN + 1);
        assert!(matches!(
            counter.get_view_count(&too_long).await,
            Err(ViewError::Validation(_))
        ));

        assert_eq!(storage.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let storage = Arc::new(UnavailableStorage::default());
        let counter = ViewCounter::new(storage.clone(), utc());

        let err = counter
            .record_view("prop-1", "1.2.3.4", None, at(2024, 1, 1, 10, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ViewError::StoreUnavailable(_)));

        // The failed insert must not be followed by a count query
        assert_eq!(storage.calls.load(Ordering::SeqCst), 1);
    }
}
