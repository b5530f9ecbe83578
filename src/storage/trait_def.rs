use crate::models::{NewPropertyView, PropertyView, PropertyViewCount};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Result of inserting a view row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was stored
    Inserted,
    /// The (property, ip, day) triple already had a row; nothing was written
    Duplicate,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Insert a view row. A row for the same (property, ip, day) triple
    /// already present yields `InsertOutcome::Duplicate`, not an error.
    async fn insert_view(&self, view: &NewPropertyView) -> StorageResult<InsertOutcome>;

    /// Count all stored views of a property, across every day and IP
    async fn count_views(&self, property_id: &str) -> StorageResult<i64>;

    /// Count all stored views
    async fn count_all_views(&self) -> StorageResult<i64>;

    /// Count views recorded on the given calendar day
    async fn count_views_on(&self, date: NaiveDate) -> StorageResult<i64>;

    /// Count distinct viewer IPs on the given calendar day
    async fn count_unique_viewers_on(&self, date: NaiveDate) -> StorageResult<i64>;

    /// Count distinct properties that have at least one view
    async fn count_viewed_properties(&self) -> StorageResult<i64>;

    /// Most viewed properties, highest count first, ties by property id
    async fn top_properties(&self, limit: i64) -> StorageResult<Vec<PropertyViewCount>>;

    /// List stored views of a property, newest first
    async fn list_views(
        &self,
        property_id: &str,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<PropertyView>>;
}
