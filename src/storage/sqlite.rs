use crate::models::view::VIEWED_DATE_FORMAT;
use crate::models::{NewPropertyView, PropertyView, PropertyViewCount};
use crate::storage::{InsertOutcome, Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `:memory:` opens its own database, so keep
        // exactly one connection alive for the lifetime of the pool.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(options)
                .await?
        };

        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS property_views (
                id TEXT PRIMARY KEY NOT NULL,
                property_id TEXT NOT NULL,
                viewer_ip TEXT NOT NULL,
                viewer_profile_id TEXT,
                viewed_at INTEGER NOT NULL,
                viewed_date TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        // One row per (property, ip, day)
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_property_views_unique_daily
            ON property_views(property_id, viewer_ip, viewed_date)
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_property_views_date ON property_views(viewed_date)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn insert_view(&self, view: &NewPropertyView) -> StorageResult<InsertOutcome> {
        let id = uuid::Uuid::new_v4().to_string();

        let result = sqlx::query(
            r#"
            INSERT INTO property_views
                (id, property_id, viewer_ip, viewer_profile_id, viewed_at, viewed_date)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(property_id, viewer_ip, viewed_date) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(&view.property_id)
        .bind(&view.viewer_ip)
        .bind(view.viewer_profile_id.as_deref())
        .bind(view.viewed_at)
        .bind(view.viewed_date_key())
        .execute(self.pool.as_ref())
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(InsertOutcome::Duplicate),
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) => Err(e.into()),
        }
    }

    async fn count_views(&self, property_id: &str) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM property_views WHERE property_id = ?",
        )
        .bind(property_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn count_all_views(&self) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM property_views")
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(count)
    }

    async fn count_views_on(&self, date: NaiveDate) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM property_views WHERE viewed_date = ?",
        )
        .bind(date.format(VIEWED_DATE_FORMAT).to_string())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn count_unique_viewers_on(&self, date: NaiveDate) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT viewer_ip) FROM property_views WHERE viewed_date = ?",
        )
        .bind(date.format(VIEWED_DATE_FORMAT).to_string())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn count_viewed_properties(&self) -> StorageResult<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT property_id) FROM property_views")
                .fetch_one(self.pool.as_ref())
                .await?;

        Ok(count)
    }

    async fn top_properties(&self, limit: i64) -> StorageResult<Vec<PropertyViewCount>> {
        let rows = sqlx::query_as::<_, PropertyViewCount>(
            r#"
            SELECT property_id, COUNT(*) AS view_count
            FROM property_views
            GROUP BY property_id
            ORDER BY view_count DESC, property_id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn list_views(
        &self,
        property_id: &str,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<PropertyView>> {
        let views = sqlx::query_as::<_, PropertyView>(
            r#"
            SELECT id, property_id, viewer_ip, viewer_profile_id, viewed_at, viewed_date
            FROM property_views
            WHERE property_id = ?
            ORDER BY viewed_at DESC, id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(property_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_sqlite() -> SqliteStorage {
        let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
        storage.init().await.unwrap();
        storage
    }

    fn view(property_id: &str, ip: &str, date: (i32, u32, u32), viewed_at: i64) -> NewPropertyView {
        NewPropertyView {
            property_id: property_id.to_string(),
            viewer_ip: ip.to_string(),
            viewer_profile_id: None,
            viewed_at,
            viewed_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_triple_is_absorbed() {
        let storage = setup_sqlite().await;

        let first = storage
            .insert_view(&view("prop-1", "10.0.0.1", (2024, 1, 1), 1_704_103_200))
            .await
            .unwrap();
        let second = storage
            .insert_view(&view("prop-1", "10.0.0.1", (2024, 1, 1), 1_704_150_000))
            .await
            .unwrap();

        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(second, InsertOutcome::Duplicate);
        assert_eq!(storage.count_views("prop-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let storage = setup_sqlite().await;
        storage.init().await.unwrap();

        storage
            .insert_view(&view("prop-1", "10.0.0.1", (2024, 1, 1), 1_704_103_200))
            .await
            .unwrap();
        storage.init().await.unwrap();

        assert_eq!(storage.count_all_views().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_views_newest_first() {
        let storage = setup_sqlite().await;
        storage
            .insert_view(&view("prop-1", "10.0.0.1", (2024, 1, 1), 100))
            .await
            .unwrap();
        storage
            .insert_view(&view("prop-1", "10.0.0.2", (2024, 1, 1), 200))
            .await
            .unwrap();
        storage
            .insert_view(&view("prop-2", "10.0.0.1", (2024, 1, 1), 300))
            .await
            .unwrap();

        let views = storage.list_views("prop-1", 10, 0).await.unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].viewer_ip, "10.0.0.2");
        assert_eq!(views[0].viewed_date, "2024-01-01");
        assert_eq!(views[1].viewer_ip, "10.0.0.1");

        let page = storage.list_views("prop-1", 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].viewer_ip, "10.0.0.1");
    }
}
