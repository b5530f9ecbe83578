use crate::models::view::VIEWED_DATE_FORMAT;
use crate::models::{NewPropertyView, PropertyView, PropertyViewCount};
use crate::storage::{InsertOutcome, Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS property_views (
                id TEXT PRIMARY KEY,
                property_id TEXT NOT NULL,
                viewer_ip TEXT NOT NULL,
                viewer_profile_id TEXT,
                viewed_at BIGINT NOT NULL,
                viewed_date TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

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
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (property_id, viewer_ip, viewed_date) DO NOTHING
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
            "SELECT COUNT(*) FROM property_views WHERE property_id = $1",
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
            "SELECT COUNT(*) FROM property_views WHERE viewed_date = $1",
        )
        .bind(date.format(VIEWED_DATE_FORMAT).to_string())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn count_unique_viewers_on(&self, date: NaiveDate) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT viewer_ip) FROM property_views WHERE viewed_date = $1",
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
            LIMIT $1
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
            WHERE property_id = $1
            ORDER BY viewed_at DESC, id ASC
            LIMIT $2 OFFSET $3
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
