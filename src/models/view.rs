use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Calendar-day format used for `viewed_date` in both schemas.
pub const VIEWED_DATE_FORMAT: &str = "%Y-%m-%d";

/// A recorded, deduplicated view of a property listing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PropertyView {
    pub id: String,
    pub property_id: String,
    pub viewer_ip: String,
    pub viewer_profile_id: Option<String>,
    /// Unix timestamp (seconds, UTC)
    pub viewed_at: i64,
    /// `YYYY-MM-DD` in the configured view time zone
    pub viewed_date: String,
}

/// Insert payload for the view table. The row id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewPropertyView {
    pub property_id: String,
    pub viewer_ip: String,
    pub viewer_profile_id: Option<String>,
    pub viewed_at: i64,
    pub viewed_date: NaiveDate,
}

impl NewPropertyView {
    pub fn viewed_date_key(&self) -> String {
        self.viewed_date.format(VIEWED_DATE_FORMAT).to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct PropertyViewCount {
    pub property_id: String,
    pub view_count: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordViewRequest {
    pub viewer_profile_id: Option<String>,
}
