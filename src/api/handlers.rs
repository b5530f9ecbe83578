use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::ViewsConfig;
use crate::models::{PropertyView, RecordViewRequest};
use crate::stats::{CacheError, CacheStatus, DashboardService, DashboardStats};
use crate::views::{extract_client_ip, ViewCounter, ViewError};

pub struct AppState {
    pub views: ViewCounter,
    pub dashboard: DashboardService,
    pub views_config: ViewsConfig,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ViewCountResponse {
    pub property_id: String,
    pub view_count: i64,
}

#[derive(Debug, Serialize)]
pub struct RecordViewResponse {
    pub property_id: String,
    pub view_count: i64,
    /// False when this IP was already counted for the property today
    pub recorded: bool,
}

#[derive(Debug, Serialize)]
pub struct DashboardStatsResponse {
    #[serde(flatten)]
    pub stats: DashboardStats,
    /// True when the payload was not computed by this request
    pub cached: bool,
    /// True when a recompute failed and the last good payload was served
    pub stale: bool,
}

#[derive(Debug, Serialize)]
pub struct PropertyViewsResponse {
    pub views: Vec<PropertyView>,
    pub total: usize,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn view_error_response(err: ViewError) -> ApiError {
    match err {
        ViewError::Validation(message) => error_response(StatusCode::BAD_REQUEST, message),
        ViewError::StoreUnavailable(e) => {
            error!(error = %e, "view store unavailable");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "View store unavailable")
        }
    }
}

/// Record a property view for the calling IP
pub async fn record_view(
    State(state): State<Arc<AppState>>,
    Path(property_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RecordViewResponse>, ApiError> {
    // The body is optional; an empty POST records an anonymous view
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        RecordViewRequest::default()
    } else {
        serde_json::from_slice::<RecordViewRequest>(&body).map_err(|e| {
            error_response(StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
        })?
    };

    let viewer_ip = extract_client_ip(&headers, addr.ip(), &state.views_config).to_string();

    let result = state
        .views
        .record_view(
            &property_id,
            &viewer_ip,
            payload.viewer_profile_id.as_deref(),
            chrono::Utc::now(),
        )
        .await
        .map_err(view_error_response)?;

    if result.recorded {
        info!(property_id = %property_id, view_count = result.view_count, "recorded property view");
    }

    Ok(Json(RecordViewResponse {
        property_id,
        view_count: result.view_count,
        recorded: result.recorded,
    }))
}

/// Get the total view count of a property
pub async fn get_view_count(
    State(state): State<Arc<AppState>>,
    Path(property_id): Path<String>,
) -> Result<Json<ViewCountResponse>, ApiError> {
    let view_count = state
        .views
        .get_view_count(&property_id)
        .await
        .map_err(view_error_response)?;

    Ok(Json(ViewCountResponse {
        property_id,
        view_count,
    }))
}

/// List stored views of a property (admin)
pub async fn list_property_views(
    State(state): State<Arc<AppState>>,
    Path(property_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<PropertyViewsResponse>, ApiError> {
    let views = state
        .views
        .list_views(&property_id, query.limit, query.offset)
        .await
        .map_err(view_error_response)?;

    let total = views.len();
    Ok(Json(PropertyViewsResponse { views, total }))
}

/// Dashboard statistics, served from the stats cache when fresh (admin)
pub async fn get_dashboard_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DashboardStatsResponse>, ApiError> {
    match state.dashboard.stats().await {
        Ok(value) => {
            let status = value.status();
            Ok(Json(DashboardStatsResponse {
                stats: value.payload().clone(),
                cached: status != CacheStatus::Miss,
                stale: status == CacheStatus::Stale,
            }))
        }
        Err(CacheError::ComputeFailure(e)) => {
            error!(error = %e, "failed to compute dashboard stats");
            Err(error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Dashboard statistics unavailable",
            ))
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
