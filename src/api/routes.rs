use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::{self, Next},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{auth_middleware, AuthService};
use crate::config::Config;
use crate::stats::{DashboardService, DashboardStats, StatsCache};
use crate::storage::Storage;
use crate::views::ViewCounter;

use super::handlers::{
    get_dashboard_stats, get_view_count, health_check, list_property_views, record_view,
    AppState,
};

/// Build the API router. The stats cache is created by the caller so one
/// instance can outlive and be shared across routers.
pub fn create_api_router(
    storage: Arc<dyn Storage>,
    auth_service: Arc<AuthService>,
    stats_cache: Arc<StatsCache<DashboardStats>>,
    config: Arc<Config>,
) -> Router {
    let offset = config.views.timezone_offset;
    let state = Arc::new(AppState {
        views: ViewCounter::new(Arc::clone(&storage), offset),
        dashboard: DashboardService::new(
            Arc::clone(&storage),
            stats_cache,
            offset,
            config.stats.top_properties,
        ),
        views_config: config.views.clone(),
    });

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route(
            "/properties/{property_id}/views",
            get(get_view_count).post(record_view),
        );

    let admin_routes = Router::new()
        .route("/admin/dashboard/stats", get(get_dashboard_stats))
        .route(
            "/admin/properties/{property_id}/views",
            get(list_property_views),
        )
        .route_layer(middleware::from_fn(
            move |headers: HeaderMap, req: Request, next: Next| {
                let auth = Arc::clone(&auth_service);
                auth_middleware(auth, headers, req, next)
            },
        ));

    Router::new()
        .nest("/api", public_routes.merge(admin_routes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
