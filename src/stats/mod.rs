//! Dashboard statistics and the short-lived cache in front of them

pub mod cache;
pub mod dashboard;

pub use cache::{CacheError, CacheStatus, CachedValue, StatsCache};
pub use dashboard::{compute_dashboard_stats, DashboardService, DashboardStats};
