pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod stats;
pub mod storage;
pub mod views;
