//! HTTP API: trigger endpoints, job history, health.

pub mod app;
pub mod middleware;
