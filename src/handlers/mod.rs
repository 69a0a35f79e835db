//! HTTP handlers and routing.

pub mod checkout;
pub mod health;

use crate::AppState;
use axum::Router;
use std::sync::Arc;

/// Assembles the versioned API router.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api/v1/checkout", checkout::routes())
        .nest("/health", health::routes())
}
