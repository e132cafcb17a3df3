//! HTTP route handlers for the query API.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Liveness
//! GET  /health/ready           - Readiness (store ping)
//! GET  /top-spenders?limit=N   - Users ranked by total spend
//! GET  /top-sellers?limit=N    - Products ranked by quantity sold
//! ```

pub mod health;
pub mod rankings;

use axum::{Router, routing::get};

use crate::state::AppState;

/// Create all routes for the query API.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/top-spenders", get(rankings::top_spenders))
        .route("/top-sellers", get(rankings::top_sellers))
}
