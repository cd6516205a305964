//! HTTP routes for the dispatch API

use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

use super::handlers::*;
use crate::coordinator::MatchingCoordinator;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Create the dispatch router
///
/// Routes:
/// - POST /api/v1/internal/ride-requests                - Ingest a ride request
/// - POST /api/v1/internal/ride-status                  - Ride lifecycle update
/// - POST /api/v1/internal/drivers/:driver_id/status    - Conditional status change
/// - GET  /api/v1/internal/drivers/nearby               - Locator query
/// - GET  /api/v1/internal/drivers/:driver_id/connection - Channel liveness
/// - GET  /api/v1/dispatch/health                       - Health check (service-specific path)
/// - GET  /api/v1/dispatch/stats                        - Metrics snapshot
pub fn create_router(state: DispatchApiState) -> Router {
    Router::new()
        .route("/api/v1/dispatch/health", get(health))
        .route("/api/v1/dispatch/stats", get(get_stats))
        .route("/api/v1/internal/ride-requests", post(submit_ride_request))
        .route("/api/v1/internal/ride-status", post(update_ride_status))
        .route("/api/v1/internal/drivers/nearby", get(find_nearby_drivers))
        .route(
            "/api/v1/internal/drivers/:driver_id/status",
            post(transition_driver_status),
        )
        .route(
            "/api/v1/internal/drivers/:driver_id/connection",
            get(get_driver_connection),
        )
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

/// Router over a shared coordinator
pub fn create_coordinator_router(coordinator: MatchingCoordinator) -> Router {
    create_router(DispatchApiState::new(coordinator))
}
