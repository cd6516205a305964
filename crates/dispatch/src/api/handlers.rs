//! HTTP API handlers for the dispatch service

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use common::{DriverId, DriverStatus, RideId, RideStatus, VehicleType};
use serde::{Deserialize, Serialize};

use crate::coordinator::MatchingCoordinator;
use crate::domain::{MatchPhase, NearbyDriver, RideRequest};
use crate::error::DispatchError;
use crate::metrics::MetricsSnapshot;
use crate::registry::ConnectionSnapshot;

/// State for the dispatch API
#[derive(Clone)]
pub struct DispatchApiState {
    pub coordinator: MatchingCoordinator,
}

impl DispatchApiState {
    pub fn new(coordinator: MatchingCoordinator) -> Self {
        Self { coordinator }
    }
}

fn status_for(error: &DispatchError) -> StatusCode {
    match error {
        DispatchError::Validation(_) | DispatchError::Serialization(_) => StatusCode::BAD_REQUEST,
        DispatchError::NotFound(_) | DispatchError::NotConnected(_) => StatusCode::NOT_FOUND,
        DispatchError::StatusMismatch { .. } => StatusCode::CONFLICT,
        DispatchError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
        DispatchError::SendFailed(_) | DispatchError::Store(_) | DispatchError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Response for ride request ingestion
#[derive(Debug, Serialize)]
pub struct RideRequestResponse {
    pub success: bool,
    pub ride_id: RideId,
    pub phase: Option<MatchPhase>,
    pub candidates: usize,
    pub offers_sent: usize,
    pub expires_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// Hand a ride to the matching coordinator
pub async fn submit_ride_request(
    State(state): State<DispatchApiState>,
    Json(req): Json<RideRequest>,
) -> (StatusCode, Json<RideRequestResponse>) {
    let ride_id = req.ride_id.clone();
    match state.coordinator.handle_ride_request(req).await {
        Ok(attempt) => {
            let message = match attempt.phase {
                MatchPhase::NoDrivers => Some("No drivers available".to_string()),
                _ => None,
            };
            (
                StatusCode::OK,
                Json(RideRequestResponse {
                    success: true,
                    ride_id: attempt.ride_id,
                    phase: Some(attempt.phase),
                    candidates: attempt.candidates,
                    offers_sent: attempt.offers_sent,
                    expires_at: attempt.expires_at,
                    message,
                }),
            )
        }
        Err(e) => (
            status_for(&e),
            Json(RideRequestResponse {
                success: false,
                ride_id,
                phase: None,
                candidates: 0,
                offers_sent: 0,
                expires_at: None,
                message: Some(e.to_string()),
            }),
        ),
    }
}

/// Ride lifecycle update from the ride service
#[derive(Debug, Deserialize)]
pub struct RideStatusRequest {
    pub ride_id: RideId,
    pub status: RideStatus,
    pub driver_id: Option<DriverId>,
}

/// Release the driver of a finished ride
pub async fn update_ride_status(
    State(state): State<DispatchApiState>,
    Json(req): Json<RideStatusRequest>,
) -> Json<serde_json::Value> {
    let released = state
        .coordinator
        .handle_ride_status(&req.ride_id, req.status, req.driver_id.as_ref())
        .await;

    Json(serde_json::json!({
        "success": true,
        "ride_id": req.ride_id,
        "status": req.status,
        "driver_released": released,
    }))
}

/// Conditional driver status change
#[derive(Debug, Deserialize)]
pub struct DriverStatusRequest {
    pub new_status: DriverStatus,
    pub expected_status: DriverStatus,
}

pub async fn transition_driver_status(
    State(state): State<DispatchApiState>,
    Path(driver_id): Path<String>,
    Json(req): Json<DriverStatusRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let driver_id = DriverId::new(driver_id);
    match state
        .coordinator
        .reconciler()
        .transition(&driver_id, req.new_status, req.expected_status)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "driver_id": driver_id,
                "status": req.new_status,
                "message": "Status updated"
            })),
        ),
        Err(DispatchError::StatusMismatch { actual, .. }) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "success": false,
                "driver_id": driver_id,
                "status": actual,
                "message": format!("Driver is {}, expected {}", actual, req.expected_status)
            })),
        ),
        Err(e) => (
            status_for(&e),
            Json(serde_json::json!({
                "success": false,
                "driver_id": driver_id,
                "message": e.to_string()
            })),
        ),
    }
}

/// Query for the nearby-driver lookup
#[derive(Debug, Deserialize)]
pub struct NearbyParams {
    pub lat: f64,
    pub lng: f64,
    pub vehicle_type: Option<VehicleType>,
    pub radius_m: Option<f64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct NearbyDriversResponse {
    pub success: bool,
    pub count: usize,
    pub drivers: Vec<NearbyDriver>,
    pub message: Option<String>,
}

pub async fn find_nearby_drivers(
    State(state): State<DispatchApiState>,
    Query(params): Query<NearbyParams>,
) -> (StatusCode, Json<NearbyDriversResponse>) {
    match state
        .coordinator
        .find_nearby(params.lat, params.lng, params.vehicle_type, params.radius_m, params.limit)
        .await
    {
        Ok(drivers) => (
            StatusCode::OK,
            Json(NearbyDriversResponse {
                success: true,
                count: drivers.len(),
                drivers,
                message: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(NearbyDriversResponse {
                success: false,
                count: 0,
                drivers: vec![],
                message: Some(e.to_string()),
            }),
        ),
    }
}

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub success: bool,
    pub connected: bool,
    pub connection: Option<ConnectionSnapshot>,
    pub message: Option<String>,
}

/// Liveness of a driver's channel
pub async fn get_driver_connection(
    State(state): State<DispatchApiState>,
    Path(driver_id): Path<String>,
) -> (StatusCode, Json<ConnectionResponse>) {
    match state.coordinator.registry().connection(&DriverId::new(driver_id)) {
        Some(snapshot) => (
            StatusCode::OK,
            Json(ConnectionResponse {
                success: true,
                connected: snapshot.authenticated,
                connection: Some(snapshot),
                message: None,
            }),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(ConnectionResponse {
                success: false,
                connected: false,
                connection: None,
                message: Some("Driver not connected".to_string()),
            }),
        ),
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub connected_drivers: usize,
    pub metrics: MetricsSnapshot,
}

pub async fn get_stats(State(state): State<DispatchApiState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        success: true,
        connected_drivers: state.coordinator.registry().connected_count(),
        metrics: state.coordinator.metrics(),
    })
}

/// Health check
pub async fn health(State(state): State<DispatchApiState>) -> (StatusCode, Json<serde_json::Value>) {
    let store_ok = state.coordinator.store_healthy().await;
    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if store_ok { "healthy" } else { "degraded" },
            "service": "dispatch",
            "store": if store_ok { "up" } else { "down" },
            "connected_drivers": state.coordinator.registry().connected_count(),
            "pending_rides": state.coordinator.tracker().pending_count(),
        })),
    )
}
