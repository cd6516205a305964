//! HTTP API tests driven through the router without a listener

#![cfg(feature = "api")]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{DriverId, DriverStatus, GeoPoint, VehicleType};
use dispatch::api::create_coordinator_router;
use dispatch::{
    AcceptAnyToken, BroadcastPublisher, ConnectionRegistry, Driver, InMemoryDriverStore,
    MatchingCoordinator, MatchingSettings, RegistryConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn setup() -> (Router, MatchingCoordinator, Arc<InMemoryDriverStore>) {
    let store = InMemoryDriverStore::new();
    for (id, status, lat) in [
        ("d1", DriverStatus::Available, 43.2439),
        ("d2", DriverStatus::Available, 43.2539),
        ("d3", DriverStatus::Offline, 43.2400),
    ] {
        store.insert_driver(Driver {
            id: DriverId::new(id),
            vehicle_type: VehicleType::Economy,
            rating: 4.5,
            status,
            location: Some(GeoPoint {
                latitude: lat,
                longitude: 76.8897,
            }),
        });
    }
    let store = Arc::new(store);
    let registry = Arc::new(ConnectionRegistry::new(
        RegistryConfig::default(),
        Arc::new(AcceptAnyToken),
    ));
    let coordinator = MatchingCoordinator::new(
        store.clone(),
        registry,
        Arc::new(BroadcastPublisher::default()),
        MatchingSettings::default(),
    );
    (create_coordinator_router(coordinator.clone()), coordinator, store)
}

async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn ride_request_body(lat: f64) -> Value {
    json!({
        "ride_id": "ride-100",
        "ride_number": "RIDE_100",
        "pickup_location": {"latitude": lat, "longitude": 76.8897, "address": "Abay Ave 10"},
        "destination_location": {"latitude": 43.2567, "longitude": 76.9286, "address": "Dostyk Ave 5"},
        "ride_type": "ECONOMY",
        "estimated_fare": 1800.0,
        "max_distance_km": 5.0
    })
}

#[tokio::test]
async fn test_health_and_stats() {
    let (router, _, _) = setup();

    let (status, body) = call(router.clone(), get("/api/v1/dispatch/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "dispatch");

    let (status, body) = call(router, get("/api/v1/dispatch/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["metrics"]["ride_requests"], 0);
}

#[tokio::test]
async fn test_ride_request_without_connected_drivers() {
    let (router, coordinator, _) = setup();

    let (status, body) = call(router, post("/api/v1/internal/ride-requests", ride_request_body(43.2389))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["phase"], "NO_DRIVERS");
    assert_eq!(body["candidates"], 2);
    assert_eq!(body["offers_sent"], 0);
    assert_eq!(coordinator.tracker().pending_count(), 0);
}

#[tokio::test]
async fn test_invalid_ride_request_is_bad_request() {
    let (router, _, _) = setup();

    let (status, body) = call(router, post("/api/v1/internal/ride-requests", ride_request_body(95.0))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().is_some());
}

#[tokio::test]
async fn test_nearby_drivers_ordered_by_distance() {
    let (router, _, _) = setup();

    let (status, body) = call(
        router,
        get("/api/v1/internal/drivers/nearby?lat=43.2389&lng=76.8897&vehicle_type=ECONOMY&radius_m=5000&limit=5"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["drivers"][0]["driver_id"], "d1");
    assert_eq!(body["drivers"][1]["driver_id"], "d2");
}

#[tokio::test]
async fn test_driver_status_transition_conflict() {
    let (router, _, store) = setup();

    let (status, body) = call(
        router.clone(),
        post(
            "/api/v1/internal/drivers/d3/status",
            json!({"new_status": "BUSY", "expected_status": "AVAILABLE"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "OFFLINE");
    assert_eq!(store.status_of(&DriverId::new("d3")), Some(DriverStatus::Offline));

    let (status, _) = call(
        router.clone(),
        post(
            "/api/v1/internal/drivers/d1/status",
            json!({"new_status": "BUSY", "expected_status": "AVAILABLE"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.status_of(&DriverId::new("d1")), Some(DriverStatus::Busy));

    let (status, _) = call(
        router,
        post(
            "/api/v1/internal/drivers/ghost/status",
            json!({"new_status": "BUSY", "expected_status": "AVAILABLE"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ride_completion_releases_driver() {
    let (router, coordinator, store) = setup();
    coordinator
        .reconciler()
        .transition(&DriverId::new("d2"), DriverStatus::Busy, DriverStatus::Available)
        .await
        .unwrap();

    let (status, body) = call(
        router,
        post(
            "/api/v1/internal/ride-status",
            json!({"ride_id": "ride-7", "status": "COMPLETED", "driver_id": "d2"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["driver_released"], true);
    assert_eq!(store.status_of(&DriverId::new("d2")), Some(DriverStatus::Available));
}

#[tokio::test]
async fn test_connection_lookup() {
    let (router, coordinator, _) = setup();

    let (status, body) = call(router.clone(), get("/api/v1/internal/drivers/d1/connection")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["connected"], false);

    let handle = coordinator.registry().register(DriverId::new("d1"));
    coordinator
        .registry()
        .authenticate(&DriverId::new("d1"), handle.conn_id, "token")
        .await
        .unwrap();

    let (status, body) = call(router, get("/api/v1/internal/drivers/d1/connection")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], true);
    assert_eq!(body["connection"]["driver_id"], "d1");
}
