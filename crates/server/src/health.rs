//! Health check endpoints

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

/// Status of a dependency (driver store, event sink, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub healthy: bool,
    pub detail: Option<String>,
}

/// Shared state for health checks
#[derive(Clone)]
pub struct HealthState {
    pub service_name: String,
    pub start_time: Instant,
    dependencies: Arc<tokio::sync::RwLock<Vec<DependencyStatus>>>,
}

impl HealthState {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            start_time: Instant::now(),
            dependencies: Arc::new(tokio::sync::RwLock::new(Vec::new())),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Insert or replace the status of a dependency
    pub async fn set_dependency(&self, status: DependencyStatus) {
        let mut deps = self.dependencies.write().await;
        deps.retain(|d| d.name != status.name);
        deps.push(status);
    }

    pub async fn dependencies(&self) -> Vec<DependencyStatus> {
        self.dependencies.read().await.clone()
    }

    pub async fn is_healthy(&self) -> bool {
        self.dependencies.read().await.iter().all(|d| d.healthy)
    }
}

/// Liveness plus dependency report; 503 when any dependency is unhealthy.
pub async fn health_handler(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<Value>) {
    let dependencies = state.dependencies().await;
    let healthy = dependencies.iter().all(|d| d.healthy);
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": if healthy { "ok" } else { "degraded" },
        "service": state.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "dependencies": dependencies,
    });

    (status_code, Json(body))
}

/// Simple health handler without state
pub async fn simple_health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// `GET /health`
pub fn health_routes(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_state_dependencies() {
        let state = HealthState::new("ride-dispatch");
        assert!(state.is_healthy().await);

        state
            .set_dependency(DependencyStatus {
                name: "driver-store".to_string(),
                healthy: false,
                detail: Some("connection refused".to_string()),
            })
            .await;
        assert!(!state.is_healthy().await);

        state
            .set_dependency(DependencyStatus {
                name: "driver-store".to_string(),
                healthy: true,
                detail: None,
            })
            .await;
        assert!(state.is_healthy().await);
        assert_eq!(state.dependencies().await.len(), 1);
    }

    #[tokio::test]
    async fn test_health_route_reports_degraded() {
        let state = Arc::new(HealthState::new("ride-dispatch"));
        state
            .set_dependency(DependencyStatus {
                name: "driver-store".to_string(),
                healthy: false,
                detail: None,
            })
            .await;

        let response = health_routes(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
