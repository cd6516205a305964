//! Outbound event publication
//!
//! Driver responses, status changes and accepted locations are published for
//! downstream consumers (ride service, admin dashboards) under routing keys
//! of the form `driver.<kind>.<id>`. The end of every matching attempt is
//! published as `ride.match.<ride_id>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DriverId, DriverStatus, GeoPoint, RideId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::domain::MatchPhase;
use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    DriverResponse {
        ride_id: RideId,
        driver_id: DriverId,
        accepted: bool,
        timestamp: DateTime<Utc>,
    },
    DriverStatusChanged {
        driver_id: DriverId,
        status: DriverStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ride_id: Option<RideId>,
        timestamp: DateTime<Utc>,
    },
    DriverLocation {
        driver_id: DriverId,
        location: GeoPoint,
        timestamp: DateTime<Utc>,
    },
    /// Terminal phase of a ride: `MATCHED`, `EXPIRED` or `NO_DRIVERS`
    RideMatchResult {
        ride_id: RideId,
        phase: MatchPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        driver_id: Option<DriverId>,
        timestamp: DateTime<Utc>,
    },
}

impl DispatchEvent {
    pub fn routing_key(&self) -> String {
        match self {
            DispatchEvent::DriverResponse { ride_id, .. } => format!("driver.response.{}", ride_id),
            DispatchEvent::DriverStatusChanged { driver_id, .. } => {
                format!("driver.status.{}", driver_id)
            }
            DispatchEvent::DriverLocation { driver_id, .. } => {
                format!("driver.location.{}", driver_id)
            }
            DispatchEvent::RideMatchResult { ride_id, .. } => format!("ride.match.{}", ride_id),
        }
    }
}

/// An event together with its routing key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub routing_key: String,
    pub event: DispatchEvent,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DispatchEvent) -> Result<()>;
}

/// In-process fan-out over a tokio broadcast channel
///
/// Publishing with no subscribers is not an error.
#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<Envelope>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: DispatchEvent) -> Result<()> {
        let envelope = Envelope {
            routing_key: event.routing_key(),
            event,
        };
        match self.sender.send(envelope) {
            Ok(receivers) => debug!(receivers, "Event published"),
            Err(_) => debug!("Event published with no subscribers"),
        }
        Ok(())
    }
}

/// Writes every event to the log as JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: DispatchEvent) -> Result<()> {
        let payload = serde_json::to_string(&event).map_err(DispatchError::from)?;
        info!(routing_key = %event.routing_key(), %payload, "Dispatch event");
        Ok(())
    }
}
