//! Driver status reconciliation
//!
//! Every status change goes through a compare-and-set in the driver store.
//! Losing a race surfaces as [`DispatchError::StatusMismatch`]; callers on
//! the matching path log it and carry on.

use chrono::Utc;
use common::{DriverId, DriverStatus, RideId};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, Result};
use crate::publisher::{DispatchEvent, EventPublisher};
use crate::store::{DriverStore, StatusCas};

#[derive(Clone)]
pub struct StatusReconciler {
    store: Arc<dyn DriverStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl StatusReconciler {
    pub fn new(store: Arc<dyn DriverStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Apply `new_status` iff the driver is currently `expected`.
    pub async fn transition(
        &self,
        driver_id: &DriverId,
        new_status: DriverStatus,
        expected: DriverStatus,
    ) -> Result<()> {
        self.transition_for_ride(driver_id, new_status, expected, None)
            .await
    }

    /// [`transition`](Self::transition), tagging the status event with a ride
    pub async fn transition_for_ride(
        &self,
        driver_id: &DriverId,
        new_status: DriverStatus,
        expected: DriverStatus,
        ride_id: Option<&RideId>,
    ) -> Result<()> {
        match self
            .store
            .compare_and_set_status(driver_id, expected, new_status)
            .await?
        {
            StatusCas::Applied => {
                info!(driver_id = %driver_id, from = %expected, to = %new_status, "Driver status changed");
            }
            StatusCas::Mismatch(actual) => {
                debug!(driver_id = %driver_id, %expected, %actual, "Status transition rejected");
                return Err(DispatchError::StatusMismatch {
                    driver_id: driver_id.clone(),
                    expected,
                    actual,
                });
            }
            StatusCas::NotFound => {
                return Err(DispatchError::NotFound(format!("driver {}", driver_id)));
            }
        }

        let event = DispatchEvent::DriverStatusChanged {
            driver_id: driver_id.clone(),
            status: new_status,
            ride_id: ride_id.cloned(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.publisher.publish(event).await {
            warn!(driver_id = %driver_id, %e, "Failed to publish status change");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Driver;
    use crate::publisher::BroadcastPublisher;
    use crate::store::{InMemoryDriverStore, MockDriverStore, StoreError};
    use assert_matches::assert_matches;
    use common::VehicleType;

    fn store_with(id: &str, status: DriverStatus) -> Arc<InMemoryDriverStore> {
        let store = InMemoryDriverStore::new();
        store.insert_driver(Driver {
            id: DriverId::new(id),
            vehicle_type: VehicleType::Economy,
            rating: 4.7,
            status,
            location: None,
        });
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_offline_driver_is_not_made_busy() {
        let store = store_with("d1", DriverStatus::Offline);
        let reconciler = StatusReconciler::new(store.clone(), Arc::new(BroadcastPublisher::default()));

        let result = reconciler
            .transition(&DriverId::new("d1"), DriverStatus::Busy, DriverStatus::Available)
            .await;
        assert_matches!(
            result,
            Err(DispatchError::StatusMismatch {
                actual: DriverStatus::Offline,
                ..
            })
        );
        assert_eq!(store.status_of(&DriverId::new("d1")), Some(DriverStatus::Offline));
    }

    #[tokio::test]
    async fn test_applied_transition_is_published() {
        let store = store_with("d1", DriverStatus::Available);
        let publisher = BroadcastPublisher::default();
        let mut events = publisher.subscribe();
        let reconciler = StatusReconciler::new(store.clone(), Arc::new(publisher));

        reconciler
            .transition_for_ride(
                &DriverId::new("d1"),
                DriverStatus::Busy,
                DriverStatus::Available,
                Some(&RideId::new("r1")),
            )
            .await
            .unwrap();

        assert_eq!(store.status_of(&DriverId::new("d1")), Some(DriverStatus::Busy));
        let envelope = events.recv().await.unwrap();
        assert_eq!(envelope.routing_key, "driver.status.d1");
        assert_matches!(
            envelope.event,
            DispatchEvent::DriverStatusChanged { status: DriverStatus::Busy, ride_id: Some(_), .. }
        );
    }

    #[tokio::test]
    async fn test_unknown_driver_is_not_found() {
        let reconciler = StatusReconciler::new(
            Arc::new(InMemoryDriverStore::new()),
            Arc::new(BroadcastPublisher::default()),
        );
        assert_matches!(
            reconciler
                .transition(&DriverId::new("ghost"), DriverStatus::Available, DriverStatus::Busy)
                .await,
            Err(DispatchError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let mut store = MockDriverStore::new();
        store
            .expect_compare_and_set_status()
            .returning(|_, _, _| Err(StoreError::Database("timeout".into())));
        let reconciler = StatusReconciler::new(Arc::new(store), Arc::new(BroadcastPublisher::default()));

        assert_matches!(
            reconciler
                .transition(&DriverId::new("d1"), DriverStatus::Busy, DriverStatus::Available)
                .await,
            Err(DispatchError::Store(_))
        );
    }
}
