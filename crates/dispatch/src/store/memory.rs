//! In-memory driver store
//!
//! Non-persistent; used for development, tests and single-node demos. The
//! whole table sits behind one lock, so a compare-and-set is atomic.

use async_trait::async_trait;
use common::{DriverId, DriverStatus, GeoPoint, VehicleType};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::domain::{Driver, NearbyDriver};
use crate::store::traits::{DriverStore, NearbyQuery, StatusCas, StoreError, StoreResult};

pub struct InMemoryDriverStore {
    drivers: RwLock<HashMap<DriverId, Driver>>,
}

impl InMemoryDriverStore {
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
        }
    }

    /// Build a store from the `store.seed_drivers` config section
    pub fn from_seed(seed: &[config::SeedDriver]) -> StoreResult<Self> {
        let store = Self::new();
        for entry in seed {
            let vehicle_type: VehicleType = entry
                .vehicle_type
                .parse()
                .map_err(|e: common::Error| StoreError::InvalidData(e.to_string()))?;
            let status: DriverStatus = entry
                .status
                .parse()
                .map_err(|e: common::Error| StoreError::InvalidData(e.to_string()))?;
            let location = GeoPoint::new(entry.latitude, entry.longitude)
                .map_err(|e| StoreError::InvalidData(format!("{}: {}", entry.id, e)))?;

            store.insert_driver(Driver {
                id: DriverId::new(entry.id.clone()),
                vehicle_type,
                rating: entry.rating,
                status,
                location: Some(location),
            });
        }
        Ok(store)
    }

    /// Insert or replace a driver
    pub fn insert_driver(&self, driver: Driver) {
        self.drivers.write().insert(driver.id.clone(), driver);
    }

    pub fn status_of(&self, driver_id: &DriverId) -> Option<DriverStatus> {
        self.drivers.read().get(driver_id).map(|d| d.status)
    }

    pub fn len(&self) -> usize {
        self.drivers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.read().is_empty()
    }
}

impl Default for InMemoryDriverStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriverStore for InMemoryDriverStore {
    async fn find_available_near(&self, query: &NearbyQuery) -> StoreResult<Vec<NearbyDriver>> {
        let drivers = self.drivers.read();

        let mut found: Vec<NearbyDriver> = drivers
            .values()
            .filter(|d| d.status == DriverStatus::Available)
            .filter(|d| query.vehicle_type.map_or(true, |vt| vt == d.vehicle_type))
            .filter_map(|d| {
                let location = d.location?;
                let meters = query.center.distance_meters(&location);
                (meters <= query.radius_meters).then(|| NearbyDriver {
                    driver_id: d.id.clone(),
                    vehicle_type: d.vehicle_type,
                    rating: d.rating,
                    location,
                    distance_km: meters / 1000.0,
                })
            })
            .collect();

        found.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| b.rating.total_cmp(&a.rating))
        });
        found.truncate(query.limit);

        debug!(count = found.len(), radius_m = query.radius_meters, "Nearby drivers");
        Ok(found)
    }

    async fn get_driver(&self, driver_id: &DriverId) -> StoreResult<Option<Driver>> {
        Ok(self.drivers.read().get(driver_id).cloned())
    }

    async fn compare_and_set_status(
        &self,
        driver_id: &DriverId,
        expected: DriverStatus,
        new: DriverStatus,
    ) -> StoreResult<StatusCas> {
        let mut drivers = self.drivers.write();
        let Some(driver) = drivers.get_mut(driver_id) else {
            return Ok(StatusCas::NotFound);
        };

        if driver.status != expected {
            return Ok(StatusCas::Mismatch(driver.status));
        }
        driver.status = new;
        Ok(StatusCas::Applied)
    }

    async fn record_location(&self, driver_id: &DriverId, point: GeoPoint) -> StoreResult<()> {
        let mut drivers = self.drivers.write();
        match drivers.get_mut(driver_id) {
            Some(driver) => {
                driver.location = Some(point);
                Ok(())
            }
            None => Err(StoreError::DriverNotFound(driver_id.clone())),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
