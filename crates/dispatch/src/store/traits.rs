//! DriverStore trait definition

use async_trait::async_trait;
use common::{DriverId, DriverStatus, GeoPoint, VehicleType};

use crate::domain::{Driver, NearbyDriver};

/// Errors that can occur in the driver store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Unknown driver: {0}")]
    DriverNotFound(DriverId),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),

    #[error("Store error: {0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Parameters of a proximity search
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyQuery {
    pub center: GeoPoint,
    /// `None` matches every vehicle type
    pub vehicle_type: Option<VehicleType>,
    pub radius_meters: f64,
    pub limit: usize,
}

/// Outcome of a conditional status update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCas {
    Applied,
    /// The stored status differed from the expected one and was left alone
    Mismatch(DriverStatus),
    NotFound,
}

/// Storage collaborator for drivers and their positions
///
/// Status is only ever changed through
/// [`compare_and_set_status`](DriverStore::compare_and_set_status).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DriverStore: Send + Sync {
    /// AVAILABLE drivers within the radius, nearest first, rating descending
    /// on ties, at most `limit` rows
    async fn find_available_near(&self, query: &NearbyQuery) -> StoreResult<Vec<NearbyDriver>>;

    async fn get_driver(&self, driver_id: &DriverId) -> StoreResult<Option<Driver>>;

    /// Set `new` iff the current status equals `expected`
    async fn compare_and_set_status(
        &self,
        driver_id: &DriverId,
        expected: DriverStatus,
        new: DriverStatus,
    ) -> StoreResult<StatusCas>;

    /// Make `point` the driver's current position
    async fn record_location(&self, driver_id: &DriverId, point: GeoPoint) -> StoreResult<()>;

    /// Cheap connectivity probe for health reporting
    async fn ping(&self) -> StoreResult<()>;
}
