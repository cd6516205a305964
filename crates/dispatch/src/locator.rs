//! Geospatial driver locator

use common::{GeoPoint, VehicleType};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::domain::NearbyDriver;
use crate::error::{DispatchError, Result};
use crate::store::{DriverStore, NearbyQuery};

/// Ranks available drivers around a pickup point
#[derive(Clone)]
pub struct DriverLocator {
    store: Arc<dyn DriverStore>,
}

impl DriverLocator {
    pub fn new(store: Arc<dyn DriverStore>) -> Self {
        Self { store }
    }

    /// Available drivers within `radius_meters` of the pickup, nearest first.
    ///
    /// Equal distances are ordered by rating, highest first. An empty list is
    /// a normal result.
    pub async fn find_nearby(
        &self,
        pickup_lat: f64,
        pickup_lng: f64,
        vehicle_type: Option<VehicleType>,
        radius_meters: f64,
        limit: usize,
    ) -> Result<Vec<NearbyDriver>> {
        let center = GeoPoint::new(pickup_lat, pickup_lng)?;
        if !(radius_meters.is_finite() && radius_meters > 0.0) {
            return Err(DispatchError::validation(format!(
                "radius must be positive, got {}",
                radius_meters
            )));
        }
        if limit == 0 {
            return Err(DispatchError::validation("limit must be positive"));
        }

        let query = NearbyQuery {
            center,
            vehicle_type,
            radius_meters,
            limit,
        };
        let mut drivers = self.store.find_available_near(&query).await?;

        // Stable re-rank; backends may order ties differently.
        drivers.sort_by(rank);
        drivers.truncate(limit);

        debug!(
            lat = pickup_lat,
            lng = pickup_lng,
            radius_m = radius_meters,
            found = drivers.len(),
            "Located drivers"
        );
        Ok(drivers)
    }
}

fn rank(a: &NearbyDriver, b: &NearbyDriver) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| b.rating.total_cmp(&a.rating))
}
