//! Domain types for driver matching
//!
//! A [`RideRequest`] comes in from the ride service. The locator turns it
//! into [`NearbyDriver`] candidates and the coordinator mints one
//! [`RideOffer`] per connected candidate.

use chrono::{DateTime, Utc};
use common::{DriverId, DriverStatus, GeoPoint, Location, OfferId, RideId, VehicleType};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// A ride waiting for a driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub ride_id: RideId,
    pub ride_number: String,
    pub pickup_location: Location,
    pub destination_location: Location,
    pub ride_type: VehicleType,
    pub estimated_fare: f64,
    /// Search radius; zero falls back to the configured default
    #[serde(default)]
    pub max_distance_km: f64,
    /// Upper bound on the offer window; zero means "use the configured window"
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub correlation_id: String,
}

impl RideRequest {
    pub fn validate(&self) -> Result<()> {
        if self.ride_id.as_str().trim().is_empty() {
            return Err(DispatchError::validation("ride_id is required"));
        }
        self.pickup_location.validate()?;
        self.destination_location.validate()?;
        if !self.estimated_fare.is_finite() || self.estimated_fare < 0.0 {
            return Err(DispatchError::validation(format!(
                "estimated_fare must be a non-negative number, got {}",
                self.estimated_fare
            )));
        }
        if !self.max_distance_km.is_finite() || self.max_distance_km < 0.0 {
            return Err(DispatchError::validation(format!(
                "max_distance_km must be non-negative, got {}",
                self.max_distance_km
            )));
        }
        Ok(())
    }
}

/// A driver as known to the driver store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub vehicle_type: VehicleType,
    pub rating: f64,
    pub status: DriverStatus,
    /// Last recorded position, if any
    pub location: Option<GeoPoint>,
}

/// A locator result: an available driver and its distance to the pickup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyDriver {
    pub driver_id: DriverId,
    pub vehicle_type: VehicleType,
    pub rating: f64,
    pub location: GeoPoint,
    pub distance_km: f64,
}

/// One offer of one ride to one driver. Immutable once minted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideOffer {
    pub offer_id: OfferId,
    pub ride_id: RideId,
    pub ride_number: String,
    pub driver_id: DriverId,
    pub pickup_location: Location,
    pub destination_location: Location,
    pub ride_type: VehicleType,
    pub estimated_fare: f64,
    /// Fixed when the offer is minted
    pub driver_earnings: f64,
    pub distance_to_pickup_km: f64,
    pub expires_at: DateTime<Utc>,
    pub correlation_id: String,
}

impl RideOffer {
    pub fn new(
        request: &RideRequest,
        candidate: &NearbyDriver,
        earnings_share: f64,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            offer_id: OfferId::new(),
            ride_id: request.ride_id.clone(),
            ride_number: request.ride_number.clone(),
            driver_id: candidate.driver_id.clone(),
            pickup_location: request.pickup_location.clone(),
            destination_location: request.destination_location.clone(),
            ride_type: request.ride_type,
            estimated_fare: request.estimated_fare,
            driver_earnings: round_cents(request.estimated_fare * earnings_share),
            distance_to_pickup_km: round_cents(candidate.distance_km),
            expires_at,
            correlation_id: request.correlation_id.clone(),
        }
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Where a matching attempt stands once the coordinator hands it back
///
/// Locating and offering happen inside a single request and are never
/// observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchPhase {
    AwaitingResponse,
    Matched,
    Expired,
    NoDrivers,
}

/// Result of handing a ride request to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchAttempt {
    pub ride_id: RideId,
    /// `AwaitingResponse` or `NoDrivers`
    pub phase: MatchPhase,
    pub candidates: usize,
    pub offers_sent: usize,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What a driver's `ride_response` amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOutcome {
    /// This driver won the ride
    Matched,
    /// Informational rejection; the ride keeps waiting
    Rejected,
    /// Accepted after the ride was already resolved
    Lost,
    /// Accepted a ride that is pending but was never offered to this driver
    NotOffered,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request(fare: f64) -> RideRequest {
        RideRequest {
            ride_id: RideId::new("ride-1"),
            ride_number: "RIDE_20240101_0001".to_string(),
            pickup_location: Location::new(43.2383, 76.9453, "Abay Ave 10"),
            destination_location: Location::new(43.2567, 76.9286, "Dostyk Plaza"),
            ride_type: VehicleType::Economy,
            estimated_fare: fare,
            max_distance_km: 5.0,
            timeout_seconds: 0,
            correlation_id: "corr-1".to_string(),
        }
    }

    #[test]
    fn test_offer_earnings_are_fixed_share() {
        let candidate = NearbyDriver {
            driver_id: DriverId::new("driver-1"),
            vehicle_type: VehicleType::Economy,
            rating: 4.8,
            location: GeoPoint {
                latitude: 43.24,
                longitude: 76.95,
            },
            distance_km: 1.2345,
        };
        let offer = RideOffer::new(&request(1450.0), &candidate, 0.8, Utc::now());
        assert_eq!(offer.driver_earnings, 1160.0);
        assert_eq!(offer.distance_to_pickup_km, 1.23);
        assert_eq!(offer.driver_id, candidate.driver_id);
    }

    #[test]
    fn test_request_validation() {
        assert!(request(100.0).validate().is_ok());

        let mut bad = request(100.0);
        bad.pickup_location.latitude = 91.0;
        assert_matches!(bad.validate(), Err(DispatchError::Validation(_)));

        let mut bad = request(-1.0);
        bad.estimated_fare = -1.0;
        assert_matches!(bad.validate(), Err(DispatchError::Validation(_)));

        let mut bad = request(100.0);
        bad.ride_id = RideId::new(" ");
        assert_matches!(bad.validate(), Err(DispatchError::Validation(_)));
    }

    #[test]
    fn test_request_defaults_optional_fields() {
        let json = r#"{
            "ride_id": "r-9",
            "ride_number": "RIDE_9",
            "pickup_location": {"latitude": 43.2, "longitude": 76.9},
            "destination_location": {"latitude": 43.3, "longitude": 76.8, "address": "Mall"},
            "ride_type": "PREMIUM",
            "estimated_fare": 2000.0
        }"#;
        let parsed: RideRequest = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.max_distance_km, 0.0);
        assert_eq!(parsed.timeout_seconds, 0);
        assert_eq!(parsed.ride_type, VehicleType::Premium);
        assert!(parsed.pickup_location.address.is_empty());
    }
}
