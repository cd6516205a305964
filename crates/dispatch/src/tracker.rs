//! Offer tracker
//!
//! Single source of truth for "is this ride still waiting for a driver".
//! A ride is present only while its offers are unresolved, and every removal
//! happens under one lock, so at most one caller ever gets a ride's offers
//! back.

use common::{DriverId, RideId};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::RideOffer;
use crate::protocol::{ExpiryReason, OutboundMessage};
use crate::registry::ConnectionRegistry;

struct TrackedRide {
    offers: Vec<RideOffer>,
    /// Cancelled when the ride leaves the tracker
    timer: CancellationToken,
}

/// Outcome of an acceptance against the tracker
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The caller won; these are all the offers that were outstanding
    Won(Vec<RideOffer>),
    /// The ride is pending but the driver was never offered it
    NotOffered,
    /// Already resolved, expired or unknown
    NotFound,
}

#[derive(Default)]
pub struct OfferTracker {
    rides: Mutex<HashMap<RideId, TrackedRide>>,
}

impl OfferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the offers for `ride_id`, replacing any earlier set.
    ///
    /// Returns the token that is cancelled when this set is resolved or
    /// replaced; the caller ties the ride's timeout to it.
    pub fn track(&self, ride_id: RideId, offers: Vec<RideOffer>) -> CancellationToken {
        let timer = CancellationToken::new();
        let tracked = TrackedRide {
            offers,
            timer: timer.clone(),
        };

        if let Some(previous) = self.rides.lock().insert(ride_id.clone(), tracked) {
            previous.timer.cancel();
            debug!(ride_id = %ride_id, "Replaced outstanding offers");
        }
        timer
    }

    /// Remove and return the offers for `ride_id`. Later calls get `None`.
    pub fn resolve(&self, ride_id: &RideId) -> Option<Vec<RideOffer>> {
        let mut rides = self.rides.lock();
        let tracked = rides.remove(ride_id)?;
        tracked.timer.cancel();
        Some(tracked.offers)
    }

    /// Resolve `ride_id` in favour of `driver_id` if it was offered to them.
    pub fn claim(&self, ride_id: &RideId, driver_id: &DriverId) -> Claim {
        let mut rides = self.rides.lock();
        let Some(tracked) = rides.get(ride_id) else {
            return Claim::NotFound;
        };
        if !tracked.offers.iter().any(|o| &o.driver_id == driver_id) {
            return Claim::NotOffered;
        }

        match rides.remove(ride_id) {
            Some(tracked) => {
                tracked.timer.cancel();
                Claim::Won(tracked.offers)
            }
            None => Claim::NotFound,
        }
    }

    /// Expire the set guarded by `timer` and tell every offeree.
    ///
    /// Does nothing if the set was already resolved or replaced, which is
    /// detected by `timer` having been cancelled under the tracker lock.
    pub fn on_timeout(
        &self,
        ride_id: &RideId,
        timer: &CancellationToken,
        registry: &ConnectionRegistry,
    ) -> Option<Vec<RideOffer>> {
        let offers = {
            let mut rides = self.rides.lock();
            if timer.is_cancelled() {
                return None;
            }
            let tracked = rides.remove(ride_id)?;
            tracked.timer.cancel();
            tracked.offers
        };

        for offer in &offers {
            let message = OutboundMessage::expired(offer, ExpiryReason::Timeout);
            if let Err(e) = registry.send(&offer.driver_id, message) {
                debug!(ride_id = %ride_id, driver_id = %offer.driver_id, %e, "Expiry notice not delivered");
            }
        }
        Some(offers)
    }

    pub fn pending(&self, ride_id: &RideId) -> Option<Vec<RideOffer>> {
        self.rides.lock().get(ride_id).map(|t| t.offers.clone())
    }

    pub fn is_pending(&self, ride_id: &RideId) -> bool {
        self.rides.lock().contains_key(ride_id)
    }

    pub fn pending_count(&self) -> usize {
        self.rides.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AcceptAnyToken;
    use crate::domain::{NearbyDriver, RideRequest};
    use crate::protocol::ChannelFrame;
    use crate::registry::RegistryConfig;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use common::{GeoPoint, Location, VehicleType};
    use std::sync::Arc;

    fn offers_for(ride: &str, drivers: &[&str]) -> Vec<RideOffer> {
        let request = RideRequest {
            ride_id: RideId::new(ride),
            ride_number: format!("RIDE_{}", ride),
            pickup_location: Location::new(43.0, 76.0, "A"),
            destination_location: Location::new(43.1, 76.1, "B"),
            ride_type: VehicleType::Economy,
            estimated_fare: 1000.0,
            max_distance_km: 5.0,
            timeout_seconds: 0,
            correlation_id: String::new(),
        };
        drivers
            .iter()
            .map(|d| {
                let candidate = NearbyDriver {
                    driver_id: DriverId::new(*d),
                    vehicle_type: VehicleType::Economy,
                    rating: 5.0,
                    location: GeoPoint {
                        latitude: 43.0,
                        longitude: 76.0,
                    },
                    distance_km: 0.5,
                };
                RideOffer::new(&request, &candidate, 0.8, Utc::now())
            })
            .collect()
    }

    #[test]
    fn test_resolve_returns_set_once() {
        let tracker = OfferTracker::new();
        let ride = RideId::new("r1");
        let timer = tracker.track(ride.clone(), offers_for("r1", &["a", "b"]));

        let offers = tracker.resolve(&ride).unwrap();
        assert_eq!(offers.len(), 2);
        assert!(timer.is_cancelled());
        assert!(tracker.resolve(&ride).is_none());
        assert!(!tracker.is_pending(&ride));
    }

    #[test]
    fn test_track_replaces_previous_set() {
        let tracker = OfferTracker::new();
        let ride = RideId::new("r1");
        let first = tracker.track(ride.clone(), offers_for("r1", &["a"]));
        let second = tracker.track(ride.clone(), offers_for("r1", &["b", "c"]));

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(tracker.pending(&ride).map(|o| o.len()), Some(2));
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn test_claim_rules() {
        let tracker = OfferTracker::new();
        let ride = RideId::new("r1");
        tracker.track(ride.clone(), offers_for("r1", &["a", "b"]));

        assert_eq!(tracker.claim(&ride, &DriverId::new("stranger")), Claim::NotOffered);
        assert!(tracker.is_pending(&ride));

        assert_matches!(tracker.claim(&ride, &DriverId::new("b")), Claim::Won(offers) if offers.len() == 2);
        assert_eq!(tracker.claim(&ride, &DriverId::new("a")), Claim::NotFound);
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let tracker = Arc::new(OfferTracker::new());
        let ride = RideId::new("r1");
        let drivers: Vec<String> = (0..16).map(|i| format!("d{}", i)).collect();
        let refs: Vec<&str> = drivers.iter().map(String::as_str).collect();
        tracker.track(ride.clone(), offers_for("r1", &refs));

        let handles: Vec<_> = drivers
            .iter()
            .map(|d| {
                let tracker = Arc::clone(&tracker);
                let ride = ride.clone();
                let driver = DriverId::new(d.clone());
                std::thread::spawn(move || tracker.claim(&ride, &driver))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|c| matches!(c, Claim::Won(_)))
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_timeout_notifies_every_offeree() {
        let registry = Arc::new(ConnectionRegistry::new(
            RegistryConfig::default(),
            Arc::new(AcceptAnyToken),
        ));
        let mut handles = Vec::new();
        for d in ["a", "b"] {
            let mut handle = registry.register(DriverId::new(d));
            registry
                .authenticate(&DriverId::new(d), handle.conn_id, "t")
                .await
                .unwrap();
            let _ = handle.outbound.recv().await;
            handles.push(handle);
        }

        let tracker = OfferTracker::new();
        let ride = RideId::new("r1");
        let timer = tracker.track(ride.clone(), offers_for("r1", &["a", "b"]));

        let expired = tracker.on_timeout(&ride, &timer, &registry).unwrap();
        assert_eq!(expired.len(), 2);
        assert!(!tracker.is_pending(&ride));

        for handle in handles.iter_mut() {
            assert_matches!(
                handle.outbound.recv().await,
                Some(ChannelFrame::Message(OutboundMessage::OfferExpired {
                    reason: ExpiryReason::Timeout,
                    ..
                }))
            );
        }

        assert!(tracker.on_timeout(&ride, &timer, &registry).is_none());
    }

    #[test]
    fn test_stale_timer_does_not_expire_replacement() {
        let registry = ConnectionRegistry::new(RegistryConfig::default(), Arc::new(AcceptAnyToken));
        let tracker = OfferTracker::new();
        let ride = RideId::new("r1");
        let stale = tracker.track(ride.clone(), offers_for("r1", &["a"]));
        tracker.track(ride.clone(), offers_for("r1", &["b"]));

        assert!(tracker.on_timeout(&ride, &stale, &registry).is_none());
        assert!(tracker.is_pending(&ride));
    }

    #[test]
    fn test_resolved_timer_never_expires_next_set() {
        let registry = Arc::new(ConnectionRegistry::new(
            RegistryConfig::default(),
            Arc::new(AcceptAnyToken),
        ));
        let tracker = Arc::new(OfferTracker::new());
        let ride = RideId::new("r1");

        for _ in 0..500 {
            let stale = tracker.track(ride.clone(), offers_for("r1", &["a"]));

            let resolver = {
                let tracker = Arc::clone(&tracker);
                let ride = ride.clone();
                std::thread::spawn(move || tracker.resolve(&ride))
            };

            // Re-track as soon as the ride is gone, then let the old timer fire.
            while tracker.is_pending(&ride) {
                std::hint::spin_loop();
            }
            tracker.track(ride.clone(), offers_for("r1", &["b"]));
            assert!(tracker.on_timeout(&ride, &stale, &registry).is_none());
            assert!(tracker.is_pending(&ride));

            assert!(resolver.join().unwrap().is_some());
            tracker.resolve(&ride);
        }
    }
}
