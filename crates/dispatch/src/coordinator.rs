//! Matching coordinator
//!
//! Drives one ride through `LOCATING -> OFFERING -> AWAITING_RESPONSE` and
//! then to exactly one of `MATCHED`, `EXPIRED` or `NO_DRIVERS`. The offer
//! tracker arbitrates between the first accept and the offer window. Each
//! terminal phase is published as a `RideMatchResult` event.

use chrono::Utc;
use common::{DriverId, DriverStatus, GeoPoint, RideId, RideStatus, VehicleType};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{MatchAttempt, MatchPhase, NearbyDriver, RideOffer, RideRequest, ResponseOutcome};
use crate::error::{DispatchError, Result};
use crate::locator::DriverLocator;
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::protocol::{ExpiryReason, OutboundMessage};
use crate::publisher::{DispatchEvent, EventPublisher};
use crate::reconciler::StatusReconciler;
use crate::registry::ConnectionRegistry;
use crate::store::DriverStore;
use crate::tracker::{Claim, OfferTracker};

/// Matching knobs resolved from [`config::MatchingConfig`]
#[derive(Debug, Clone)]
pub struct MatchingSettings {
    pub offer_window: Duration,
    pub candidate_limit: usize,
    pub driver_earnings_share: f64,
    pub default_search_radius_km: f64,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self::from(&config::MatchingConfig::default())
    }
}

impl From<&config::MatchingConfig> for MatchingSettings {
    fn from(c: &config::MatchingConfig) -> Self {
        Self {
            offer_window: c.offer_window(),
            candidate_limit: c.candidate_limit.max(1),
            driver_earnings_share: c.driver_earnings_share,
            default_search_radius_km: c.default_search_radius_km,
        }
    }
}

#[derive(Clone)]
pub struct MatchingCoordinator {
    locator: DriverLocator,
    registry: Arc<ConnectionRegistry>,
    tracker: Arc<OfferTracker>,
    reconciler: StatusReconciler,
    store: Arc<dyn DriverStore>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<DispatchMetrics>,
    settings: MatchingSettings,
}

impl MatchingCoordinator {
    pub fn new(
        store: Arc<dyn DriverStore>,
        registry: Arc<ConnectionRegistry>,
        publisher: Arc<dyn EventPublisher>,
        settings: MatchingSettings,
    ) -> Self {
        Self {
            locator: DriverLocator::new(Arc::clone(&store)),
            reconciler: StatusReconciler::new(Arc::clone(&store), Arc::clone(&publisher)),
            tracker: Arc::new(OfferTracker::new()),
            metrics: Arc::new(DispatchMetrics::new()),
            registry,
            store,
            publisher,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &OfferTracker {
        &self.tracker
    }

    pub fn reconciler(&self) -> &StatusReconciler {
        &self.reconciler
    }

    pub fn settings(&self) -> &MatchingSettings {
        &self.settings
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run a ride request up to `AWAITING_RESPONSE` or `NO_DRIVERS`.
    ///
    /// Only validation and store failures are errors. Having nobody to offer
    /// the ride to is a normal outcome.
    pub async fn handle_ride_request(&self, request: RideRequest) -> Result<MatchAttempt> {
        let started = Instant::now();
        self.metrics.ride_requests.increment();
        request.validate()?;

        let radius_km = if request.max_distance_km > 0.0 {
            request.max_distance_km
        } else {
            self.settings.default_search_radius_km
        };
        let candidates = self
            .locator
            .find_nearby(
                request.pickup_location.latitude,
                request.pickup_location.longitude,
                Some(request.ride_type),
                radius_km * 1000.0,
                self.settings.candidate_limit,
            )
            .await?;
        debug!(ride_id = %request.ride_id, candidates = candidates.len(), radius_km, "Located candidates");

        if candidates.is_empty() {
            return Ok(self.no_drivers(&request, 0).await);
        }

        let window = self.offer_window(&request);
        let expires_at = Utc::now()
            + chrono::Duration::from_std(window).map_err(|e| DispatchError::Internal(e.to_string()))?;

        let offers = self.send_offers(&request, &candidates, expires_at);
        if offers.is_empty() {
            return Ok(self.no_drivers(&request, candidates.len()).await);
        }

        let offers_sent = offers.len();
        self.metrics.offers_sent.add(offers_sent as u64);
        let timer = self.tracker.track(request.ride_id.clone(), offers);
        self.refresh_pending();
        self.spawn_offer_timeout(request.ride_id.clone(), timer, window);
        self.metrics.record_match_latency(started.elapsed());

        info!(
            ride_id = %request.ride_id,
            ride_number = %request.ride_number,
            correlation_id = %request.correlation_id,
            offers_sent,
            window_secs = window.as_secs(),
            "Awaiting driver response"
        );

        Ok(MatchAttempt {
            ride_id: request.ride_id,
            phase: MatchPhase::AwaitingResponse,
            candidates: candidates.len(),
            offers_sent,
            expires_at: Some(expires_at),
        })
    }

    /// The configured window, shortened by a positive request timeout
    fn offer_window(&self, request: &RideRequest) -> Duration {
        match request.timeout_seconds {
            0 => self.settings.offer_window,
            secs => Duration::from_secs(secs).min(self.settings.offer_window),
        }
    }

    fn send_offers(
        &self,
        request: &RideRequest,
        candidates: &[NearbyDriver],
        expires_at: chrono::DateTime<Utc>,
    ) -> Vec<RideOffer> {
        let mut sent = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !self.registry.is_connected(&candidate.driver_id) {
                self.metrics.offers_skipped.increment();
                debug!(ride_id = %request.ride_id, driver_id = %candidate.driver_id, "Candidate not connected");
                continue;
            }

            let offer = RideOffer::new(request, candidate, self.settings.driver_earnings_share, expires_at);
            match self.registry.send_offer(&candidate.driver_id, &offer) {
                Ok(()) => {
                    debug!(
                        ride_id = %request.ride_id,
                        driver_id = %candidate.driver_id,
                        offer_id = %offer.offer_id,
                        distance_km = candidate.distance_km,
                        "Offer sent"
                    );
                    sent.push(offer);
                }
                Err(e) => {
                    self.metrics.offers_skipped.increment();
                    warn!(ride_id = %request.ride_id, driver_id = %candidate.driver_id, %e, "Offer not delivered");
                }
            }
        }
        sent
    }

    async fn no_drivers(&self, request: &RideRequest, candidates: usize) -> MatchAttempt {
        self.metrics.rides_no_drivers.increment();
        info!(ride_id = %request.ride_id, candidates, "No drivers available");
        self.publish_result(&request.ride_id, MatchPhase::NoDrivers, None).await;
        MatchAttempt {
            ride_id: request.ride_id.clone(),
            phase: MatchPhase::NoDrivers,
            candidates,
            offers_sent: 0,
            expires_at: None,
        }
    }

    fn spawn_offer_timeout(&self, ride_id: RideId, timer: CancellationToken, window: Duration) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(window) => coordinator.expire(&ride_id, &timer).await,
            }
        });
    }

    async fn expire(&self, ride_id: &RideId, timer: &CancellationToken) {
        if let Some(offers) = self.tracker.on_timeout(ride_id, timer, &self.registry) {
            self.metrics.rides_expired.increment();
            self.refresh_pending();
            info!(ride_id = %ride_id, offerees = offers.len(), "Offer window expired");
            self.publish_result(ride_id, MatchPhase::Expired, None).await;
        }
    }

    fn refresh_pending(&self) {
        self.metrics
            .pending_rides
            .set(self.tracker.pending_count() as u64);
    }

    /// Apply a driver's `ride_response`.
    ///
    /// Every response is published before arbitration. The first accept from
    /// an offeree wins; later accepts change nothing and rejections never
    /// resolve the ride.
    pub async fn handle_driver_response(
        &self,
        driver_id: &DriverId,
        ride_id: &RideId,
        accepted: bool,
    ) -> Result<ResponseOutcome> {
        self.publish_response(ride_id, driver_id, accepted).await;

        if !accepted {
            self.metrics.rejections.increment();
            info!(ride_id = %ride_id, driver_id = %driver_id, "Driver rejected ride");
            return Ok(ResponseOutcome::Rejected);
        }

        let offers = match self.tracker.claim(ride_id, driver_id) {
            Claim::Won(offers) => offers,
            Claim::NotFound => {
                self.metrics.lost_races.increment();
                info!(ride_id = %ride_id, driver_id = %driver_id, "Acceptance ignored, ride no longer pending");
                return Ok(ResponseOutcome::Lost);
            }
            Claim::NotOffered => {
                warn!(ride_id = %ride_id, driver_id = %driver_id, "Acceptance from driver without an offer");
                return Ok(ResponseOutcome::NotOffered);
            }
        };
        self.metrics.rides_matched.increment();
        self.refresh_pending();

        if let Err(e) = self
            .reconciler
            .transition_for_ride(driver_id, DriverStatus::Busy, DriverStatus::Available, Some(ride_id))
            .await
        {
            if matches!(e, DispatchError::StatusMismatch { .. }) {
                self.metrics.status_conflicts.increment();
            }
            warn!(ride_id = %ride_id, driver_id = %driver_id, %e, "Could not mark driver busy");
        }

        if let Err(e) = self.registry.send(driver_id, OutboundMessage::ride_details(ride_id)) {
            warn!(ride_id = %ride_id, driver_id = %driver_id, %e, "Ride details not delivered");
        }
        for offer in offers.iter().filter(|o| &o.driver_id != driver_id) {
            if let Err(e) = self
                .registry
                .send(&offer.driver_id, OutboundMessage::expired(offer, ExpiryReason::Matched))
            {
                debug!(ride_id = %ride_id, driver_id = %offer.driver_id, %e, "Withdrawal not delivered");
            }
        }

        info!(ride_id = %ride_id, driver_id = %driver_id, offerees = offers.len(), "Ride matched");
        self.publish_result(ride_id, MatchPhase::Matched, Some(driver_id)).await;
        Ok(ResponseOutcome::Matched)
    }

    async fn publish_response(&self, ride_id: &RideId, driver_id: &DriverId, accepted: bool) {
        let event = DispatchEvent::DriverResponse {
            ride_id: ride_id.clone(),
            driver_id: driver_id.clone(),
            accepted,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.publisher.publish(event).await {
            warn!(ride_id = %ride_id, driver_id = %driver_id, %e, "Failed to publish driver response");
        }
    }

    async fn publish_result(&self, ride_id: &RideId, phase: MatchPhase, driver_id: Option<&DriverId>) {
        let event = DispatchEvent::RideMatchResult {
            ride_id: ride_id.clone(),
            phase,
            driver_id: driver_id.cloned(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.publisher.publish(event).await {
            warn!(ride_id = %ride_id, ?phase, %e, "Failed to publish match result");
        }
    }

    /// Free the driver once a ride completes or is cancelled.
    ///
    /// Returns whether the driver went back to `AVAILABLE`. Reconciliation
    /// failures are logged, not returned.
    pub async fn handle_ride_status(
        &self,
        ride_id: &RideId,
        status: RideStatus,
        driver_id: Option<&DriverId>,
    ) -> bool {
        let Some(driver_id) = driver_id.filter(|_| status.is_terminal()) else {
            debug!(ride_id = %ride_id, ?status, "Ride status needs no driver change");
            return false;
        };

        match self
            .reconciler
            .transition_for_ride(driver_id, DriverStatus::Available, DriverStatus::Busy, Some(ride_id))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                if matches!(e, DispatchError::StatusMismatch { .. }) {
                    self.metrics.status_conflicts.increment();
                }
                warn!(ride_id = %ride_id, driver_id = %driver_id, ?status, %e, "Could not release driver");
                false
            }
        }
    }

    /// Record a driver position subject to the per-driver rate limit.
    ///
    /// Returns `Ok(false)` when the update was throttled. Only a stored
    /// update starts a new throttle window.
    pub async fn handle_location_update(
        &self,
        driver_id: &DriverId,
        latitude: f64,
        longitude: f64,
    ) -> Result<bool> {
        let point = GeoPoint::new(latitude, longitude)?;
        if !self.registry.location_due(driver_id) {
            self.metrics.locations_throttled.increment();
            debug!(driver_id = %driver_id, "Location update throttled");
            return Ok(false);
        }

        self.store.record_location(driver_id, point).await?;
        self.registry.mark_location(driver_id);
        self.metrics.locations_accepted.increment();

        let event = DispatchEvent::DriverLocation {
            driver_id: driver_id.clone(),
            location: point,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.publisher.publish(event).await {
            warn!(driver_id = %driver_id, %e, "Failed to publish location");
        }
        Ok(true)
    }

    /// Locator passthrough for the internal API
    pub async fn find_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        vehicle_type: Option<VehicleType>,
        radius_meters: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<NearbyDriver>> {
        let radius = radius_meters.unwrap_or(self.settings.default_search_radius_km * 1000.0);
        let limit = limit.unwrap_or(self.settings.candidate_limit);
        self.locator
            .find_nearby(latitude, longitude, vehicle_type, radius, limit)
            .await
    }

    pub async fn store_healthy(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}
