//! Driver matching and offer coordination for Ride Dispatch
//!
//! Given a ride request, this crate finds nearby available drivers, pushes
//! time-limited offers over their WebSocket channels and settles the race so
//! that exactly one driver wins the ride or the offer window runs out.
//!
//! # Features
//!
//! - Geospatial driver lookup, nearest first
//! - Authenticated driver channels with keep-alive and bounded send queues
//! - First-accept-wins arbitration with a hard offer window
//! - Compare-and-set driver status reconciliation
//! - Rate-limited driver location ingestion
//!
//! # Feature Flags
//!
//! - `postgres` - Enable PostgreSQL/PostGIS driver storage
//! - `api` - Enable HTTP API

pub mod auth;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod locator;
pub mod metrics;
pub mod protocol;
pub mod publisher;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod store;
pub mod tracker;

#[cfg(feature = "api")]
pub mod api;

// Re-export commonly used types
pub use auth::{AcceptAnyToken, Authenticator, StaticTokenAuthenticator};
pub use coordinator::{MatchingCoordinator, MatchingSettings};
pub use domain::{Driver, MatchAttempt, MatchPhase, NearbyDriver, ResponseOutcome, RideOffer, RideRequest};
pub use error::{DispatchError, Result};
pub use locator::DriverLocator;
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use protocol::{ExpiryReason, InboundMessage, OutboundMessage};
pub use publisher::{BroadcastPublisher, DispatchEvent, Envelope, EventPublisher, LogPublisher};
pub use reconciler::StatusReconciler;
pub use registry::{ConnectionRegistry, RegistryConfig};
pub use session::DriverSessionHandler;
pub use tracker::{Claim, OfferTracker};

// Store exports
pub use store::{create_store, DriverStore, InMemoryDriverStore, StoreError, StoreType};

#[cfg(feature = "postgres")]
pub use store::PostgresDriverStore;
