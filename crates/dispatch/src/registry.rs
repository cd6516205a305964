//! Connection registry
//!
//! Tracks which drivers hold a live, authenticated channel and owns the only
//! path for pushing frames to them. A driver has at most one connection; a
//! new `register` supersedes the old one.
//!
//! Outbound frames go through a bounded queue per connection. Enqueueing
//! never waits: when the queue is full or the session is gone, the
//! connection is closed and removed.

use chrono::{DateTime, Utc};
use common::DriverId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::domain::RideOffer;
use crate::error::{DispatchError, Result};
use crate::protocol::{ChannelFrame, OutboundMessage};

pub type ConnectionId = u64;

/// Timing and sizing knobs for driver connections
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub auth_timeout: Duration,
    pub location_update_interval: Duration,
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::from(&config::ConnectionConfig::default())
    }
}

impl From<&config::ConnectionConfig> for RegistryConfig {
    fn from(c: &config::ConnectionConfig) -> Self {
        Self {
            auth_timeout: c.auth_timeout(),
            location_update_interval: c.location_update_interval(),
            ping_interval: c.ping_interval(),
            read_timeout: c.read_timeout(),
            queue_capacity: c.outbound_queue_capacity.max(1),
        }
    }
}

struct DriverConnection {
    conn_id: ConnectionId,
    sender: mpsc::Sender<ChannelFrame>,
    closer: CancellationToken,
    authenticated: bool,
    auth_deadline: Option<Instant>,
    last_activity: Instant,
    connected_at: DateTime<Utc>,
}

impl DriverConnection {
    fn close(&self) {
        self.closer.cancel();
    }
}

/// The session side of a registered connection
pub struct ConnectionHandle {
    pub driver_id: DriverId,
    pub conn_id: ConnectionId,
    /// Frames to write to the socket
    pub outbound: mpsc::Receiver<ChannelFrame>,
    /// Cancelled when the registry drops this connection
    pub closed: CancellationToken,
}

/// Point-in-time view of a connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub driver_id: DriverId,
    pub conn_id: ConnectionId,
    pub authenticated: bool,
    pub connected_at: DateTime<Utc>,
    pub idle_seconds: u64,
}

/// Result of one keep-alive sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub closed: usize,
}

pub struct ConnectionRegistry {
    connections: Mutex<HashMap<DriverId, DriverConnection>>,
    last_location: Mutex<HashMap<DriverId, Instant>>,
    next_conn_id: AtomicU64,
    authenticator: Arc<dyn Authenticator>,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            last_location: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            authenticator,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a fresh, unauthenticated connection for `driver_id`.
    ///
    /// Any existing connection for the driver is closed. The connection is
    /// dropped if it has not authenticated within the auth timeout.
    pub fn register(self: &Arc<Self>, driver_id: DriverId) -> ConnectionHandle {
        let (sender, outbound) = mpsc::channel(self.config.queue_capacity);
        let closer = CancellationToken::new();
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let connection = DriverConnection {
            conn_id,
            sender,
            closer: closer.clone(),
            authenticated: false,
            auth_deadline: Some(now + self.config.auth_timeout),
            last_activity: now,
            connected_at: Utc::now(),
        };

        if let Some(previous) = self.connections.lock().insert(driver_id.clone(), connection) {
            info!(driver_id = %driver_id, old_conn = previous.conn_id, new_conn = conn_id, "Replacing driver connection");
            previous.close();
        }
        debug!(driver_id = %driver_id, conn_id, "Driver connection registered");

        let registry = Arc::clone(self);
        let watched = closer.clone();
        let timeout = self.config.auth_timeout;
        let driver = driver_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watched.cancelled() => {}
                _ = tokio::time::sleep(timeout) => registry.expire_unauthenticated(&driver, conn_id),
            }
        });

        ConnectionHandle {
            driver_id,
            conn_id,
            outbound,
            closed: closer,
        }
    }

    fn expire_unauthenticated(&self, driver_id: &DriverId, conn_id: ConnectionId) {
        let mut connections = self.connections.lock();
        let expired = connections
            .get(driver_id)
            .is_some_and(|c| c.conn_id == conn_id && !c.authenticated);
        if expired {
            self.remove_locked(&mut connections, driver_id);
            warn!(driver_id = %driver_id, conn_id, "Driver did not authenticate in time");
        }
    }

    /// Verify the credential for the connection `conn_id`.
    ///
    /// On success the connection becomes eligible for offers and an
    /// `auth_success` frame is queued. On failure it is closed and removed.
    pub async fn authenticate(
        &self,
        driver_id: &DriverId,
        conn_id: ConnectionId,
        token: &str,
    ) -> Result<()> {
        let verified = self.authenticator.verify(driver_id, token).await;

        let mut connections = self.connections.lock();
        let Some(conn) = connections.get_mut(driver_id).filter(|c| c.conn_id == conn_id) else {
            return Err(DispatchError::NotConnected(driver_id.clone()));
        };

        let in_time = conn.auth_deadline.map_or(true, |deadline| Instant::now() <= deadline);
        if !(verified && in_time) {
            self.remove_locked(&mut connections, driver_id);
            warn!(driver_id = %driver_id, conn_id, in_time, "Driver authentication failed");
            return Err(DispatchError::AuthenticationFailed(driver_id.clone()));
        }

        conn.authenticated = true;
        conn.auth_deadline = None;
        conn.last_activity = Instant::now();
        info!(driver_id = %driver_id, conn_id, "Driver authenticated");

        self.enqueue(&mut connections, driver_id, ChannelFrame::Message(OutboundMessage::AuthSuccess))
    }

    /// Registered and authenticated
    pub fn is_connected(&self, driver_id: &DriverId) -> bool {
        self.connections
            .lock()
            .get(driver_id)
            .is_some_and(|c| c.authenticated)
    }

    pub fn is_authenticated(&self, driver_id: &DriverId, conn_id: ConnectionId) -> bool {
        self.connections
            .lock()
            .get(driver_id)
            .is_some_and(|c| c.conn_id == conn_id && c.authenticated)
    }

    pub fn send_offer(&self, driver_id: &DriverId, offer: &RideOffer) -> Result<()> {
        self.send(driver_id, OutboundMessage::offer(offer))
    }

    /// Queue a message for an authenticated driver without waiting.
    pub fn send(&self, driver_id: &DriverId, message: OutboundMessage) -> Result<()> {
        let mut connections = self.connections.lock();
        if !connections.get(driver_id).is_some_and(|c| c.authenticated) {
            return Err(DispatchError::NotConnected(driver_id.clone()));
        }
        self.enqueue(&mut connections, driver_id, ChannelFrame::Message(message))
    }

    fn enqueue(
        &self,
        connections: &mut HashMap<DriverId, DriverConnection>,
        driver_id: &DriverId,
        frame: ChannelFrame,
    ) -> Result<()> {
        let Some(conn) = connections.get(driver_id) else {
            return Err(DispatchError::NotConnected(driver_id.clone()));
        };

        match conn.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                let reason = match e {
                    TrySendError::Full(_) => "queue full",
                    TrySendError::Closed(_) => "session gone",
                };
                self.remove_locked(connections, driver_id);
                warn!(driver_id = %driver_id, reason, "Dropping driver connection on send failure");
                Err(DispatchError::SendFailed(driver_id.clone()))
            }
        }
    }

    /// Close and remove the connection together with its throttle state.
    ///
    /// Lock order is `connections` then `last_location`.
    fn remove_locked(
        &self,
        connections: &mut HashMap<DriverId, DriverConnection>,
        driver_id: &DriverId,
    ) -> Option<DriverConnection> {
        let conn = connections.remove(driver_id)?;
        conn.close();
        self.last_location.lock().remove(driver_id);
        Some(conn)
    }

    /// Note inbound traffic on `conn_id`
    pub fn touch(&self, driver_id: &DriverId, conn_id: ConnectionId) {
        if let Some(conn) = self
            .connections
            .lock()
            .get_mut(driver_id)
            .filter(|c| c.conn_id == conn_id)
        {
            conn.last_activity = Instant::now();
        }
    }

    /// Remove the connection if it is still `conn_id`. Returns whether it was.
    pub fn disconnect(&self, driver_id: &DriverId, conn_id: ConnectionId) -> bool {
        let mut connections = self.connections.lock();
        let current = connections
            .get(driver_id)
            .is_some_and(|c| c.conn_id == conn_id);
        if !current {
            return false;
        }
        self.remove_locked(&mut connections, driver_id);
        drop(connections);

        info!(driver_id = %driver_id, conn_id, "Driver disconnected");
        true
    }

    /// Per-driver location throttle.
    ///
    /// An update is due when the last recorded one is at least one interval
    /// old. Checking does not move the window; see [`mark_location`](Self::mark_location).
    pub fn location_due(&self, driver_id: &DriverId) -> bool {
        let now = Instant::now();
        self.last_location
            .lock()
            .get(driver_id)
            .map_or(true, |prev| {
                now.saturating_duration_since(*prev) >= self.config.location_update_interval
            })
    }

    /// Start a new throttle window once an update has been stored
    pub fn mark_location(&self, driver_id: &DriverId) {
        self.last_location.lock().insert(driver_id.clone(), Instant::now());
    }

    /// Ping every live connection and close the ones idle past the read timeout.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let mut report = SweepReport::default();
        let mut connections = self.connections.lock();

        let stale: Vec<DriverId> = connections
            .iter()
            .filter(|(_, c)| {
                now.saturating_duration_since(c.last_activity) > self.config.read_timeout
                    || c.auth_deadline.is_some_and(|d| now > d)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for driver_id in stale {
            if let Some(conn) = self.remove_locked(&mut connections, &driver_id) {
                report.closed += 1;
                info!(driver_id = %driver_id, conn_id = conn.conn_id, "Closing idle driver connection");
            }
        }

        let ids: Vec<DriverId> = connections.keys().cloned().collect();
        for driver_id in ids {
            match self.enqueue(&mut connections, &driver_id, ChannelFrame::Ping) {
                Ok(()) => report.pinged += 1,
                Err(_) => report.closed += 1,
            }
        }

        report
    }

    /// Run [`sweep`](Self::sweep) every ping interval until `shutdown`.
    pub fn spawn_keepalive(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = self.config.ping_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = registry.sweep();
                        if report.closed > 0 {
                            debug!(pinged = report.pinged, closed = report.closed, "Keep-alive sweep");
                        }
                    }
                }
            }
            registry.close_all();
        })
    }

    /// Close every connection, e.g. at shutdown
    pub fn close_all(&self) {
        let drained: Vec<DriverConnection> = {
            let mut connections = self.connections.lock();
            let drained = connections.drain().map(|(_, c)| c).collect();
            self.last_location.lock().clear();
            drained
        };
        for conn in &drained {
            conn.close();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Closed all driver connections");
        }
    }

    pub fn connection(&self, driver_id: &DriverId) -> Option<ConnectionSnapshot> {
        let now = Instant::now();
        self.connections.lock().get(driver_id).map(|c| ConnectionSnapshot {
            driver_id: driver_id.clone(),
            conn_id: c.conn_id,
            authenticated: c.authenticated,
            connected_at: c.connected_at,
            idle_seconds: now.saturating_duration_since(c.last_activity).as_secs(),
        })
    }

    pub fn connected_count(&self) -> usize {
        self.connections
            .lock()
            .values()
            .filter(|c| c.authenticated)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AcceptAnyToken, StaticTokenAuthenticator};
    use assert_matches::assert_matches;

    fn registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(
            RegistryConfig::default(),
            Arc::new(AcceptAnyToken),
        ))
    }

    fn driver(id: &str) -> DriverId {
        DriverId::new(id)
    }

    #[tokio::test]
    async fn test_authenticated_connection_receives_auth_success() {
        let registry = registry();
        let mut handle = registry.register(driver("d1"));
        assert!(!registry.is_connected(&driver("d1")));

        registry
            .authenticate(&driver("d1"), handle.conn_id, "token")
            .await
            .unwrap();
        assert!(registry.is_connected(&driver("d1")));
        assert_eq!(
            handle.outbound.recv().await,
            Some(ChannelFrame::Message(OutboundMessage::AuthSuccess))
        );
        assert_eq!(registry.connected_count(), 1);
    }

    #[tokio::test]
    async fn test_unauthenticated_driver_cannot_receive() {
        let registry = registry();
        let _handle = registry.register(driver("d1"));

        assert_matches!(
            registry.send(&driver("d1"), OutboundMessage::AuthSuccess),
            Err(DispatchError::NotConnected(_))
        );
        assert_matches!(
            registry.send(&driver("nobody"), OutboundMessage::AuthSuccess),
            Err(DispatchError::NotConnected(_))
        );
    }

    #[tokio::test]
    async fn test_bad_credential_closes_connection() {
        let registry = Arc::new(ConnectionRegistry::new(
            RegistryConfig::default(),
            Arc::new(StaticTokenAuthenticator::new().with_token("d1", "secret")),
        ));
        let handle = registry.register(driver("d1"));

        assert_matches!(
            registry.authenticate(&driver("d1"), handle.conn_id, "wrong").await,
            Err(DispatchError::AuthenticationFailed(_))
        );
        assert!(handle.closed.is_cancelled());
        assert!(registry.connection(&driver("d1")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_deadline_closes_silent_connection() {
        let registry = registry();
        let handle = registry.register(driver("d1"));

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(handle.closed.is_cancelled());
        assert!(registry.connection(&driver("d1")).is_none());
        assert_matches!(
            registry.authenticate(&driver("d1"), handle.conn_id, "late").await,
            Err(DispatchError::NotConnected(_))
        );
    }

    #[tokio::test]
    async fn test_last_connection_wins() {
        let registry = registry();
        let first = registry.register(driver("d1"));
        let second = registry.register(driver("d1"));

        assert!(first.closed.is_cancelled());
        assert!(!second.closed.is_cancelled());

        // The superseded session's teardown must not remove its replacement.
        assert!(!registry.disconnect(&driver("d1"), first.conn_id));
        assert_eq!(
            registry.connection(&driver("d1")).map(|c| c.conn_id),
            Some(second.conn_id)
        );
        assert!(registry.disconnect(&driver("d1"), second.conn_id));
        assert!(second.closed.is_cancelled());
    }

    #[tokio::test]
    async fn test_full_queue_closes_connection() {
        let config = RegistryConfig {
            queue_capacity: 1,
            ..RegistryConfig::default()
        };
        let registry = Arc::new(ConnectionRegistry::new(config, Arc::new(AcceptAnyToken)));
        let handle = registry.register(driver("d1"));

        // auth_success occupies the only slot
        registry
            .authenticate(&driver("d1"), handle.conn_id, "t")
            .await
            .unwrap();
        assert_matches!(
            registry.send(&driver("d1"), OutboundMessage::AuthSuccess),
            Err(DispatchError::SendFailed(_))
        );
        assert!(handle.closed.is_cancelled());
        assert!(!registry.is_connected(&driver("d1")));
    }

    /// Check and record in one step, as the location path does on success
    fn accept(registry: &ConnectionRegistry, id: &DriverId) -> bool {
        let due = registry.location_due(id);
        if due {
            registry.mark_location(id);
        }
        due
    }

    fn throttled(registry: &ConnectionRegistry, id: &str) -> bool {
        registry.last_location.lock().contains_key(&driver(id))
    }

    #[tokio::test]
    async fn test_send_failure_clears_location_throttle() {
        let config = RegistryConfig {
            queue_capacity: 1,
            ..RegistryConfig::default()
        };
        let registry = Arc::new(ConnectionRegistry::new(config, Arc::new(AcceptAnyToken)));
        let handle = registry.register(driver("d1"));
        registry
            .authenticate(&driver("d1"), handle.conn_id, "t")
            .await
            .unwrap();
        assert!(accept(&registry, &driver("d1")));

        assert!(registry.send(&driver("d1"), OutboundMessage::AuthSuccess).is_err());
        assert!(!throttled(&registry, "d1"));
        // The session's own teardown finds nothing left to remove.
        assert!(!registry.disconnect(&driver("d1"), handle.conn_id));

        let next = registry.register(driver("d1"));
        registry
            .authenticate(&driver("d1"), next.conn_id, "t")
            .await
            .unwrap();
        assert!(accept(&registry, &driver("d1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_and_close_all_clear_location_throttle() {
        let registry = registry();
        let idle = registry.register(driver("idle"));
        let active = registry.register(driver("active"));
        registry.authenticate(&driver("idle"), idle.conn_id, "t").await.unwrap();
        registry.authenticate(&driver("active"), active.conn_id, "t").await.unwrap();
        assert!(accept(&registry, &driver("idle")));
        assert!(accept(&registry, &driver("active")));

        tokio::time::advance(Duration::from_secs(61)).await;
        registry.touch(&driver("active"), active.conn_id);
        registry.sweep();
        assert!(!throttled(&registry, "idle"));
        assert!(throttled(&registry, "active"));

        registry.close_all();
        assert!(!throttled(&registry, "active"));
        assert!(active.closed.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_deadline_clears_location_throttle() {
        let registry = registry();
        let _handle = registry.register(driver("d1"));
        assert!(accept(&registry, &driver("d1")));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(registry.connection(&driver("d1")).is_none());
        assert!(!throttled(&registry, "d1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_updates_inside_interval_are_dropped() {
        let registry = registry();
        let d = driver("d1");

        assert!(accept(&registry, &d));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!accept(&registry, &d));
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_updates_after_interval_are_accepted() {
        let registry = registry();
        let d = driver("d1");

        assert!(accept(&registry, &d));
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(accept(&registry, &d));
        assert!(accept(&registry, &driver("d2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_pings_active_and_closes_idle() {
        let registry = registry();
        let mut active = registry.register(driver("active"));
        let idle = registry.register(driver("idle"));
        registry.authenticate(&driver("active"), active.conn_id, "t").await.unwrap();
        registry.authenticate(&driver("idle"), idle.conn_id, "t").await.unwrap();
        let _ = active.outbound.recv().await;

        tokio::time::advance(Duration::from_secs(45)).await;
        registry.touch(&driver("active"), active.conn_id);
        tokio::time::advance(Duration::from_secs(20)).await;

        let report = registry.sweep();
        assert_eq!(report, SweepReport { pinged: 1, closed: 1 });
        assert!(idle.closed.is_cancelled());
        assert_eq!(active.outbound.recv().await, Some(ChannelFrame::Ping));
    }
}
