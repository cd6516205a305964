//! Driver WebSocket sessions
//!
//! One task per socket at `/ws/drivers/{driver_id}`. The session registers
//! with the connection registry, writes whatever the registry queues for it
//! and feeds inbound frames to the coordinator. A connection must send
//! `auth` before anything else.

use async_trait::async_trait;
use common::DriverId;
use futures::{SinkExt, StreamExt};
use server::{Session, SessionHandler};
use std::ops::ControlFlow;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::coordinator::MatchingCoordinator;
use crate::protocol::{ChannelFrame, InboundMessage};
use crate::registry::ConnectionId;

pub const DRIVER_PATH_PREFIX: &str = "/ws/drivers/";

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Extract the driver id from `/ws/drivers/{driver_id}`
pub fn driver_id_from_path(path: &str) -> Option<String> {
    let id = path.strip_prefix(DRIVER_PATH_PREFIX)?.trim_end_matches('/');
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id.to_string())
}

pub struct DriverSessionHandler {
    coordinator: MatchingCoordinator,
    write_timeout: Duration,
}

impl DriverSessionHandler {
    pub fn new(coordinator: MatchingCoordinator) -> Self {
        Self {
            coordinator,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Apply one inbound text frame. `Break` closes the session.
    async fn handle_text(
        &self,
        driver_id: &DriverId,
        conn_id: ConnectionId,
        text: &str,
    ) -> ControlFlow<&'static str> {
        let registry = self.coordinator.registry();
        let authenticated = registry.is_authenticated(driver_id, conn_id);

        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) if authenticated => {
                warn!(driver_id = %driver_id, %e, "Ignoring malformed driver frame");
                return ControlFlow::Continue(());
            }
            Err(e) => {
                warn!(driver_id = %driver_id, %e, "Malformed frame before authentication");
                return ControlFlow::Break("unauthenticated");
            }
        };

        match message {
            InboundMessage::Auth { .. } if authenticated => {
                debug!(driver_id = %driver_id, "Repeated auth ignored");
            }
            InboundMessage::Auth { token } => {
                if registry.authenticate(driver_id, conn_id, &token).await.is_err() {
                    return ControlFlow::Break("authentication failed");
                }
            }
            other if !authenticated => {
                warn!(driver_id = %driver_id, kind = other.kind(), "Message before authentication");
                return ControlFlow::Break("unauthenticated");
            }
            InboundMessage::RideResponse { ride_id, accepted } => {
                match self
                    .coordinator
                    .handle_driver_response(driver_id, &ride_id, accepted)
                    .await
                {
                    Ok(outcome) => debug!(driver_id = %driver_id, ride_id = %ride_id, ?outcome, "Ride response handled"),
                    Err(e) => warn!(driver_id = %driver_id, ride_id = %ride_id, %e, "Ride response failed"),
                }
            }
            InboundMessage::LocationUpdate { latitude, longitude } => {
                if let Err(e) = self
                    .coordinator
                    .handle_location_update(driver_id, latitude, longitude)
                    .await
                {
                    warn!(driver_id = %driver_id, %e, "Location update rejected");
                }
            }
        }
        ControlFlow::Continue(())
    }
}

#[async_trait]
impl SessionHandler for DriverSessionHandler {
    fn route(&self, path: &str) -> Option<String> {
        driver_id_from_path(path)
    }

    async fn run_session(&self, session: Session) {
        let driver_id = DriverId::new(session.route.clone());
        let registry = std::sync::Arc::clone(self.coordinator.registry());
        let mut handle = registry.register(driver_id.clone());
        let conn_id = handle.conn_id;
        let (mut tx, mut rx) = session.socket.split();

        info!(driver_id = %driver_id, conn_id, peer = %session.peer_addr, "Driver session opened");

        let reason = loop {
            tokio::select! {
                _ = handle.closed.cancelled() => break "closed by registry",
                _ = session.shutdown.cancelled() => break "server shutdown",
                frame = handle.outbound.recv() => {
                    let Some(frame) = frame else { break "outbound queue closed" };
                    let message = match frame {
                        ChannelFrame::Ping => Message::Ping(Vec::new()),
                        ChannelFrame::Message(m) => match m.to_text() {
                            Ok(text) => Message::Text(text),
                            Err(e) => {
                                warn!(driver_id = %driver_id, %e, "Failed to encode outbound frame");
                                continue;
                            }
                        },
                    };
                    match tokio::time::timeout(self.write_timeout, tx.send(message)).await {
                        Ok(Ok(())) => session.metrics.message_sent(),
                        Ok(Err(e)) => {
                            debug!(driver_id = %driver_id, %e, "Write failed");
                            break "write failed";
                        }
                        Err(_) => break "write timeout",
                    }
                }
                inbound = rx.next() => {
                    let message = match inbound {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => {
                            debug!(driver_id = %driver_id, %e, "Read failed");
                            break "read failed";
                        }
                        None => break "peer closed",
                    };
                    registry.touch(&driver_id, conn_id);
                    session.metrics.message_received();

                    match message {
                        Message::Text(text) => {
                            if let ControlFlow::Break(reason) = self.handle_text(&driver_id, conn_id, &text).await {
                                break reason;
                            }
                        }
                        Message::Close(_) => break "peer closed",
                        _ => {}
                    }
                }
            }
        };

        registry.disconnect(&driver_id, conn_id);
        let _ = tokio::time::timeout(self.write_timeout, tx.send(Message::Close(None))).await;
        info!(driver_id = %driver_id, conn_id, reason, "Driver session closed");
    }
}
