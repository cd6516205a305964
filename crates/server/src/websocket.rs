//! WebSocket server implementation using Tokio-Tungstenite
//!
//! The server owns the accept loop, the upgrade handshake and connection
//! bookkeeping. What happens on an accepted socket is delegated to a
//! [`SessionHandler`], which also decides which request paths are upgraded.

use async_trait::async_trait;
use observability::ServerMetrics;
use parking_lot::RwLock as SyncRwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::traits::Server;

/// A unique identifier for each WebSocket connection
pub type ConnectionId = u64;

/// Information about an active WebSocket connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    /// Route key returned by [`SessionHandler::route`]
    pub route: String,
    pub connected_at: Instant,
}

/// An upgraded connection handed to a [`SessionHandler`]
pub struct Session {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub route: String,
    pub socket: WebSocketStream<TcpStream>,
    /// Cancelled when the server shuts down
    pub shutdown: CancellationToken,
    /// Frame counters shared with the server
    pub metrics: ServerMetrics,
}

/// Routes upgrade requests and drives accepted sessions.
///
/// # Example
///
/// ```ignore
/// struct Chat;
///
/// #[async_trait]
/// impl SessionHandler for Chat {
///     fn route(&self, path: &str) -> Option<String> {
///         path.strip_prefix("/chat/").map(str::to_string)
///     }
///
///     async fn run_session(&self, session: Session) {
///         // read from / write to session.socket until it closes
///     }
/// }
/// ```
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// Return a route key to accept the upgrade of `path`, or `None` to
    /// answer 404.
    fn route(&self, path: &str) -> Option<String>;

    /// Drive the session until the peer leaves or `session.shutdown` fires.
    async fn run_session(&self, session: Session);
}

/// WebSocket server with connection tracking and graceful drain
#[derive(Clone)]
pub struct WebSocketServer {
    config: ServerConfig,
    running: Arc<AtomicBool>,
    bound_addr: Arc<SyncRwLock<Option<SocketAddr>>>,
    next_conn_id: Arc<AtomicU64>,
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionInfo>>>,
    handler: Arc<dyn SessionHandler>,
    metrics: ServerMetrics,
}

impl WebSocketServer {
    pub fn new(config: ServerConfig, handler: Arc<dyn SessionHandler>) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            bound_addr: Arc::new(SyncRwLock::new(None)),
            next_conn_id: Arc::new(AtomicU64::new(1)),
            connections: Arc::new(RwLock::new(HashMap::new())),
            handler,
            metrics: ServerMetrics::new("websocket"),
        }
    }

    fn bind_addr(&self) -> Result<SocketAddr> {
        self.config
            .websocket_addr()
            .ok_or_else(|| ServerError::ConfigError("WebSocket port not configured".into()))?
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn active_connections(&self) -> Vec<ConnectionInfo> {
        self.connections.read().await.values().cloned().collect()
    }

    fn next_connection_id(&self) -> ConnectionId {
        self.next_conn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Perform the upgrade, then hand the socket to the handler.
    async fn handle_connection(
        &self,
        conn_id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
        conn_token: CancellationToken,
    ) -> Result<()> {
        let mut route = None;
        let handler = Arc::clone(&self.handler);
        let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
            match handler.route(req.uri().path()) {
                Some(key) => {
                    route = Some(key);
                    Ok(resp)
                }
                None => {
                    let mut reject = ErrorResponse::new(Some("unknown path".to_string()));
                    *reject.status_mut() = StatusCode::NOT_FOUND;
                    Err(reject)
                }
            }
        };

        let socket = match accept_hdr_async(stream, callback).await {
            Ok(socket) => socket,
            Err(e) => {
                self.metrics.handshake_rejected();
                debug!(conn_id, %peer_addr, %e, "WebSocket handshake rejected");
                return Ok(());
            }
        };

        let Some(route) = route else {
            return Ok(());
        };

        let connected_at = Instant::now();
        self.connections.write().await.insert(
            conn_id,
            ConnectionInfo {
                id: conn_id,
                peer_addr,
                route: route.clone(),
                connected_at,
            },
        );
        self.metrics.connection_opened();
        debug!(conn_id, %peer_addr, %route, "WebSocket session started");

        self.handler
            .run_session(Session {
                id: conn_id,
                peer_addr,
                route,
                socket,
                shutdown: conn_token,
                metrics: self.metrics.clone(),
            })
            .await;

        self.connections.write().await.remove(&conn_id);
        self.metrics.connection_closed(connected_at.elapsed());
        debug!(conn_id, "WebSocket session ended");
        Ok(())
    }
}

#[async_trait]
impl Server for WebSocketServer {
    fn name(&self) -> &str {
        "websocket"
    }

    fn address(&self) -> Option<SocketAddr> {
        *self.bound_addr.read()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(&self, shutdown_token: CancellationToken) -> Result<()> {
        let addr = self.bind_addr()?;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e))?;

        let local_addr = listener.local_addr().map_err(ServerError::Io)?;
        *self.bound_addr.write() = Some(local_addr);
        info!(%local_addr, "WebSocket server listening");

        self.running.store(true, Ordering::SeqCst);

        let mut connection_handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    info!("WebSocket server received shutdown signal");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let conn_id = self.next_connection_id();
                            let server = self.clone();
                            let conn_token = shutdown_token.child_token();

                            let handle = tokio::spawn(async move {
                                if let Err(e) = server
                                    .handle_connection(conn_id, stream, peer_addr, conn_token)
                                    .await
                                {
                                    error!(conn_id, %e, "WebSocket connection error");
                                }
                            });

                            connection_handles.push(handle);
                            connection_handles.retain(|h| !h.is_finished());
                        }
                        Err(e) => {
                            error!(%e, "Failed to accept WebSocket connection");
                        }
                    }
                }
            }
        }

        let connection_count = connection_handles.len();
        if connection_count > 0 {
            info!(connection_count, "Waiting for active WebSocket sessions to close...");

            let drain = tokio::time::timeout(
                std::time::Duration::from_secs(10),
                futures::future::join_all(connection_handles),
            );

            match drain.await {
                Ok(_) => info!("All WebSocket sessions closed gracefully"),
                Err(_) => warn!("Timed out waiting for WebSocket sessions to close"),
            }
        }

        self.running.store(false, Ordering::SeqCst);
        *self.bound_addr.write() = None;

        info!("WebSocket server shutdown complete");
        Ok(())
    }
}
