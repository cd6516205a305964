//! Server infrastructure for Ride Dispatch
//!
//! This crate hosts the two listeners of the dispatch service: the HTTP API
//! used by upstream services and the WebSocket endpoint drivers stay
//! connected to.
//!
//! # Architecture
//!
//! Every listener implements [`Server`]; [`ServerExt`] adds `spawn()` and
//! `run_with_ctrl_c()`. Shutdown is a tree of `CancellationToken`s: the
//! [`CombinedServer`] hands a child token to each listener, and the
//! WebSocket server hands a child token to each session.
//!
//! The WebSocket server does not know about drivers. It upgrades the paths a
//! [`SessionHandler`] routes and gives the handler the socket.
//!
//! # Quick Start
//!
//! ```ignore
//! use server::{CombinedServer, ServerConfig, ServerExt};
//!
//! let server = CombinedServer::new(ServerConfig::default())
//!     .with_http_router(api_router)
//!     .with_session_handler(Arc::new(driver_sessions));
//! server.run_with_ctrl_c().await?;
//! ```

// WebSocket errors are large; they only occur on startup and handshake paths
#![allow(clippy::result_large_err)]

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod config;
pub mod error;
pub mod shutdown;
pub mod traits;

pub mod health;
pub mod http;
pub mod port_validator;
pub mod websocket;

pub use config::{ports, ServerConfig};
pub use error::{Result, ServerError};
pub use health::{health_routes, DependencyStatus, HealthState};
pub use http::HttpServer;
pub use port_validator::{validate_config_ports, validate_ports_available};
pub use shutdown::{run_until_shutdown, ShutdownController};
pub use traits::{Server, ServerExt};
pub use websocket::{ConnectionId, ConnectionInfo, Session, SessionHandler, WebSocketServer};

/// Runs the HTTP API and the WebSocket listener under one shutdown token
///
/// A listener is only started when its port is configured and, for the
/// WebSocket side, a session handler has been attached.
pub struct CombinedServer {
    name: String,
    config: ServerConfig,
    http_server: Option<HttpServer>,
    ws_server: Option<WebSocketServer>,
}

impl CombinedServer {
    /// HTTP serves `/` and `/health` until a router is attached
    pub fn new(config: ServerConfig) -> Self {
        Self::with_name("combined", config)
    }

    pub fn with_name(name: impl Into<String>, config: ServerConfig) -> Self {
        let http_server = config.http_port.map(|_| HttpServer::simple(config.clone()));

        Self {
            name: name.into(),
            config,
            http_server,
            ws_server: None,
        }
    }

    /// Replace the HTTP router
    pub fn with_http_router(mut self, router: axum::Router) -> Self {
        self.http_server = self
            .config
            .http_port
            .map(|_| HttpServer::new(self.config.clone(), router));
        self
    }

    /// Attach the handler that drives upgraded WebSocket sessions
    pub fn with_session_handler(mut self, handler: Arc<dyn SessionHandler>) -> Self {
        self.ws_server = self
            .config
            .websocket_port
            .map(|_| WebSocketServer::new(self.config.clone(), handler));
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn websocket(&self) -> Option<&WebSocketServer> {
        self.ws_server.as_ref()
    }

    pub async fn validate_ports(&self) -> Result<()> {
        validate_ports_available(&self.config).await
    }
}

#[async_trait::async_trait]
impl Server for CombinedServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> Option<std::net::SocketAddr> {
        self.http_server
            .as_ref()
            .and_then(|s| s.address())
            .or_else(|| self.ws_server.as_ref().and_then(|s| s.address()))
    }

    fn is_running(&self) -> bool {
        self.http_server.as_ref().is_some_and(|s| s.is_running())
            || self.ws_server.as_ref().is_some_and(|s| s.is_running())
    }

    async fn run(&self, shutdown_token: CancellationToken) -> Result<()> {
        info!(server = %self.name, "Starting listeners...");

        let mut handles: Vec<tokio::task::JoinHandle<Result<()>>> = Vec::new();

        if let Some(ref http) = self.http_server {
            let http = http.clone();
            let token = shutdown_token.child_token();
            info!(port = ?self.config.http_port, "Starting HTTP server");
            handles.push(tokio::spawn(async move { http.run(token).await }));
        }

        if let Some(ref ws) = self.ws_server {
            let ws = ws.clone();
            let token = shutdown_token.child_token();
            info!(port = ?self.config.websocket_port, "Starting WebSocket server");
            handles.push(tokio::spawn(async move { ws.run(token).await }));
        }

        if handles.is_empty() {
            warn!("No listeners configured to start");
            return Ok(());
        }

        tokio::select! {
            _ = shutdown_token.cancelled() => {
                info!("Shutdown signal received");
            }
            result = wait_for_first_completion(&mut handles) => {
                match result {
                    Some(Ok(Ok(()))) => warn!("A listener exited unexpectedly"),
                    Some(Ok(Err(e))) => error!(%e, "A listener exited with error"),
                    Some(Err(e)) => error!(%e, "A listener task panicked"),
                    None => {}
                }
                shutdown_token.cancel();
            }
        }

        info!("Waiting for listeners to shut down...");
        let shutdown_timeout = std::time::Duration::from_secs(30);

        match tokio::time::timeout(shutdown_timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                let errors: Vec<String> = results
                    .into_iter()
                    .filter_map(|r| match r {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(e.to_string()),
                        Err(e) => Some(format!("Task panicked: {}", e)),
                    })
                    .collect();

                if errors.is_empty() {
                    info!(server = %self.name, "All listeners shut down");
                } else {
                    warn!(?errors, "Listeners reported errors during shutdown");
                }
            }
            Err(_) => warn!("Timed out waiting for listeners to shut down"),
        }

        Ok(())
    }
}

async fn wait_for_first_completion(
    handles: &mut [tokio::task::JoinHandle<Result<()>>],
) -> Option<std::result::Result<Result<()>, tokio::task::JoinError>> {
    if handles.is_empty() {
        return None;
    }

    let (result, _index, _remaining) =
        futures::future::select_all(handles.iter_mut()).await;

    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl SessionHandler for NoopHandler {
        fn route(&self, _path: &str) -> Option<String> {
            None
        }

        async fn run_session(&self, _session: Session) {}
    }

    #[test]
    fn test_websocket_requires_handler() {
        let server = CombinedServer::new(ServerConfig::new("127.0.0.1", 0, 0));
        assert!(server.websocket().is_none());

        let server = server.with_session_handler(Arc::new(NoopHandler));
        assert!(server.websocket().is_some());
    }

    #[tokio::test]
    async fn test_combined_server_shutdown() {
        let config = ServerConfig::new("127.0.0.1", 0, 0);
        let server = CombinedServer::new(config)
            .with_http_router(axum::Router::new())
            .with_session_handler(Arc::new(NoopHandler));
        let (handle, token) = server.spawn();

        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), handle).await;
        assert!(result.is_ok(), "Server should shutdown within timeout");
    }
}
