//! Server configuration
//!
//! Bind settings for the HTTP API and the driver WebSocket listener.

use crate::error::{Result, ServerError};
use std::net::SocketAddr;

/// Standard port assignments for the dispatch service
pub mod ports {
    /// HTTP API port (ingestion, status updates, stats)
    pub const DISPATCH_HTTP: u16 = 8090;
    /// Driver WebSocket port
    pub const DISPATCH_WS: u16 = 7090;
}

/// Server configuration for both protocols
///
/// Each port is optional so either listener can run on its own.
///
/// # Example
///
/// ```
/// use server::config::ServerConfig;
///
/// let both = ServerConfig::new("0.0.0.0", 8090, 7090);
/// let api_only = ServerConfig::http_only("127.0.0.1", 8090);
/// assert!(both.has_servers() && api_only.websocket_port.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Optional HTTP port
    pub http_port: Option<u16>,
    /// Optional WebSocket port
    pub websocket_port: Option<u16>,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, http: u16, ws: u16) -> Self {
        Self {
            host: host.into(),
            http_port: Some(http),
            websocket_port: Some(ws),
        }
    }

    pub fn http_only(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            http_port: Some(port),
            websocket_port: None,
        }
    }

    pub fn websocket_only(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            http_port: None,
            websocket_port: Some(port),
        }
    }

    /// Get HTTP socket address
    pub fn http_addr(&self) -> Option<Result<SocketAddr>> {
        self.http_port.map(|p| self.parse_addr(p))
    }

    /// Get WebSocket socket address
    pub fn websocket_addr(&self) -> Option<Result<SocketAddr>> {
        self.websocket_port.map(|p| self.parse_addr(p))
    }

    /// Check if any servers are configured
    pub fn has_servers(&self) -> bool {
        self.http_port.is_some() || self.websocket_port.is_some()
    }

    fn parse_addr(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.host, port)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", ports::DISPATCH_HTTP, ports::DISPATCH_WS)
    }
}
