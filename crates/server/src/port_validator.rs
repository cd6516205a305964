//! Startup port checks
//!
//! A successful probe only gives early feedback; the real bind in
//! [`Server::run`](crate::Server::run) is authoritative.

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

/// Probe every configured listener port by binding and releasing it.
pub async fn validate_ports_available(config: &ServerConfig) -> Result<()> {
    validate_config_ports(config)?;

    let ports = configured_ports(config);
    if ports.is_empty() {
        warn!("No listener ports configured");
        return Ok(());
    }

    for (listener, port) in ports {
        probe_port(&config.host, port, listener).await?;
    }

    info!("Listener ports available");
    Ok(())
}

fn configured_ports(config: &ServerConfig) -> Vec<(&'static str, u16)> {
    let mut ports = Vec::with_capacity(2);
    if let Some(port) = config.http_port {
        ports.push(("HTTP", port));
    }
    if let Some(port) = config.websocket_port {
        ports.push(("WebSocket", port));
    }
    ports
}

async fn probe_port(host: &str, port: u16, listener: &str) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    debug!(listener, port, "Probing port");

    match TcpListener::bind(&addr).await {
        Ok(probe) => {
            let local_addr = probe
                .local_addr()
                .map_err(|e| ServerError::bind(addr.clone(), e))?;
            drop(probe);
            debug!(listener, %local_addr, "Port is free");
            Ok(())
        }
        Err(e) => {
            error!(listener, port, %e, "Port is not available");
            Err(ServerError::port_in_use(port, e.to_string()))
        }
    }
}

/// `true` if binding `host:port` currently fails
pub async fn is_port_in_use(host: &str, port: u16) -> bool {
    TcpListener::bind(format!("{}:{}", host, port)).await.is_err()
}

/// Reject port 0 and warn on privileged ports.
pub fn validate_port_range(port: u16) -> Result<()> {
    if port == 0 {
        return Err(ServerError::ConfigError(
            "Port cannot be 0 for an explicitly configured listener".to_string(),
        ));
    }
    if port < 1024 {
        warn!(port, "Privileged port requires elevated permissions");
    }
    Ok(())
}

/// Range-check both ports and require them to differ.
pub fn validate_config_ports(config: &ServerConfig) -> Result<()> {
    if let Some(port) = config.http_port {
        validate_port_range(port)?;
    }
    if let Some(port) = config.websocket_port {
        validate_port_range(port)?;
    }
    if let (Some(http), Some(ws)) = (config.http_port, config.websocket_port) {
        if http == ws {
            return Err(ServerError::ConfigError(format!(
                "HTTP and WebSocket listeners both configured on port {}",
                http
            )));
        }
    }
    Ok(())
}
